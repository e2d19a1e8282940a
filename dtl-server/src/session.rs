use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dtl_backend::{Backend, BackendError, BackendRegistry};
use dtl_core::{ClusterEntry, ClusterLocation};
use dtl_wire::{Codec, Opcode, WireError};
use log::{debug, info, warn};

/// What `Register` installs on a session; cleared by `Unregister` or
/// disconnect (spec.md §4.4).
struct Registration {
    namespace_id: String,
    owner_tag: u64,
    backend: Arc<dyn Backend>,
}

/// One per accepted TCP connection, running on its own thread. Strictly
/// sequential within a session: a request is fully dispatched -- including
/// any streamed response -- before the next opcode is read.
pub struct Session {
    codec: Codec<TcpStream>,
    registry: Arc<BackendRegistry>,
    registration: Option<Registration>,
    peer: String,
    /// Shared with the accept loop: set only when the *server* is shutting
    /// down, as opposed to this one connection dropping on its own.
    stopping: Arc<AtomicBool>,
}

impl Session {
    pub fn new(stream: TcpStream, registry: Arc<BackendRegistry>, stopping: Arc<AtomicBool>) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        Self {
            codec: Codec::new(stream),
            registry,
            registration: None,
            peer,
            stopping,
        }
    }

    /// Dispatch requests until disconnect, a protocol-level error, or a
    /// server-wide shutdown, then close the socket.
    ///
    /// A backend outlives a plain disconnect -- it is re-attachable across
    /// reconnects (spec.md §3 "Per-namespace log" lifecycle) -- but is
    /// destroyed, trimming its on-disk footprint, when the server itself is
    /// shutting down (spec.md §5 "Cancellation and timeouts").
    pub fn run(mut self) {
        loop {
            match self.codec.recv_opcode() {
                Ok(op) => {
                    if let Err(e) = self.dispatch(op) {
                        warn!("session {}: {e}, closing connection", self.peer);
                        break;
                    }
                }
                Err(WireError::ShortRead { actual: 0, .. }) => {
                    debug!("session {}: peer disconnected", self.peer);
                    break;
                }
                Err(e) => {
                    warn!("session {}: {e}, closing connection", self.peer);
                    break;
                }
            }
        }
        if self.stopping.load(Ordering::SeqCst) {
            self.destroy_registration();
        }
        let _ = self.codec.close();
    }

    /// Drop this session's registered backend and remove it from the
    /// registry outright -- the explicit "consumer no longer needs the data"
    /// path (`Unregister`, or this session's connection going away as part of
    /// a full server shutdown).
    fn destroy_registration(&mut self) {
        if let Some(reg) = self.registration.take() {
            debug!("session {}: destroying namespace {}", self.peer, reg.namespace_id);
            drop(reg.backend);
            self.registry.destroy(&reg.namespace_id);
        }
    }

    fn dispatch(&mut self, op: Opcode) -> Result<(), WireError> {
        if op != Opcode::Register && self.registration.is_none() {
            return self.respond_not_ok();
        }
        match op {
            Opcode::Register => self.handle_register(),
            Opcode::Unregister => self.handle_unregister(),
            Opcode::AddEntries => self.handle_add_entries(),
            Opcode::GetEntries => self.handle_get_entries(),
            Opcode::GetSco => self.handle_get_sco(),
            Opcode::RemoveUpTo => self.handle_remove_up_to(),
            Opcode::Flush => self.handle_flush(),
            Opcode::Clear => self.handle_clear(),
            Opcode::GetScoRange => self.handle_get_sco_range(),
            Opcode::Ok | Opcode::NotOk => Err(WireError::UnexpectedResponse {
                expected: "a request opcode",
                actual: format!("{op:?}"),
            }),
        }
    }

    fn respond_ok(&mut self) -> Result<(), WireError> {
        self.codec.send_opcode(Opcode::Ok)
    }

    fn respond_not_ok(&mut self) -> Result<(), WireError> {
        self.codec.send_opcode(Opcode::NotOk)
    }

    fn backend(&self) -> &Registration {
        self.registration.as_ref().expect("dispatch guarantees a registration is present")
    }

    fn handle_register(&mut self) -> Result<(), WireError> {
        let namespace_id = self.codec.get_string()?.unwrap_or_default();
        let cluster_size = self.codec.get_u32()?;
        let owner_tag = self.codec.get_u64()?;

        match self.registry.get_or_create(&namespace_id, cluster_size) {
            Ok(backend) => match backend.register(owner_tag) {
                Ok(()) => {
                    info!("session {}: registered namespace {namespace_id} for owner {owner_tag}", self.peer);
                    self.registration = Some(Registration {
                        namespace_id,
                        owner_tag,
                        backend,
                    });
                    self.respond_ok()
                }
                Err(e) => {
                    warn!("session {}: register({namespace_id}) rejected: {e}", self.peer);
                    self.respond_not_ok()
                }
            },
            Err(e) => {
                warn!("session {}: register({namespace_id}) rejected: {e}", self.peer);
                self.respond_not_ok()
            }
        }
    }

    fn handle_unregister(&mut self) -> Result<(), WireError> {
        self.destroy_registration();
        self.respond_ok()
    }

    fn handle_add_entries(&mut self) -> Result<(), WireError> {
        let count = self.codec.get_u64()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let location = self.codec.get_location()?;
            let lba = self.codec.get_u64()?;
            let data = self.codec.get_bytes()?.unwrap_or_default();
            entries.push(ClusterEntry::new(location, lba, data));
        }

        let reg = self.backend();
        match reg.backend.add_entries(entries, reg.owner_tag) {
            Ok(()) => self.respond_ok(),
            Err(e) => {
                warn!("session {}: add_entries rejected: {e}", self.peer);
                self.respond_not_ok()
            }
        }
    }

    fn handle_get_entries(&mut self) -> Result<(), WireError> {
        let backend = Arc::clone(&self.backend().backend);
        let result = backend.get_entries(ClusterLocation::NONE, u64::MAX, &mut |loc, lba, data| {
            write_triple(&mut self.codec, loc, lba, data)
        });
        self.finish_stream(result)
    }

    fn handle_get_sco(&mut self) -> Result<(), WireError> {
        let sco = self.codec.get_location()?;
        let backend = Arc::clone(&self.backend().backend);
        let result = backend.get_sco(sco, &mut |loc, lba, data| write_triple(&mut self.codec, loc, lba, data));
        self.finish_stream(result.map(|()| 0))
    }

    /// Send the `ClusterLocation(0)` sentinel that terminates a `GetEntries`/
    /// `GetSco` stream, or propagate a fatal wire error if streaming failed.
    fn finish_stream(&mut self, result: Result<u64, BackendError>) -> Result<(), WireError> {
        match result {
            Ok(_) => write_triple(&mut self.codec, ClusterLocation::NONE, 0, &[]),
            Err(e) => Err(unwrap_callback_error(e)),
        }
    }

    fn handle_remove_up_to(&mut self) -> Result<(), WireError> {
        let sco = self.codec.get_location()?;
        let reg = self.backend();
        match reg.backend.remove_up_to(sco, reg.owner_tag) {
            Ok(()) => self.respond_ok(),
            Err(e) => {
                warn!("session {}: remove_up_to rejected: {e}", self.peer);
                self.respond_not_ok()
            }
        }
    }

    fn handle_flush(&mut self) -> Result<(), WireError> {
        let reg = self.backend();
        match reg.backend.flush(reg.owner_tag) {
            Ok(()) => self.respond_ok(),
            Err(e) => {
                warn!("session {}: flush failed: {e}", self.peer);
                self.respond_not_ok()
            }
        }
    }

    fn handle_clear(&mut self) -> Result<(), WireError> {
        let reg = self.backend();
        if let Err(e) = reg.backend.clear(reg.owner_tag) {
            warn!("session {}: clear failed: {e}", self.peer);
        }
        self.respond_ok()
    }

    fn handle_get_sco_range(&mut self) -> Result<(), WireError> {
        let (oldest, youngest) = self.backend().backend.range();
        self.codec.cork();
        self.codec.put_location(oldest.unwrap_or(ClusterLocation::NONE))?;
        self.codec.put_location(youngest.unwrap_or(ClusterLocation::NONE))?;
        self.codec.uncork()
    }
}

fn write_triple(codec: &mut Codec<TcpStream>, loc: ClusterLocation, lba: u64, data: &[u8]) -> Result<(), BackendError> {
    (|| -> Result<(), WireError> {
        codec.cork();
        codec.put_location(loc)?;
        codec.put_u64(lba)?;
        codec.put_bytes((!data.is_empty()).then_some(data))?;
        codec.uncork()
    })()
    .map_err(|e| BackendError::Callback(Box::new(e)))
}

/// Unwrap a wire error boxed by [`write_triple`] back into itself, or wrap a
/// genuine storage error as an I/O failure -- either way the connection is
/// torn down (spec.md §7: "any I/O error ... aborts the current request").
fn unwrap_callback_error(e: BackendError) -> WireError {
    match e {
        BackendError::Callback(inner) => match inner.downcast::<WireError>() {
            Ok(wire) => *wire,
            Err(other) => WireError::Io(io::Error::other(other.to_string())),
        },
        other => WireError::Io(io::Error::other(other.to_string())),
    }
}
