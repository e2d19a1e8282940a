use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};

use dtl_core::{batch_is_well_formed, ClusterEntry, ClusterLocation};
use dtl_wire::{Codec, Opcode, WireError};
use log::{debug, warn};

use crate::error::ClientError;

static NEXT_OWNER_TAG: AtomicU64 = AtomicU64::new(1);

/// A fresh, process-unique writer identity. The server fences writers by
/// this value (spec.md §4.2); every new `Proxy` claims ownership as a new
/// writer rather than resuming someone else's.
fn next_owner_tag() -> u64 {
    (u64::from(std::process::id()) << 32) | NEXT_OWNER_TAG.fetch_add(1, Ordering::Relaxed)
}

/// A single TCP connection to one server, wrapping the framed codec
/// (spec.md §4.6). Exposed operations map 1:1 onto server opcodes.
pub struct Proxy {
    codec: Codec<TcpStream>,
    namespace_id: String,
    cluster_size: u32,
    owner_tag: u64,
    delete_failover_dir: bool,
}

impl Proxy {
    /// Connects, pushes `request_timeout` down to the transport, then issues
    /// the `Register` handshake. Fails the whole construction if any step
    /// fails, including a `NotOk` response.
    pub fn connect(
        server_address: &str,
        server_port: u16,
        namespace_id: &str,
        lba_size: u32,
        cluster_multiplier: u32,
        request_timeout: u32,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((server_address, server_port)).map_err(WireError::from)?;
        let mut codec = Codec::new(stream);
        codec.set_request_timeout(request_timeout)?;

        let cluster_size = lba_size * cluster_multiplier;
        let owner_tag = next_owner_tag();
        codec.cork();
        codec.put_opcode(Opcode::Register)?;
        codec.put_string(Some(namespace_id))?;
        codec.put_u32(cluster_size)?;
        codec.put_u64(owner_tag)?;
        codec.uncork()?;

        match codec.recv_opcode()? {
            Opcode::Ok => {
                debug!("proxy: registered namespace {namespace_id} as owner {owner_tag}");
                Ok(Self {
                    codec,
                    namespace_id: namespace_id.to_string(),
                    cluster_size,
                    owner_tag,
                    delete_failover_dir: false,
                })
            }
            _ => Err(ClientError::Refused {
                opcode: "Register",
                reason: "namespace busy under another owner, or cluster size mismatch",
            }),
        }
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn owner_tag(&self) -> u64 {
        self.owner_tag
    }

    /// When set, dropping this proxy sends `Unregister` first, so the server
    /// destroys the backend instead of keeping it around for reattachment.
    pub fn set_delete_failover_dir(&mut self, delete: bool) {
        self.delete_failover_dir = delete;
    }

    pub fn add_entries(&mut self, batch: &[ClusterEntry]) -> Result<(), ClientError> {
        if !batch_is_well_formed(batch) {
            return Err(ClientError::MalformedBatch);
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.codec.cork();
        self.codec.put_opcode(Opcode::AddEntries)?;
        self.codec.put_u64(batch.len() as u64)?;
        for entry in batch {
            self.codec.put_location(entry.location)?;
            self.codec.put_u64(entry.lba)?;
            self.codec.put_bytes(Some(&entry.data))?;
        }
        self.codec.uncork()?;
        self.expect_ok("AddEntries")
    }

    pub fn flush(&mut self) -> Result<(), ClientError> {
        self.codec.send_opcode(Opcode::Flush)?;
        self.expect_ok("Flush")
    }

    pub fn remove_up_to(&mut self, sco: ClusterLocation) -> Result<(), ClientError> {
        self.codec.cork();
        self.codec.put_opcode(Opcode::RemoveUpTo)?;
        self.codec.put_location(sco)?;
        self.codec.uncork()?;
        self.expect_ok("RemoveUpTo")
    }

    pub fn clear(&mut self) -> Result<(), ClientError> {
        self.codec.send_opcode(Opcode::Clear)?;
        self.expect_ok("Clear")
    }

    pub fn get_entries(&mut self, visit: &mut dyn FnMut(ClusterLocation, u64, Vec<u8>)) -> Result<(), ClientError> {
        self.codec.send_opcode(Opcode::GetEntries)?;
        self.consume_stream(visit).map(|_| ())
    }

    /// Streams the SCO's entries to `visit`, returning the total bytes
    /// delivered (spec.md §4.6).
    pub fn get_sco_from_failover(
        &mut self,
        sco: ClusterLocation,
        visit: &mut dyn FnMut(ClusterLocation, u64, Vec<u8>),
    ) -> Result<u64, ClientError> {
        self.codec.cork();
        self.codec.put_opcode(Opcode::GetSco)?;
        self.codec.put_location(sco)?;
        self.codec.uncork()?;
        self.consume_stream(visit)
    }

    pub fn get_sco_range(&mut self) -> Result<(Option<ClusterLocation>, Option<ClusterLocation>), ClientError> {
        self.codec.send_opcode(Opcode::GetScoRange)?;
        self.codec.get_cork()?;
        let oldest = self.codec.get_location()?;
        let youngest = self.codec.get_location()?;
        Ok((as_option(oldest), as_option(youngest)))
    }

    pub fn unregister(&mut self) -> Result<(), ClientError> {
        self.codec.send_opcode(Opcode::Unregister)?;
        self.expect_ok("Unregister")
    }

    fn consume_stream(&mut self, visit: &mut dyn FnMut(ClusterLocation, u64, Vec<u8>)) -> Result<u64, ClientError> {
        let mut total = 0u64;
        loop {
            self.codec.get_cork()?;
            let loc = self.codec.get_location()?;
            let lba = self.codec.get_u64()?;
            let data = self.codec.get_bytes()?.unwrap_or_default();
            if loc.is_none() {
                break;
            }
            total += data.len() as u64;
            visit(loc, lba, data);
        }
        Ok(total)
    }

    fn expect_ok(&mut self, opcode: &'static str) -> Result<(), ClientError> {
        match self.codec.recv_opcode()? {
            Opcode::Ok => Ok(()),
            _ => Err(ClientError::Refused {
                opcode,
                reason: "server returned NotOk",
            }),
        }
    }
}

impl Drop for Proxy {
    /// If clearing was not requested, closes the socket without
    /// `Unregister` so the server keeps the data for the next owner
    /// (spec.md §4.6).
    fn drop(&mut self) {
        if self.delete_failover_dir {
            if let Err(e) = self.unregister() {
                warn!("proxy: unregister during drop failed: {e}");
            }
        }
        let _ = self.codec.close();
    }
}

fn as_option(loc: ClusterLocation) -> Option<ClusterLocation> {
    (!loc.is_none()).then_some(loc)
}
