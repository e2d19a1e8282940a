use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dtl_backend::BackendRegistry;
use log::{debug, info, warn};

use crate::error::ServerError;
use crate::session::Session;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct LiveSession {
    stream: TcpStream,
    join: JoinHandle<()>,
}

/// Binds one `(address, port)`, accepts connections, and spawns one thread
/// per session (spec.md §4.5).
///
/// Shutdown is cooperative rather than `poll()`-on-a-self-pipe: a shared stop
/// flag is checked between non-blocking `accept()` calls, and every live
/// session's socket is shut down directly to unblock its thread's blocking
/// read.
pub struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<BackendRegistry>,
    stop: Arc<AtomicBool>,
    sessions: Arc<Mutex<Vec<LiveSession>>>,
}

impl AcceptLoop {
    pub fn bind(address: &str, port: u16, backlog: i32, registry: Arc<BackendRegistry>) -> Result<Self, ServerError> {
        let addr = format!("{address}:{port}");
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            address: addr.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind { address: addr, source })?;
        info!(
            "accept loop: listening on {} (backlog={backlog})",
            listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        // std's TcpListener exposes no backlog knob; `backlog` is accepted for
        // parity with spec.md's bind contract and logged above.
        Ok(Self {
            listener,
            registry,
            stop: Arc::new(AtomicBool::new(false)),
            sessions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle another thread (e.g. a signal handler) can flip to request
    /// shutdown.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Accept connections until stopped, then signal every live session to
    /// close and join them all before returning.
    pub fn run(&self) {
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!("accept loop: accepted {addr}");
                    self.spawn_session(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    warn!("accept loop: accept() failed: {e}");
                    thread::sleep(POLL_INTERVAL);
                }
            }
            self.reap_finished_sessions();
        }
        self.shutdown();
    }

    fn spawn_session(&self, stream: TcpStream) {
        let shutdown_handle = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!("accept loop: failed to clone accepted socket, dropping connection: {e}");
                return;
            }
        };
        let registry = Arc::clone(&self.registry);
        let stopping = Arc::clone(&self.stop);
        let join = thread::spawn(move || Session::new(stream, registry, stopping).run());
        self.sessions.lock().unwrap().push(LiveSession {
            stream: shutdown_handle,
            join,
        });
    }

    fn reap_finished_sessions(&self) {
        self.sessions.lock().unwrap().retain(|s| !s.join.is_finished());
    }

    fn shutdown(&self) {
        info!("accept loop: shutting down");
        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap());
        for session in &sessions {
            let _ = session.stream.shutdown(Shutdown::Both);
        }
        for session in sessions {
            let _ = session.join.join();
        }
        // Every session has joined by now, so any backend it left registered
        // (a disconnect without `Unregister`) is still sitting in the
        // registry; sweep it along with everything else still registered.
        self.registry.shutdown();
    }
}
