use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dtl_backend::BackendRegistry;
use log::info;

use crate::accept::AcceptLoop;
use crate::error::ServerError;

/// Top-level server: the backend registry and the accept loop built on top
/// of it (spec.md §2 "Server accept loop", §4.3).
pub struct Server {
    accept_loop: AcceptLoop,
}

impl Server {
    pub fn new(address: &str, port: u16, listen_backlog: i32, registry: Arc<BackendRegistry>) -> Result<Self, ServerError> {
        let accept_loop = AcceptLoop::bind(address, port, listen_backlog, registry)?;
        Ok(Self { accept_loop })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.accept_loop.local_addr()
    }

    /// Flip to request an orderly shutdown; typically wired to a signal handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.accept_loop.stop_handle()
    }

    pub fn request_stop(&self) {
        self.accept_loop.request_stop();
    }

    /// Blocks, accepting connections, until `stop_handle()` is set.
    pub fn run(&self) {
        info!("server: accepting connections on {:?}", self.local_addr());
        self.accept_loop.run();
    }
}
