use dtl_core::ClusterLocation;

use crate::error::ClientError;
use crate::proxy::Proxy;

/// Invoked at most once, the first time a bridge decides its connection to
/// the server can no longer be trusted.
pub type DegradedNotifier = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Asynchronous,
    Synchronous,
    Disabled,
}

/// The polymorphic contract the volume write path holds onto. Callers never
/// branch on `mode()` beyond reporting it (spec.md §4.9).
pub trait Bridge: Send {
    fn initialize(&mut self, notifier: DegradedNotifier);

    /// Adopt a new proxy, replacing whatever this bridge was using before.
    fn new_cache(&mut self, proxy: Proxy);

    /// Stop any background work; if `sync_to_backend`, make one best-effort
    /// attempt to drain buffered writes first.
    fn destroy(&mut self, sync_to_backend: bool);

    fn add_entries(&mut self, locations: &[ClusterLocation], start_lba: u64, data: &[u8]) -> Result<(), ClientError>;

    fn flush(&mut self) -> Result<(), ClientError>;

    fn remove_up_to(&mut self, sco: ClusterLocation) -> Result<(), ClientError>;

    fn clear(&mut self) -> Result<(), ClientError>;

    fn get_sco_from_failover(
        &mut self,
        sco: ClusterLocation,
        visit: &mut dyn FnMut(ClusterLocation, u64, Vec<u8>),
    ) -> Result<u64, ClientError>;

    fn mode(&self) -> Mode;
}
