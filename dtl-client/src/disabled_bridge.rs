use dtl_core::ClusterLocation;

use crate::bridge::{Bridge, DegradedNotifier, Mode};
use crate::error::ClientError;
use crate::proxy::Proxy;

/// Stands in for `DtlConfigWrapper::CacheType::None`: no DTL configured for
/// this volume. Every write reports admitted; there is nothing to replay.
/// Additive relative to the distilled spec (see `SPEC_FULL.md` §8).
#[derive(Default)]
pub struct DisabledBridge;

impl Bridge for DisabledBridge {
    fn initialize(&mut self, _notifier: DegradedNotifier) {}

    fn new_cache(&mut self, _proxy: Proxy) {}

    fn destroy(&mut self, _sync_to_backend: bool) {}

    fn add_entries(&mut self, _locations: &[ClusterLocation], _start_lba: u64, _data: &[u8]) -> Result<(), ClientError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn remove_up_to(&mut self, _sco: ClusterLocation) -> Result<(), ClientError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    fn get_sco_from_failover(
        &mut self,
        _sco: ClusterLocation,
        _visit: &mut dyn FnMut(ClusterLocation, u64, Vec<u8>),
    ) -> Result<u64, ClientError> {
        Err(ClientError::NotConfigured)
    }

    fn mode(&self) -> Mode {
        Mode::Disabled
    }
}
