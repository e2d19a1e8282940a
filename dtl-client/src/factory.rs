use crate::async_bridge::AsyncBridge;
use crate::bridge::{Bridge, Mode};
use crate::disabled_bridge::DisabledBridge;
use crate::proxy::Proxy;
use crate::sync_bridge::SyncBridge;

/// Builds the concrete bridge for a mode value; callers hold the returned
/// trait object and never branch on `mode` again (spec.md §4.9).
pub struct BridgeFactory;

impl BridgeFactory {
    pub fn create(
        mode: Mode,
        proxy: Option<Proxy>,
        lba_size: u32,
        cluster_multiplier: u32,
        max_entries: usize,
        write_trigger: usize,
    ) -> Box<dyn Bridge> {
        match mode {
            Mode::Asynchronous => {
                let proxy = proxy.expect("asynchronous mode requires a proxy");
                Box::new(AsyncBridge::new(proxy, lba_size, cluster_multiplier, max_entries, write_trigger))
            }
            Mode::Synchronous => {
                let proxy = proxy.expect("synchronous mode requires a proxy");
                Box::new(SyncBridge::new(proxy, lba_size, cluster_multiplier))
            }
            Mode::Disabled => Box::new(DisabledBridge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mode_needs_no_proxy() {
        let bridge = BridgeFactory::create(Mode::Disabled, None, 4096, 1, 8, 4);
        assert_eq!(bridge.mode(), Mode::Disabled);
    }
}
