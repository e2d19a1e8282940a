//! Client-side half of the distributed transaction log: a single-connection
//! proxy plus the async/sync write-path bridges the volume driver holds onto
//! (spec.md §4.6-§4.9).

mod async_bridge;
mod bridge;
mod disabled_bridge;
mod error;
mod factory;
mod proxy;
mod sync_bridge;

pub use async_bridge::AsyncBridge;
pub use bridge::{Bridge, DegradedNotifier, Mode};
pub use disabled_bridge::DisabledBridge;
pub use error::ClientError;
pub use factory::BridgeFactory;
pub use proxy::Proxy;
pub use sync_bridge::SyncBridge;
