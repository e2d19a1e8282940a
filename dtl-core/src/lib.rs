//! Shared data model for the distributed transaction log (DTL): the
//! `ClusterLocation`/`ClusterEntry` types every other crate in this workspace
//! builds on, plus a handful of process-wide defaults.

mod entry;
mod error;
mod location;
mod options;

pub use entry::{batch_is_well_formed, ClusterEntry};
pub use error::CoreError;
pub use location::ClusterLocation;
pub use options::{is_valid_cluster_size, Options};
