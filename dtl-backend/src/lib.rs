//! Per-namespace ordered log backend: the `Backend` trait, its file and
//! memory implementations, and the process-wide registry that hands them out
//! by namespace id (spec.md §4.2, §4.3).

mod backend;
mod error;
mod fs;
mod logbackend;
mod mem;
mod registry;
mod store;

pub use backend::{Backend, EntryVisitor};
pub use error::BackendError;
pub use fs::{FsBackend, FsStore};
pub use logbackend::LogBackend;
pub use mem::{MemBackend, MemStore};
pub use registry::BackendRegistry;
pub use store::SegmentStore;
