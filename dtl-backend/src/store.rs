use std::io;

use dtl_core::ClusterEntry;

use crate::backend::EntryVisitor;
use crate::error::BackendError;

/// Storage-only half of a log backend: persisting and replaying the raw
/// bytes of a segment. Bookkeeping (segment/offset contiguity, ownership,
/// `last_location`) lives in [`crate::logbackend::LogBackend`], which is
/// generic over this trait -- mirrors the teacher's split between
/// `commitlog::repo::Repo` (storage) and `commitlog::commitlog::Generic`
/// (bookkeeping).
pub trait SegmentStore: Send + Sync {
    /// Append `entries` to `segment_number`, creating the segment first if
    /// this is its first batch.
    fn append(&self, segment_number: u32, entries: &[ClusterEntry]) -> io::Result<()>;

    /// Iterate up to `max` entries of `segment_number` starting at
    /// `skip_offset`, invoking `visit` for each. Returns the number visited.
    /// A no-op (returns `Ok(0)`) if the segment does not exist.
    fn read_segment(
        &self,
        segment_number: u32,
        skip_offset: u16,
        max: u64,
        visit: &mut EntryVisitor,
    ) -> Result<u64, BackendError>;

    fn remove_segment(&self, segment_number: u32) -> io::Result<()>;

    /// Remove every segment this store holds.
    fn clear(&self) -> io::Result<()>;

    /// Ensure everything written so far is durable (no-op for in-memory
    /// stores).
    fn flush(&self) -> io::Result<()>;
}
