use dtl_core::{ClusterEntry, ClusterLocation};

use crate::error::BackendError;

/// Invoked once per entry during replay; returning `Err` aborts the
/// iteration early (e.g. the socket write backing it failed).
pub type EntryVisitor<'a> = dyn FnMut(ClusterLocation, u64, &[u8]) -> Result<(), BackendError> + 'a;

/// The per-namespace ordered log of cluster entries (spec.md §4.2).
///
/// A single backend is owned by at most one session/client at a time,
/// enforced by `owner_tag` fencing on every mutating operation.
pub trait Backend: Send + Sync {
    /// The `cluster_size` this backend was created with; immutable for its
    /// lifetime.
    fn cluster_size(&self) -> u32;

    /// Claim this backend for exclusive use by `owner_tag`, replacing any
    /// previous owner.
    fn register(&self, owner_tag: u64) -> Result<(), BackendError>;

    /// Append one batch. All entries must share one `segment_number`; the
    /// batch must continue the currently open segment or open the next one
    /// (spec.md §4.2).
    fn add_entries(&self, entries: Vec<ClusterEntry>, owner_tag: u64) -> Result<(), BackendError>;

    /// Ensure everything accepted so far is durable on the chosen medium.
    fn flush(&self, owner_tag: u64) -> Result<(), BackendError>;

    /// Trim all segments with `segment_number <= sco.segment_number`.
    fn remove_up_to(&self, sco: ClusterLocation, owner_tag: u64) -> Result<(), BackendError>;

    /// Remove all segments, resetting the log to empty.
    fn clear(&self, owner_tag: u64) -> Result<(), BackendError>;

    /// Iterate entries in log order starting at the first entry with
    /// location `>= start` (`ClusterLocation::NONE` means "from the
    /// beginning"), invoking `visit` up to `max` times or until exhaustion.
    /// Returns the number of entries visited.
    fn get_entries(&self, start: ClusterLocation, max: u64, visit: &mut EntryVisitor) -> Result<u64, BackendError>;

    /// Iterate every entry in the segment named by `sco.segment_number`; a
    /// no-op if the segment is absent.
    fn get_sco(&self, sco: ClusterLocation, visit: &mut EntryVisitor) -> Result<(), BackendError>;

    /// `(oldest_location, youngest_location)`, or `(None, None)` when empty.
    fn range(&self) -> (Option<ClusterLocation>, Option<ClusterLocation>);
}
