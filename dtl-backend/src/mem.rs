use std::collections::BTreeMap;
use std::sync::Mutex;

use dtl_core::ClusterEntry;
use log::debug;

use crate::backend::EntryVisitor;
use crate::error::BackendError;
use crate::logbackend::LogBackend;
use crate::store::SegmentStore;

/// In-memory [`SegmentStore`]: one `Vec<ClusterEntry>` per segment number.
///
/// Grounded on `commitlog::repo::mem::Memory`'s
/// `Arc<RwLock<BTreeMap<u64, SharedBytes>>>` append-only-segment model; here
/// entries are already structured values rather than raw bytes, so the inner
/// collection holds `ClusterEntry` directly. Each batch owns its own `Vec<u8>`
/// data, so -- as in the teacher's model -- there is no aliasing between
/// segments or batches to reason about.
#[derive(Default)]
pub struct MemStore {
    segments: Mutex<BTreeMap<u32, Vec<ClusterEntry>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for MemStore {
    fn append(&self, segment_number: u32, entries: &[ClusterEntry]) -> std::io::Result<()> {
        let mut segments = self.segments.lock().unwrap();
        segments.entry(segment_number).or_default().extend_from_slice(entries);
        Ok(())
    }

    fn read_segment(
        &self,
        segment_number: u32,
        skip_offset: u16,
        max: u64,
        visit: &mut EntryVisitor,
    ) -> Result<u64, BackendError> {
        let segments = self.segments.lock().unwrap();
        let Some(entries) = segments.get(&segment_number) else {
            return Ok(0);
        };
        let mut visited = 0u64;
        for entry in entries.iter().filter(|e| e.location.segment_offset >= skip_offset) {
            if visited >= max {
                break;
            }
            visit(entry.location, entry.lba, &entry.data)?;
            visited += 1;
        }
        Ok(visited)
    }

    fn remove_segment(&self, segment_number: u32) -> std::io::Result<()> {
        self.segments.lock().unwrap().remove(&segment_number);
        Ok(())
    }

    fn clear(&self) -> std::io::Result<()> {
        debug!("mem backend: clearing all segments");
        self.segments.lock().unwrap().clear();
        Ok(())
    }

    fn flush(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A memory-backed log (spec.md §4.2 "Memory backend specifics").
pub type MemBackend = LogBackend<MemStore>;

impl MemBackend {
    pub fn create(cluster_size: u32) -> Self {
        LogBackend::new(MemStore::new(), cluster_size)
    }
}
