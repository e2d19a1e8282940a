use std::sync::Mutex;

use dtl_core::{batch_is_well_formed, ClusterEntry, ClusterLocation};
use log::debug;

use crate::backend::{Backend, EntryVisitor};
use crate::error::BackendError;
use crate::store::SegmentStore;

#[derive(Clone, Copy, Debug)]
struct SegmentMeta {
    number: u32,
    count: u16,
}

struct State {
    registered: bool,
    owner_tag: Option<u64>,
    /// Set when a register call replaced a previous owner on a non-empty
    /// log; cleared by the next `get_entries`, or consumed by a wipe if
    /// `add_entries` arrives first (spec.md §4.2, §8 "reattachment").
    must_get_entries_first: bool,
    segments: Vec<SegmentMeta>,
    last_location: ClusterLocation,
}

impl State {
    fn new() -> Self {
        Self {
            registered: false,
            owner_tag: None,
            must_get_entries_first: false,
            segments: Vec::new(),
            last_location: ClusterLocation::NONE,
        }
    }

    fn check_owner(&self, owner_tag: u64) -> Result<(), BackendError> {
        match self.owner_tag {
            Some(t) if self.registered && t == owner_tag => Ok(()),
            Some(_) if self.registered => Err(BackendError::WrongOwner { got: owner_tag }),
            _ => Err(BackendError::NotRegistered),
        }
    }
}

/// Generic bookkeeping shared by the file and memory backends: segment/offset
/// contiguity, ownership fencing, and the reattachment rule. Delegates actual
/// byte storage to a [`SegmentStore`].
///
/// Mirrors the split between `commitlog::repo::Repo` (storage) and
/// `commitlog::commitlog::Generic<R, T>` (bookkeeping) in the teacher crate.
pub struct LogBackend<S: SegmentStore> {
    store: S,
    cluster_size: u32,
    state: Mutex<State>,
}

impl<S: SegmentStore> LogBackend<S> {
    pub fn new(store: S, cluster_size: u32) -> Self {
        Self {
            store,
            cluster_size,
            state: Mutex::new(State::new()),
        }
    }
}

impl<S: SegmentStore> Backend for LogBackend<S> {
    fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    fn register(&self, owner_tag: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let replacing_owner = state.registered && state.owner_tag != Some(owner_tag);
        state.registered = true;
        state.owner_tag = Some(owner_tag);
        if replacing_owner && !state.segments.is_empty() {
            debug!("backend: owner {owner_tag} replaced a previous owner on a non-empty log");
            state.must_get_entries_first = true;
        }
        Ok(())
    }

    fn add_entries(&self, entries: Vec<ClusterEntry>, owner_tag: u64) -> Result<(), BackendError> {
        if entries.is_empty() {
            return Ok(());
        }
        if !batch_is_well_formed(&entries) {
            return Err(BackendError::InvalidSequence(
                "batch must share one segment_number with contiguous offsets".into(),
            ));
        }

        let mut state = self.state.lock().unwrap();
        state.check_owner(owner_tag)?;

        if state.must_get_entries_first {
            debug!("backend: add_entries before get_entries after reattachment -- wiping prior state");
            self.store.clear()?;
            state.segments.clear();
            state.last_location = ClusterLocation::NONE;
            state.must_get_entries_first = false;
        }

        let first = &entries[0];
        match state.segments.last() {
            None => {
                if first.location.segment_offset != 0 {
                    return Err(BackendError::InvalidSequence(
                        "first entry of an empty log must open at offset 0".into(),
                    ));
                }
                if first.location.segment_number == 0 {
                    return Err(BackendError::InvalidSequence("segment_number must be nonzero".into()));
                }
            }
            Some(meta) if first.location.segment_number == meta.number => {
                if first.location.segment_offset != meta.count {
                    return Err(BackendError::InvalidSequence(format!(
                        "expected offset {} continuing segment {}, got {}",
                        meta.count, meta.number, first.location.segment_offset
                    )));
                }
            }
            Some(meta) if first.location.segment_number > meta.number => {
                if first.location.segment_offset != 0 {
                    return Err(BackendError::InvalidSequence(
                        "a new segment must open at offset 0".into(),
                    ));
                }
            }
            Some(meta) => {
                return Err(BackendError::InvalidSequence(format!(
                    "segment_number must increase past {}, got {}",
                    meta.number, first.location.segment_number
                )))
            }
        }

        self.store.append(first.location.segment_number, &entries)?;

        match state.segments.last_mut() {
            Some(meta) if meta.number == first.location.segment_number => {
                meta.count += entries.len() as u16;
            }
            _ => state.segments.push(SegmentMeta {
                number: first.location.segment_number,
                count: entries.len() as u16,
            }),
        }
        state.last_location = entries.last().unwrap().location;

        Ok(())
    }

    fn flush(&self, owner_tag: u64) -> Result<(), BackendError> {
        self.state.lock().unwrap().check_owner(owner_tag)?;
        self.store.flush()?;
        Ok(())
    }

    fn remove_up_to(&self, sco: ClusterLocation, owner_tag: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check_owner(owner_tag)?;

        match state.segments.first() {
            None => return Ok(()),
            Some(first) if sco.segment_number < first.number => return Ok(()),
            Some(_) => {}
        }

        let mut retained = Vec::with_capacity(state.segments.len());
        for meta in state.segments.drain(..) {
            if meta.number <= sco.segment_number {
                self.store.remove_segment(meta.number)?;
            } else {
                retained.push(meta);
            }
        }
        state.segments = retained;
        if state.segments.is_empty() {
            state.last_location = ClusterLocation::NONE;
        }
        Ok(())
    }

    fn clear(&self, owner_tag: u64) -> Result<(), BackendError> {
        self.state.lock().unwrap().check_owner(owner_tag)?;
        self.store.clear()?;
        let mut state = self.state.lock().unwrap();
        state.segments.clear();
        state.last_location = ClusterLocation::NONE;
        Ok(())
    }

    fn get_entries(&self, start: ClusterLocation, max: u64, visit: &mut EntryVisitor) -> Result<u64, BackendError> {
        let segments = {
            let mut state = self.state.lock().unwrap();
            state.must_get_entries_first = false;
            state.segments.clone()
        };

        let mut remaining = max;
        let mut total = 0u64;
        for meta in segments {
            if remaining == 0 {
                break;
            }
            if meta.number < start.segment_number {
                continue;
            }
            let skip = if meta.number == start.segment_number {
                start.segment_offset
            } else {
                0
            };
            let visited = self.store.read_segment(meta.number, skip, remaining, visit)?;
            total += visited;
            remaining -= visited;
        }
        Ok(total)
    }

    fn get_sco(&self, sco: ClusterLocation, visit: &mut EntryVisitor) -> Result<(), BackendError> {
        self.store.read_segment(sco.segment_number, 0, u64::MAX, visit)?;
        Ok(())
    }

    fn range(&self) -> (Option<ClusterLocation>, Option<ClusterLocation>) {
        let state = self.state.lock().unwrap();
        match state.segments.first() {
            None => (None, None),
            Some(first) => (Some(ClusterLocation::new(first.number, 0)), Some(state.last_location)),
        }
    }
}
