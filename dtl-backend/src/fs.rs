use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use dtl_core::ClusterEntry;
use dtl_wire::{FrameReader, FrameWriter};
use log::{debug, warn};

use crate::backend::EntryVisitor;
use crate::error::BackendError;
use crate::logbackend::LogBackend;
use crate::store::SegmentStore;

/// One append-only file per segment under `<root>/<namespace_id>/`.
///
/// Grounded on `commitlog::repo::fs::Fs`: segment files are named by a
/// canonical textual rendering of their number (here, plain decimal, as
/// `existing_offsets` parses back with `str::parse`), opened with
/// `OpenOptions::append(true)` while being written to, and are immutable once
/// closed -- closing happens implicitly here because a segment is only ever
/// appended to while it is the open segment in [`crate::logbackend::LogBackend`]'s
/// bookkeeping.
pub struct FsStore {
    root: PathBuf,
    /// Cached per-entry on-disk size (`8 + 8 + 8 + cluster_size`), valid once
    /// `cluster_size` is fixed for the log, letting partial-segment replay
    /// seek directly to `segment_offset * entry_size` (spec.md §4.2).
    entry_size: u64,
    /// Segment number last written to by `append`, 0 meaning none yet.
    /// Segment numbers start at 1, so 0 is never a real segment
    /// (`ClusterLocation`'s all-zero sentinel reserves it). `flush` reopens
    /// this segment to `fsync` it.
    last_segment: AtomicU32,
}

fn encode_entry(entry: &ClusterEntry) -> Vec<u8> {
    let mut w = FrameWriter::new();
    w.put_location(entry.location);
    w.put_u64(entry.lba);
    w.put_bytes(Some(&entry.data));
    w.into_bytes()
}

impl FsStore {
    /// Create (if needed) and open the per-namespace directory `root`.
    pub fn new(root: impl Into<PathBuf>, cluster_size: u32) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entry_size: 8 + 8 + 8 + cluster_size as u64,
            last_segment: AtomicU32::new(0),
        })
    }

    fn segment_path(&self, segment_number: u32) -> PathBuf {
        self.root.join(segment_number.to_string())
    }

    /// Segment numbers present on disk, ascending.
    pub fn existing_segments(&self) -> io::Result<Vec<u32>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(n) = name.to_str().and_then(|s| s.parse::<u32>().ok()) {
                segments.push(n);
            }
        }
        segments.sort_unstable();
        Ok(segments)
    }

    fn read_entry(file: &mut File, entry_size: u64) -> io::Result<Option<ClusterEntry>> {
        let mut buf = vec![0u8; entry_size as usize];
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) if read == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated entry at end of segment file",
                    ))
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let mut r = FrameReader::new(&buf);
        let location = r
            .get_location()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let lba = r
            .get_u64()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let data = r
            .get_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
            .unwrap_or_default();
        Ok(Some(ClusterEntry { location, lba, data }))
    }
}

impl Drop for FsStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove namespace directory {}: {e}", self.root.display());
            }
        }
    }
}

impl SegmentStore for FsStore {
    fn append(&self, segment_number: u32, entries: &[ClusterEntry]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(segment_number))?;
        for entry in entries {
            file.write_all(&encode_entry(entry))?;
        }
        self.last_segment.store(segment_number, Ordering::SeqCst);
        Ok(())
    }

    fn read_segment(
        &self,
        segment_number: u32,
        skip_offset: u16,
        max: u64,
        visit: &mut EntryVisitor,
    ) -> Result<u64, BackendError> {
        let path = self.segment_path(segment_number);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if skip_offset > 0 {
            file.seek(SeekFrom::Start(skip_offset as u64 * self.entry_size))?;
        }
        let mut visited = 0u64;
        while visited < max {
            match Self::read_entry(&mut file, self.entry_size)? {
                None => break,
                Some(entry) => {
                    visit(entry.location, entry.lba, &entry.data)?;
                    visited += 1;
                }
            }
        }
        Ok(visited)
    }

    fn remove_segment(&self, segment_number: u32) -> io::Result<()> {
        match fs::remove_file(self.segment_path(segment_number)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn clear(&self) -> io::Result<()> {
        debug!("fs backend {}: clearing all segments", self.root.display());
        for segment in self.existing_segments()? {
            self.remove_segment(segment)?;
        }
        self.last_segment.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let segment_number = self.last_segment.load(Ordering::SeqCst);
        if segment_number == 0 {
            return Ok(());
        }
        // `append` reopens the segment file on every call rather than
        // keeping a handle, so there is nothing to fsync in-process; reopen
        // the currently open segment here instead. fsync works on any open
        // fd for the inode regardless of the mode it was opened with.
        match File::open(self.segment_path(segment_number)) {
            Ok(file) => file.sync_all(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A file-backed log (spec.md §4.2 "File backend specifics").
pub type FsBackend = LogBackend<FsStore>;

impl FsBackend {
    pub fn create(root: impl AsRef<Path>, namespace_id: &str, cluster_size: u32) -> io::Result<Self> {
        let store = FsStore::new(root.as_ref().join(namespace_id), cluster_size)?;
        Ok(LogBackend::new(store, cluster_size))
    }
}
