use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs4::FileExt;
use log::{debug, info, warn};

use crate::backend::Backend;
use crate::error::BackendError;
use crate::fs::FsBackend;
use crate::mem::MemBackend;

const LOCK_FILE_NAME: &str = ".dtl-lock";

/// Which storage kind new namespaces are created in.
///
/// Grounded on `commitlog::repo::Repo`'s two real implementations (`Fs`,
/// `Memory`); a registry picks one for its whole lifetime rather than mixing
/// them, matching how the teacher's `Commitlog::open` is parameterized by a
/// single `R: Repo`.
enum Root {
    File { dir: PathBuf, _lock: File },
    Memory,
}

/// Process-wide map from namespace id to its backend (spec.md §4.3).
///
/// In file mode, the constructor takes an exclusive advisory lock on the root
/// directory for the process's lifetime, refusing to start if another process
/// already holds it -- the teacher's own `Fs` assumes single-process
/// ownership and does not need this; it is a spec-required addition grounded
/// the same way the teacher grounds file-repo bootstrapping in `Fs::new`.
pub struct BackendRegistry {
    root: Root,
    backends: Mutex<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    /// A registry that keeps every namespace's log in memory only.
    pub fn memory() -> Self {
        Self {
            root: Root::Memory,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// A registry that persists each namespace's log under `dir/<namespace_id>/`.
    ///
    /// `dir` must either not exist yet (it is created) or be empty of
    /// anything but a previous `BackendRegistry`'s lock file and namespace
    /// subdirectories -- a non-empty unrelated directory is rejected.
    pub fn file(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Self::check_root_is_empty_or_ours(&dir)?;

        let lock_path = dir.join(LOCK_FILE_NAME);
        let lock = OpenOptions::new().create(true).write(true).open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{} is already locked by another dtl-serverd process", dir.display()),
            )
        })?;

        info!("backend registry: locked root directory {}", dir.display());
        Ok(Self {
            root: Root::File { dir, _lock: lock },
            backends: Mutex::new(HashMap::new()),
        })
    }

    /// Startup invariant (spec.md §4.3): refuse to start unless `dir` is empty
    /// or contains only the lock file and namespace subdirectories left by a
    /// prior run. Anything else -- a stray file, a symlink, whatever else is
    /// sitting there -- aborts startup rather than risking a registry running
    /// on top of unrelated data.
    fn check_root_is_empty_or_ours(dir: &Path) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name == LOCK_FILE_NAME {
                continue;
            }
            if entry.file_type()?.is_dir() {
                continue;
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} contains unexpected entry {:?}; refusing to start on a non-empty unrelated directory",
                    dir.display(),
                    name
                ),
            ));
        }
        Ok(())
    }

    /// Look up `namespace_id`'s backend, creating it with `cluster_size` if
    /// this is the first time it has been seen. Returns
    /// [`BackendError::ClusterSizeMismatch`] if an existing backend was
    /// created with a different `cluster_size`.
    pub fn get_or_create(&self, namespace_id: &str, cluster_size: u32) -> Result<Arc<dyn Backend>, BackendError> {
        let mut backends = self.backends.lock().unwrap();
        if let Some(existing) = backends.get(namespace_id) {
            if existing.cluster_size() != cluster_size {
                return Err(BackendError::ClusterSizeMismatch {
                    expected: existing.cluster_size(),
                    got: cluster_size,
                });
            }
            return Ok(Arc::clone(existing));
        }

        let backend: Arc<dyn Backend> = match &self.root {
            Root::Memory => Arc::new(MemBackend::create(cluster_size)),
            Root::File { dir, .. } => Arc::new(FsBackend::create(dir, namespace_id, cluster_size)?),
        };
        debug!("backend registry: created backend for namespace {namespace_id} (cluster_size={cluster_size})");
        backends.insert(namespace_id.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    /// Drop `namespace_id`'s backend from the registry. For the file variant
    /// this is what triggers trimming the namespace's on-disk directory
    /// (`FsStore`'s `Drop` impl), once every other `Arc` clone is gone.
    pub fn destroy(&self, namespace_id: &str) {
        if self.backends.lock().unwrap().remove(namespace_id).is_none() {
            warn!("backend registry: destroy requested for unknown namespace {namespace_id}");
        }
    }

    pub fn root_path(&self) -> Option<&Path> {
        match &self.root {
            Root::File { dir, .. } => Some(dir),
            Root::Memory => None,
        }
    }

    /// Drop every still-registered backend and, for the file variant, sweep
    /// the root directory for any namespace subdirectory that outlives it --
    /// one left behind by a session that disconnected without `Unregister`
    /// and was never explicitly destroyed. Spec.md §4.3: "on shutdown, the
    /// root directory is emptied," not just the namespaces a live session
    /// happened to clean up on its way out.
    pub fn shutdown(&self) {
        self.backends.lock().unwrap().clear();
        if let Root::File { dir, .. } = &self.root {
            if let Err(e) = Self::sweep_namespace_directories(dir) {
                warn!("backend registry: failed to sweep root directory {}: {e}", dir.display());
            }
        }
    }

    fn sweep_namespace_directories(dir: &Path) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name == LOCK_FILE_NAME {
                continue;
            }
            if entry.file_type()?.is_dir() {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(
                        "backend registry: failed to remove leftover namespace directory {}: {e}",
                        entry.path().display()
                    );
                }
            }
        }
        Ok(())
    }
}
