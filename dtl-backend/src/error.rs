use std::io;

use thiserror::Error;

/// Errors returned by [`crate::Backend`] operations (spec.md §4.2, §7).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The caller has not registered, or is not the currently registered owner.
    #[error("namespace is not registered")]
    NotRegistered,

    #[error("owner tag {got} does not match the registered owner")]
    WrongOwner { got: u64 },

    #[error("cluster size {got} does not match the registered cluster size {expected}")]
    ClusterSizeMismatch { expected: u32, got: u32 },

    #[error("invalid entry sequence: {0}")]
    InvalidSequence(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Propagated from a caller-supplied iteration callback (e.g. a codec
    /// write failing mid-replay).
    #[error(transparent)]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}
