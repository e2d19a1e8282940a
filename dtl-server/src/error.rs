use std::io;

use thiserror::Error;

/// Startup and lifecycle failures of the server (spec.md §6: "non-zero on
/// startup failure -- bad path, failed lock, failed bind").
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error(transparent)]
    BackendRoot(#[from] io::Error),
}
