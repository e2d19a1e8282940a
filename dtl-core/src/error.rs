use thiserror::Error;

/// Errors that can arise while constructing or validating core data-model
/// values, independent of transport or storage.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cluster size {cluster_size} is not a positive multiple of lba size {lba_size}")]
    InvalidClusterSize { cluster_size: u32, lba_size: u32 },

    #[error("namespace id must not be empty")]
    EmptyNamespaceId,
}
