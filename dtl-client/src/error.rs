use thiserror::Error;

use dtl_wire::WireError;

/// Errors surfaced by a [`crate::Proxy`] or a [`crate::Bridge`] (spec.md §4.6-§4.9).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] WireError),

    #[error("server refused {opcode}: {reason}")]
    Refused { opcode: &'static str, reason: &'static str },

    #[error("no failover proxy configured for this bridge")]
    NotConfigured,

    #[error("batch not admitted, backend is applying backpressure")]
    NotAdmitted,

    #[error("batch is not well-formed: entries must share one segment with contiguous offsets")]
    MalformedBatch,
}
