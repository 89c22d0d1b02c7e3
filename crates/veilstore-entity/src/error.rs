//! Error types for the entity framework.

use thiserror::Error;
use veilstore_core::{CoreError, TrustLevel};
use veilstore_pipeline::PipelineError;

/// Errors surfaced by entity operations.
///
/// Deliberately narrow: a field the store has not populated yet is `None`,
/// not an error, and a failed signature check is the `Invalid` verification
/// state, not an error. Only broken invariants end up here.
#[derive(Debug, Error)]
pub enum EntityError {
    /// A cryptographic primitive failed or stored bytes would not decode.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The pipeline gave up on a unit.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The operation needs a higher trust level than the holder has.
    #[error("requires {required} trust, held at {held}")]
    InsufficientTrust {
        required: TrustLevel,
        held: TrustLevel,
    },

    /// Key material the operation depends on has not been obtained.
    #[error("missing key material: {0}")]
    MissingKey(&'static str),

    /// The create procedure returned no id.
    #[error("create returned no id")]
    NotPersisted,

    /// A stored field decrypted to bytes of the wrong shape.
    #[error("malformed field `{field}`: {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },
}

/// Result type for entity operations.
pub type Result<T> = std::result::Result<T, EntityError>;
