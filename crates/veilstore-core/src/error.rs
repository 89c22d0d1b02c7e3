//! Error types for the core primitives.

use thiserror::Error;

/// Errors that can occur in core cryptographic operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key generation or import failed.
    #[error("key error: {0}")]
    KeyError(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),

    /// A symmetric key envelope decrypted to an unexpected length.
    ///
    /// Distinct from "absent": the row was present but its bytes cannot
    /// be a `key || iv` envelope.
    #[error("malformed key envelope: expected 48 plaintext bytes, got {0}")]
    MalformedEnvelope(usize),

    /// A secret bundle was too short for its fixed-offset layout.
    #[error("malformed secret bundle: {0} bytes")]
    MalformedBundle(usize),

    /// An unknown trust level byte was read from storage.
    #[error("invalid trust level byte: {0}")]
    InvalidTrustLevel(u8),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
