//! Error types for the request pipeline.

use thiserror::Error;

/// Errors surfaced by the pipeline and its backends.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The backend could not be reached. The pump retries these; callers
    /// only see them from direct `Backend::execute` use.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend does not know the named procedure.
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),

    /// A procedure was called with missing or mistyped parameters.
    #[error("bad arguments for {procedure}: {reason}")]
    BadArguments {
        procedure: String,
        reason: String,
    },

    /// The pipeline was dropped before the unit resolved.
    #[error("pipeline shut down before the unit resolved")]
    Dropped,
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
