//! Backend trait: the abstract interface to the relational store.
//!
//! The pipeline talks to storage exclusively through this trait. The
//! production implementation would wrap a PostgreSQL connection; the
//! in-memory implementation in [`crate::memory`] serves tests and
//! embedded use.

use async_trait::async_trait;

use crate::error::Result;
use crate::statement::{RowSet, Statement};

/// A batch entry: correlation id plus the statement to run.
pub type BatchEntry = (u32, Statement);

/// Async interface for executing statement batches.
///
/// Implementations must be thread-safe (Send + Sync).
///
/// # Design Notes
///
/// - **One round trip per batch**: the whole slice travels together; this
///   is the property the pump's batching exists to exploit.
/// - **Correlation ids**: each returned row set names the entry it answers.
///   Entries may be answered out of order or, for procedures that return
///   nothing, not at all.
/// - **Atomicity is not promised** across a batch; each statement stands
///   alone.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a batch and return the row sets, keyed by correlation id.
    ///
    /// A transport-level failure (connection loss, timeout) is an `Err`;
    /// the pump treats it as retryable. Per-statement problems surface as
    /// empty row sets, matching stored procedures that return nothing.
    async fn execute(&self, batch: &[BatchEntry]) -> Result<Vec<(u32, RowSet)>>;
}
