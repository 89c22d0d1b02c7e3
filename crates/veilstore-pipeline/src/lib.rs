//! # Veilstore Pipeline
//!
//! The batching request pipeline between entities and the relational store.
//!
//! Entities never talk to storage directly; they enqueue units of work and
//! a single pump task per pipeline batches up to [`BATCH_SIZE`] statements
//! into one backend round trip, demultiplexing results by correlation id.
//!
//! ## Key Types
//!
//! - [`Pipeline`] - shared handle: submit units, await resolution
//! - [`Backend`] - async trait over the store; one call per batch
//! - [`MemoryBackend`] - in-memory backend for tests and embedding
//! - [`Statement`] / [`RowSet`] - the wire-level request and reply shapes

pub mod backend;
pub mod error;
pub mod memory;
pub mod pump;
pub mod statement;

pub use backend::{Backend, BatchEntry};
pub use error::{PipelineError, Result};
pub use memory::MemoryBackend;
pub use pump::{DecodeFn, EncodeFn, Pipeline, BATCH_SIZE};
pub use statement::{Row, RowSet, Statement, Value};
