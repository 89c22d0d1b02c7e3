//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: an in-memory pipeline over the
//! standard tag set, small RSA keys for speed, and bootstrap helpers for
//! the usual entity shapes.

use std::sync::Arc;

use veilstore_core::{CryptoParams, TypeTag};
use veilstore_entity::{AccessEntity, DataEntity, ScheduleEntity};
use veilstore_pipeline::{MemoryBackend, Pipeline};

/// Tags every fixture backend understands.
pub const STANDARD_TAGS: &[&str] = &[
    "account",
    "planner",
    "appointment",
    "note",
    "planneraccountlink",
];

pub const ACCOUNT: TypeTag = TypeTag::new("account");
pub const PLANNER: TypeTag = TypeTag::new("planner");
pub const APPOINTMENT: TypeTag = TypeTag::new("appointment");
pub const NOTE: TypeTag = TypeTag::new("note");
pub const PLANNER_LINK: TypeTag = TypeTag::new("planneraccountlink");

/// A test fixture with an in-memory pipeline and fast crypto parameters.
///
/// 1024-bit RSA keeps key generation cheap; production uses the
/// [`CryptoParams`] default.
pub struct TestFixture {
    pub pipeline: Pipeline,
    pub params: CryptoParams,
}

impl TestFixture {
    /// Create a fixture over the standard tag set.
    pub fn new() -> Self {
        Self::with_tags(STANDARD_TAGS)
    }

    /// Create a fixture over a custom tag set.
    pub fn with_tags(tags: &[&'static str]) -> Self {
        Self {
            pipeline: Pipeline::new(Arc::new(MemoryBackend::with_tags(tags))),
            params: CryptoParams::new(1024),
        }
    }

    /// Bootstrap a self-rooted account.
    pub async fn account(&self, name: &str) -> Arc<AccessEntity> {
        AccessEntity::create(&self.pipeline, ACCOUNT, name, None, &self.params)
            .await
            .expect("account creation")
    }

    /// Create a planner schedule owned by `account`.
    pub async fn planner(&self, name: &str, account: &Arc<AccessEntity>) -> Arc<ScheduleEntity> {
        ScheduleEntity::create(&self.pipeline, PLANNER, name, Some(account), &self.params)
            .await
            .expect("planner creation")
    }

    /// Create a note row under `parent`, modified by `account`.
    pub async fn note(
        &self,
        parent: &Arc<AccessEntity>,
        name: &str,
        payload: &[u8],
        account: &Arc<AccessEntity>,
    ) -> Arc<DataEntity> {
        let access = parent.cached_access().expect("parent access key");
        let hash = parent.core().hash().expect("parent hash");
        DataEntity::create(&self.pipeline, NOTE, &access, hash, name, payload, account)
            .await
            .expect("note creation")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
