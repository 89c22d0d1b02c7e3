//! # Veilstore Entity
//!
//! The entity layer: lazily resolved, cryptographically access-controlled
//! objects over a [`veilstore_pipeline::Pipeline`].
//!
//! Every entity composes an [`EntityCore`] carrying its (tag, id) identity,
//! symmetric key and base fields. Field access is two-phase throughout:
//! `cached_*` never touches the store, the plain async accessor fetches on
//! a miss and caches. Verification is lazy and tri-state.
//!
//! ## Entity Shapes
//!
//! - [`AccessEntity`] - keyed, nameable, relation-bearing; one constructor
//!   per trust level
//! - [`DataEntity`] - an encrypted payload row under a parent key
//! - [`LinkEntity`] - a directed, trust-scoped access grant
//! - [`ScheduleEntity`] / [`TimeEntity`] / [`RangeEntity`] - obfuscated
//!   timeline positions

pub mod access;
pub mod data;
pub mod error;
pub mod identity;
pub mod link;
pub mod schedule;

pub use access::AccessEntity;
pub use data::DataEntity;
pub use error::{EntityError, Result};
pub use identity::{now_millis, EntityCore};
pub use link::{LinkEntity, LinkedChild};
pub use schedule::{RangeEntity, ScheduleEntity, TimeEntity};
