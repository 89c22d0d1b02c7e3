//! # Veilstore Testkit
//!
//! Testing utilities for veilstore.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory pipeline over the standard tag set with
//!   fast crypto parameters and bootstrap helpers
//! - **Generators**: proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust,ignore
//! use veilstore_testkit::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let account = fixture.account("root").await;
//! let planner = fixture.planner("week", &account).await;
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use veilstore_testkit::generators;
//!
//! proptest! {
//!     #[test]
//!     fn hash_is_hex_stable(hash in generators::sha256_hash()) {
//!         prop_assert_eq!(hash.to_hex().len(), 64);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{TestFixture, ACCOUNT, APPOINTMENT, NOTE, PLANNER, PLANNER_LINK, STANDARD_TAGS};
