//! # Veilstore Core
//!
//! Pure primitives for veilstore: hash addresses, symmetric and RSA key
//! material, trust levels, key envelopes and trust-scoped secret bundles.
//!
//! This crate contains no I/O and no async. It is pure computation over
//! cryptographic data structures; everything observable about an entity on
//! the wire is derived here.
//!
//! ## Key Types
//!
//! - [`Sha256Hash`] - 32-byte hash used for every address
//! - [`SymmetricKey`] - AES-256 key plus the CBC IV that salts the hash
//! - [`Keypair`] / [`PublicKey`] - RSA-PKCS#1 decryption and signing keys
//! - [`TrustLevel`] - the five-level hierarchy, creator through public
//! - [`KeyEnvelope`] - one symmetric key sealed for one recipient
//! - [`SecretBundle`] - a child's secret set scoped to a trust level

pub mod address;
pub mod bundle;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod types;

pub use address::{entity_hash, escrow_hash, lookup_name, public_hash};
pub use bundle::{ChildSecrets, SecretBundle, KEY_FILLER_LEN};
pub use crypto::{CryptoParams, Keypair, PublicKey, Sha256Hash, SymmetricKey};
pub use envelope::KeyEnvelope;
pub use error::{CoreError, Result};
pub use types::{EntityId, TrustLevel, TypeTag, Verification};
