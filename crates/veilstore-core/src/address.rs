//! One-way hash addresses for entities.
//!
//! Every entity is reachable through two addresses: a public one anybody
//! can derive from `(type tag, id)`, and an authenticated one that also
//! requires the entity's symmetric IV. Both are SHA-256 over little-endian
//! concatenations.

use crate::crypto::Sha256Hash;
use crate::types::{EntityId, TypeTag};

/// The secret-free address: `SHA256(tag_hash || id_le)`.
///
/// A pure function of `(tag, id)`, stable across processes. Used for
/// discovery before any key material has been shared.
pub fn public_hash(tag: TypeTag, id: EntityId) -> Sha256Hash {
    let tag_hash = tag.hash();
    let mut input = Vec::with_capacity(32 + 8);
    input.extend_from_slice(tag_hash.as_bytes());
    input.extend_from_slice(&id.to_le_bytes());
    Sha256Hash::hash(&input)
}

/// The authenticated address: `SHA256(iv || tag_hash || id_le)`.
///
/// Computable only with the entity's symmetric IV, so matching it proves
/// prior receipt of key material. Stable for the entity's lifetime.
pub fn entity_hash(iv: &[u8; 16], tag: TypeTag, id: EntityId) -> Sha256Hash {
    let tag_hash = tag.hash();
    let mut input = Vec::with_capacity(16 + 32 + 8);
    input.extend_from_slice(iv);
    input.extend_from_slice(tag_hash.as_bytes());
    input.extend_from_slice(&id.to_le_bytes());
    Sha256Hash::hash(&input)
}

/// Escrow address for a name deposited to a third party:
/// `SHA256(destination_hash || subject_public_hash)`.
pub fn escrow_hash(destination: &Sha256Hash, subject_public: &Sha256Hash) -> Sha256Hash {
    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(destination.as_bytes());
    input.extend_from_slice(subject_public.as_bytes());
    Sha256Hash::hash(&input)
}

/// Deterministic lookup name for a data row:
/// `SHA256(parent_hash || tag_hash || name_utf8)`.
pub fn lookup_name(parent_hash: &Sha256Hash, tag: TypeTag, name: &str) -> Sha256Hash {
    let tag_hash = tag.hash();
    let mut input = Vec::with_capacity(64 + name.len());
    input.extend_from_slice(parent_hash.as_bytes());
    input.extend_from_slice(tag_hash.as_bytes());
    input.extend_from_slice(name.as_bytes());
    Sha256Hash::hash(&input)
}
