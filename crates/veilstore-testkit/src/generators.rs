//! Proptest generators for property-based testing.

use proptest::prelude::*;

use veilstore_core::{EntityId, Sha256Hash, SymmetricKey, TrustLevel};

/// Generate a persisted-looking entity id (store ids start at 1).
pub fn entity_id() -> impl Strategy<Value = EntityId> {
    (1i64..=i64::MAX).prop_map(EntityId::new)
}

/// Generate any of the five trust levels.
pub fn trust_level() -> impl Strategy<Value = TrustLevel> {
    prop_oneof![
        Just(TrustLevel::Creator),
        Just(TrustLevel::Administrator),
        Just(TrustLevel::Contributor),
        Just(TrustLevel::Observator),
        Just(TrustLevel::Public),
    ]
}

/// Generate a level a link may grant.
pub fn grantable_level() -> impl Strategy<Value = TrustLevel> {
    prop_oneof![
        Just(TrustLevel::Administrator),
        Just(TrustLevel::Contributor),
        Just(TrustLevel::Observator),
    ]
}

/// Generate a symmetric key with arbitrary key and IV bytes.
pub fn symmetric_key() -> impl Strategy<Value = SymmetricKey> {
    (any::<[u8; 32]>(), any::<[u8; 16]>())
        .prop_map(|(key, iv)| SymmetricKey::from_parts(key, iv))
}

/// Generate a random hash value.
pub fn sha256_hash() -> impl Strategy<Value = Sha256Hash> {
    any::<[u8; 32]>().prop_map(Sha256Hash)
}

/// Generate payload bytes of at most `max_len`.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate an entity name.
pub fn entity_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9 -]{0,31}".prop_map(String::from)
}

/// Generate a reasonable millisecond timestamp.
pub fn ticks() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 4
}
