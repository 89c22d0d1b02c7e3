//! Strong type definitions for veilstore.
//!
//! Identifiers, type tags, trust levels and the tri-state verification
//! result are all newtypes or fieldless enums to prevent misuse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::crypto::Sha256Hash;
use crate::error::CoreError;

/// A 64-bit entity identifier assigned by the backing store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Create from a raw id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Little-endian encoding used in every hash and signature input.
    pub const fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Sentinel for "not yet persisted / unknown".
    pub const UNKNOWN: Self = Self(-1);
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A stable lowercase name for a concrete entity shape.
///
/// The tag participates in both hash addresses; its SHA-256 is computed
/// once per process and cached.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(&'static str);

static TAG_HASHES: OnceLock<Mutex<HashMap<&'static str, Sha256Hash>>> = OnceLock::new();

impl TypeTag {
    /// Define a tag. Callers must pass a stable lowercase name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The tag string as stored procedure infix.
    pub const fn name(&self) -> &'static str {
        self.0
    }

    /// SHA-256 of the tag name, cached process-wide.
    pub fn hash(&self) -> Sha256Hash {
        let cache = TAG_HASHES.get_or_init(|| Mutex::new(HashMap::new()));
        let mut cache = cache.lock().expect("tag hash cache poisoned");
        *cache
            .entry(self.0)
            .or_insert_with(|| Sha256Hash::hash(self.0.as_bytes()))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The five-level trust hierarchy.
///
/// Lower discriminant = more privileged, so the derived ordering makes
/// `level <= TrustLevel::Contributor` read as "at least contributor
/// privileges", matching the storage encoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum TrustLevel {
    /// The creating account; full rights.
    Creator = 0,
    /// Full rights including signing as the entity.
    Administrator = 1,
    /// Read and write, but cannot sign as the entity.
    Contributor = 2,
    /// Read only.
    Observator = 3,
    /// May enumerate by public hash; no secrets.
    Public = 4,
}

impl TrustLevel {
    /// The byte stored in link rows and signed into grants.
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Decode a stored trust level byte.
    pub fn from_byte(byte: u8) -> Result<Self, CoreError> {
        match byte {
            0 => Ok(Self::Creator),
            1 => Ok(Self::Administrator),
            2 => Ok(Self::Contributor),
            3 => Ok(Self::Observator),
            4 => Ok(Self::Public),
            other => Err(CoreError::InvalidTrustLevel(other)),
        }
    }

    /// True if this level is at least as privileged as `other`.
    pub fn is_at_least(&self, other: TrustLevel) -> bool {
        self <= &other
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Creator => "creator",
            Self::Administrator => "administrator",
            Self::Contributor => "contributor",
            Self::Observator => "observator",
            Self::Public => "public",
        };
        f.write_str(name)
    }
}

/// The tri-state result of validating a stored signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verification {
    /// No check has run yet, or its preconditions were never met.
    #[default]
    Unchecked,
    /// The stored signature validated against the cached data.
    Valid,
    /// The stored signature did not validate.
    Invalid,
}

impl Verification {
    /// Fold a verifier result into the tri-state.
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Valid
        } else {
            Self::Invalid
        }
    }

    /// True only for [`Verification::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// True once a check has actually run.
    pub fn is_checked(&self) -> bool {
        !matches!(self, Self::Unchecked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_hash_cached_and_stable() {
        let tag = TypeTag::new("account");
        let h1 = tag.hash();
        let h2 = TypeTag::new("account").hash();
        assert_eq!(h1, h2);
        assert_eq!(h1, Sha256Hash::hash(b"account"));
        assert_ne!(h1, TypeTag::new("planner").hash());
    }

    #[test]
    fn test_trust_level_ordering() {
        assert!(TrustLevel::Creator < TrustLevel::Administrator);
        assert!(TrustLevel::Administrator.is_at_least(TrustLevel::Contributor));
        assert!(TrustLevel::Contributor.is_at_least(TrustLevel::Contributor));
        assert!(!TrustLevel::Observator.is_at_least(TrustLevel::Contributor));
        assert!(!TrustLevel::Public.is_at_least(TrustLevel::Observator));
    }

    #[test]
    fn test_trust_level_byte_roundtrip() {
        for level in [
            TrustLevel::Creator,
            TrustLevel::Administrator,
            TrustLevel::Contributor,
            TrustLevel::Observator,
            TrustLevel::Public,
        ] {
            assert_eq!(TrustLevel::from_byte(level.as_byte()).unwrap(), level);
        }
        assert!(TrustLevel::from_byte(5).is_err());
    }

    #[test]
    fn test_verification_default_unchecked() {
        assert_eq!(Verification::default(), Verification::Unchecked);
        assert!(!Verification::Unchecked.is_checked());
        assert!(Verification::from_bool(true).is_valid());
        assert!(!Verification::from_bool(false).is_valid());
        assert!(Verification::from_bool(false).is_checked());
    }
}
