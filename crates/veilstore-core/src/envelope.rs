//! RSA key envelopes.
//!
//! An envelope carries one entity's symmetric key to one recipient:
//! `RSA-PKCS#1(key || iv)` under the recipient's public key. Every stored
//! entity row keeps at least one envelope so that key distribution never
//! leaves the store's data model.

use crate::crypto::{Keypair, PublicKey, SymmetricKey};
use crate::error::{CoreError, Result};

/// A sealed `key || iv` envelope, opaque to everyone but the recipient.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEnvelope(Vec<u8>);

impl KeyEnvelope {
    /// Seal a symmetric key for `recipient`.
    pub fn seal(recipient: &PublicKey, key: &SymmetricKey) -> Result<Self> {
        Ok(Self(recipient.encrypt(&key.to_bytes())?))
    }

    /// Wrap raw ciphertext read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The ciphertext for storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the ciphertext.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Open with the recipient's private key.
    ///
    /// Fails with [`CoreError::MalformedEnvelope`] when the plaintext is not
    /// exactly `key(32) || iv(16)`.
    pub fn open(&self, recipient: &Keypair) -> Result<SymmetricKey> {
        let plaintext = recipient.decrypt(&self.0)?;
        if plaintext.len() != SymmetricKey::LEN {
            return Err(CoreError::MalformedEnvelope(plaintext.len()));
        }
        SymmetricKey::from_bytes(&plaintext)
    }
}

impl std::fmt::Debug for KeyEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyEnvelope({} bytes)", self.0.len())
    }
}
