//! Trust-scoped secret bundles.
//!
//! A link row carries the child's full secret set encrypted under the link's
//! own symmetric key. The plaintext layout is fixed offset:
//!
//! ```text
//! access_key(32) || access_iv(16) || der_len(4, i32 LE)
//!     || decryption_der(der_len) || signing_der(rest)
//! ```
//!
//! Scopes below the key's clearance are padded with random filler the same
//! size as a production RSA-2048 PKCS#1 DER, so bundle length does not leak
//! the granted trust level.

use rand::RngCore;

use crate::crypto::{Keypair, SymmetricKey};
use crate::error::{CoreError, Result};
use crate::types::TrustLevel;

/// Length of an RSA-2048 PKCS#1 private key DER; filler matches it.
pub const KEY_FILLER_LEN: usize = 1194;

const DER_LEN_OFFSET: usize = 48;
const DER_OFFSET: usize = 52;

/// What a grantee actually learns when it decodes a bundle at its scope.
///
/// One variant per constructible trust level; which variant applies is the
/// link's stored type byte, not anything inside the bundle itself.
#[derive(Debug, Clone)]
pub enum ChildSecrets {
    /// Both private keys; the grantee can decrypt and sign as the child.
    Administrator {
        decryption_der: Vec<u8>,
        signing_der: Vec<u8>,
    },
    /// The decryption key only; signing stays withheld.
    Contributor { decryption_der: Vec<u8> },
    /// The symmetric access key only; no private key material at all.
    Observator { access: SymmetricKey },
}

/// Builds and decodes the fixed-offset secret bundle.
pub struct SecretBundle;

impl SecretBundle {
    /// Assemble and encrypt a bundle scoped to `level`.
    ///
    /// `access` is the child's symmetric key, `decryption` and `signing`
    /// its private keypairs, `carrier` the link key the bundle is sealed
    /// under. A keypair may be `None` only when `level` replaces its slot
    /// with filler anyway.
    pub fn seal(
        level: TrustLevel,
        access: &SymmetricKey,
        decryption: Option<&Keypair>,
        signing: Option<&Keypair>,
        carrier: &SymmetricKey,
    ) -> Result<Vec<u8>> {
        let decryption_part = if level.is_at_least(TrustLevel::Contributor) {
            decryption
                .ok_or_else(|| CoreError::KeyError("decryption key required at this scope".into()))?
                .to_pkcs1_der()?
        } else {
            random_filler()
        };
        let signing_part = if level.is_at_least(TrustLevel::Administrator) {
            signing
                .ok_or_else(|| CoreError::KeyError("signing key required at this scope".into()))?
                .to_pkcs1_der()?
        } else {
            random_filler()
        };

        let mut plaintext =
            Vec::with_capacity(DER_OFFSET + decryption_part.len() + signing_part.len());
        plaintext.extend_from_slice(&access.to_bytes());
        plaintext.extend_from_slice(&(decryption_part.len() as i32).to_le_bytes());
        plaintext.extend_from_slice(&decryption_part);
        plaintext.extend_from_slice(&signing_part);

        carrier.encrypt(&plaintext)
    }

    /// Decrypt a bundle and extract the secrets `level` is entitled to.
    ///
    /// Levels without a bundle representation (creators are never granted
    /// through links, public grantees get no bundle) are rejected.
    pub fn open(
        level: TrustLevel,
        carrier: &SymmetricKey,
        ciphertext: &[u8],
    ) -> Result<ChildSecrets> {
        let plaintext = carrier.decrypt(ciphertext)?;
        if plaintext.len() < DER_OFFSET {
            return Err(CoreError::MalformedBundle(plaintext.len()));
        }

        match level {
            TrustLevel::Observator => {
                let access = SymmetricKey::from_bytes(&plaintext[..SymmetricKey::LEN])?;
                Ok(ChildSecrets::Observator { access })
            }
            TrustLevel::Contributor | TrustLevel::Administrator => {
                let der_len = i32::from_le_bytes(
                    plaintext[DER_LEN_OFFSET..DER_OFFSET]
                        .try_into()
                        .expect("slice is 4 bytes"),
                );
                let der_end = DER_OFFSET
                    .checked_add(usize::try_from(der_len).map_err(|_| {
                        CoreError::MalformedBundle(plaintext.len())
                    })?)
                    .filter(|end| *end <= plaintext.len())
                    .ok_or(CoreError::MalformedBundle(plaintext.len()))?;
                let decryption_der = plaintext[DER_OFFSET..der_end].to_vec();
                if level == TrustLevel::Contributor {
                    Ok(ChildSecrets::Contributor { decryption_der })
                } else {
                    Ok(ChildSecrets::Administrator {
                        decryption_der,
                        signing_der: plaintext[der_end..].to_vec(),
                    })
                }
            }
            other => Err(CoreError::InvalidTrustLevel(other.as_byte())),
        }
    }
}

fn random_filler() -> Vec<u8> {
    let mut filler = vec![0u8; KEY_FILLER_LEN];
    rand::thread_rng().fill_bytes(&mut filler);
    filler
}
