//! Cryptographic primitives for veilstore.
//!
//! Wraps SHA-256 hashing, AES-256-CBC symmetric encryption and RSA-PKCS#1
//! keypairs with strong types. All signatures are RSA-PKCS#1 v1.5 over
//! SHA-256 digests; all key material crosses crate boundaries as PKCS#1 DER.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey,
};
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// Compute the SHA-256 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(digest.into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The zero hash (sentinel value).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Sha256Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Tunable crypto parameters, injected rather than read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct CryptoParams {
    /// RSA modulus size in bits for freshly minted keypairs.
    pub rsa_bits: usize,
}

impl CryptoParams {
    /// Production default: RSA-2048.
    pub const fn new(rsa_bits: usize) -> Self {
        Self { rsa_bits }
    }
}

impl Default for CryptoParams {
    fn default() -> Self {
        Self { rsa_bits: 2048 }
    }
}

/// A symmetric AES-256 key together with its CBC initialization vector.
///
/// The IV doubles as the per-entity secret that salts the authenticated
/// hash address, so it is carried with the key everywhere.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    key: [u8; 32],
    iv: [u8; 16],
}

impl SymmetricKey {
    /// Serialized length: `key(32) || iv(16)`.
    pub const LEN: usize = 48;

    /// Generate a new random key and IV.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Create from key and IV parts.
    pub const fn from_parts(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Parse from a 48-byte `key || iv` layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(CoreError::MalformedEnvelope(bytes.len()));
        }
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&bytes[..32]);
        iv.copy_from_slice(&bytes[32..]);
        Ok(Self { key, iv })
    }

    /// Serialize as `key || iv`.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..32].copy_from_slice(&self.key);
        out[32..].copy_from_slice(&self.iv);
        out
    }

    /// The key bytes.
    pub const fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// The IV bytes.
    pub const fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Derive a child key: same key material, fresh random IV.
    ///
    /// A child entity is exactly as accessible as its parent, but gets its
    /// own IV so its authenticated hash address differs.
    pub fn derive_child(&self) -> Self {
        let mut rng = rand::thread_rng();
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut iv);
        Self { key: self.key, iv }
    }

    /// Encrypt with AES-256-CBC and PKCS#7 padding under this key's IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let enc = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|e| CoreError::EncryptionError(e.to_string()))?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt AES-256-CBC ciphertext produced by [`SymmetricKey::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let dec = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|e| CoreError::DecryptionError(e.to_string()))?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CoreError::DecryptionError(e.to_string()))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material never reaches logs.
        write!(f, "SymmetricKey(..)")
    }
}

/// An RSA private key used either for decryption or for signing.
///
/// One keypair serves exactly one role; an access entity carries two.
#[derive(Clone)]
pub struct Keypair {
    inner: rsa::RsaPrivateKey,
}

impl Keypair {
    /// Generate a new keypair with the given parameters.
    pub fn generate(params: &CryptoParams) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let inner = rsa::RsaPrivateKey::new(&mut rng, params.rsa_bits)
            .map_err(|e| CoreError::KeyError(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Import from PKCS#1 DER bytes.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let inner = rsa::RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| CoreError::KeyError(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Export as PKCS#1 DER bytes.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .inner
            .to_pkcs1_der()
            .map_err(|e| CoreError::KeyError(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
        }
    }

    /// RSA modulus length in bytes; also the length of every ciphertext
    /// and signature this key produces.
    pub fn modulus_len(&self) -> usize {
        use rsa::traits::PublicKeyParts;
        self.inner.size()
    }

    /// Decrypt an RSA-PKCS#1 v1.5 ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CoreError::DecryptionError(e.to_string()))
    }

    /// Sign a message: RSA-PKCS#1 v1.5 over the SHA-256 digest.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        self.inner
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CoreError::SigningError(e.to_string()))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(..)")
    }
}

/// An RSA public key used for envelope encryption or signature verification.
#[derive(Clone, PartialEq)]
pub struct PublicKey {
    inner: rsa::RsaPublicKey,
}

impl PublicKey {
    /// Import from PKCS#1 DER bytes.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let inner = rsa::RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| CoreError::KeyError(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Export as PKCS#1 DER bytes.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .inner
            .to_pkcs1_der()
            .map_err(|e| CoreError::KeyError(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Encrypt with RSA-PKCS#1 v1.5.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        self.inner
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CoreError::EncryptionError(e.to_string()))
    }

    /// Verify an RSA-PKCS#1 v1.5 signature over the SHA-256 digest of `message`.
    ///
    /// Returns plain `bool`: a failed verification is a result, not an error.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let digest = Sha256::digest(message);
        self.inner
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(..)")
    }
}
