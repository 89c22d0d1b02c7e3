//! Identity base shared by every entity shape.
//!
//! `EntityCore` owns the (tag, id) identity, the pipeline handle, the
//! symmetric access key once it is known, and the lazily populated base
//! fields every row carries: creation time, creator and the creator
//! binding signature. The two-phase access pattern runs through everything
//! here: `cached_*` never touches the store, the plain accessor fetches on
//! a miss and caches.

use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use veilstore_core::{
    entity_hash, public_hash, EntityId, PublicKey, Sha256Hash, SymmetricKey, TypeTag,
    Verification,
};
use veilstore_pipeline::{Pipeline, Statement, Value};

use crate::error::{EntityError, Result};

/// Milliseconds since the Unix epoch; the timestamp unit for every stored
/// time field.
pub fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(_) => 0,
    }
}

/// The identity and base-field state of one stored entity.
pub struct EntityCore {
    pipeline: Pipeline,
    tag: TypeTag,
    id: EntityId,
    public_hash: OnceLock<Sha256Hash>,
    access: Mutex<Option<SymmetricKey>>,
    hash: Mutex<Option<Sha256Hash>>,
    creation_time: Mutex<Option<i64>>,
    creator: Mutex<Option<EntityId>>,
    creator_verification: Mutex<Verification>,
}

impl EntityCore {
    /// Bind an identity. `access` is `None` until key material arrives.
    pub fn new(pipeline: Pipeline, tag: TypeTag, id: EntityId, access: Option<SymmetricKey>) -> Self {
        Self {
            pipeline,
            tag,
            id,
            public_hash: OnceLock::new(),
            access: Mutex::new(access),
            hash: Mutex::new(None),
            creation_time: Mutex::new(None),
            creator: Mutex::new(None),
            creator_verification: Mutex::new(Verification::Unchecked),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The secret-free address. Pure in (tag, id), memoized.
    pub fn public_hash(&self) -> Sha256Hash {
        *self
            .public_hash
            .get_or_init(|| public_hash(self.tag, self.id))
    }

    /// The symmetric key, if key material has been obtained.
    pub fn cached_access(&self) -> Option<SymmetricKey> {
        self.access.lock().unwrap().clone()
    }

    /// Install the symmetric key once an envelope or bundle yielded it.
    pub fn set_access(&self, access: SymmetricKey) {
        *self.access.lock().unwrap() = Some(access);
    }

    /// The authenticated address, computable only with the symmetric key.
    /// Stable once computed.
    pub fn hash(&self) -> Option<Sha256Hash> {
        let mut cached = self.hash.lock().unwrap();
        if cached.is_none() {
            if let Some(access) = self.access.lock().unwrap().as_ref() {
                *cached = Some(entity_hash(access.iv(), self.tag, self.id));
            }
        }
        *cached
    }

    /// The authenticated address when known, the public one otherwise.
    /// Rows written before key exchange are addressed publicly.
    pub fn hash_or_public(&self) -> Sha256Hash {
        self.hash().unwrap_or_else(|| self.public_hash())
    }

    /// Build a `{verb}{tag}{column}(id)` statement.
    pub fn by_id_statement(&self, verb: &str, column: &str) -> Statement {
        Statement::new(
            format!("{verb}{}{column}", self.tag.name()),
            vec![("id", Value::BigInt(self.id.get()))],
        )
    }

    /// Fetch one by-id column. `None` both for a missing row and a NULL
    /// cell: either way the field is simply not populated yet.
    pub async fn fetch_column(&self, verb: &str, column: &str) -> Result<Option<Vec<u8>>> {
        let rows = self
            .pipeline
            .fetch(self.by_id_statement(verb, column))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.bytes(0))
            .map(|bytes| bytes.to_vec()))
    }

    /// Decrypt a stored cell with the access key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let access = self.access.lock().unwrap();
        let access = access.as_ref().ok_or(EntityError::MissingKey("access"))?;
        Ok(access.decrypt(ciphertext)?)
    }

    /// Encrypt a cell for storage with the access key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let access = self.access.lock().unwrap();
        let access = access.as_ref().ok_or(EntityError::MissingKey("access"))?;
        Ok(access.encrypt(plaintext)?)
    }

    pub(crate) fn decode_i64(field: &'static str, plaintext: &[u8]) -> Result<i64> {
        let bytes: [u8; 8] =
            plaintext
                .try_into()
                .map_err(|_| EntityError::MalformedField {
                    field,
                    reason: format!("expected 8 bytes, got {}", plaintext.len()),
                })?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn cached_creation_time(&self) -> Option<i64> {
        *self.creation_time.lock().unwrap()
    }

    /// Creation time, fetched and decrypted on the first call.
    pub async fn creation_time(&self) -> Result<Option<i64>> {
        if let Some(time) = self.cached_creation_time() {
            return Ok(Some(time));
        }
        let Some(ciphertext) = self.fetch_column("get", "creationtime").await? else {
            return Ok(None);
        };
        let time = Self::decode_i64("creationtime", &self.decrypt(&ciphertext)?)?;
        *self.creation_time.lock().unwrap() = Some(time);
        Ok(Some(time))
    }

    pub(crate) fn set_creation_time(&self, time: i64) {
        *self.creation_time.lock().unwrap() = Some(time);
    }

    pub fn cached_creator(&self) -> Option<EntityId> {
        *self.creator.lock().unwrap()
    }

    /// Creator id, fetched and decrypted on the first call.
    pub async fn creator(&self) -> Result<Option<EntityId>> {
        if let Some(creator) = self.cached_creator() {
            return Ok(Some(creator));
        }
        let Some(ciphertext) = self.fetch_column("get", "creator").await? else {
            return Ok(None);
        };
        let id = Self::decode_i64("creator", &self.decrypt(&ciphertext)?)?;
        let creator = EntityId::new(id);
        *self.creator.lock().unwrap() = Some(creator);
        Ok(Some(creator))
    }

    pub(crate) fn set_creator(&self, creator: EntityId) {
        *self.creator.lock().unwrap() = Some(creator);
    }

    pub fn cached_creator_verification(&self) -> Verification {
        *self.creator_verification.lock().unwrap()
    }

    /// Validate the creator binding `creator_id_le || creation_time_le`
    /// against the creator's public signing key.
    pub async fn verify_creator(&self, signer: &PublicKey) -> Result<Verification> {
        let (Some(creator), Some(time)) = (self.creator().await?, self.creation_time().await?)
        else {
            return Ok(self.cached_creator_verification());
        };
        let mut message = Vec::with_capacity(16);
        message.extend_from_slice(&creator.to_le_bytes());
        message.extend_from_slice(&time.to_le_bytes());
        self.verify_field("creator", &message, signer, &self.creator_verification)
            .await
    }

    /// The generic lazy verification contract: at most one fetch of the
    /// stored signature per unchecked state, tri-state result cached.
    pub(crate) async fn verify_field(
        &self,
        column: &str,
        message: &[u8],
        signer: &PublicKey,
        cache: &Mutex<Verification>,
    ) -> Result<Verification> {
        {
            let cached = *cache.lock().unwrap();
            if cached.is_checked() {
                return Ok(cached);
            }
        }
        let Some(signature) = self.fetch_column("verify", column).await? else {
            return Ok(*cache.lock().unwrap());
        };
        let verdict = Verification::from_bool(signer.verify(message, &signature));
        if verdict == Verification::Invalid {
            tracing::warn!(
                "signature check failed for {}{} id {}",
                self.tag.name(),
                column,
                self.id.get()
            );
        }
        *cache.lock().unwrap() = verdict;
        Ok(verdict)
    }

    /// Delete the row. No cascade; dependent rows keep their ids.
    pub async fn remove(&self) -> Result<()> {
        let statement = Statement::new(
            format!("remove{}", self.tag.name()),
            vec![("id", Value::BigInt(self.id.get()))],
        );
        self.pipeline.fetch(statement).await?;
        Ok(())
    }

    /// The creator binding signature input.
    pub(crate) fn creator_binding(creator: EntityId, creation_time: i64) -> Vec<u8> {
        let mut message = Vec::with_capacity(16);
        message.extend_from_slice(&creator.to_le_bytes());
        message.extend_from_slice(&creation_time.to_le_bytes());
        message
    }
}

impl std::fmt::Debug for EntityCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCore")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .field("keyed", &self.access.lock().unwrap().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use veilstore_core::{CryptoParams, Keypair};
    use veilstore_pipeline::MemoryBackend;

    const TAG: TypeTag = TypeTag::new("account");

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(MemoryBackend::with_tags(&["account"])))
    }

    #[tokio::test]
    async fn test_public_hash_memoized_and_pure() {
        let core = EntityCore::new(pipeline(), TAG, EntityId::new(3), None);
        assert_eq!(core.public_hash(), core.public_hash());
        assert_eq!(core.public_hash(), public_hash(TAG, EntityId::new(3)));
        // Without a key, only the public address exists.
        assert!(core.hash().is_none());
        assert_eq!(core.hash_or_public(), core.public_hash());
    }

    #[tokio::test]
    async fn test_hash_appears_with_key() {
        let core = EntityCore::new(pipeline(), TAG, EntityId::new(3), None);
        let key = SymmetricKey::generate();
        core.set_access(key.clone());
        assert_eq!(
            core.hash(),
            Some(entity_hash(key.iv(), TAG, EntityId::new(3)))
        );
    }

    #[tokio::test]
    async fn test_base_fields_fetch_and_verify() {
        let pipeline = pipeline();
        let access = SymmetricKey::generate();
        let signer = Keypair::generate(&CryptoParams::new(1024)).unwrap();
        let creator = EntityId::new(77);
        let time = now_millis();

        let binding = EntityCore::creator_binding(creator, time);
        let created = pipeline
            .fetch(Statement::new(
                "createaccount",
                vec![
                    (
                        "creationtime",
                        Value::Bytes(access.encrypt(&time.to_le_bytes()).unwrap()),
                    ),
                    (
                        "creator",
                        Value::Bytes(access.encrypt(&creator.to_le_bytes()).unwrap()),
                    ),
                    (
                        "creatorverification",
                        Value::Bytes(signer.sign(&binding).unwrap()),
                    ),
                ],
            ))
            .await
            .unwrap();
        let id = EntityId::new(created.first().unwrap().bigint(0).unwrap());

        let core = EntityCore::new(pipeline, TAG, id, Some(access));
        assert_eq!(core.cached_creation_time(), None);
        assert_eq!(core.creation_time().await.unwrap(), Some(time));
        assert_eq!(core.cached_creation_time(), Some(time));
        assert_eq!(core.creator().await.unwrap(), Some(creator));

        let verdict = core.verify_creator(&signer.public_key()).await.unwrap();
        assert_eq!(verdict, Verification::Valid);
        // Idempotent: the cached verdict is returned unchanged.
        let again = core.verify_creator(&signer.public_key()).await.unwrap();
        assert_eq!(again, Verification::Valid);
    }

    #[tokio::test]
    async fn test_wrong_signer_is_invalid_not_error() {
        let pipeline = pipeline();
        let access = SymmetricKey::generate();
        let signer = Keypair::generate(&CryptoParams::new(1024)).unwrap();
        let stranger = Keypair::generate(&CryptoParams::new(1024)).unwrap();
        let creator = EntityId::new(1);
        let time = now_millis();

        let created = pipeline
            .fetch(Statement::new(
                "createaccount",
                vec![
                    (
                        "creationtime",
                        Value::Bytes(access.encrypt(&time.to_le_bytes()).unwrap()),
                    ),
                    (
                        "creator",
                        Value::Bytes(access.encrypt(&creator.to_le_bytes()).unwrap()),
                    ),
                    (
                        "creatorverification",
                        Value::Bytes(
                            signer
                                .sign(&EntityCore::creator_binding(creator, time))
                                .unwrap(),
                        ),
                    ),
                ],
            ))
            .await
            .unwrap();
        let id = EntityId::new(created.first().unwrap().bigint(0).unwrap());

        let core = EntityCore::new(pipeline, TAG, id, Some(access));
        let verdict = core
            .verify_creator(&stranger.public_key())
            .await
            .unwrap();
        assert_eq!(verdict, Verification::Invalid);
    }
}
