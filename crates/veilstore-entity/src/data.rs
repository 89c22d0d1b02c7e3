//! Data entities: encrypted payload rows hanging off a parent.
//!
//! A data row shares its parent's symmetric key material but gets its own
//! IV, so its authenticated address differs from the parent's. The IV is
//! the only key material stored: wrapped under the parent key in the
//! `access` column. Anyone holding the parent key can open every item.

use std::sync::{Arc, Mutex};

use veilstore_core::{
    lookup_name, EntityId, PublicKey, Sha256Hash, SymmetricKey, TypeTag, Verification,
};
use veilstore_pipeline::{Pipeline, Statement, Value};

use crate::access::AccessEntity;
use crate::error::{EntityError, Result};
use crate::identity::{now_millis, EntityCore};

/// An encrypted payload row under some parent entity.
pub struct DataEntity {
    core: EntityCore,
    parent_access: SymmetricKey,
    parent_hash: Sha256Hash,
    data: Mutex<Option<Vec<u8>>>,
    modifier: Mutex<Option<EntityId>>,
    modification_time: Mutex<Option<i64>>,
    data_verification: Mutex<Verification>,
}

impl DataEntity {
    /// Persist a new data row in one insert.
    ///
    /// `modifier` is the acting account: it becomes creator and first
    /// modifier, and its signing key signs both the creator binding and
    /// the payload binding `data || modifier_id_le || time_le`.
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        parent_access: &SymmetricKey,
        parent_hash: Sha256Hash,
        name: &str,
        payload: &[u8],
        modifier: &Arc<AccessEntity>,
    ) -> Result<Arc<Self>> {
        Self::create_with(
            pipeline,
            tag,
            parent_access,
            parent_hash,
            name,
            payload,
            modifier,
            |_, _| Ok(Vec::new()),
        )
        .await
    }

    /// [`DataEntity::create`] with extra columns derived from the fresh
    /// key and the creation time (time rows append their position blob).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn create_with(
        pipeline: &Pipeline,
        tag: TypeTag,
        parent_access: &SymmetricKey,
        parent_hash: Sha256Hash,
        name: &str,
        payload: &[u8],
        modifier: &Arc<AccessEntity>,
        extra: impl FnOnce(&SymmetricKey, i64) -> Result<Vec<(&'static str, Value)>>,
    ) -> Result<Arc<Self>> {
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        let access = parent_access.derive_child();
        let time = now_millis();
        let modifier_id = modifier.id();

        let mut columns: Vec<(&'static str, Value)> = vec![
            (
                "creationtime",
                Value::Bytes(access.encrypt(&time.to_le_bytes())?),
            ),
            (
                "creator",
                Value::Bytes(access.encrypt(&modifier_id.to_le_bytes())?),
            ),
            (
                "creatorverification",
                Value::Bytes(signer.sign(&EntityCore::creator_binding(modifier_id, time))?),
            ),
            ("access", Value::Bytes(parent_access.encrypt(access.iv())?)),
            ("data", Value::Bytes(access.encrypt(payload)?)),
            (
                "modificationtime",
                Value::Bytes(access.encrypt(&time.to_le_bytes())?),
            ),
            (
                "modifier",
                Value::Bytes(access.encrypt(&modifier_id.to_le_bytes())?),
            ),
            (
                "name",
                Value::Bytes(lookup_name(&parent_hash, tag, name).as_bytes().to_vec()),
            ),
            ("parent", Value::Bytes(parent_hash.as_bytes().to_vec())),
            (
                "dataverification",
                Value::Bytes(signer.sign(&Self::data_binding(payload, modifier_id, time))?),
            ),
        ];
        columns.extend(extra(&access, time)?);

        let rows = pipeline
            .fetch(Statement::new(format!("create{}", tag.name()), columns))
            .await?;
        let id = rows
            .first()
            .and_then(|row| row.bigint(0))
            .ok_or(EntityError::NotPersisted)?;

        let core = EntityCore::new(pipeline.clone(), tag, EntityId::new(id), Some(access));
        core.set_creation_time(time);
        core.set_creator(modifier_id);

        let entity = Self {
            core,
            parent_access: parent_access.clone(),
            parent_hash,
            data: Mutex::new(Some(payload.to_vec())),
            modifier: Mutex::new(Some(modifier_id)),
            modification_time: Mutex::new(Some(time)),
            data_verification: Mutex::new(Verification::Unchecked),
        };
        Ok(Arc::new(entity))
    }

    /// Bind an existing row. No I/O; the row key is unwrapped on first
    /// [`DataEntity::access_key`].
    pub fn open(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        parent_access: SymmetricKey,
        parent_hash: Sha256Hash,
    ) -> Self {
        Self {
            core: EntityCore::new(pipeline, tag, id, None),
            parent_access,
            parent_hash,
            data: Mutex::new(None),
            modifier: Mutex::new(None),
            modification_time: Mutex::new(None),
            data_verification: Mutex::new(Verification::Unchecked),
        }
    }

    pub fn core(&self) -> &EntityCore {
        &self.core
    }

    pub fn id(&self) -> EntityId {
        self.core.id()
    }

    pub fn tag(&self) -> TypeTag {
        self.core.tag()
    }

    pub fn parent_hash(&self) -> Sha256Hash {
        self.parent_hash
    }

    fn pipeline(&self) -> &Pipeline {
        self.core.pipeline()
    }

    /// The row key: parent key material plus the row's own IV, unwrapped
    /// from the `access` column on first use.
    pub async fn access_key(&self) -> Result<Option<SymmetricKey>> {
        if let Some(access) = self.core.cached_access() {
            return Ok(Some(access));
        }
        let Some(wrapper) = self.core.fetch_column("get", "access").await? else {
            return Ok(None);
        };
        let iv_bytes = self.parent_access.decrypt(&wrapper)?;
        let iv: [u8; 16] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| EntityError::MalformedField {
                field: "access",
                reason: format!("expected 16 IV bytes, got {}", iv_bytes.len()),
            })?;
        let access = SymmetricKey::from_parts(*self.parent_access.key(), iv);
        self.core.set_access(access.clone());
        Ok(Some(access))
    }

    pub fn cached_data(&self) -> Option<Vec<u8>> {
        self.data.lock().unwrap().clone()
    }

    /// The decrypted payload, fetched on first use.
    pub async fn data(&self) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.cached_data() {
            return Ok(Some(data));
        }
        if self.access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.core.fetch_column("get", "data").await? else {
            return Ok(None);
        };
        let payload = self.core.decrypt(&ciphertext)?;
        *self.data.lock().unwrap() = Some(payload.clone());
        Ok(Some(payload))
    }

    pub fn cached_modifier(&self) -> Option<EntityId> {
        *self.modifier.lock().unwrap()
    }

    /// Id of the account that last saved the payload.
    pub async fn modifier(&self) -> Result<Option<EntityId>> {
        if let Some(modifier) = self.cached_modifier() {
            return Ok(Some(modifier));
        }
        if self.access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.core.fetch_column("get", "modifier").await? else {
            return Ok(None);
        };
        let id = EntityCore::decode_i64("modifier", &self.core.decrypt(&ciphertext)?)?;
        let modifier = EntityId::new(id);
        *self.modifier.lock().unwrap() = Some(modifier);
        Ok(Some(modifier))
    }

    pub fn cached_modification_time(&self) -> Option<i64> {
        *self.modification_time.lock().unwrap()
    }

    /// Time of the last payload save.
    pub async fn modification_time(&self) -> Result<Option<i64>> {
        if let Some(time) = self.cached_modification_time() {
            return Ok(Some(time));
        }
        if self.access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.core.fetch_column("get", "modificationtime").await? else {
            return Ok(None);
        };
        let time = EntityCore::decode_i64("modificationtime", &self.core.decrypt(&ciphertext)?)?;
        *self.modification_time.lock().unwrap() = Some(time);
        Ok(Some(time))
    }

    /// Replace the payload: stamps the modifier and time, signs the new
    /// binding, one update.
    pub async fn save_data(&self, payload: &[u8], modifier: &AccessEntity) -> Result<()> {
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        if self.access_key().await?.is_none() {
            return Err(EntityError::MissingKey("access"));
        }
        let time = now_millis();
        let modifier_id = modifier.id();

        let statement = Statement::new(
            format!("save{}data", self.tag().name()),
            vec![
                ("id", Value::BigInt(self.id().get())),
                ("data", Value::Bytes(self.core.encrypt(payload)?)),
                (
                    "modifier",
                    Value::Bytes(self.core.encrypt(&modifier_id.to_le_bytes())?),
                ),
                (
                    "modificationtime",
                    Value::Bytes(self.core.encrypt(&time.to_le_bytes())?),
                ),
                (
                    "dataverification",
                    Value::Bytes(signer.sign(&Self::data_binding(payload, modifier_id, time))?),
                ),
            ],
        );
        self.pipeline().fetch(statement).await?;

        *self.data.lock().unwrap() = Some(payload.to_vec());
        *self.modifier.lock().unwrap() = Some(modifier_id);
        *self.modification_time.lock().unwrap() = Some(time);
        *self.data_verification.lock().unwrap() = Verification::Unchecked;
        Ok(())
    }

    /// Validate the stored payload binding against the modifier's public
    /// signing key.
    pub async fn verify_data(&self, signer: &PublicKey) -> Result<Verification> {
        let (Some(data), Some(modifier), Some(time)) = (
            self.data().await?,
            self.modifier().await?,
            self.modification_time().await?,
        ) else {
            return Ok(*self.data_verification.lock().unwrap());
        };
        self.core
            .verify_field(
                "data",
                &Self::data_binding(&data, modifier, time),
                signer,
                &self.data_verification,
            )
            .await
    }

    pub async fn remove(&self) -> Result<()> {
        self.core.remove().await
    }

    /// The payload binding signature input: `data || modifier_id_le ||
    /// modification_time_le`.
    pub(crate) fn data_binding(payload: &[u8], modifier: EntityId, time: i64) -> Vec<u8> {
        let mut message = Vec::with_capacity(payload.len() + 16);
        message.extend_from_slice(payload);
        message.extend_from_slice(&modifier.to_le_bytes());
        message.extend_from_slice(&time.to_le_bytes());
        message
    }
}

impl std::fmt::Debug for DataEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .finish()
    }
}
