//! Access entities: keyed, nameable, relation-bearing objects.
//!
//! An access entity owns a symmetric key, an RSA decryption keypair and an
//! RSA signing keypair. How much of that set a holder actually has is its
//! trust level, fixed at construction: one constructor per constructible
//! level, selected by whoever decoded the grant. There is no privilege
//! escalation path except the creator upgrade, which only renames a level
//! the holder already proved by key possession.

use std::sync::{Arc, Mutex};

use veilstore_core::{
    escrow_hash, ChildSecrets, CryptoParams, EntityId, KeyEnvelope, Keypair, PublicKey,
    SymmetricKey, TrustLevel, TypeTag, Verification,
};
use veilstore_pipeline::{Pipeline, Statement, Value};

use crate::error::{EntityError, Result};
use crate::identity::{now_millis, EntityCore};

/// A keyed entity held at some trust level.
pub struct AccessEntity {
    core: EntityCore,
    level: Mutex<TrustLevel>,
    /// The account this handle acts through. `None` for a self-rooted
    /// account (the root of a trust graph).
    association: Option<Arc<AccessEntity>>,
    decryption: Option<Keypair>,
    signing: Option<Keypair>,
    public_key: Mutex<Option<PublicKey>>,
    public_signature: Mutex<Option<PublicKey>>,
    name: Mutex<Option<String>>,
    name_verification: Mutex<Verification>,
}

impl AccessEntity {
    fn assemble(
        core: EntityCore,
        level: TrustLevel,
        association: Option<Arc<AccessEntity>>,
        decryption: Option<Keypair>,
        signing: Option<Keypair>,
    ) -> Self {
        Self {
            core,
            level: Mutex::new(level),
            association,
            decryption,
            signing,
            public_key: Mutex::new(None),
            public_signature: Mutex::new(None),
            name: Mutex::new(None),
            name_verification: Mutex::new(Verification::Unchecked),
        }
    }

    /// Administrator hold: both private keys, imported from PKCS#1 DER.
    /// The symmetric key is fetched later through its envelope.
    pub fn administrator(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        association: Option<Arc<AccessEntity>>,
        decryption_der: &[u8],
        signing_der: &[u8],
    ) -> Result<Self> {
        Ok(Self::assemble(
            EntityCore::new(pipeline, tag, id, None),
            TrustLevel::Administrator,
            association,
            Some(Keypair::from_pkcs1_der(decryption_der)?),
            Some(Keypair::from_pkcs1_der(signing_der)?),
        ))
    }

    /// Contributor hold: the decryption key only.
    pub fn contributor(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        association: Option<Arc<AccessEntity>>,
        decryption_der: &[u8],
    ) -> Result<Self> {
        Ok(Self::assemble(
            EntityCore::new(pipeline, tag, id, None),
            TrustLevel::Contributor,
            association,
            Some(Keypair::from_pkcs1_der(decryption_der)?),
            None,
        ))
    }

    /// Observator hold: the symmetric key arrives directly, no private
    /// keys ever.
    pub fn observator(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        association: Option<Arc<AccessEntity>>,
        access: SymmetricKey,
    ) -> Self {
        Self::assemble(
            EntityCore::new(pipeline, tag, id, Some(access)),
            TrustLevel::Observator,
            association,
            None,
            None,
        )
    }

    /// Public hold: identity only.
    pub fn public(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        association: Option<Arc<AccessEntity>>,
    ) -> Self {
        Self::assemble(
            EntityCore::new(pipeline, tag, id, None),
            TrustLevel::Public,
            association,
            None,
            None,
        )
    }

    /// Capability selection over decoded grant secrets: one constructor
    /// per variant, never a partially keyed handle.
    pub fn from_secrets(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        association: Option<Arc<AccessEntity>>,
        secrets: ChildSecrets,
    ) -> Result<Self> {
        match secrets {
            ChildSecrets::Administrator {
                decryption_der,
                signing_der,
            } => Self::administrator(
                pipeline,
                tag,
                id,
                association,
                &decryption_der,
                &signing_der,
            ),
            ChildSecrets::Contributor { decryption_der } => {
                Self::contributor(pipeline, tag, id, association, &decryption_der)
            }
            ChildSecrets::Observator { access } => {
                Ok(Self::observator(pipeline, tag, id, association, access))
            }
        }
    }

    /// Mint and persist a new access entity in one insert.
    ///
    /// Generates the symmetric key and both keypairs, envelopes the
    /// symmetric key to the entity's own public key, and signs the name
    /// and the creator binding with the creating account's signing key.
    /// A self-rooted entity (`association: None`) signs for itself with
    /// creator id [`EntityId::UNKNOWN`].
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        name: &str,
        association: Option<&Arc<AccessEntity>>,
        params: &CryptoParams,
    ) -> Result<Arc<Self>> {
        Self::create_with(pipeline, tag, name, association, params, |_| Ok(Vec::new())).await
    }

    /// [`AccessEntity::create`] with extra columns derived from the fresh
    /// symmetric key (schedules append their parameter blob this way).
    pub(crate) async fn create_with(
        pipeline: &Pipeline,
        tag: TypeTag,
        name: &str,
        association: Option<&Arc<AccessEntity>>,
        params: &CryptoParams,
        extra: impl FnOnce(&SymmetricKey) -> Result<Vec<(&'static str, Value)>>,
    ) -> Result<Arc<Self>> {
        let access = SymmetricKey::generate();
        let decryption = Keypair::generate(params)?;
        let signing = Keypair::generate(params)?;
        let creation_time = now_millis();

        let (creator_id, creator_signer) = match association {
            Some(account) => (
                account.id(),
                account
                    .signing
                    .as_ref()
                    .ok_or(EntityError::MissingKey("association signing key"))?,
            ),
            None => (EntityId::UNKNOWN, &signing),
        };

        let mut columns: Vec<(&'static str, Value)> = vec![
            (
                "creationtime",
                Value::Bytes(access.encrypt(&creation_time.to_le_bytes())?),
            ),
            (
                "creator",
                Value::Bytes(access.encrypt(&creator_id.to_le_bytes())?),
            ),
            (
                "creatorverification",
                Value::Bytes(
                    creator_signer.sign(&EntityCore::creator_binding(creator_id, creation_time))?,
                ),
            ),
            (
                "access",
                Value::Bytes(
                    KeyEnvelope::seal(&decryption.public_key(), &access)?.into_bytes(),
                ),
            ),
            ("name", Value::Bytes(access.encrypt(name.as_bytes())?)),
            ("publickey", Value::Bytes(decryption.public_key().to_pkcs1_der()?)),
            (
                "publicsignature",
                Value::Bytes(signing.public_key().to_pkcs1_der()?),
            ),
            (
                "nameverification",
                Value::Bytes(creator_signer.sign(name.as_bytes())?),
            ),
        ];
        columns.extend(extra(&access)?);

        let rows = pipeline
            .fetch(Statement::new(format!("create{}", tag.name()), columns))
            .await?;
        let id = rows
            .first()
            .and_then(|row| row.bigint(0))
            .ok_or(EntityError::NotPersisted)?;

        let core = EntityCore::new(pipeline.clone(), tag, EntityId::new(id), Some(access));
        core.set_creation_time(creation_time);
        core.set_creator(creator_id);

        let entity = Self::assemble(
            core,
            TrustLevel::Creator,
            association.cloned(),
            Some(decryption),
            Some(signing),
        );
        *entity.name.lock().unwrap() = Some(name.to_string());
        Ok(Arc::new(entity))
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

    pub fn pipeline(&self) -> &Pipeline {
        self.core.pipeline()
    }

    pub fn trust_level(&self) -> TrustLevel {
        *self.level.lock().unwrap()
    }

    pub fn association(&self) -> Option<&Arc<AccessEntity>> {
        self.association.as_ref()
    }

    /// The private decryption key, present at Contributor or better.
    pub fn decryption_keypair(&self) -> Option<&Keypair> {
        self.decryption.as_ref()
    }

    /// The private signing key, present at Administrator or better.
    pub fn signing_keypair(&self) -> Option<&Keypair> {
        self.signing.as_ref()
    }

    /// The public encryption key: derived locally when the private key is
    /// held, fetched from the store otherwise.
    pub async fn public_key(&self) -> Result<Option<PublicKey>> {
        if let Some(key) = self.public_key.lock().unwrap().clone() {
            return Ok(Some(key));
        }
        let key = match &self.decryption {
            Some(keypair) => Some(keypair.public_key()),
            None => self
                .core
                .fetch_column("get", "publickey")
                .await?
                .map(|der| PublicKey::from_pkcs1_der(&der))
                .transpose()?,
        };
        if let Some(key) = &key {
            *self.public_key.lock().unwrap() = Some(key.clone());
        }
        Ok(key)
    }

    /// The public signing key, fetched unless the signing keypair is held.
    pub async fn public_signature(&self) -> Result<Option<PublicKey>> {
        if let Some(key) = self.public_signature.lock().unwrap().clone() {
            return Ok(Some(key));
        }
        let key = match &self.signing {
            Some(keypair) => Some(keypair.public_key()),
            None => self
                .core
                .fetch_column("get", "publicsignature")
                .await?
                .map(|der| PublicKey::from_pkcs1_der(&der))
                .transpose()?,
        };
        if let Some(key) = &key {
            *self.public_signature.lock().unwrap() = Some(key.clone());
        }
        Ok(key)
    }

    pub fn cached_access(&self) -> Option<SymmetricKey> {
        self.core.cached_access()
    }

    /// The symmetric key, opening the stored envelope on first use.
    ///
    /// Needs the decryption key, so below Contributor this returns the
    /// cached value unchanged (`Some` only for Observator holds, which got
    /// the key directly).
    pub async fn access_key(&self) -> Result<Option<SymmetricKey>> {
        if let Some(access) = self.core.cached_access() {
            return Ok(Some(access));
        }
        let Some(decryption) = &self.decryption else {
            return Ok(None);
        };
        let Some(ciphertext) = self.core.fetch_column("get", "access").await? else {
            return Ok(None);
        };
        let access = KeyEnvelope::from_bytes(ciphertext).open(decryption)?;
        self.core.set_access(access.clone());
        Ok(Some(access))
    }

    pub fn cached_name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    /// The entity name.
    ///
    /// Decrypted from the row when the symmetric key is available;
    /// otherwise falls back to the shared-name escrow, which the acting
    /// account can open with its own decryption key.
    pub async fn name(&self) -> Result<Option<String>> {
        if let Some(name) = self.cached_name() {
            return Ok(Some(name));
        }

        if self.access_key().await?.is_some() {
            let Some(ciphertext) = self.core.fetch_column("get", "name").await? else {
                return Ok(None);
            };
            let name = Self::decode_name(&self.core.decrypt(&ciphertext)?)?;
            *self.name.lock().unwrap() = Some(name.clone());
            return Ok(Some(name));
        }

        self.search_shared_name().await
    }

    fn decode_name(plaintext: &[u8]) -> Result<String> {
        String::from_utf8(plaintext.to_vec()).map_err(|e| EntityError::MalformedField {
            field: "name",
            reason: e.to_string(),
        })
    }

    /// Rename. Only the creator may rename, and the new name is signed
    /// with the creating account's signing key.
    pub async fn save_name(&self, name: &str) -> Result<()> {
        let level = self.trust_level();
        if level != TrustLevel::Creator {
            return Err(EntityError::InsufficientTrust {
                required: TrustLevel::Creator,
                held: level,
            });
        }
        let signer = match &self.association {
            Some(account) => account
                .signing
                .as_ref()
                .ok_or(EntityError::MissingKey("association signing key"))?,
            None => self
                .signing
                .as_ref()
                .ok_or(EntityError::MissingKey("signing key"))?,
        };

        let statement = Statement::new(
            format!("save{}name", self.tag().name()),
            vec![
                ("id", Value::BigInt(self.id().get())),
                ("name", Value::Bytes(self.core.encrypt(name.as_bytes())?)),
                (
                    "nameverification",
                    Value::Bytes(signer.sign(name.as_bytes())?),
                ),
            ],
        );
        self.pipeline().fetch(statement).await?;

        *self.name.lock().unwrap() = Some(name.to_string());
        *self.name_verification.lock().unwrap() = Verification::Unchecked;
        Ok(())
    }

    /// Validate the stored name signature against the creator's public
    /// signing key.
    pub async fn verify_name(&self, signer: &PublicKey) -> Result<Verification> {
        let Some(name) = self.name().await? else {
            return Ok(*self.name_verification.lock().unwrap());
        };
        self.core
            .verify_field("name", name.as_bytes(), signer, &self.name_verification)
            .await
    }

    /// Deposit this entity's name in escrow for `destination`.
    ///
    /// The blob is a fresh symmetric key enveloped to the destination's
    /// public key, followed by the name encrypted under that key, filed
    /// under `SHA256(destination_public_hash || own_public_hash)`.
    pub async fn deposit_name(&self, destination: &AccessEntity) -> Result<()> {
        let name = self
            .name()
            .await?
            .ok_or(EntityError::MissingKey("name"))?;
        let recipient = destination
            .public_key()
            .await?
            .ok_or(EntityError::MissingKey("destination public key"))?;

        let temp = SymmetricKey::generate();
        let mut blob = recipient.encrypt(&temp.to_bytes())?;
        blob.extend_from_slice(&temp.encrypt(name.as_bytes())?);

        let statement = Statement::new(
            "depositsharedname",
            vec![
                (
                    "hash",
                    Value::Bytes(
                        escrow_hash(&destination.core.public_hash(), &self.core.public_hash())
                            .as_bytes()
                            .to_vec(),
                    ),
                ),
                ("name", Value::Bytes(blob)),
            ],
        );
        self.pipeline().fetch(statement).await?;
        Ok(())
    }

    /// Look for a name deposited for the acting account.
    async fn search_shared_name(&self) -> Result<Option<String>> {
        let Some(account) = &self.association else {
            return Ok(None);
        };
        let Some(keypair) = &account.decryption else {
            return Ok(None);
        };

        let statement = Statement::new(
            "searchsharedname",
            vec![
                (
                    "publichash",
                    Value::Bytes(
                        escrow_hash(&account.core.public_hash(), &self.core.public_hash())
                            .as_bytes()
                            .to_vec(),
                    ),
                ),
                (
                    "hash",
                    Value::Bytes(
                        escrow_hash(&account.core.hash_or_public(), &self.core.public_hash())
                            .as_bytes()
                            .to_vec(),
                    ),
                ),
            ],
        );
        let rows = self.pipeline().fetch(statement).await?;
        let Some(blob) = rows.first().and_then(|row| row.bytes(0)) else {
            return Ok(None);
        };

        let envelope_len = keypair.modulus_len();
        if blob.len() <= envelope_len {
            return Err(EntityError::MalformedField {
                field: "sharedname",
                reason: format!("{} bytes, envelope alone is {envelope_len}", blob.len()),
            });
        }
        let temp = KeyEnvelope::from_bytes(blob[..envelope_len].to_vec()).open(keypair)?;
        let name = Self::decode_name(&temp.decrypt(&blob[envelope_len..])?)?;
        *self.name.lock().unwrap() = Some(name.clone());
        Ok(Some(name))
    }

    /// The creator id, with the creator upgrade: an Administrator hold
    /// whose fetched creator is the acting account itself is really a
    /// Creator hold.
    pub async fn creator(&self) -> Result<Option<EntityId>> {
        let creator = self.core.creator().await?;
        if let (Some(creator), Some(account)) = (creator, &self.association) {
            let mut level = self.level.lock().unwrap();
            if *level == TrustLevel::Administrator && creator == account.id() {
                *level = TrustLevel::Creator;
            }
        }
        Ok(creator)
    }

    /// Ids of link rows granting access to children of this entity.
    pub async fn load_children(&self, link_tag: TypeTag) -> Result<Vec<EntityId>> {
        let statement = Statement::new(
            format!("load{}children", link_tag.name()),
            vec![(
                "parent",
                Value::Bytes(self.core.hash_or_public().as_bytes().to_vec()),
            )],
        );
        self.load_ids(statement).await
    }

    /// Ids of link rows granting this entity access to parents. Matches
    /// rows addressed by either hash, so grants made before key exchange
    /// are found too.
    pub async fn load_parents(&self, link_tag: TypeTag) -> Result<Vec<EntityId>> {
        let statement = Statement::new(
            format!("load{}parents", link_tag.name()),
            vec![
                (
                    "publicchild",
                    Value::Bytes(self.core.public_hash().as_bytes().to_vec()),
                ),
                (
                    "child",
                    Value::Bytes(self.core.hash_or_public().as_bytes().to_vec()),
                ),
            ],
        );
        self.load_ids(statement).await
    }

    /// Ids of data rows parented to this entity.
    pub async fn load_items(&self, item_tag: TypeTag) -> Result<Vec<EntityId>> {
        let statement = Statement::new(
            format!("load{}items", item_tag.name()),
            vec![(
                "parent",
                Value::Bytes(self.core.hash_or_public().as_bytes().to_vec()),
            )],
        );
        self.load_ids(statement).await
    }

    async fn load_ids(&self, statement: Statement) -> Result<Vec<EntityId>> {
        let rows = self.pipeline().fetch(statement).await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.bigint(0))
            .map(EntityId::new)
            .collect())
    }

    pub async fn remove(&self) -> Result<()> {
        self.core.remove().await
    }
}

impl std::fmt::Debug for AccessEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .field("level", &self.trust_level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilstore_pipeline::MemoryBackend;

    const ACCOUNT: TypeTag = TypeTag::new("account");

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(MemoryBackend::with_tags(&["account", "planner"])))
    }

    fn params() -> CryptoParams {
        CryptoParams::new(1024)
    }

    #[tokio::test]
    async fn test_create_root_account() {
        let pipeline = pipeline();
        let account = AccessEntity::create(&pipeline, ACCOUNT, "root", None, &params())
            .await
            .unwrap();

        assert_eq!(account.trust_level(), TrustLevel::Creator);
        assert_eq!(account.cached_name(), Some("root".to_string()));
        assert!(account.cached_access().is_some());
        assert_eq!(
            account.core().cached_creator(),
            Some(EntityId::UNKNOWN)
        );
    }

    #[tokio::test]
    async fn test_contributor_recovers_access_key_via_envelope() {
        let pipeline = pipeline();
        let account = AccessEntity::create(&pipeline, ACCOUNT, "root", None, &params())
            .await
            .unwrap();
        let der = account
            .decryption_keypair()
            .unwrap()
            .to_pkcs1_der()
            .unwrap();

        // A fresh handle holding only the decryption key.
        let handle =
            AccessEntity::contributor(pipeline, ACCOUNT, account.id(), None, &der).unwrap();
        assert!(handle.cached_access().is_none());

        let access = handle.access_key().await.unwrap().unwrap();
        assert_eq!(access, account.cached_access().unwrap());

        // And the name decrypts with it.
        assert_eq!(handle.name().await.unwrap(), Some("root".to_string()));
    }

    #[tokio::test]
    async fn test_public_hold_cannot_obtain_key() {
        let pipeline = pipeline();
        let account = AccessEntity::create(&pipeline, ACCOUNT, "root", None, &params())
            .await
            .unwrap();

        let handle = AccessEntity::public(pipeline, ACCOUNT, account.id(), None);
        assert_eq!(handle.access_key().await.unwrap(), None);
        // Still None afterwards: the precondition failure left state alone.
        assert_eq!(handle.cached_access(), None);
    }

    #[tokio::test]
    async fn test_save_name_requires_creator() {
        let pipeline = pipeline();
        let account = AccessEntity::create(&pipeline, ACCOUNT, "before", None, &params())
            .await
            .unwrap();
        account.save_name("after").await.unwrap();
        assert_eq!(account.cached_name(), Some("after".to_string()));

        let der = account
            .decryption_keypair()
            .unwrap()
            .to_pkcs1_der()
            .unwrap();
        let handle =
            AccessEntity::contributor(pipeline, ACCOUNT, account.id(), None, &der).unwrap();
        assert!(matches!(
            handle.save_name("nope").await,
            Err(EntityError::InsufficientTrust { .. })
        ));
        // The store kept the creator's rename.
        assert_eq!(handle.name().await.unwrap(), Some("after".to_string()));
    }

    #[tokio::test]
    async fn test_verify_name_tristate() {
        let pipeline = pipeline();
        let account = AccessEntity::create(&pipeline, ACCOUNT, "root", None, &params())
            .await
            .unwrap();
        let signer = account.public_signature().await.unwrap().unwrap();

        assert_eq!(
            account.verify_name(&signer).await.unwrap(),
            Verification::Valid
        );

        let stranger = Keypair::generate(&params()).unwrap().public_key();
        // Cached verdict wins; re-verification is idempotent.
        assert_eq!(
            account.verify_name(&stranger).await.unwrap(),
            Verification::Valid
        );
    }

    #[tokio::test]
    async fn test_name_escrow_roundtrip() {
        let pipeline = pipeline();
        let alice = AccessEntity::create(&pipeline, ACCOUNT, "alice", None, &params())
            .await
            .unwrap();
        let bob = AccessEntity::create(&pipeline, ACCOUNT, "bob", None, &params())
            .await
            .unwrap();

        // Alice deposits her name for Bob.
        alice.deposit_name(&bob).await.unwrap();

        // Bob holds Alice only publicly, but acting through his account the
        // escrow yields her name.
        let handle =
            AccessEntity::public(pipeline, ACCOUNT, alice.id(), Some(Arc::clone(&bob)));
        assert_eq!(handle.name().await.unwrap(), Some("alice".to_string()));
        // The key itself was never disclosed.
        assert!(handle.cached_access().is_none());
    }
}
