//! Link entities: directed, trust-scoped access grants.
//!
//! A link row carries everything a grant needs in one place: the link key
//! enveloped to both ends, both ids encrypted under it, the granted level,
//! the child's secret bundle scoped to that level, and the child's own
//! signature over `parent_id || level` so the parent can prove the child
//! consented to the grant.

use std::sync::{Arc, Mutex};

use veilstore_core::{
    public_hash, CoreError, EntityId, KeyEnvelope, Keypair, PublicKey, SecretBundle,
    SymmetricKey, TrustLevel, TypeTag, Verification,
};
use veilstore_pipeline::{Pipeline, Statement, Value};

use crate::access::AccessEntity;
use crate::error::{EntityError, Result};
use crate::identity::{now_millis, EntityCore};

/// What a link's child getter resolved to.
pub enum LinkedChild {
    /// The stored child hash was only the public one: the grant predates
    /// key exchange, the bundle is filler.
    Public(AccessEntity),
    /// Secrets decoded at the granted level.
    Keyed(AccessEntity),
}

impl LinkedChild {
    /// The entity either way.
    pub fn into_entity(self) -> AccessEntity {
        match self {
            Self::Public(entity) | Self::Keyed(entity) => entity,
        }
    }
}

/// A directed access grant from a parent onto a child entity.
pub struct LinkEntity {
    core: EntityCore,
    level: Mutex<Option<TrustLevel>>,
    child_id: Mutex<Option<EntityId>>,
    parent_id: Mutex<Option<EntityId>>,
    parent_verification: Mutex<Verification>,
}

impl LinkEntity {
    /// Persist a new grant in one insert.
    ///
    /// Requires the parent held at Contributor or better (it must be able
    /// to open its side of the envelope later) and the child held at
    /// Administrator or better (its signing key endorses the grant, and
    /// its private keys fill the bundle for scopes that include them).
    /// `level` is the granted scope, Administrator through Observator.
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        child: &Arc<AccessEntity>,
        parent: &Arc<AccessEntity>,
        level: TrustLevel,
    ) -> Result<Arc<Self>> {
        if matches!(level, TrustLevel::Creator | TrustLevel::Public) {
            return Err(CoreError::InvalidTrustLevel(level.as_byte()).into());
        }
        if !parent.trust_level().is_at_least(TrustLevel::Contributor) {
            return Err(EntityError::InsufficientTrust {
                required: TrustLevel::Contributor,
                held: parent.trust_level(),
            });
        }

        let child_signing = child
            .signing_keypair()
            .ok_or(EntityError::MissingKey("child signing key"))?;
        let child_public = child
            .public_key()
            .await?
            .ok_or(EntityError::MissingKey("child public key"))?;
        let parent_public = parent
            .public_key()
            .await?
            .ok_or(EntityError::MissingKey("parent public key"))?;
        // A child not yet keyed gets a throwaway bundle key; give_access
        // repairs the grant once the real key is known.
        let child_access = match child.access_key().await? {
            Some(access) => access,
            None => SymmetricKey::generate(),
        };

        let creator_account = parent.association().unwrap_or(parent);
        let creator_signer = creator_account
            .signing_keypair()
            .ok_or(EntityError::MissingKey("creator signing key"))?;
        let creator_id = creator_account.id();

        let key = SymmetricKey::generate();
        let time = now_millis();

        let columns: Vec<(&'static str, Value)> = vec![
            (
                "creationtime",
                Value::Bytes(key.encrypt(&time.to_le_bytes())?),
            ),
            (
                "creator",
                Value::Bytes(key.encrypt(&creator_id.to_le_bytes())?),
            ),
            (
                "creatorverification",
                Value::Bytes(creator_signer.sign(&EntityCore::creator_binding(creator_id, time))?),
            ),
            (
                "child",
                Value::Bytes(key.encrypt(&child.id().to_le_bytes())?),
            ),
            (
                "childaccess",
                Value::Bytes(KeyEnvelope::seal(&child_public, &key)?.into_bytes()),
            ),
            (
                "childhash",
                Value::Bytes(child.core().hash_or_public().as_bytes().to_vec()),
            ),
            (
                "parent",
                Value::Bytes(key.encrypt(&parent.id().to_le_bytes())?),
            ),
            (
                "parentaccess",
                Value::Bytes(KeyEnvelope::seal(&parent_public, &key)?.into_bytes()),
            ),
            (
                "parenthash",
                Value::Bytes(parent.core().hash_or_public().as_bytes().to_vec()),
            ),
            (
                "privateaccess",
                Value::Bytes(SecretBundle::seal(
                    level,
                    &child_access,
                    child.decryption_keypair(),
                    child.signing_keypair(),
                    &key,
                )?),
            ),
            ("type", Value::Bytes(key.encrypt(&[level.as_byte()])?)),
            (
                "parentverification",
                Value::Bytes(child_signing.sign(&Self::parent_binding(parent.id(), level))?),
            ),
        ];

        let rows = pipeline
            .fetch(Statement::new(format!("create{}", tag.name()), columns))
            .await?;
        let id = rows
            .first()
            .and_then(|row| row.bigint(0))
            .ok_or(EntityError::NotPersisted)?;

        let core = EntityCore::new(pipeline.clone(), tag, EntityId::new(id), Some(key));
        core.set_creation_time(time);
        core.set_creator(creator_id);

        Ok(Arc::new(Self {
            core,
            level: Mutex::new(Some(level)),
            child_id: Mutex::new(Some(child.id())),
            parent_id: Mutex::new(Some(parent.id())),
            parent_verification: Mutex::new(Verification::Unchecked),
        }))
    }

    /// Bind an existing link row. No I/O; the link key is recovered from
    /// an envelope on first [`LinkEntity::access_via`].
    pub fn open(pipeline: Pipeline, tag: TypeTag, id: EntityId) -> Self {
        Self {
            core: EntityCore::new(pipeline, tag, id, None),
            level: Mutex::new(None),
            child_id: Mutex::new(None),
            parent_id: Mutex::new(None),
            parent_verification: Mutex::new(Verification::Unchecked),
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

    fn pipeline(&self) -> &Pipeline {
        self.core.pipeline()
    }

    /// Recover the link key with whichever private key the holder has.
    ///
    /// The access getter returns both envelopes; either side's decryption
    /// key opens its own. An envelope that will not open for this keypair
    /// is not an error, just not ours.
    pub async fn access_via(&self, keypair: &Keypair) -> Result<Option<SymmetricKey>> {
        if let Some(key) = self.core.cached_access() {
            return Ok(Some(key));
        }
        let rows = self
            .pipeline()
            .fetch(self.core.by_id_statement("get", "access"))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        for index in [0, 1] {
            let Some(envelope) = row.bytes(index) else {
                continue;
            };
            if let Ok(key) = KeyEnvelope::from_bytes(envelope.to_vec()).open(keypair) {
                self.core.set_access(key.clone());
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    pub fn cached_level(&self) -> Option<TrustLevel> {
        *self.level.lock().unwrap()
    }

    /// The granted trust level, decrypted from the stored type byte.
    pub async fn level(&self) -> Result<Option<TrustLevel>> {
        if let Some(level) = self.cached_level() {
            return Ok(Some(level));
        }
        let Some(ciphertext) = self.core.fetch_column("get", "type").await? else {
            return Ok(None);
        };
        let plaintext = self.core.decrypt(&ciphertext)?;
        let byte = *plaintext.first().ok_or(EntityError::MalformedField {
            field: "type",
            reason: "empty plaintext".into(),
        })?;
        let level = TrustLevel::from_byte(byte)?;
        *self.level.lock().unwrap() = Some(level);
        Ok(Some(level))
    }

    pub fn cached_parent_id(&self) -> Option<EntityId> {
        *self.parent_id.lock().unwrap()
    }

    /// The parent's id, decrypted under the link key.
    pub async fn parent_id(&self) -> Result<Option<EntityId>> {
        if let Some(id) = self.cached_parent_id() {
            return Ok(Some(id));
        }
        let Some(ciphertext) = self.core.fetch_column("get", "parent").await? else {
            return Ok(None);
        };
        let id = EntityCore::decode_i64("parent", &self.core.decrypt(&ciphertext)?)?;
        let parent = EntityId::new(id);
        *self.parent_id.lock().unwrap() = Some(parent);
        Ok(Some(parent))
    }

    pub fn cached_child_id(&self) -> Option<EntityId> {
        *self.child_id.lock().unwrap()
    }

    /// Resolve the granted child at the stored level.
    ///
    /// The four-way constructor selection: a stored child hash equal to
    /// the child's public hash means the grant predates key exchange and
    /// only a public hold is possible; otherwise the bundle is decoded at
    /// the granted level and the matching constructor runs.
    pub async fn child(
        &self,
        child_tag: TypeTag,
        association: Option<Arc<AccessEntity>>,
    ) -> Result<Option<LinkedChild>> {
        let Some(level) = self.level().await? else {
            return Ok(None);
        };
        let rows = self
            .pipeline()
            .fetch(self.core.by_id_statement("get", "child"))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let (Some(child_cell), Some(stored_hash), Some(bundle)) =
            (row.bytes(0), row.bytes(1), row.bytes(2))
        else {
            return Ok(None);
        };

        let child_id =
            EntityId::new(EntityCore::decode_i64("child", &self.core.decrypt(child_cell)?)?);
        *self.child_id.lock().unwrap() = Some(child_id);

        let pipeline = self.pipeline().clone();
        if stored_hash == public_hash(child_tag, child_id).as_bytes() {
            return Ok(Some(LinkedChild::Public(AccessEntity::public(
                pipeline,
                child_tag,
                child_id,
                association,
            ))));
        }

        let key = self
            .core
            .cached_access()
            .ok_or(EntityError::MissingKey("link key"))?;
        let secrets = SecretBundle::open(level, &key, bundle)?;
        let entity =
            AccessEntity::from_secrets(pipeline, child_tag, child_id, association, secrets)?;
        Ok(Some(LinkedChild::Keyed(entity)))
    }

    /// Refresh the grant from an Administrator hold of the child.
    ///
    /// Rebuilds the bundle and the authenticated child hash against the
    /// established link key at the stored level, so the grant can never be
    /// raised after the fact, and re-signs the parent binding.
    pub async fn give_access(&self, child: &AccessEntity) -> Result<()> {
        let child_signing = child
            .signing_keypair()
            .ok_or(EntityError::MissingKey("child signing key"))?;
        let child_access = child
            .access_key()
            .await?
            .ok_or(EntityError::MissingKey("child access key"))?;
        let child_hash = child
            .core()
            .hash()
            .ok_or(EntityError::MissingKey("child hash"))?;
        let key = self
            .core
            .cached_access()
            .ok_or(EntityError::MissingKey("link key"))?;
        let level = self
            .level()
            .await?
            .ok_or(EntityError::MissingKey("link level"))?;
        let parent = self
            .parent_id()
            .await?
            .ok_or(EntityError::MissingKey("parent id"))?;

        let statement = Statement::new(
            format!("giveaccess{}", self.tag().name()),
            vec![
                ("id", Value::BigInt(self.id().get())),
                ("childhash", Value::Bytes(child_hash.as_bytes().to_vec())),
                (
                    "privateaccess",
                    Value::Bytes(SecretBundle::seal(
                        level,
                        &child_access,
                        child.decryption_keypair(),
                        child.signing_keypair(),
                        &key,
                    )?),
                ),
                (
                    "parentverification",
                    Value::Bytes(child_signing.sign(&Self::parent_binding(parent, level))?),
                ),
            ],
        );
        self.pipeline().fetch(statement).await?;
        Ok(())
    }

    /// Validate the stored grant endorsement against the child's public
    /// signing key.
    pub async fn verify_parent(&self, child_signer: &PublicKey) -> Result<Verification> {
        let (Some(parent), Some(level)) = (self.parent_id().await?, self.level().await?) else {
            return Ok(*self.parent_verification.lock().unwrap());
        };
        self.core
            .verify_field(
                "parent",
                &Self::parent_binding(parent, level),
                child_signer,
                &self.parent_verification,
            )
            .await
    }

    pub async fn remove(&self) -> Result<()> {
        self.core.remove().await
    }

    /// The grant endorsement signature input: `parent_id_le || level`.
    fn parent_binding(parent: EntityId, level: TrustLevel) -> Vec<u8> {
        let mut message = Vec::with_capacity(9);
        message.extend_from_slice(&parent.to_le_bytes());
        message.push(level.as_byte());
        message
    }
}

impl std::fmt::Debug for LinkEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .field("level", &self.cached_level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilstore_core::CryptoParams;
    use veilstore_pipeline::MemoryBackend;

    const ACCOUNT: TypeTag = TypeTag::new("account");
    const PLANNER: TypeTag = TypeTag::new("planner");
    const LINK: TypeTag = TypeTag::new("planneraccountlink");

    fn params() -> CryptoParams {
        CryptoParams::new(1024)
    }

    async fn fixture() -> (Pipeline, Arc<AccessEntity>, Arc<AccessEntity>, Arc<AccessEntity>) {
        let pipeline = Pipeline::new(Arc::new(MemoryBackend::with_tags(&[
            "account",
            "planner",
            "planneraccountlink",
        ])));
        let alice = AccessEntity::create(&pipeline, ACCOUNT, "alice", None, &params())
            .await
            .unwrap();
        let planner = AccessEntity::create(&pipeline, PLANNER, "plans", Some(&alice), &params())
            .await
            .unwrap();
        let bob = AccessEntity::create(&pipeline, ACCOUNT, "bob", None, &params())
            .await
            .unwrap();
        (pipeline, alice, planner, bob)
    }

    #[tokio::test]
    async fn test_grant_observator_yields_key_but_no_keypair() {
        let (pipeline, _alice, planner, bob) = fixture().await;
        let link = LinkEntity::create(&pipeline, LINK, &planner, &bob, TrustLevel::Observator)
            .await
            .unwrap();

        // Bob reopens the link cold with his own decryption key.
        let reopened = LinkEntity::open(pipeline, LINK, link.id());
        let key = reopened
            .access_via(bob.decryption_keypair().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(key), link.core().cached_access());

        assert_eq!(
            reopened.level().await.unwrap(),
            Some(TrustLevel::Observator)
        );
        let child = reopened
            .child(PLANNER, Some(Arc::clone(&bob)))
            .await
            .unwrap()
            .unwrap()
            .into_entity();

        assert_eq!(child.trust_level(), TrustLevel::Observator);
        assert_eq!(child.id(), planner.id());
        // The symmetric key arrived, the private keys did not.
        assert_eq!(child.cached_access(), planner.cached_access());
        assert!(child.decryption_keypair().is_none());
        assert!(child.signing_keypair().is_none());
    }

    #[tokio::test]
    async fn test_grant_administrator_restores_full_hold() {
        let (pipeline, _alice, planner, bob) = fixture().await;
        let link = LinkEntity::create(&pipeline, LINK, &planner, &bob, TrustLevel::Administrator)
            .await
            .unwrap();

        let reopened = LinkEntity::open(pipeline, LINK, link.id());
        reopened
            .access_via(bob.decryption_keypair().unwrap())
            .await
            .unwrap()
            .unwrap();
        let child = reopened
            .child(PLANNER, Some(Arc::clone(&bob)))
            .await
            .unwrap()
            .unwrap()
            .into_entity();

        assert_eq!(child.trust_level(), TrustLevel::Administrator);
        // The restored decryption key opens the planner's own envelope.
        let access = child.access_key().await.unwrap().unwrap();
        assert_eq!(Some(access), planner.cached_access());
        assert!(child.signing_keypair().is_some());
    }

    #[tokio::test]
    async fn test_give_access_never_raises_level() {
        let (pipeline, _alice, planner, bob) = fixture().await;
        let link = LinkEntity::create(&pipeline, LINK, &planner, &bob, TrustLevel::Observator)
            .await
            .unwrap();

        // Administrator-held child redistributes; the stored level stays.
        link.give_access(&planner).await.unwrap();

        let reopened = LinkEntity::open(pipeline, LINK, link.id());
        reopened
            .access_via(bob.decryption_keypair().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reopened.level().await.unwrap(),
            Some(TrustLevel::Observator)
        );
        let child = reopened
            .child(PLANNER, None)
            .await
            .unwrap()
            .unwrap()
            .into_entity();
        assert_eq!(child.trust_level(), TrustLevel::Observator);
        assert!(child.decryption_keypair().is_none());
    }

    #[tokio::test]
    async fn test_verify_parent_binding() {
        let (pipeline, _alice, planner, bob) = fixture().await;
        let link = LinkEntity::create(&pipeline, LINK, &planner, &bob, TrustLevel::Contributor)
            .await
            .unwrap();

        let reopened = LinkEntity::open(pipeline, LINK, link.id());
        reopened
            .access_via(bob.decryption_keypair().unwrap())
            .await
            .unwrap()
            .unwrap();

        let child_signer = planner.public_signature().await.unwrap().unwrap();
        assert_eq!(
            reopened.verify_parent(&child_signer).await.unwrap(),
            Verification::Valid
        );
    }

    #[tokio::test]
    async fn test_relations_enumerate_from_both_ends() {
        let (_pipeline, _alice, planner, bob) = fixture().await;
        let link = LinkEntity::create(
            planner.pipeline(),
            LINK,
            &planner,
            &bob,
            TrustLevel::Observator,
        )
        .await
        .unwrap();

        assert_eq!(bob.load_children(LINK).await.unwrap(), vec![link.id()]);
        assert_eq!(planner.load_parents(LINK).await.unwrap(), vec![link.id()]);
    }

    #[tokio::test]
    async fn test_grant_rejects_unscopeable_levels() {
        let (pipeline, _alice, planner, bob) = fixture().await;
        for level in [TrustLevel::Creator, TrustLevel::Public] {
            assert!(
                LinkEntity::create(&pipeline, LINK, &planner, &bob, level)
                    .await
                    .is_err()
            );
        }
    }
}
