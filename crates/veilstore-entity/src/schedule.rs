//! Schedule, time and range entities: obfuscated timeline positions.
//!
//! A schedule mints two secret doubles at creation. Each time row under it
//! mints its own additive term, stored verbatim, and a transformed position
//! `pos = ticks / pm / (pa + row_pa)`, so recovering a real timestamp needs
//! the schedule secret and the row term together. The true tick count is
//! additionally stored AES-encrypted, with a signature binding it to the
//! modifier.

use std::sync::{Arc, Mutex};

use rand::Rng;
use veilstore_core::{
    CryptoParams, EntityId, PublicKey, SymmetricKey, TrustLevel, TypeTag, Verification,
};
use veilstore_pipeline::{Pipeline, Statement, Value};

use crate::access::AccessEntity;
use crate::data::DataEntity;
use crate::error::{EntityError, Result};
use crate::identity::EntityCore;

/// The range both schedule secrets and row terms are drawn from.
const TERM_BASE: f64 = 682_700.0;
const TERM_SPREAD: f64 = 1_000.0;

fn mint_term() -> f64 {
    TERM_BASE + rand::thread_rng().gen::<f64>() * TERM_SPREAD
}

fn transform(ticks: i64, schedule: (f64, f64), row_term: f64) -> f64 {
    ticks as f64 / schedule.1 / (schedule.0 + row_term)
}

/// The time binding signature input: `ticks_le || modifier_id_le ||
/// modification_time_le`.
fn time_binding(ticks: i64, modifier: EntityId, modification_time: i64) -> Vec<u8> {
    let mut message = Vec::with_capacity(24);
    message.extend_from_slice(&ticks.to_le_bytes());
    message.extend_from_slice(&modifier.to_le_bytes());
    message.extend_from_slice(&modification_time.to_le_bytes());
    message
}

fn decode_parameters(plaintext: &[u8]) -> Result<(f64, f64)> {
    if plaintext.len() != 16 {
        return Err(EntityError::MalformedField {
            field: "parameters",
            reason: format!("expected 16 bytes, got {}", plaintext.len()),
        });
    }
    let pa = f64::from_le_bytes(plaintext[..8].try_into().expect("slice is 8 bytes"));
    let pm = f64::from_le_bytes(plaintext[8..].try_into().expect("slice is 8 bytes"));
    Ok((pa, pm))
}

/// An access entity that anchors a timeline of obfuscated positions.
pub struct ScheduleEntity {
    entity: Arc<AccessEntity>,
    parameters: Mutex<Option<(f64, f64)>>,
}

impl ScheduleEntity {
    /// Mint and persist a schedule: an access entity plus the encrypted
    /// `parameters` column holding the two freshly drawn secrets.
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        name: &str,
        association: Option<&Arc<AccessEntity>>,
        params: &CryptoParams,
    ) -> Result<Arc<Self>> {
        let pa = mint_term();
        let pm = mint_term();
        let entity =
            AccessEntity::create_with(pipeline, tag, name, association, params, |access| {
                let mut plaintext = Vec::with_capacity(16);
                plaintext.extend_from_slice(&pa.to_le_bytes());
                plaintext.extend_from_slice(&pm.to_le_bytes());
                Ok(vec![("parameters", Value::Bytes(access.encrypt(&plaintext)?))])
            })
            .await?;
        Ok(Arc::new(Self {
            entity,
            parameters: Mutex::new(Some((pa, pm))),
        }))
    }

    /// Wrap an already held access entity as a schedule.
    pub fn from_entity(entity: Arc<AccessEntity>) -> Self {
        Self {
            entity,
            parameters: Mutex::new(None),
        }
    }

    pub fn entity(&self) -> &Arc<AccessEntity> {
        &self.entity
    }

    pub fn id(&self) -> EntityId {
        self.entity.id()
    }

    pub fn tag(&self) -> TypeTag {
        self.entity.tag()
    }

    pub fn cached_parameters(&self) -> Option<(f64, f64)> {
        *self.parameters.lock().unwrap()
    }

    /// The schedule secrets, readable at Contributor or better only.
    /// Below that the cached value is returned unchanged.
    pub async fn parameters(&self) -> Result<Option<(f64, f64)>> {
        if let Some(parameters) = self.cached_parameters() {
            return Ok(Some(parameters));
        }
        if !self.entity.trust_level().is_at_least(TrustLevel::Contributor) {
            return Ok(None);
        }
        if self.entity.access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.entity.core().fetch_column("get", "parameters").await?
        else {
            return Ok(None);
        };
        let parameters = decode_parameters(&self.entity.core().decrypt(&ciphertext)?)?;
        *self.parameters.lock().unwrap() = Some(parameters);
        Ok(Some(parameters))
    }

    /// Ids of time children whose reconstructed ticks fall in
    /// `[start_ticks, end_ticks]`, at most `count`, ascending.
    ///
    /// The predicate runs in the store: the schedule secrets travel with
    /// the query so the store can invert the position transform.
    pub async fn load_ranged(
        &self,
        child_tag: TypeTag,
        start_ticks: i64,
        end_ticks: i64,
        count: i32,
    ) -> Result<Vec<EntityId>> {
        let (pa, pm) = self
            .parameters()
            .await?
            .ok_or(EntityError::MissingKey("schedule parameters"))?;
        let statement = Statement::new(
            format!("load{}{}s", self.tag().name(), child_tag.name()),
            vec![
                (
                    "hash",
                    Value::Bytes(self.entity.core().hash_or_public().as_bytes().to_vec()),
                ),
                ("pa", Value::Double(pa)),
                ("pm", Value::Double(pm)),
                ("starttime", Value::BigInt(start_ticks)),
                ("endtime", Value::BigInt(end_ticks)),
                ("count", Value::Int(count)),
            ],
        );
        let rows = self.entity.pipeline().fetch(statement).await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.bigint(0))
            .map(EntityId::new)
            .collect())
    }
}

impl std::fmt::Debug for ScheduleEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .finish()
    }
}

/// A data entity positioned on a schedule's timeline.
pub struct TimeEntity {
    data: Arc<DataEntity>,
    schedule: (f64, f64),
    ticks: Mutex<Option<i64>>,
    time_verification: Mutex<Verification>,
}

impl TimeEntity {
    /// Persist a positioned data row in one insert.
    ///
    /// Needs the schedule secrets, so the creating hold must be at
    /// Contributor or better on the schedule.
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        schedule: &ScheduleEntity,
        name: &str,
        payload: &[u8],
        ticks: i64,
        modifier: &Arc<AccessEntity>,
    ) -> Result<Arc<Self>> {
        Self::create_with(
            pipeline,
            tag,
            schedule,
            name,
            payload,
            ticks,
            modifier,
            |_, _| Ok(Vec::new()),
        )
        .await
    }

    /// [`TimeEntity::create`] with extra columns (ranges append their end
    /// transform this way).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn create_with(
        pipeline: &Pipeline,
        tag: TypeTag,
        schedule: &ScheduleEntity,
        name: &str,
        payload: &[u8],
        ticks: i64,
        modifier: &Arc<AccessEntity>,
        extra: impl FnOnce(&SymmetricKey, i64) -> Result<Vec<(&'static str, Value)>>,
    ) -> Result<Arc<Self>> {
        let secrets = schedule
            .parameters()
            .await?
            .ok_or(EntityError::MissingKey("schedule parameters"))?;
        let parent_access = schedule
            .entity()
            .access_key()
            .await?
            .ok_or(EntityError::MissingKey("schedule access key"))?;
        let parent_hash = schedule
            .entity()
            .core()
            .hash()
            .ok_or(EntityError::MissingKey("schedule hash"))?;
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        let modifier_id = modifier.id();
        let row_term = mint_term();

        let data = DataEntity::create_with(
            pipeline,
            tag,
            &parent_access,
            parent_hash,
            name,
            payload,
            modifier,
            |access, time| {
                let mut columns = vec![
                    ("pa", Value::Double(row_term)),
                    ("pm", Value::Double(transform(ticks, secrets, row_term))),
                    ("time", Value::Bytes(access.encrypt(&ticks.to_le_bytes())?)),
                    (
                        "timeverification",
                        Value::Bytes(signer.sign(&time_binding(ticks, modifier_id, time))?),
                    ),
                ];
                columns.extend(extra(access, time)?);
                Ok(columns)
            },
        )
        .await?;

        Ok(Arc::new(Self {
            data,
            schedule: secrets,
            ticks: Mutex::new(Some(ticks)),
            time_verification: Mutex::new(Verification::Unchecked),
        }))
    }

    /// Bind an existing row through its schedule. No I/O beyond what the
    /// schedule itself needs for its secrets.
    pub async fn open(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        schedule: &ScheduleEntity,
    ) -> Result<Self> {
        let secrets = schedule
            .parameters()
            .await?
            .ok_or(EntityError::MissingKey("schedule parameters"))?;
        let parent_access = schedule
            .entity()
            .access_key()
            .await?
            .ok_or(EntityError::MissingKey("schedule access key"))?;
        let parent_hash = schedule
            .entity()
            .core()
            .hash()
            .ok_or(EntityError::MissingKey("schedule hash"))?;
        Ok(Self {
            data: Arc::new(DataEntity::open(
                pipeline,
                tag,
                id,
                parent_access,
                parent_hash,
            )),
            schedule: secrets,
            ticks: Mutex::new(None),
            time_verification: Mutex::new(Verification::Unchecked),
        })
    }

    pub fn data_entity(&self) -> &Arc<DataEntity> {
        &self.data
    }

    pub fn id(&self) -> EntityId {
        self.data.id()
    }

    pub fn tag(&self) -> TypeTag {
        self.data.tag()
    }

    pub(crate) fn core(&self) -> &EntityCore {
        self.data.core()
    }

    pub(crate) fn schedule_secrets(&self) -> (f64, f64) {
        self.schedule
    }

    pub fn cached_time(&self) -> Option<i64> {
        *self.ticks.lock().unwrap()
    }

    /// The true tick count, decrypted from the `time` column.
    pub async fn time(&self) -> Result<Option<i64>> {
        if let Some(ticks) = self.cached_time() {
            return Ok(Some(ticks));
        }
        if self.data.access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.core().fetch_column("get", "time").await? else {
            return Ok(None);
        };
        let ticks = EntityCore::decode_i64("time", &self.core().decrypt(&ciphertext)?)?;
        *self.ticks.lock().unwrap() = Some(ticks);
        Ok(Some(ticks))
    }

    /// Move the row on the timeline.
    ///
    /// Re-saves the payload first so time and payload share one modifier
    /// stamp, then updates the position with a fresh row term.
    pub async fn save_time(&self, ticks: i64, modifier: &Arc<AccessEntity>) -> Result<()> {
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        let payload = self
            .data
            .data()
            .await?
            .ok_or(EntityError::MissingKey("data"))?;
        self.data.save_data(&payload, modifier).await?;
        let modification_time = self
            .data
            .cached_modification_time()
            .ok_or(EntityError::MissingKey("modification time"))?;

        let row_term = mint_term();
        let statement = Statement::new(
            format!("save{}time", self.tag().name()),
            vec![
                ("id", Value::BigInt(self.id().get())),
                ("pa", Value::Double(row_term)),
                (
                    "pm",
                    Value::Double(transform(ticks, self.schedule, row_term)),
                ),
                (
                    "time",
                    Value::Bytes(self.core().encrypt(&ticks.to_le_bytes())?),
                ),
                (
                    "timeverification",
                    Value::Bytes(signer.sign(&time_binding(
                        ticks,
                        modifier.id(),
                        modification_time,
                    ))?),
                ),
            ],
        );
        self.core().pipeline().fetch(statement).await?;

        *self.ticks.lock().unwrap() = Some(ticks);
        *self.time_verification.lock().unwrap() = Verification::Unchecked;
        Ok(())
    }

    /// Validate the stored time binding against the modifier's public
    /// signing key.
    pub async fn verify_time(&self, signer: &PublicKey) -> Result<Verification> {
        let (Some(ticks), Some(modifier), Some(modification_time)) = (
            self.time().await?,
            self.data.modifier().await?,
            self.data.modification_time().await?,
        ) else {
            return Ok(*self.time_verification.lock().unwrap());
        };
        self.core()
            .verify_field(
                "time",
                &time_binding(ticks, modifier, modification_time),
                signer,
                &self.time_verification,
            )
            .await
    }

    pub async fn remove(&self) -> Result<()> {
        self.data.remove().await
    }
}

impl std::fmt::Debug for TimeEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .finish()
    }
}

/// A time entity with an independently transformed end position.
pub struct RangeEntity {
    start: Arc<TimeEntity>,
    end_ticks: Mutex<Option<i64>>,
    end_verification: Mutex<Verification>,
}

impl RangeEntity {
    /// Persist a spanning row in one insert: the start transform plus the
    /// end columns `pb`/`pn`/`endtime`/`endtimeverification`, the end
    /// position minted from its own row term.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pipeline: &Pipeline,
        tag: TypeTag,
        schedule: &ScheduleEntity,
        name: &str,
        payload: &[u8],
        start_ticks: i64,
        end_ticks: i64,
        modifier: &Arc<AccessEntity>,
    ) -> Result<Arc<Self>> {
        let secrets = schedule
            .parameters()
            .await?
            .ok_or(EntityError::MissingKey("schedule parameters"))?;
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        let modifier_id = modifier.id();
        let end_term = mint_term();

        let start = TimeEntity::create_with(
            pipeline,
            tag,
            schedule,
            name,
            payload,
            start_ticks,
            modifier,
            |access, time| {
                Ok(vec![
                    ("pb", Value::Double(end_term)),
                    ("pn", Value::Double(transform(end_ticks, secrets, end_term))),
                    (
                        "endtime",
                        Value::Bytes(access.encrypt(&end_ticks.to_le_bytes())?),
                    ),
                    (
                        "endtimeverification",
                        Value::Bytes(signer.sign(&time_binding(end_ticks, modifier_id, time))?),
                    ),
                ])
            },
        )
        .await?;

        Ok(Arc::new(Self {
            start,
            end_ticks: Mutex::new(Some(end_ticks)),
            end_verification: Mutex::new(Verification::Unchecked),
        }))
    }

    /// Bind an existing spanning row through its schedule.
    pub async fn open(
        pipeline: Pipeline,
        tag: TypeTag,
        id: EntityId,
        schedule: &ScheduleEntity,
    ) -> Result<Self> {
        Ok(Self {
            start: Arc::new(TimeEntity::open(pipeline, tag, id, schedule).await?),
            end_ticks: Mutex::new(None),
            end_verification: Mutex::new(Verification::Unchecked),
        })
    }

    /// The start position and everything else a time entity carries.
    pub fn start(&self) -> &Arc<TimeEntity> {
        &self.start
    }

    pub fn id(&self) -> EntityId {
        self.start.id()
    }

    pub fn tag(&self) -> TypeTag {
        self.start.tag()
    }

    pub fn cached_end_time(&self) -> Option<i64> {
        *self.end_ticks.lock().unwrap()
    }

    /// The true end tick count, decrypted from the `endtime` column.
    pub async fn end_time(&self) -> Result<Option<i64>> {
        if let Some(ticks) = self.cached_end_time() {
            return Ok(Some(ticks));
        }
        if self.start.data_entity().access_key().await?.is_none() {
            return Ok(None);
        }
        let Some(ciphertext) = self.start.core().fetch_column("get", "endtime").await? else {
            return Ok(None);
        };
        let ticks = EntityCore::decode_i64("endtime", &self.start.core().decrypt(&ciphertext)?)?;
        *self.end_ticks.lock().unwrap() = Some(ticks);
        Ok(Some(ticks))
    }

    /// Move the end of the span, re-saving the payload like
    /// [`TimeEntity::save_time`] does.
    pub async fn save_end_time(&self, ticks: i64, modifier: &Arc<AccessEntity>) -> Result<()> {
        let signer = modifier
            .signing_keypair()
            .ok_or(EntityError::MissingKey("modifier signing key"))?;
        let data = self.start.data_entity();
        let payload = data.data().await?.ok_or(EntityError::MissingKey("data"))?;
        data.save_data(&payload, modifier).await?;
        let modification_time = data
            .cached_modification_time()
            .ok_or(EntityError::MissingKey("modification time"))?;

        let end_term = mint_term();
        let statement = Statement::new(
            format!("save{}endtime", self.tag().name()),
            vec![
                ("id", Value::BigInt(self.id().get())),
                ("pb", Value::Double(end_term)),
                (
                    "pn",
                    Value::Double(transform(ticks, self.start.schedule_secrets(), end_term)),
                ),
                (
                    "endtime",
                    Value::Bytes(self.start.core().encrypt(&ticks.to_le_bytes())?),
                ),
                (
                    "endtimeverification",
                    Value::Bytes(signer.sign(&time_binding(
                        ticks,
                        modifier.id(),
                        modification_time,
                    ))?),
                ),
            ],
        );
        self.start.core().pipeline().fetch(statement).await?;

        *self.end_ticks.lock().unwrap() = Some(ticks);
        *self.end_verification.lock().unwrap() = Verification::Unchecked;
        Ok(())
    }

    /// Validate the stored end binding against the modifier's public
    /// signing key.
    pub async fn verify_end_time(&self, signer: &PublicKey) -> Result<Verification> {
        let (Some(ticks), Some(modifier), Some(modification_time)) = (
            self.end_time().await?,
            self.start.data_entity().modifier().await?,
            self.start.data_entity().modification_time().await?,
        ) else {
            return Ok(*self.end_verification.lock().unwrap());
        };
        self.start
            .core()
            .verify_field(
                "endtime",
                &time_binding(ticks, modifier, modification_time),
                signer,
                &self.end_verification,
            )
            .await
    }

    pub async fn remove(&self) -> Result<()> {
        self.start.remove().await
    }
}

impl std::fmt::Debug for RangeEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeEntity")
            .field("tag", &self.tag())
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilstore_pipeline::MemoryBackend;

    const ACCOUNT: TypeTag = TypeTag::new("account");
    const PLANNER: TypeTag = TypeTag::new("planner");
    const APPOINTMENT: TypeTag = TypeTag::new("appointment");

    const HOUR: i64 = 3_600_000;

    async fn fixture() -> (Pipeline, Arc<AccessEntity>, Arc<ScheduleEntity>) {
        let pipeline = Pipeline::new(Arc::new(MemoryBackend::with_tags(&[
            "account",
            "planner",
            "appointment",
        ])));
        let account = AccessEntity::create(
            &pipeline,
            ACCOUNT,
            "owner",
            None,
            &CryptoParams::new(1024),
        )
        .await
        .unwrap();
        let planner = ScheduleEntity::create(
            &pipeline,
            PLANNER,
            "week",
            Some(&account),
            &CryptoParams::new(1024),
        )
        .await
        .unwrap();
        (pipeline, account, planner)
    }

    #[tokio::test]
    async fn test_parameters_minted_in_range_and_recoverable() {
        let (pipeline, _account, planner) = fixture().await;
        let (pa, pm) = planner.cached_parameters().unwrap();
        assert!((TERM_BASE..TERM_BASE + TERM_SPREAD).contains(&pa));
        assert!((TERM_BASE..TERM_BASE + TERM_SPREAD).contains(&pm));

        // A contributor hold recovers the same pair through the column.
        let der = planner
            .entity()
            .decryption_keypair()
            .unwrap()
            .to_pkcs1_der()
            .unwrap();
        let handle = ScheduleEntity::from_entity(Arc::new(
            AccessEntity::contributor(pipeline, PLANNER, planner.id(), None, &der).unwrap(),
        ));
        assert_eq!(handle.parameters().await.unwrap(), Some((pa, pm)));
    }

    #[tokio::test]
    async fn test_parameters_withheld_below_contributor() {
        let (pipeline, _account, planner) = fixture().await;
        let key = planner.entity().cached_access().unwrap();

        // An observator holds the key but not the clearance.
        let handle = ScheduleEntity::from_entity(Arc::new(AccessEntity::observator(
            pipeline,
            PLANNER,
            planner.id(),
            None,
            key,
        )));
        assert_eq!(handle.parameters().await.unwrap(), None);
        assert!(handle.load_ranged(APPOINTMENT, 0, i64::MAX, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_time_roundtrip_and_verification() {
        let (pipeline, account, planner) = fixture().await;
        let meeting = TimeEntity::create(
            &pipeline,
            APPOINTMENT,
            &planner,
            "standup",
            b"daily",
            42 * HOUR,
            &account,
        )
        .await
        .unwrap();
        assert_eq!(meeting.cached_time(), Some(42 * HOUR));

        let reopened = TimeEntity::open(pipeline, APPOINTMENT, meeting.id(), &planner)
            .await
            .unwrap();
        assert_eq!(reopened.time().await.unwrap(), Some(42 * HOUR));
        assert_eq!(
            reopened.data_entity().data().await.unwrap(),
            Some(b"daily".to_vec())
        );

        let signer = account.public_signature().await.unwrap().unwrap();
        assert_eq!(
            reopened.verify_time(&signer).await.unwrap(),
            Verification::Valid
        );
    }

    #[tokio::test]
    async fn test_save_time_restamps_payload_and_position() {
        let (pipeline, account, planner) = fixture().await;
        let meeting = TimeEntity::create(
            &pipeline,
            APPOINTMENT,
            &planner,
            "standup",
            b"daily",
            10 * HOUR,
            &account,
        )
        .await
        .unwrap();
        meeting.save_time(20 * HOUR, &account).await.unwrap();

        let reopened = TimeEntity::open(pipeline, APPOINTMENT, meeting.id(), &planner)
            .await
            .unwrap();
        assert_eq!(reopened.time().await.unwrap(), Some(20 * HOUR));
        // The payload survived the re-save.
        assert_eq!(
            reopened.data_entity().data().await.unwrap(),
            Some(b"daily".to_vec())
        );

        let signer = account.public_signature().await.unwrap().unwrap();
        assert_eq!(
            reopened.verify_time(&signer).await.unwrap(),
            Verification::Valid
        );
    }

    #[tokio::test]
    async fn test_ranged_load_filters_by_window() {
        let (pipeline, account, planner) = fixture().await;

        let early = TimeEntity::create(
            &pipeline,
            APPOINTMENT,
            &planner,
            "early",
            b"a",
            10 * HOUR,
            &account,
        )
        .await
        .unwrap();
        let late = TimeEntity::create(
            &pipeline,
            APPOINTMENT,
            &planner,
            "late",
            b"b",
            1000 * HOUR,
            &account,
        )
        .await
        .unwrap();

        let window = planner
            .load_ranged(APPOINTMENT, 0, 100 * HOUR, 10)
            .await
            .unwrap();
        assert_eq!(window, vec![early.id()]);

        let all = planner
            .load_ranged(APPOINTMENT, 0, 2000 * HOUR, 10)
            .await
            .unwrap();
        assert_eq!(all, vec![early.id(), late.id()]);
    }

    #[tokio::test]
    async fn test_range_end_transform_is_independent() {
        let (pipeline, account, planner) = fixture().await;
        let stay = RangeEntity::create(
            &pipeline,
            APPOINTMENT,
            &planner,
            "holiday",
            b"coast",
            100 * HOUR,
            200 * HOUR,
            &account,
        )
        .await
        .unwrap();

        let reopened = RangeEntity::open(pipeline, APPOINTMENT, stay.id(), &planner)
            .await
            .unwrap();
        assert_eq!(reopened.start().time().await.unwrap(), Some(100 * HOUR));
        assert_eq!(reopened.end_time().await.unwrap(), Some(200 * HOUR));

        let signer = account.public_signature().await.unwrap().unwrap();
        assert_eq!(
            reopened.verify_end_time(&signer).await.unwrap(),
            Verification::Valid
        );

        reopened.save_end_time(300 * HOUR, &account).await.unwrap();
        assert_eq!(reopened.end_time().await.unwrap(), Some(300 * HOUR));
    }
}
