//! End-to-end scenarios across the entity layer.
//!
//! These run against the in-memory backend through the real pipeline, so
//! everything the store sees is ciphertext, hashes and signatures.

use std::sync::Arc;

use veilstore_core::{TrustLevel, Verification};
use veilstore_entity::{AccessEntity, DataEntity, LinkEntity, TimeEntity};
use veilstore_pipeline::{Statement, Value};
use veilstore_testkit::{TestFixture, APPOINTMENT, NOTE, PLANNER, PLANNER_LINK};

#[tokio::test]
async fn test_observator_grant_carries_key_but_no_keypairs() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let bob = fixture.account("bob").await;
    let planner = fixture.planner("week", &alice).await;

    let link = LinkEntity::create(
        &fixture.pipeline,
        PLANNER_LINK,
        planner.entity(),
        &bob,
        TrustLevel::Observator,
    )
    .await?;

    // Bob finds the grant from his own end and opens it cold.
    let grants = bob.load_children(PLANNER_LINK).await?;
    assert_eq!(grants, vec![link.id()]);

    let reopened = LinkEntity::open(fixture.pipeline.clone(), PLANNER_LINK, link.id());
    let keypair = bob.decryption_keypair().expect("creator holds keys");
    assert!(reopened.access_via(keypair).await?.is_some());

    let held = reopened
        .child(PLANNER, Some(Arc::clone(&bob)))
        .await?
        .expect("grant resolves")
        .into_entity();
    assert_eq!(held.trust_level(), TrustLevel::Observator);
    assert_eq!(held.cached_access(), planner.entity().cached_access());
    assert!(held.decryption_keypair().is_none());
    assert!(held.signing_keypair().is_none());
    Ok(())
}

#[tokio::test]
async fn test_grant_level_is_monotonic_across_redistribution() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let bob = fixture.account("bob").await;
    let planner = fixture.planner("week", &alice).await;

    let link = LinkEntity::create(
        &fixture.pipeline,
        PLANNER_LINK,
        planner.entity(),
        &bob,
        TrustLevel::Observator,
    )
    .await?;

    // Redistribution from a full hold reuses the stored level.
    link.give_access(planner.entity()).await?;

    let reopened = LinkEntity::open(fixture.pipeline.clone(), PLANNER_LINK, link.id());
    reopened
        .access_via(bob.decryption_keypair().expect("creator holds keys"))
        .await?;
    assert_eq!(reopened.level().await?, Some(TrustLevel::Observator));

    let held = reopened.child(PLANNER, None).await?.expect("grant resolves");
    let held = held.into_entity();
    assert_eq!(held.trust_level(), TrustLevel::Observator);
    assert!(held.decryption_keypair().is_none());
    Ok(())
}

#[tokio::test]
async fn test_data_versions_verify_against_latest_save() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let note = fixture.note(&alice, "draft", b"v1", &alice).await;

    note.save_data(b"v2", &alice).await?;

    let reopened = DataEntity::open(
        fixture.pipeline.clone(),
        NOTE,
        note.id(),
        alice.cached_access().expect("creator holds key"),
        alice.core().hash().expect("creator hash"),
    );
    assert_eq!(reopened.data().await?, Some(b"v2".to_vec()));

    let signer = alice.public_signature().await?.expect("public signature");
    assert_eq!(reopened.verify_data(&signer).await?, Verification::Valid);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_signature_reads_invalid_not_error() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let note = fixture.note(&alice, "draft", b"payload", &alice).await;

    // Clobber the stored signature directly, as a hostile store could.
    fixture
        .pipeline
        .fetch(Statement::new(
            "savenotedata",
            vec![
                ("id", Value::BigInt(note.id().get())),
                ("dataverification", Value::Bytes(vec![0u8; 128])),
            ],
        ))
        .await?;

    let reopened = DataEntity::open(
        fixture.pipeline.clone(),
        NOTE,
        note.id(),
        alice.cached_access().expect("creator holds key"),
        alice.core().hash().expect("creator hash"),
    );
    let signer = alice.public_signature().await?.expect("public signature");
    assert_eq!(reopened.verify_data(&signer).await?, Verification::Invalid);
    // The verdict is cached, not escalated.
    assert_eq!(reopened.verify_data(&signer).await?, Verification::Invalid);
    Ok(())
}

#[tokio::test]
async fn test_shared_name_flows_through_escrow() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let bob = fixture.account("bob").await;
    let planner = fixture.planner("family plans", &alice).await;

    planner.entity().deposit_name(&bob).await?;

    // Bob holds the planner publicly; only the escrow names it for him.
    let held = AccessEntity::public(
        fixture.pipeline.clone(),
        PLANNER,
        planner.id(),
        Some(Arc::clone(&bob)),
    );
    assert_eq!(held.name().await?, Some("family plans".to_string()));
    assert!(held.cached_access().is_none());
    Ok(())
}

#[tokio::test]
async fn test_timeline_window_filters_appointments() -> anyhow::Result<()> {
    let fixture = TestFixture::new();
    let alice = fixture.account("alice").await;
    let planner = fixture.planner("week", &alice).await;

    const HOUR: i64 = 3_600_000;
    let meeting = TimeEntity::create(
        &fixture.pipeline,
        APPOINTMENT,
        &planner,
        "standup",
        b"notes",
        9 * HOUR,
        &alice,
    )
    .await?;
    let lunch = TimeEntity::create(
        &fixture.pipeline,
        APPOINTMENT,
        &planner,
        "lunch",
        b"soup",
        13 * HOUR,
        &alice,
    )
    .await?;

    let morning = planner.load_ranged(APPOINTMENT, 0, 12 * HOUR, 10).await?;
    assert_eq!(morning, vec![meeting.id()]);

    let day = planner.load_ranged(APPOINTMENT, 0, 24 * HOUR, 10).await?;
    assert_eq!(day, vec![meeting.id(), lunch.id()]);
    Ok(())
}
