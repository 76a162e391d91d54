//! PostgreSQL repository tests.
//!
//! Run with: `cargo test -p oxide-tests --test database_tests --features integration`

#![cfg(feature = "integration")]

use oxide_bus::{ChangeBus, ChangeDispatcher};
use oxide_core::buildset::{BuildResult, NewBuildset, NewSourceStamp, Patch, Properties};
use oxide_core::ports::ChangeSink;
use oxide_core::{BuildsetId, ChangeId, Error};
use oxide_scheduler::{ImmediateScheduler, SchedulerConfig};
use oxide_tests::{ChangeFixture, context::TestContext};
use serde_json::json;

#[tokio::test]
async fn test_change_roundtrip() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let changes = ctx.db.changes();

    let mut new = ChangeFixture::touching("abc123", &["src/a.rs", "docs/b.md"]);
    new.when = chrono::DateTime::from_timestamp(1_273_258_009, 0);
    let stored = changes.add(&new).await.expect("Failed to add change");

    let found = changes
        .get(stored.changeid)
        .await
        .expect("Failed to get change")
        .expect("Change not found");
    assert_eq!(found, stored);
    assert_eq!(found.files, vec!["src/a.rs", "docs/b.md"]);

    assert!(changes.get(ChangeId::new(9999)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_recent_changes_newest_first() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let changes = ctx.db.changes();

    for rev in ["one", "two", "three"] {
        changes.add(&ChangeFixture::simple(rev)).await.unwrap();
    }

    let recent = changes.recent(2).await.unwrap();
    let revisions: Vec<_> = recent.iter().map(|c| c.revision.as_str()).collect();
    assert_eq!(revisions, vec!["three", "two"]);
    assert!(recent[0].changeid > recent[1].changeid);
}

#[tokio::test]
async fn test_sourcestamp_roundtrip() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let changes = ctx.db.changes();
    let a = changes.add(&ChangeFixture::simple("a")).await.unwrap();
    let b = changes.add(&ChangeFixture::simple("b")).await.unwrap();

    let sourcestamps = ctx.db.sourcestamps();
    let ssid = sourcestamps
        .add(&NewSourceStamp {
            branch: Some("master".to_string()),
            revision: Some("b".to_string()),
            repository: "repo".to_string(),
            project: "proj".to_string(),
            patch: Some(Patch {
                level: 1,
                body: "diff".to_string(),
                subdir: None,
            }),
            changeids: vec![a.changeid, b.changeid],
        })
        .await
        .unwrap();

    let ss = sourcestamps.get(ssid).await.unwrap().unwrap();
    assert_eq!(ss.revision.as_deref(), Some("b"));
    assert_eq!(ss.changeids, vec![a.changeid, b.changeid]);
    assert_eq!(ss.patch.map(|p| p.level), Some(1));
}

#[tokio::test]
async fn test_buildset_with_requests_and_completion() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let ssid = ctx
        .db
        .sourcestamps()
        .add(&NewSourceStamp::default())
        .await
        .unwrap();

    let buildsets = ctx.db.buildsets();
    let properties = Properties::new()
        .with("scheduler", "s", "Scheduler")
        .with("scheduler", "mine", "TEST");
    let bsid = buildsets
        .add(&NewBuildset {
            sourcestampid: ssid,
            reason: "because".to_string(),
            builder_names: vec!["x".to_string(), "y".to_string()],
            external_idstring: Some("ext".to_string()),
            properties: properties.clone(),
        })
        .await
        .unwrap();

    let bs = buildsets.get(bsid).await.unwrap().unwrap();
    assert_eq!(bs.builder_names, vec!["x", "y"]);
    assert_eq!(bs.properties, properties);
    assert!(!bs.complete);

    buildsets.complete(bsid, BuildResult::Warnings).await.unwrap();
    let err = buildsets
        .complete(bsid, BuildResult::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BuildsetAlreadyComplete(_)));

    let err = buildsets
        .complete(BuildsetId::new(9999), BuildResult::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BuildsetNotFound(_)));

    let bs = buildsets.get(bsid).await.unwrap().unwrap();
    assert_eq!(bs.results, Some(BuildResult::Warnings));
}

#[tokio::test]
async fn test_buildset_for_missing_sourcestamp_rolls_back() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let result = ctx
        .db
        .buildsets()
        .add(&NewBuildset {
            sourcestampid: oxide_core::SourceStampId::new(4242),
            reason: "r".to_string(),
            builder_names: vec!["x".to_string()],
            external_idstring: None,
            properties: Properties::new(),
        })
        .await;
    assert!(matches!(result, Err(Error::Database(_))));
}

#[tokio::test]
async fn test_buildset_with_sourcestamp_is_atomic() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let change = ctx.db.changes().add(&ChangeFixture::simple("a")).await.unwrap();
    let buildset = NewBuildset {
        sourcestampid: oxide_core::SourceStampId::new(0),
        reason: "r".to_string(),
        builder_names: vec!["x".to_string()],
        external_idstring: None,
        properties: Properties::new(),
    };

    let failed = ctx
        .db
        .buildsets()
        .add_with_sourcestamp(
            &NewSourceStamp {
                changeids: vec![ChangeId::new(9999)],
                ..Default::default()
            },
            &buildset,
        )
        .await;
    assert!(matches!(failed, Err(Error::Database(_))));
    // Fresh database: the rolled-back stamp took id 1.
    let orphan = ctx
        .db
        .sourcestamps()
        .get(oxide_core::SourceStampId::new(1))
        .await
        .unwrap();
    assert!(orphan.is_none());

    let (ssid, bsid) = ctx
        .db
        .buildsets()
        .add_with_sourcestamp(
            &NewSourceStamp {
                changeids: vec![change.changeid],
                ..Default::default()
            },
            &buildset,
        )
        .await
        .expect("Failed to add buildset");
    let stored = ctx.db.buildsets().get(bsid).await.unwrap().unwrap();
    assert_eq!(stored.sourcestampid, ssid);
    let stamp = ctx.db.sourcestamps().get(ssid).await.unwrap().unwrap();
    assert_eq!(stamp.changeids, vec![change.changeid]);
}

#[tokio::test]
async fn test_scheduler_state_upsert() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let state = ctx.db.scheduler_state();

    let id = state.scheduler_id("nightly", "ImmediateScheduler").await.unwrap();
    assert_eq!(
        state.scheduler_id("nightly", "ImmediateScheduler").await.unwrap(),
        id
    );

    assert_eq!(state.get_state(id, "fav_book").await.unwrap(), None);
    state.set_state(id, "fav_book", &json!("Shogun")).await.unwrap();
    state.set_state(id, "fav_book", &json!({"title": "Dune"})).await.unwrap();
    assert_eq!(
        state.get_state(id, "fav_book").await.unwrap(),
        Some(json!({"title": "Dune"}))
    );
}

#[tokio::test]
async fn test_immediate_scheduler_over_postgres() {
    let ctx = TestContext::new().await.expect("Failed to create context");
    let bus = ChangeBus::new();
    let services = ctx.services(bus.clone());

    let config: SchedulerConfig =
        serde_yaml::from_str("name: pg\nbuilder_names: [b]\nfile_patterns: [\"src/**\"]\n")
            .unwrap();
    let scheduler = ImmediateScheduler::from_config(&config, services.clone()).unwrap();
    scheduler.start().await.unwrap();

    let dispatcher = ChangeDispatcher::new(services.changes.clone(), bus);
    let docs = dispatcher
        .add_change(ChangeFixture::touching("d", &["README.md"]))
        .await
        .unwrap();
    let code = dispatcher
        .add_change(ChangeFixture::simple("c"))
        .await
        .unwrap();

    let buildsets = ctx.db.buildsets();
    let bs = buildsets
        .get(BuildsetId::new(1))
        .await
        .unwrap()
        .expect("buildset not created");
    assert!(buildsets.get(BuildsetId::new(2)).await.unwrap().is_none());

    let ss = services.sourcestamps.get(bs.sourcestampid).await.unwrap().unwrap();
    assert_eq!(ss.changeids, vec![docs.changeid, code.changeid]);
    assert!(scheduler.pending_changeids().await.unwrap().is_empty());
}
