//! End-to-end: scripted remote -> poller -> change bus -> schedulers ->
//! buildsets, over the in-memory database.

use oxide_core::buildset::Properties;
use oxide_core::{ChangeId, Error};
use oxide_poller::{CommitField, PollOutcome, PollerState};
use oxide_scheduler::immediate::PENDING_CHANGEIDS;
use oxide_scheduler::{BaseScheduler, FileIsImportant, ImmediateScheduler, SchedulerConfig};
use oxide_tests::{CommitFixture, Pipeline, buildset_changeids, change_revisions};
use serde_json::json;

const EVERYTHING: &str = "name: everything\nbuilder_names: [full]\n";

const CODE_ONLY: &str = r#"
name: code-only
builder_names: [linux, macos]
file_patterns: ["src/**", "Cargo.toml"]
"#;

#[tokio::test]
async fn test_clone_emits_nothing() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();

    let outcome = pipeline.poller.poll().await.unwrap();
    assert_eq!(outcome, PollOutcome::NoChanges);
    assert!(change_revisions(&pipeline.db).is_empty());
    assert_eq!(pipeline.mirror.head().as_deref(), Some("root"));
}

#[tokio::test]
async fn test_new_commits_become_one_buildset_each() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();
    pipeline.mirror.push(CommitFixture::new("a"));
    pipeline.mirror.push(CommitFixture::new("b"));
    pipeline.mirror.push(CommitFixture::new("c"));

    let outcome = pipeline.poller.poll().await.unwrap();
    assert_eq!(outcome, PollOutcome::Emitted(3));

    assert_eq!(change_revisions(&pipeline.db), vec!["a", "b", "c"]);
    assert_eq!(pipeline.mirror.head().as_deref(), Some("c"));
    assert_eq!(
        buildset_changeids(&pipeline.db).await,
        vec![
            vec![ChangeId::new(1)],
            vec![ChangeId::new(2)],
            vec![ChangeId::new(3)],
        ]
    );

    let changes = pipeline.db.all_changes();
    assert_eq!(changes[0].branch.as_deref(), Some("master"));
    assert_eq!(changes[0].who, "dev@example.com");
    assert!(changes[0].when.is_some());
    assert_eq!(changes[0].files, vec!["src/lib.rs"]);
}

#[tokio::test]
async fn test_repeat_poll_is_quiet() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();
    pipeline.mirror.push(CommitFixture::new("a"));

    assert_eq!(pipeline.poller.poll().await.unwrap(), PollOutcome::Emitted(1));
    assert_eq!(pipeline.poller.poll().await.unwrap(), PollOutcome::NoChanges);
    assert_eq!(change_revisions(&pipeline.db), vec!["a"]);
    assert_eq!(pipeline.db.all_buildsets().len(), 1);
}

#[tokio::test]
async fn test_unimportant_commits_join_next_build() {
    let pipeline = Pipeline::new(&[CODE_ONLY]).await.unwrap();
    pipeline
        .mirror
        .push(CommitFixture::new("docs").files(&["README.md"]));
    pipeline.poller.poll().await.unwrap();
    assert!(pipeline.db.all_buildsets().is_empty());

    pipeline
        .mirror
        .push(CommitFixture::new("code").files(&["src/main.rs"]));
    pipeline.poller.poll().await.unwrap();

    assert_eq!(
        buildset_changeids(&pipeline.db).await,
        vec![vec![ChangeId::new(1), ChangeId::new(2)]]
    );
    let buildset = &pipeline.db.all_buildsets()[0];
    assert_eq!(buildset.builder_names, vec!["linux", "macos"]);
    let requests = pipeline
        .db
        .buildsets()
        .build_requests(buildset.id)
        .await
        .unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_pending_changes_survive_restart() {
    let first = Pipeline::new(&[CODE_ONLY]).await.unwrap();
    first
        .mirror
        .push(CommitFixture::new("docs").files(&["docs/guide.md"]));
    first.poller.poll().await.unwrap();
    first.stop();

    assert_eq!(
        first.schedulers[0]
            .base()
            .get_state(PENDING_CHANGEIDS)
            .await
            .unwrap(),
        json!([1])
    );

    let second = Pipeline::with_db(first.db.clone(), &[CODE_ONLY]).await.unwrap();
    second
        .mirror
        .push(CommitFixture::new("code").files(&["Cargo.toml"]));
    second.poller.poll().await.unwrap();

    assert_eq!(
        buildset_changeids(&second.db).await,
        vec![vec![ChangeId::new(1), ChangeId::new(2)]]
    );
}

#[tokio::test]
async fn test_metadata_failure_emits_nothing_then_recovers() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();
    pipeline.mirror.push(CommitFixture::new("a"));
    pipeline.mirror.push(CommitFixture::new("b"));
    pipeline.mirror.break_field("b", CommitField::Message);

    let outcome = pipeline.poller.poll().await.unwrap();
    assert!(matches!(outcome, PollOutcome::Aborted(_)));
    assert_eq!(pipeline.poller.state(), PollerState::Aborted);
    assert!(change_revisions(&pipeline.db).is_empty());
    assert_eq!(pipeline.mirror.head().as_deref(), Some("root"));

    pipeline.mirror.repair_fields();
    let outcome = pipeline.poller.poll().await.unwrap();
    assert_eq!(outcome, PollOutcome::Emitted(2));
    assert_eq!(change_revisions(&pipeline.db), vec!["a", "b"]);
    assert_eq!(pipeline.poller.state(), PollerState::Idle);
}

#[tokio::test]
async fn test_fetch_failure_retries_next_cycle() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();
    pipeline.mirror.push(CommitFixture::new("a"));
    pipeline.mirror.fail_fetch(true);

    assert!(matches!(
        pipeline.poller.poll().await.unwrap(),
        PollOutcome::Aborted(_)
    ));
    assert!(change_revisions(&pipeline.db).is_empty());

    pipeline.mirror.fail_fetch(false);
    assert_eq!(pipeline.poller.poll().await.unwrap(), PollOutcome::Emitted(1));
}

#[tokio::test]
async fn test_catch_up_failure_stops_poller() {
    let pipeline = Pipeline::new(&[EVERYTHING]).await.unwrap();
    pipeline.mirror.push(CommitFixture::new("a"));
    pipeline.mirror.fail_reset(true);

    let err = pipeline.poller.poll().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(pipeline.poller.state(), PollerState::Fatal);
    assert!(pipeline.poller.describe().ends_with("[STOPPED - check log]"));

    // The change was emitted before catch-up failed.
    assert_eq!(change_revisions(&pipeline.db), vec!["a"]);

    pipeline.mirror.fail_reset(false);
    assert!(pipeline.poller.poll().await.is_err());
    assert_eq!(change_revisions(&pipeline.db), vec!["a"]);
}

#[tokio::test]
async fn test_two_schedulers_share_changes() {
    let pipeline = Pipeline::new(&[EVERYTHING, CODE_ONLY]).await.unwrap();
    pipeline
        .mirror
        .push(CommitFixture::new("docs").files(&["README.md"]));
    pipeline.poller.poll().await.unwrap();

    let buildsets = pipeline.db.all_buildsets();
    assert_eq!(buildsets.len(), 1);
    assert_eq!(buildsets[0].builder_names, vec!["full"]);
    assert_eq!(
        pipeline.schedulers[1].pending_changeids().await.unwrap(),
        vec![ChangeId::new(1)]
    );
    assert_eq!(pipeline.bus.metrics().snapshot().failed(), 0);
}

#[tokio::test]
async fn test_broken_importance_check_does_not_starve_other_schedulers() {
    let pipeline = Pipeline::new(&[]).await.unwrap();

    let with_check = |name: &str, check: FileIsImportant| {
        let base = BaseScheduler::new(
            name,
            ImmediateScheduler::CLASS_NAME,
            vec![format!("{}-builder", name)],
            Properties::new(),
            pipeline.services(),
        )
        .unwrap();
        ImmediateScheduler::new(base, Some(check), None)
    };
    let panicking = with_check(
        "panicking",
        FileIsImportant::predicate(|_| panic!("importance check blew up")),
    );
    let failing = with_check(
        "failing",
        FileIsImportant::predicate(|_| Err(Error::Internal("cannot decide".into()))),
    );
    panicking.start().await.unwrap();
    failing.start().await.unwrap();

    let config: SchedulerConfig = serde_yaml::from_str(EVERYTHING).unwrap();
    let healthy = ImmediateScheduler::from_config(&config, pipeline.services()).unwrap();
    healthy.start().await.unwrap();

    pipeline.mirror.push(CommitFixture::new("a"));
    assert_eq!(pipeline.poller.poll().await.unwrap(), PollOutcome::Emitted(1));

    let buildsets = pipeline.db.all_buildsets();
    assert_eq!(buildsets.len(), 1);
    assert_eq!(buildsets[0].builder_names, vec!["full"]);
    assert_eq!(buildset_changeids(&pipeline.db).await, vec![vec![ChangeId::new(1)]]);
    assert!(panicking.pending_changeids().await.unwrap().is_empty());
    assert!(failing.pending_changeids().await.unwrap().is_empty());
}
