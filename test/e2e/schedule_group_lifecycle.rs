//! End-to-end schedule group lifecycle.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p provis-e2e --test schedule_group_lifecycle
//! ```

use provis_reconcile::{DeleteOptions, DeleteOutcome, ReconcileError, Reconciler, UpdateOutcome};
use provis_resources::schedule_group::ScheduleGroupState;
use provis_resources::{ScheduleGroup, ScheduleGroupSpec};
use provis_testing::{fast_config, init_tracing, FakeRemote, Op};

#[tokio::test]
async fn tags_converge_and_delete_waits_for_deletion() {
    init_tracing();
    let fake = FakeRemote::<ScheduleGroup>::new().with_linger_reads(1);
    let reconciler: Reconciler<ScheduleGroup> = Reconciler::new(fast_config());
    let spec = ScheduleGroupSpec::new("nightly-jobs")
        .with_tag("env", "staging")
        .with_tag("owner", "platform");

    let created = reconciler.create(&fake, &spec).await.unwrap();
    assert!(created.warning.is_none());
    let mut group = created.resource;
    let handle = group.handle().cloned().unwrap();
    assert_eq!(handle.as_str(), "nightly-jobs");

    let desired = ScheduleGroupSpec::new("nightly-jobs")
        .with_tag("env", "prod")
        .with_tag("team", "ops");
    let outcome = reconciler.update(&fake, &mut group, &desired).await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            fields: vec!["tags".to_string()]
        }
    );

    let observed = reconciler.read(&fake, &mut group).await.unwrap().unwrap();
    assert_eq!(observed, desired);

    let unchanged = reconciler.update(&fake, &mut group, &desired).await.unwrap();
    assert_eq!(unchanged, UpdateOutcome::Unchanged);
    assert_eq!(fake.calls(Op::Update), 1);

    let opts = DeleteOptions {
        wait_for_deletion: true,
        ..DeleteOptions::default()
    };
    let outcome = reconciler.delete(&fake, &mut group, &opts).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(group.is_absent());

    // The lingering object was observed in its deleting state.
    assert_eq!(fake.object(&handle).unwrap().state, ScheduleGroupState::Deleting);
}

#[tokio::test]
async fn rename_is_rejected_without_calls() {
    init_tracing();
    let fake = FakeRemote::<ScheduleGroup>::new();
    let reconciler: Reconciler<ScheduleGroup> = Reconciler::new(fast_config());
    let mut group = reconciler
        .create(&fake, &ScheduleGroupSpec::new("nightly-jobs"))
        .await
        .unwrap()
        .resource;
    let calls = fake.total_calls();

    let err = reconciler
        .update(&fake, &mut group, &ScheduleGroupSpec::new("weekly-jobs"))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(fake.total_calls(), calls);
}

#[tokio::test]
async fn name_conflict_surfaces_as_api_error() {
    init_tracing();
    let fake = FakeRemote::<ScheduleGroup>::new();
    let reconciler: Reconciler<ScheduleGroup> = Reconciler::new(fast_config());
    let spec = ScheduleGroupSpec::new("nightly-jobs");

    reconciler.create(&fake, &spec).await.unwrap();
    let err = reconciler.create(&fake, &spec).await.unwrap_err();

    assert!(!err.is_retryable());
    assert!(matches!(
        &err,
        ReconcileError::Api { source, .. } if source.code() == Some("ConflictException")
    ));
    assert_eq!(fake.calls(Op::Create), 2);
}
