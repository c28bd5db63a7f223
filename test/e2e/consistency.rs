//! Eventual consistency and failure handling against the in-memory
//! remote.
//!
//! Timeout scenarios run on paused tokio time with the default
//! reconciler budgets, so they finish instantly and deterministically.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p provis-e2e --test consistency
//! ```

use std::time::Duration;

use provis_reconcile::{
    ApiError, DeleteOptions, Phase, ReconcileError, ReconcileWarning, Reconciler,
    ReconcilerConfig,
};
use provis_resources::spot_fleet::ERR_INVALID_SPOT_FLEET_REQUEST_CONFIG;
use provis_resources::{LaunchSpecification, SpotFleet, SpotFleetRequestSpec};
use provis_testing::{fast_config, init_tracing, FakeRemote, Op};
use serde_json::json;
use tokio::time::Instant;

fn fleet_spec(capacity: i64) -> SpotFleetRequestSpec {
    SpotFleetRequestSpec::new("arn:aws:iam::123456789012:role/spot-fleet", capacity)
        .with_launch_specification(LaunchSpecification::new("ami-0abc1234", "c5.large"))
}

#[tokio::test]
async fn create_tolerates_delayed_visibility() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new().with_visibility_delay(3);
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let created = reconciler.create(&fake, &fleet_spec(2)).await.unwrap();
    let mut fleet = created.resource;

    assert!(created.warning.is_none());
    assert_eq!(fleet.phase(), Phase::Stable);
    assert_eq!(fake.calls(Op::Read), 4);

    let observed = reconciler.read(&fake, &mut fleet).await.unwrap();
    assert_eq!(observed.unwrap().target_capacity, 2);
}

#[tokio::test(start_paused = true)]
async fn read_of_fresh_handle_retries_not_found() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new().never_settle();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(ReconcilerConfig::default());

    let created = reconciler.create(&fake, &fleet_spec(2)).await.unwrap();
    assert!(created.warning.is_some());
    let mut fleet = created.resource;
    let handle = fleet.handle().cloned().unwrap();

    // Still inside the consistency window: not-found is lag, not removal.
    assert!(fake.hide_for(&handle, 3));
    let reads = fake.calls(Op::Read);
    let observed = reconciler.read(&fake, &mut fleet).await.unwrap();

    assert!(observed.is_some());
    assert_eq!(fleet.handle(), Some(&handle));
    assert_eq!(fake.calls(Op::Read), reads + 4);

    // Once read back, a not-found means the object is gone.
    assert!(fake.hide_for(&handle, 1));
    assert!(reconciler.read(&fake, &mut fleet).await.unwrap().is_none());
    assert!(fleet.is_absent());
}

#[tokio::test]
async fn lost_create_response_yields_one_object() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    fake.lose_next_create_response();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let created = reconciler.create(&fake, &fleet_spec(2)).await.unwrap();

    assert_eq!(fake.calls(Op::Create), 2);
    assert_eq!(fake.live_objects(), 1);
    assert_eq!(created.resource.handle().unwrap().as_str(), "sfr-1");
}

#[tokio::test]
async fn iam_role_propagation_is_retried() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    fake.fail_next(
        Op::Create,
        ApiError::rejected(
            ERR_INVALID_SPOT_FLEET_REQUEST_CONFIG,
            "Parameter: SpotFleetRequestConfig.IamFleetRole is invalid.",
        ),
    );
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let created = reconciler.create(&fake, &fleet_spec(2)).await.unwrap();

    assert!(created.resource.handle().is_some());
    assert_eq!(fake.calls(Op::Create), 2);
}

#[tokio::test]
async fn rejected_create_is_not_retried() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    fake.fail_next(
        Op::Create,
        ApiError::rejected("InvalidParameterValue", "unknown image ami-0abc1234"),
    );
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let err = reconciler.create(&fake, &fleet_spec(2)).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Api { handle: None, .. }));
    assert!(!err.is_retryable());
    assert_eq!(fake.calls(Op::Create), 1);
    assert_eq!(fake.live_objects(), 0);
}

#[tokio::test]
async fn transient_retries_are_bounded() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    for _ in 0..4 {
        fake.fail_next(Op::Create, ApiError::transient("RequestLimitExceeded", "slow down"));
    }
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let err = reconciler.create(&fake, &fleet_spec(2)).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Transient { attempts: 4, .. }));
    assert!(err.is_retryable());
    assert_eq!(fake.live_objects(), 0);
}

#[tokio::test]
async fn exhausted_update_retries_keep_handle_and_state() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = reconciler
        .create(&fake, &fleet_spec(2))
        .await
        .unwrap()
        .resource;
    let handle = fleet.handle().cloned().unwrap();
    for _ in 0..4 {
        fake.fail_next(Op::Update, ApiError::transient("Throttling", "rate exceeded"));
    }

    let err = reconciler
        .update(&fake, &mut fleet, &fleet_spec(4))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Transient { attempts: 4, .. }));
    assert!(err.to_string().contains("sfr-1"), "{err}");
    assert_eq!(err.handle(), Some(&handle));
    assert_eq!(err.last_state().unwrap()["SpotFleetRequestConfig"]["TargetCapacity"], 2);
    assert_eq!(fleet.phase(), Phase::Stable);
    assert_eq!(fleet.handle(), Some(&handle));
}

#[tokio::test]
async fn exhausted_delete_retries_keep_handle() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = reconciler
        .create(&fake, &fleet_spec(2))
        .await
        .unwrap()
        .resource;
    for _ in 0..4 {
        fake.fail_next(Op::Delete, ApiError::transient("RequestLimitExceeded", "slow down"));
    }

    let err = reconciler
        .delete(&fake, &mut fleet, &DeleteOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.handle(), fleet.handle());
    assert!(err.last_state().is_some());
    assert_eq!(fake.live_objects(), 1);
}

#[tokio::test(start_paused = true)]
async fn create_that_never_stabilises_returns_warning() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new().never_settle();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(ReconcilerConfig::default());

    let created = reconciler.create(&fake, &fleet_spec(2)).await.unwrap();

    let Some(ReconcileWarning::StabilityUnconfirmed {
        handle,
        elapsed,
        last_state,
    }) = created.warning
    else {
        panic!("expected a stability warning");
    };
    assert_eq!(handle.as_str(), "sfr-1");
    assert!(elapsed >= Duration::from_secs(600));
    assert_eq!(last_state.unwrap()["SpotFleetRequestState"], "submitted");
    assert_eq!(created.resource.phase(), Phase::Creating);
    assert_eq!(created.resource.handle(), Some(&handle));
}

#[tokio::test(start_paused = true)]
async fn cleanup_that_never_drains_times_out() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(ReconcilerConfig::default());
    let mut fleet = reconciler
        .create(&fake, &fleet_spec(5))
        .await
        .unwrap()
        .resource;
    fake.script_sub_resource_counts([5]);

    let err = reconciler
        .delete(&fake, &mut fleet, &DeleteOptions::with_cleanup())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.handle(), fleet.handle());
    assert_eq!(err.last_state(), Some(&json!({ "sub_resource_count": 5 })));
    assert_eq!(fleet.phase(), Phase::Deleting);
}

#[tokio::test(start_paused = true)]
async fn independent_fleets_reconcile_concurrently() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new().with_latency(Duration::from_millis(10));
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let (spec_a, spec_b) = (fleet_spec(2), fleet_spec(3));
    let started = Instant::now();
    let (a, b) = tokio::join!(
        reconciler.create(&fake, &spec_a),
        reconciler.create(&fake, &spec_b),
    );
    let (mut a, mut b) = (a.unwrap().resource, b.unwrap().resource);

    // One create call plus one settling read each, overlapped.
    assert!(started.elapsed() < Duration::from_millis(40));
    assert_ne!(a.handle(), b.handle());
    assert_eq!(fake.live_objects(), 2);

    let opts = DeleteOptions::default();
    let (da, db) = tokio::join!(
        reconciler.delete(&fake, &mut a, &opts),
        reconciler.delete(&fake, &mut b, &opts),
    );
    da.unwrap();
    db.unwrap();
    assert_eq!(fake.live_objects(), 0);
}
