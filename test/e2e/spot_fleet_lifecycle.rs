//! End-to-end spot fleet request lifecycle.
//!
//! Drives a fleet through create, read, update and delete against the
//! in-memory remote, verifying:
//!
//! 1. Create waits for the fleet to become active
//! 2. Updates send only the changed capacity
//! 3. Delete with cleanup waits for instances to drain
//! 4. Unchanged and invalid updates issue no API calls
//!
//! ## Running
//!
//! ```bash
//! cargo test -p provis-e2e --test spot_fleet_lifecycle
//! ```

use provis_reconcile::{
    DeleteOptions, DeleteOutcome, Managed, Phase, Reconciler, ReconcileError, UpdateOutcome,
};
use provis_resources::spot_fleet::SpotFleetRequestState;
use provis_resources::{FleetType, LaunchSpecification, SpotFleet, SpotFleetRequestSpec};
use provis_testing::{fast_config, init_tracing, FakeRemote, Op};

fn fleet_spec(capacity: i64) -> SpotFleetRequestSpec {
    SpotFleetRequestSpec::new("arn:aws:iam::123456789012:role/spot-fleet", capacity)
        .with_fleet_type(FleetType::Maintain)
        .with_launch_specification(LaunchSpecification::new("ami-0abc1234", "m5.large"))
}

async fn create_fleet(
    fake: &FakeRemote<SpotFleet>,
    reconciler: &Reconciler<SpotFleet>,
    spec: &SpotFleetRequestSpec,
) -> Managed<SpotFleet> {
    let created = reconciler.create(fake, spec).await.unwrap();
    assert!(created.warning.is_none(), "unexpected warning: {:?}", created.warning);
    created.resource
}

#[tokio::test]
async fn full_lifecycle() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new().with_settle_after(1);
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    // Create
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;
    assert_eq!(fleet.handle().unwrap().as_str(), "sfr-1");
    assert_eq!(fleet.phase(), Phase::Stable);

    // Read
    let observed = reconciler.read(&fake, &mut fleet).await.unwrap().unwrap();
    assert_eq!(observed.target_capacity, 2);
    assert_eq!(
        fleet.last_observed().unwrap().spot_fleet_request_state,
        SpotFleetRequestState::Active
    );

    // Update
    let outcome = reconciler
        .update(&fake, &mut fleet, &fleet_spec(4))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            fields: vec!["target_capacity".to_string()]
        }
    );
    assert_eq!(fake.patched_fields(), vec![vec!["target_capacity"]]);

    let observed = reconciler.read(&fake, &mut fleet).await.unwrap().unwrap();
    assert_eq!(observed.target_capacity, 4);

    // Delete, draining instances
    fake.script_sub_resource_counts([2, 1, 0]);
    let outcome = reconciler
        .delete(&fake, &mut fleet, &DeleteOptions::with_cleanup())
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert_eq!(fake.calls(Op::SubResourceCount), 3);
    assert!(fake.delete_options()[0].terminate_sub_resources);
    assert!(fleet.is_absent());
    assert_eq!(fake.live_objects(), 0);
}

#[tokio::test]
async fn delete_is_idempotent() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;
    let handle = fleet.handle().cloned().unwrap();

    let first = reconciler
        .delete(&fake, &mut fleet, &DeleteOptions::default())
        .await
        .unwrap();
    let calls = fake.total_calls();
    let second = reconciler
        .delete(&fake, &mut fleet, &DeleteOptions::default())
        .await
        .unwrap();

    assert_eq!(first, DeleteOutcome::Deleted);
    assert_eq!(second, DeleteOutcome::AlreadyAbsent);
    assert_eq!(fake.total_calls(), calls);

    // A second record of the same handle sees the remote report it gone.
    let mut stale = Managed::<SpotFleet>::adopt(handle);
    let outcome = reconciler
        .delete(&fake, &mut stale, &DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::AlreadyAbsent);
    assert!(stale.is_absent());
}

#[tokio::test]
async fn unchanged_update_issues_no_update_call() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;

    let outcome = reconciler
        .update(&fake, &mut fleet, &fleet_spec(2))
        .await
        .unwrap();

    assert_eq!(outcome, UpdateOutcome::Unchanged);
    assert_eq!(fake.calls(Op::Update), 0);
}

#[tokio::test]
async fn immutable_change_fails_before_any_call() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;
    let calls = fake.total_calls();

    let desired = fleet_spec(4).with_fleet_type(FleetType::Request);
    let err = reconciler
        .update(&fake, &mut fleet, &desired)
        .await
        .unwrap_err();

    match &err {
        ReconcileError::Validation { fields, .. } => {
            assert_eq!(fields, &vec!["fleet_type".to_string()]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(fake.total_calls(), calls);
    assert_eq!(fleet.phase(), Phase::Stable);
}

#[tokio::test]
async fn invalid_spec_is_rejected_locally() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());

    let no_launch_specs = SpotFleetRequestSpec::new("arn:aws:iam::123456789012:role/fleet", 1);
    let err = reconciler.create(&fake, &no_launch_specs).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn out_of_band_drift_is_corrected() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;
    let handle = fleet.handle().cloned().unwrap();

    fake.mutate(&handle, |object| object.spot_fleet_request_config.target_capacity = 7);
    let observed = reconciler.read(&fake, &mut fleet).await.unwrap().unwrap();
    assert_eq!(observed.target_capacity, 7);

    reconciler
        .update(&fake, &mut fleet, &fleet_spec(2))
        .await
        .unwrap();
    assert_eq!(
        fake.object(&handle)
            .unwrap()
            .spot_fleet_request_config
            .target_capacity,
        2
    );
}

#[tokio::test]
async fn removed_fleet_reads_as_absent() {
    init_tracing();
    let fake = FakeRemote::<SpotFleet>::new();
    let reconciler: Reconciler<SpotFleet> = Reconciler::new(fast_config());
    let mut fleet = create_fleet(&fake, &reconciler, &fleet_spec(2)).await;
    let handle = fleet.handle().cloned().unwrap();

    assert!(fake.remove(&handle));
    let read = reconciler.read(&fake, &mut fleet).await.unwrap();

    assert!(read.is_none());
    assert!(fleet.is_absent());

    let err = reconciler
        .update(&fake, &mut fleet, &fleet_spec(3))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
