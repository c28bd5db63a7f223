//! Simulated server behaviour of the built-in resource kinds.

use provis_reconcile::DeleteOptions;
use provis_resources::schedule_group::{
    CreateScheduleGroupInput, ScheduleGroupOutput, ScheduleGroupState, TagChanges,
};
use provis_resources::spot_fleet::{
    ActivityStatus, ModifySpotFleetRequest, SpotFleetRequest, SpotFleetRequestConfigData,
    SpotFleetRequestState,
};
use provis_resources::{ScheduleGroup, SpotFleet};

use crate::fake::FakeModel;

impl FakeModel for SpotFleet {
    fn assign_id(seq: u64, _request: &SpotFleetRequestConfigData) -> String {
        format!("sfr-{seq}")
    }

    fn materialize(id: &str, request: &SpotFleetRequestConfigData) -> SpotFleetRequest {
        SpotFleetRequest::submitted(id, request.clone())
    }

    fn settle(object: &mut SpotFleetRequest) {
        if matches!(
            object.spot_fleet_request_state,
            SpotFleetRequestState::Submitted | SpotFleetRequestState::Modifying
        ) {
            object.spot_fleet_request_state = SpotFleetRequestState::Active;
            object.activity_status = Some(ActivityStatus::Fulfilled);
        }
    }

    fn apply_patch(object: &mut SpotFleetRequest, patch: &ModifySpotFleetRequest) {
        patch.apply_to(&mut object.spot_fleet_request_config);
        object.spot_fleet_request_state = SpotFleetRequestState::Modifying;
        object.activity_status = Some(ActivityStatus::PendingFulfillment);
    }

    fn patched_fields(patch: &ModifySpotFleetRequest) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if patch.target_capacity.is_some() {
            fields.push("target_capacity");
        }
        if patch.on_demand_target_capacity.is_some() {
            fields.push("on_demand_target_capacity");
        }
        if patch.excess_capacity_termination_policy.is_some() {
            fields.push("excess_capacity_termination_policy");
        }
        fields
    }

    fn mark_deleted(object: &mut SpotFleetRequest, opts: &DeleteOptions) {
        object.spot_fleet_request_state = if opts.terminate_sub_resources {
            SpotFleetRequestState::CancelledTerminating
        } else {
            SpotFleetRequestState::CancelledRunning
        };
        object.activity_status = Some(ActivityStatus::PendingTermination);
    }
}

impl FakeModel for ScheduleGroup {
    fn assign_id(_seq: u64, request: &CreateScheduleGroupInput) -> String {
        request.name.clone()
    }

    fn materialize(id: &str, request: &CreateScheduleGroupInput) -> ScheduleGroupOutput {
        ScheduleGroupOutput::new(
            format!("arn:aws:scheduler:us-east-1:000000000000:schedule-group/{id}"),
            request,
        )
    }

    fn settle(_object: &mut ScheduleGroupOutput) {}

    fn apply_patch(object: &mut ScheduleGroupOutput, patch: &TagChanges) {
        patch.apply_to(&mut object.tags);
    }

    fn patched_fields(patch: &TagChanges) -> Vec<&'static str> {
        if patch.is_empty() {
            Vec::new()
        } else {
            vec!["tags"]
        }
    }

    fn mark_deleted(object: &mut ScheduleGroupOutput, _opts: &DeleteOptions) {
        object.state = ScheduleGroupState::Deleting;
    }
}
