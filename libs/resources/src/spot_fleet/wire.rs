//! Wire format of the spot fleet API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExcessCapacityTerminationPolicy, FleetType};

/// Request configuration, as sent on create and echoed back on describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotFleetRequestConfigData {
    pub iam_fleet_role: String,

    #[serde(rename = "Type")]
    pub fleet_type: FleetType,

    pub target_capacity: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_target_capacity: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_capacity_termination_policy: Option<ExcessCapacityTerminationPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_interruption_behavior: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,

    pub replace_unhealthy_instances: bool,

    pub terminate_instances_with_expiration: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch_specifications: Vec<SpotFleetLaunchSpecification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancers_config: Option<LoadBalancersConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotFleetLaunchSpecification {
    pub image_id: String,

    pub instance_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<SpotPlacement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotPlacement {
    pub availability_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classic_load_balancers_config: Option<ClassicLoadBalancersConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_groups_config: Option<TargetGroupsConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClassicLoadBalancersConfig {
    pub classic_load_balancers: Vec<ClassicLoadBalancer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClassicLoadBalancer {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetGroupsConfig {
    pub target_groups: Vec<TargetGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetGroup {
    pub arn: String,
}

/// Lifecycle state reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotFleetRequestState {
    Submitted,
    Active,
    Modifying,
    Failed,
    Cancelled,
    CancelledRunning,
    CancelledTerminating,
}

impl SpotFleetRequestState {
    /// Returns true for every cancelled variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::CancelledRunning | Self::CancelledTerminating
        )
    }
}

/// Progress of fulfilling the requested capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Error,
    PendingFulfillment,
    PendingTermination,
    Fulfilled,
}

/// A spot fleet request as returned by describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpotFleetRequest {
    pub spot_fleet_request_id: String,

    pub spot_fleet_request_state: SpotFleetRequestState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_status: Option<ActivityStatus>,

    pub create_time: DateTime<Utc>,

    pub spot_fleet_request_config: SpotFleetRequestConfigData,
}

impl SpotFleetRequest {
    /// A just-submitted request, as the remote reports it right after
    /// accepting `config`.
    pub fn submitted(id: impl Into<String>, config: SpotFleetRequestConfigData) -> Self {
        Self {
            spot_fleet_request_id: id.into(),
            spot_fleet_request_state: SpotFleetRequestState::Submitted,
            activity_status: Some(ActivityStatus::PendingFulfillment),
            create_time: Utc::now(),
            spot_fleet_request_config: config,
        }
    }
}

/// Partial update. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModifySpotFleetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_capacity: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_demand_target_capacity: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_capacity_termination_policy: Option<ExcessCapacityTerminationPolicy>,
}

impl ModifySpotFleetRequest {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch to a stored configuration.
    pub fn apply_to(&self, config: &mut SpotFleetRequestConfigData) {
        if let Some(capacity) = self.target_capacity {
            config.target_capacity = capacity;
        }
        if let Some(capacity) = self.on_demand_target_capacity {
            config.on_demand_target_capacity = Some(capacity);
        }
        if let Some(policy) = self.excess_capacity_termination_policy {
            config.excess_capacity_termination_policy = Some(policy);
        }
    }
}
