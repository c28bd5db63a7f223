//! Spot fleet request resource kind.
//!
//! Only capacity-related fields can be modified in place; everything
//! else about a fleet request is fixed at creation time.

mod wire;

pub use wire::*;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use provis_reconcile::{
    ApiError, AttrMap, AttrValue, Attributes, ConvergenceStatus, FieldMapper, FieldSchema,
    ResourceKind,
};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// Allocation strategy the remote applies when none is given.
pub const DEFAULT_ALLOCATION_STRATEGY: &str = "lowestPrice";

/// Interruption behaviour the remote applies when none is given.
pub const DEFAULT_INTERRUPTION_BEHAVIOUR: &str = "terminate";

/// Error code the remote returns while a fresh IAM fleet role has not
/// propagated yet.
pub const ERR_INVALID_SPOT_FLEET_REQUEST_CONFIG: &str = "InvalidSpotFleetRequestConfig";

const IAM_FLEET_ROLE_PARAMETER: &str = "SpotFleetRequestConfig.IamFleetRole";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetType {
    /// Keep the target capacity, replacing interrupted instances.
    #[default]
    Maintain,

    /// Request capacity once; interrupted instances are not replaced.
    Request,

    /// Synchronous one-time request.
    Instant,
}

impl FleetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maintain => "maintain",
            Self::Request => "request",
            Self::Instant => "instant",
        }
    }
}

impl fmt::Display for FleetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FleetType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintain" => Ok(Self::Maintain),
            "request" => Ok(Self::Request),
            "instant" => Ok(Self::Instant),
            other => Err(ParseEnumError::new("fleet type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExcessCapacityTerminationPolicy {
    #[serde(rename = "default")]
    Default,

    #[serde(rename = "noTermination")]
    NoTermination,
}

impl ExcessCapacityTerminationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::NoTermination => "noTermination",
        }
    }
}

impl FromStr for ExcessCapacityTerminationPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "noTermination" => Ok(Self::NoTermination),
            other => Err(ParseEnumError::new("excess capacity termination policy", other)),
        }
    }
}

/// One launch specification. Order within a fleet is irrelevant.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpecification {
    pub ami: String,
    pub instance_type: String,
    pub availability_zone: Option<String>,
    pub subnet_id: Option<String>,
    pub spot_price: Option<String>,
    pub weighted_capacity: Option<f64>,
}

impl LaunchSpecification {
    pub fn new(ami: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            ami: ami.into(),
            instance_type: instance_type.into(),
            availability_zone: None,
            subnet_id: None,
            spot_price: None,
            weighted_capacity: None,
        }
    }

    fn to_attr(&self) -> AttrValue {
        let mut attrs = AttrMap::new();
        attrs.insert("ami".to_string(), self.ami.as_str().into());
        attrs.insert("instance_type".to_string(), self.instance_type.as_str().into());
        insert_opt(&mut attrs, "availability_zone", self.availability_zone.as_deref().map(AttrValue::from));
        insert_opt(&mut attrs, "subnet_id", self.subnet_id.as_deref().map(AttrValue::from));
        insert_opt(&mut attrs, "spot_price", self.spot_price.as_deref().map(AttrValue::from));
        insert_opt(&mut attrs, "weighted_capacity", self.weighted_capacity.map(AttrValue::Float));
        AttrValue::Map(attrs)
    }

    fn expand(&self) -> SpotFleetLaunchSpecification {
        SpotFleetLaunchSpecification {
            image_id: self.ami.clone(),
            instance_type: self.instance_type.clone(),
            placement: self.availability_zone.clone().map(|availability_zone| SpotPlacement {
                availability_zone,
            }),
            subnet_id: self.subnet_id.clone(),
            spot_price: self.spot_price.clone(),
            weighted_capacity: self.weighted_capacity,
        }
    }

    fn flatten(api: &SpotFleetLaunchSpecification) -> Self {
        Self {
            ami: api.image_id.clone(),
            instance_type: api.instance_type.clone(),
            availability_zone: api.placement.as_ref().map(|p| p.availability_zone.clone()),
            subnet_id: api.subnet_id.clone(),
            spot_price: api.spot_price.clone(),
            weighted_capacity: api.weighted_capacity,
        }
    }
}

/// Desired state of a spot fleet request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotFleetRequestSpec {
    pub iam_fleet_role: String,
    pub fleet_type: FleetType,
    pub target_capacity: i64,
    pub on_demand_target_capacity: Option<i64>,
    pub excess_capacity_termination_policy: Option<ExcessCapacityTerminationPolicy>,
    pub allocation_strategy: Option<String>,
    pub instance_interruption_behaviour: Option<String>,
    pub spot_price: Option<String>,
    pub replace_unhealthy_instances: bool,
    pub terminate_instances_with_expiration: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub load_balancers: BTreeSet<String>,
    pub target_group_arns: BTreeSet<String>,
    pub launch_specifications: Vec<LaunchSpecification>,
}

impl SpotFleetRequestSpec {
    /// A `maintain` fleet with the given role and capacity and no other
    /// settings.
    pub fn new(iam_fleet_role: impl Into<String>, target_capacity: i64) -> Self {
        Self {
            iam_fleet_role: iam_fleet_role.into(),
            fleet_type: FleetType::Maintain,
            target_capacity,
            on_demand_target_capacity: None,
            excess_capacity_termination_policy: None,
            allocation_strategy: None,
            instance_interruption_behaviour: None,
            spot_price: None,
            replace_unhealthy_instances: false,
            terminate_instances_with_expiration: false,
            valid_from: None,
            valid_until: None,
            load_balancers: BTreeSet::new(),
            target_group_arns: BTreeSet::new(),
            launch_specifications: Vec::new(),
        }
    }

    pub fn with_fleet_type(mut self, fleet_type: FleetType) -> Self {
        self.fleet_type = fleet_type;
        self
    }

    pub fn with_launch_specification(mut self, spec: LaunchSpecification) -> Self {
        self.launch_specifications.push(spec);
        self
    }
}

impl Attributes for SpotFleetRequestSpec {
    fn to_attrs(&self) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert("iam_fleet_role".to_string(), self.iam_fleet_role.as_str().into());
        attrs.insert("fleet_type".to_string(), self.fleet_type.as_str().into());
        attrs.insert("target_capacity".to_string(), self.target_capacity.into());
        insert_opt(
            &mut attrs,
            "on_demand_target_capacity",
            self.on_demand_target_capacity.map(AttrValue::Int),
        );
        insert_opt(
            &mut attrs,
            "excess_capacity_termination_policy",
            self.excess_capacity_termination_policy
                .map(|p| p.as_str().into()),
        );
        insert_opt(
            &mut attrs,
            "allocation_strategy",
            self.allocation_strategy.as_deref().map(AttrValue::from),
        );
        insert_opt(
            &mut attrs,
            "instance_interruption_behaviour",
            self.instance_interruption_behaviour
                .as_deref()
                .map(AttrValue::from),
        );
        insert_opt(&mut attrs, "spot_price", self.spot_price.as_deref().map(AttrValue::from));
        attrs.insert(
            "replace_unhealthy_instances".to_string(),
            self.replace_unhealthy_instances.into(),
        );
        attrs.insert(
            "terminate_instances_with_expiration".to_string(),
            self.terminate_instances_with_expiration.into(),
        );
        insert_opt(&mut attrs, "valid_from", self.valid_from.map(rfc3339));
        insert_opt(&mut attrs, "valid_until", self.valid_until.map(rfc3339));
        if !self.load_balancers.is_empty() {
            attrs.insert(
                "load_balancers".to_string(),
                AttrValue::string_set(self.load_balancers.iter().cloned()),
            );
        }
        if !self.target_group_arns.is_empty() {
            attrs.insert(
                "target_group_arns".to_string(),
                AttrValue::string_set(self.target_group_arns.iter().cloned()),
            );
        }
        if !self.launch_specifications.is_empty() {
            attrs.insert(
                "launch_specification".to_string(),
                AttrValue::Set(
                    self.launch_specifications
                        .iter()
                        .map(LaunchSpecification::to_attr)
                        .collect(),
                ),
            );
        }
        attrs
    }
}

fn insert_opt(attrs: &mut AttrMap, key: &str, value: Option<AttrValue>) {
    if let Some(value) = value {
        attrs.insert(key.to_string(), value);
    }
}

fn rfc3339(ts: DateTime<Utc>) -> AttrValue {
    AttrValue::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn expand_load_balancers(
    names: &BTreeSet<String>,
    target_group_arns: &BTreeSet<String>,
) -> Option<LoadBalancersConfig> {
    if names.is_empty() && target_group_arns.is_empty() {
        return None;
    }

    let mut config = LoadBalancersConfig::default();
    if !names.is_empty() {
        config.classic_load_balancers_config = Some(ClassicLoadBalancersConfig {
            classic_load_balancers: names
                .iter()
                .map(|name| ClassicLoadBalancer { name: name.clone() })
                .collect(),
        });
    }
    if !target_group_arns.is_empty() {
        config.target_groups_config = Some(TargetGroupsConfig {
            target_groups: target_group_arns
                .iter()
                .map(|arn| TargetGroup { arn: arn.clone() })
                .collect(),
        });
    }
    Some(config)
}

/// The spot fleet request resource kind.
#[derive(Debug, Clone, Copy)]
pub struct SpotFleet;

const SCHEMA: &[FieldSchema] = &[
    FieldSchema::immutable("iam_fleet_role"),
    FieldSchema::immutable("fleet_type"),
    FieldSchema::mutable("target_capacity"),
    FieldSchema::mutable("on_demand_target_capacity").computed(),
    FieldSchema::mutable("excess_capacity_termination_policy").computed(),
    FieldSchema::immutable("allocation_strategy").computed(),
    FieldSchema::immutable("instance_interruption_behaviour").computed(),
    FieldSchema::immutable("spot_price"),
    FieldSchema::immutable("replace_unhealthy_instances"),
    FieldSchema::immutable("terminate_instances_with_expiration"),
    FieldSchema::immutable("valid_from"),
    FieldSchema::immutable("valid_until"),
    FieldSchema::immutable("load_balancers"),
    FieldSchema::immutable("target_group_arns"),
    FieldSchema::immutable("launch_specification"),
];

impl FieldMapper for SpotFleet {
    type Spec = SpotFleetRequestSpec;
    type Request = SpotFleetRequestConfigData;
    type Object = SpotFleetRequest;

    fn to_wire(spec: &SpotFleetRequestSpec) -> SpotFleetRequestConfigData {
        SpotFleetRequestConfigData {
            iam_fleet_role: spec.iam_fleet_role.clone(),
            fleet_type: spec.fleet_type,
            target_capacity: spec.target_capacity,
            on_demand_target_capacity: spec.on_demand_target_capacity,
            excess_capacity_termination_policy: spec.excess_capacity_termination_policy,
            allocation_strategy: Some(
                spec.allocation_strategy
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ALLOCATION_STRATEGY.to_string()),
            ),
            instance_interruption_behavior: Some(
                spec.instance_interruption_behaviour
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INTERRUPTION_BEHAVIOUR.to_string()),
            ),
            spot_price: spec.spot_price.clone(),
            replace_unhealthy_instances: spec.replace_unhealthy_instances,
            terminate_instances_with_expiration: spec.terminate_instances_with_expiration,
            valid_from: spec.valid_from,
            valid_until: spec.valid_until,
            launch_specifications: spec
                .launch_specifications
                .iter()
                .map(LaunchSpecification::expand)
                .collect(),
            load_balancers_config: expand_load_balancers(
                &spec.load_balancers,
                &spec.target_group_arns,
            ),
        }
    }

    fn from_wire(object: &SpotFleetRequest) -> SpotFleetRequestSpec {
        let config = &object.spot_fleet_request_config;
        let lb_config = config.load_balancers_config.as_ref();

        SpotFleetRequestSpec {
            iam_fleet_role: config.iam_fleet_role.clone(),
            fleet_type: config.fleet_type,
            target_capacity: config.target_capacity,
            on_demand_target_capacity: config.on_demand_target_capacity,
            excess_capacity_termination_policy: config.excess_capacity_termination_policy,
            allocation_strategy: config.allocation_strategy.clone(),
            instance_interruption_behaviour: config.instance_interruption_behavior.clone(),
            spot_price: config.spot_price.clone(),
            replace_unhealthy_instances: config.replace_unhealthy_instances,
            terminate_instances_with_expiration: config.terminate_instances_with_expiration,
            valid_from: config.valid_from,
            valid_until: config.valid_until,
            load_balancers: lb_config
                .and_then(|c| c.classic_load_balancers_config.as_ref())
                .map(|c| {
                    c.classic_load_balancers
                        .iter()
                        .map(|lb| lb.name.clone())
                        .collect()
                })
                .unwrap_or_default(),
            target_group_arns: lb_config
                .and_then(|c| c.target_groups_config.as_ref())
                .map(|c| c.target_groups.iter().map(|tg| tg.arn.clone()).collect())
                .unwrap_or_default(),
            launch_specifications: config
                .launch_specifications
                .iter()
                .map(LaunchSpecification::flatten)
                .collect(),
        }
    }
}

impl ResourceKind for SpotFleet {
    type Patch = ModifySpotFleetRequest;

    const NAME: &'static str = "spot_fleet_request";

    fn schema() -> &'static [FieldSchema] {
        SCHEMA
    }

    fn to_patch(
        desired: &SpotFleetRequestSpec,
        _current: &SpotFleetRequest,
        changed: &BTreeSet<String>,
    ) -> ModifySpotFleetRequest {
        let mut patch = ModifySpotFleetRequest::default();
        if changed.contains("target_capacity") {
            patch.target_capacity = Some(desired.target_capacity);
        }
        if changed.contains("on_demand_target_capacity") {
            patch.on_demand_target_capacity = desired.on_demand_target_capacity;
        }
        if changed.contains("excess_capacity_termination_policy") {
            patch.excess_capacity_termination_policy = desired.excess_capacity_termination_policy;
        }
        patch
    }

    fn validate(spec: &SpotFleetRequestSpec) -> Result<(), String> {
        if spec.launch_specifications.is_empty() {
            return Err("at least one launch specification is required".to_string());
        }
        if let (Some(from), Some(until)) = (spec.valid_from, spec.valid_until) {
            if until <= from {
                return Err(format!(
                    "valid_until ({until}) must be after valid_from ({from})"
                ));
            }
        }
        Ok(())
    }

    fn create_status(object: &SpotFleetRequest) -> ConvergenceStatus {
        match object.spot_fleet_request_state {
            SpotFleetRequestState::Active => ConvergenceStatus::Converged,
            SpotFleetRequestState::Submitted => ConvergenceStatus::Converging,
            SpotFleetRequestState::Modifying => ConvergenceStatus::Unknown,
            state => terminal(state),
        }
    }

    fn update_status(object: &SpotFleetRequest) -> ConvergenceStatus {
        match object.spot_fleet_request_state {
            SpotFleetRequestState::Active => ConvergenceStatus::Converged,
            SpotFleetRequestState::Modifying | SpotFleetRequestState::Submitted => {
                ConvergenceStatus::Converging
            }
            state => terminal(state),
        }
    }

    fn is_deleted(object: &SpotFleetRequest) -> bool {
        object.spot_fleet_request_state.is_cancelled()
    }

    fn is_transient(err: &ApiError) -> bool {
        err.is_transient()
            || err.matches(ERR_INVALID_SPOT_FLEET_REQUEST_CONFIG, IAM_FLEET_ROLE_PARAMETER)
    }
}

fn terminal(state: SpotFleetRequestState) -> ConvergenceStatus {
    let state = serde_json::to_value(state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{state:?}"));
    ConvergenceStatus::Diverged(format!("unexpected state '{state}'"))
}
