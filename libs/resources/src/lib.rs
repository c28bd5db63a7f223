//! Resource kinds managed by the provis reconciler.
//!
//! Each kind pairs a typed spec with the wire types of its remote API and
//! implements [`provis_reconcile::ResourceKind`] so it can be driven by a
//! [`provis_reconcile::Reconciler`].

pub mod schedule_group;
pub mod spot_fleet;

pub use schedule_group::{ScheduleGroup, ScheduleGroupSpec};
pub use spot_fleet::{FleetType, LaunchSpecification, SpotFleet, SpotFleetRequestSpec};

/// Error returned when parsing an enum from its wire string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: '{value}'")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
