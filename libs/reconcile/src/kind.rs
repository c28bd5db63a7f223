//! Resource kind abstraction.

use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::error::ApiError;
use crate::mapper::{FieldMapper, FieldSchema};

/// Convergence status for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Resource has converged (current matches desired).
    Converged,

    /// Resource is converging (current is moving toward desired).
    Converging,

    /// Resource has diverged (terminal failure, requires intervention).
    Diverged(String),

    /// Status is unknown (insufficient data).
    Unknown,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// A kind of remote resource the reconciler can drive.
///
/// Implementations are marker types; all behaviour is associated
/// functions over the kind's spec, wire and patch types.
pub trait ResourceKind: FieldMapper + Send + Sync + 'static {
    /// Update payload carrying only changed fields.
    type Patch: Debug + Send + Sync;

    /// Resource type name used in logs and errors.
    const NAME: &'static str;

    /// Update semantics of every known field.
    fn schema() -> &'static [FieldSchema];

    /// Build an update request from the desired spec, restricted to
    /// `changed` (all of which are mutable per [`Self::schema`]).
    fn to_patch(desired: &Self::Spec, current: &Self::Object, changed: &BTreeSet<String>)
        -> Self::Patch;

    /// Local consistency checks run before any API call.
    fn validate(_spec: &Self::Spec) -> Result<(), String> {
        Ok(())
    }

    /// Has a freshly created object finished provisioning?
    fn create_status(object: &Self::Object) -> ConvergenceStatus;

    /// Has an update finished applying?
    fn update_status(object: &Self::Object) -> ConvergenceStatus {
        Self::create_status(object)
    }

    /// Does the remote still return the object after deletion, marked as
    /// deleted?
    fn is_deleted(_object: &Self::Object) -> bool {
        false
    }

    /// Should this error be retried? Kinds can widen the default to
    /// cover rejections the remote reports for propagation delays.
    fn is_transient(err: &ApiError) -> bool {
        err.is_transient()
    }
}
