//! Reconciliation of declarative resources against a remote API.
//!
//! This library drives the lifecycle every provisioned resource follows:
//! create, wait for a stable state, read back, diff-based update, and
//! delete with optional cleanup. Key concepts:
//!
//! - **Resource kind**: typed spec, wire request, patch and remote object
//!   for one kind of resource, plus its stability predicates.
//! - **Field mapper**: expand a spec to the wire format and flatten a
//!   remote object back into a spec.
//! - **State poller**: deadline-bounded polling until a predicate holds.
//! - **Reconciler**: orchestrates the remote calls, retries and waits.
//!
//! # Invariants
//!
//! - A handle, once assigned, identifies one remote object until deletion
//! - A handle is never reused after the remote reports it as not found
//! - Immutable-field changes are rejected before any API call
//! - Delete is idempotent

mod api;
mod config;
mod error;
mod kind;
mod mapper;
mod poller;
mod reconciler;
mod retry;

pub use api::{DeleteOptions, RemoteApi};
pub use config::{
    ConfigError, ReconcilerConfig, DEFAULT_CREATE_TIMEOUT, DEFAULT_DELETE_TIMEOUT,
    DEFAULT_UPDATE_TIMEOUT,
};
pub use error::{ApiError, ReconcileError, ReconcileWarning};
pub use kind::{ConvergenceStatus, ResourceKind};
pub use mapper::{
    attrs_to_json, diff_attrs, explicit_field_mismatches, AttrMap, AttrValue, Attributes,
    FieldDiff, FieldMapper, FieldSchema, SpecHash,
};
pub use poller::{PollOutcome, PollerConfig, StatePoller, DEFAULT_NOT_FOUND_BUDGET};
pub use reconciler::{Created, DeleteOutcome, Managed, Phase, Reconciler, UpdateOutcome};
pub use retry::{BackoffPolicy, RetryFailure, RetryPolicy, DEFAULT_MAX_RETRIES};

pub use provis_id::{ClientToken, ResourceHandle};
