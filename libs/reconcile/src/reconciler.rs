//! Create/read/update/delete orchestration for one resource kind.
//!
//! Per resource the reconciler walks
//! `Absent -> Creating -> Stable -> [Updating -> Stable]* -> Deleting -> Absent`.
//! State for one resource lives in a [`Managed`] record that the caller
//! owns and passes by `&mut`, so one handle can only be driven by one
//! operation at a time. The reconciler itself is immutable and can be
//! shared across tasks reconciling independent handles.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use provis_id::{ClientToken, ResourceHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{DeleteOptions, RemoteApi};
use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, ReconcileWarning};
use crate::kind::{ConvergenceStatus, ResourceKind};
use crate::mapper::{diff_attrs, Attributes, SpecHash};
use crate::poller::{snapshot, StatePoller};
use crate::retry::RetryFailure;

/// Lifecycle phase of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Absent,
    Creating,
    Stable,
    Updating,
    Deleting,
}

/// Reconciler-owned record of one remote resource.
pub struct Managed<K: ResourceKind> {
    handle: Option<ResourceHandle>,
    phase: Phase,
    last_observed: Option<K::Object>,

    /// Created by us and not yet read back successfully; not-found reads
    /// are eventual consistency, not drift.
    fresh: bool,
}

impl<K: ResourceKind> Managed<K> {
    /// A record with no remote counterpart.
    pub fn absent() -> Self {
        Self {
            handle: None,
            phase: Phase::Absent,
            last_observed: None,
            fresh: false,
        }
    }

    /// Take over an existing remote object by handle (import).
    pub fn adopt(handle: ResourceHandle) -> Self {
        Self {
            handle: Some(handle),
            phase: Phase::Stable,
            last_observed: None,
            fresh: false,
        }
    }

    pub fn handle(&self) -> Option<&ResourceHandle> {
        self.handle.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_absent(&self) -> bool {
        self.handle.is_none()
    }

    /// The remote object as last read.
    pub fn last_observed(&self) -> Option<&K::Object> {
        self.last_observed.as_ref()
    }

    /// The last observed object flattened back into a spec.
    pub fn observed_spec(&self) -> Option<K::Spec> {
        self.last_observed.as_ref().map(K::from_wire)
    }

    fn observe(&mut self, object: K::Object) {
        self.last_observed = Some(object);
        self.fresh = false;
    }

    fn clear(&mut self) {
        self.handle = None;
        self.phase = Phase::Absent;
        self.last_observed = None;
        self.fresh = false;
    }
}

impl<K: ResourceKind> Clone for Managed<K> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            phase: self.phase,
            last_observed: self.last_observed.clone(),
            fresh: self.fresh,
        }
    }
}

impl<K: ResourceKind> fmt::Debug for Managed<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("kind", &K::NAME)
            .field("handle", &self.handle)
            .field("phase", &self.phase)
            .field("last_observed", &self.last_observed)
            .field("fresh", &self.fresh)
            .finish()
    }
}

/// Result of a create.
#[derive(Debug)]
pub struct Created<K: ResourceKind> {
    pub resource: Managed<K>,

    /// Set when the object exists but stability was not confirmed.
    pub warning: Option<ReconcileWarning>,
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing mutable changed; the observed state was refreshed.
    Unchanged,

    /// The listed fields were sent to the remote.
    Updated { fields: Vec<String> },
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The remote accepted the delete.
    Deleted,

    /// There was nothing to delete: no handle, or the remote reported
    /// the object as already gone.
    AlreadyAbsent,
}

/// Drives the lifecycle of resources of kind `K`.
pub struct Reconciler<K> {
    config: ReconcilerConfig,
    poller: StatePoller,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            poller: StatePoller::new(config.poller.clone()),
            config,
            _kind: PhantomData,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Create a resource and wait for it to become stable.
    ///
    /// Transient API errors are retried with the same client token. If
    /// the object does not stabilise within the create timeout the
    /// handle is still returned, with a warning.
    pub async fn create<C>(&self, client: &C, spec: &K::Spec) -> Result<Created<K>, ReconcileError>
    where
        C: RemoteApi<K> + ?Sized,
    {
        self.validate(spec)?;

        let started = Instant::now();
        let token = ClientToken::new();
        let request = K::to_wire(spec);
        info!(
            kind = K::NAME,
            client_token = %token,
            spec_hash = %SpecHash::of_attrs(&spec.to_attrs()),
            "Creating resource"
        );

        let (token_ref, request_ref) = (&token, &request);
        let (handle, object) = self
            .config
            .retry
            .run("create", K::is_transient, move || {
                client.create(token_ref, request_ref)
            })
            .await
            .map_err(|f| retry_error(K::NAME, None, None, f))?;

        info!(kind = K::NAME, handle = %handle, "Resource created, waiting for stable state");
        let mut resource = Managed {
            handle: Some(handle.clone()),
            phase: Phase::Creating,
            last_observed: Some(object),
            fresh: true,
        };

        let remaining = self.config.create_timeout.saturating_sub(started.elapsed());
        let handle_ref = &handle;
        let waited = self
            .poller
            .await_state(
                K::NAME,
                &handle,
                remaining,
                move || client.read(handle_ref),
                K::create_status,
            )
            .await;

        let warning = match waited {
            Ok(outcome) => {
                resource.observe(outcome.value);
                resource.phase = Phase::Stable;
                info!(
                    kind = K::NAME,
                    handle = %handle,
                    polls = outcome.polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Resource stable"
                );
                None
            }
            Err(ReconcileError::Timeout {
                elapsed,
                last_state,
                ..
            }) => {
                let warning = ReconcileWarning::StabilityUnconfirmed {
                    handle: handle.clone(),
                    elapsed: started.elapsed().max(elapsed),
                    last_state,
                };
                warn!(kind = K::NAME, handle = %handle, %warning, "Stability unconfirmed");
                Some(warning)
            }
            Err(err) => return Err(err),
        };

        Ok(Created { resource, warning })
    }

    /// Refresh the observed state.
    ///
    /// Returns `None` once the resource is absent; a not-found response
    /// clears the handle. Right after create, not-found is retried within
    /// the consistency budget instead.
    pub async fn read<C>(
        &self,
        client: &C,
        resource: &mut Managed<K>,
    ) -> Result<Option<K::Spec>, ReconcileError>
    where
        C: RemoteApi<K> + ?Sized,
    {
        let Some(handle) = resource.handle.clone() else {
            return Ok(None);
        };
        let handle_ref = &handle;

        let object = if resource.fresh {
            self.poller
                .await_state(
                    K::NAME,
                    &handle,
                    self.config.create_timeout,
                    move || client.read(handle_ref),
                    |_| ConvergenceStatus::Converged,
                )
                .await?
                .value
        } else {
            match self
                .config
                .retry
                .run("read", K::is_transient, move || client.read(handle_ref))
                .await
            {
                Ok(object) => object,
                Err(RetryFailure::Fatal(err)) if err.is_not_found() => {
                    warn!(kind = K::NAME, handle = %handle, "Resource not found, removing from state");
                    resource.clear();
                    return Ok(None);
                }
                Err(failure) => {
                    return Err(retry_error(
                        K::NAME,
                        Some(&handle),
                        resource.last_observed.as_ref().and_then(snapshot),
                        failure,
                    ))
                }
            }
        };

        if resource.phase == Phase::Creating && K::create_status(&object).is_converged() {
            resource.phase = Phase::Stable;
        }
        let spec = K::from_wire(&object);
        resource.observe(object);
        debug!(kind = K::NAME, handle = %handle, "Resource read");
        Ok(Some(spec))
    }

    /// Converge the resource towards `desired`.
    ///
    /// Only changed mutable fields are sent. Changes to immutable fields
    /// are rejected before any API call. If nothing changed, the
    /// observed state is refreshed and no update is issued.
    pub async fn update<C>(
        &self,
        client: &C,
        resource: &mut Managed<K>,
        desired: &K::Spec,
    ) -> Result<UpdateOutcome, ReconcileError>
    where
        C: RemoteApi<K> + ?Sized,
    {
        let Some(handle) = resource.handle.clone() else {
            return Err(ReconcileError::Validation {
                resource: K::NAME.to_string(),
                fields: Vec::new(),
                message: "resource is absent; create it first".to_string(),
            });
        };
        self.validate(desired)?;

        let current = self.observed(client, resource, &handle).await?;
        let diff = diff_attrs(
            K::schema(),
            &K::from_wire(&current).to_attrs(),
            &desired.to_attrs(),
        );

        if diff.has_immutable() {
            return Err(ReconcileError::Validation {
                resource: K::NAME.to_string(),
                fields: diff.immutable.into_iter().collect(),
                message: "cannot change immutable fields in place".to_string(),
            });
        }

        if diff.mutable.is_empty() {
            debug!(kind = K::NAME, handle = %handle, "No changes, refreshing");
            if self.read(client, resource).await?.is_none() {
                return Err(Self::not_found(&handle));
            }
            return Ok(UpdateOutcome::Unchanged);
        }

        let patch = K::to_patch(desired, &current, &diff.mutable);
        info!(
            kind = K::NAME,
            handle = %handle,
            fields = ?diff.mutable,
            "Updating resource"
        );
        resource.phase = Phase::Updating;

        let (handle_ref, patch_ref) = (&handle, &patch);
        let object = match self
            .config
            .retry
            .run("update", K::is_transient, move || {
                client.update(handle_ref, patch_ref)
            })
            .await
        {
            Ok(object) => object,
            Err(RetryFailure::Fatal(err)) if err.is_not_found() => {
                resource.clear();
                return Err(Self::not_found(&handle));
            }
            Err(failure) => {
                resource.phase = Phase::Stable;
                return Err(retry_error(K::NAME, Some(&handle), snapshot(&current), failure));
            }
        };
        resource.observe(object);

        let settled = self
            .poller
            .await_state(
                K::NAME,
                &handle,
                self.config.update_timeout,
                move || client.read(handle_ref),
                K::update_status,
            )
            .await?;
        resource.observe(settled.value);
        resource.phase = Phase::Stable;
        info!(kind = K::NAME, handle = %handle, polls = settled.polls, "Update settled");

        Ok(UpdateOutcome::Updated {
            fields: diff.mutable.into_iter().collect(),
        })
    }

    /// Delete the resource.
    ///
    /// Deleting an absent resource, or one the remote reports as already
    /// gone, succeeds with [`DeleteOutcome::AlreadyAbsent`].
    pub async fn delete<C>(
        &self,
        client: &C,
        resource: &mut Managed<K>,
        opts: &DeleteOptions,
    ) -> Result<DeleteOutcome, ReconcileError>
    where
        C: RemoteApi<K> + ?Sized,
    {
        let Some(handle) = resource.handle.clone() else {
            debug!(kind = K::NAME, "No handle, nothing to delete");
            return Ok(DeleteOutcome::AlreadyAbsent);
        };

        let started = Instant::now();
        info!(
            kind = K::NAME,
            handle = %handle,
            terminate_sub_resources = opts.terminate_sub_resources,
            "Deleting resource"
        );
        resource.phase = Phase::Deleting;

        let handle_ref = &handle;
        match self
            .config
            .retry
            .run("delete", K::is_transient, move || {
                client.delete(handle_ref, opts)
            })
            .await
        {
            Ok(()) => {}
            Err(RetryFailure::Fatal(err)) if err.is_not_found() => {
                info!(kind = K::NAME, handle = %handle, "Resource already gone");
                resource.clear();
                return Ok(DeleteOutcome::AlreadyAbsent);
            }
            Err(failure) => {
                return Err(retry_error(
                    K::NAME,
                    Some(&handle),
                    resource.last_observed.as_ref().and_then(snapshot),
                    failure,
                ))
            }
        }

        if opts.wait_for_sub_resource_cleanup {
            let outcome = self
                .poller
                .await_zero(
                    K::NAME,
                    &handle,
                    self.remaining(self.config.delete_timeout, started),
                    move || client.sub_resource_count(handle_ref),
                )
                .await?;
            info!(kind = K::NAME, handle = %handle, polls = outcome.polls, "Sub-resources cleaned up");
        }

        if opts.wait_for_deletion {
            self.poller
                .await_absent(
                    K::NAME,
                    &handle,
                    self.remaining(self.config.delete_timeout, started),
                    move || client.read(handle_ref),
                    K::is_deleted,
                )
                .await?;
        }

        resource.clear();
        info!(kind = K::NAME, handle = %handle, "Resource deleted");
        Ok(DeleteOutcome::Deleted)
    }

    async fn observed<C>(
        &self,
        client: &C,
        resource: &mut Managed<K>,
        handle: &ResourceHandle,
    ) -> Result<K::Object, ReconcileError>
    where
        C: RemoteApi<K> + ?Sized,
    {
        if let Some(object) = &resource.last_observed {
            return Ok(object.clone());
        }
        self.read(client, resource).await?;
        resource
            .last_observed
            .clone()
            .ok_or_else(|| Self::not_found(handle))
    }

    fn validate(&self, spec: &K::Spec) -> Result<(), ReconcileError> {
        K::validate(spec).map_err(|message| ReconcileError::Validation {
            resource: K::NAME.to_string(),
            fields: Vec::new(),
            message,
        })
    }

    fn remaining(&self, budget: Duration, started: Instant) -> Duration {
        budget.saturating_sub(started.elapsed())
    }

    fn not_found(handle: &ResourceHandle) -> ReconcileError {
        ReconcileError::NotFound {
            resource: K::NAME.to_string(),
            handle: handle.clone(),
        }
    }
}

impl<K: ResourceKind> Default for Reconciler<K> {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

fn retry_error(
    resource: &str,
    handle: Option<&ResourceHandle>,
    last_state: Option<serde_json::Value>,
    failure: RetryFailure,
) -> ReconcileError {
    match failure {
        RetryFailure::Exhausted { attempts, last } => ReconcileError::Transient {
            resource: resource.to_string(),
            handle: handle.cloned(),
            attempts,
            last_state,
            source: last,
        },
        RetryFailure::Fatal(source) => match handle {
            Some(handle) if source.is_not_found() => ReconcileError::NotFound {
                resource: resource.to_string(),
                handle: handle.clone(),
            },
            _ => ReconcileError::Api {
                resource: resource.to_string(),
                handle: handle.cloned(),
                last_state,
                source,
            },
        },
    }
}
