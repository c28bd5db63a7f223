//! Polling remote state until a predicate holds.
//!
//! Every wait is bounded by a deadline. Each fetch is also raced against
//! the remaining time, so a hung remote call ends in
//! [`ReconcileError::Timeout`] instead of outliving the operation.

use std::future::Future;
use std::time::Duration;

use provis_id::ResourceHandle;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ApiError, ReconcileError};
use crate::kind::ConvergenceStatus;
use crate::retry::BackoffPolicy;

/// Poller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Delay between polls.
    pub backoff: BackoffPolicy,

    /// Consecutive not-found responses tolerated while waiting for an
    /// object to become visible.
    pub not_found_budget: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
                jitter: 0.1,
            },
            not_found_budget: DEFAULT_NOT_FOUND_BUDGET,
        }
    }
}

/// Default consecutive not-found budget.
pub const DEFAULT_NOT_FOUND_BUDGET: u32 = 20;

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    pub value: T,

    /// Number of fetches issued, including the final one.
    pub polls: u32,

    pub elapsed: Duration,
}

enum Step<R> {
    Done(R),
    Pending(Option<serde_json::Value>),
    Fail(ReconcileError),
}

/// Polls the remote until a target condition holds or time runs out.
#[derive(Debug, Clone, Default)]
pub struct StatePoller {
    config: PollerConfig,
}

impl StatePoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Wait until `predicate` reports the object as converged.
    ///
    /// Not-found responses are retried up to the configured budget of
    /// consecutive misses, then surface as [`ReconcileError::NotFound`].
    /// A diverged object ends the wait with [`ReconcileError::Diverged`].
    pub async fn await_state<O, F, Fut, P>(
        &self,
        resource: &str,
        handle: &ResourceHandle,
        timeout: Duration,
        fetch: F,
        predicate: P,
    ) -> Result<PollOutcome<O>, ReconcileError>
    where
        O: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O, ApiError>>,
        P: Fn(&O) -> ConvergenceStatus,
    {
        let budget = self.config.not_found_budget;
        let mut not_found = 0u32;

        self.poll(resource, handle, timeout, fetch, |result| match result {
            Ok(object) => {
                not_found = 0;
                match predicate(&object) {
                    ConvergenceStatus::Converged => Step::Done(object),
                    ConvergenceStatus::Diverged(reason) => Step::Fail(ReconcileError::Diverged {
                        resource: resource.to_string(),
                        handle: handle.clone(),
                        reason,
                        last_state: snapshot(&object),
                    }),
                    ConvergenceStatus::Converging | ConvergenceStatus::Unknown => {
                        Step::Pending(snapshot(&object))
                    }
                }
            }
            Err(err) if err.is_not_found() => {
                not_found += 1;
                if not_found > budget {
                    Step::Fail(ReconcileError::NotFound {
                        resource: resource.to_string(),
                        handle: handle.clone(),
                    })
                } else {
                    debug!(resource, handle = %handle, not_found, "Not visible yet");
                    Step::Pending(None)
                }
            }
            Err(err) => transient_or_fail(resource, handle, err),
        })
        .await
    }

    /// Wait until the object is gone, or `is_deleted` reports it as
    /// deleted.
    pub async fn await_absent<O, F, Fut, D>(
        &self,
        resource: &str,
        handle: &ResourceHandle,
        timeout: Duration,
        fetch: F,
        is_deleted: D,
    ) -> Result<PollOutcome<()>, ReconcileError>
    where
        O: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O, ApiError>>,
        D: Fn(&O) -> bool,
    {
        self.poll(resource, handle, timeout, fetch, |result| match result {
            Ok(object) if is_deleted(&object) => Step::Done(()),
            Ok(object) => Step::Pending(snapshot(&object)),
            Err(err) if err.is_not_found() => Step::Done(()),
            Err(err) => transient_or_fail(resource, handle, err),
        })
        .await
    }

    /// Wait until a dependent sub-resource count reaches zero. A
    /// not-found response counts as zero.
    pub async fn await_zero<F, Fut>(
        &self,
        resource: &str,
        handle: &ResourceHandle,
        timeout: Duration,
        fetch: F,
    ) -> Result<PollOutcome<()>, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize, ApiError>>,
    {
        self.poll(resource, handle, timeout, fetch, |result| match result {
            Ok(0) => Step::Done(()),
            Ok(count) => {
                debug!(resource, handle = %handle, count, "Sub-resources still present");
                Step::Pending(Some(serde_json::json!({ "sub_resource_count": count })))
            }
            Err(err) if err.is_not_found() => Step::Done(()),
            Err(err) => transient_or_fail(resource, handle, err),
        })
        .await
    }

    async fn poll<T, R, F, Fut, S>(
        &self,
        resource: &str,
        handle: &ResourceHandle,
        timeout: Duration,
        mut fetch: F,
        mut step: S,
    ) -> Result<PollOutcome<R>, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        S: FnMut(Result<T, ApiError>) -> Step<R>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut polls = 0u32;
        let mut last_state = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(resource, handle, started, last_state));
            }

            polls += 1;
            let Ok(result) = tokio::time::timeout(remaining, fetch()).await else {
                return Err(timed_out(resource, handle, started, last_state));
            };

            match step(result) {
                Step::Done(value) => {
                    let elapsed = started.elapsed();
                    debug!(
                        resource,
                        handle = %handle,
                        polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Wait complete"
                    );
                    return Ok(PollOutcome {
                        value,
                        polls,
                        elapsed,
                    });
                }
                Step::Fail(mut err) => {
                    if let ReconcileError::Api {
                        last_state: slot @ None,
                        ..
                    } = &mut err
                    {
                        *slot = last_state;
                    }
                    return Err(err);
                }
                Step::Pending(state) => {
                    if state.is_some() {
                        last_state = state;
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = self.config.backoff.delay(polls - 1).min(remaining);
            tokio::time::sleep(delay).await;
        }
    }
}

fn transient_or_fail<R>(resource: &str, handle: &ResourceHandle, err: ApiError) -> Step<R> {
    if err.is_transient() {
        warn!(resource, handle = %handle, error = %err, "Transient error while polling");
        Step::Pending(None)
    } else {
        Step::Fail(ReconcileError::Api {
            resource: resource.to_string(),
            handle: Some(handle.clone()),
            last_state: None,
            source: err,
        })
    }
}

fn timed_out(
    resource: &str,
    handle: &ResourceHandle,
    started: Instant,
    last_state: Option<serde_json::Value>,
) -> ReconcileError {
    ReconcileError::Timeout {
        resource: resource.to_string(),
        handle: Some(handle.clone()),
        elapsed: started.elapsed(),
        last_state,
    }
}

/// Serialize an object for error context.
pub(crate) fn snapshot<O: Serialize>(object: &O) -> Option<serde_json::Value> {
    serde_json::to_value(object).ok()
}
