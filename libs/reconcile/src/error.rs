//! Error taxonomy for remote calls and reconciliation.

use std::fmt;
use std::time::Duration;

use provis_id::ResourceHandle;
use thiserror::Error;

/// Errors reported by a remote API client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The remote has no object for the given handle.
    #[error("not found: {0}")]
    NotFound(String),

    /// Retryable failure (throttling, propagation delay, 5xx).
    #[error("transient error {code}: {message}")]
    Transient { code: String, message: String },

    /// The remote refused the request; retrying will not help.
    #[error("request rejected {code}: {message}")]
    Rejected { code: String, message: String },
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns true if the remote reported the object as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the error is retryable as reported by the remote.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Error code, if the remote supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::NotFound(_) => None,
            Self::Transient { code, .. } | Self::Rejected { code, .. } => Some(code),
        }
    }

    /// Returns true if the error has the given code and its message
    /// contains `needle`.
    pub fn matches(&self, code: &str, needle: &str) -> bool {
        match self {
            Self::Transient { code: c, message } | Self::Rejected { code: c, message } => {
                c == code && message.contains(needle)
            }
            Self::NotFound(_) => false,
        }
    }
}

/// Reconciliation errors.
///
/// Every variant names the resource kind and, once one is known, the
/// handle, so callers can decide between re-polling and aborting.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Transient API errors persisted past the retry budget.
    #[error("{resource} {}: giving up after {attempts} attempts: {source}", fmt_handle(.handle))]
    Transient {
        resource: String,
        handle: Option<ResourceHandle>,
        attempts: u32,
        last_state: Option<serde_json::Value>,
        #[source]
        source: ApiError,
    },

    /// The resource does not exist remotely where it was required to.
    #[error("{resource} {handle} not found")]
    NotFound {
        resource: String,
        handle: ResourceHandle,
    },

    /// The requested change is invalid and was rejected locally.
    #[error("{resource}: {message} (fields: {})", .fields.join(", "))]
    Validation {
        resource: String,
        fields: Vec<String>,
        message: String,
    },

    /// Timeout waiting for the remote to converge. The side effect may
    /// or may not have completed remotely.
    #[error("timeout after {elapsed:?} waiting for {resource} {}", fmt_handle(.handle))]
    Timeout {
        resource: String,
        handle: Option<ResourceHandle>,
        elapsed: Duration,
        last_state: Option<serde_json::Value>,
    },

    /// The remote reached a terminal failure state while we waited.
    #[error("{resource} {handle} diverged: {reason}")]
    Diverged {
        resource: String,
        handle: ResourceHandle,
        reason: String,
        last_state: Option<serde_json::Value>,
    },

    /// Non-retryable remote failure.
    #[error("{resource} {}: {source}", fmt_handle(.handle))]
    Api {
        resource: String,
        handle: Option<ResourceHandle>,
        last_state: Option<serde_json::Value>,
        #[source]
        source: ApiError,
    },
}

fn fmt_handle(handle: &Option<ResourceHandle>) -> &str {
    handle.as_ref().map_or("<no handle>", ResourceHandle::as_str)
}

impl ReconcileError {
    /// The handle the failure relates to, if one was assigned.
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            Self::NotFound { handle, .. } | Self::Diverged { handle, .. } => Some(handle),
            Self::Transient { handle, .. }
            | Self::Timeout { handle, .. }
            | Self::Api { handle, .. } => handle.as_ref(),
            Self::Validation { .. } => None,
        }
    }

    /// Snapshot of the last observed remote object, if any.
    pub fn last_state(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Transient { last_state, .. }
            | Self::Timeout { last_state, .. }
            | Self::Diverged { last_state, .. }
            | Self::Api { last_state, .. } => last_state.as_ref(),
            Self::NotFound { .. } | Self::Validation { .. } => None,
        }
    }

    /// Returns true if retrying the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Returns true if this is a local validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Non-fatal conditions reported alongside a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileWarning {
    /// The object was created but did not reach a stable state in time.
    StabilityUnconfirmed {
        handle: ResourceHandle,
        elapsed: Duration,
        last_state: Option<serde_json::Value>,
    },
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StabilityUnconfirmed {
                handle, elapsed, ..
            } => write!(
                f,
                "{handle} created but not confirmed stable after {elapsed:?}"
            ),
        }
    }
}
