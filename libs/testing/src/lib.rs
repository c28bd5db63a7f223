//! Test support for provis.
//!
//! [`FakeRemote`] is an in-memory [`provis_reconcile::RemoteApi`] whose
//! eventual consistency, failures and sub-resource counts can be
//! scripted per test.

mod fake;
mod models;

pub use fake::{FakeModel, FakeRemote, Op};

use std::time::Duration;

use provis_reconcile::{BackoffPolicy, PollerConfig, ReconcilerConfig, RetryPolicy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG` and defaults to `warn`. Safe to call from every
/// test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Reconciler configuration with millisecond pacing and one-second
/// operation budgets.
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        create_timeout: Duration::from_secs(1),
        update_timeout: Duration::from_secs(1),
        delete_timeout: Duration::from_secs(1),
        poller: PollerConfig {
            backoff: BackoffPolicy::fixed(Duration::from_millis(1)),
            not_found_budget: 10,
        },
        retry: RetryPolicy {
            max_retries: 3,
            backoff: BackoffPolicy::fixed(Duration::from_millis(1)),
        },
    }
}
