//! Shared fixtures for the `progressive` test suites: experiment builders,
//! a scripted executor, a recording backend wrapper and named tree
//! scenarios.

pub mod builders;
pub mod recording_backend;
pub mod scenarios;
pub mod scripted_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use progressive::logging::{build_filter, LOG_ENV};
use tracing_subscriber::{fmt, EnvFilter};

pub use builders::{fast_options, genome_set, project, topology, ConfigBuilder};
pub use recording_backend::RecordingBackend;
pub use scenarios::{scenarios, Scenario, Tier};
pub use scripted_executor::{ScriptedExecutor, Step};

static INIT: Once = Once::new();

/// Default budget for a single orchestrated test run.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise tracing for tests.
///
/// Honours `PROGRESSIVE_LOG` like the binary does, e.g.
/// `PROGRESSIVE_LOG=progressive::engine=debug cargo test -- --nocapture`.
/// Output goes through the test writer, so it only shows for failing tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env = std::env::var(LOG_ENV).ok();
        let filter = build_filter(None, env.as_deref()).unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Run `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    within(TEST_TIMEOUT, f).await
}

/// Run `f`, failing the test if it takes longer than `limit`.
pub async fn within<F, T>(limit: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, f).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {limit:?}; is a subproblem stuck?"),
    }
}
