pub mod builders;
pub mod fake_backend;
pub mod fake_job_client;
pub mod recording_observer;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Route scriptagent's tracing output (lock waits, script launches, retry
/// decisions) through the test harness. Safe to call from every test.
///
/// `RUST_LOG` overrides the default `info` filter, e.g.
/// `RUST_LOG=scriptagent::isolation=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

const SCRIPT_WAIT_LIMIT: std::time::Duration = std::time::Duration::from_secs(5);

/// Await `f`, failing the test if a script run or lock wait hangs.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(SCRIPT_WAIT_LIMIT, f).await {
        Ok(value) => value,
        Err(_) => panic!("gave up waiting after {SCRIPT_WAIT_LIMIT:?}"),
    }
}
