pub mod builders;
pub mod fake_worker;
pub mod recording;
pub mod scripted_source;

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Output is only shown for failing tests. The filter comes from
/// `CALCNODE_LOG` (same variable the binary honours), falling back to `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("CALCNODE_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .init();
    });
}

/// Bound an async test step; node and supervisor loops never end on their own.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("async test step exceeded 10s")
}
