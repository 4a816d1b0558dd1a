#![allow(dead_code)]

pub use calcnode_test_utils::builders;
pub use calcnode_test_utils::fake_worker::FakeWorkerBuilder;
pub use calcnode_test_utils::recording::{
    DefaultOnlyHandler, RecordingHandler, RecordingTimeoutAction,
};
pub use calcnode_test_utils::scripted_source::{FetchOutcome, ScriptedConfigurationSource};
pub use calcnode_test_utils::{init_tracing, with_timeout};

use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
