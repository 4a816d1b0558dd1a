use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use calcnode::config::WorkerConfig;
use calcnode::errors::{CalcNodeError, Result};
use calcnode::supervisor::{WorkerBuilder, WorkerHandle};

/// A worker builder that spawns a task doing nothing but waiting.
///
/// - records every configuration it was asked to build
/// - keeps the shutdown tokens so tests can check shutdown was requested
/// - optionally stops on its own after a delay, refuses to build, or ends
///   with an error once asked to shut down
#[derive(Clone, Default)]
pub struct FakeWorkerBuilder {
    built: Arc<Mutex<Vec<WorkerConfig>>>,
    tokens: Arc<Mutex<Vec<CancellationToken>>>,
    stop_after: Option<Duration>,
    fail_build: bool,
    fail_on_shutdown: bool,
}

impl FakeWorkerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The worker task returns by itself after `delay`.
    pub fn stopping_after(mut self, delay: Duration) -> Self {
        self.stop_after = Some(delay);
        self
    }

    /// `build` fails.
    pub fn failing(mut self) -> Self {
        self.fail_build = true;
        self
    }

    /// The worker task returns an error when it is shut down.
    pub fn failing_on_shutdown(mut self) -> Self {
        self.fail_on_shutdown = true;
        self
    }

    pub fn built_configs(&self) -> Vec<WorkerConfig> {
        self.built.lock().unwrap().clone()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.is_cancelled())
    }
}

impl WorkerBuilder for FakeWorkerBuilder {
    fn build(&self, config: WorkerConfig) -> Result<WorkerHandle> {
        if self.fail_build {
            return Err(CalcNodeError::WorkerBuild("fake build failure".to_string()));
        }
        self.built.lock().unwrap().push(config);

        let shutdown = CancellationToken::new();
        self.tokens.lock().unwrap().push(shutdown.clone());

        let token = shutdown.clone();
        let stop_after = self.stop_after;
        let fail_on_shutdown = self.fail_on_shutdown;
        let task = tokio::spawn(async move {
            match stop_after {
                Some(delay) => {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => token.cancelled().await,
            }
            if fail_on_shutdown && token.is_cancelled() {
                return Err(CalcNodeError::WorkerBuild(
                    "fake worker failed while stopping".to_string(),
                ));
            }
            Ok(())
        });
        Ok(WorkerHandle::new(shutdown, task))
    }
}
