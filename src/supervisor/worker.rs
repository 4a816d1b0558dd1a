// src/supervisor/worker.rs

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::WorkerConfig;
use crate::errors::{CalcNodeError, Result};
use crate::exec::FunctionRegistry;
use crate::node::{CalcNode, StartupReport};

/// A started worker: its shutdown token, the task running it and, when the
/// task has asynchronous startup work, the channel it reports that on.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
    startup: Option<oneshot::Receiver<StartupReport>>,
}

impl WorkerHandle {
    pub fn new(shutdown: CancellationToken, task: JoinHandle<Result<()>>) -> Self {
        Self {
            shutdown,
            task,
            startup: None,
        }
    }

    /// Make [`started`](Self::started) wait for the task's startup report.
    pub fn with_startup_report(mut self, report: oneshot::Receiver<StartupReport>) -> Self {
        self.startup = Some(report);
        self
    }

    /// Wait until the worker is up. Failing to start is a
    /// [`CalcNodeError::WorkerBuild`]. Handles without a startup report are
    /// up as soon as they are built.
    pub async fn started(&mut self) -> Result<()> {
        let Some(report) = self.startup.take() else {
            return Ok(());
        };
        match report.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(CalcNodeError::WorkerBuild(reason)),
            Err(_) => Err(CalcNodeError::WorkerBuild(
                "worker stopped before reporting startup".to_string(),
            )),
        }
    }

    /// Ask the worker to stop accepting work and wind down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker task to return.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CalcNodeError::Other(e.into())),
        }
    }
}

/// Builds and starts the worker from a validated configuration.
pub trait WorkerBuilder: Send + Sync {
    fn build(&self, config: WorkerConfig) -> Result<WorkerHandle>;
}

/// Starts a [`CalcNode`] on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct CalcNodeWorkerBuilder {
    functions: Arc<FunctionRegistry>,
}

impl CalcNodeWorkerBuilder {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            functions: Arc::new(functions),
        }
    }
}

impl WorkerBuilder for CalcNodeWorkerBuilder {
    fn build(&self, config: WorkerConfig) -> Result<WorkerHandle> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| CalcNodeError::WorkerBuild(format!("no async runtime: {e}")))?;
        info!(
            node = %config.node.id,
            coordinator = %format!("{}:{}", config.coordinator.host, config.coordinator.port),
            capacity = config.node.capacity,
            "starting calculation node"
        );

        let shutdown = CancellationToken::new();
        let node = CalcNode::new(config, (*self.functions).clone(), shutdown.clone());
        let (report, startup) = oneshot::channel();
        let task = handle.spawn(node.run_reporting(report));
        Ok(WorkerHandle::new(shutdown, task).with_startup_report(startup))
    }
}
