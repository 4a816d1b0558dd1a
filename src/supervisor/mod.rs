// src/supervisor/mod.rs

//! Node process supervisor.
//!
//! Lifecycle:
//!
//! 1. Fetch the configuration document with bounded retry.
//! 2. Derive [`ConnectionDefaults`] from the URL and load the worker
//!    configuration with them.
//! 3. Build and start the worker.
//! 4. Every `poll_interval`: log memory, check the worker is still running,
//!    re-fetch the document. A byte-level change retires the node; repeated
//!    fetch failures escalate and eventually retire it too.
//!
//! The supervisor never hot-swaps configuration. Every exit path except a
//! fatal startup failure is a normal retirement: something outside restarts
//! the process with a fresh configuration.

pub mod policy;
pub mod source;
pub mod telemetry;
pub mod worker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionDefaults, fingerprint, load_worker_config};
use crate::errors::{CalcNodeError, Result};

pub use policy::{Escalation, EscalationPolicy, RetryPolicy};
pub use source::{
    ConfigurationSource, FetchFuture, FileConfigurationSource, HttpConfigurationSource,
    source_for_url,
};
pub use telemetry::MemoryTelemetry;
pub use worker::{CalcNodeWorkerBuilder, WorkerBuilder, WorkerHandle};

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The published configuration changed.
    ConfigurationChanged,
    /// The configuration could not be fetched for too many consecutive polls.
    ConfigurationUnreachable,
    /// The worker shut down on its own.
    WorkerStopped,
    /// Ctrl-C or another external interrupt.
    Interrupted,
}

impl SupervisorExit {
    /// Process exit code. All supervisor exits are normal retirements.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub escalation: EscalationPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            escalation: EscalationPolicy::default(),
        }
    }
}

/// Outcome of one poll cycle.
enum Poll {
    Continue,
    Exit(SupervisorExit),
}

/// Owns everything the supervision loop needs; there is no global state.
pub struct Supervisor {
    url: String,
    source: Arc<dyn ConfigurationSource>,
    builder: Arc<dyn WorkerBuilder>,
    settings: SupervisorSettings,
    telemetry: MemoryTelemetry,
    consecutive_failures: u32,
    polls: u64,
    document: Vec<u8>,
}

impl Supervisor {
    pub fn new(
        url: impl Into<String>,
        source: Arc<dyn ConfigurationSource>,
        builder: Arc<dyn WorkerBuilder>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            url: url.into(),
            source,
            builder,
            settings,
            telemetry: MemoryTelemetry::new(),
            consecutive_failures: 0,
            polls: 0,
            document: Vec::new(),
        }
    }

    /// Number of completed poll cycles.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Start the worker and supervise it until an exit condition or
    /// `interrupt` completes.
    ///
    /// Returns `Err` only for fatal failures: unusable settings,
    /// configuration unavailable at startup, invalid configuration, a worker
    /// that could not be built or started, or a worker that stopped with an
    /// error.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<SupervisorExit> {
        if self.settings.poll_interval.is_zero() {
            return Err(CalcNodeError::ConfigError(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        let defaults = ConnectionDefaults::from_url(&self.url)?;
        let document = self.fetch_with_retry().await?;
        let config = load_worker_config(&document, &defaults)?;
        info!(
            url = %self.url,
            fingerprint = %fingerprint(&document),
            node = %config.node.id,
            "configuration loaded"
        );

        let mut worker = self.builder.build(config)?;
        self.document = document;
        tokio::pin!(interrupt);

        let started = tokio::select! {
            _ = &mut interrupt => None,
            started = worker.started() => Some(started),
        };
        match started {
            None => {
                info!("interrupted while the worker was starting");
                return self.finish(worker, SupervisorExit::Interrupted).await;
            }
            Some(Err(e)) => {
                error!(error = %e, "worker failed to start");
                worker.shutdown();
                return Err(e);
            }
            Some(Ok(())) => debug!("worker started"),
        }

        let mut ticker = poll_ticker(self.settings.poll_interval);
        let exit = loop {
            tokio::select! {
                _ = &mut interrupt => {
                    info!("interrupted; shutting worker down");
                    break SupervisorExit::Interrupted;
                }
                _ = ticker.tick() => {
                    if let Poll::Exit(exit) = self.poll_once(&worker).await {
                        break exit;
                    }
                }
            }
        };
        self.finish(worker, exit).await
    }

    async fn finish(&self, worker: WorkerHandle, exit: SupervisorExit) -> Result<SupervisorExit> {
        match exit {
            SupervisorExit::WorkerStopped => {
                if let Err(e) = worker.join().await {
                    error!(error = %e, "worker stopped with an error");
                    return Err(e);
                }
            }
            SupervisorExit::Interrupted => {
                worker.shutdown();
                if let Err(e) = worker.join().await {
                    error!(error = %e, "worker stopped with an error during shutdown");
                    return Err(e);
                }
            }
            SupervisorExit::ConfigurationChanged | SupervisorExit::ConfigurationUnreachable => {
                // The process is about to exit; do not wait for in-flight items.
                worker.shutdown();
            }
        }
        info!(?exit, polls = self.polls, "supervisor exiting");
        Ok(exit)
    }

    async fn fetch_with_retry(&self) -> Result<Vec<u8>> {
        let RetryPolicy { attempts, sleep: pause } = self.settings.retry;
        let attempts = attempts.max(1);

        for attempt in 1..=attempts {
            match self.source.fetch(&self.url).await {
                Ok(document) => {
                    debug!(attempt, bytes = document.len(), "configuration fetched");
                    return Ok(document);
                }
                Err(e) => {
                    warn!(url = %self.url, attempt, attempts, error = %e, "configuration fetch failed");
                    if attempt < attempts {
                        sleep(pause).await;
                    }
                }
            }
        }

        error!(url = %self.url, attempts, "configuration unavailable; giving up");
        Err(CalcNodeError::ConfigurationUnavailable {
            url: self.url.clone(),
            attempts,
        })
    }

    async fn poll_once(&mut self, worker: &WorkerHandle) -> Poll {
        self.polls += 1;
        self.telemetry.log_memory();

        if worker.is_finished() {
            info!("worker stopped on its own");
            return Poll::Exit(SupervisorExit::WorkerStopped);
        }

        match self.source.fetch(&self.url).await {
            Ok(document) if document != self.document => {
                info!(
                    previous = %fingerprint(&self.document),
                    current = %fingerprint(&document),
                    "configuration changed; retiring node"
                );
                Poll::Exit(SupervisorExit::ConfigurationChanged)
            }
            Ok(_) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "configuration reachable again"
                    );
                }
                self.consecutive_failures = 0;
                debug!(poll = self.polls, "configuration unchanged");
                Poll::Continue
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let failures = self.consecutive_failures;
                match self.settings.escalation.classify(failures) {
                    Escalation::Info => info!(failures, error = %e, "configuration poll failed"),
                    Escalation::Warn => warn!(failures, error = %e, "configuration poll failed"),
                    Escalation::Error => error!(failures, error = %e, "configuration poll failed"),
                    Escalation::Shutdown => {
                        error!(
                            failures,
                            error = %e,
                            "configuration unreachable too many times; retiring node"
                        );
                        return Poll::Exit(SupervisorExit::ConfigurationUnreachable);
                    }
                }
                Poll::Continue
            }
        }
    }
}

/// First tick one `period` from now. A slow fetch delays later polls rather
/// than triggering a burst of catch-up polls.
fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
