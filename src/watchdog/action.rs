// src/watchdog/action.rs

//! What happens when a job item overruns its deadline.

use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::{CalculationJobItem, CalculationJobSpecification};
use crate::watchdog::threads::ThreadRegistry;

/// Exit code used when a hung node is terminated.
pub const FORCED_EXIT_CODE: i32 = 1;

/// Details of one execution that exceeded the deadline.
#[derive(Debug, Clone)]
pub struct Overrun {
    pub job: CalculationJobSpecification,
    pub item: CalculationJobItem,
    pub thread: ThreadId,
    pub thread_name: Option<String>,
    pub elapsed: Duration,
    registry: ThreadRegistry,
}

impl Overrun {
    pub(crate) fn new(
        job: CalculationJobSpecification,
        item: CalculationJobItem,
        thread: ThreadId,
        thread_name: Option<String>,
        elapsed: Duration,
        registry: ThreadRegistry,
    ) -> Self {
        Self {
            job,
            item,
            thread,
            thread_name,
            elapsed,
            registry,
        }
    }

    /// Whether the thread running the overrunning item is still alive.
    pub fn is_thread_alive(&self) -> bool {
        self.registry.is_alive(self.thread)
    }

    /// Whether any supervised worker thread is still alive.
    pub fn any_thread_alive(&self) -> bool {
        self.registry.any_alive()
    }
}

/// Invoked by the watchdog timer thread, outside the watchdog lock, at most
/// once per overrunning execution.
pub trait TimeoutAction: Send + Sync {
    fn job_item_execution_limit_exceeded(&self, overrun: &Overrun);
}

/// Logs the overrun and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTimeoutAction;

impl TimeoutAction for LoggingTimeoutAction {
    fn job_item_execution_limit_exceeded(&self, overrun: &Overrun) {
        warn!(
            job = %overrun.job,
            item = %overrun.item,
            thread = overrun.thread_name.as_deref().unwrap_or("<unnamed>"),
            elapsed_ms = overrun.elapsed.as_millis() as u64,
            "job item exceeded maximum execution time"
        );
    }
}

type Terminator = Box<dyn Fn(i32) + Send + Sync>;

/// Request a graceful node shutdown, then terminate the process if worker
/// threads are still alive once the grace period has passed.
pub struct GracefulThenForced {
    shutdown: CancellationToken,
    grace_period: Duration,
    terminator: Terminator,
}

impl GracefulThenForced {
    /// Cancelling `shutdown` must stop the node from accepting work.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            grace_period: Duration::ZERO,
            terminator: Box::new(|code| std::process::exit(code)),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Replace process termination, mostly for tests.
    pub fn with_terminator(mut self, terminator: impl Fn(i32) + Send + Sync + 'static) -> Self {
        self.terminator = Box::new(terminator);
        self
    }

    fn threads_alive(overrun: &Overrun) -> bool {
        overrun.is_thread_alive() || overrun.any_thread_alive()
    }
}

impl fmt::Debug for GracefulThenForced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulThenForced")
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl TimeoutAction for GracefulThenForced {
    fn job_item_execution_limit_exceeded(&self, overrun: &Overrun) {
        error!(
            job = %overrun.job,
            item = %overrun.item,
            thread = overrun.thread_name.as_deref().unwrap_or("<unnamed>"),
            elapsed_ms = overrun.elapsed.as_millis() as u64,
            "job item exceeded maximum execution time; shutting node down"
        );
        self.shutdown.cancel();

        let deadline = Instant::now() + self.grace_period;
        while Self::threads_alive(overrun) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }

        if Self::threads_alive(overrun) {
            error!(
                grace_ms = self.grace_period.as_millis() as u64,
                "worker threads still alive after graceful shutdown; terminating"
            );
            (self.terminator)(FORCED_EXIT_CODE);
        } else {
            info!("worker threads stopped after graceful shutdown");
        }
    }
}
