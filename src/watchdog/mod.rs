// src/watchdog/mod.rs

//! Maximum job item execution watchdog.
//!
//! Worker threads bracket every item with
//! [`MaximumJobItemExecutionWatchdog::job_execution_started`] and
//! [`MaximumJobItemExecutionWatchdog::job_execution_stopped`]. A timer
//! thread wakes every `check_interval` and hands each execution that has
//! been running for at least `max_job_item_execution` to the configured
//! [`TimeoutAction`], exactly once per execution.
//!
//! An item that finishes after the deadline but before the next scan is
//! never reported. The watchdog never touches the hung item itself.

pub mod action;
pub mod threads;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::job::{CalculationJobItem, CalculationJobSpecification};

pub use action::{FORCED_EXIT_CODE, GracefulThenForced, LoggingTimeoutAction, Overrun, TimeoutAction};
pub use threads::ThreadRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Running,
    TimedOut,
}

#[derive(Debug)]
struct Execution {
    job: CalculationJobSpecification,
    item: CalculationJobItem,
    thread_name: Option<String>,
    started: Instant,
    state: ExecutionState,
}

struct Shared {
    max_job_item_execution: Duration,
    executions: Mutex<HashMap<ThreadId, Execution>>,
    action: Arc<dyn TimeoutAction>,
    registry: ThreadRegistry,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<ThreadId, Execution>> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark every newly overrunning execution and collect it for reporting.
    fn scan(&self, now: Instant) -> Vec<Overrun> {
        let mut executions = self.lock();
        executions
            .iter_mut()
            .filter(|(_, e)| e.state == ExecutionState::Running)
            .filter_map(|(thread, e)| {
                let elapsed = now.saturating_duration_since(e.started);
                if elapsed < self.max_job_item_execution {
                    return None;
                }
                e.state = ExecutionState::TimedOut;
                Some(Overrun::new(
                    e.job.clone(),
                    e.item.clone(),
                    *thread,
                    e.thread_name.clone(),
                    elapsed,
                    self.registry.clone(),
                ))
            })
            .collect()
    }
}

/// Watches worker threads for job items that run too long.
pub struct MaximumJobItemExecutionWatchdog {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl MaximumJobItemExecutionWatchdog {
    /// Start the watchdog and its timer thread.
    pub fn start(
        max_job_item_execution: Duration,
        check_interval: Duration,
        registry: ThreadRegistry,
        action: Arc<dyn TimeoutAction>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            max_job_item_execution,
            executions: Mutex::new(HashMap::new()),
            action,
            registry,
        });

        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let timer_shared = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("calcnode-watchdog".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(check_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    for overrun in timer_shared.scan(Instant::now()) {
                        timer_shared
                            .action
                            .job_item_execution_limit_exceeded(&overrun);
                    }
                }
                debug!("watchdog timer stopped");
            })?;

        info!(
            max_ms = max_job_item_execution.as_millis() as u64,
            check_ms = check_interval.as_millis() as u64,
            "execution watchdog started"
        );

        Ok(Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Record that the current thread started executing `item`.
    pub fn job_execution_started(
        &self,
        job: &CalculationJobSpecification,
        item: &CalculationJobItem,
    ) {
        let current = thread::current();
        let execution = Execution {
            job: job.clone(),
            item: item.clone(),
            thread_name: current.name().map(str::to_string),
            started: Instant::now(),
            state: ExecutionState::Running,
        };
        if let Some(previous) = self.shared.lock().insert(current.id(), execution) {
            warn!(
                job = %previous.job,
                item = %previous.item,
                "execution started without the previous one being stopped"
            );
        }
    }

    /// Record that the current thread finished its item.
    pub fn job_execution_stopped(&self) {
        let removed = self.shared.lock().remove(&thread::current().id());
        match removed {
            Some(e) if e.state == ExecutionState::TimedOut => {
                warn!(
                    job = %e.job,
                    item = %e.item,
                    elapsed_ms = e.started.elapsed().as_millis() as u64,
                    "job item completed after exceeding maximum execution time"
                );
            }
            Some(_) => {}
            None => debug!("execution stopped on a thread that was not being watched"),
        }
    }

    /// Number of threads currently inside an item.
    pub fn executing_count(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn thread_registry(&self) -> &ThreadRegistry {
        &self.shared.registry
    }

    /// Stop the timer thread. Idempotent.
    pub fn stop(&self) {
        drop(
            self.stop_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            if timer.thread().id() == thread::current().id() {
                // Stopped from within a timeout action; the loop exits on its own.
                return;
            }
            if timer.join().is_err() {
                warn!("watchdog timer thread panicked");
            }
        }
    }
}

impl Drop for MaximumJobItemExecutionWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
