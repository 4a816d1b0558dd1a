// src/exec/executor.rs

//! Worker thread pool that runs jobs item by item.
//!
//! Jobs arrive on a crossbeam queue and are drained by up to `capacity`
//! std threads, each registered in the watchdog's [`ThreadRegistry`].
//! Outcomes go back to the async node over a bounded tokio channel using
//! `blocking_send`.
//!
//! Cancellation is cooperative: a cancelled job stops before its next item
//! and reports nothing. A running item is never interrupted.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{CalcNodeError, Result};
use crate::exec::backend::FunctionRegistry;
use crate::exec::execution_log::ItemLog;
use crate::exec::statistics::InvocationStatistics;
use crate::job::{
    CalculationJob, CalculationJobItem, CalculationJobResult, CalculationJobResultItem,
    CalculationJobSpecification, ComputedValue, ItemStatus,
};
use crate::types::ValueSpecification;
use crate::watchdog::{MaximumJobItemExecutionWatchdog, ThreadRegistry};

/// How long an idle worker waits on the queue before re-checking shutdown
/// and its slot.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Failure reason for jobs that were accepted but never started because the
/// node is shutting down.
pub const SHUTDOWN_FAILURE: &str = "node is shutting down";

/// What a worker thread reports back to the node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Completed(CalculationJobResult),
    Failed {
        job: CalculationJobSpecification,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Running,
}

#[derive(Debug, Clone, Copy)]
struct LiveJob {
    phase: JobPhase,
    cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub node_id: String,
    pub capacity: usize,
}

struct ExecutorShared {
    node_id: String,
    functions: FunctionRegistry,
    watchdog: Arc<MaximumJobItemExecutionWatchdog>,
    statistics: Arc<InvocationStatistics>,
    events: mpsc::Sender<ExecutorEvent>,
    live: Mutex<HashMap<CalculationJobSpecification, LiveJob>>,
    capacity: AtomicUsize,
    queue: Receiver<CalculationJob>,
    shutdown: CancellationToken,
}

/// Runs submitted jobs on a resizable pool of worker threads.
pub struct JobExecutor {
    shared: Arc<ExecutorShared>,
    submit: Mutex<Option<Sender<CalculationJob>>>,
    slots: Mutex<Vec<Option<ThreadId>>>,
}

impl JobExecutor {
    /// Start `settings.capacity` worker threads.
    pub fn start(
        settings: ExecutorSettings,
        functions: FunctionRegistry,
        watchdog: Arc<MaximumJobItemExecutionWatchdog>,
        statistics: Arc<InvocationStatistics>,
        events: mpsc::Sender<ExecutorEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let (submit, queue) = channel::unbounded();
        let executor = Self {
            shared: Arc::new(ExecutorShared {
                node_id: settings.node_id,
                functions,
                watchdog,
                statistics,
                events,
                live: Mutex::new(HashMap::new()),
                capacity: AtomicUsize::new(0),
                queue,
                shutdown,
            }),
            submit: Mutex::new(Some(submit)),
            slots: Mutex::new(Vec::new()),
        };
        executor.set_capacity(settings.capacity)?;
        Ok(executor)
    }

    /// Queue a job. Fails once shutdown has begun.
    pub fn submit(&self, job: CalculationJob) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(CalcNodeError::InvalidJob(format!(
                "node is shutting down; job {} not accepted",
                job.specification()
            )));
        }
        let guard = self.submit.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(submit) = guard.as_ref() else {
            return Err(CalcNodeError::InvalidJob(format!(
                "job queue closed; job {} not accepted",
                job.specification()
            )));
        };

        let spec = job.specification().clone();
        self.shared.lock_live().insert(
            spec.clone(),
            LiveJob {
                phase: JobPhase::Queued,
                cancelled: false,
            },
        );
        if submit.send(job).is_err() {
            self.shared.lock_live().remove(&spec);
            return Err(CalcNodeError::InvalidJob(format!(
                "job queue closed; job {spec} not accepted"
            )));
        }
        debug!(job = %spec, "job queued");
        Ok(())
    }

    /// Mark a queued or running job as cancelled. Returns `false` if the
    /// job is not known to this executor.
    pub fn cancel(&self, job: &CalculationJobSpecification) -> bool {
        match self.shared.lock_live().get_mut(job) {
            Some(live) => {
                live.cancelled = true;
                info!(job = %job, phase = ?live.phase, "job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn phase(&self, job: &CalculationJobSpecification) -> Option<JobPhase> {
        self.shared.lock_live().get(job).map(|l| l.phase)
    }

    /// Whether the job is queued or running here.
    pub fn is_live(&self, job: &CalculationJobSpecification) -> bool {
        self.phase(job).is_some()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::SeqCst)
    }

    /// Resize the pool. Extra threads retire once their current job is done.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let previous = self.shared.capacity.swap(capacity, Ordering::SeqCst);
        let registry = self.registry();
        registry.reap();

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() < capacity {
            slots.resize(capacity, None);
        }
        for (slot, thread) in slots.iter_mut().enumerate().take(capacity) {
            if thread.is_some_and(|id| registry.is_alive(id)) {
                continue;
            }
            let shared = Arc::clone(&self.shared);
            let id = registry
                .spawn(format!("calcnode-worker-{slot}"), move || {
                    worker_loop(shared, slot)
                })
                .map_err(|e| {
                    CalcNodeError::WorkerBuild(format!("spawning worker thread {slot}: {e}"))
                })?;
            *thread = Some(id);
        }

        if previous != capacity {
            info!(previous, capacity, "executor capacity changed");
        }
        Ok(())
    }

    /// Stop accepting work and close the queue.
    ///
    /// Jobs still waiting in the queue are removed and returned so the
    /// caller can report them; in-flight jobs run to completion.
    pub fn shutdown(&self) -> Vec<CalculationJobSpecification> {
        self.shared.shutdown.cancel();
        drop(self.submit.lock().unwrap_or_else(PoisonError::into_inner).take());

        let mut abandoned = Vec::new();
        while let Ok(job) = self.shared.queue.try_recv() {
            let spec = job.specification().clone();
            self.shared.lock_live().remove(&spec);
            abandoned.push(spec);
        }
        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "abandoned queued jobs on shutdown");
        }
        abandoned
    }

    pub fn registry(&self) -> &ThreadRegistry {
        self.shared.watchdog.thread_registry()
    }
}

impl ExecutorShared {
    fn lock_live(&self) -> MutexGuard<'_, HashMap<CalculationJobSpecification, LiveJob>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self, job: &CalculationJobSpecification) -> bool {
        self.lock_live().get(job).is_some_and(|l| l.cancelled)
    }

    fn run_job(&self, job: CalculationJob) {
        let spec = job.specification().clone();
        if self.shutdown.is_cancelled() {
            self.lock_live().remove(&spec);
            info!(job = %spec, "job dequeued during shutdown; not started");
            self.report(
                &spec,
                ExecutorEvent::Failed {
                    job: spec.clone(),
                    error: SHUTDOWN_FAILURE.to_string(),
                },
            );
            return;
        }
        {
            let mut live = self.lock_live();
            match live.get_mut(&spec) {
                Some(l) if l.cancelled => {
                    live.remove(&spec);
                    info!(job = %spec, "job cancelled before it started");
                    return;
                }
                Some(l) => l.phase = JobPhase::Running,
                None => {
                    live.insert(
                        spec.clone(),
                        LiveJob {
                            phase: JobPhase::Running,
                            cancelled: false,
                        },
                    );
                }
            }
        }

        debug!(job = %spec, items = job.items().len(), "job started");
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute_items(&job)));

        let event = match outcome {
            Ok(Some(items)) => {
                let duration_nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
                info!(job = %spec, duration_ms = duration_nanos / 1_000_000, "job completed");
                Some(ExecutorEvent::Completed(CalculationJobResult {
                    specification: spec.clone(),
                    node_id: self.node_id.clone(),
                    duration_nanos,
                    items,
                }))
            }
            Ok(None) => None,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(job = %spec, error = %reason, "function panicked; failing job");
                Some(ExecutorEvent::Failed {
                    job: spec.clone(),
                    error: format!("function panicked: {reason}"),
                })
            }
        };

        self.lock_live().remove(&spec);
        if let Some(event) = event {
            self.report(&spec, event);
        }
    }

    fn report(&self, spec: &CalculationJobSpecification, event: ExecutorEvent) {
        if self.events.blocking_send(event).is_err() {
            warn!(job = %spec, "node event channel closed; dropping job outcome");
        }
    }

    /// Run every item in order. `None` if the job was cancelled part way.
    fn execute_items(&self, job: &CalculationJob) -> Option<Vec<CalculationJobResultItem>> {
        let spec = job.specification();
        let mut cache: HashMap<ValueSpecification, ComputedValue> = HashMap::new();
        let mut results = Vec::with_capacity(job.items().len());

        for (index, item) in job.items().iter().enumerate() {
            if self.is_cancelled(spec) {
                info!(
                    job = %spec,
                    skipped = job.items().len() - index,
                    "job cancelled; remaining items not started"
                );
                return None;
            }
            results.push(self.execute_item(spec, item, &mut cache));
        }
        Some(results)
    }

    fn execute_item(
        &self,
        spec: &CalculationJobSpecification,
        item: &CalculationJobItem,
        cache: &mut HashMap<ValueSpecification, ComputedValue>,
    ) -> CalculationJobResultItem {
        let mut log = ItemLog::new(item.log_mode);

        let mut inputs = Vec::with_capacity(item.inputs.len());
        let mut missing: u32 = 0;
        for input in &item.inputs {
            match cache.get(input) {
                Some(value) => inputs.push(value.clone()),
                None => {
                    missing += 1;
                    log.warn(format!("input {input} not available"));
                }
            }
        }
        if missing > 0 {
            debug!(job = %spec, item = %item, missing, "item skipped for missing inputs");
            return CalculationJobResultItem {
                status: ItemStatus::MissingInputs(missing),
                outputs: Vec::new(),
                execution_log: log.into_log(),
            };
        }

        let Some(invoker) = self.functions.get(&item.function_id) else {
            let message = format!("unknown function '{}'", item.function_id);
            warn!(job = %spec, item = %item, "{message}");
            log.error(message.clone());
            return CalculationJobResultItem {
                status: ItemStatus::Failure(message),
                outputs: Vec::new(),
                execution_log: log.into_log(),
            };
        };

        let started = Instant::now();
        let outcome = {
            let _watch = WatchGuard::start(&self.watchdog, spec, item);
            invoker.invoke(item, &inputs, &mut log)
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(outputs) => {
                self.statistics
                    .record(&item.function_id, elapsed, inputs.len(), outputs.len());
                for output in &outputs {
                    cache.insert(output.specification.clone(), output.clone());
                }
                CalculationJobResultItem {
                    status: ItemStatus::Success,
                    outputs,
                    execution_log: log.into_log(),
                }
            }
            Err(e) => {
                self.statistics
                    .record(&item.function_id, elapsed, inputs.len(), 0);
                let message = format!("{e:#}");
                debug!(job = %spec, item = %item, error = %message, "item failed");
                log.error(message.clone());
                CalculationJobResultItem {
                    status: ItemStatus::Failure(message),
                    outputs: Vec::new(),
                    execution_log: log.into_log(),
                }
            }
        }
    }
}

/// Brackets one invocation in the watchdog, including on unwind.
struct WatchGuard<'a> {
    watchdog: &'a MaximumJobItemExecutionWatchdog,
}

impl<'a> WatchGuard<'a> {
    fn start(
        watchdog: &'a MaximumJobItemExecutionWatchdog,
        spec: &CalculationJobSpecification,
        item: &CalculationJobItem,
    ) -> Self {
        watchdog.job_execution_started(spec, item);
        Self { watchdog }
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.watchdog.job_execution_stopped();
    }
}

fn worker_loop(shared: Arc<ExecutorShared>, slot: usize) {
    debug!(slot, "worker thread started");
    loop {
        if slot >= shared.capacity.load(Ordering::SeqCst) {
            debug!(slot, "worker thread retired by scaling");
            break;
        }
        // Jobs still queued after shutdown are failed by `run_job`, so only
        // an idle worker stops here.
        match shared.queue.recv_timeout(IDLE_POLL) {
            Ok(job) => shared.run_job(job),
            Err(RecvTimeoutError::Timeout) if shared.shutdown.is_cancelled() => {
                debug!(slot, "worker thread stopping for shutdown");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
