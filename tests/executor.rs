// tests/executor.rs

mod common;
use crate::common::builders::{
    DEFAULT_TARGET, JobBuilder, constant_item, full_log_item, job_spec, sleep_item, target, value,
};
use crate::common::{init_tracing, wait_until, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use calcnode::exec::{
    ExecutorEvent, ExecutorSettings, FunctionInvoker, FunctionRegistry, InvocationStatistics,
    ItemLog, JobExecutor, JobPhase, SHUTDOWN_FAILURE,
};
use calcnode::job::{
    CalculationJobItem, CalculationJobResult, ComputedValue, ItemStatus, LogEventLevel, ValueData,
};
use calcnode::types::{ExecutionLogMode, ValueSpecification};
use calcnode::watchdog::{LoggingTimeoutAction, MaximumJobItemExecutionWatchdog, ThreadRegistry};

type TestResult = Result<(), Box<dyn Error>>;

/// Sums its `Double` inputs into every output.
struct SumFunction;

impl FunctionInvoker for SumFunction {
    fn invoke(
        &self,
        item: &CalculationJobItem,
        inputs: &[ComputedValue],
        log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        let mut total = 0.0;
        for input in inputs {
            match input.value {
                ValueData::Double(v) => total += v,
                _ => bail!("{} is not a double", input.specification),
            }
        }
        log.info(format!("sum of {} inputs", inputs.len()));
        Ok(item
            .outputs
            .iter()
            .map(|o| ComputedValue::new(o.clone(), ValueData::Double(total)))
            .collect())
    }
}

/// Logs at every level, then succeeds with no outputs.
struct ChattyFunction;

impl FunctionInvoker for ChattyFunction {
    fn invoke(
        &self,
        _item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        log.debug("d");
        log.info("i");
        log.warn("w");
        Ok(Vec::new())
    }
}

struct FailingFunction;

impl FunctionInvoker for FailingFunction {
    fn invoke(
        &self,
        _item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        _log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        bail!("model did not converge")
    }
}

struct PanickingFunction;

impl FunctionInvoker for PanickingFunction {
    fn invoke(
        &self,
        _item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        _log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        panic!("division by zero in pricer")
    }
}

fn functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::with_builtins();
    functions
        .register("sum", SumFunction)
        .register("chatty", ChattyFunction)
        .register("failing", FailingFunction)
        .register("panicking", PanickingFunction);
    functions
}

fn item(function_id: &str, inputs: Vec<ValueSpecification>, output: &str) -> CalculationJobItem {
    CalculationJobItem::new(
        function_id,
        target(DEFAULT_TARGET),
        inputs,
        vec![value(output)],
    )
}

struct Harness {
    executor: JobExecutor,
    events: mpsc::Receiver<ExecutorEvent>,
    statistics: Arc<InvocationStatistics>,
    shutdown: CancellationToken,
}

impl Harness {
    fn start(capacity: usize) -> Result<Self, Box<dyn Error>> {
        let watchdog = Arc::new(MaximumJobItemExecutionWatchdog::start(
            Duration::from_secs(5),
            Duration::from_millis(10),
            ThreadRegistry::new(),
            Arc::new(LoggingTimeoutAction),
        )?);
        let statistics = Arc::new(InvocationStatistics::new());
        let (tx, events) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let executor = JobExecutor::start(
            ExecutorSettings {
                node_id: "test-node".to_string(),
                capacity,
            },
            functions(),
            watchdog,
            Arc::clone(&statistics),
            tx,
            shutdown.clone(),
        )?;
        Ok(Self {
            executor,
            events,
            statistics,
            shutdown,
        })
    }

    async fn next_event(&mut self) -> Result<ExecutorEvent, Box<dyn Error>> {
        with_timeout(self.events.recv())
            .await
            .ok_or_else(|| "event channel closed".into())
    }

    async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("unexpected executor event: {event:?}");
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.executor.shutdown();
    }
}

fn completed(event: ExecutorEvent) -> CalculationJobResult {
    match event {
        ExecutorEvent::Completed(result) => result,
        other => panic!("expected a completed job, got {other:?}"),
    }
}

#[tokio::test]
async fn items_run_in_order_and_feed_later_items() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let a = constant_item("A", 2.0, &[]);
    let b = constant_item("B", 3.0, &[]);
    let inputs = vec![a.outputs[0].clone(), b.outputs[0].clone()];
    let job = JobBuilder::new(1)
        .item(a)
        .item(b)
        .item(item("sum", inputs, "S"))
        .build();

    harness.executor.submit(job)?;
    let result = completed(harness.next_event().await?);

    assert_eq!(result.specification, job_spec(1));
    assert_eq!(result.node_id, "test-node");
    assert_eq!(result.items.len(), 3);
    assert!(result.items.iter().all(|i| i.status == ItemStatus::Success));
    assert_eq!(result.items[2].outputs[0].value, ValueData::Double(5.0));
    assert!(!harness.executor.is_live(&job_spec(1)));
    Ok(())
}

#[tokio::test]
async fn missing_inputs_are_reported_per_item() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let job = JobBuilder::new(1)
        .item(item("sum", vec![value("MarketData"), value("Curve")], "S"))
        .constant("A", 1.0)
        .build();

    harness.executor.submit(job)?;
    let result = completed(harness.next_event().await?);

    assert_eq!(result.items[0].status, ItemStatus::MissingInputs(2));
    assert!(result.items[0].outputs.is_empty());
    assert!(result.items[0].execution_log.has_warnings);
    assert_eq!(result.items[1].status, ItemStatus::Success);
    Ok(())
}

#[tokio::test]
async fn unknown_and_failing_functions_fail_only_their_item() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let job = JobBuilder::new(1)
        .item(item("does-not-exist", Vec::new(), "X"))
        .item(item("failing", Vec::new(), "Y"))
        .constant("Z", 4.0)
        .build();

    harness.executor.submit(job)?;
    let result = completed(harness.next_event().await?);

    match &result.items[0].status {
        ItemStatus::Failure(message) => assert!(message.contains("does-not-exist")),
        other => panic!("expected failure, got {other:?}"),
    }
    match &result.items[1].status {
        ItemStatus::Failure(message) => assert!(message.contains("did not converge")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(result.items[1].execution_log.has_errors);
    assert_eq!(result.items[2].status, ItemStatus::Success);
    Ok(())
}

#[tokio::test]
async fn a_panicking_function_fails_the_job() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    harness
        .executor
        .submit(JobBuilder::new(1).item(item("panicking", Vec::new(), "X")).build())?;

    match harness.next_event().await? {
        ExecutorEvent::Failed { job, error } => {
            assert_eq!(job, job_spec(1));
            assert!(error.contains("division by zero"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // The worker survives and keeps serving.
    harness.executor.submit(JobBuilder::new(2).constant("A", 1.0).build())?;
    assert_eq!(completed(harness.next_event().await?).specification, job_spec(2));
    Ok(())
}

#[tokio::test]
async fn execution_log_detail_follows_the_item_log_mode() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let job = JobBuilder::new(1)
        .item(item("chatty", Vec::new(), "Quiet"))
        .item(full_log_item(item("chatty", Vec::new(), "Loud")))
        .build();
    harness.executor.submit(job)?;
    let result = completed(harness.next_event().await?);

    let quiet = &result.items[0].execution_log;
    assert!(quiet.has_warnings);
    assert!(quiet.events.is_empty());

    let loud = &result.items[1].execution_log;
    assert!(loud.has_warnings);
    assert!(!loud.has_errors);
    let levels: Vec<LogEventLevel> = loud.events.iter().map(|e| e.level).collect();
    assert_eq!(
        levels,
        vec![LogEventLevel::Debug, LogEventLevel::Info, LogEventLevel::Warn]
    );
    Ok(())
}

#[tokio::test]
async fn cancelling_one_job_leaves_others_alone() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let j1 = JobBuilder::new(1).sleep("Slow", 150).constant("After", 1.0).build();
    let j2 = JobBuilder::new(2).constant("Other", 2.0).build();
    harness.executor.submit(j1)?;
    harness.executor.submit(j2)?;

    assert!(wait_until(Duration::from_secs(2), || {
        harness.executor.phase(&job_spec(1)) == Some(JobPhase::Running)
    }));
    assert_eq!(harness.executor.phase(&job_spec(2)), Some(JobPhase::Queued));
    assert!(harness.executor.cancel(&job_spec(1)));

    let result = completed(harness.next_event().await?);
    assert_eq!(result.specification, job_spec(2));
    harness.assert_quiet(Duration::from_millis(200)).await;
    assert!(!harness.executor.is_live(&job_spec(1)));
    Ok(())
}

#[tokio::test]
async fn a_job_cancelled_while_queued_never_runs() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    harness.executor.submit(JobBuilder::new(1).sleep("Slow", 100).build())?;
    harness.executor.submit(JobBuilder::new(2).constant("A", 1.0).build())?;
    assert!(harness.executor.cancel(&job_spec(2)));

    assert_eq!(completed(harness.next_event().await?).specification, job_spec(1));
    harness.assert_quiet(Duration::from_millis(150)).await;
    assert!(!harness.executor.cancel(&job_spec(2)));
    assert_eq!(harness.statistics.drain().len(), 1, "only sleep ran");
    Ok(())
}

#[tokio::test]
async fn statistics_accumulate_per_function() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    let job = JobBuilder::new(1)
        .constant("A", 1.0)
        .constant("B", 2.0)
        .noop()
        .build();
    harness.executor.submit(job)?;
    completed(harness.next_event().await?);

    let statistics = harness.statistics.drain();
    let ids: Vec<&str> = statistics.iter().map(|s| s.function_id.as_str()).collect();
    assert_eq!(ids, vec!["constant", "noop"]);
    assert_eq!(statistics[0].invocations, 2);
    assert_eq!(statistics[0].mean_outputs, 1.0);
    assert_eq!(statistics[1].mean_outputs, 0.0);

    assert!(harness.statistics.drain().is_empty());
    Ok(())
}

#[tokio::test]
async fn capacity_bounds_concurrent_jobs() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(2)?;
    let registry: ThreadRegistry = harness.executor.registry().clone();
    assert_eq!(registry.alive_count(), 2);

    for id in 1..=3 {
        harness.executor.submit(JobBuilder::new(id).sleep("S", 150).build())?;
    }
    assert!(wait_until(Duration::from_secs(2), || {
        harness.executor.phase(&job_spec(1)) == Some(JobPhase::Running)
            && harness.executor.phase(&job_spec(2)) == Some(JobPhase::Running)
    }));
    assert_eq!(harness.executor.phase(&job_spec(3)), Some(JobPhase::Queued));

    for _ in 0..3 {
        completed(harness.next_event().await?);
    }
    Ok(())
}

#[tokio::test]
async fn scaling_grows_and_shrinks_the_pool() -> TestResult {
    init_tracing();
    let harness = Harness::start(1)?;
    let registry = harness.executor.registry().clone();

    harness.executor.set_capacity(3)?;
    assert_eq!(harness.executor.capacity(), 3);
    assert_eq!(registry.alive_count(), 3);

    harness.executor.set_capacity(1)?;
    assert!(wait_until(Duration::from_secs(2), || registry.alive_count() == 1));

    // Growing again refills the retired slots.
    harness.executor.set_capacity(2)?;
    assert_eq!(registry.alive_count(), 2);
    Ok(())
}

#[tokio::test]
async fn shutdown_returns_queued_jobs_and_rejects_new_ones() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    harness.executor.submit(JobBuilder::new(1).sleep("Slow", 100).build())?;
    harness.executor.submit(JobBuilder::new(2).constant("A", 1.0).build())?;
    harness.executor.submit(JobBuilder::new(3).constant("B", 1.0).build())?;
    assert!(wait_until(Duration::from_secs(2), || {
        harness.executor.phase(&job_spec(1)) == Some(JobPhase::Running)
    }));

    let abandoned = harness.executor.shutdown();
    assert_eq!(abandoned, vec![job_spec(2), job_spec(3)]);
    assert!(harness.executor.submit(JobBuilder::new(4).noop().build()).is_err());

    // The running job still completes.
    assert_eq!(completed(harness.next_event().await?).specification, job_spec(1));

    let registry = harness.executor.registry().clone();
    assert!(wait_until(Duration::from_secs(2), || !registry.any_alive()));
    Ok(())
}

#[tokio::test]
async fn jobs_dequeued_after_shutdown_began_are_failed_not_run() -> TestResult {
    init_tracing();
    let mut harness = Harness::start(1)?;

    harness.executor.submit(JobBuilder::new(1).sleep("Slow", 100).build())?;
    harness.executor.submit(JobBuilder::new(2).constant("A", 1.0).build())?;
    assert!(wait_until(Duration::from_secs(2), || {
        harness.executor.phase(&job_spec(1)) == Some(JobPhase::Running)
    }));

    // The node's token fires before the executor drains its queue.
    harness.shutdown.cancel();

    assert_eq!(completed(harness.next_event().await?).specification, job_spec(1));
    assert_eq!(
        harness.next_event().await?,
        ExecutorEvent::Failed {
            job: job_spec(2),
            error: SHUTDOWN_FAILURE.to_string(),
        }
    );
    assert!(!harness.executor.is_live(&job_spec(2)));
    assert!(harness.statistics.drain().iter().all(|s| s.function_id != "constant"));

    let registry = harness.executor.registry().clone();
    assert!(wait_until(Duration::from_secs(2), || !registry.any_alive()));
    Ok(())
}

#[test]
fn builtin_sleep_reports_its_duration() {
    let mut log = ItemLog::new(ExecutionLogMode::Full);
    let item = sleep_item("S", 5);
    let outputs = FunctionRegistry::with_builtins()
        .get("sleep")
        .expect("sleep is built in")
        .invoke(&item, &[], &mut log)
        .expect("sleep succeeds");

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].value, ValueData::Double(5.0));
    assert_eq!(log.into_log().events.len(), 1);
}
