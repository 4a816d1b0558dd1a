// src/node/mod.rs

//! The running calculation node.
//!
//! One async task owns the coordinator connection:
//!
//! - a reader task decodes frames and forwards messages;
//! - the main loop dispatches them to [`NodeHandler`], relays job outcomes
//!   from the worker threads and periodically flushes invocation
//!   statistics;
//! - on shutdown it stops accepting work, reports abandoned queued jobs,
//!   waits for in-flight items and then returns.

pub mod handler;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::errors::{CalcNodeError, Result};
use crate::exec::{
    ExecutorEvent, ExecutorSettings, FunctionRegistry, InvocationStatistics, JobExecutor,
    SHUTDOWN_FAILURE,
};
use crate::protocol::{
    Failure, Invocations, JobResult, NodeMessage, Ready, decode_message, dispatch,
};
use crate::transport::{self, FrameReader, FrameWriter};
use crate::watchdog::{
    GracefulThenForced, MaximumJobItemExecutionWatchdog, ThreadRegistry, TimeoutAction,
};

pub use handler::{JOB_NOT_KNOWN, NodeHandler};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const INBOUND_CHANNEL_CAPACITY: usize = 64;
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Reported once by [`CalcNode::run_reporting`]: `Ok` when the coordinator
/// connection is up, or why it could not be established.
pub type StartupReport = std::result::Result<(), String>;

/// A calculation node built from a validated [`WorkerConfig`].
pub struct CalcNode {
    config: WorkerConfig,
    functions: FunctionRegistry,
    shutdown: CancellationToken,
    timeout_action: Option<Arc<dyn TimeoutAction>>,
}

impl CalcNode {
    pub fn new(config: WorkerConfig, functions: FunctionRegistry, shutdown: CancellationToken) -> Self {
        Self {
            config,
            functions,
            shutdown,
            timeout_action: None,
        }
    }

    /// Override what happens when an item overruns. Defaults to
    /// [`GracefulThenForced`] with the configured grace period.
    pub fn with_timeout_action(mut self, action: Arc<dyn TimeoutAction>) -> Self {
        self.timeout_action = Some(action);
        self
    }

    /// Connect to the configured coordinator and serve until shutdown or
    /// until the coordinator closes the connection.
    pub async fn run(self) -> Result<()> {
        let (report, _) = oneshot::channel();
        self.run_reporting(report).await
    }

    /// [`run`](Self::run), reporting on `report` whether the coordinator
    /// connection was established. A shutdown requested while connecting
    /// ends the task without a report.
    pub async fn run_reporting(self, report: oneshot::Sender<StartupReport>) -> Result<()> {
        let coordinator = &self.config.coordinator;
        let address = format!("{}:{}", coordinator.host, coordinator.port);
        let connection = tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!(coordinator = %address, "shutdown requested before connecting");
                return Ok(());
            }
            connection = transport::connect(
                &coordinator.host,
                coordinator.port,
                coordinator.max_frame_bytes,
            ) => connection,
        };

        match connection {
            Ok((reader, writer)) => {
                let _ = report.send(Ok(()));
                self.serve(reader, writer).await
            }
            Err(e) => {
                error!(coordinator = %address, error = %e, "cannot connect to coordinator");
                let _ = report.send(Err(format!("connecting to coordinator {address}: {e}")));
                Err(e)
            }
        }
    }

    /// Serve an established connection.
    pub async fn serve<R, W>(self, reader: FrameReader<R>, mut writer: FrameWriter<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let node = &self.config.node;
        let node_id = node.id.clone();

        let registry = ThreadRegistry::new();
        let action = self.timeout_action.unwrap_or_else(|| {
            Arc::new(
                GracefulThenForced::new(self.shutdown.clone())
                    .with_grace_period(node.timeout_grace_period),
            )
        });
        let watchdog = Arc::new(MaximumJobItemExecutionWatchdog::start(
            node.max_job_item_execution,
            node.watchdog_check_interval,
            registry.clone(),
            action,
        )?);

        let statistics = Arc::new(InvocationStatistics::new());
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let executor = Arc::new(JobExecutor::start(
            ExecutorSettings {
                node_id: node_id.clone(),
                capacity: node.capacity,
            },
            self.functions,
            Arc::clone(&watchdog),
            Arc::clone(&statistics),
            events_tx,
            self.shutdown.clone(),
        )?);
        let mut handler = NodeHandler::new(node_id.clone(), Arc::clone(&executor), self.shutdown.clone());

        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_messages(reader, inbound_tx));

        writer
            .send(&NodeMessage::Ready(Ready {
                capacity: u32::try_from(node.capacity).unwrap_or(u32::MAX),
                node_id: node_id.clone(),
            }))
            .await?;
        info!(node = %node_id, capacity = node.capacity, "node ready");

        let statistics_interval = node.statistics_interval;
        let mut statistics_tick = interval_at(Instant::now() + statistics_interval, statistics_interval);
        let mut connection_closed = false;

        let mut outcome: Result<()> = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(node = %node_id, "node shutdown requested");
                    break Ok(());
                }
                inbound = inbound_rx.recv() => match inbound {
                    Some(message) => {
                        dispatch(message, &mut handler);
                        if let Err(e) = send_all(&mut writer, handler.take_replies()).await {
                            break Err(e);
                        }
                    }
                    None => {
                        connection_closed = true;
                        break Ok(());
                    }
                },
                Some(event) = events_rx.recv() => {
                    if let Err(e) = writer.send(&event_message(event, &node_id)).await {
                        break Err(e);
                    }
                }
                _ = statistics_tick.tick() => {
                    if let Err(e) = flush_statistics(&statistics, &mut writer).await {
                        break Err(e);
                    }
                }
            }
        };

        if connection_closed {
            outcome = match reader_task.await {
                Ok(Ok(())) => {
                    info!(node = %node_id, "coordinator closed the connection");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(CalcNodeError::Other(e.into())),
            };
        } else {
            reader_task.abort();
        }

        let mut writer_ok = outcome.is_ok();
        if let Err(e) = &outcome {
            error!(node = %node_id, error = %e, "node connection failed");
        }

        // Graceful shutdown: no new work, report what never started, let
        // in-flight items finish.
        self.shutdown.cancel();
        let abandoned = executor.shutdown();
        let failures = abandoned
            .into_iter()
            .map(|job| {
                NodeMessage::Failure(Failure {
                    job,
                    error: SHUTDOWN_FAILURE.to_string(),
                    node_id: node_id.clone(),
                })
            })
            .collect();
        writer_ok = writer_ok && send_all(&mut writer, failures).await.is_ok();

        while registry.any_alive() {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    writer_ok = writer_ok && writer.send(&event_message(event, &node_id)).await.is_ok();
                }
                _ = sleep(DRAIN_POLL) => {}
            }
        }
        while let Ok(event) = events_rx.try_recv() {
            writer_ok = writer_ok && writer.send(&event_message(event, &node_id)).await.is_ok();
        }
        if writer_ok && flush_statistics(&statistics, &mut writer).await.is_err() {
            debug!("final statistics flush failed");
        }

        registry.reap();
        watchdog.stop();
        info!(node = %node_id, "node stopped");
        outcome
    }
}

async fn read_messages<R>(mut reader: FrameReader<R>, inbound: mpsc::Sender<NodeMessage>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = reader.next_frame().await? {
        match decode_message(&frame) {
            Ok(message) => {
                debug!(message_type = %message.message_type(), "message received");
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, bytes = frame.len(), "dropping undecodable frame"),
        }
    }
    Ok(())
}

async fn send_all<W: AsyncWrite + Unpin>(
    writer: &mut FrameWriter<W>,
    messages: Vec<NodeMessage>,
) -> Result<()> {
    for message in &messages {
        writer.send(message).await?;
    }
    Ok(())
}

async fn flush_statistics<W: AsyncWrite + Unpin>(
    statistics: &InvocationStatistics,
    writer: &mut FrameWriter<W>,
) -> Result<()> {
    let statistics = statistics.drain();
    if statistics.is_empty() {
        return Ok(());
    }
    debug!(functions = statistics.len(), "sending invocation statistics");
    writer
        .send(&NodeMessage::Invocations(Invocations { statistics }))
        .await
}

fn event_message(event: ExecutorEvent, node_id: &str) -> NodeMessage {
    match event {
        ExecutorEvent::Completed(result) => NodeMessage::Result(JobResult { result }),
        ExecutorEvent::Failed { job, error } => NodeMessage::Failure(Failure {
            job,
            error,
            node_id: node_id.to_string(),
        }),
    }
}
