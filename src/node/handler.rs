// src/node/handler.rs

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::JobExecutor;
use crate::job::CalculationJobSpecification;
use crate::protocol::{
    Cancel, Execute, Failure, Init, IsAlive, NodeMessage, NodeMessageHandler, Ready, Scaling,
};

/// Reply sent for `IsAlive` entries the node has no record of.
pub const JOB_NOT_KNOWN: &str = "job not known to node";

/// Node-side receiver of coordinator messages.
///
/// Handling is synchronous; anything to send back is buffered and collected
/// with [`NodeHandler::take_replies`] after each dispatch.
pub struct NodeHandler {
    node_id: String,
    function_init_id: Option<u64>,
    executor: Arc<JobExecutor>,
    shutdown: CancellationToken,
    replies: Vec<NodeMessage>,
}

impl NodeHandler {
    pub fn new(node_id: String, executor: Arc<JobExecutor>, shutdown: CancellationToken) -> Self {
        Self {
            node_id,
            function_init_id: None,
            executor,
            shutdown,
            replies: Vec::new(),
        }
    }

    pub fn function_init_id(&self) -> Option<u64> {
        self.function_init_id
    }

    /// Messages produced by the handlers since the last call.
    pub fn take_replies(&mut self) -> Vec<NodeMessage> {
        std::mem::take(&mut self.replies)
    }

    fn fail(&mut self, job: CalculationJobSpecification, error: impl Into<String>) {
        let error = error.into();
        warn!(job = %job, error = %error, "reporting job failure");
        self.replies.push(NodeMessage::Failure(Failure {
            job,
            error,
            node_id: self.node_id.clone(),
        }));
    }
}

impl NodeMessageHandler for NodeHandler {
    fn unexpected_message(&mut self, message: NodeMessage) {
        warn!(
            message_type = %message.message_type(),
            "unexpected message for a calculation node; dropping"
        );
    }

    fn on_init(&mut self, message: Init) {
        info!(function_init_id = message.function_init_id, "function repository initialised");
        self.function_init_id = Some(message.function_init_id);
    }

    fn on_execute(&mut self, message: Execute) {
        let job = message.job;
        let spec = job.specification().clone();

        if self.shutdown.is_cancelled() {
            self.fail(spec, "node is shutting down");
            return;
        }
        match self.function_init_id {
            None => {
                self.fail(spec, "node has not received Init");
                return;
            }
            Some(expected) if expected != job.function_init_id() => {
                let got = job.function_init_id();
                self.fail(
                    spec,
                    format!("function init id {got} does not match node's {expected}"),
                );
                return;
            }
            Some(_) => {}
        }

        if let Err(e) = self.executor.submit(job) {
            self.fail(spec, e.to_string());
        }
    }

    fn on_cancel(&mut self, message: Cancel) {
        for job in message.jobs() {
            if !self.executor.cancel(job) {
                debug!(job = %job, "cancel for unknown job ignored");
            }
        }
    }

    fn on_is_alive(&mut self, message: IsAlive) {
        for job in message.jobs {
            if !self.executor.is_live(&job) {
                self.fail(job, JOB_NOT_KNOWN);
            }
        }
    }

    fn on_scaling(&mut self, message: Scaling) {
        if message.capacity == 0 {
            warn!("ignoring request to scale to zero capacity");
            return;
        }
        match self.executor.set_capacity(message.capacity as usize) {
            Ok(()) => self.replies.push(NodeMessage::Ready(Ready {
                capacity: message.capacity,
                node_id: self.node_id.clone(),
            })),
            Err(e) => warn!(error = %e, capacity = message.capacity, "scaling failed"),
        }
    }
}
