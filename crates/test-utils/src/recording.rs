use std::sync::{Arc, Mutex};
use std::time::Duration;

use calcnode::protocol::{
    Cancel, Execute, Failure, Init, Invocations, IsAlive, JobResult, MessageType, NodeMessage,
    NodeMessageHandler, Ready, Scaling,
};
use calcnode::watchdog::{Overrun, TimeoutAction};

/// Overrides nothing: every message lands in `unexpected_message`.
#[derive(Debug, Default)]
pub struct DefaultOnlyHandler {
    pub unexpected: Vec<MessageType>,
}

impl NodeMessageHandler for DefaultOnlyHandler {
    fn unexpected_message(&mut self, message: NodeMessage) {
        self.unexpected.push(message.message_type());
    }
}

/// Overrides every variant and records which handler ran.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub handled: Vec<MessageType>,
    pub unexpected: Vec<MessageType>,
}

impl NodeMessageHandler for RecordingHandler {
    fn unexpected_message(&mut self, message: NodeMessage) {
        self.unexpected.push(message.message_type());
    }

    fn on_ready(&mut self, _message: Ready) {
        self.handled.push(MessageType::Ready);
    }

    fn on_init(&mut self, _message: Init) {
        self.handled.push(MessageType::Init);
    }

    fn on_execute(&mut self, _message: Execute) {
        self.handled.push(MessageType::Execute);
    }

    fn on_cancel(&mut self, _message: Cancel) {
        self.handled.push(MessageType::Cancel);
    }

    fn on_is_alive(&mut self, _message: IsAlive) {
        self.handled.push(MessageType::IsAlive);
    }

    fn on_scaling(&mut self, _message: Scaling) {
        self.handled.push(MessageType::Scaling);
    }

    fn on_invocations(&mut self, _message: Invocations) {
        self.handled.push(MessageType::Invocations);
    }

    fn on_result(&mut self, _message: JobResult) {
        self.handled.push(MessageType::Result);
    }

    fn on_failure(&mut self, _message: Failure) {
        self.handled.push(MessageType::Failure);
    }
}

/// What a [`RecordingTimeoutAction`] saw for one overrun.
#[derive(Debug, Clone)]
pub struct RecordedOverrun {
    pub function_id: String,
    pub elapsed: Duration,
    pub thread_alive: bool,
}

/// Records overruns instead of acting on them.
#[derive(Debug, Clone, Default)]
pub struct RecordingTimeoutAction {
    overruns: Arc<Mutex<Vec<RecordedOverrun>>>,
}

impl RecordingTimeoutAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overruns(&self) -> Vec<RecordedOverrun> {
        self.overruns.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.overruns.lock().unwrap().len()
    }
}

impl TimeoutAction for RecordingTimeoutAction {
    fn job_item_execution_limit_exceeded(&self, overrun: &Overrun) {
        self.overruns.lock().unwrap().push(RecordedOverrun {
            function_id: overrun.item.function_id.clone(),
            elapsed: overrun.elapsed,
            thread_alive: overrun.is_thread_alive(),
        });
    }
}
