// src/protocol/dispatch.rs

//! Double dispatch over [`NodeMessage`].
//!
//! A receiver implements [`NodeMessageHandler`] and overrides only the
//! variants it understands. Every other variant lands in
//! [`NodeMessageHandler::unexpected_message`], where the receiver decides
//! whether to log-and-drop or fail. Dispatch itself never panics and never
//! buffers or retries.

use super::{
    Cancel, Execute, Failure, Init, Invocations, IsAlive, JobResult, NodeMessage, Ready, Scaling,
};

/// One method per message variant.
///
/// The payload is passed by value: a message is dispatched once and then
/// gone, so handlers may keep whatever they need without cloning.
pub trait NodeMessageHandler {
    /// Fallback for variants the receiver does not handle.
    fn unexpected_message(&mut self, message: NodeMessage);

    fn on_ready(&mut self, message: Ready) {
        self.unexpected_message(NodeMessage::Ready(message));
    }

    fn on_init(&mut self, message: Init) {
        self.unexpected_message(NodeMessage::Init(message));
    }

    fn on_execute(&mut self, message: Execute) {
        self.unexpected_message(NodeMessage::Execute(message));
    }

    fn on_cancel(&mut self, message: Cancel) {
        self.unexpected_message(NodeMessage::Cancel(message));
    }

    fn on_is_alive(&mut self, message: IsAlive) {
        self.unexpected_message(NodeMessage::IsAlive(message));
    }

    fn on_scaling(&mut self, message: Scaling) {
        self.unexpected_message(NodeMessage::Scaling(message));
    }

    fn on_invocations(&mut self, message: Invocations) {
        self.unexpected_message(NodeMessage::Invocations(message));
    }

    fn on_result(&mut self, message: JobResult) {
        self.unexpected_message(NodeMessage::Result(message));
    }

    fn on_failure(&mut self, message: Failure) {
        self.unexpected_message(NodeMessage::Failure(message));
    }
}

/// Route `message` to the handler method for its variant.
pub fn dispatch<H: NodeMessageHandler + ?Sized>(message: NodeMessage, handler: &mut H) {
    match message {
        NodeMessage::Ready(m) => handler.on_ready(m),
        NodeMessage::Init(m) => handler.on_init(m),
        NodeMessage::Execute(m) => handler.on_execute(m),
        NodeMessage::Cancel(m) => handler.on_cancel(m),
        NodeMessage::IsAlive(m) => handler.on_is_alive(m),
        NodeMessage::Scaling(m) => handler.on_scaling(m),
        NodeMessage::Invocations(m) => handler.on_invocations(m),
        NodeMessage::Result(m) => handler.on_result(m),
        NodeMessage::Failure(m) => handler.on_failure(m),
    }
}
