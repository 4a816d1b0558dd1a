// src/protocol/mod.rs

//! Node control protocol.
//!
//! The coordinator and a calculation node talk in terms of a closed set of
//! [`NodeMessage`] variants:
//!
//! - [`dispatch`] routes a message to exactly one method of a
//!   [`NodeMessageHandler`]; variants a receiver does not override fall
//!   through to its `unexpected_message` handler.
//! - [`codec`] turns messages into self-describing CBOR envelopes and back,
//!   rejecting message types it does not know.
//!
//! Messages are plain values: built by the sender, encoded, decoded by the
//! receiver, dispatched once and dropped.

use std::convert::Infallible;
use std::fmt;

use minicbor::{Decode, Encode};
use thiserror::Error;

use crate::job::{CalculationJob, CalculationJobResult, CalculationJobSpecification};

pub mod codec;
pub mod dispatch;

pub use codec::{PROTOCOL_VERSION_V1, decode_message, encode_message};
pub use dispatch::{NodeMessageHandler, dispatch};

/// Node → coordinator: the node can accept `capacity` concurrent jobs.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Ready {
    #[n(0)]
    pub capacity: u32,
    #[n(1)]
    pub node_id: String,
}

/// Coordinator → node: the function repository state subsequent jobs were
/// resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Init {
    #[n(0)]
    pub function_init_id: u64,
}

/// Coordinator → node: run one job.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Execute {
    #[n(0)]
    pub job: CalculationJob,
}

/// Coordinator → node: abandon one or more jobs.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Cancel {
    #[n(0)]
    jobs: Vec<CalculationJobSpecification>,
}

impl Cancel {
    /// A cancel message names at least one job.
    pub fn new(jobs: Vec<CalculationJobSpecification>) -> Result<Self, ProtocolError> {
        if jobs.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "jobs",
                reason: "cancel must name at least one job".to_string(),
            });
        }
        Ok(Self { jobs })
    }

    pub fn jobs(&self) -> &[CalculationJobSpecification] {
        &self.jobs
    }
}

/// Coordinator → node: jobs the coordinator believes are still live on the
/// node.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IsAlive {
    #[n(0)]
    pub jobs: Vec<CalculationJobSpecification>,
}

/// Coordinator → node: desired number of concurrently executing jobs.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Scaling {
    #[n(0)]
    pub capacity: u32,
}

/// Aggregated invocation counters for one function since the last report.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FunctionInvocationStatistics {
    #[n(0)]
    pub function_id: String,
    #[n(1)]
    pub invocations: u64,
    #[n(2)]
    pub mean_nanos: f64,
    #[n(3)]
    pub mean_inputs: f64,
    #[n(4)]
    pub mean_outputs: f64,
}

/// Node → coordinator: per-function invocation statistics.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Invocations {
    #[n(0)]
    pub statistics: Vec<FunctionInvocationStatistics>,
}

/// Node → coordinator: a job finished.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct JobResult {
    #[n(0)]
    pub result: CalculationJobResult,
}

/// Node → coordinator: a job could not be run.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Failure {
    #[n(0)]
    pub job: CalculationJobSpecification,
    #[n(1)]
    pub error: String,
    #[n(2)]
    pub node_id: String,
}

/// Every message exchanged between coordinator and node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMessage {
    Ready(Ready),
    Init(Init),
    Execute(Execute),
    Cancel(Cancel),
    IsAlive(IsAlive),
    Scaling(Scaling),
    Invocations(Invocations),
    Result(JobResult),
    Failure(Failure),
}

/// Wire tag of each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Ready,
    Init,
    Execute,
    Cancel,
    IsAlive,
    Scaling,
    Invocations,
    Result,
    Failure,
}

impl MessageType {
    pub const ALL: [MessageType; 9] = [
        MessageType::Ready,
        MessageType::Init,
        MessageType::Execute,
        MessageType::Cancel,
        MessageType::IsAlive,
        MessageType::Scaling,
        MessageType::Invocations,
        MessageType::Result,
        MessageType::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ready => "READY",
            MessageType::Init => "INIT",
            MessageType::Execute => "EXECUTE",
            MessageType::Cancel => "CANCEL",
            MessageType::IsAlive => "IS_ALIVE",
            MessageType::Scaling => "SCALING",
            MessageType::Invocations => "INVOCATIONS",
            MessageType::Result => "RESULT",
            MessageType::Failure => "FAILURE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NodeMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            NodeMessage::Ready(_) => MessageType::Ready,
            NodeMessage::Init(_) => MessageType::Init,
            NodeMessage::Execute(_) => MessageType::Execute,
            NodeMessage::Cancel(_) => MessageType::Cancel,
            NodeMessage::IsAlive(_) => MessageType::IsAlive,
            NodeMessage::Scaling(_) => MessageType::Scaling,
            NodeMessage::Invocations(_) => MessageType::Invocations,
            NodeMessage::Result(_) => MessageType::Result,
            NodeMessage::Failure(_) => MessageType::Failure,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("cbor encode: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("cbor decode: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unsupported protocol version {got} (expected {expected})")]
    UnsupportedVersion { expected: u32, got: u32 },
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("trailing bytes after message envelope")]
    TrailingBytes,
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
}
