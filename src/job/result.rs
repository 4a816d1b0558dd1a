// src/job/result.rs

use minicbor::{Decode, Encode};

use crate::job::spec::CalculationJobSpecification;
use crate::types::ValueSpecification;

/// Payload of a computed value. Analytics results are opaque to the node.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum ValueData {
    #[n(0)]
    Double(#[n(0)] f64),
    #[n(1)]
    Text(#[n(0)] String),
    #[n(2)]
    Bytes(#[cbor(n(0), with = "minicbor::bytes")] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ComputedValue {
    #[n(0)]
    pub specification: ValueSpecification,
    #[n(1)]
    pub value: ValueData,
}

impl ComputedValue {
    pub fn new(specification: ValueSpecification, value: ValueData) -> Self {
        Self {
            specification,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum LogEventLevel {
    #[n(0)]
    Debug,
    #[n(1)]
    Info,
    #[n(2)]
    Warn,
    #[n(3)]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LogEvent {
    #[n(0)]
    pub level: LogEventLevel,
    #[n(1)]
    pub message: String,
}

/// Execution log attached to one item result.
///
/// The indicator flags are always maintained; `events` is only filled when
/// the item ran with [`ExecutionLogMode::Full`](crate::types::ExecutionLogMode).
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ExecutionLog {
    #[n(0)]
    pub has_warnings: bool,
    #[n(1)]
    pub has_errors: bool,
    #[n(2)]
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum ItemStatus {
    #[n(0)]
    Success,
    #[n(1)]
    Failure(#[n(0)] String),
    /// The given number of inputs were not available to the item.
    #[n(2)]
    MissingInputs(#[n(0)] u32),
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CalculationJobResultItem {
    #[n(0)]
    pub status: ItemStatus,
    #[n(1)]
    pub outputs: Vec<ComputedValue>,
    #[n(2)]
    pub execution_log: ExecutionLog,
}

/// Outcome of a whole job, one entry per job item in dispatch order.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CalculationJobResult {
    #[n(0)]
    pub specification: CalculationJobSpecification,
    #[n(1)]
    pub node_id: String,
    #[n(2)]
    pub duration_nanos: u64,
    #[n(3)]
    pub items: Vec<CalculationJobResultItem>,
}
