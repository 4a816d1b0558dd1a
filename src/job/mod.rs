// src/job/mod.rs

//! Units of dispatched work and their outcomes.
//!
//! - [`spec`] holds the immutable job description sent by the coordinator.
//! - [`result`] holds what the node sends back.

pub mod result;
pub mod spec;

pub use result::{
    CalculationJobResult, CalculationJobResultItem, ComputedValue, ExecutionLog, ItemStatus,
    LogEvent, LogEventLevel, ValueData,
};
pub use spec::{CalculationJob, CalculationJobItem, CalculationJobSpecification};
