// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`backend`] provides the `FunctionInvoker` trait, the registry that maps
//!   function ids to implementations, and the diagnostic built-ins.
//! - [`executor`] owns the worker thread pool that runs jobs under the
//!   execution watchdog and reports outcomes back to the node.
//! - [`execution_log`] captures per-item log events according to the item's
//!   log mode.
//! - [`statistics`] accumulates per-function invocation counters.

pub mod backend;
pub mod execution_log;
pub mod executor;
pub mod statistics;

pub use backend::{FunctionInvoker, FunctionRegistry};
pub use execution_log::ItemLog;
pub use executor::{ExecutorEvent, ExecutorSettings, JobExecutor, JobPhase, SHUTDOWN_FAILURE};
pub use statistics::InvocationStatistics;
