// src/exec/statistics.rs

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::protocol::FunctionInvocationStatistics;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    invocations: u64,
    total_nanos: u128,
    total_inputs: u64,
    total_outputs: u64,
}

/// Per-function invocation counters, shared by all worker threads and
/// periodically drained into an `Invocations` message.
#[derive(Debug, Default)]
pub struct InvocationStatistics {
    counters: Mutex<HashMap<String, Counters>>,
}

impl InvocationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, function_id: &str, elapsed: Duration, inputs: usize, outputs: usize) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counters.entry(function_id.to_string()).or_default();
        entry.invocations += 1;
        entry.total_nanos += elapsed.as_nanos();
        entry.total_inputs += inputs as u64;
        entry.total_outputs += outputs as u64;
    }

    /// Take everything recorded since the last drain, ordered by function id.
    pub fn drain(&self) -> Vec<FunctionInvocationStatistics> {
        let drained = std::mem::take(
            &mut *self.counters.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let mut statistics: Vec<FunctionInvocationStatistics> = drained
            .into_iter()
            .filter(|(_, c)| c.invocations > 0)
            .map(|(function_id, c)| {
                let n = c.invocations as f64;
                FunctionInvocationStatistics {
                    function_id,
                    invocations: c.invocations,
                    mean_nanos: c.total_nanos as f64 / n,
                    mean_inputs: c.total_inputs as f64 / n,
                    mean_outputs: c.total_outputs as f64 / n,
                }
            })
            .collect();
        statistics.sort_by(|a, b| a.function_id.cmp(&b.function_id));
        statistics
    }
}
