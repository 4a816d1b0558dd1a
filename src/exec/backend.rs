// src/exec/backend.rs

//! Pluggable function implementations.
//!
//! The executor never knows what a function computes. It looks the item's
//! `function_id` up in a [`FunctionRegistry`] and hands the resolved inputs
//! to the matching [`FunctionInvoker`]. Real analytics are registered by the
//! embedding application; the crate itself only ships diagnostic built-ins:
//!
//! - `noop`: produces nothing.
//! - `constant`: emits each output's `constant` property as a double.
//! - `sleep`: blocks for the `duration_ms` property, then emits it.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::exec::execution_log::ItemLog;
use crate::job::{CalculationJobItem, ComputedValue, ValueData};

pub const NOOP_FUNCTION: &str = "noop";
pub const CONSTANT_FUNCTION: &str = "constant";
pub const SLEEP_FUNCTION: &str = "sleep";

/// Computes the outputs of one job item.
///
/// Called on a worker thread under the watchdog. Blocking is allowed; a
/// function that never returns is what the watchdog exists for.
pub trait FunctionInvoker: Send + Sync {
    fn invoke(
        &self,
        item: &CalculationJobItem,
        inputs: &[ComputedValue],
        log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>>;
}

/// Function id -> implementation.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    invokers: HashMap<String, Arc<dyn FunctionInvoker>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the diagnostic built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NOOP_FUNCTION, NoopFunction);
        registry.register(CONSTANT_FUNCTION, ConstantFunction);
        registry.register(SLEEP_FUNCTION, SleepFunction);
        registry
    }

    /// Register `invoker` under `function_id`, replacing any previous one.
    pub fn register(
        &mut self,
        function_id: impl Into<String>,
        invoker: impl FunctionInvoker + 'static,
    ) -> &mut Self {
        self.invokers.insert(function_id.into(), Arc::new(invoker));
        self
    }

    pub fn get(&self, function_id: &str) -> Option<Arc<dyn FunctionInvoker>> {
        self.invokers.get(function_id).cloned()
    }

    pub fn function_ids(&self) -> impl Iterator<Item = &str> {
        self.invokers.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.function_ids().collect();
        ids.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &ids)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoopFunction;

impl FunctionInvoker for NoopFunction {
    fn invoke(
        &self,
        _item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        _log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantFunction;

impl FunctionInvoker for ConstantFunction {
    fn invoke(
        &self,
        item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        item.outputs
            .iter()
            .map(|output| {
                let raw = output
                    .single_property("constant")
                    .ok_or_else(|| anyhow!("output {output} has no single 'constant' property"))?;
                let value: f64 = raw
                    .parse()
                    .with_context(|| format!("'constant' of {output} is not a number: {raw}"))?;
                log.debug(format!("{output} = {value}"));
                Ok(ComputedValue::new(output.clone(), ValueData::Double(value)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SleepFunction;

impl FunctionInvoker for SleepFunction {
    fn invoke(
        &self,
        item: &CalculationJobItem,
        _inputs: &[ComputedValue],
        log: &mut ItemLog,
    ) -> anyhow::Result<Vec<ComputedValue>> {
        let millis = item
            .outputs
            .iter()
            .find_map(|o| o.single_property("duration_ms"))
            .ok_or_else(|| anyhow!("no output of {item} carries a 'duration_ms' property"))?;
        let millis: u64 = millis
            .parse()
            .with_context(|| format!("invalid 'duration_ms' on {item}: {millis}"))?;

        log.info(format!("sleeping for {millis}ms"));
        thread::sleep(Duration::from_millis(millis));

        Ok(item
            .outputs
            .iter()
            .map(|o| ComputedValue::new(o.clone(), ValueData::Double(millis as f64)))
            .collect())
    }
}
