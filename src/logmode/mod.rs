// src/logmode/mod.rs

//! Execution log verbosity control.
//!
//! Callers ask for a minimum [`ExecutionLogMode`] on *targets*: a
//! calculation configuration plus one of its outputs. The controller keeps
//! two reference-counted indices:
//!
//! - target level: how many outstanding `Full` requests each target has.
//!   This is the source of truth and survives recompilation.
//! - node level: for every output of every node in the input closure of an
//!   elevated target's producing node, how many elevations cover it. This
//!   index is derived from the target level and the current compiled graph.
//!
//! Writers (elevation changes and recompilation) serialize on one mutex.
//! Readers ([`ExecutionLogModeSource::log_mode`]) only touch the concurrent
//! node-level map and never take that mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::dag::CompiledViewDefinition;
use crate::job::CalculationJob;
use crate::types::{ExecutionLogMode, ValueSpecification};

mod refcount;

use refcount::{decrement, decrement_shared, increment, increment_shared};

/// A calculation configuration plus one of its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogTarget {
    pub calc_config: String,
    pub output: ValueSpecification,
}

impl LogTarget {
    pub fn new(calc_config: impl Into<String>, output: ValueSpecification) -> Self {
        Self {
            calc_config: calc_config.into(),
            output,
        }
    }
}

/// Node-level index: calc config -> output -> elevation count.
type OutputIndex = DashMap<String, DashMap<ValueSpecification, usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Increment,
    Decrement,
}

#[derive(Debug, Default)]
struct ElevationState {
    targets: HashMap<LogTarget, usize>,
    compiled: Option<Arc<CompiledViewDefinition>>,
}

/// Answers "what log mode does this output need" for result-producing
/// threads.
#[derive(Debug, Default)]
pub struct ExecutionLogModeSource {
    state: Mutex<ElevationState>,
    elevated: OutputIndex,
}

impl ExecutionLogModeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise (`Full`) or release (`Indicators`) the minimum log mode of each
    /// target.
    ///
    /// Each `Full` must eventually be matched by one `Indicators` on the
    /// same target. Releasing a target with no outstanding elevation is a
    /// no-op.
    pub fn set_minimum_log_mode(
        &self,
        mode: ExecutionLogMode,
        targets: impl IntoIterator<Item = LogTarget>,
    ) {
        let mut state = self.lock_state();
        let compiled = state.compiled.clone();

        for target in targets {
            match mode {
                ExecutionLogMode::Full => {
                    if increment(&mut state.targets, target.clone()) {
                        debug!(config = %target.calc_config, output = %target.output, "log elevation added");
                        if let Some(compiled) = &compiled {
                            walk_target(&self.elevated, compiled, &target, Walk::Increment);
                        }
                    }
                }
                ExecutionLogMode::Indicators => {
                    if !state.targets.contains_key(&target) {
                        warn!(
                            config = %target.calc_config,
                            output = %target.output,
                            "ignoring log mode release for target with no outstanding elevation"
                        );
                        continue;
                    }
                    if decrement(&mut state.targets, &target) {
                        debug!(config = %target.calc_config, output = %target.output, "log elevation removed");
                        if let Some(compiled) = &compiled {
                            walk_target(&self.elevated, compiled, &target, Walk::Decrement);
                        }
                    }
                }
            }
        }
    }

    /// Log mode required for `output` of `calc_config`. Lock-free.
    pub fn log_mode(&self, calc_config: &str, output: &ValueSpecification) -> ExecutionLogMode {
        let elevated = self
            .elevated
            .get(calc_config)
            .is_some_and(|outputs| outputs.get(output).is_some_and(|count| *count > 0));
        if elevated {
            ExecutionLogMode::Full
        } else {
            ExecutionLogMode::Indicators
        }
    }

    /// `Full` if any of a node's outputs is elevated.
    pub fn log_mode_for_outputs(
        &self,
        calc_config: &str,
        outputs: &[ValueSpecification],
    ) -> ExecutionLogMode {
        outputs
            .iter()
            .map(|output| self.log_mode(calc_config, output))
            .max()
            .unwrap_or_default()
    }

    /// Raise each item's log mode to what its outputs require. Never lowers
    /// a mode the item already carries.
    pub fn apply_to_job(&self, job: &mut CalculationJob) {
        let calc_config = job.specification().calc_config.clone();
        for item in job.items_mut() {
            let required = self.log_mode_for_outputs(&calc_config, &item.outputs);
            item.log_mode = item.log_mode.max(required);
        }
    }

    /// Install a newly compiled graph and rebuild the node-level index by
    /// replaying every outstanding target elevation against it.
    pub fn view_definition_compiled(&self, compiled: Arc<CompiledViewDefinition>) {
        let mut state = self.lock_state();

        let rebuilt: OutputIndex = DashMap::new();
        for target in state.targets.keys() {
            walk_target(&rebuilt, &compiled, target, Walk::Increment);
        }

        // Swap per configuration so readers never see a half-built map.
        let live: HashSet<String> = rebuilt.iter().map(|e| e.key().clone()).collect();
        for (calc_config, outputs) in rebuilt {
            self.elevated.insert(calc_config, outputs);
        }
        self.elevated.retain(|calc_config, _| live.contains(calc_config));

        info!(
            targets = state.targets.len(),
            configs = live.len(),
            "rebuilt log mode index after graph compilation"
        );
        state.compiled = Some(compiled);
    }

    /// Outstanding `Full` requests for `target`.
    pub fn target_ref_count(&self, target: &LogTarget) -> usize {
        self.lock_state().targets.get(target).copied().unwrap_or(0)
    }

    /// Number of elevations currently covering `output` in `calc_config`.
    pub fn output_ref_count(&self, calc_config: &str, output: &ValueSpecification) -> usize {
        self.elevated
            .get(calc_config)
            .and_then(|outputs| outputs.get(output).map(|count| *count))
            .unwrap_or(0)
    }

    fn lock_state(&self) -> MutexGuard<'_, ElevationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply `walk` to every output of the node producing `target` and of every
/// node transitively feeding it.
fn walk_target(
    index: &OutputIndex,
    compiled: &CompiledViewDefinition,
    target: &LogTarget,
    walk: Walk,
) {
    let Some(graph) = compiled.graph(&target.calc_config) else {
        debug!(config = %target.calc_config, "no compiled graph for configuration");
        return;
    };
    let Some(root) = graph.node_producing(&target.output) else {
        debug!(
            config = %target.calc_config,
            output = %target.output,
            "target not produced by compiled graph"
        );
        return;
    };

    if !index.contains_key(&target.calc_config) {
        index.insert(target.calc_config.clone(), DashMap::new());
    }
    let Some(outputs) = index.get(&target.calc_config) else {
        return;
    };

    for idx in graph.input_closure(root) {
        for output in &graph.node(idx).outputs {
            match walk {
                Walk::Increment => {
                    increment_shared(&outputs, output);
                }
                Walk::Decrement => {
                    decrement_shared(&outputs, output);
                }
            }
        }
    }
}
