// src/dag/compiled.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::dag::graph::DependencyGraph;

/// Output of one graph compilation: a dependency graph per calculation
/// configuration.
///
/// Held behind an `Arc` and replaced wholesale on recompilation; nothing
/// inside is ever mutated.
#[derive(Debug, Clone, Default)]
pub struct CompiledViewDefinition {
    graphs: HashMap<String, Arc<DependencyGraph>>,
}

impl CompiledViewDefinition {
    pub fn new(graphs: impl IntoIterator<Item = DependencyGraph>) -> Self {
        let graphs = graphs
            .into_iter()
            .map(|g| (g.calc_config().to_string(), Arc::new(g)))
            .collect();
        Self { graphs }
    }

    pub fn graph(&self, calc_config: &str) -> Option<&Arc<DependencyGraph>> {
        self.graphs.get(calc_config)
    }

    pub fn calc_configs(&self) -> impl Iterator<Item = &str> {
        self.graphs.keys().map(|s| s.as_str())
    }
}
