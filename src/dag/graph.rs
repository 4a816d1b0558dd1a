// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::{CalcNodeError, Result};
use crate::types::{ComputationTargetSpecification, ValueSpecification};

/// One node of a compiled graph: a function applied to a target, producing
/// one or more outputs from zero or more inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub function_id: String,
    pub target: ComputationTargetSpecification,
    pub inputs: Vec<ValueSpecification>,
    pub outputs: Vec<ValueSpecification>,
}

impl DependencyNode {
    pub fn new(
        function_id: impl Into<String>,
        target: ComputationTargetSpecification,
        inputs: Vec<ValueSpecification>,
        outputs: Vec<ValueSpecification>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            target,
            inputs,
            outputs,
        }
    }
}

/// Immutable dependency graph for one calculation configuration.
///
/// Nodes live in a petgraph arena; edge direction is producer -> consumer.
/// Inputs that no node produces (market data, for instance) have no edge.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    calc_config: String,
    graph: DiGraph<DependencyNode, ()>,
    producers: HashMap<ValueSpecification, NodeIndex>,
}

impl DependencyGraph {
    /// Build a graph from the compiler's node list.
    ///
    /// Fails if a node has no outputs, if two nodes produce the same output,
    /// or if the input relation contains a cycle.
    pub fn build(calc_config: impl Into<String>, nodes: Vec<DependencyNode>) -> Result<Self> {
        let calc_config = calc_config.into();
        let mut graph: DiGraph<DependencyNode, ()> = DiGraph::with_capacity(nodes.len(), 0);
        let mut producers: HashMap<ValueSpecification, NodeIndex> = HashMap::new();

        // First pass: add nodes and index their outputs.
        for node in nodes {
            if node.outputs.is_empty() {
                return Err(CalcNodeError::InvalidGraph(format!(
                    "node {} on {} in '{}' has no outputs",
                    node.function_id, node.target, calc_config
                )));
            }
            let outputs = node.outputs.clone();
            let idx = graph.add_node(node);
            for output in outputs {
                if let Some(existing) = producers.insert(output.clone(), idx) {
                    return Err(CalcNodeError::InvalidGraph(format!(
                        "output {} in '{}' produced by both {} and {}",
                        output,
                        calc_config,
                        graph[existing].function_id,
                        graph[idx].function_id
                    )));
                }
            }
        }

        // Second pass: wire producer -> consumer edges.
        let indices: Vec<NodeIndex> = graph.node_indices().collect();
        for consumer in indices {
            let inputs = graph[consumer].inputs.clone();
            for input in inputs {
                if let Some(&producer) = producers.get(&input) {
                    graph.update_edge(producer, consumer, ());
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node = &graph[cycle.node_id()];
            return Err(CalcNodeError::DagCycle(format!(
                "cycle detected in '{}' involving {} on {}",
                calc_config, node.function_id, node.target
            )));
        }

        Ok(Self {
            calc_config,
            graph,
            producers,
        })
    }

    pub fn calc_config(&self) -> &str {
        &self.calc_config
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, idx: NodeIndex) -> &DependencyNode {
        &self.graph[idx]
    }

    /// Node that produces `output`, if any.
    pub fn node_producing(&self, output: &ValueSpecification) -> Option<NodeIndex> {
        self.producers.get(output).copied()
    }

    /// Nodes whose outputs feed `idx` directly.
    pub fn input_nodes(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    /// `root` plus every node transitively feeding it, each exactly once.
    pub fn input_closure(&self, root: NodeIndex) -> Vec<NodeIndex> {
        let mut stack = vec![root];
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut closure = Vec::new();

        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            closure.push(idx);
            stack.extend(self.input_nodes(idx));
        }

        closure
    }
}
