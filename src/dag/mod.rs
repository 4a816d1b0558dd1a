// src/dag/mod.rs

//! Compiled dependency graphs, as supplied by the (external) graph compiler.
//!
//! - [`graph`] holds the per-configuration graph and its traversal helpers.
//! - [`compiled`] groups the graphs of one compilation into an immutable
//!   snapshot.

pub mod compiled;
pub mod graph;

pub use compiled::CompiledViewDefinition;
pub use graph::{DependencyGraph, DependencyNode};
pub use petgraph::graph::NodeIndex;
