//! Dependency ordering for trellis providers.
//!
//! [`DependencyGraph::build`] turns the selected providers into a validated
//! directed acyclic graph and decomposes it into scheduling levels: every
//! provider in level `k` depends only on providers in levels below `k`, so
//! all providers of one level can be initialised concurrently once the
//! previous level is up.
//!
//! Cycle detection uses an iterative depth-first traversal with an explicit
//! stack, so pathological inputs cannot exhaust the call stack.
//!
//! # Core Types
//!
//! - [`DependencyGraph`] - the validated graph and its queries
//! - [`DependencyEdge`] - one "depends on" relationship
//! - [`Dependent`] - input trait, implemented for provider descriptors

mod edge;
mod error;
mod graph;
mod node;

pub use edge::DependencyEdge;
pub use error::GraphError;
pub use graph::DependencyGraph;
pub use node::Dependent;

#[cfg(test)]
mod tests;
