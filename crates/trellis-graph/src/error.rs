//! Error types for dependency graph construction.

use thiserror::Error;

/// Errors returned while building a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The declared dependencies form a cycle.
    ///
    /// `cycle` lists the providers on the cycle in traversal order with the
    /// first provider repeated at the end, e.g. `[a, b, c, a]`.
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Providers participating in the cycle.
        cycle: Vec<String>,
    },

    /// A provider depends on a name that is not part of the graph.
    #[error("provider '{provider}' depends on '{dependency}', which is not selected")]
    UnresolvedDependency {
        /// Provider declaring the dependency.
        provider: String,
        /// Missing dependency name.
        dependency: String,
    },

    /// Two nodes share a name.
    #[error("provider '{0}' appears more than once")]
    DuplicateNode(String),
}

impl GraphError {
    /// Providers named by the error.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        match self {
            Self::CyclicDependency { cycle } => cycle.iter().map(String::as_str).collect(),
            Self::UnresolvedDependency { provider, .. } => vec![provider.as_str()],
            Self::DuplicateNode(name) => vec![name.as_str()],
        }
    }
}
