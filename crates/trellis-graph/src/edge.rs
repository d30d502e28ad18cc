//! Dependency edge representation.

/// A directed edge from a provider to one of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    dependent: String,
    dependency: String,
}

impl DependencyEdge {
    /// Creates an edge stating that `dependent` requires `dependency`.
    #[must_use]
    pub fn new(dependent: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            dependent: dependent.into(),
            dependency: dependency.into(),
        }
    }

    /// Provider declaring the dependency.
    #[must_use]
    pub const fn dependent(&self) -> &str {
        self.dependent.as_str()
    }

    /// Provider being depended upon.
    #[must_use]
    pub const fn dependency(&self) -> &str {
        self.dependency.as_str()
    }
}

impl std::fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.dependent, self.dependency)
    }
}
