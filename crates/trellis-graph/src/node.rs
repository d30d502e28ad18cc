//! Graph node inputs and traversal bookkeeping.

use trellis_providers::ProviderDescriptor;

/// Anything that can take part in a dependency graph.
pub trait Dependent {
    /// Unique node name.
    fn name(&self) -> &str;

    /// Names this node requires, in declaration order.
    fn dependencies(&self) -> &[String];
}

impl Dependent for ProviderDescriptor {
    fn name(&self) -> &str {
        ProviderDescriptor::name(self)
    }

    fn dependencies(&self) -> &[String] {
        ProviderDescriptor::dependencies(self)
    }
}

impl<T: Dependent + ?Sized> Dependent for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dependencies(&self) -> &[String] {
        (**self).dependencies()
    }
}

/// Dense index of a node inside one graph.
pub(crate) type NodeId = usize;

/// Depth-first traversal state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    Unvisited,
    InProgress,
    Done,
}
