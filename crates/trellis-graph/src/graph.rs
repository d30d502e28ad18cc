//! Dependency graph with cycle detection and level decomposition.

use std::collections::{BTreeSet, HashMap};

use crate::edge::DependencyEdge;
use crate::error::GraphError;
use crate::node::{Dependent, Mark, NodeId};

/// Directed acyclic graph over selected providers.
///
/// Edges point from a provider to the providers it depends on. The graph is
/// validated on construction, so every instance is acyclic and free of
/// dangling edges. Nodes are indexed by name order, which makes every query
/// deterministic for a given input.
///
/// # Example
///
/// ```
/// use trellis_graph::DependencyGraph;
/// use trellis_providers::{ProviderDescriptor, ProviderKind};
///
/// let providers = [
///     ProviderDescriptor::new("config", ProviderKind::Core),
///     ProviderDescriptor::new("logging", ProviderKind::Core).depends_on("config"),
///     ProviderDescriptor::new("auth", ProviderKind::Optional)
///         .depends_on("config")
///         .depends_on("logging"),
/// ];
/// let graph = DependencyGraph::build(&providers).expect("acyclic");
/// assert_eq!(graph.levels(), vec![vec!["config"], vec!["logging"], vec!["auth"]]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node names, sorted; the position is the node's id.
    names: Vec<String>,
    /// Lookup from name to id.
    index: HashMap<String, NodeId>,
    /// Outgoing edges: the dependencies of each node.
    dependencies: Vec<Vec<NodeId>>,
    /// Incoming edges: the dependents of each node.
    dependents: Vec<Vec<NodeId>>,
    /// Dependencies before dependents.
    order: Vec<NodeId>,
    /// Level of each node.
    level: Vec<usize>,
    /// Nodes grouped by level, each group sorted by name.
    levels: Vec<Vec<NodeId>>,
}

impl DependencyGraph {
    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNode`] when two inputs share a name,
    /// [`GraphError::UnresolvedDependency`] when a dependency is not among
    /// the inputs, and [`GraphError::CyclicDependency`] naming the providers
    /// on the first cycle found.
    pub fn build<I>(inputs: I) -> Result<Self, GraphError>
    where
        I: IntoIterator,
        I::Item: Dependent,
    {
        let mut nodes: Vec<I::Item> = inputs.into_iter().collect();
        nodes.sort_by(|left, right| left.name().cmp(right.name()));

        let mut index = HashMap::with_capacity(nodes.len());
        let mut names = Vec::with_capacity(nodes.len());
        for (id, input) in nodes.iter().enumerate() {
            if index.insert(input.name().to_owned(), id).is_some() {
                return Err(GraphError::DuplicateNode(input.name().to_owned()));
            }
            names.push(input.name().to_owned());
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (id, input) in nodes.iter().enumerate() {
            for dependency in input.dependencies() {
                let Some(&target) = index.get(dependency) else {
                    return Err(GraphError::UnresolvedDependency {
                        provider: input.name().to_owned(),
                        dependency: dependency.clone(),
                    });
                };
                if let Some(outgoing) = dependencies.get_mut(id) {
                    outgoing.push(target);
                }
                if let Some(incoming) = dependents.get_mut(target) {
                    incoming.push(id);
                }
            }
        }

        let mut graph = Self {
            names,
            index,
            dependencies,
            dependents,
            ..Self::default()
        };
        graph.order = graph.topological_sort()?;
        graph.assign_levels();
        Ok(graph)
    }

    /// Iterative depth-first traversal producing a post-order, which lists
    /// every dependency before its dependents.
    fn topological_sort(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut marks = vec![Mark::Unvisited; self.names.len()];
        let mut order = Vec::with_capacity(self.names.len());
        // Active path: node plus the position of the next child to visit.
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        for root in 0..self.names.len() {
            if marks.get(root) != Some(&Mark::Unvisited) {
                continue;
            }
            stack.push((root, 0));
            set_mark(&mut marks, root, Mark::InProgress);

            while let Some((node, next)) = stack.last_mut() {
                let current = *node;
                let child = self.dependencies_by_id(current).get(*next).copied();
                *next += 1;
                match child {
                    Some(target) => match marks.get(target).copied() {
                        Some(Mark::Unvisited) => {
                            set_mark(&mut marks, target, Mark::InProgress);
                            stack.push((target, 0));
                        }
                        Some(Mark::InProgress) => {
                            return Err(self.cycle_error(&stack, target));
                        }
                        _ => {}
                    },
                    None => {
                        set_mark(&mut marks, current, Mark::Done);
                        order.push(current);
                        stack.pop();
                    }
                }
            }
        }
        Ok(order)
    }

    fn cycle_error(&self, stack: &[(NodeId, usize)], repeated: NodeId) -> GraphError {
        let start = stack
            .iter()
            .position(|(node, _)| *node == repeated)
            .unwrap_or_default();
        let cycle = stack
            .iter()
            .skip(start)
            .map(|(node, _)| *node)
            .chain(std::iter::once(repeated))
            .map(|node| self.name_of(node).to_owned())
            .collect();
        GraphError::CyclicDependency { cycle }
    }

    fn assign_levels(&mut self) {
        let mut level = vec![0_usize; self.names.len()];
        for &node in &self.order {
            let depth = self
                .dependencies_by_id(node)
                .iter()
                .filter_map(|dependency| level.get(*dependency))
                .map(|dependency_level| dependency_level + 1)
                .max()
                .unwrap_or(0);
            if let Some(slot) = level.get_mut(node) {
                *slot = depth;
            }
        }

        let depth = level.iter().copied().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); depth];
        // Ids follow name order, so each group ends up sorted by name.
        for (node, node_level) in level.iter().enumerate() {
            if let Some(group) = levels.get_mut(*node_level) {
                group.push(node);
            }
        }
        self.level = level;
        self.levels = levels;
    }

    fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    fn name_of(&self, id: NodeId) -> &str {
        self.names.get(id).map_or("", String::as_str)
    }

    fn dependencies_by_id(&self, id: NodeId) -> &[NodeId] {
        self.dependencies.get(id).map_or(&[], Vec::as_slice)
    }

    fn dependents_by_id(&self, id: NodeId) -> &[NodeId] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    fn names_of<'a>(&'a self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<&'a str> {
        ids.into_iter().map(|id| self.name_of(*id)).collect()
    }

    /// Scheduling levels: level 0 holds providers without dependencies and
    /// level k providers whose dependencies all sit below k.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<&str>> {
        self.levels.iter().map(|group| self.names_of(group)).collect()
    }

    /// Number of levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Level of one provider.
    #[must_use]
    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.id(name).and_then(|id| self.level.get(id).copied())
    }

    /// All providers, dependencies first.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.names_of(&self.order)
    }

    /// Direct dependencies of a provider; empty for unknown names.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.id(name)
            .map(|id| self.names_of(self.dependencies_by_id(id)))
            .unwrap_or_default()
    }

    /// Direct dependents of a provider; empty for unknown names.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.id(name)
            .map(|id| self.names_of(self.dependents_by_id(id)))
            .unwrap_or_default()
    }

    /// Every provider that directly or indirectly depends on `name`, in
    /// topological order. The provider itself is not included.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(start) = self.id(name) else {
            return Vec::new();
        };
        let mut reached = BTreeSet::new();
        let mut pending = vec![start];
        while let Some(node) = pending.pop() {
            for &dependent in self.dependents_by_id(node) {
                if reached.insert(dependent) {
                    pending.push(dependent);
                }
            }
        }
        self.order
            .iter()
            .filter(|node| reached.contains(*node))
            .map(|node| self.name_of(*node))
            .collect()
    }

    /// All edges, ordered by dependent then declaration.
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(dependent, targets)| {
                targets
                    .iter()
                    .map(move |target| {
                        DependencyEdge::new(self.name_of(dependent), self.name_of(*target))
                    })
            })
            .collect()
    }

    /// Returns `true` when the provider is part of the graph.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` for an empty graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn set_mark(marks: &mut [Mark], node: NodeId, mark: Mark) {
    if let Some(slot) = marks.get_mut(node) {
        *slot = mark;
    }
}
