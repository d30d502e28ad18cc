//! Unit tests for the trellis-graph crate.

use rstest::rstest;

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::node::Dependent;

struct Node {
    name: String,
    dependencies: Vec<String>,
}

impl Dependent for Node {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

fn node(name: &str, dependencies: &[&str]) -> Node {
    Node {
        name: name.to_owned(),
        dependencies: dependencies.iter().map(|dep| (*dep).to_owned()).collect(),
    }
}

fn build(nodes: Vec<Node>) -> Result<DependencyGraph, GraphError> {
    DependencyGraph::build(nodes)
}

fn position(order: &[&str], name: &str) -> usize {
    order
        .iter()
        .position(|entry| *entry == name)
        .expect("node present in order")
}

mod construction {
    use super::*;

    #[test]
    fn empty_input_gives_empty_graph() {
        let graph = build(Vec::new()).expect("empty graph");
        assert!(graph.is_empty());
        assert_eq!(graph.level_count(), 0);
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn rejects_duplicate_names() {
        let error = build(vec![node("a", &[]), node("a", &[])]).expect_err("duplicate");
        assert_eq!(error, GraphError::DuplicateNode("a".to_owned()));
    }

    #[test]
    fn rejects_dangling_dependency() {
        let error = build(vec![node("auth", &["database"])]).expect_err("dangling edge");
        assert_eq!(
            error,
            GraphError::UnresolvedDependency {
                provider: "auth".to_owned(),
                dependency: "database".to_owned(),
            }
        );
    }

    #[test]
    fn records_edges() {
        let graph = build(vec![node("a", &[]), node("b", &["a"])]).expect("acyclic");
        let edges: Vec<String> = graph.edges().iter().map(ToString::to_string).collect();
        assert_eq!(edges, vec!["b -> a".to_owned()]);
    }
}

mod cycles {
    use super::*;

    #[rstest]
    #[case::self_loop(vec![node("a", &["a"])], vec!["a", "a"])]
    #[case::pair(vec![node("a", &["b"]), node("b", &["a"])], vec!["a", "b", "a"])]
    #[case::triangle(
        vec![node("a", &["b"]), node("b", &["c"]), node("c", &["a"])],
        vec!["a", "b", "c", "a"]
    )]
    #[case::behind_acyclic_prefix(
        vec![node("a", &["b"]), node("b", &["c"]), node("c", &["d"]), node("d", &["c"])],
        vec!["c", "d", "c"]
    )]
    fn names_the_cycle(#[case] nodes: Vec<Node>, #[case] expected: Vec<&str>) {
        let error = build(nodes).expect_err("cycle");
        let GraphError::CyclicDependency { cycle } = &error else {
            panic!("expected a cycle error, got {error:?}");
        };
        assert_eq!(cycle, &expected);
        assert!(error.to_string().contains(&expected.join(" -> ")));
    }

    #[test]
    fn cycle_error_names_its_providers() {
        let error = build(vec![node("x", &["y"]), node("y", &["x"])]).expect_err("cycle");
        assert!(!error.providers().is_empty());
        assert!(error.providers().contains(&"x"));
    }

    #[test]
    fn deep_chains_do_not_overflow() {
        let depth = 50_000;
        // The first root in name order heads the whole chain.
        let mut nodes: Vec<Node> = (0..depth - 1)
            .map(|i| node(&format!("n{i:05}"), &[&format!("n{:05}", i + 1)]))
            .collect();
        nodes.push(node(&format!("n{:05}", depth - 1), &[]));
        let graph = build(nodes).expect("long chain is acyclic");
        assert_eq!(graph.level_count(), depth);
    }
}

mod levels {
    use super::*;

    fn diamond() -> DependencyGraph {
        build(vec![
            node("config", &[]),
            node("logging", &["config"]),
            node("metrics", &["config"]),
            node("auth", &["logging", "metrics"]),
            node("clock", &[]),
        ])
        .expect("diamond is acyclic")
    }

    #[test]
    fn groups_by_longest_dependency_chain() {
        let graph = diamond();
        assert_eq!(
            graph.levels(),
            vec![
                vec!["clock", "config"],
                vec!["logging", "metrics"],
                vec!["auth"],
            ]
        );
        assert_eq!(graph.level_of("auth"), Some(2));
        assert_eq!(graph.level_of("missing"), None);
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let graph = diamond();
        let order = graph.topological_order();
        assert_eq!(order.len(), 5);
        for name in &order {
            for dependency in graph.dependencies_of(name) {
                assert!(position(&order, dependency) < position(&order, name));
            }
        }
    }

    #[test]
    fn every_dependency_sits_in_a_lower_level() {
        let graph = diamond();
        for name in graph.topological_order() {
            let level = graph.level_of(name).expect("level");
            for dependency in graph.dependencies_of(name) {
                assert!(graph.level_of(dependency).expect("level") < level);
            }
        }
    }

    #[test]
    fn direct_and_transitive_dependents() {
        let graph = diamond();
        assert_eq!(graph.dependents_of("config"), vec!["logging", "metrics"]);
        assert_eq!(graph.dependencies_of("auth"), vec!["logging", "metrics"]);
        let transitive = graph.transitive_dependents("config");
        assert_eq!(transitive.len(), 3);
        assert_eq!(transitive.last(), Some(&"auth"));
        assert!(graph.transitive_dependents("auth").is_empty());
        assert!(graph.transitive_dependents("unknown").is_empty());
    }

    #[test]
    fn input_order_does_not_matter() {
        let forward = diamond();
        let reversed = build(vec![
            node("clock", &[]),
            node("auth", &["logging", "metrics"]),
            node("metrics", &["config"]),
            node("logging", &["config"]),
            node("config", &[]),
        ])
        .expect("acyclic");
        assert_eq!(forward.levels(), reversed.levels());
        assert_eq!(forward.topological_order(), reversed.topological_order());
    }
}

mod descriptors {
    use trellis_providers::{ProviderDescriptor, ProviderKind};

    use super::*;

    #[test]
    fn builds_from_provider_descriptors() {
        let providers = vec![
            ProviderDescriptor::new("config", ProviderKind::Core),
            ProviderDescriptor::new("cache", ProviderKind::Optional).depends_on("config"),
        ];
        let graph = DependencyGraph::build(&providers).expect("acyclic");
        assert_eq!(graph.levels(), vec![vec!["config"], vec!["cache"]]);
        assert!(graph.contains("cache"));
        assert_eq!(graph.len(), 2);
    }
}
