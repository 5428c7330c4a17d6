//! Dependency graph with topological ordering and cycle detection.
//!
//! The lifecycle uses this to compute plugin start order: if A depends on B
//! then B must appear before A. Ordering uses Kahn's algorithm; cycles are
//! extracted with a depth-first search over a recursion stack.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// A single dependency declaration on another node.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    /// Constraint string evaluated by [`crate::version::VersionConstraint`].
    pub version_constraint: Option<String>,
    /// Optional dependencies do not block ordering when absent.
    pub optional: bool,
}

impl Dependency {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: None,
            optional: false,
        }
    }
}

/// A named node with its declared dependencies.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
}

impl GraphNode {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }
}

/// Graph over named nodes. Edges point from a dependency to its dependents,
/// so the topological order emits dependencies first.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
    /// Insertion order, kept so output is deterministic for equal-rank nodes.
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node.
    pub fn add_node(&mut self, node: GraphNode) {
        if !self.nodes.contains_key(&node.name) {
            self.order.push(node.name.clone());
        }
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forward edges restricted to the working set: dependency -> dependent.
    /// Dependency names that are not nodes of this graph are filtered out.
    fn edges(&self) -> HashMap<&str, Vec<&str>> {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in &self.order {
            let node = &self.nodes[name];
            for dep in &node.dependencies {
                if self.nodes.contains_key(&dep.name) {
                    edges
                        .entry(dep.name.as_str())
                        .or_default()
                        .push(node.name.as_str());
                }
            }
        }
        edges
    }

    /// Compute a topological order with Kahn's algorithm.
    ///
    /// For every edge `A depends on B`, B appears before A in the returned
    /// order. Fails with [`Error::CircularDependency`] when the sort
    /// terminates before emitting every node.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let edges = self.edges();
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), 0))
            .collect();
        for dependents in edges.values() {
            for dependent in dependents {
                *in_degree.entry(*dependent).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree[name] == 0)
            .collect();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            if let Some(dependents) = edges.get(name) {
                for dependent in dependents {
                    let degree = in_degree.get_mut(*dependent).expect("known node");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(Error::CircularDependency { cycle });
        }
        Ok(sorted)
    }

    /// Find one cycle, if any, as the node sequence that loops back to its
    /// first element. Runs a DFS keeping the current recursion stack; when a
    /// node already on the stack is revisited, the cycle is the stack suffix
    /// starting at that node.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for start in &self.order {
            if visited.contains(start.as_str()) {
                continue;
            }
            if let Some(cycle) =
                self.dfs_cycle(start.as_str(), &mut visited, &mut stack, &mut on_stack)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(name);
        stack.push(name);
        on_stack.insert(name);

        if let Some(node) = self.nodes.get(name) {
            for dep in &node.dependencies {
                let dep_name = dep.name.as_str();
                if !self.nodes.contains_key(dep_name) {
                    continue;
                }
                if on_stack.contains(dep_name) {
                    let pos = stack.iter().position(|n| *n == dep_name).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(dep_name.to_string());
                    return Some(cycle);
                }
                if !visited.contains(dep_name) {
                    if let Some(cycle) = self.dfs_cycle(dep_name, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(name);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, deps: &[&str]) -> GraphNode {
        let mut n = GraphNode::new(name, "1.0.0");
        for dep in deps {
            n = n.with_dependency(Dependency::required(*dep));
        }
        n
    }

    #[test]
    fn dependencies_come_first() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("b", &["a"]));
        graph.add_node(node("a", &[]));
        graph.add_node(node("c", &["b"]));

        let order = graph.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_is_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", &["c"]));
        graph.add_node(node("b", &["a"]));
        graph.add_node(node("c", &["b"]));

        match graph.topological_order() {
            Err(Error::CircularDependency { cycle }) => {
                assert!(!cycle.is_empty());
                // The cycle loops back to its first element.
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn acyclic_chain_has_no_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", &["b"]));
        graph.add_node(node("b", &["c"]));
        graph.add_node(node("c", &[]));
        assert!(graph.find_cycle().is_none());
        assert_eq!(graph.topological_order().unwrap().len(), 3);
    }

    #[test]
    fn unknown_dependencies_are_filtered() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", &["missing"]));
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["a".to_string()]);
    }
}
