//! Dependency resolution
//!
//! Materializes explicit `requires`/`before` edges and implicit console
//! edges into one directed graph over task names, then produces a stable
//! topological order. Among tasks whose dependencies are satisfied, the one
//! declared first always runs first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::common::{Error, Result};
use crate::task::Registry;

/// Why an edge exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `requires` on the dependent task
    Requires,
    /// `before` on the dependency task
    Before,
    /// Dependent is bound to the console initialized by the dependency
    Console,
}

/// A dependency edge: `from` must run before `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// The materialized dependency graph
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Task names in declaration order
    nodes: Vec<String>,
    edges: Vec<Edge>,
    /// node -> nodes that must run after it
    adjacency: HashMap<String, Vec<String>>,
    /// node -> nodes it waits for
    reverse_adjacency: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build the graph from a registry
    ///
    /// Fails if a `requires` entry names an unknown task. `before` entries
    /// naming unknown tasks are dropped.
    pub fn build(registry: &Registry) -> Result<Self> {
        let mut edges = Vec::new();

        for task in registry.tasks() {
            for dependency in &task.requires {
                if !registry.contains(dependency) {
                    return Err(Error::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                edges.push(Edge {
                    from: dependency.clone(),
                    to: task.name.clone(),
                    kind: EdgeKind::Requires,
                });
            }

            for successor in &task.before {
                if registry.contains(successor) {
                    edges.push(Edge {
                        from: task.name.clone(),
                        to: successor.clone(),
                        kind: EdgeKind::Before,
                    });
                } else {
                    tracing::debug!(
                        "Ignoring 'before: {}' on task '{}': no such task",
                        successor,
                        task.name
                    );
                }
            }

            if let Some(console) = task.console {
                let init = console.as_str();
                if task.name != init {
                    if !registry.contains(init) {
                        return Err(Error::UnknownDependency {
                            task: task.name.clone(),
                            dependency: init.to_string(),
                        });
                    }
                    edges.push(Edge {
                        from: init.to_string(),
                        to: task.name.clone(),
                        kind: EdgeKind::Console,
                    });
                }
            }
        }

        let nodes: Vec<String> = registry.tasks().iter().map(|t| t.name.clone()).collect();
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

        for name in &nodes {
            adjacency.entry(name.clone()).or_default();
            reverse_adjacency.entry(name.clone()).or_default();
        }

        for edge in &edges {
            adjacency
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            reverse_adjacency
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
        }

        Ok(Self {
            nodes,
            edges,
            adjacency,
            reverse_adjacency,
        })
    }

    /// All edges, explicit and implicit
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Tasks that must run after `name`
    pub fn dependents(&self, name: &str) -> &[String] {
        self.adjacency.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Tasks `name` waits for
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.reverse_adjacency
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Stable topological order (Kahn's algorithm keyed on declaration order)
    pub fn order(&self) -> Result<Vec<String>> {
        let position: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|name| self.dependencies(name).len())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            let name = &self.nodes[i];
            order.push(name.clone());
            for next in self.dependents(name) {
                let j = position[next.as_str()];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let remaining: HashSet<&str> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, name)| name.as_str())
                .collect();
            return Err(Error::DependencyCycle {
                member: self.cycle_member(&remaining).to_string(),
            });
        }

        Ok(order)
    }

    /// Find a task that lies on a cycle among the unsorted tasks
    ///
    /// Every unsorted task has an unsorted dependency, so walking
    /// dependencies must revisit a task; the first revisited task is on a
    /// cycle.
    fn cycle_member<'a>(&'a self, remaining: &HashSet<&'a str>) -> &'a str {
        let mut current = self
            .nodes
            .iter()
            .map(String::as_str)
            .find(|name| remaining.contains(name))
            .unwrap_or_default();
        let mut visited = HashSet::new();

        while visited.insert(current) {
            match self
                .dependencies(current)
                .iter()
                .map(String::as_str)
                .find(|dep| remaining.contains(dep))
            {
                Some(dep) => current = dep,
                None => break,
            }
        }
        current
    }
}

/// Resolve the registry into one deterministic execution order
///
/// Fails atomically: either every task is ordered or an error is returned.
pub fn resolve(registry: &Registry) -> Result<Vec<String>> {
    let order = TaskGraph::build(registry)?.order()?;
    tracing::debug!("Resolved order: {:?}", order);
    Ok(order)
}
