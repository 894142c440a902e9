//! Dependency graph derived from declared outputs and dependencies.
//!
//! An edge A → B exists when one of A's outputs is one of B's dependencies,
//! or when one path lies inside the other (directory outputs and
//! dependencies). The graph is never stored; it is rebuilt from the
//! definition whenever a plan is made.

use crate::errors::CycleDetectedError;
use crate::registry::{path_within, PipelineDefinition};
use std::collections::{BTreeSet, HashSet};

/// A directed acyclic graph of stages, topologically ordered.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Stage names in declaration order.
    names: Vec<String>,
    /// Declared outputs per stage.
    outs: Vec<Vec<String>>,
    /// Producers feeding each stage.
    upstream: Vec<BTreeSet<usize>>,
    /// Consumers fed by each stage.
    downstream: Vec<BTreeSet<usize>>,
    /// Execution order (topologically sorted), as declaration indices.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds and sorts the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`CycleDetectedError`] if a stage depends, directly or
    /// indirectly, on its own outputs.
    pub fn build(definition: &PipelineDefinition) -> Result<Self, CycleDetectedError> {
        let stages = definition.stages();
        let names: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
        let outs: Vec<Vec<String>> = stages.iter().map(|s| s.outs.clone()).collect();
        let mut upstream = vec![BTreeSet::new(); stages.len()];
        let mut downstream = vec![BTreeSet::new(); stages.len()];

        for (consumer, stage) in stages.iter().enumerate() {
            for dep in &stage.deps {
                for producer in producers(&outs, dep) {
                    if producer == consumer {
                        return Err(CycleDetectedError::new(vec![
                            stage.name.clone(),
                            stage.name.clone(),
                        ]));
                    }
                    upstream[consumer].insert(producer);
                    downstream[producer].insert(consumer);
                }
            }
        }

        let mut graph = Self {
            names,
            outs,
            upstream,
            downstream,
            order: Vec::new(),
        };
        graph.order = graph.topological_sort()?;
        Ok(graph)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.names.len()
    }

    /// Returns the name of the stage at a declaration index.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Returns the declaration index of a stage.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Returns the execution order as declaration indices.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Returns the execution order as stage names.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Returns the stages whose outputs feed the stage at `index`.
    #[must_use]
    pub fn upstream(&self, index: usize) -> &BTreeSet<usize> {
        &self.upstream[index]
    }

    /// Returns the stages fed by the stage at `index`.
    #[must_use]
    pub fn downstream(&self, index: usize) -> &BTreeSet<usize> {
        &self.downstream[index]
    }

    /// Returns the stages that produce `path` (or something inside it).
    #[must_use]
    pub fn producers_of(&self, path: &str) -> Vec<usize> {
        producers(&self.outs, path)
    }

    /// Returns every edge as `(producer, consumer)` names, in execution order.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .flat_map(|&p| {
                self.downstream[p]
                    .iter()
                    .map(move |&c| (self.names[p].as_str(), self.names[c].as_str()))
            })
            .collect()
    }

    /// Returns `roots` together with every stage upstream of them.
    #[must_use]
    pub fn with_ancestors(&self, roots: &[usize]) -> BTreeSet<usize> {
        let mut selected = BTreeSet::new();
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(index) = stack.pop() {
            if selected.insert(index) {
                stack.extend(self.upstream[index].iter().copied());
            }
        }
        selected
    }

    /// Kahn's algorithm; among ready stages the earliest declared runs first.
    fn topological_sort(&self) -> Result<Vec<usize>, CycleDetectedError> {
        let mut in_degree: Vec<usize> = self.upstream.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.names.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &child in &self.downstream[index] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() < self.names.len() {
            return Err(CycleDetectedError::new(self.find_cycle()));
        }
        Ok(order)
    }

    /// Finds one cycle, reported in data-flow direction.
    fn find_cycle(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for start in 0..self.names.len() {
            if !visited.contains(&start) {
                if let Some(cycle) = self.dfs_cycle(start, &mut visited, &mut rec_stack, &mut path) {
                    return cycle;
                }
            }
        }

        Vec::new()
    }

    fn dfs_cycle(
        &self,
        node: usize,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for &next in &self.downstream[node] {
            if !visited.contains(&next) {
                if let Some(cycle) = self.dfs_cycle(next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&next) {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&i| self.names[i].clone()).collect();
                cycle.push(self.names[next].clone());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(&node);
        None
    }
}

fn producers(outs: &[Vec<String>], path: &str) -> Vec<usize> {
    outs.iter()
        .enumerate()
        .filter(|(_, stage_outs)| {
            stage_outs
                .iter()
                .any(|out| path_within(path, out) || path_within(out, path))
        })
        .map(|(i, _)| i)
        .collect()
}
