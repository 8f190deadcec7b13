//! Dependency DAG over task ids.
//!
//! Forward adjacency (task -> dependents) plus a remaining-dependencies
//! counter per task. Cycles are rejected at insert, including self-loops;
//! forward references to not-yet-registered dependencies are allowed during
//! registration and verified before scheduling starts.

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{RunError, RunResult};

#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    /// task -> tasks that depend on it. Keys may be forward references
    /// until [`DependencyGraph::verify_resolved`] runs.
    dependents: AHashMap<Arc<str>, Vec<Arc<str>>>,
    /// Registered task -> number of incomplete dependencies.
    remaining: AHashMap<Arc<str>, usize>,
    /// Registration order, used for deterministic initial-ready order.
    order: Vec<Arc<str>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` with its dependency list.
    ///
    /// Rejects self-loops and any edge that would close a cycle through the
    /// edges known so far. Dependencies on ids not registered yet are
    /// accepted as forward references.
    pub fn insert(&mut self, id: &Arc<str>, deps: &[Arc<str>]) -> RunResult<()> {
        for dep in deps {
            if dep == id {
                return Err(RunError::cycle(format!("task '{id}' depends on itself")));
            }
            if self.reaches(id, dep) {
                return Err(RunError::cycle(format!(
                    "dependency of '{id}' on '{dep}' would create a cycle"
                )));
            }
        }
        for dep in deps {
            self.dependents.entry(Arc::clone(dep)).or_default().push(Arc::clone(id));
        }
        self.remaining.insert(Arc::clone(id), deps.len());
        self.order.push(Arc::clone(id));
        Ok(())
    }

    /// Walks forward edges from `from`, looking for `target`.
    fn reaches(&self, from: &Arc<str>, target: &Arc<str>) -> bool {
        let mut stack = vec![from];
        let mut seen: Vec<&Arc<str>> = Vec::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if seen.contains(&node) {
                continue;
            }
            seen.push(node);
            if let Some(dependents) = self.dependents.get(node) {
                stack.extend(dependents.iter());
            }
        }
        false
    }

    /// Checks that every referenced dependency resolved to a registered
    /// task. Must pass before scheduling starts.
    pub fn verify_resolved(&self) -> RunResult<()> {
        for dep in self.dependents.keys() {
            if !self.remaining.contains_key(dep) {
                return Err(RunError::unknown_task(dep));
            }
        }
        Ok(())
    }

    /// Tasks with no dependencies, in registration order.
    pub fn initial_ready(&self) -> Vec<Arc<str>> {
        self.order
            .iter()
            .filter(|id| self.remaining[*id] == 0)
            .cloned()
            .collect()
    }

    /// Marks `id` completed: decrements every dependent's counter by exactly
    /// one and returns the dependents that just became ready.
    pub fn mark_completed(&mut self, id: &str) -> Vec<Arc<str>> {
        let mut newly_ready = Vec::new();
        if let Some(dependents) = self.dependents.get(id) {
            for dependent in dependents.clone() {
                let counter = self
                    .remaining
                    .get_mut(&dependent)
                    .expect("dependent registered before scheduling");
                *counter -= 1;
                if *counter == 0 {
                    newly_ready.push(dependent);
                }
            }
        }
        newly_ready
    }

    /// All transitive dependents of `id`, for the failure cascade.
    pub fn transitive_dependents(&self, id: &Arc<str>) -> Vec<Arc<str>> {
        let mut out: Vec<Arc<str>> = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(dependents) = self.dependents.get(node) {
                for dependent in dependents {
                    if !out.contains(dependent) {
                        out.push(Arc::clone(dependent));
                        stack.push(dependent);
                    }
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub fn remaining_of(&self, id: &str) -> usize {
        self.remaining[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Arc<str> {
        Arc::from(name)
    }

    #[test]
    fn diamond_ready_progression() {
        let mut graph = DependencyGraph::new();
        graph.insert(&id("seed"), &[]).unwrap();
        graph.insert(&id("left"), &[id("seed")]).unwrap();
        graph.insert(&id("right"), &[id("seed")]).unwrap();
        graph.insert(&id("merge"), &[id("left"), id("right")]).unwrap();

        assert_eq!(graph.initial_ready(), vec![id("seed")]);
        let ready = graph.mark_completed("seed");
        assert_eq!(ready, vec![id("left"), id("right")]);
        assert_eq!(graph.remaining_of("merge"), 2);
        assert!(graph.mark_completed("left").is_empty());
        assert_eq!(graph.mark_completed("right"), vec![id("merge")]);
    }

    #[test]
    fn self_loop_rejected() {
        let mut graph = DependencyGraph::new();
        let err = graph.insert(&id("a"), &[id("a")]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CycleError);
    }

    #[test]
    fn two_node_cycle_rejected_at_second_insert() {
        let mut graph = DependencyGraph::new();
        graph.insert(&id("a"), &[id("b")]).unwrap();
        let err = graph.insert(&id("b"), &[id("a")]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CycleError);
    }

    #[test]
    fn forward_reference_must_resolve() {
        let mut graph = DependencyGraph::new();
        graph.insert(&id("a"), &[id("ghost")]).unwrap();
        let err = graph.verify_resolved().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnknownTask);
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn transitive_dependents_cover_all_downstream() {
        let mut graph = DependencyGraph::new();
        graph.insert(&id("a"), &[]).unwrap();
        graph.insert(&id("b"), &[id("a")]).unwrap();
        graph.insert(&id("c"), &[id("b")]).unwrap();
        graph.insert(&id("d"), &[id("a")]).unwrap();
        let mut downstream = graph.transitive_dependents(&id("a"));
        downstream.sort();
        assert_eq!(downstream, vec![id("b"), id("c"), id("d")]);
    }
}
