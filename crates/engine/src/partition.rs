//! Dependency-aware grouping of work into concurrency-safe batches.
//!
//! Greedy, order-dependent scan: each ungrouped item seeds a new group, then
//! every later ungrouped item joins if it conflicts with no current member
//! (in either direction) and the group has room. This is an approximation of
//! graph colouring, not an optimal one; callers rely on the exact grouping it
//! produces for a given input order, so it must stay deterministic.

use std::collections::{HashMap, HashSet};

use fanout_core::{FanoutError, Result};
use serde::{Deserialize, Serialize};

use crate::task::WorkItem;

/// Group `items` so no two members of a group are related by `depends`,
/// and no group exceeds `max_group_size`.
pub fn partition<T, F>(items: Vec<T>, depends: F, max_group_size: usize) -> Result<Vec<Vec<T>>>
where
    F: Fn(&T, &T) -> bool,
{
    let plan = plan_groups(&items, depends, max_group_size)?;

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(plan
        .into_iter()
        .map(|group| group.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect())
}

/// Same grouping as [`partition`], expressed as indices into `items`.
pub fn plan_groups<T, F>(items: &[T], depends: F, max_group_size: usize) -> Result<Vec<Vec<usize>>>
where
    F: Fn(&T, &T) -> bool,
{
    if max_group_size < 1 {
        return Err(FanoutError::invalid("max_group_size must be at least 1"));
    }

    let conflicts = |a: usize, b: usize| depends(&items[a], &items[b]) || depends(&items[b], &items[a]);
    let mut processed = vec![false; items.len()];
    let mut groups = Vec::new();

    for seed in 0..items.len() {
        if processed[seed] {
            continue;
        }
        processed[seed] = true;
        let mut group = vec![seed];

        for candidate in seed + 1..items.len() {
            if group.len() >= max_group_size {
                break;
            }
            if processed[candidate] {
                continue;
            }
            if group.iter().all(|&member| !conflicts(member, candidate)) {
                processed[candidate] = true;
                group.push(candidate);
            }
        }
        groups.push(group);
    }

    Ok(groups)
}

/// Dependency edge: `from` must not run alongside `to` (and `to` depends on `from`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDependency {
    pub from: String,
    pub to: String,
}

/// Pairwise dependency relation over work-item ids. Read-only while partitioning.
///
/// Stored as an adjacency map so lookups borrow the ids instead of allocating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    edges: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `to` depends on `from`.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn with_dependency(mut self, from: &str, to: &str) -> Self {
        self.add_dependency(from, to);
        self
    }

    /// Whether `b` depends on `a` (directional).
    pub fn depends(&self, a: &str, b: &str) -> bool {
        self.edges.get(a).is_some_and(|targets| targets.contains(b))
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.values().all(HashSet::is_empty)
    }

    /// Every edge, in no particular order.
    pub fn dependencies(&self) -> impl Iterator<Item = TaskDependency> + '_ {
        self.edges.iter().flat_map(|(from, targets)| {
            targets.iter().map(move |to| TaskDependency {
                from: from.clone(),
                to: to.clone(),
            })
        })
    }

    /// Partition work items by id.
    pub fn partition_items<P>(
        &self,
        items: Vec<WorkItem<P>>,
        max_group_size: usize,
    ) -> Result<Vec<Vec<WorkItem<P>>>> {
        partition(items, |a, b| self.depends(a.id(), b.id()), max_group_size)
    }
}

impl FromIterator<TaskDependency> for DependencyGraph {
    fn from_iter<I: IntoIterator<Item = TaskDependency>>(iter: I) -> Self {
        let mut graph = Self::new();
        for dep in iter {
            graph.add_dependency(&dep.from, &dep.to);
        }
        graph
    }
}

impl FromIterator<(String, String)> for DependencyGraph {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut graph = Self::new();
        for (from, to) in iter {
            graph.add_dependency(&from, &to);
        }
        graph
    }
}
