//! Plan registry of one fusion attempt and the cross-attempt plan cache.

use std::collections::{HashMap, HashSet};

use crate::arena::Arena;
use crate::graph::NodeId;
use crate::kernel::FusedKernel;
use crate::plan::{CellPlan, PlanHandle, PlanNode};

/// Captured inputs and plan of one completed sub-result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanEntry {
    /// Operator-graph values bound at execution time; position 0 is the
    /// main input.
    pub inputs: Vec<NodeId>,
    pub plan: CellPlan,
}

/// Insertion-ordered map from operator-graph node to plan entry.
///
/// All entries share one node arena, so an entry extending another one
/// refers to the same plan nodes rather than a copy.
#[derive(Clone, Debug, Default)]
pub struct PlanRegistry {
    pub nodes: Arena<PlanNode>,
    entries: Vec<(NodeId, PlanEntry)>,
    index: HashMap<NodeId, usize>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: NodeId) -> bool {
        self.index.contains_key(&key)
    }

    pub fn get(&self, key: NodeId) -> Option<&PlanEntry> {
        self.index.get(&key).map(|&i| &self.entries[i].1)
    }

    /// Inserts an entry. Re-inserting an existing key replaces its entry
    /// without changing its position.
    pub fn insert(&mut self, key: NodeId, entry: PlanEntry) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = entry,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key, entry));
            }
        }
    }

    /// The most recently inserted entry.
    pub fn last(&self) -> Option<(NodeId, &PlanEntry)> {
        self.entries.last().map(|(k, e)| (*k, e))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PlanEntry)> {
        self.entries.iter().map(|(k, e)| (*k, e))
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut PlanEntry> {
        self.entries.iter_mut().map(|(_, e)| e)
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// The entry representing the completed region: the last one whose
    /// output is not nested inside another entry's tree.
    ///
    /// Entries share subtrees, so one walk over the union of all trees
    /// expands every reachable node once.
    pub fn top_level(&self) -> Option<(NodeId, &PlanEntry)> {
        let mut nested = HashSet::new();
        let mut expanded = HashSet::new();
        let mut stack: Vec<PlanHandle> = self
            .entries
            .iter()
            .map(|(_, entry)| entry.plan.output)
            .collect();
        while let Some(handle) = stack.pop() {
            if !expanded.insert(handle) {
                continue;
            }
            for child in self.nodes[handle].children() {
                nested.insert(child);
                stack.push(child);
            }
        }
        self.entries
            .iter()
            .rev()
            .find(|(_, e)| !nested.contains(&e.plan.output))
            .map(|(k, e)| (*k, e))
    }
}

/// Register of completed kernels, shared by all attempts of one planner run.
#[derive(Clone, Debug, Default)]
pub struct PlanCache {
    covered: HashSet<NodeId>,
    kernels: Vec<FusedKernel>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `node` completed a plan of an earlier attempt.
    pub fn contains(&self, node: NodeId) -> bool {
        self.covered.contains(&node)
    }

    /// Records a kernel together with every node that completed one of its
    /// sub-plans.
    pub fn record(&mut self, covered: impl IntoIterator<Item = NodeId>, kernel: FusedKernel) {
        self.covered.extend(covered);
        self.covered.insert(kernel.root);
        self.kernels.push(kernel);
    }

    /// Kernels in completion order.
    pub fn kernels(&self) -> &[FusedKernel] {
        &self.kernels
    }

    pub fn kernel_for(&self, root: NodeId) -> Option<&FusedKernel> {
        self.kernels.iter().find(|k| k.root == root)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
