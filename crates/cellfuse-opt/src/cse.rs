//! Sharing and clean-up of plan trees.
//!
//! Data leaves are interned by upstream value and name, and lookup adapters
//! by wrapped node and adapter kind, so every reference to the same value
//! resolves to one arena slot. After construction, lookups around scalar
//! leaves are dropped and unreferenced captured inputs pruned. Export copies
//! the top-level tree into a compact arena, renaming leaves to their
//! binding slots.

use std::collections::{HashMap, HashSet};

use cellfuse_ir::{
    Arena, Binding, DataLeaf, FusedKernel, KernelInput, LeafKind, NodeId, OpGraph, PlanHandle,
    PlanNode, PlanRegistry, UnaryType, post_order,
};

use crate::FusionError;

/// Memo tables for leaves and lookup adapters of one plan arena.
#[derive(Debug, Default)]
pub(crate) struct PlanInterner {
    leaves: HashMap<(NodeId, String), PlanHandle>,
    lookups: HashMap<(PlanHandle, UnaryType), PlanHandle>,
}

impl PlanInterner {
    /// Returns the existing leaf for the same value and name, or appends one.
    pub(crate) fn leaf(&mut self, nodes: &mut Arena<PlanNode>, leaf: DataLeaf) -> PlanHandle {
        *self
            .leaves
            .entry((leaf.node, leaf.name.clone()))
            .or_insert_with(|| nodes.append(PlanNode::Data(leaf)))
    }

    /// Returns the existing `op(input)` lookup, or appends one.
    pub(crate) fn lookup(
        &mut self,
        nodes: &mut Arena<PlanNode>,
        op: UnaryType,
        input: PlanHandle,
    ) -> PlanHandle {
        debug_assert!(op.is_lookup());
        *self
            .lookups
            .entry((input, op))
            .or_insert_with(|| nodes.append(PlanNode::Unary { op, input }))
    }
}

/// The bare leaf if `handle` is a lookup wrapped around a scalar leaf.
fn skip_redundant_lookup(nodes: &Arena<PlanNode>, handle: PlanHandle) -> PlanHandle {
    match nodes[handle] {
        PlanNode::Unary { op, input } if op.is_lookup() => match &nodes[input] {
            PlanNode::Data(leaf) if leaf.data_type.is_scalar() => input,
            _ => handle,
        },
        _ => handle,
    }
}

/// Replaces every reference to a lookup around a scalar leaf with the leaf
/// itself. Returns the number of rewritten references.
pub(crate) fn remove_redundant_lookups(registry: &mut PlanRegistry) -> usize {
    let mut rewritten = 0;
    for handle in registry.nodes.handles() {
        let node = &registry.nodes[handle];
        let updated = node.map_children(|child| skip_redundant_lookup(&registry.nodes, child));
        if updated.children() != node.children() {
            rewritten += 1;
            registry.nodes[handle] = updated;
        }
    }

    let outputs: Vec<PlanHandle> = registry
        .iter()
        .map(|(_, entry)| skip_redundant_lookup(&registry.nodes, entry.plan.output))
        .collect();
    for (entry, output) in registry.entries_mut().zip(outputs) {
        if entry.plan.output != output {
            rewritten += 1;
            entry.plan.output = output;
        }
    }
    rewritten
}

/// Drops captured inputs no leaf of the top-level tree refers to. The main
/// input at position 0 is always kept. Nested entries are never exported
/// and keep their inputs.
pub(crate) fn prune_inputs(registry: &mut PlanRegistry) {
    let Some((root, entry)) = registry.top_level() else {
        return;
    };
    let used: HashSet<NodeId> = post_order(&registry.nodes, entry.plan.output)
        .into_iter()
        .filter_map(|h| registry.nodes[h].as_leaf())
        .filter(|leaf| leaf.kind == LeafKind::Input)
        .map(|leaf| leaf.node)
        .collect();
    let mut pruned = entry.clone();
    pruned.inputs = entry
        .inputs
        .iter()
        .enumerate()
        .filter(|&(i, node)| i == 0 || used.contains(node))
        .map(|(_, &node)| node)
        .collect();
    registry.insert(root, pruned);
}

/// Exports the top-level entry of `registry` as a self-contained kernel.
///
/// Returns `Ok(None)` for an empty registry.
pub fn export_kernel(
    graph: &OpGraph,
    registry: &PlanRegistry,
    name: impl Into<String>,
) -> Result<Option<FusedKernel>, FusionError> {
    let Some((root, entry)) = registry.top_level() else {
        return Ok(None);
    };

    let mut inputs = Vec::with_capacity(entry.inputs.len());
    let mut bindings = HashMap::new();
    let (mut sides, mut scalars) = (0, 0);
    for (i, &node) in entry.inputs.iter().enumerate() {
        let op = graph.try_node(node)?;
        let binding = if i == 0 {
            Binding::CurrentCell
        } else if op.is_scalar() {
            scalars += 1;
            Binding::Scalar(scalars - 1)
        } else {
            sides += 1;
            Binding::Side(sides - 1)
        };
        bindings.insert(node, binding);
        inputs.push(KernelInput {
            node,
            name: op.name.clone(),
            binding,
        });
    }

    let mut nodes = Arena::new();
    let mut remap: HashMap<PlanHandle, PlanHandle> = HashMap::new();
    let mut lookups: HashMap<(PlanHandle, UnaryType), PlanHandle> = HashMap::new();
    for old in post_order(&registry.nodes, entry.plan.output) {
        let node = match &registry.nodes[old] {
            PlanNode::Data(leaf) => {
                let mut leaf = leaf.clone();
                match leaf.kind {
                    LeafKind::CurrentCell => leaf.name = Binding::CurrentCell.to_string(),
                    LeafKind::Input => {
                        let binding = bindings
                            .get(&leaf.node)
                            .ok_or_else(|| FusionError::UnboundLeaf {
                                name: leaf.name.clone(),
                            })?;
                        leaf.name = binding.to_string();
                    }
                    LeafKind::Literal => {}
                }
                PlanNode::Data(leaf)
            }
            other => other.map_children(|child| remap[&child]),
        };

        let lookup_key = match &node {
            PlanNode::Unary { op, input } if op.is_lookup() => Some((*input, *op)),
            _ => None,
        };
        let new = match lookup_key.and_then(|key| lookups.get(&key).copied()) {
            Some(shared) => shared,
            None => {
                let handle = nodes.append(node);
                if let Some(key) = lookup_key {
                    lookups.insert(key, handle);
                }
                handle
            }
        };
        remap.insert(old, new);
    }

    Ok(Some(FusedKernel {
        name: name.into(),
        root,
        inputs,
        nodes,
        output: remap[&entry.plan.output],
        data_type: entry.plan.data_type,
        cell_type: entry.plan.cell_type,
        multiple_consumers: entry.plan.multiple_consumers,
    }))
}
