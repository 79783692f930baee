//! Conversion of a detected region into plan trees.
//!
//! The builder walks the operator graph from the region exit down to the
//! main input, then builds plan nodes children-first. Each completed
//! operator is recorded in the attempt's [`PlanRegistry`]; every record
//! extends the captured inputs of the previous one, so the last record
//! carries the inputs of the whole region.

use std::collections::HashSet;

use cellfuse_analysis::Region;
use cellfuse_ir::{
    AggOp, BinaryFn, BinaryType, CellPlan, CellType, DataLeaf, DataType, Direction, LeafKind,
    NodeId, OpGraph, OpKind, OpNode, PlanEntry, PlanHandle, PlanNode, PlanRegistry, TernaryType,
    UnaryType,
};

use crate::FusionConfig;
use crate::FusionError;
use crate::cse::{PlanInterner, prune_inputs, remove_redundant_lookups};

/// Builds the plan registry of one fusion attempt.
pub fn build_plan(
    graph: &OpGraph,
    region: &Region,
    config: &FusionConfig,
) -> Result<PlanRegistry, FusionError> {
    let mut builder = PlanBuilder::new(graph, region, config)?;
    builder.construct(region.exit)?;
    builder.finish()
}

struct PlanBuilder<'a> {
    graph: &'a OpGraph,
    root: NodeId,
    main_input: NodeId,
    compile_literals: bool,
    registry: PlanRegistry,
    interner: PlanInterner,
    /// Leaf standing for the main input's element at the current cell.
    cell: PlanHandle,
    /// Plan nodes whose value varies with the current cell.
    cell_dependent: HashSet<PlanHandle>,
    visited: HashSet<NodeId>,
}

impl<'a> PlanBuilder<'a> {
    fn new(
        graph: &'a OpGraph,
        region: &Region,
        config: &FusionConfig,
    ) -> Result<Self, FusionError> {
        graph.try_node(region.exit)?;
        let main = graph.try_node(region.main_input)?;

        let mut registry = PlanRegistry::new();
        let mut interner = PlanInterner::default();
        let cell = interner.leaf(
            &mut registry.nodes,
            DataLeaf {
                node: region.main_input,
                name: main.name.clone(),
                kind: LeafKind::CurrentCell,
                data_type: DataType::Scalar,
                rows: 0,
                cols: 0,
            },
        );

        Ok(Self {
            graph,
            root: region.exit,
            main_input: region.main_input,
            compile_literals: config.compile_literals,
            registry,
            interner,
            cell,
            cell_dependent: HashSet::from([cell]),
            visited: HashSet::new(),
        })
    }

    /// Walks operands before their consumers, each node once, and never
    /// below the main input.
    fn construct(&mut self, root: NodeId) -> Result<(), FusionError> {
        // `true` marks a node whose operands have already been walked.
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            let node = self.graph.try_node(id)?;
            if expanded {
                if self.inputs_generated(node) {
                    self.process(id, node)?;
                } else {
                    log::trace!("{}: operands not resolved, skipped", node.name);
                }
                continue;
            }
            if !self.visited.insert(id) || id == self.main_input || node.inputs.is_empty() {
                continue;
            }
            stack.push((id, true));
            stack.extend(node.inputs.iter().rev().map(|&input| (input, false)));
        }
        Ok(())
    }

    /// An operand is resolved if it is the main input, an already built
    /// plan, or a value bound as a leaf (source, scalar or vector).
    fn is_resolved(&self, input: NodeId) -> bool {
        let node = self.graph.node(input);
        input == self.main_input
            || self.registry.contains(input)
            || node.kind.is_source()
            || node.inputs.is_empty()
            || node.is_scalar()
            || node.is_vector()
    }

    fn inputs_generated(&self, node: &OpNode) -> bool {
        node.inputs.iter().all(|&input| self.is_resolved(input))
    }

    fn process(&mut self, id: NodeId, node: &'a OpNode) -> Result<(), FusionError> {
        let mut added = Vec::new();
        let mut operands = Vec::with_capacity(node.inputs.len());
        for (position, &input) in node.inputs.iter().enumerate() {
            operands.push(self.fetch_operand(node, position, input, &mut added)?);
        }

        let independent = id != self.root
            && (node.is_scalar() || !is_cellwise(&node.kind) || !self.depends_on_cell(&operands));

        let out = if independent {
            added = vec![id];
            Some(self.interner.leaf(&mut self.registry.nodes, input_leaf(id, node)))
        } else {
            self.translate(id, node, &operands)?
        };
        let Some(out) = out else {
            log::trace!("{}: nothing to wire", node.name);
            return Ok(());
        };

        let mut inputs = match self.registry.last() {
            Some((_, last)) => last.inputs.clone(),
            None => vec![self.main_input],
        };
        for hop in added {
            if !inputs.contains(&hop) {
                inputs.push(hop);
            }
        }

        let cell_type = if independent {
            CellType::NoAgg
        } else {
            CellType::from_kind(&node.kind)
        };
        let plan = CellPlan {
            output: out,
            data_type: node.data_type,
            cell_type,
            multiple_consumers: self.graph.consumers(id).len() > 1,
        };
        log::trace!(
            "{}: recorded ({}, {} inputs{})",
            node.name,
            cell_type,
            inputs.len(),
            if independent { ", independent" } else { "" }
        );
        self.registry.insert(id, PlanEntry { inputs, plan });
        Ok(())
    }

    /// Plan node for operand `position` of `node`. Values bound at execution
    /// time are appended to `added` in discovery order.
    fn fetch_operand(
        &mut self,
        node: &OpNode,
        position: usize,
        input: NodeId,
        added: &mut Vec<NodeId>,
    ) -> Result<PlanHandle, FusionError> {
        if input == self.main_input {
            return Ok(self.cell);
        }
        if let Some(entry) = self.registry.get(input) {
            return Ok(entry.plan.output);
        }

        let op = self.graph.try_node(input)?;
        if let OpKind::Literal(value) = &op.kind
            && (self.compile_literals || is_integer(value))
        {
            let leaf = DataLeaf {
                node: input,
                name: value.clone(),
                kind: LeafKind::Literal,
                data_type: DataType::Scalar,
                rows: 0,
                cols: 0,
            };
            return Ok(self.interner.leaf(&mut self.registry.nodes, leaf));
        }

        if !self.is_resolved(input) {
            return Err(FusionError::MissingOperand {
                node: node.name.clone(),
                position,
            });
        }
        if !added.contains(&input) {
            added.push(input);
        }
        Ok(self
            .interner
            .leaf(&mut self.registry.nodes, input_leaf(input, op)))
    }

    fn depends_on_cell(&self, operands: &[PlanHandle]) -> bool {
        operands
            .iter()
            .any(|operand| self.cell_dependent.contains(operand))
    }

    /// Records `handle` as cell-dependent if any of its children is.
    fn track(&mut self, handle: PlanHandle) -> PlanHandle {
        let dependent = self.registry.nodes[handle]
            .children()
            .iter()
            .any(|child| self.cell_dependent.contains(child));
        if dependent {
            self.cell_dependent.insert(handle);
        }
        handle
    }

    fn translate(
        &mut self,
        id: NodeId,
        node: &OpNode,
        operands: &[PlanHandle],
    ) -> Result<Option<PlanHandle>, FusionError> {
        let unsupported = || FusionError::UnsupportedOperator {
            node: node.name.clone(),
            op: node.kind.name(),
        };

        let plan_node = match &node.kind {
            OpKind::Unary(f) => PlanNode::Unary {
                op: UnaryType::from_fn(*f).ok_or_else(unsupported)?,
                input: operands[0],
            },
            OpKind::Binary(f) => {
                let op = BinaryType::from_fn(*f).ok_or_else(unsupported)?;
                let left = self.adapt(operands[0], node.inputs[0]);
                let right = self.adapt(operands[1], node.inputs[1]);
                let literal_two = self.registry.nodes[right]
                    .as_leaf()
                    .is_some_and(|leaf| leaf.is_literal() && leaf.name == "2");
                match f {
                    BinaryFn::Pow if literal_two => PlanNode::Unary {
                        op: UnaryType::Pow2,
                        input: left,
                    },
                    BinaryFn::Mult if literal_two => PlanNode::Unary {
                        op: UnaryType::Mult2,
                        input: left,
                    },
                    _ => PlanNode::Binary { op, left, right },
                }
            }
            OpKind::Ternary(f) => {
                let op = TernaryType::from_fn(*f).ok_or_else(unsupported)?;
                let first = self.adapt(operands[0], node.inputs[0]);
                let third = self.adapt(operands[2], node.inputs[2]);
                PlanNode::Ternary {
                    op,
                    inputs: [first, operands[1], third],
                }
            }
            OpKind::AggUnary {
                op: AggOp::Sum,
                direction: Direction::RowCol | Direction::Row,
            } if id == self.root => return Ok(Some(operands[0])),
            _ => return Ok(None),
        };
        let handle = self.registry.nodes.append(plan_node);
        Ok(Some(self.track(handle)))
    }

    /// Wraps a leaf operand into the lookup reading its value at the
    /// current cell: by row for column vectors, by row and column for
    /// matrix-typed values.
    fn adapt(&mut self, operand: PlanHandle, input: NodeId) -> PlanHandle {
        let lookup = match &self.registry.nodes[operand] {
            PlanNode::Data(leaf) if leaf.is_col_vector() => Some(UnaryType::LookupR),
            PlanNode::Data(_) if self.graph.node(input).data_type.is_matrix() => {
                Some(UnaryType::LookupRc)
            }
            _ => None,
        };
        match lookup {
            Some(op) => {
                let handle = self
                    .interner
                    .lookup(&mut self.registry.nodes, op, operand);
                self.track(handle)
            }
            None => operand,
        }
    }

    fn finish(mut self) -> Result<PlanRegistry, FusionError> {
        if !self.registry.contains(self.root) {
            return Err(FusionError::Unresolved {
                node: self.graph.node(self.root).name.clone(),
            });
        }
        let removed = remove_redundant_lookups(&mut self.registry);
        prune_inputs(&mut self.registry);
        log::debug!(
            "plan for '{}': {} entries, {} plan nodes, {} redundant lookups removed",
            self.graph.node(self.root).name,
            self.registry.len(),
            self.registry.nodes.len(),
            removed
        );
        Ok(self.registry)
    }
}

/// Operators translated into plan nodes; everything else inside a region
/// is bound as a precomputed value.
fn is_cellwise(kind: &OpKind) -> bool {
    matches!(
        kind,
        OpKind::Unary(_) | OpKind::Binary(_) | OpKind::Ternary(_)
    )
}

fn is_integer(text: &str) -> bool {
    text.parse::<i64>().is_ok()
}

/// Leaf binding the value of `id` as a captured input.
fn input_leaf(id: NodeId, node: &OpNode) -> DataLeaf {
    let (rows, cols) = if node.is_scalar() {
        (0, 0)
    } else {
        (
            node.shape.rows.unwrap_or(0),
            node.shape.cols.unwrap_or(0),
        )
    };
    DataLeaf {
        node: id,
        name: node.name.clone(),
        kind: LeafKind::Input,
        data_type: node.data_type,
        rows,
        cols,
    }
}
