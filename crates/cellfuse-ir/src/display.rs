//! Text dumps of operator graphs, plans and fused kernels for debugging.

use std::fmt::Write;

use crate::arena::Arena;
use crate::graph::{OpGraph, OpNode, Shape};
use crate::kernel::FusedKernel;
use crate::plan::{PlanHandle, PlanNode};

fn format_dim(dim: Option<u64>) -> String {
    match dim {
        Some(d) => d.to_string(),
        None => "?".into(),
    }
}

fn format_shape(shape: Shape) -> String {
    format!("{}x{}", format_dim(shape.rows), format_dim(shape.cols))
}

fn format_value_type(node: &OpNode) -> String {
    if node.is_scalar() {
        "scalar".into()
    } else {
        format!("matrix {}", format_shape(node.shape))
    }
}

/// Renders the tree below `root` as a nested expression, e.g.
/// `mult(exp(a), scalars[0])`. Shared subtrees are printed at each use.
pub fn format_plan(nodes: &Arena<PlanNode>, root: PlanHandle) -> String {
    enum Piece {
        Node(PlanHandle),
        Text(&'static str),
    }

    let mut out = String::new();
    let mut stack = vec![Piece::Node(root)];
    while let Some(piece) = stack.pop() {
        let handle = match piece {
            Piece::Text(text) => {
                out.push_str(text);
                continue;
            }
            Piece::Node(handle) => handle,
        };
        let op = match &nodes[handle] {
            PlanNode::Data(leaf) => {
                out.push_str(&leaf.name);
                continue;
            }
            PlanNode::Unary { op, .. } => op.as_str(),
            PlanNode::Binary { op, .. } => op.as_str(),
            PlanNode::Ternary { op, .. } => op.as_str(),
        };
        out.push_str(op);
        out.push('(');
        stack.push(Piece::Text(")"));
        for (i, child) in nodes[handle].children().into_iter().enumerate().rev() {
            stack.push(Piece::Node(child));
            if i > 0 {
                stack.push(Piece::Text(", "));
            }
        }
    }
    out
}

/// Dumps an operator graph, one node per line in topological order.
pub fn dump_graph(graph: &OpGraph) -> String {
    let mut out = String::new();
    for (handle, node) in graph.iter() {
        let _ = write!(out, "{handle:?} {} = {}", node.name, node.kind.name());
        for input in &node.inputs {
            let _ = write!(out, " {input:?}");
        }
        let _ = write!(out, " : {}", format_value_type(node));
        if let Some(sparsity) = node.sparsity {
            let _ = write!(out, " sparsity={sparsity}");
        }
        out.push('\n');
    }
    out
}

/// Dumps a fused kernel: its bindings, its nodes in post-order and its
/// output.
pub fn dump_kernel(kernel: &FusedKernel) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Kernel {} (root {:?}, {}, {}{}):",
        kernel.name,
        kernel.root,
        kernel.cell_type,
        kernel.data_type,
        if kernel.multiple_consumers {
            ", multiple consumers"
        } else {
            ""
        }
    );

    out.push_str("  Inputs:\n");
    for input in &kernel.inputs {
        let _ = writeln!(out, "    {} = {}", input.binding, input.name);
    }

    out.push_str("  Nodes:\n");
    for (handle, node) in kernel.nodes.iter() {
        let _ = write!(out, "    {handle:?} ");
        match node {
            PlanNode::Data(leaf) if leaf.is_literal() => {
                let _ = write!(out, "literal {}", leaf.name);
            }
            PlanNode::Data(leaf) => out.push_str(&leaf.name),
            PlanNode::Unary { op, input } => {
                let _ = write!(out, "{op} {input:?}");
            }
            PlanNode::Binary { op, left, right } => {
                let _ = write!(out, "{op} {left:?} {right:?}");
            }
            PlanNode::Ternary { op, inputs } => {
                let _ = write!(out, "{op} {:?} {:?} {:?}", inputs[0], inputs[1], inputs[2]);
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "  Output: {:?}", kernel.output);
    let _ = writeln!(out, "  Expr: {}", format_plan(&kernel.nodes, kernel.output));
    out
}
