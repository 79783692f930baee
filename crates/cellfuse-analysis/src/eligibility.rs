//! Per-node fusability check for the cell-wise template.
//!
//! `is_fusable` looks at a node and its direct operands only. It is cheap
//! and never cached, because region growth may ask about the same node
//! from different traversal positions.

use cellfuse_ir::{
    BinaryType, DataType, NodeId, OpGraph, OpKind, OpNode, TernaryType, UnaryType, equal_size,
};

/// Returns `true` if `id` may participate in a cell-wise fusion region.
pub fn is_fusable(graph: &OpGraph, id: NodeId) -> bool {
    let node = graph.node(id);
    if !node.data_type.is_matrix() {
        return false;
    }
    match &node.kind {
        OpKind::Unary(f) => UnaryType::from_fn(*f).is_some(),
        OpKind::Binary(f) => {
            BinaryType::from_fn(*f).is_some()
                && node.inputs.len() == 2
                && binary_shapes_supported(graph, node)
        }
        OpKind::Ternary(f) => {
            TernaryType::from_fn(*f).is_some() && ternary_shapes_supported(graph, node)
        }
        _ => false,
    }
}

/// Matrix-scalar, matrix-vector without row-vector broadcast, or dense
/// matrix-matrix of equal size.
fn binary_shapes_supported(graph: &OpGraph, node: &OpNode) -> bool {
    let left = graph.node(node.inputs[0]);
    let right = graph.node(node.inputs[1]);

    let matrix_scalar = left.is_scalar() || right.is_scalar();
    if matrix_scalar {
        return true;
    }

    let row_vector = is_row_vector_broadcast(left, right);
    let matrix_vector = node.dims_known()
        && !row_vector
        && ((left.data_type.is_matrix() && right.is_vector_or_scalar())
            || (right.data_type.is_matrix() && left.is_vector_or_scalar()));
    if matrix_vector {
        return true;
    }

    node.dims_known()
        && equal_size(left, right)
        && left.data_type.is_matrix()
        && right.data_type.is_matrix()
        && !left.is_sparse()
        && !right.is_sparse()
}

/// A matrix combined with an operand whose row count differs, i.e. a row
/// vector broadcast down the rows. The per-cell read cannot express this
/// without a second iteration axis.
fn is_row_vector_broadcast(left: &OpNode, right: &OpNode) -> bool {
    let both_known = left.data_type.is_matrix()
        && right.data_type.is_matrix()
        && left.shape.is_known()
        && right.shape.is_known();
    both_known && left.shape.rows != right.shape.rows
}

/// Shapes matrix-scalar-matrix where both matrices are vectors, or both
/// are dense and of equal size.
fn ternary_shapes_supported(graph: &OpGraph, node: &OpNode) -> bool {
    if node.inputs.len() != 3 || !node.dims_known() {
        return false;
    }
    let operands: Vec<&OpNode> = node.inputs.iter().map(|&i| graph.node(i)).collect();
    let types_match = operands
        .iter()
        .map(|n| n.data_type)
        .eq([DataType::Matrix, DataType::Scalar, DataType::Matrix]);
    if !types_match {
        return false;
    }
    let (first, third) = (operands[0], operands[2]);
    let vectors = first.is_vector() && third.is_vector();
    let dense = equal_size(first, third) && !first.is_sparse() && !third.is_sparse();
    vectors || dense
}
