//! Operator graph consumed by the fusion pass.
//!
//! The graph is a DAG of matrix/scalar operators produced by an upstream
//! optimizer. Nodes live in an append-only arena and may only reference
//! nodes appended before them, so arena order is a topological order.
//! The fusion pass never mutates the graph.

use crate::IrError;
use crate::arena::{Arena, Handle};
use crate::ops::{AggOp, BinaryFn, DataType, Direction, OpKind, TernaryFn, UnaryFn};

/// Identity of an operator-graph node.
pub type NodeId = Handle<OpNode>;

/// Sparsity below which a matrix is considered sparse.
pub const SPARSITY_TURN_POINT: f64 = 0.4;

/// Matrix dimensions; `None` means unknown at compile time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rows: Option<u64>,
    pub cols: Option<u64>,
}

impl Shape {
    /// Shape of a scalar value (0 x 0).
    pub const SCALAR: Self = Self {
        rows: Some(0),
        cols: Some(0),
    };

    pub fn known(rows: u64, cols: u64) -> Self {
        Self {
            rows: Some(rows),
            cols: Some(cols),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.rows.is_some() && self.cols.is_some()
    }
}

/// A node of the operator graph.
#[derive(Clone, Debug)]
pub struct OpNode {
    /// Display name (variable name, or the value text of a literal).
    pub name: String,
    pub kind: OpKind,
    /// Operands in semantic order.
    pub inputs: Vec<NodeId>,
    pub data_type: DataType,
    pub shape: Shape,
    /// Fraction of non-zero cells, if known.
    pub sparsity: Option<f64>,
}

impl OpNode {
    pub fn is_scalar(&self) -> bool {
        self.data_type.is_scalar()
    }

    /// Scalars always have known dimensions.
    pub fn dims_known(&self) -> bool {
        self.is_scalar() || self.shape.is_known()
    }

    /// A matrix with at least one known dimension equal to one.
    pub fn is_vector(&self) -> bool {
        self.data_type.is_matrix() && (self.shape.rows == Some(1) || self.shape.cols == Some(1))
    }

    pub fn is_vector_or_scalar(&self) -> bool {
        self.is_scalar() || self.is_vector()
    }

    /// A column vector: one column and more than one row.
    pub fn is_col_vector(&self) -> bool {
        self.data_type.is_matrix() && self.shape.cols == Some(1) && self.shape.rows != Some(1)
    }

    /// A matrix that is not known to be a vector.
    pub fn is_matrix(&self) -> bool {
        self.data_type.is_matrix() && self.shape.rows != Some(1) && self.shape.cols != Some(1)
    }

    pub fn is_sparse(&self) -> bool {
        match self.sparsity {
            Some(sparsity) => self.dims_known() && sparsity < SPARSITY_TURN_POINT,
            None => false,
        }
    }
}

/// Returns `true` if both nodes have known and identical dimensions.
pub fn equal_size(a: &OpNode, b: &OpNode) -> bool {
    a.shape.is_known() && b.shape.is_known() && a.shape == b.shape
}

/// The operator graph.
#[derive(Clone, Debug, Default)]
pub struct OpGraph {
    nodes: Arena<OpNode>,
    consumers: Vec<Vec<NodeId>>,
}

impl OpGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id.
    ///
    /// # Panics
    ///
    /// Panics if any input id does not belong to this graph.
    pub fn add_node(&mut self, node: OpNode) -> NodeId {
        for &input in &node.inputs {
            assert!(
                self.nodes.contains(input),
                "add_node({}): input {:?} not registered in graph",
                node.name,
                input,
            );
        }
        let inputs = node.inputs.clone();
        let id = self.nodes.append(node);
        self.consumers.push(Vec::new());
        for input in inputs {
            // A set of consumers: `mult(X, X)` makes one consumer of `X`.
            let list = &mut self.consumers[input.index()];
            if !list.contains(&id) {
                list.push(id);
            }
        }
        id
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node for a valid id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this graph.
    pub fn node(&self, id: NodeId) -> &OpNode {
        &self.nodes[id]
    }

    /// Fallible node lookup.
    pub fn try_node(&self, id: NodeId) -> Result<&OpNode, IrError> {
        self.nodes.try_get(id).ok_or(IrError::BadHandle {
            index: id.index(),
            size: self.nodes.len(),
        })
    }

    /// Nodes consuming the value of `id`, in insertion order.
    pub fn consumers(&self, id: NodeId) -> &[NodeId] {
        self.consumers
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes in topological (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OpNode)> {
        self.nodes.iter()
    }

    /// Nodes without consumers, in id order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .handles()
            .filter(|&id| self.consumers(id).is_empty())
            .collect()
    }

    /// Finds the first node with the given name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    // ---- convenience builders ----

    /// A matrix read with the given dimensions.
    pub fn matrix(&mut self, name: impl Into<String>, rows: u64, cols: u64) -> NodeId {
        self.source(name, OpKind::Data, DataType::Matrix, Shape::known(rows, cols))
    }

    /// A scalar read.
    pub fn scalar(&mut self, name: impl Into<String>) -> NodeId {
        self.source(name, OpKind::Data, DataType::Scalar, Shape::SCALAR)
    }

    /// A scalar literal; its name is the value text.
    pub fn literal(&mut self, value: impl Into<String>) -> NodeId {
        let value = value.into();
        self.source(
            value.clone(),
            OpKind::Literal(value),
            DataType::Scalar,
            Shape::SCALAR,
        )
    }

    fn source(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        data_type: DataType,
        shape: Shape,
    ) -> NodeId {
        self.add_node(OpNode {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            data_type,
            shape,
            sparsity: None,
        })
    }

    pub fn unary(&mut self, f: UnaryFn, input: NodeId) -> NodeId {
        let (data_type, shape) = self.broadcast(&[input]);
        self.compute(OpKind::Unary(f), vec![input], data_type, shape)
    }

    pub fn binary(&mut self, f: BinaryFn, left: NodeId, right: NodeId) -> NodeId {
        let (data_type, shape) = self.broadcast(&[left, right]);
        self.compute(OpKind::Binary(f), vec![left, right], data_type, shape)
    }

    pub fn ternary(&mut self, f: TernaryFn, a: NodeId, b: NodeId, c: NodeId) -> NodeId {
        let (data_type, shape) = self.broadcast(&[a, b, c]);
        self.compute(OpKind::Ternary(f), vec![a, b, c], data_type, shape)
    }

    pub fn aggregate(&mut self, op: AggOp, direction: Direction, input: NodeId) -> NodeId {
        let shape = self.node(input).shape;
        let (data_type, shape) = match direction {
            Direction::RowCol => (DataType::Scalar, Shape::SCALAR),
            Direction::Row => (
                DataType::Matrix,
                Shape {
                    rows: shape.rows,
                    cols: Some(1),
                },
            ),
            Direction::Col => (
                DataType::Matrix,
                Shape {
                    rows: Some(1),
                    cols: shape.cols,
                },
            ),
        };
        self.compute(
            OpKind::AggUnary { op, direction },
            vec![input],
            data_type,
            shape,
        )
    }

    /// An operator outside the cell-wise vocabulary with an explicit result type.
    pub fn other(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<NodeId>,
        data_type: DataType,
        shape: Shape,
    ) -> NodeId {
        self.compute(OpKind::Other(name.into()), inputs, data_type, shape)
    }

    fn compute(
        &mut self,
        kind: OpKind,
        inputs: Vec<NodeId>,
        data_type: DataType,
        shape: Shape,
    ) -> NodeId {
        let tag = match &kind {
            OpKind::AggUnary { op, .. } => op.to_string(),
            other => other.name(),
        };
        let name = format!("_{tag}{}", self.nodes.len());
        self.add_node(OpNode {
            name,
            kind,
            inputs,
            data_type,
            shape,
            sparsity: None,
        })
    }

    /// Result type of an element-wise operator over `inputs`: a matrix if
    /// any operand is a matrix, with the largest known extent per axis.
    fn broadcast(&self, inputs: &[NodeId]) -> (DataType, Shape) {
        let matrices: Vec<&OpNode> = inputs
            .iter()
            .map(|&id| self.node(id))
            .filter(|n| n.data_type.is_matrix())
            .collect();
        if matrices.is_empty() {
            return (DataType::Scalar, Shape::SCALAR);
        }
        let extent = |axis: fn(&Shape) -> Option<u64>| -> Option<u64> {
            let dims: Option<Vec<u64>> = matrices.iter().map(|n| axis(&n.shape)).collect();
            dims.and_then(|d| d.into_iter().max())
        };
        let shape = Shape {
            rows: extent(|s| s.rows),
            cols: extent(|s| s.cols),
        };
        (DataType::Matrix, shape)
    }

    /// Overrides the sparsity hint of a node.
    pub fn set_sparsity(&mut self, id: NodeId, sparsity: f64) {
        self.nodes[id].sparsity = Some(sparsity);
    }

    /// Overrides the inferred shape of a node.
    pub fn set_shape(&mut self, id: NodeId, shape: Shape) {
        self.nodes[id].shape = shape;
    }

    /// Overrides the name of a node.
    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        self.nodes[id].name = name.into();
    }
}
