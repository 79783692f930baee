//! Fused-kernel plan IR.
//!
//! A plan is an expression tree whose nodes live in an [`Arena`]. Sharing
//! produced by common-subexpression elimination is expressed by two parents
//! holding the same [`PlanHandle`], so identity is an arena index.

use std::collections::HashSet;
use std::fmt;

use crate::arena::{Arena, Handle};
use crate::graph::NodeId;
use crate::ops::{AggOp, BinaryFn, DataType, Direction, OpKind, TernaryFn, UnaryFn};

/// Handle to a plan node.
pub type PlanHandle = Handle<PlanNode>;

/// Unary primitives of a fused kernel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryType {
    Exp,
    Log,
    Abs,
    Sqrt,
    Round,
    Ceil,
    Floor,
    Sin,
    Cos,
    Tan,
    Sign,
    Sigmoid,
    Sprop,
    Selp,
    Not,
    /// Value of a column vector at the current row.
    LookupR,
    /// Value of a matrix at the current row and column.
    LookupRc,
    /// `x^2` rewritten as `x * x`.
    Pow2,
    /// `x * 2` rewritten as `x + x`.
    Mult2,
}

impl UnaryType {
    /// Maps an operator-graph unary function onto the kernel vocabulary.
    /// Returns `None` for functions that are not cell-wise.
    pub fn from_fn(f: UnaryFn) -> Option<Self> {
        Some(match f {
            UnaryFn::Exp => Self::Exp,
            UnaryFn::Log => Self::Log,
            UnaryFn::Abs => Self::Abs,
            UnaryFn::Sqrt => Self::Sqrt,
            UnaryFn::Round => Self::Round,
            UnaryFn::Ceil => Self::Ceil,
            UnaryFn::Floor => Self::Floor,
            UnaryFn::Sin => Self::Sin,
            UnaryFn::Cos => Self::Cos,
            UnaryFn::Tan => Self::Tan,
            UnaryFn::Sign => Self::Sign,
            UnaryFn::Sigmoid => Self::Sigmoid,
            UnaryFn::Sprop => Self::Sprop,
            UnaryFn::Selp => Self::Selp,
            UnaryFn::Not => Self::Not,
            UnaryFn::Cumsum | UnaryFn::Inverse => return None,
        })
    }

    pub fn is_lookup(self) -> bool {
        matches!(self, Self::LookupR | Self::LookupRc)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Round => "round",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sign => "sign",
            Self::Sigmoid => "sigmoid",
            Self::Sprop => "sprop",
            Self::Selp => "selp",
            Self::Not => "not",
            Self::LookupR => "lookup_r",
            Self::LookupRc => "lookup_rc",
            Self::Pow2 => "pow2",
            Self::Mult2 => "mult2",
        }
    }
}

/// Binary primitives of a fused kernel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryType {
    Plus,
    Minus,
    Mult,
    Div,
    Modulus,
    IntDiv,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Min,
    Max,
    And,
    Or,
    Pow,
}

impl BinaryType {
    /// Returns `None` for operators without a cell-wise primitive.
    pub fn from_fn(f: BinaryFn) -> Option<Self> {
        Some(match f {
            BinaryFn::Plus => Self::Plus,
            BinaryFn::Minus => Self::Minus,
            BinaryFn::Mult => Self::Mult,
            BinaryFn::Div => Self::Div,
            BinaryFn::Modulus => Self::Modulus,
            BinaryFn::IntDiv => Self::IntDiv,
            BinaryFn::Less => Self::Less,
            BinaryFn::LessEqual => Self::LessEqual,
            BinaryFn::Greater => Self::Greater,
            BinaryFn::GreaterEqual => Self::GreaterEqual,
            BinaryFn::Equal => Self::Equal,
            BinaryFn::NotEqual => Self::NotEqual,
            BinaryFn::Min => Self::Min,
            BinaryFn::Max => Self::Max,
            BinaryFn::And => Self::And,
            BinaryFn::Or => Self::Or,
            BinaryFn::Pow => Self::Pow,
            BinaryFn::Cbind | BinaryFn::Rbind | BinaryFn::Solve => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plus => "plus",
            Self::Minus => "minus",
            Self::Mult => "mult",
            Self::Div => "div",
            Self::Modulus => "modulus",
            Self::IntDiv => "intdiv",
            Self::Less => "less",
            Self::LessEqual => "lessequal",
            Self::Greater => "greater",
            Self::GreaterEqual => "greaterequal",
            Self::Equal => "equal",
            Self::NotEqual => "notequal",
            Self::Min => "min",
            Self::Max => "max",
            Self::And => "and",
            Self::Or => "or",
            Self::Pow => "pow",
        }
    }
}

/// Ternary primitives of a fused kernel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TernaryType {
    /// `a + s * b`
    PlusMult,
    /// `a - s * b`
    MinusMult,
}

impl TernaryType {
    pub fn from_fn(f: TernaryFn) -> Option<Self> {
        match f {
            TernaryFn::PlusMult => Some(Self::PlusMult),
            TernaryFn::MinusMult => Some(Self::MinusMult),
            TernaryFn::Ctable => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlusMult => "plusmult",
            Self::MinusMult => "minusmult",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(UnaryType, BinaryType, TernaryType, CellType);

/// Role of a data leaf inside a plan.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LeafKind {
    /// The element of the main input at the current cell.
    CurrentCell,
    /// A captured operator-graph value bound at execution time.
    Input,
    /// A constant compiled into the kernel.
    Literal,
}

/// Leaf of a plan tree referring to one operator-graph value.
#[derive(Clone, Debug)]
pub struct DataLeaf {
    pub node: NodeId,
    pub name: String,
    pub kind: LeafKind,
    pub data_type: DataType,
    /// Declared dimensions; 0 x 0 for scalar-like leaves.
    pub rows: u64,
    pub cols: u64,
}

impl DataLeaf {
    pub fn is_literal(&self) -> bool {
        self.kind == LeafKind::Literal
    }

    pub fn is_current_cell(&self) -> bool {
        self.kind == LeafKind::CurrentCell
    }

    /// A matrix leaf with one column and more than one row.
    pub fn is_col_vector(&self) -> bool {
        self.data_type.is_matrix() && self.rows > 1 && self.cols == 1
    }
}

/// Leaves are identified by upstream value and display name only.
impl PartialEq for DataLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.name == other.name
    }
}

impl Eq for DataLeaf {}

/// A node of a fused-kernel plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanNode {
    Data(DataLeaf),
    Unary {
        op: UnaryType,
        input: PlanHandle,
    },
    Binary {
        op: BinaryType,
        left: PlanHandle,
        right: PlanHandle,
    },
    Ternary {
        op: TernaryType,
        inputs: [PlanHandle; 3],
    },
}

impl PlanNode {
    /// Children in operand order.
    pub fn children(&self) -> Vec<PlanHandle> {
        match *self {
            Self::Data(_) => Vec::new(),
            Self::Unary { input, .. } => vec![input],
            Self::Binary { left, right, .. } => vec![left, right],
            Self::Ternary { inputs, .. } => inputs.to_vec(),
        }
    }

    /// Returns a copy of this node with every child replaced by `f(child)`.
    pub fn map_children(&self, mut f: impl FnMut(PlanHandle) -> PlanHandle) -> Self {
        match self {
            Self::Data(leaf) => Self::Data(leaf.clone()),
            Self::Unary { op, input } => Self::Unary {
                op: *op,
                input: f(*input),
            },
            Self::Binary { op, left, right } => Self::Binary {
                op: *op,
                left: f(*left),
                right: f(*right),
            },
            Self::Ternary { op, inputs } => Self::Ternary {
                op: *op,
                inputs: (*inputs).map(f),
            },
        }
    }

    pub fn as_leaf(&self) -> Option<&DataLeaf> {
        match self {
            Self::Data(leaf) => Some(leaf),
            _ => None,
        }
    }
}

/// Handles reachable from `root` in post-order, each visited once.
pub fn post_order(nodes: &Arena<PlanNode>, root: PlanHandle) -> Vec<PlanHandle> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    // Explicit stack; `true` marks a node whose children are already queued.
    let mut stack = vec![(root, false)];
    while let Some((handle, expanded)) = stack.pop() {
        if expanded {
            order.push(handle);
            continue;
        }
        if !seen.insert(handle) {
            continue;
        }
        stack.push((handle, true));
        for child in nodes[handle].children().into_iter().rev() {
            if !seen.contains(&child) {
                stack.push((child, false));
            }
        }
    }
    order
}

/// Aggregation mode of a fused cell-wise kernel.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CellType {
    NoAgg,
    FullAgg,
    RowAgg,
}

impl CellType {
    /// Aggregation mode implied by the operator completing a plan.
    pub fn from_kind(kind: &OpKind) -> Self {
        match kind {
            OpKind::AggUnary {
                op: AggOp::Sum,
                direction: Direction::RowCol,
            } => Self::FullAgg,
            OpKind::AggUnary {
                op: AggOp::Sum,
                direction: Direction::Row,
            } => Self::RowAgg,
            _ => Self::NoAgg,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAgg => "no_agg",
            Self::FullAgg => "full_agg",
            Self::RowAgg => "row_agg",
        }
    }
}

/// Output wrapper of a plan tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellPlan {
    pub output: PlanHandle,
    pub data_type: DataType,
    pub cell_type: CellType,
    pub multiple_consumers: bool,
}
