//! Exported fused kernels: the hand-off from plan construction to a code
//! generator.

use std::fmt;

use crate::arena::Arena;
use crate::graph::NodeId;
use crate::ops::DataType;
use crate::plan::{CellType, PlanHandle, PlanNode};

/// Execution-time slot an input is bound to.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Binding {
    /// The main input, read one cell per iteration.
    CurrentCell,
    /// An additional matrix or vector input.
    Side(usize),
    /// A scalar input.
    Scalar(usize),
}

impl Binding {
    pub fn data_type(self) -> DataType {
        match self {
            Self::CurrentCell | Self::Side(_) => DataType::Matrix,
            Self::Scalar(_) => DataType::Scalar,
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentCell => write!(f, "a"),
            Self::Side(i) => write!(f, "b[{i}]"),
            Self::Scalar(i) => write!(f, "scalars[{i}]"),
        }
    }
}

/// One captured input of a fused kernel, in captured order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelInput {
    pub node: NodeId,
    /// Operator-graph name of the value.
    pub name: String,
    pub binding: Binding,
}

/// A self-contained fused cell-wise kernel.
///
/// `nodes` holds only the nodes reachable from `output`, in post-order,
/// with data leaves renamed to their binding slot. Shared subtrees stay
/// shared.
#[derive(Clone, Debug)]
pub struct FusedKernel {
    /// Generated class name, unique within one planner run.
    pub name: String,
    /// Operator-graph node whose value the kernel computes.
    pub root: NodeId,
    pub inputs: Vec<KernelInput>,
    pub nodes: Arena<PlanNode>,
    pub output: PlanHandle,
    pub data_type: DataType,
    pub cell_type: CellType,
    pub multiple_consumers: bool,
}

impl FusedKernel {
    /// Matrix inputs (main input first) in captured order.
    pub fn matrix_inputs(&self) -> impl Iterator<Item = &KernelInput> {
        self.inputs
            .iter()
            .filter(|i| i.binding.data_type().is_matrix())
    }

    /// Scalar inputs in captured order.
    pub fn scalar_inputs(&self) -> impl Iterator<Item = &KernelInput> {
        self.inputs
            .iter()
            .filter(|i| i.binding.data_type().is_scalar())
    }
}
