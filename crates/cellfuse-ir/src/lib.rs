//! Cellfuse intermediate representations.
//!
//! Two arena-based IRs: the read-only operator graph handed over by the
//! upstream optimizer, and the fused-kernel plan trees built from it.

pub mod arena;
mod display;
mod error;
pub mod graph;
mod kernel;
mod ops;
mod plan;
mod registry;

pub use arena::{Arena, Handle};
pub use display::{dump_graph, dump_kernel, format_plan};
pub use error::IrError;
pub use graph::{NodeId, OpGraph, OpNode, SPARSITY_TURN_POINT, Shape, equal_size};
pub use kernel::{Binding, FusedKernel, KernelInput};
pub use ops::{AggOp, BinaryFn, DataType, Direction, OpKind, TernaryFn, UnaryFn};
pub use plan::{
    BinaryType, CellPlan, CellType, DataLeaf, LeafKind, PlanHandle, PlanNode, TernaryType,
    UnaryType, post_order,
};
pub use registry::{PlanCache, PlanEntry, PlanRegistry};
