//! Errors of plan construction.

use cellfuse_ir::IrError;

/// Failure of one fusion attempt. Other attempts and the operator graph are
/// unaffected.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// An operator inside the region has no cell-wise primitive.
    #[error("operator '{op}' of node '{node}' has no cell-wise primitive")]
    UnsupportedOperator { node: String, op: String },

    /// An operand was neither a captured value nor an already built plan.
    #[error("operand {position} of node '{node}' is not resolved")]
    MissingOperand { node: String, position: usize },

    /// Construction finished without a plan for the region root.
    #[error("region root '{node}' was not resolved into a plan")]
    Unresolved { node: String },

    /// A plan leaf refers to a value missing from the captured inputs.
    #[error("plan leaf '{name}' is not bound to a captured input")]
    UnboundLeaf { name: String },

    #[error(transparent)]
    Ir(#[from] IrError),
}
