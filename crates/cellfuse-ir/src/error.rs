//! Error types for the cellfuse IR.

/// Errors that can occur when building or querying the IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// A name does not belong to the requested vocabulary.
    #[error("unknown {what} '{name}'")]
    UnknownName { what: &'static str, name: String },
}
