//! Operator-graph parser for cellfuse.
//!
//! Reads a JSON description of an operator DAG and lowers it into a
//! [`cellfuse_ir::OpGraph`]. Nodes are listed in dataflow order and refer
//! to their operands by name:
//!
//! ```json
//! { "nodes": [
//!     { "name": "X", "op": "data", "type": "matrix", "rows": 10, "cols": 5 },
//!     { "name": "c", "op": "data", "type": "scalar" },
//!     { "name": "E", "op": "exp", "inputs": ["X"] },
//!     { "name": "M", "op": "mult", "inputs": ["E", "c"] },
//!     { "name": "S", "op": "sum", "direction": "rowcol", "inputs": ["M"] }
//! ] }
//! ```

mod lower;

/// Parse a JSON graph description into an operator graph.
///
/// Operators outside the cell-wise vocabularies are accepted when they
/// carry an explicit result `type`; they become opaque nodes.
pub fn parse(source: &str) -> Result<cellfuse_ir::OpGraph, ParseError> {
    let desc: lower::GraphDesc = serde_json::from_str(source)?;
    lower::lower_graph(&desc)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("node '{node}': unknown operator '{op}' (give a result type for opaque operators)")]
    UnknownOperator { node: String, op: String },
    #[error("node '{node}': input '{input}' is not defined before use")]
    UndefinedInput { node: String, input: String },
    #[error("node name '{name}' is defined twice")]
    DuplicateName { name: String },
    #[error("node '{node}': operator '{op}' takes {expected} operand(s), found {found}")]
    Arity {
        node: String,
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("node '{node}': missing field '{field}'")]
    MissingField { node: String, field: &'static str },
    #[error("node '{node}': {source}")]
    Vocabulary {
        node: String,
        #[source]
        source: cellfuse_ir::IrError,
    },
}
