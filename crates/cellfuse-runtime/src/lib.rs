#![warn(missing_docs)]
//! Kernel dispatch contract for fused cell-wise kernels.
//!
//! Defines the [`CompiledKernel`] trait implemented by whatever turns a
//! [`cellfuse_ir::FusedKernel`] into executable code, the
//! [`ExecutionContext`] that owns matrix storage, a [`KernelRegistry`] for
//! name-based dispatch, and the [`FusedInstruction`] that binds captured
//! inputs to a kernel call.

mod context;
mod instruction;

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use cellfuse_ir::DataType;

pub use context::MemoryContext;
pub use instruction::{FusedInstruction, OPERAND_DELIMITER, Operand};

/// A dense row-major matrix of `f64` cells.
#[derive(Clone, Debug, PartialEq)]
pub struct MatrixBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl MatrixBlock {
    /// Creates a matrix from row-major values.
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, RuntimeError> {
        if values.len() != rows * cols {
            return Err(RuntimeError::Shape {
                rows,
                cols,
                len: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    /// A matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Cell at `(row, col)`, or `None` outside the matrix.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// All cells in row-major order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl fmt::Display for MatrixBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matrix {}x{}", self.rows, self.cols)
    }
}

/// Result of a kernel call, or a variable held by an execution context.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A shared matrix.
    Matrix(Arc<MatrixBlock>),
    /// A scalar.
    Scalar(f64),
}

impl Value {
    /// Data type of the value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Matrix(_) => DataType::Matrix,
            Self::Scalar(_) => DataType::Scalar,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matrix(m) => fmt::Display::fmt(m, f),
            Self::Scalar(v) => write!(f, "scalar {v}"),
        }
    }
}

/// An executable fused kernel.
///
/// `matrices` holds the matrix operands in captured-input order, the main
/// input first; `scalars` the scalar operands in captured-input order.
pub trait CompiledKernel: Debug + Send + Sync {
    /// Kernel name, e.g. `TMP0`.
    fn name(&self) -> &str;

    /// Runs the kernel with a thread-count hint.
    fn execute(
        &self,
        matrices: &[Arc<MatrixBlock>],
        scalars: &[f64],
        threads: usize,
    ) -> Result<Value, RuntimeError>;
}

/// Storage manager seen by a [`FusedInstruction`].
///
/// Every successful [`pin_matrix`](Self::pin_matrix) must be paired with
/// one [`release_matrix`](Self::release_matrix).
pub trait ExecutionContext {
    /// Pins a matrix variable for the duration of a kernel call.
    fn pin_matrix(&mut self, name: &str) -> Result<Arc<MatrixBlock>, RuntimeError>;

    /// Releases a matrix pinned by [`pin_matrix`](Self::pin_matrix).
    fn release_matrix(&mut self, name: &str) -> Result<(), RuntimeError>;

    /// Reads a scalar variable, or parses `name` itself when `literal`.
    fn scalar(&self, name: &str, literal: bool) -> Result<f64, RuntimeError>;

    /// Binds the result of a kernel call to a variable.
    fn set_output(&mut self, name: &str, value: Value);
}

/// Errors of kernel dispatch.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// No kernel is registered under this name.
    #[error("unknown kernel '{0}'")]
    UnknownKernel(String),
    /// The context holds no variable of this name.
    #[error("unknown variable '{name}'")]
    UnknownVariable {
        /// Variable name.
        name: String,
    },
    /// A release without a matching pin.
    #[error("matrix '{name}' is not pinned")]
    NotPinned {
        /// Variable name.
        name: String,
    },
    /// A literal scalar operand is not a number.
    #[error("invalid scalar literal '{text}'")]
    BadLiteral {
        /// Literal text.
        text: String,
    },
    /// An instruction string could not be parsed.
    #[error("malformed instruction: {0}")]
    BadInstruction(String),
    /// The kernel returned a value of the wrong data type.
    #[error("kernel '{kernel}' returned a {found} but the output is a {expected}")]
    OutputType {
        /// Kernel name.
        kernel: String,
        /// Declared output type.
        expected: DataType,
        /// Type of the returned value.
        found: DataType,
    },
    /// Matrix values do not fill the declared dimensions.
    #[error("{len} values do not fill a {rows}x{cols} matrix")]
    Shape {
        /// Declared rows.
        rows: usize,
        /// Declared columns.
        cols: usize,
        /// Number of values given.
        len: usize,
    },
    /// A kernel failed while executing.
    #[error("kernel failure: {0}")]
    Kernel(String),
    /// The fused kernel refers to nodes missing from the operator graph.
    #[error(transparent)]
    Ir(#[from] cellfuse_ir::IrError),
}

/// Registry of compiled kernels, used for name-based dispatch.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: BTreeMap<String, Arc<dyn CompiledKernel>>,
}

impl KernelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kernel under its name, replacing any previous one.
    pub fn register(&mut self, kernel: Arc<dyn CompiledKernel>) {
        self.kernels.insert(kernel.name().to_string(), kernel);
    }

    /// Finds the kernel registered under `name`.
    pub fn find(&self, name: &str) -> Option<Arc<dyn CompiledKernel>> {
        self.kernels.get(name).cloned()
    }

    /// Registered kernel names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.kernels.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Constant(&'static str, f64);

    impl CompiledKernel for Constant {
        fn name(&self) -> &str {
            self.0
        }

        fn execute(
            &self,
            _matrices: &[Arc<MatrixBlock>],
            _scalars: &[f64],
            _threads: usize,
        ) -> Result<Value, RuntimeError> {
            Ok(Value::Scalar(self.1))
        }
    }

    #[test]
    fn matrix_block_checks_length() {
        let m = MatrixBlock::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.get(1, 0), Some(4.0));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(format!("{m}"), "matrix 2x3");

        let err = MatrixBlock::new(2, 2, vec![1.0]).unwrap_err();
        assert_eq!(err.to_string(), "1 values do not fill a 2x2 matrix");
    }

    #[test]
    fn value_data_types() {
        let m = Value::Matrix(Arc::new(MatrixBlock::zeros(1, 1)));
        assert_eq!(m.data_type(), DataType::Matrix);
        assert_eq!(Value::Scalar(2.5).data_type(), DataType::Scalar);
        assert_eq!(format!("{}", Value::Scalar(2.5)), "scalar 2.5");
    }

    #[test]
    fn registry_find_and_replace() {
        let mut reg = KernelRegistry::new();
        assert!(reg.names().is_empty());
        reg.register(Arc::new(Constant("TMP1", 1.0)));
        reg.register(Arc::new(Constant("TMP0", 0.0)));
        assert_eq!(reg.names(), vec!["TMP0", "TMP1"]);
        assert!(reg.find("TMP9").is_none());

        reg.register(Arc::new(Constant("TMP0", 7.0)));
        let kernel = reg.find("TMP0").unwrap();
        assert_eq!(kernel.execute(&[], &[], 1).unwrap(), Value::Scalar(7.0));
        assert_eq!(reg.names().len(), 2);
    }

    #[test]
    fn runtime_error_display() {
        let e = RuntimeError::OutputType {
            kernel: "TMP0".into(),
            expected: DataType::Scalar,
            found: DataType::Matrix,
        };
        assert_eq!(
            e.to_string(),
            "kernel 'TMP0' returned a matrix but the output is a scalar"
        );
        assert_eq!(
            RuntimeError::UnknownKernel("TMP3".into()).to_string(),
            "unknown kernel 'TMP3'"
        );
    }
}
