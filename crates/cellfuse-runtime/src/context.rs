//! In-memory execution context.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{ExecutionContext, MatrixBlock, RuntimeError, Value};

/// An [`ExecutionContext`] keeping every variable in memory and counting
/// outstanding pins per matrix.
#[derive(Debug, Default)]
pub struct MemoryContext {
    matrices: HashMap<String, Arc<MatrixBlock>>,
    scalars: HashMap<String, f64>,
    pins: HashMap<String, usize>,
}

impl MemoryContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a matrix variable.
    pub fn set_matrix(&mut self, name: impl Into<String>, matrix: MatrixBlock) {
        self.matrices.insert(name.into(), Arc::new(matrix));
    }

    /// Binds a scalar variable.
    pub fn set_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.scalars.insert(name.into(), value);
    }

    /// The matrix bound to `name`.
    pub fn matrix(&self, name: &str) -> Option<&Arc<MatrixBlock>> {
        self.matrices.get(name)
    }

    /// The scalar bound to `name`.
    pub fn scalar_value(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    /// Outstanding pins on `name`.
    pub fn pin_count(&self, name: &str) -> usize {
        self.pins.get(name).copied().unwrap_or(0)
    }

    /// Total outstanding pins.
    pub fn pinned(&self) -> usize {
        self.pins.values().sum()
    }
}

impl ExecutionContext for MemoryContext {
    fn pin_matrix(&mut self, name: &str) -> Result<Arc<MatrixBlock>, RuntimeError> {
        let matrix = self
            .matrices
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownVariable { name: name.into() })?;
        *self.pins.entry(name.to_string()).or_insert(0) += 1;
        Ok(matrix)
    }

    fn release_matrix(&mut self, name: &str) -> Result<(), RuntimeError> {
        match self.pins.get_mut(name) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.pins.remove(name);
                }
                Ok(())
            }
            _ => Err(RuntimeError::NotPinned { name: name.into() }),
        }
    }

    fn scalar(&self, name: &str, literal: bool) -> Result<f64, RuntimeError> {
        if literal {
            return name
                .parse()
                .map_err(|_| RuntimeError::BadLiteral { text: name.into() });
        }
        self.scalar_value(name)
            .ok_or_else(|| RuntimeError::UnknownVariable { name: name.into() })
    }

    fn set_output(&mut self, name: &str, value: Value) {
        match value {
            Value::Matrix(matrix) => {
                self.scalars.remove(name);
                self.matrices.insert(name.into(), matrix);
            }
            Value::Scalar(v) => {
                self.matrices.remove(name);
                self.scalars.insert(name.into(), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_counted() {
        let mut ctx = MemoryContext::new();
        ctx.set_matrix("X", MatrixBlock::zeros(2, 2));
        let a = ctx.pin_matrix("X").unwrap();
        let _b = ctx.pin_matrix("X").unwrap();
        assert_eq!(a.rows(), 2);
        assert_eq!(ctx.pin_count("X"), 2);

        ctx.release_matrix("X").unwrap();
        ctx.release_matrix("X").unwrap();
        assert_eq!(ctx.pinned(), 0);
        assert!(matches!(
            ctx.release_matrix("X"),
            Err(RuntimeError::NotPinned { .. })
        ));
    }

    #[test]
    fn unknown_matrix_is_not_pinned() {
        let mut ctx = MemoryContext::new();
        assert!(matches!(
            ctx.pin_matrix("Y"),
            Err(RuntimeError::UnknownVariable { .. })
        ));
        assert_eq!(ctx.pinned(), 0);
    }

    #[test]
    fn scalars_and_literals() {
        let mut ctx = MemoryContext::new();
        ctx.set_scalar("c", 1.5);
        assert_eq!(ctx.scalar("c", false).unwrap(), 1.5);
        assert_eq!(ctx.scalar("0.25", true).unwrap(), 0.25);
        assert!(matches!(
            ctx.scalar("c", true),
            Err(RuntimeError::BadLiteral { .. })
        ));
        assert!(ctx.scalar("d", false).is_err());
    }

    #[test]
    fn output_replaces_variable_of_other_type() {
        let mut ctx = MemoryContext::new();
        ctx.set_scalar("R", 1.0);
        ctx.set_output("R", Value::Matrix(Arc::new(MatrixBlock::zeros(1, 1))));
        assert!(ctx.scalar_value("R").is_none());
        assert!(ctx.matrix("R").is_some());
    }
}
