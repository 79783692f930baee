//! The fused-kernel call instruction.
//!
//! Textual form: `spoof°<kernel>°<input>...°<output>°<threads>`, where each
//! operand is `<name>:<type>` and scalar literals carry a `:literal`
//! suffix, e.g. `spoof°TMP0°X:matrix°c:scalar°S:scalar°4`.

use std::fmt;
use std::str::FromStr;

use cellfuse_ir::{DataType, FusedKernel, OpGraph, OpKind};

use crate::{CompiledKernel, ExecutionContext, KernelRegistry, RuntimeError};

/// Separator between the parts of an instruction string.
pub const OPERAND_DELIMITER: char = '°';

const OPCODE: &str = "spoof";
const LITERAL_SUFFIX: &str = ":literal";

/// A named, typed instruction operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operand {
    /// Variable name, or the value text of a literal.
    pub name: String,
    /// Matrix or scalar.
    pub data_type: DataType,
    /// The name is the value itself.
    pub literal: bool,
}

impl Operand {
    /// A non-literal operand.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            literal: false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.data_type)?;
        if self.literal {
            f.write_str(LITERAL_SUFFIX)?;
        }
        Ok(())
    }
}

impl FromStr for Operand {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, literal) = match s.strip_suffix(LITERAL_SUFFIX) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let (name, data_type) = rest
            .rsplit_once(':')
            .ok_or_else(|| RuntimeError::BadInstruction(format!("operand '{s}' has no type")))?;
        if name.is_empty() {
            return Err(RuntimeError::BadInstruction(format!(
                "operand '{s}' has no name"
            )));
        }
        let data_type = data_type.parse::<DataType>().map_err(|err| {
            RuntimeError::BadInstruction(format!("operand '{s}': {err}"))
        })?;
        Ok(Self {
            name: name.into(),
            data_type,
            literal,
        })
    }
}

/// Invocation of a compiled fused kernel over named variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FusedInstruction {
    /// Name of the compiled kernel to dispatch to.
    pub kernel: String,
    /// Operands in captured-input order.
    pub inputs: Vec<Operand>,
    /// Variable receiving the result.
    pub output: Operand,
    /// Thread-count hint passed to the kernel.
    pub threads: usize,
}

impl FusedInstruction {
    /// Builds the instruction calling `kernel`, writing its result to the
    /// variable named like the kernel's root node. Captured literals are
    /// passed by value.
    pub fn from_kernel(
        graph: &OpGraph,
        kernel: &FusedKernel,
        threads: usize,
    ) -> Result<Self, RuntimeError> {
        let inputs = kernel
            .inputs
            .iter()
            .map(|input| {
                let (name, literal) = match &graph.try_node(input.node)?.kind {
                    OpKind::Literal(value) => (value.clone(), true),
                    _ => (input.name.clone(), false),
                };
                Ok(Operand {
                    name,
                    data_type: input.binding.data_type(),
                    literal,
                })
            })
            .collect::<Result<Vec<_>, RuntimeError>>()?;
        let root = graph.try_node(kernel.root)?;
        Ok(Self {
            kernel: kernel.name.clone(),
            inputs,
            output: Operand::new(root.name.clone(), kernel.data_type),
            threads: threads.max(1),
        })
    }

    /// Parses the textual form.
    pub fn parse(s: &str) -> Result<Self, RuntimeError> {
        let parts: Vec<&str> = s.split(OPERAND_DELIMITER).collect();
        if parts.len() < 4 {
            return Err(RuntimeError::BadInstruction(format!(
                "expected at least 4 parts, found {}",
                parts.len()
            )));
        }
        if parts[0] != OPCODE {
            return Err(RuntimeError::BadInstruction(format!(
                "unknown opcode '{}'",
                parts[0]
            )));
        }
        let last = parts.len() - 1;
        let threads = parts[last].parse().map_err(|_| {
            RuntimeError::BadInstruction(format!("invalid thread count '{}'", parts[last]))
        })?;
        let inputs = parts[2..last - 1]
            .iter()
            .map(|p| p.parse())
            .collect::<Result<Vec<Operand>, _>>()?;
        Ok(Self {
            kernel: parts[1].into(),
            inputs,
            output: parts[last - 1].parse()?,
            threads,
        })
    }

    /// Runs the instruction: pins matrix inputs, reads scalars, calls the
    /// kernel, checks and stores its result.
    ///
    /// Every pinned matrix is released again, whether or not the call
    /// succeeded. A release failure is reported only if the call itself
    /// succeeded.
    pub fn process(
        &self,
        kernels: &KernelRegistry,
        ctx: &mut dyn ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let kernel = kernels
            .find(&self.kernel)
            .ok_or_else(|| RuntimeError::UnknownKernel(self.kernel.clone()))?;

        let mut pinned = Vec::new();
        let result = self.execute(kernel.as_ref(), ctx, &mut pinned);

        let mut released = Ok(());
        for name in pinned {
            if let Err(err) = ctx.release_matrix(name) {
                log::warn!("{}: failed to release '{name}': {err}", self.kernel);
                if released.is_ok() {
                    released = Err(err);
                }
            }
        }
        result.and(released)
    }

    fn execute<'a>(
        &'a self,
        kernel: &dyn CompiledKernel,
        ctx: &mut dyn ExecutionContext,
        pinned: &mut Vec<&'a str>,
    ) -> Result<(), RuntimeError> {
        let mut matrices = Vec::new();
        let mut scalars = Vec::new();
        for input in &self.inputs {
            match input.data_type {
                DataType::Matrix => {
                    matrices.push(ctx.pin_matrix(&input.name)?);
                    pinned.push(input.name.as_str());
                }
                DataType::Scalar => scalars.push(ctx.scalar(&input.name, input.literal)?),
            }
        }

        log::debug!(
            "{}: {} matrix and {} scalar operand(s), {} thread(s)",
            self.kernel,
            matrices.len(),
            scalars.len(),
            self.threads
        );
        let value = kernel.execute(&matrices, &scalars, self.threads)?;
        if value.data_type() != self.output.data_type {
            return Err(RuntimeError::OutputType {
                kernel: self.kernel.clone(),
                expected: self.output.data_type,
                found: value.data_type(),
            });
        }
        ctx.set_output(&self.output.name, value);
        Ok(())
    }
}

impl fmt::Display for FusedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OPCODE}{OPERAND_DELIMITER}{}", self.kernel)?;
        for input in &self.inputs {
            write!(f, "{OPERAND_DELIMITER}{input}")?;
        }
        write!(
            f,
            "{OPERAND_DELIMITER}{}{OPERAND_DELIMITER}{}",
            self.output, self.threads
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{MatrixBlock, MemoryContext, Value};

    /// Sums the cells of the main input and scales by the first scalar.
    #[derive(Debug)]
    struct ScaledSum;

    impl CompiledKernel for ScaledSum {
        fn name(&self) -> &str {
            "TMP0"
        }

        fn execute(
            &self,
            matrices: &[Arc<MatrixBlock>],
            scalars: &[f64],
            _threads: usize,
        ) -> Result<Value, RuntimeError> {
            let total: f64 = matrices[0].values().iter().sum();
            Ok(Value::Scalar(total * scalars.first().copied().unwrap_or(1.0)))
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl CompiledKernel for Failing {
        fn name(&self) -> &str {
            "TMP1"
        }

        fn execute(
            &self,
            _matrices: &[Arc<MatrixBlock>],
            _scalars: &[f64],
            _threads: usize,
        ) -> Result<Value, RuntimeError> {
            Err(RuntimeError::Kernel("out of memory".into()))
        }
    }

    fn registry() -> KernelRegistry {
        let mut reg = KernelRegistry::new();
        reg.register(Arc::new(ScaledSum));
        reg.register(Arc::new(Failing));
        reg
    }

    fn context() -> MemoryContext {
        let mut ctx = MemoryContext::new();
        ctx.set_matrix("X", MatrixBlock::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap());
        ctx.set_scalar("c", 0.5);
        ctx
    }

    #[test]
    fn parse_and_display() {
        let text = "spoof°TMP0°X:matrix°c:scalar°0.5:scalar:literal°S:scalar°4";
        let inst = FusedInstruction::parse(text).unwrap();
        assert_eq!(inst.kernel, "TMP0");
        assert_eq!(inst.inputs.len(), 3);
        assert_eq!(inst.inputs[0], Operand::new("X", DataType::Matrix));
        assert!(inst.inputs[2].literal);
        assert_eq!(inst.inputs[2].name, "0.5");
        assert_eq!(inst.output, Operand::new("S", DataType::Scalar));
        assert_eq!(inst.threads, 4);
        assert_eq!(inst.to_string(), text);
    }

    #[test]
    fn parse_rejects_malformed() {
        for text in [
            "spoof°TMP0°1",
            "call°TMP0°X:matrix°S:scalar°1",
            "spoof°TMP0°X:matrix°S:scalar°many",
            "spoof°TMP0°X°S:scalar°1",
            "spoof°TMP0°X:tensor°S:scalar°1",
        ] {
            assert!(
                matches!(
                    FusedInstruction::parse(text),
                    Err(RuntimeError::BadInstruction(_))
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn process_binds_output_and_releases_inputs() {
        let inst = FusedInstruction::parse("spoof°TMP0°X:matrix°c:scalar°S:scalar°2").unwrap();
        let mut ctx = context();
        inst.process(&registry(), &mut ctx).unwrap();
        assert_eq!(ctx.scalar_value("S"), Some(5.0));
        assert_eq!(ctx.pinned(), 0);
    }

    #[test]
    fn literal_scalars_are_parsed() {
        let inst =
            FusedInstruction::parse("spoof°TMP0°X:matrix°3:scalar:literal°S:scalar°1").unwrap();
        let mut ctx = context();
        inst.process(&registry(), &mut ctx).unwrap();
        assert_eq!(ctx.scalar_value("S"), Some(30.0));
    }

    #[test]
    fn failing_kernel_still_releases() {
        let inst = FusedInstruction::parse("spoof°TMP1°X:matrix°S:matrix°1").unwrap();
        let mut ctx = context();
        let err = inst.process(&registry(), &mut ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::Kernel(_)));
        assert_eq!(ctx.pinned(), 0);
        assert!(ctx.matrix("S").is_none());
    }

    #[test]
    fn missing_scalar_releases_pinned_matrix() {
        let inst = FusedInstruction::parse("spoof°TMP0°X:matrix°d:scalar°S:scalar°1").unwrap();
        let mut ctx = context();
        let err = inst.process(&registry(), &mut ctx).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownVariable { ref name } if name == "d"));
        assert_eq!(ctx.pin_count("X"), 0);
    }

    #[test]
    fn output_type_is_checked() {
        let inst = FusedInstruction::parse("spoof°TMP0°X:matrix°S:matrix°1").unwrap();
        let mut ctx = context();
        let err = inst.process(&registry(), &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::OutputType {
                expected: DataType::Matrix,
                found: DataType::Scalar,
                ..
            }
        ));
        assert!(ctx.scalar_value("S").is_none());
        assert_eq!(ctx.pinned(), 0);
    }

    #[test]
    fn unknown_kernel_pins_nothing() {
        let inst = FusedInstruction::parse("spoof°TMP9°X:matrix°S:scalar°1").unwrap();
        let mut ctx = context();
        assert!(matches!(
            inst.process(&registry(), &mut ctx),
            Err(RuntimeError::UnknownKernel(_))
        ));
        assert_eq!(ctx.pinned(), 0);
    }
}
