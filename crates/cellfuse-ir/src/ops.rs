//! Operator vocabulary of the upstream operator graph.
//!
//! The vocabularies deliberately include operators the cell-wise template
//! cannot fuse (`cumsum`, `cbind`, `ctable`, ...). Whether an operator is
//! fusable is decided by the plan vocabulary in [`crate::plan`].

use std::fmt;
use std::str::FromStr;

use crate::IrError;

/// Result data type of an operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum DataType {
    Scalar,
    Matrix,
}

impl DataType {
    pub fn is_scalar(self) -> bool {
        self == Self::Scalar
    }

    pub fn is_matrix(self) -> bool {
        self == Self::Matrix
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Matrix => "matrix",
        })
    }
}

impl FromStr for DataType {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(Self::Scalar),
            "matrix" => Ok(Self::Matrix),
            other => Err(IrError::UnknownName {
                what: "data type",
                name: other.into(),
            }),
        }
    }
}

/// Declares an operator enum together with its lowercase name table.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident => $text:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
        pub enum $name {
            $($variant,)*
        }

        impl $name {
            /// All members in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            /// Lowercase operator name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = IrError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)*
                    other => Err(IrError::UnknownName {
                        what: $what,
                        name: other.into(),
                    }),
                }
            }
        }
    };
}

vocabulary! {
    /// Single-operand element-wise (or not) functions.
    UnaryFn, "unary operator" {
        Exp => "exp",
        Log => "log",
        Abs => "abs",
        Sqrt => "sqrt",
        Round => "round",
        Ceil => "ceil",
        Floor => "floor",
        Sin => "sin",
        Cos => "cos",
        Tan => "tan",
        Sign => "sign",
        Sigmoid => "sigmoid",
        Sprop => "sprop",
        Selp => "selp",
        Not => "not",
        Cumsum => "cumsum",
        Inverse => "inverse",
    }
}

vocabulary! {
    /// Two-operand operators.
    BinaryFn, "binary operator" {
        Plus => "plus",
        Minus => "minus",
        Mult => "mult",
        Div => "div",
        Modulus => "modulus",
        IntDiv => "intdiv",
        Less => "less",
        LessEqual => "lessequal",
        Greater => "greater",
        GreaterEqual => "greaterequal",
        Equal => "equal",
        NotEqual => "notequal",
        Min => "min",
        Max => "max",
        And => "and",
        Or => "or",
        Pow => "pow",
        Cbind => "cbind",
        Rbind => "rbind",
        Solve => "solve",
    }
}

vocabulary! {
    /// Three-operand operators.
    TernaryFn, "ternary operator" {
        PlusMult => "plusmult",
        MinusMult => "minusmult",
        Ctable => "ctable",
    }
}

vocabulary! {
    /// Aggregation functions of unary aggregates.
    AggOp, "aggregation" {
        Sum => "sum",
        Mean => "mean",
        Min => "min",
        Max => "max",
    }
}

vocabulary! {
    /// Aggregation direction.
    Direction, "direction" {
        RowCol => "rowcol",
        Row => "row",
        Col => "col",
    }
}

/// The operation performed by an operator-graph node.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    /// A named input read (persistent or transient variable).
    Data,
    /// A constant; the payload is its textual value, e.g. `"2"`.
    Literal(String),
    /// A data-generating source (rand, seq, ...).
    DataGen,
    Unary(UnaryFn),
    Binary(BinaryFn),
    Ternary(TernaryFn),
    AggUnary { op: AggOp, direction: Direction },
    /// Any operator the cell-wise template never fuses (matrix multiply,
    /// transpose, reshape, ...), identified by name.
    Other(String),
}

impl OpKind {
    /// Short operator name used in dumps and diagnostics.
    pub fn name(&self) -> String {
        match self {
            Self::Data => "data".into(),
            Self::Literal(value) => format!("literal({value})"),
            Self::DataGen => "datagen".into(),
            Self::Unary(f) => f.to_string(),
            Self::Binary(f) => f.to_string(),
            Self::Ternary(f) => f.to_string(),
            Self::AggUnary { op, direction } => format!("{op}({direction})"),
            Self::Other(name) => name.clone(),
        }
    }

    /// Returns `true` for leaves of the operator graph that produce data
    /// without computation.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Data | Self::DataGen | Self::Literal(_))
    }

    /// Returns `true` if this is a sum aggregate whose direction is not
    /// column-wise, i.e. one a cell-wise kernel can absorb.
    pub fn is_absorbable_sum(&self) -> bool {
        matches!(
            self,
            Self::AggUnary {
                op: AggOp::Sum,
                direction: Direction::RowCol | Direction::Row,
            }
        )
    }
}
