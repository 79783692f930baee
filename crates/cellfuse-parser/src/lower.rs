//! Lowering: JSON graph description → `cellfuse_ir::OpGraph`.

use std::collections::HashMap;
use std::str::FromStr;

use cellfuse_ir::{
    AggOp, BinaryFn, DataType, Direction, IrError, NodeId, OpGraph, OpKind, OpNode, Shape,
    TernaryFn, UnaryFn,
};
use serde::Deserialize;

use crate::ParseError;

// ---------------------------------------------------------------------------
// Description format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GraphDesc {
    pub nodes: Vec<NodeDesc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NodeDesc {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Literal value, as a JSON number or string.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Aggregation direction; its presence makes `op` an aggregation.
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, rename = "type")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub cols: Option<u64>,
    #[serde(default)]
    pub sparsity: Option<f64>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

struct LowerCtx {
    graph: OpGraph,
    names: HashMap<String, NodeId>,
}

pub(crate) fn lower_graph(desc: &GraphDesc) -> Result<OpGraph, ParseError> {
    let mut ctx = LowerCtx {
        graph: OpGraph::new(),
        names: HashMap::new(),
    };
    for node in &desc.nodes {
        ctx.lower_node(node)?;
    }
    Ok(ctx.graph)
}

impl LowerCtx {
    fn lower_node(&mut self, desc: &NodeDesc) -> Result<NodeId, ParseError> {
        if self.names.contains_key(&desc.name) {
            return Err(ParseError::DuplicateName {
                name: desc.name.clone(),
            });
        }
        let inputs = desc
            .inputs
            .iter()
            .map(|input| {
                self.names
                    .get(input)
                    .copied()
                    .ok_or_else(|| ParseError::UndefinedInput {
                        node: desc.name.clone(),
                        input: input.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data_type = desc
            .data_type
            .as_deref()
            .map(|t| vocabulary::<DataType>(desc, t))
            .transpose()?;

        let id = match desc.op.as_str() {
            "data" => self.lower_source(desc, &inputs, OpKind::Data, data_type)?,
            "datagen" => self.lower_source(desc, &inputs, OpKind::DataGen, data_type)?,
            "literal" => self.lower_literal(desc, &inputs)?,
            _ => self.lower_compute(desc, inputs, data_type)?,
        };

        if desc.rows.is_some() || desc.cols.is_some() {
            let node = self.graph.node(id);
            if node.data_type.is_matrix() {
                let shape = Shape {
                    rows: desc.rows.or(node.shape.rows),
                    cols: desc.cols.or(node.shape.cols),
                };
                self.graph.set_shape(id, shape);
            }
        }
        if let Some(sparsity) = desc.sparsity {
            self.graph.set_sparsity(id, sparsity);
        }
        self.graph.set_name(id, desc.name.clone());
        self.names.insert(desc.name.clone(), id);
        Ok(id)
    }

    fn lower_source(
        &mut self,
        desc: &NodeDesc,
        inputs: &[NodeId],
        kind: OpKind,
        data_type: Option<DataType>,
    ) -> Result<NodeId, ParseError> {
        check_arity(desc, inputs, 0)?;
        let has_dims = desc.rows.is_some() || desc.cols.is_some();
        let data_type = data_type.unwrap_or(match kind {
            OpKind::Data if !has_dims => DataType::Scalar,
            _ => DataType::Matrix,
        });
        let shape = match data_type {
            DataType::Scalar => Shape::SCALAR,
            DataType::Matrix => Shape {
                rows: desc.rows,
                cols: desc.cols,
            },
        };
        Ok(self.graph.add_node(OpNode {
            name: desc.name.clone(),
            kind,
            inputs: Vec::new(),
            data_type,
            shape,
            sparsity: None,
        }))
    }

    fn lower_literal(&mut self, desc: &NodeDesc, inputs: &[NodeId]) -> Result<NodeId, ParseError> {
        check_arity(desc, inputs, 0)?;
        let value = match &desc.value {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Number(number)) => number.to_string(),
            Some(serde_json::Value::Bool(flag)) => flag.to_string(),
            _ => {
                return Err(ParseError::MissingField {
                    node: desc.name.clone(),
                    field: "value",
                });
            }
        };
        Ok(self.graph.literal(value))
    }

    fn lower_compute(
        &mut self,
        desc: &NodeDesc,
        inputs: Vec<NodeId>,
        data_type: Option<DataType>,
    ) -> Result<NodeId, ParseError> {
        let op = desc.op.as_str();

        if let Some(direction) = &desc.direction {
            let agg = vocabulary::<AggOp>(desc, op)?;
            let direction = vocabulary::<Direction>(desc, direction)?;
            check_arity(desc, &inputs, 1)?;
            return Ok(self.graph.aggregate(agg, direction, inputs[0]));
        }

        let Some(expected) = known_arity(op) else {
            let Some(data_type) = data_type else {
                return Err(ParseError::UnknownOperator {
                    node: desc.name.clone(),
                    op: op.into(),
                });
            };
            let shape = match data_type {
                DataType::Scalar => Shape::SCALAR,
                DataType::Matrix => Shape::unknown(),
            };
            return Ok(self.graph.other(op, inputs, data_type, shape));
        };

        check_arity(desc, &inputs, expected)?;
        match *inputs.as_slice() {
            [a] => Ok(self.graph.unary(vocabulary(desc, op)?, a)),
            [a, b] => Ok(self.graph.binary(vocabulary(desc, op)?, a, b)),
            [a, b, c] => Ok(self.graph.ternary(vocabulary(desc, op)?, a, b, c)),
            _ => unreachable!("arity checked above"),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Operand count of an element-wise operator name, if it belongs to a
/// vocabulary. Aggregations are recognised by their direction instead.
fn known_arity(op: &str) -> Option<usize> {
    if UnaryFn::from_str(op).is_ok() {
        Some(1)
    } else if BinaryFn::from_str(op).is_ok() {
        Some(2)
    } else if TernaryFn::from_str(op).is_ok() {
        Some(3)
    } else {
        None
    }
}

fn vocabulary<T>(desc: &NodeDesc, name: &str) -> Result<T, ParseError>
where
    T: FromStr<Err = IrError>,
{
    name.parse().map_err(|source| ParseError::Vocabulary {
        node: desc.name.clone(),
        source,
    })
}

fn check_arity(desc: &NodeDesc, inputs: &[NodeId], expected: usize) -> Result<(), ParseError> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(ParseError::Arity {
            node: desc.name.clone(),
            op: desc.op.clone(),
            expected,
            found: inputs.len(),
        })
    }
}
