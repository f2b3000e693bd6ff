//! Shape and type inference for graph nodes.
//!
//! Besides output types, inference tracks *shape values*: for small integer vectors that
//! describe shapes (`shape_of`, constant index vectors, and `gather`/`concat` over them) the
//! symbolic dimensions they hold are propagated, so a `broadcast` whose target shape is
//! computed from `shape_of(input_ids)` still knows its batch axis is `input_ids`'s batch axis.

use std::collections::{HashMap, HashSet};

use crate::graph::error::GraphError;
use crate::graph::spec::{
    DType, Dimension, Graph, Operand, Operation, Parameter, Shape, TensorLiteral, TensorSpec,
    ValueId, Variable,
};

/// Result of inferring a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct Inferred {
    pub spec: TensorSpec,
    pub shape_value: Option<Vec<Dimension>>,
}

impl Inferred {
    fn plain(spec: TensorSpec) -> Self {
        Self {
            spec,
            shape_value: None,
        }
    }
}

/// Types of the values defined so far while walking a graph in order.
#[derive(Debug, Default, Clone)]
pub struct TypeEnv {
    types: HashMap<ValueId, TensorSpec>,
    shape_values: HashMap<ValueId, Vec<Dimension>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_parameter(&mut self, param: &Parameter) -> Result<(), GraphError> {
        self.define(
            param.id,
            Inferred {
                spec: param.spec.clone(),
                shape_value: None,
            },
        )
    }

    pub fn define(&mut self, id: ValueId, inferred: Inferred) -> Result<(), GraphError> {
        if self.types.contains_key(&id) {
            return Err(GraphError::DuplicateValue { value: id });
        }
        self.types.insert(id, inferred.spec);
        if let Some(value) = inferred.shape_value {
            self.shape_values.insert(id, value);
        }
        Ok(())
    }

    pub fn spec_of(&self, id: ValueId) -> Option<&TensorSpec> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: ValueId) -> bool {
        self.types.contains_key(&id)
    }

    fn operand(&self, operand: &Operand) -> Result<Resolved, GraphError> {
        match operand {
            Operand::Value(value) => {
                let spec = self
                    .types
                    .get(value)
                    .cloned()
                    .ok_or(GraphError::MissingValueDefinition { value: *value })?;
                Ok(Resolved {
                    spec,
                    shape_value: self.shape_values.get(value).cloned(),
                })
            }
            Operand::Literal(literal) => Ok(Resolved {
                spec: literal.spec.clone(),
                shape_value: literal_shape_value(literal),
            }),
        }
    }

    /// Infers the output of `op` applied to `operands` against the values defined so far.
    pub fn infer(
        &self,
        node: ValueId,
        op: &Operation,
        operands: &[Operand],
        variables: &[Variable],
    ) -> Result<Inferred, GraphError> {
        let resolved = operands
            .iter()
            .map(|operand| self.operand(operand))
            .collect::<Result<Vec<_>, _>>()?;
        let name = op.type_name();
        let fail = |reason: String| GraphError::inference(node, name, reason);

        match op {
            Operation::Constant(literal) => {
                expect_arity(&resolved, 0, &fail)?;
                Ok(Inferred {
                    spec: literal.spec.clone(),
                    shape_value: literal_shape_value(literal),
                })
            }
            Operation::ElementwiseBinary(_) => {
                expect_arity(&resolved, 2, &fail)?;
                let (lhs, rhs) = (&resolved[0].spec, &resolved[1].spec);
                if lhs.dtype != rhs.dtype {
                    return Err(fail(format!(
                        "operand dtypes differ: {:?} vs {:?}",
                        lhs.dtype, rhs.dtype
                    )));
                }
                let shape = broadcast_shapes(&lhs.shape, &rhs.shape).map_err(fail)?;
                Ok(Inferred::plain(TensorSpec::new(lhs.dtype, shape)))
            }
            Operation::Cast(spec) => {
                expect_arity(&resolved, 1, &fail)?;
                let input = &resolved[0];
                let shape_value = if input.spec.dtype.is_integer() && spec.dtype.is_integer() {
                    input.shape_value.clone()
                } else {
                    None
                };
                Ok(Inferred {
                    spec: TensorSpec::new(spec.dtype, input.spec.shape.clone()),
                    shape_value,
                })
            }
            Operation::Concat(spec) => infer_concat(spec.axis, &resolved, &fail),
            Operation::Gather(spec) => infer_gather(spec.axis, &resolved, &fail),
            Operation::ShapeOf(spec) => {
                expect_arity(&resolved, 1, &fail)?;
                if !matches!(spec.dtype, DType::Si32 | DType::Si64) {
                    return Err(fail(format!("shape_of cannot produce {:?}", spec.dtype)));
                }
                let input = &resolved[0].spec.shape;
                Ok(Inferred {
                    spec: TensorSpec::new(
                        spec.dtype,
                        Shape::new(vec![Dimension::Static(input.rank())]),
                    ),
                    shape_value: Some(input.dims().to_vec()),
                })
            }
            Operation::Broadcast => infer_broadcast(node, &resolved, &fail),
            Operation::ReadValue(id) => {
                let variable = variables
                    .iter()
                    .find(|var| &var.id == id)
                    .ok_or_else(|| GraphError::UnknownVariable { id: id.clone() })?;
                if resolved.len() > 1 {
                    return Err(fail(format!(
                        "expected at most one initializer, got {}",
                        resolved.len()
                    )));
                }
                if let Some(init) = resolved.first() {
                    check_against_variable(&init.spec, variable, "initializer").map_err(fail)?;
                }
                Ok(Inferred::plain(variable.spec.clone()))
            }
            Operation::Assign(id) => {
                expect_arity(&resolved, 1, &fail)?;
                let variable = variables
                    .iter()
                    .find(|var| &var.id == id)
                    .ok_or_else(|| GraphError::UnknownVariable { id: id.clone() })?;
                check_against_variable(&resolved[0].spec, variable, "assigned value")
                    .map_err(fail)?;
                Ok(Inferred::plain(resolved[0].spec.clone()))
            }
        }
    }
}

struct Resolved {
    spec: TensorSpec,
    shape_value: Option<Vec<Dimension>>,
}

/// Re-derives every node output in body order and checks structural invariants.
pub fn validate_nodes_and_infer_types(graph: &mut Graph) -> Result<(), GraphError> {
    let mut seen_variables = HashSet::new();
    for variable in &graph.variables {
        if !seen_variables.insert(&variable.id) {
            return Err(GraphError::DuplicateVariable {
                id: variable.id.clone(),
            });
        }
    }

    let mut env = TypeEnv::new();
    for param in &graph.parameters {
        env.define_parameter(param)?;
    }

    let variables = &graph.variables;
    for node in &mut graph.body {
        let inferred = env.infer(node.id, &node.op, &node.operands, variables)?;
        node.output = inferred.spec.clone();
        env.define(node.id, inferred)?;
    }

    for result in &graph.results {
        if !env.contains(*result) {
            return Err(GraphError::MissingValueDefinition { value: *result });
        }
    }

    for sink in &graph.sinks {
        let is_assign = graph
            .node(*sink)
            .is_some_and(|node| matches!(node.op, Operation::Assign(_)));
        if !is_assign {
            return Err(GraphError::InvalidSink { value: *sink });
        }
    }

    Ok(())
}

fn expect_arity<F>(resolved: &[Resolved], expected: usize, fail: &F) -> Result<(), GraphError>
where
    F: Fn(String) -> GraphError,
{
    if resolved.len() != expected {
        return Err(fail(format!(
            "expected {expected} operands, got {}",
            resolved.len()
        )));
    }
    Ok(())
}

fn literal_shape_value(literal: &TensorLiteral) -> Option<Vec<Dimension>> {
    if literal.spec.shape.rank() > 1 {
        return None;
    }
    literal
        .to_i64_vec()?
        .into_iter()
        .map(|value| usize::try_from(value).ok().map(Dimension::Static))
        .collect()
}

fn normalize_axis(axis: isize, rank: usize) -> Option<usize> {
    let rank = rank as isize;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

fn check_against_variable(
    spec: &TensorSpec,
    variable: &Variable,
    what: &str,
) -> Result<(), String> {
    if spec.dtype != variable.spec.dtype {
        return Err(format!(
            "{what} dtype {:?} does not match variable `{}` dtype {:?}",
            spec.dtype, variable.id, variable.spec.dtype
        ));
    }
    if !spec.shape.is_compatible(&variable.spec.shape) {
        return Err(format!(
            "{what} shape {} is incompatible with variable `{}` shape {}",
            spec.shape, variable.id, variable.spec.shape
        ));
    }
    Ok(())
}

fn merge_broadcast_dim(lhs: &Dimension, rhs: &Dimension) -> Result<Dimension, String> {
    match (lhs, rhs) {
        (Dimension::Static(a), Dimension::Static(b)) => {
            if a == b || *b == 1 {
                Ok(lhs.clone())
            } else if *a == 1 {
                Ok(rhs.clone())
            } else {
                Err(format!("cannot broadcast {a} against {b}"))
            }
        }
        (Dimension::Static(1), dynamic @ Dimension::Dynamic { .. })
        | (dynamic @ Dimension::Dynamic { .. }, Dimension::Static(1)) => Ok(dynamic.clone()),
        (fixed @ Dimension::Static(_), Dimension::Dynamic { .. })
        | (Dimension::Dynamic { .. }, fixed @ Dimension::Static(_)) => Ok(fixed.clone()),
        (Dimension::Dynamic { .. }, Dimension::Dynamic { .. }) => Ok(lhs.clone()),
    }
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast_shapes(lhs: &Shape, rhs: &Shape) -> Result<Shape, String> {
    let rank = lhs.rank().max(rhs.rank());
    let one = Dimension::Static(1);
    let mut dims = Vec::with_capacity(rank);
    for axis in 0..rank {
        let lhs_dim = (axis + lhs.rank())
            .checked_sub(rank)
            .and_then(|idx| lhs.dim(idx))
            .unwrap_or(&one);
        let rhs_dim = (axis + rhs.rank())
            .checked_sub(rank)
            .and_then(|idx| rhs.dim(idx))
            .unwrap_or(&one);
        dims.push(merge_broadcast_dim(lhs_dim, rhs_dim)?);
    }
    Ok(Shape::new(dims))
}

fn dim_term(dim: &Dimension) -> String {
    match dim {
        Dimension::Static(value) => value.to_string(),
        Dimension::Dynamic { symbol, .. } => symbol.as_str().to_string(),
    }
}

fn infer_concat<F>(axis: isize, resolved: &[Resolved], fail: &F) -> Result<Inferred, GraphError>
where
    F: Fn(String) -> GraphError,
{
    let Some(first) = resolved.first() else {
        return Err(fail("concat requires at least one operand".to_string()));
    };
    let rank = first.spec.shape.rank();
    let Some(axis) = normalize_axis(axis, rank) else {
        return Err(fail(format!("axis {axis} out of range for rank {rank}")));
    };

    let mut dims = first.spec.shape.dims().to_vec();
    let mut axis_parts = vec![dims[axis].clone()];
    for operand in &resolved[1..] {
        if operand.spec.dtype != first.spec.dtype {
            return Err(fail(format!(
                "operand dtypes differ: {:?} vs {:?}",
                first.spec.dtype, operand.spec.dtype
            )));
        }
        if operand.spec.shape.rank() != rank {
            return Err(fail(format!(
                "operand ranks differ: {rank} vs {}",
                operand.spec.shape.rank()
            )));
        }
        for (idx, dim) in operand.spec.shape.dims().iter().enumerate() {
            if idx == axis {
                axis_parts.push(dim.clone());
                continue;
            }
            if !dims[idx].is_compatible(dim) {
                return Err(fail(format!(
                    "dimension {idx} mismatch: {} vs {dim}",
                    dims[idx]
                )));
            }
            if !dims[idx].is_static() && dim.is_static() {
                dims[idx] = dim.clone();
            }
        }
    }

    dims[axis] = match axis_parts
        .iter()
        .map(Dimension::as_static)
        .collect::<Option<Vec<_>>>()
    {
        Some(extents) => Dimension::Static(extents.iter().sum()),
        None => Dimension::bounded(
            axis_parts.iter().map(dim_term).collect::<Vec<_>>().join("+"),
            axis_parts.iter().map(Dimension::min_length).sum(),
        ),
    };

    let shape_value = if axis == 0 && rank == 1 {
        resolved
            .iter()
            .map(|operand| operand.shape_value.clone())
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat())
    } else {
        None
    };

    Ok(Inferred {
        spec: TensorSpec::new(first.spec.dtype, Shape::new(dims)),
        shape_value,
    })
}

fn infer_gather<F>(axis: isize, resolved: &[Resolved], fail: &F) -> Result<Inferred, GraphError>
where
    F: Fn(String) -> GraphError,
{
    expect_arity(resolved, 2, fail)?;
    let (data, indices) = (&resolved[0], &resolved[1]);
    if !indices.spec.dtype.is_integer() {
        return Err(fail(format!(
            "indices must be integer, got {:?}",
            indices.spec.dtype
        )));
    }
    let rank = data.spec.shape.rank();
    let Some(axis) = normalize_axis(axis, rank) else {
        return Err(fail(format!("axis {axis} out of range for rank {rank}")));
    };

    let data_dims = data.spec.shape.dims();
    let mut dims = Vec::with_capacity(rank + indices.spec.shape.rank());
    dims.extend_from_slice(&data_dims[..axis]);
    dims.extend_from_slice(indices.spec.shape.dims());
    dims.extend_from_slice(&data_dims[axis + 1..]);

    let shape_value = match (&data.shape_value, &indices.shape_value) {
        (Some(values), Some(picks)) if axis == 0 && rank == 1 => picks
            .iter()
            .map(|pick| pick.as_static().and_then(|idx| values.get(idx).cloned()))
            .collect::<Option<Vec<_>>>(),
        _ => None,
    };

    Ok(Inferred {
        spec: TensorSpec::new(data.spec.dtype, Shape::new(dims)),
        shape_value,
    })
}

fn infer_broadcast<F>(
    node: ValueId,
    resolved: &[Resolved],
    fail: &F,
) -> Result<Inferred, GraphError>
where
    F: Fn(String) -> GraphError,
{
    expect_arity(resolved, 2, fail)?;
    let (value, target) = (&resolved[0], &resolved[1]);
    if !target.spec.dtype.is_integer() || target.spec.shape.rank() != 1 {
        return Err(fail(format!(
            "target shape must be a 1-D integer tensor, got {}",
            target.spec
        )));
    }
    let Some(Some(out_rank)) = target.spec.shape.dim(0).map(Dimension::as_static) else {
        return Err(fail("target shape length must be static".to_string()));
    };
    if value.spec.shape.rank() > out_rank {
        return Err(fail(format!(
            "cannot broadcast rank {} to rank {out_rank}",
            value.spec.shape.rank()
        )));
    }

    let dims = match &target.shape_value {
        Some(dims) => dims.clone(),
        None => (0..out_rank)
            .map(|axis| Dimension::dynamic(format!("broadcast{}_{axis}", node.0)))
            .collect(),
    };
    let result = Shape::new(dims);
    let merged = broadcast_shapes(&value.spec.shape, &result).map_err(fail)?;
    if !merged.is_compatible(&result) {
        return Err(fail(format!(
            "value shape {} does not broadcast to {result}",
            value.spec.shape
        )));
    }

    Ok(Inferred::plain(TensorSpec::new(value.spec.dtype, result)))
}
