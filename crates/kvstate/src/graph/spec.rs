use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{ser::SerializeStruct, Deserialize, Serialize};

/// Scalar element types a graph port can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si32,
    Si64,
    Bf16,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns `true` for signed and unsigned integer types.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::Si8 | DType::Ui8 | DType::Si32 | DType::Si64)
    }

    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Bf16 | DType::F16 => 2,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }
}

/// Names a symbolic dynamic dimension (e.g. `?batch`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimSymbol(Arc<str>);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for DimSymbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DimSymbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(DimSymbol::new(name))
    }
}

/// Represents a single axis extent in a tensor shape.
///
/// Dynamic extents carry a symbol so that two axes known to be equal (for example the batch
/// axis of `input_ids` and of `beam_idx`) can be recognised after inference, plus the minimum
/// length the axis may take at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic { symbol: DimSymbol, min: usize },
}

impl Dimension {
    /// Dynamic extent with no lower bound.
    pub fn dynamic(symbol: impl Into<String>) -> Self {
        Self::Dynamic {
            symbol: DimSymbol::new(symbol),
            min: 0,
        }
    }

    /// Dynamic extent that is at least `min` long.
    pub fn bounded(symbol: impl Into<String>, min: usize) -> Self {
        Self::Dynamic {
            symbol: DimSymbol::new(symbol),
            min,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Dimension::Static(_))
    }

    pub fn as_static(&self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(*value),
            Dimension::Dynamic { .. } => None,
        }
    }

    /// Smallest extent the axis can take.
    pub fn min_length(&self) -> usize {
        match self {
            Dimension::Static(value) => *value,
            Dimension::Dynamic { min, .. } => *min,
        }
    }

    /// Returns `true` when both extents may describe the same runtime axis.
    pub fn is_compatible(&self, other: &Dimension) -> bool {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            (Dimension::Static(value), Dimension::Dynamic { min, .. })
            | (Dimension::Dynamic { min, .. }, Dimension::Static(value)) => value >= min,
            (Dimension::Dynamic { .. }, Dimension::Dynamic { .. }) => true,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic { symbol, min: 0 } => write!(f, "?{}", symbol.as_str()),
            Dimension::Dynamic { symbol, min } => write!(f, "?{}>={min}", symbol.as_str()),
        }
    }
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<&Dimension> {
        self.dims.get(axis)
    }

    /// Overwrites one axis; returns `false` when `axis` is outside the rank.
    pub fn set_dim(&mut self, axis: usize, dim: Dimension) -> bool {
        match self.dims.get_mut(axis) {
            Some(slot) => {
                *slot = dim;
                true
            }
            None => false,
        }
    }

    /// Ranks match and every axis pair is compatible.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(other.dims.iter())
                .all(|(lhs, rhs)| lhs.is_compatible(rhs))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("[]");
        }
        let dims = self
            .dims
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        f.write_str(&dims.join("x"))
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{:?}, {}>", self.dtype, self.shape)
    }
}

/// Dense literal tensor payload stored little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    /// Scalar zero of the given dtype; zero is all-zero bits for every supported dtype.
    pub fn zero_scalar(dtype: DType) -> Self {
        let spec = TensorSpec::new(dtype, Shape::scalar());
        Self::new(spec, Arc::from(vec![0u8; dtype.size_in_bytes()]))
    }

    /// Scalar `si64` literal.
    pub fn scalar_i64(value: i64) -> Self {
        let spec = TensorSpec::new(DType::Si64, Shape::scalar());
        Self::new(spec, Arc::from(value.to_le_bytes().to_vec()))
    }

    /// Scalar `f32` literal.
    pub fn scalar_f32(value: f32) -> Self {
        let spec = TensorSpec::new(DType::F32, Shape::scalar());
        Self::new(spec, Arc::from(value.to_le_bytes().to_vec()))
    }

    /// One-dimensional `si64` literal.
    pub fn vector_i64(values: &[i64]) -> Self {
        let spec = TensorSpec::new(DType::Si64, Shape::new(vec![Dimension::Static(values.len())]));
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<_>>();
        Self::new(spec, Arc::from(bytes))
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Decodes integer payloads; `None` for floating-point literals.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        let values = match self.spec.dtype {
            DType::Si64 => self
                .bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    i64::from_le_bytes(raw)
                })
                .collect(),
            DType::Si32 => self
                .bytes
                .chunks_exact(4)
                .map(|chunk| {
                    let mut raw = [0u8; 4];
                    raw.copy_from_slice(chunk);
                    i64::from(i32::from_le_bytes(raw))
                })
                .collect(),
            DType::Si8 => self.bytes.iter().map(|byte| i64::from(*byte as i8)).collect(),
            DType::Ui8 => self.bytes.iter().map(|byte| i64::from(*byte)).collect(),
            _ => return None,
        };
        Some(values)
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

/// Elementwise binary ops with numpy broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

/// Attribute payload for `cast`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastSpec {
    pub dtype: DType,
}

/// Attribute payload for `concat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatSpec {
    pub axis: isize,
}

/// Attribute payload for `gather`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherSpec {
    pub axis: isize,
}

/// Attribute payload for `shape_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeOfSpec {
    pub dtype: DType,
}

/// Identifies a persistent state variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub String);

impl VariableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for SSA values (parameters and node outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Operand reference in a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    Literal(TensorLiteral),
}

impl Operand {
    pub fn value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(id) => Some(*id),
            Operand::Literal(_) => None,
        }
    }
}

/// Operations understood by the graph engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    ElementwiseBinary(ElementwiseBinaryOp),
    Cast(CastSpec),
    Concat(ConcatSpec),
    /// Operands: data, indices.
    Gather(GatherSpec),
    ShapeOf(ShapeOfSpec),
    /// Operands: value, target shape (1-D integer tensor).
    Broadcast,
    /// Reads the current value of a variable. The optional operand is its initializer.
    ReadValue(VariableId),
    /// Writes the next value of a variable. Always registered as a graph sink.
    Assign(VariableId),
}

impl Operation {
    pub fn type_name(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::ElementwiseBinary(_) => "elementwise_binary",
            Operation::Cast(_) => "cast",
            Operation::Concat(_) => "concat",
            Operation::Gather(_) => "gather",
            Operation::ShapeOf(_) => "shape_of",
            Operation::Broadcast => "broadcast",
            Operation::ReadValue(_) => "read_value",
            Operation::Assign(_) => "assign",
        }
    }
}

/// External input of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ValueId,
    pub names: BTreeSet<String>,
    pub spec: TensorSpec,
}

impl Parameter {
    pub fn any_name(&self) -> Option<&str> {
        self.names.iter().next().map(String::as_str)
    }
}

/// Single SSA node in the graph body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: TensorSpec,
    #[serde(default)]
    pub names: BTreeSet<String>,
}

/// Declaration of state that survives across graph invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub spec: TensorSpec,
}

/// Computation graph of one forward step.
///
/// `body` is kept in topological order: every operand is a parameter or a node that appears
/// earlier. `results` are the values exposed as outputs; `sinks` are the `assign` nodes that
/// must run even though no result depends on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Node>,
    pub results: Vec<ValueId>,
    #[serde(default)]
    pub sinks: Vec<ValueId>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Graph {
    pub fn parameter(&self, id: ValueId) -> Option<&Parameter> {
        self.parameters.iter().find(|param| param.id == id)
    }

    pub fn parameter_mut(&mut self, id: ValueId) -> Option<&mut Parameter> {
        self.parameters.iter_mut().find(|param| param.id == id)
    }

    pub fn node(&self, id: ValueId) -> Option<&Node> {
        self.body.iter().find(|node| node.id == id)
    }

    pub fn variable(&self, id: &VariableId) -> Option<&Variable> {
        self.variables.iter().find(|var| &var.id == id)
    }

    /// Names attached to a parameter or node output.
    pub fn names_of(&self, value: ValueId) -> Option<&BTreeSet<String>> {
        if let Some(param) = self.parameter(value) {
            return Some(&param.names);
        }
        self.node(value).map(|node| &node.names)
    }

    /// Type of a parameter or node output.
    pub fn spec_of(&self, value: ValueId) -> Option<&TensorSpec> {
        if let Some(param) = self.parameter(value) {
            return Some(&param.spec);
        }
        self.node(value).map(|node| &node.output)
    }

    /// Parameter carrying `name`, if any.
    pub fn input(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|param| param.names.contains(name))
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters
            .iter_mut()
            .find(|param| param.names.contains(name))
    }

    /// Index into `results` of the output carrying `name`, if any.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.results.iter().position(|value| {
            self.names_of(*value)
                .is_some_and(|names| names.contains(name))
        })
    }

    /// Nodes whose op is `read_value`.
    pub fn read_values(&self) -> impl Iterator<Item = &Node> {
        self.body
            .iter()
            .filter(|node| matches!(node.op, Operation::ReadValue(_)))
    }

    /// Smallest id not used by any parameter or node.
    pub fn next_value_id(&self) -> ValueId {
        let max = self
            .parameters
            .iter()
            .map(|param| param.id.0)
            .chain(self.body.iter().map(|node| node.id.0))
            .max();
        ValueId(max.map_or(0, |max| max + 1))
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}
