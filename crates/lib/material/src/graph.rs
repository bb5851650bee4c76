// Copyright (C) 2023-2024 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;

use smol_str::SmolStr;
use torch_assets::{Texture, TypedAssetId};
use torch_common::Id;

use crate::{Error, Result, ShaderResourceInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    Bool,
    Int,
    Uint,
    Float,
}

impl ScalarType {
    fn glsl_prefix(&self) -> &'static str {
        match self {
            Self::Bool => "b",
            Self::Int => "i",
            Self::Uint => "u",
            Self::Float => "",
        }
    }

    fn glsl_scalar(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
        }
    }
}

/// A concrete GLSL value type: a scalar with one to four channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BasicType {
    pub scalar: ScalarType,
    pub channels: u8,
}

impl BasicType {
    pub const FLOAT: Self = Self {
        scalar: ScalarType::Float,
        channels: 1,
    };
    pub const VEC2: Self = Self {
        scalar: ScalarType::Float,
        channels: 2,
    };
    pub const VEC3: Self = Self {
        scalar: ScalarType::Float,
        channels: 3,
    };
    pub const VEC4: Self = Self {
        scalar: ScalarType::Float,
        channels: 4,
    };

    pub fn glsl_name(&self) -> String {
        if self.channels == 1 {
            self.scalar.glsl_scalar().to_string()
        } else {
            format!("{}vec{}", self.scalar.glsl_prefix(), self.channels)
        }
    }
}

/// Constraint on a socket's type. Narrows through intersection until it
/// pins down a single [`BasicType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRange {
    pub upper_bound_scalar: ScalarType,
    pub min_channels: u8,
    pub max_channels: u8,
}

impl TypeRange {
    pub fn exact(ty: BasicType) -> Self {
        Self {
            upper_bound_scalar: ty.scalar,
            min_channels: ty.channels,
            max_channels: ty.channels,
        }
    }

    pub fn any_float(min_channels: u8, max_channels: u8) -> Self {
        Self {
            upper_bound_scalar: ScalarType::Float,
            min_channels,
            max_channels,
        }
    }

    /// The intersection of two ranges is again a range; None if empty.
    pub fn intersect(&self, other: &TypeRange) -> Option<TypeRange> {
        let min_channels = self.min_channels.max(other.min_channels);
        let max_channels = self.max_channels.min(other.max_channels);
        if min_channels > max_channels {
            return None;
        }
        Some(TypeRange {
            upper_bound_scalar: self.upper_bound_scalar.min(other.upper_bound_scalar),
            min_channels,
            max_channels,
        })
    }

    /// A range with a single channel count is a concrete type.
    pub fn concrete(&self) -> Option<BasicType> {
        (self.min_channels == self.max_channels).then_some(BasicType {
            scalar: self.upper_bound_scalar,
            channels: self.min_channels,
        })
    }

    pub fn contains(&self, ty: BasicType) -> bool {
        ty.scalar <= self.upper_bound_scalar
            && (self.min_channels..=self.max_channels).contains(&ty.channels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl ConstantValue {
    pub fn ty(&self) -> BasicType {
        match self {
            Self::Bool(_) => BasicType {
                scalar: ScalarType::Bool,
                channels: 1,
            },
            Self::Int(_) => BasicType {
                scalar: ScalarType::Int,
                channels: 1,
            },
            Self::Uint(_) => BasicType {
                scalar: ScalarType::Uint,
                channels: 1,
            },
            Self::Float(_) => BasicType::FLOAT,
            Self::Vec2(_) => BasicType::VEC2,
            Self::Vec3(_) => BasicType::VEC3,
            Self::Vec4(_) => BasicType::VEC4,
        }
    }

    pub fn glsl(&self) -> String {
        fn float(value: f32) -> String {
            // A plain integer literal would change the GLSL type.
            if value.fract() == 0.0 {
                format!("{:.1}", value)
            } else {
                format!("{}", value)
            }
        }

        match self {
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => format!("{}u", v),
            Self::Float(v) => float(*v),
            Self::Vec2(v) => format!("vec2({}, {})", float(v[0]), float(v[1])),
            Self::Vec3(v) => format!("vec3({}, {}, {})", float(v[0]), float(v[1]), float(v[2])),
            Self::Vec4(v) => format!(
                "vec4({}, {}, {}, {})",
                float(v[0]),
                float(v[1]),
                float(v[2]),
                float(v[3])
            ),
        }
    }
}

/// Values the vertex stage hands to the material, available without any
/// graph input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    VertexUv,
    VertexNormal,
    VertexPosition,
}

impl Builtin {
    pub fn ty(&self) -> BasicType {
        match self {
            Self::VertexUv => BasicType::VEC2,
            Self::VertexNormal | Self::VertexPosition => BasicType::VEC3,
        }
    }

    fn glsl(&self) -> &'static str {
        match self {
            Self::VertexUv => "v_uv",
            Self::VertexNormal => "v_normal",
            Self::VertexPosition => "v_position",
        }
    }
}

/// A texture slot of a material, resolved to a device index when the
/// material program is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureReference {
    pub texture: TypedAssetId<Texture>,
}

#[derive(Debug, Clone)]
pub struct InputSocket {
    pub name: SmolStr,
    pub ty: TypeRange,
    pub default: Option<ConstantValue>,
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: SmolStr,
    pub inputs: Vec<InputSocket>,
    pub output: TypeRange,
    /// When set, the output type narrows to the type of this input.
    pub output_like_input: Option<usize>,
}

/// A node's behavior: its typed sockets and the GLSL expression it
/// produces from already-emitted input expressions.
pub trait MaterialFunction: Send + Sync + 'static {
    fn signature(&self) -> &FunctionSignature;
    fn emit(&self, inputs: &[String], resources: &mut ShaderResourceInterface) -> String;
}

struct ConstantFunction {
    signature: FunctionSignature,
    value: ConstantValue,
}

impl ConstantFunction {
    fn new(value: ConstantValue) -> Self {
        Self {
            signature: FunctionSignature {
                name: SmolStr::new("constant"),
                inputs: Vec::new(),
                output: TypeRange::exact(value.ty()),
                output_like_input: None,
            },
            value,
        }
    }
}

impl MaterialFunction for ConstantFunction {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn emit(&self, _inputs: &[String], _resources: &mut ShaderResourceInterface) -> String {
        self.value.glsl()
    }
}

struct BuiltinFunction {
    signature: FunctionSignature,
    builtin: Builtin,
}

impl BuiltinFunction {
    fn new(builtin: Builtin) -> Self {
        Self {
            signature: FunctionSignature {
                name: SmolStr::new("builtin"),
                inputs: Vec::new(),
                output: TypeRange::exact(builtin.ty()),
                output_like_input: None,
            },
            builtin,
        }
    }
}

impl MaterialFunction for BuiltinFunction {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn emit(&self, _inputs: &[String], _resources: &mut ShaderResourceInterface) -> String {
        self.builtin.glsl().to_string()
    }
}

struct TextureSampleFunction {
    signature: FunctionSignature,
    texture: TextureReference,
}

impl TextureSampleFunction {
    fn new(texture: TextureReference) -> Self {
        Self {
            signature: FunctionSignature {
                name: SmolStr::new("texture_sample"),
                inputs: vec![InputSocket {
                    name: SmolStr::new("uv"),
                    ty: TypeRange::exact(BasicType::VEC2),
                    default: None,
                }],
                output: TypeRange::exact(BasicType::VEC4),
                output_like_input: None,
            },
            texture,
        }
    }
}

impl MaterialFunction for TextureSampleFunction {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn emit(&self, inputs: &[String], resources: &mut ShaderResourceInterface) -> String {
        let accessor = resources.query_texture(self.texture);
        format!("texture({}, {})", accessor, inputs[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Multiply,
}

/// Componentwise arithmetic on two values of the same float type.
pub struct BinaryOpFunction {
    signature: FunctionSignature,
    op: BinaryOp,
}

impl BinaryOpFunction {
    pub fn new(op: BinaryOp) -> Self {
        let operand = InputSocket {
            name: SmolStr::new("a"),
            ty: TypeRange::any_float(1, 4),
            default: None,
        };
        let mut b = operand.clone();
        b.name = SmolStr::new("b");
        Self {
            signature: FunctionSignature {
                name: SmolStr::new(match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Multiply => "multiply",
                }),
                inputs: vec![operand, b],
                output: TypeRange::any_float(1, 4),
                output_like_input: Some(0),
            },
            op,
        }
    }
}

impl MaterialFunction for BinaryOpFunction {
    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn emit(&self, inputs: &[String], _resources: &mut ShaderResourceInterface) -> String {
        let op = match self.op {
            BinaryOp::Add => "+",
            BinaryOp::Multiply => "*",
        };
        format!("({} {} {})", inputs[0], op, inputs[1])
    }
}

/// The parameters a material can feed into the lighting model. Each has
/// a fixed type and a default used when the graph leaves it open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputParameter {
    Color,
    Normal,
    Roughness,
    Metallic,
    Emissive,
    Opacity,
}

impl OutputParameter {
    pub const ALL: [Self; 6] = [
        Self::Color,
        Self::Normal,
        Self::Roughness,
        Self::Metallic,
        Self::Emissive,
        Self::Opacity,
    ];

    pub fn ty(&self) -> BasicType {
        match self {
            Self::Color => BasicType::VEC4,
            Self::Normal => BasicType::VEC3,
            Self::Roughness | Self::Metallic | Self::Opacity => BasicType::FLOAT,
            Self::Emissive => BasicType::VEC4,
        }
    }

    pub fn default_value(&self) -> ConstantValue {
        match self {
            Self::Color => ConstantValue::Vec4([1.0, 1.0, 1.0, 1.0]),
            Self::Normal => ConstantValue::Vec3([0.0, 0.0, 1.0]),
            Self::Roughness => ConstantValue::Float(1.0),
            Self::Metallic => ConstantValue::Float(0.0),
            Self::Emissive => ConstantValue::Vec4([0.0, 0.0, 0.0, 0.0]),
            Self::Opacity => ConstantValue::Float(1.0),
        }
    }

    pub(crate) fn variable_name(&self) -> &'static str {
        match self {
            Self::Color => "mat_color",
            Self::Normal => "mat_normal",
            Self::Roughness => "mat_roughness",
            Self::Metallic => "mat_metallic",
            Self::Emissive => "mat_emissive",
            Self::Opacity => "mat_opacity",
        }
    }
}

pub enum NodeTag {}
pub type NodeId = Id<NodeTag>;

pub(crate) struct Node {
    pub function: Box<dyn MaterialFunction>,
    pub inputs: Vec<Option<NodeId>>,
}

/// A directed acyclic graph of material nodes. Outputs are wired to the
/// material's parameters; unwired parameters fall back to defaults.
#[derive(Default)]
pub struct MaterialGraph {
    nodes: Vec<Node>,
    outputs: BTreeMap<OutputParameter, NodeId>,
}

impl MaterialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(
        &mut self,
        function: impl MaterialFunction,
        args: Vec<Option<NodeId>>,
    ) -> NodeId {
        assert_eq!(
            function.signature().inputs.len(),
            args.len(),
            "argument count does not match the function signature"
        );
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            function: Box::new(function),
            inputs: args,
        });
        id
    }

    pub fn add_constant(&mut self, value: ConstantValue) -> NodeId {
        self.add_function(ConstantFunction::new(value), Vec::new())
    }

    pub fn add_builtin(&mut self, builtin: Builtin) -> NodeId {
        self.add_function(BuiltinFunction::new(builtin), Vec::new())
    }

    pub fn add_texture_sample(&mut self, texture: TextureReference, uv: NodeId) -> NodeId {
        self.add_function(TextureSampleFunction::new(texture), vec![Some(uv)])
    }

    pub fn connect(&mut self, node: NodeId, input: usize, source: NodeId) {
        self.nodes[node.index()].inputs[input] = Some(source);
    }

    pub fn set_output(&mut self, parameter: OutputParameter, node: NodeId) {
        self.outputs.insert(parameter, node);
    }

    pub fn output(&self, parameter: OutputParameter) -> Option<NodeId> {
        self.outputs.get(&parameter).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_name(&self, id: NodeId) -> String {
        format!("{} #{}", self.nodes[id.index()].function.signature().name, id)
    }

    /// Check the required contract: no cycles, and every input either
    /// connected to a compatible output or backed by a default.
    pub fn validate(&self) -> Result<()> {
        self.check_cycles()?;
        self.infer_types().map(|_| ())
    }

    fn check_cycles(&self) -> Result<()> {
        const UNSEEN: u8 = 0;
        const OPEN: u8 = 1;
        const DONE: u8 = 2;

        fn visit(graph: &MaterialGraph, id: NodeId, state: &mut [u8]) -> Result<()> {
            match state[id.index()] {
                DONE => return Ok(()),
                OPEN => return Err(Error::GraphCycle),
                _ => {}
            }
            state[id.index()] = OPEN;
            for input in graph.nodes[id.index()].inputs.iter().flatten() {
                visit(graph, *input, state)?;
            }
            state[id.index()] = DONE;
            Ok(())
        }

        let mut state = vec![UNSEEN; self.nodes.len()];
        for id in self.outputs.values() {
            visit(self, *id, &mut state)?;
        }
        Ok(())
    }

    /// Resolve every reachable node to a concrete type.
    pub fn infer_types(&self) -> Result<Vec<Option<BasicType>>> {
        fn resolve(
            graph: &MaterialGraph,
            id: NodeId,
            types: &mut Vec<Option<BasicType>>,
        ) -> Result<BasicType> {
            if let Some(ty) = types[id.index()] {
                return Ok(ty);
            }

            let node = &graph.nodes[id.index()];
            let signature = node.function.signature();
            let mut input_types = Vec::with_capacity(signature.inputs.len());
            for (index, socket) in signature.inputs.iter().enumerate() {
                let ty = match node.inputs[index] {
                    Some(source) => resolve(graph, source, types)?,
                    None => {
                        let default = socket.default.as_ref().ok_or_else(|| {
                            Error::UnconnectedInput {
                                node: graph.node_name(id),
                                input: socket.name.to_string(),
                            }
                        })?;
                        default.ty()
                    }
                };
                if !socket.ty.contains(ty) {
                    return Err(Error::TypeMismatch {
                        node: graph.node_name(id),
                        input: socket.name.to_string(),
                        ty: ty.glsl_name(),
                    });
                }
                input_types.push(ty);
            }

            let mut output = signature.output;
            if let Some(index) = signature.output_like_input {
                output = output
                    .intersect(&TypeRange::exact(input_types[index]))
                    .ok_or_else(|| Error::AmbiguousType(graph.node_name(id)))?;
            }
            let concrete = output
                .concrete()
                .ok_or_else(|| Error::AmbiguousType(graph.node_name(id)))?;
            types[id.index()] = Some(concrete);

            Ok(concrete)
        }

        self.check_cycles()?;
        let mut types = vec![None; self.nodes.len()];
        for (parameter, id) in &self.outputs {
            let ty = resolve(self, *id, &mut types)?;
            if ty != parameter.ty() {
                return Err(Error::TypeMismatch {
                    node: self.node_name(*id),
                    input: format!("output {:?}", parameter),
                    ty: ty.glsl_name(),
                });
            }
        }

        Ok(types)
    }
}

#[cfg(test)]
mod test {
    use torch_assets::{AssetId, LocalId, TypedAssetId};

    use super::{
        BasicType, BinaryOp, BinaryOpFunction, Builtin, ConstantValue, MaterialGraph,
        OutputParameter, ScalarType, TextureReference, TypeRange,
    };
    use crate::Error;

    pub(crate) fn test_texture(index: u32) -> TextureReference {
        TextureReference {
            texture: TypedAssetId::new(AssetId::new(index, 0), LocalId::new(index)),
        }
    }

    #[test]
    fn range_intersection_narrows_to_concrete() {
        let a = TypeRange::any_float(1, 4);
        let b = TypeRange::exact(BasicType::VEC3);
        let narrowed = a.intersect(&b).unwrap();
        assert_eq!(Some(BasicType::VEC3), narrowed.concrete());
        assert_eq!(None, a.concrete());

        let disjoint = TypeRange::exact(BasicType::FLOAT).intersect(&b);
        assert!(disjoint.is_none());
    }

    #[test]
    fn scalar_upper_bound_limits_membership() {
        let ints_only = TypeRange {
            upper_bound_scalar: ScalarType::Int,
            min_channels: 1,
            max_channels: 4,
        };
        assert!(!ints_only.contains(BasicType::FLOAT));
        assert!(ints_only.contains(BasicType {
            scalar: ScalarType::Bool,
            channels: 2
        }));
    }

    #[test]
    fn unconnected_input_without_default_is_rejected() {
        let mut graph = MaterialGraph::new();
        let node = graph.add_function(BinaryOpFunction::new(BinaryOp::Add), vec![None, None]);
        graph.set_output(OutputParameter::Roughness, node);
        assert!(matches!(
            graph.validate(),
            Err(Error::UnconnectedInput { .. })
        ));
    }

    #[test]
    fn types_flow_through_arithmetic() {
        let mut graph = MaterialGraph::new();
        let a = graph.add_constant(ConstantValue::Float(0.25));
        let b = graph.add_constant(ConstantValue::Float(2.0));
        let product = graph.add_function(
            BinaryOpFunction::new(BinaryOp::Multiply),
            vec![Some(a), Some(b)],
        );
        graph.set_output(OutputParameter::Roughness, product);

        let types = graph.infer_types().unwrap();
        assert_eq!(Some(BasicType::FLOAT), types[product.index()]);
    }

    #[test]
    fn output_type_must_match_the_parameter() {
        let mut graph = MaterialGraph::new();
        let uv = graph.add_builtin(Builtin::VertexUv);
        graph.set_output(OutputParameter::Color, uv);
        assert!(matches!(
            graph.validate(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn cycles_are_detected() {
        let mut graph = MaterialGraph::new();
        let a = graph.add_constant(ConstantValue::Float(1.0));
        let add = graph.add_function(BinaryOpFunction::new(BinaryOp::Add), vec![Some(a), None]);
        graph.connect(add, 1, add);
        graph.set_output(OutputParameter::Roughness, add);
        assert!(matches!(graph.validate(), Err(Error::GraphCycle)));
    }

    #[test]
    fn texture_sample_produces_a_color() {
        let mut graph = MaterialGraph::new();
        let uv = graph.add_builtin(Builtin::VertexUv);
        let sample = graph.add_texture_sample(test_texture(0), uv);
        graph.set_output(OutputParameter::Color, sample);
        graph.validate().unwrap();
    }
}
