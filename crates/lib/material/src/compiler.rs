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

use ash::vk;
use smol_str::SmolStr;
use torch_assets::TEXTURE_ARRAY_BINDING;

use crate::{MaterialGraph, NodeId, OutputParameter, Result, TextureReference};

/// Name of the descriptor set that carries the global asset tables. The
/// set index is substituted into the placeholder when the program's
/// layout is final.
pub const ASSET_DESCRIPTOR_SET: &str = "asset_registry";

/// Resources a shader module accumulates while its code is generated:
/// required descriptor sets, placeholder tokens for set indices, and the
/// textures bound through specialization constants.
#[derive(Debug, Default)]
pub struct ShaderResourceInterface {
    required_sets: Vec<SmolStr>,
    placeholders: BTreeMap<SmolStr, String>,
    textures: Vec<(u32, TextureReference)>,
}

impl ShaderResourceInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor set requirement and get the token that
    /// stands in for its index in the generated code.
    pub fn require_descriptor_set(&mut self, name: &str) -> String {
        let name = SmolStr::new(name);
        if !self.required_sets.contains(&name) {
            self.required_sets.push(name.clone());
        }
        let token = format!("$SET_{}", name);
        self.placeholders.insert(name, token.clone());
        token
    }

    /// Access a texture through the global texture array, indexed by a
    /// specialization constant. Registration order assigns the constant
    /// ids, so equal graphs produce identical mappings.
    pub fn query_texture(&mut self, texture: TextureReference) -> String {
        self.require_descriptor_set(ASSET_DESCRIPTOR_SET);
        let spec_id = match self
            .textures
            .iter()
            .find(|(_, existing)| *existing == texture)
        {
            Some((id, _)) => *id,
            None => {
                let id = self.textures.len() as u32;
                self.textures.push((id, texture));
                id
            }
        };
        format!("asset_textures[mat_tex_{}]", spec_id)
    }

    pub fn textures(&self) -> &[(u32, TextureReference)] {
        &self.textures
    }
}

/// A single compiled-to-GLSL shader stage together with its resource
/// interface.
#[derive(Debug, Clone)]
pub struct ShaderModule {
    pub stage: vk::ShaderStageFlags,
    pub glsl: String,
    /// Descriptor sets this stage needs, in first-use order.
    pub required_descriptor_sets: Vec<SmolStr>,
    /// Descriptor name -> placeholder token used in `glsl`.
    pub descriptor_placeholders: BTreeMap<SmolStr, String>,
    /// Specialization-constant id -> texture, fragment stage only.
    pub textures: Vec<(u32, TextureReference)>,
    pub push_constant_size: u32,
}

impl ShaderModule {
    /// Wrap hand-written GLSL, e.g. the vertex stage a material program
    /// pairs with its generated fragment stage.
    pub fn from_glsl(stage: vk::ShaderStageFlags, glsl: impl Into<String>) -> Self {
        Self {
            stage,
            glsl: glsl.into(),
            required_descriptor_sets: Vec::new(),
            descriptor_placeholders: BTreeMap::new(),
            textures: Vec::new(),
            push_constant_size: 0,
        }
    }

    pub fn require_descriptor_set(mut self, name: &str, placeholder: impl Into<String>) -> Self {
        let name = SmolStr::new(name);
        if !self.required_descriptor_sets.contains(&name) {
            self.required_descriptor_sets.push(name.clone());
        }
        self.descriptor_placeholders.insert(name, placeholder.into());
        self
    }

    pub fn with_push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }

    /// The placeholder token for a descriptor set's index, if this stage
    /// references the set.
    pub fn descriptor_index_placeholder(&self, name: &str) -> Option<&str> {
        self.descriptor_placeholders
            .get(name)
            .map(String::as_str)
    }
}

/// Compile a material graph into the fragment stage of a material
/// program. Output parameters not wired in the graph are filled with
/// their defaults; the resulting module carries every texture the graph
/// samples as a specialization-constant reference.
pub fn compile_material_graph(graph: &MaterialGraph) -> Result<ShaderModule> {
    graph.validate()?;
    let types = graph.infer_types()?;

    let mut resources = ShaderResourceInterface::new();
    let mut body = Vec::<String>::new();
    let mut emitted: Vec<Option<String>> = vec![None; graph.node_count()];

    fn emit_node(
        graph: &MaterialGraph,
        id: NodeId,
        types: &[Option<crate::BasicType>],
        resources: &mut ShaderResourceInterface,
        body: &mut Vec<String>,
        emitted: &mut Vec<Option<String>>,
    ) -> String {
        if let Some(var) = &emitted[id.index()] {
            return var.clone();
        }

        let node = graph.node(id);
        let signature = node.function.signature();
        let mut inputs = Vec::with_capacity(signature.inputs.len());
        for (index, socket) in signature.inputs.iter().enumerate() {
            let expr = match node.inputs[index] {
                Some(source) => emit_node(graph, source, types, resources, body, emitted),
                None => socket
                    .default
                    .as_ref()
                    .expect("validated graph has defaults for open inputs")
                    .glsl(),
            };
            inputs.push(expr);
        }

        let expr = node.function.emit(&inputs, resources);
        let var = format!("n{}", id.index());
        let ty = types[id.index()].expect("validated graph has concrete types");
        body.push(format!("    {} {} = {};", ty.glsl_name(), var, expr));
        emitted[id.index()] = Some(var.clone());

        var
    }

    let mut outputs = Vec::new();
    for parameter in OutputParameter::ALL {
        let value = match graph.output(parameter) {
            Some(node) => emit_node(graph, node, &types, &mut resources, &mut body, &mut emitted),
            None => parameter.default_value().glsl(),
        };
        outputs.push(format!(
            "    {} {} = {};",
            parameter.ty().glsl_name(),
            parameter.variable_name(),
            value
        ));
    }

    let mut glsl = String::new();
    glsl.push_str("#version 460\n");
    glsl.push_str("#extension GL_EXT_nonuniform_qualifier : enable\n\n");
    glsl.push_str("layout(location = 0) in vec3 v_position;\n");
    glsl.push_str("layout(location = 1) in vec3 v_normal;\n");
    glsl.push_str("layout(location = 2) in vec2 v_uv;\n\n");
    glsl.push_str("layout(location = 0) out vec4 out_color;\n\n");

    if !resources.textures.is_empty() {
        let set_token = resources.placeholders[ASSET_DESCRIPTOR_SET].clone();
        glsl.push_str(&format!(
            "layout(set = {}, binding = {}) uniform sampler2D asset_textures[];\n",
            set_token, TEXTURE_ARRAY_BINDING
        ));
        for (spec_id, _) in &resources.textures {
            glsl.push_str(&format!(
                "layout(constant_id = {0}) const uint mat_tex_{0} = 0;\n",
                spec_id
            ));
        }
        glsl.push('\n');
    }

    glsl.push_str("void main() {\n");
    for line in &body {
        glsl.push_str(line);
        glsl.push('\n');
    }
    for line in &outputs {
        glsl.push_str(line);
        glsl.push('\n');
    }
    glsl.push_str("    out_color = vec4(mat_color.rgb + mat_emissive.rgb, mat_opacity);\n");
    glsl.push_str("}\n");

    Ok(ShaderModule {
        stage: vk::ShaderStageFlags::FRAGMENT,
        glsl,
        required_descriptor_sets: resources.required_sets.clone(),
        descriptor_placeholders: resources.placeholders.clone(),
        textures: resources.textures.clone(),
        push_constant_size: 0,
    })
}

#[cfg(test)]
mod test {
    use ash::vk;
    use torch_assets::{AssetId, LocalId, TypedAssetId};

    use super::{compile_material_graph, ASSET_DESCRIPTOR_SET};
    use crate::{
        Builtin, ConstantValue, MaterialGraph, OutputParameter, TextureReference,
    };

    fn texture(index: u32) -> TextureReference {
        TextureReference {
            texture: TypedAssetId::new(AssetId::new(index, 0), LocalId::new(index)),
        }
    }

    fn albedo_graph() -> MaterialGraph {
        let mut graph = MaterialGraph::new();
        let uv = graph.add_builtin(Builtin::VertexUv);
        let sample = graph.add_texture_sample(texture(0), uv);
        graph.set_output(OutputParameter::Color, sample);
        graph
    }

    #[test]
    fn textures_become_specialization_constants() {
        let module = compile_material_graph(&albedo_graph()).unwrap();

        assert_eq!(vk::ShaderStageFlags::FRAGMENT, module.stage);
        assert_eq!(1, module.textures.len());
        assert_eq!(0, module.textures[0].0);
        // The texture is reached through the global array and a constant
        // index; there is no per-texture descriptor binding.
        assert!(module.glsl.contains("layout(constant_id = 0)"));
        assert!(module.glsl.contains("asset_textures[mat_tex_0]"));
        assert_eq!(
            1,
            module.glsl.matches("layout(set = ").count(),
            "only the asset registry set is declared"
        );
        assert!(module
            .descriptor_index_placeholder(ASSET_DESCRIPTOR_SET)
            .is_some());
    }

    #[test]
    fn unwired_parameters_use_defaults() {
        let module = compile_material_graph(&albedo_graph()).unwrap();
        assert!(module.glsl.contains("float mat_roughness = 1.0;"));
        assert!(module.glsl.contains("float mat_metallic = 0.0;"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile_material_graph(&albedo_graph()).unwrap();
        let b = compile_material_graph(&albedo_graph()).unwrap();
        assert_eq!(a.glsl, b.glsl);
        assert_eq!(a.textures, b.textures);
    }

    #[test]
    fn sampling_the_same_texture_twice_shares_the_constant() {
        let mut graph = MaterialGraph::new();
        let uv = graph.add_builtin(Builtin::VertexUv);
        let first = graph.add_texture_sample(texture(3), uv);
        let second = graph.add_texture_sample(texture(3), uv);
        graph.set_output(OutputParameter::Color, first);
        graph.set_output(OutputParameter::Emissive, second);

        let module = compile_material_graph(&graph).unwrap();
        assert_eq!(1, module.textures.len());
    }

    #[test]
    fn graph_without_textures_declares_no_sets() {
        let mut graph = MaterialGraph::new();
        let rough = graph.add_constant(ConstantValue::Float(0.5));
        graph.set_output(OutputParameter::Roughness, rough);

        let module = compile_material_graph(&graph).unwrap();
        assert!(module.required_descriptor_sets.is_empty());
        assert!(!module.glsl.contains("layout(set"));
    }
}
