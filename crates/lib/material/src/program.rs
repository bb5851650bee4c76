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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ash::vk;
use smol_str::SmolStr;
use torch_assets::{AssetManager, TextureHandle};
use torch_core::{
    Descriptor, DescriptorName, PipelineId, PipelineLayoutTemplate, PipelineRegistry,
    ProgramDefinitionData, PipelineTemplate, PushConstant, ShaderCode, ShaderCompiler,
    ShaderKind, ShaderStageData, SpecializationConstantStorage,
};

use crate::{Error, Result, ShaderModule, TextureReference};

/// Per-descriptor-set knowledge the material system needs when it builds
/// a pipeline layout: whether the set is static and where it prefers to
/// sit in the layout.
#[derive(Debug, Clone, Default)]
pub struct ShaderDescriptorConfig {
    pub sets: BTreeMap<SmolStr, DescriptorSetInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetInfo {
    pub is_static: bool,
    pub preferred_index: u32,
}

impl ShaderDescriptorConfig {
    pub fn set(mut self, name: &str, is_static: bool, preferred_index: u32) -> Self {
        self.sets.insert(
            SmolStr::new(name),
            DescriptorSetInfo {
                is_static,
                preferred_index,
            },
        );
        self
    }
}

/// A compiled material: shader stages, the pipeline layout they imply,
/// and the specialization-bound textures. Building the pipeline resolves
/// every texture reference to its device index once; changing a texture
/// afterwards requires a new program.
pub struct MaterialShaderProgram {
    stages: HashMap<vk::ShaderStageFlags, ShaderModule>,
    layout: PipelineLayoutTemplate,
    specialization_textures: Vec<(u32, TextureReference)>,
    loaded_textures: Vec<TextureHandle>,
    pipeline: Option<PipelineId>,
}

impl MaterialShaderProgram {
    /// Merge the stages' resource interfaces into a pipeline layout
    /// template. Descriptor sets are united across stages and ordered by
    /// the config's preferred index; push constants are only accepted on
    /// the vertex stage.
    pub fn new(
        stages: HashMap<vk::ShaderStageFlags, ShaderModule>,
        config: &ShaderDescriptorConfig,
    ) -> Result<Self> {
        let mut set_names = Vec::<SmolStr>::new();
        let mut push_constants = Vec::new();
        let mut specialization_textures = Vec::new();

        let mut sorted_stages = stages.iter().collect::<Vec<_>>();
        sorted_stages.sort_by_key(|(stage, _)| stage.as_raw());
        for (stage, module) in sorted_stages {
            for name in &module.required_descriptor_sets {
                if !set_names.contains(name) {
                    set_names.push(name.clone());
                }
            }
            if module.push_constant_size > 0 {
                if *stage != vk::ShaderStageFlags::VERTEX {
                    return Err(Error::UnsupportedPushConstantStage(format!("{:?}", stage)));
                }
                push_constants.push(PushConstant {
                    range: vk::PushConstantRange {
                        stage_flags: *stage,
                        offset: 0,
                        size: module.push_constant_size,
                    },
                    default: None,
                });
            }
            for entry in &module.textures {
                specialization_textures.push(*entry);
            }
        }

        set_names.sort_by_key(|name| {
            config
                .sets
                .get(name)
                .map(|info| info.preferred_index)
                .unwrap_or(u32::MAX)
        });
        let descriptors = set_names
            .into_iter()
            .map(|name| {
                let is_static = config
                    .sets
                    .get(&name)
                    .map(|info| info.is_static)
                    .unwrap_or(true);
                Descriptor {
                    name: DescriptorName::new(name.as_str()),
                    is_static,
                }
            })
            .collect();

        Ok(Self {
            stages,
            layout: PipelineLayoutTemplate::new(descriptors, push_constants),
            specialization_textures,
            loaded_textures: Vec::new(),
            pipeline: None,
        })
    }

    pub fn layout(&self) -> &PipelineLayoutTemplate {
        &self.layout
    }

    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    /// The stages' GLSL with all descriptor-set placeholders replaced by
    /// the final set indices of this program's layout.
    fn finalized_glsl(&self, module: &ShaderModule) -> String {
        let mut glsl = module.glsl.clone();
        for (index, descriptor) in self.layout.descriptors().iter().enumerate() {
            if let Some(token) = module.descriptor_index_placeholder(descriptor.name.as_str()) {
                glsl = glsl.replace(token, &index.to_string());
            }
        }
        glsl
    }

    /// Register this program as a pipeline, deriving the fixed-function
    /// state and render pass from `base_pipeline`. Texture references
    /// resolve through the asset manager; the resulting device indices
    /// are baked into the fragment stage's specialization constants.
    pub fn register_pipeline(
        &mut self,
        manager: &AssetManager,
        registry: &PipelineRegistry,
        base_pipeline: PipelineId,
        compiler: &Arc<dyn ShaderCompiler>,
    ) -> Result<PipelineId> {
        let mut handles = Vec::with_capacity(self.specialization_textures.len());
        let mut indices = Vec::with_capacity(self.specialization_textures.len());
        for (spec_id, reference) in &self.specialization_textures {
            let handle = manager.get_handle(reference.texture)?;
            indices.push((*spec_id, handle.device_index()));
            handles.push(handle);
        }
        // The handles keep the textures' cache cells alive for as long as
        // the program exists.
        self.loaded_textures = handles;
        self.register_pipeline_resolved(registry, base_pipeline, compiler, &indices)
    }

    /// Like [`MaterialShaderProgram::register_pipeline`] but with texture
    /// device indices already resolved by the caller.
    pub fn register_pipeline_resolved(
        &mut self,
        registry: &PipelineRegistry,
        base_pipeline: PipelineId,
        compiler: &Arc<dyn ShaderCompiler>,
        texture_indices: &[(u32, u32)],
    ) -> Result<PipelineId> {
        if let Some(pipeline) = self.pipeline {
            return Ok(pipeline);
        }

        let mut program = ProgramDefinitionData::default();
        let mut sorted_stages = self.stages.iter().collect::<Vec<_>>();
        sorted_stages.sort_by_key(|(stage, _)| stage.as_raw());
        for (stage, module) in sorted_stages {
            let glsl = self.finalized_glsl(module);
            let kind = ShaderKind::from_stage(*stage).ok_or_else(|| {
                torch_core::Error::ShaderCompile {
                    name: format!("{:?}", stage),
                    message: "unsupported shader stage".into(),
                }
            })?;
            let words = compiler.compile(&glsl, kind, &format!("material{:?}", stage))?;

            let mut spec_constants = SpecializationConstantStorage::default();
            if *stage == vk::ShaderStageFlags::FRAGMENT {
                for (spec_id, device_index) in texture_indices {
                    spec_constants.set(*spec_id, *device_index);
                }
            }
            program.stages.insert(
                *stage,
                ShaderStageData {
                    code: ShaderCode::Spirv(words),
                    spec_constants,
                },
            );
        }

        let base = registry.clone_graphics_pipeline(base_pipeline)?;
        let render_pass = registry
            .pipeline_render_pass(base_pipeline)?
            .expect("a graphics pipeline always names its render pass");
        let layout_id = registry.register_pipeline_layout(self.layout.clone());
        let pipeline = registry.register_pipeline(
            PipelineTemplate::new(program, base.data().clone()),
            layout_id,
            render_pass,
        );
        log::debug!(
            "Registered material pipeline {} with layout {}",
            pipeline,
            layout_id
        );
        self.pipeline = Some(pipeline);

        Ok(pipeline)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use ash::vk;
    use torch_assets::{AssetId, LocalId, TypedAssetId};
    use torch_core::{
        DescriptorName, PipelineDefinitionData, PipelineRegistry, PipelineTemplate,
        ProgramDefinitionData, Result as CoreResult, ShaderCode, ShaderCompiler, ShaderKind,
    };

    use super::{MaterialShaderProgram, ShaderDescriptorConfig};
    use crate::{
        compile_material_graph, Builtin, MaterialGraph, OutputParameter, ShaderModule,
        TextureReference, ASSET_DESCRIPTOR_SET,
    };

    struct StubCompiler;

    impl ShaderCompiler for StubCompiler {
        fn compile(&self, source: &str, _kind: ShaderKind, _name: &str) -> CoreResult<Vec<u32>> {
            let mut words = vec![0x0723_0203u32];
            words.extend(source.bytes().map(u32::from));
            Ok(words)
        }
    }

    fn texture(index: u32) -> TextureReference {
        TextureReference {
            texture: TypedAssetId::new(AssetId::new(index, 0), LocalId::new(index)),
        }
    }

    fn config() -> ShaderDescriptorConfig {
        ShaderDescriptorConfig::default()
            .set("camera", true, 0)
            .set(ASSET_DESCRIPTOR_SET, true, 1)
    }

    fn fragment_module() -> ShaderModule {
        let mut graph = MaterialGraph::new();
        let uv = graph.add_builtin(Builtin::VertexUv);
        let sample = graph.add_texture_sample(texture(0), uv);
        graph.set_output(OutputParameter::Color, sample);
        compile_material_graph(&graph).unwrap()
    }

    fn vertex_module() -> ShaderModule {
        ShaderModule::from_glsl(
            vk::ShaderStageFlags::VERTEX,
            "#version 460\nlayout(set = $SET_camera, binding = 0) uniform Camera { mat4 vp; };\nvoid main() {}\n",
        )
        .require_descriptor_set("camera", "$SET_camera")
        .with_push_constants(16)
    }

    fn base_pipeline(registry: &PipelineRegistry) -> torch_core::PipelineId {
        let layout = registry.register_pipeline_layout(Default::default());
        registry.register_pipeline(
            PipelineTemplate::new(
                ProgramDefinitionData::default().stage(
                    vk::ShaderStageFlags::VERTEX,
                    ShaderCode::Glsl("void main() {}".into()),
                ),
                PipelineDefinitionData::default(),
            ),
            layout,
            "main",
        )
    }

    fn make_program() -> MaterialShaderProgram {
        let mut stages = HashMap::new();
        let fragment = fragment_module();
        stages.insert(fragment.stage, fragment);
        let vertex = vertex_module();
        stages.insert(vertex.stage, vertex);
        MaterialShaderProgram::new(stages, &config()).unwrap()
    }

    #[test]
    fn layout_unites_stages_in_preferred_order() {
        let program = make_program();
        let descriptors = program.layout().descriptors();
        assert_eq!(2, descriptors.len());
        assert_eq!(DescriptorName::new("camera"), descriptors[0].name);
        assert_eq!(
            DescriptorName::new(ASSET_DESCRIPTOR_SET),
            descriptors[1].name
        );

        let push_constants = program.layout().push_constants();
        assert_eq!(1, push_constants.len());
        assert_eq!(16, push_constants[0].range.size);
        assert_eq!(
            vk::ShaderStageFlags::VERTEX,
            push_constants[0].range.stage_flags
        );
    }

    #[test]
    fn registering_bakes_texture_indices_into_spec_constants() {
        let registry = PipelineRegistry::new();
        let base = base_pipeline(&registry);
        let compiler: Arc<dyn ShaderCompiler> = Arc::new(StubCompiler);

        let mut program = make_program();
        let id = program
            .register_pipeline_resolved(&registry, base, &compiler, &[(0, 7)])
            .unwrap();

        let template = registry.clone_graphics_pipeline(id).unwrap();
        let fragment = &template.program().stages[&vk::ShaderStageFlags::FRAGMENT];
        assert_eq!(Some(7u32), fragment.spec_constants.get::<u32>(0));

        // The generated code addresses the texture through the baked
        // constant, not through a per-material descriptor.
        let ShaderCode::Spirv(words) = &fragment.code else {
            panic!("fragment stage was not compiled");
        };
        let source = words[1..]
            .iter()
            .map(|w| char::from(*w as u8))
            .collect::<String>();
        assert!(source.contains("asset_textures[mat_tex_0]"));
        assert!(source.contains("layout(set = 1, binding = "));
        assert!(!source.contains("$SET_"));

        // Same pipeline on repeated registration.
        assert_eq!(
            id,
            program
                .register_pipeline_resolved(&registry, base, &compiler, &[(0, 7)])
                .unwrap()
        );
    }

    #[test]
    fn equal_programs_produce_identical_artifacts() {
        let registry = PipelineRegistry::new();
        let base = base_pipeline(&registry);
        let compiler: Arc<dyn ShaderCompiler> = Arc::new(StubCompiler);

        let mut a = make_program();
        let mut b = make_program();
        let id_a = a
            .register_pipeline_resolved(&registry, base, &compiler, &[(0, 3)])
            .unwrap();
        let id_b = b
            .register_pipeline_resolved(&registry, base, &compiler, &[(0, 3)])
            .unwrap();
        assert_ne!(id_a, id_b);

        let ta = registry.clone_graphics_pipeline(id_a).unwrap();
        let tb = registry.clone_graphics_pipeline(id_b).unwrap();
        assert_eq!(ta.program(), tb.program());
        assert_eq!(a.layout(), b.layout());
    }

    #[test]
    fn vertex_only_push_constants_are_enforced() {
        let mut stages = HashMap::new();
        stages.insert(
            vk::ShaderStageFlags::FRAGMENT,
            ShaderModule::from_glsl(vk::ShaderStageFlags::FRAGMENT, "void main() {}")
                .with_push_constants(8),
        );
        assert!(matches!(
            MaterialShaderProgram::new(stages, &ShaderDescriptorConfig::default()),
            Err(crate::Error::UnsupportedPushConstantStage(_))
        ));
    }
}
