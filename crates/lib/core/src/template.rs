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

use std::{collections::HashMap, ffi::CString, sync::Arc};

use ash::vk;
use torch_backend::{AsVulkan, BackendError, Device};

use crate::{
    Error, PipelineLayout, RenderPassCompatInfo, Result, ShaderCompiler, ShaderKind,
};

/// Append-only storage for specialization constant values. The data span
/// stays valid as long as the storage lives, which is what the
/// `vk::SpecializationInfo` built from it relies on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecializationConstantStorage {
    entries: Vec<SpecializationEntry>,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecializationEntry {
    pub constant_id: u32,
    pub offset: u32,
    pub size: u32,
}

impl SpecializationConstantStorage {
    pub fn set<T: Sized + Copy>(&mut self, constant_id: u32, value: T) {
        let offset = self.data.len() as u32;
        let size = std::mem::size_of::<T>() as u32;
        self.data
            .extend_from_slice(unsafe { torch_common::any_as_u8_slice(&value) });
        self.entries.push(SpecializationEntry {
            constant_id,
            offset,
            size,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SpecializationEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The value of a constant, if it was set and `T` matches its size.
    pub fn get<T: Sized + Copy>(&self, constant_id: u32) -> Option<T> {
        let entry = self
            .entries
            .iter()
            .rev()
            .find(|entry| entry.constant_id == constant_id)?;
        if entry.size as usize != std::mem::size_of::<T>() {
            return None;
        }
        let offset = entry.offset as usize;
        let bytes = &self.data[offset..offset + entry.size as usize];
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                value.as_mut_ptr() as *mut u8,
                entry.size as usize,
            );
            Some(value.assume_init())
        }
    }

    pub fn map_entries(&self) -> Vec<vk::SpecializationMapEntry> {
        self.entries
            .iter()
            .map(|entry| vk::SpecializationMapEntry {
                constant_id: entry.constant_id,
                offset: entry.offset,
                size: entry.size as usize,
            })
            .collect()
    }
}

/// Shader stage payload: either source that still needs the SPIR-V
/// compiler, or the final binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderCode {
    Glsl(String),
    Spirv(Vec<u32>),
}

impl Default for ShaderCode {
    fn default() -> Self {
        Self::Glsl(String::new())
    }
}

impl ShaderCode {
    fn to_spirv(
        &self,
        compiler: Option<&Arc<dyn ShaderCompiler>>,
        stage: vk::ShaderStageFlags,
    ) -> Result<Vec<u32>> {
        match self {
            Self::Spirv(words) => Ok(words.clone()),
            Self::Glsl(source) => {
                let compiler = compiler.ok_or(Error::NoShaderCompiler)?;
                let kind = ShaderKind::from_stage(stage).ok_or_else(|| Error::ShaderCompile {
                    name: format!("{:?}", stage),
                    message: "unsupported shader stage".into(),
                })?;
                compiler.compile(source, kind, &format!("{:?}", stage))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderStageData {
    pub code: ShaderCode,
    pub spec_constants: SpecializationConstantStorage,
}

/// The program half of a pipeline template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgramDefinitionData {
    pub stages: HashMap<vk::ShaderStageFlags, ShaderStageData>,
}

impl ProgramDefinitionData {
    pub fn stage(mut self, stage: vk::ShaderStageFlags, code: ShaderCode) -> Self {
        self.stages.insert(
            stage,
            ShaderStageData {
                code,
                spec_constants: SpecializationConstantStorage::default(),
            },
        );
        self
    }

    fn sorted_stages(&self) -> Vec<vk::ShaderStageFlags> {
        let mut keys = self.stages.keys().copied().collect::<Vec<_>>();
        keys.sort_unstable_by_key(|key| key.as_raw());
        keys
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInputAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAssemblyDesc {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
}

impl Default for InputAssemblyDesc {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TessellationDesc {
    pub patch_control_points: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportDesc {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorDesc {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationDesc {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
    pub depth_bias: bool,
}

impl Default for RasterizationDesc {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_clamp: false,
            rasterizer_discard: false,
            depth_bias: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleDesc {
    pub samples: vk::SampleCountFlags,
    pub sample_shading: bool,
    pub min_sample_shading: f32,
}

impl Default for MultisampleDesc {
    fn default() -> Self {
        Self {
            samples: vk::SampleCountFlags::TYPE_1,
            sample_shading: false,
            min_sample_shading: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            stencil_test: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendDesc {
    pub src: vk::BlendFactor,
    pub dst: vk::BlendFactor,
    pub op: vk::BlendOp,
}

impl BlendDesc {
    pub fn new(src: vk::BlendFactor, dst: vk::BlendFactor, op: vk::BlendOp) -> Self {
        Self { src, dst, op }
    }
}

/// One color attachment's blend configuration. `blend` carries the color
/// and alpha halves; None renders opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendAttachmentDesc {
    pub blend: Option<(BlendDesc, BlendDesc)>,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachmentDesc {
    fn default() -> Self {
        Self {
            blend: None,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachmentDesc {
    fn build(&self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(self.write_mask);
        if let Some((color, alpha)) = self.blend {
            builder
                .blend_enable(true)
                .src_color_blend_factor(color.src)
                .dst_color_blend_factor(color.dst)
                .color_blend_op(color.op)
                .src_alpha_blend_factor(alpha.src)
                .dst_alpha_blend_factor(alpha.dst)
                .alpha_blend_op(alpha.op)
                .build()
        } else {
            builder.blend_enable(false).build()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorBlendStateDesc {
    pub logic_op: Option<vk::LogicOp>,
    pub blend_constants: [f32; 4],
}

/// The fixed-function half of a pipeline template. Plain data, free to
/// copy and compare; Vulkan structs are only assembled at build time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineDefinitionData {
    pub input_bindings: Vec<VertexInputBindingDesc>,
    pub attributes: Vec<VertexInputAttributeDesc>,
    pub input_assembly: InputAssemblyDesc,
    pub tessellation: TessellationDesc,
    pub viewports: Vec<ViewportDesc>,
    pub scissors: Vec<ScissorDesc>,
    pub rasterization: RasterizationDesc,
    pub multisample: MultisampleDesc,
    pub depth_stencil: DepthStencilDesc,
    pub color_blend_attachments: Vec<ColorBlendAttachmentDesc>,
    pub color_blend: ColorBlendStateDesc,
    pub dynamic_states: Vec<vk::DynamicState>,
}

/// The dynamic states a pipeline built from `data` will carry: viewport
/// and scissor become dynamic whenever the template specifies none.
pub fn effective_dynamic_states(data: &PipelineDefinitionData) -> Vec<vk::DynamicState> {
    let mut states = data.dynamic_states.clone();
    if data.viewports.is_empty() && !states.contains(&vk::DynamicState::VIEWPORT) {
        states.push(vk::DynamicState::VIEWPORT);
    }
    if data.scissors.is_empty() && !states.contains(&vk::DynamicState::SCISSOR) {
        states.push(vk::DynamicState::SCISSOR);
    }
    states
}

/// Device-agnostic description of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineTemplate {
    program: ProgramDefinitionData,
    data: PipelineDefinitionData,
}

impl PipelineTemplate {
    pub fn new(program: ProgramDefinitionData, data: PipelineDefinitionData) -> Self {
        Self { program, data }
    }

    pub fn program(&self) -> &ProgramDefinitionData {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ProgramDefinitionData {
        &mut self.program
    }

    pub fn data(&self) -> &PipelineDefinitionData {
        &self.data
    }
}

/// Device-agnostic description of a compute pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComputePipelineTemplate {
    shader: ShaderCode,
    spec_constants: SpecializationConstantStorage,
    entry_point: String,
}

impl ComputePipelineTemplate {
    pub fn new(shader: ShaderCode) -> Self {
        Self {
            shader,
            spec_constants: SpecializationConstantStorage::default(),
            entry_point: "main".into(),
        }
    }

    pub fn set_program_code(&mut self, code: ShaderCode) {
        self.shader = code;
    }

    pub fn set_specialization_constant<T: Sized + Copy>(&mut self, constant_id: u32, value: T) {
        self.spec_constants.set(constant_id, value);
    }

    pub fn shader(&self) -> &ShaderCode {
        &self.shader
    }

    pub fn specialization_constants(&self) -> &SpecializationConstantStorage {
        &self.spec_constants
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// A concrete pipeline living in one render configuration.
pub struct Pipeline {
    device: Arc<Device>,
    raw: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .get()
                .cmd_bind_pipeline(cmd, self.bind_point, self.raw)
        };
    }
}

impl AsVulkan<vk::Pipeline> for Pipeline {
    fn as_vk(&self) -> vk::Pipeline {
        self.raw
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.get().destroy_pipeline(self.raw, None) };
    }
}

/// Build a graphics pipeline from a template against a live device and
/// concrete render pass compatibility info.
pub fn make_graphics_pipeline(
    device: &Arc<Device>,
    template: &PipelineTemplate,
    layout: &PipelineLayout,
    compat: &RenderPassCompatInfo,
    compiler: Option<&Arc<dyn ShaderCompiler>>,
) -> Result<Pipeline> {
    let program = template.program();
    let data = template.data();
    let entry = CString::new("main").expect("static string");

    let stage_keys = program.sorted_stages();
    let mut modules = Vec::with_capacity(stage_keys.len());
    let mut map_entry_store: Vec<Vec<vk::SpecializationMapEntry>> =
        Vec::with_capacity(stage_keys.len());
    let mut spec_infos: Vec<vk::SpecializationInfo> = Vec::with_capacity(stage_keys.len());
    let mut stage_infos = Vec::with_capacity(stage_keys.len());

    let build_result = (|| -> Result<vk::Pipeline> {
        for key in &stage_keys {
            let stage = &program.stages[key];
            let words = stage.code.to_spirv(compiler, *key)?;
            let module = device.create_shader_module(&words)?;
            modules.push(module);

            let mut builder = vk::PipelineShaderStageCreateInfo::builder()
                .stage(*key)
                .module(module)
                .name(&entry);
            if !stage.spec_constants.is_empty() {
                map_entry_store.push(stage.spec_constants.map_entries());
                spec_infos.push(
                    vk::SpecializationInfo::builder()
                        .map_entries(map_entry_store.last().unwrap())
                        .data(stage.spec_constants.data())
                        .build(),
                );
                builder = builder.specialization_info(spec_infos.last().unwrap());
            }
            stage_infos.push(builder.build());
        }

        let bindings = data
            .input_bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: binding.input_rate,
            })
            .collect::<Vec<_>>();
        let attributes = data
            .attributes
            .iter()
            .map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: attr.binding,
                format: attr.format,
                offset: attr.offset,
            })
            .collect::<Vec<_>>();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(data.input_assembly.topology)
            .primitive_restart_enable(data.input_assembly.primitive_restart)
            .build();
        let tessellation = vk::PipelineTessellationStateCreateInfo::builder()
            .patch_control_points(data.tessellation.patch_control_points)
            .build();

        let viewports = if data.viewports.is_empty() {
            vec![vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }]
        } else {
            data.viewports
                .iter()
                .map(|v| vk::Viewport {
                    x: v.x,
                    y: v.y,
                    width: v.width,
                    height: v.height,
                    min_depth: v.min_depth,
                    max_depth: v.max_depth,
                })
                .collect()
        };
        let scissors = if data.scissors.is_empty() {
            vec![vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
            }]
        } else {
            data.scissors
                .iter()
                .map(|s| vk::Rect2D {
                    offset: vk::Offset2D { x: s.x, y: s.y },
                    extent: vk::Extent2D {
                        width: s.width,
                        height: s.height,
                    },
                })
                .collect()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors)
            .build();

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(data.rasterization.polygon_mode)
            .cull_mode(data.rasterization.cull_mode)
            .front_face(data.rasterization.front_face)
            .line_width(data.rasterization.line_width)
            .depth_clamp_enable(data.rasterization.depth_clamp)
            .rasterizer_discard_enable(data.rasterization.rasterizer_discard)
            .depth_bias_enable(data.rasterization.depth_bias)
            .build();
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(data.multisample.samples)
            .sample_shading_enable(data.multisample.sample_shading)
            .min_sample_shading(data.multisample.min_sample_shading)
            .build();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(data.depth_stencil.depth_test)
            .depth_write_enable(data.depth_stencil.depth_write)
            .depth_compare_op(data.depth_stencil.depth_compare)
            .stencil_test_enable(data.depth_stencil.stencil_test)
            .build();

        let blend_attachments = data
            .color_blend_attachments
            .iter()
            .map(ColorBlendAttachmentDesc::build)
            .collect::<Vec<_>>();
        let mut color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .blend_constants(data.color_blend.blend_constants);
        if let Some(logic_op) = data.color_blend.logic_op {
            color_blend = color_blend.logic_op_enable(true).logic_op(logic_op);
        }
        let color_blend = color_blend.build();

        let dynamic_states = effective_dynamic_states(data);
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let mut create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .tessellation_state(&tessellation)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.as_vk());

        let mut rendering_info;
        match compat {
            RenderPassCompatInfo::RenderPass(info) => {
                create_info = create_info.render_pass(info.pass).subpass(info.subpass);
            }
            RenderPassCompatInfo::DynamicRendering(info) => {
                rendering_info = vk::PipelineRenderingCreateInfo::builder()
                    .view_mask(info.view_mask)
                    .color_attachment_formats(&info.color_formats)
                    .depth_attachment_format(info.depth_format)
                    .stencil_attachment_format(info.stencil_format)
                    .build();
                create_info = create_info.push_next(&mut rendering_info);
            }
        }
        let create_info = create_info.build();

        let pipeline = unsafe {
            device.get().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, err)| Error::Backend(BackendError::Vulkan(err)))?[0];

        Ok(pipeline)
    })();

    for module in modules {
        device.destroy_shader_module(module);
    }

    Ok(Pipeline {
        device: device.clone(),
        raw: build_result?,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
    })
}

/// Build a compute pipeline from a template.
pub fn make_compute_pipeline(
    device: &Arc<Device>,
    template: &ComputePipelineTemplate,
    layout: &PipelineLayout,
    compiler: Option<&Arc<dyn ShaderCompiler>>,
) -> Result<Pipeline> {
    let words = template
        .shader()
        .to_spirv(compiler, vk::ShaderStageFlags::COMPUTE)?;
    let module = device.create_shader_module(&words)?;
    let entry = CString::new(template.entry_point()).expect("entry point contains a NUL byte");

    let map_entries = template.specialization_constants().map_entries();
    let spec_info = vk::SpecializationInfo::builder()
        .map_entries(&map_entries)
        .data(template.specialization_constants().data())
        .build();
    let mut stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(&entry);
    if !template.specialization_constants().is_empty() {
        stage = stage.specialization_info(&spec_info);
    }
    let create_info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage.build())
        .layout(layout.as_vk())
        .build();

    let result = unsafe {
        device.get().create_compute_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&create_info),
            None,
        )
    }
    .map_err(|(_, err)| Error::Backend(BackendError::Vulkan(err)));
    device.destroy_shader_module(module);

    Ok(Pipeline {
        device: device.clone(),
        raw: result?[0],
        bind_point: vk::PipelineBindPoint::COMPUTE,
    })
}

#[cfg(test)]
mod test {
    use ash::vk;

    use super::{
        effective_dynamic_states, PipelineDefinitionData, PipelineTemplate,
        ProgramDefinitionData, ScissorDesc, ShaderCode, SpecializationConstantStorage,
        ViewportDesc,
    };

    #[test]
    fn spec_constants_are_appended_with_growing_offsets() {
        let mut storage = SpecializationConstantStorage::default();
        storage.set(0, 17u32);
        storage.set(3, 2.5f32);
        storage.set(7, 1u8);

        let entries = storage.entries();
        assert_eq!(3, entries.len());
        assert_eq!((0, 0, 4), (entries[0].constant_id, entries[0].offset, entries[0].size));
        assert_eq!((3, 4, 4), (entries[1].constant_id, entries[1].offset, entries[1].size));
        assert_eq!((7, 8, 1), (entries[2].constant_id, entries[2].offset, entries[2].size));
        assert_eq!(9, storage.data().len());

        assert_eq!(Some(17u32), storage.get::<u32>(0));
        assert_eq!(Some(2.5f32), storage.get::<f32>(3));
        assert_eq!(None, storage.get::<u64>(0));
        assert_eq!(None, storage.get::<u32>(99));
    }

    #[test]
    fn empty_viewport_and_scissor_become_dynamic_states() {
        let data = PipelineDefinitionData::default();
        let states = effective_dynamic_states(&data);
        assert!(states.contains(&vk::DynamicState::VIEWPORT));
        assert!(states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn explicit_viewport_and_scissor_stay_static() {
        let data = PipelineDefinitionData {
            viewports: vec![ViewportDesc {
                x: 0.0,
                y: 0.0,
                width: 800.0,
                height: 600.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
            scissors: vec![ScissorDesc {
                x: 0,
                y: 0,
                width: 800,
                height: 600,
            }],
            ..Default::default()
        };
        assert!(effective_dynamic_states(&data).is_empty());
    }

    #[test]
    fn dynamic_states_are_not_duplicated() {
        let data = PipelineDefinitionData {
            dynamic_states: vec![vk::DynamicState::VIEWPORT],
            ..Default::default()
        };
        let states = effective_dynamic_states(&data);
        assert_eq!(
            1,
            states
                .iter()
                .filter(|s| **s == vk::DynamicState::VIEWPORT)
                .count()
        );
        assert!(states.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn templates_compare_by_value() {
        let program = ProgramDefinitionData::default().stage(
            vk::ShaderStageFlags::VERTEX,
            ShaderCode::Glsl("void main() {}".into()),
        );
        let a = PipelineTemplate::new(program.clone(), PipelineDefinitionData::default());
        let b = PipelineTemplate::new(program, PipelineDefinitionData::default());
        assert_eq!(a, b);
    }
}
