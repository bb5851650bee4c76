// Copyright (C) 2023 gigablaster

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

use std::sync::Arc;

use ash::vk;
use torch_backend::{AsVulkan, BackendError, Device};

use crate::{DescriptorId, DescriptorName, DescriptorRegistry, Error, Result};

/// One descriptor referenced by a pipeline layout. Static descriptors are
/// bound by the layout itself at command recording; dynamic ones by
/// whoever records the draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: DescriptorName,
    pub is_static: bool,
}

/// A push constant range with an optional default value uploaded on bind.
#[derive(Debug, Clone)]
pub struct PushConstant {
    pub range: vk::PushConstantRange,
    pub default: Option<Vec<u8>>,
}

impl PartialEq for PushConstant {
    fn eq(&self, other: &Self) -> bool {
        self.range.stage_flags == other.range.stage_flags
            && self.range.offset == other.range.offset
            && self.range.size == other.range.size
            && self.default == other.default
    }
}

impl Eq for PushConstant {}

/// Value description of a pipeline layout. Descriptors are referenced by
/// name; resolution happens when a concrete layout is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineLayoutTemplate {
    descriptors: Vec<Descriptor>,
    push_constants: Vec<PushConstant>,
}

impl PipelineLayoutTemplate {
    pub fn new(descriptors: Vec<Descriptor>, push_constants: Vec<PushConstant>) -> Self {
        Self {
            descriptors,
            push_constants,
        }
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn push_constants(&self) -> &[PushConstant] {
        &self.push_constants
    }
}

/// A concrete pipeline layout for one device, with the static descriptor
/// bindings and default push constant values recorded at build time.
pub struct PipelineLayout {
    device: Arc<Device>,
    raw: vk::PipelineLayout,
    static_descriptors: Vec<(u32, DescriptorId)>,
    push_constant_defaults: Vec<(vk::PushConstantRange, Vec<u8>)>,
}

impl AsVulkan<vk::PipelineLayout> for PipelineLayout {
    fn as_vk(&self) -> vk::PipelineLayout {
        self.raw
    }
}

impl PipelineLayout {
    /// Build from a template. Every referenced descriptor name must be
    /// defined at `registry`.
    pub fn from_template(
        device: &Arc<Device>,
        template: &PipelineLayoutTemplate,
        registry: &DescriptorRegistry,
    ) -> Result<Self> {
        let mut set_layouts = Vec::with_capacity(template.descriptors().len());
        let mut static_descriptors = Vec::new();
        for (set_index, descriptor) in template.descriptors().iter().enumerate() {
            set_layouts.push(registry.descriptor_layout(&descriptor.name)?);
            if descriptor.is_static {
                static_descriptors
                    .push((set_index as u32, registry.descriptor_id(&descriptor.name)?));
            }
        }

        let ranges = template
            .push_constants()
            .iter()
            .map(|pc| pc.range)
            .collect::<Vec<_>>();
        let push_constant_defaults = template
            .push_constants()
            .iter()
            .filter_map(|pc| pc.default.as_ref().map(|bytes| (pc.range, bytes.clone())))
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges)
            .build();
        let raw = unsafe { device.get().create_pipeline_layout(&create_info, None) }
            .map_err(BackendError::from)?;

        Ok(Self {
            device: device.clone(),
            raw,
            static_descriptors,
            push_constant_defaults,
        })
    }

    /// Build from already-resolved descriptor set layouts, for pipelines
    /// that are not shared through the registry.
    pub fn from_set_layouts(
        device: &Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[PushConstant],
    ) -> Result<Self> {
        let ranges = push_constants.iter().map(|pc| pc.range).collect::<Vec<_>>();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&ranges)
            .build();
        let raw = unsafe { device.get().create_pipeline_layout(&create_info, None) }
            .map_err(BackendError::from)?;

        Ok(Self {
            device: device.clone(),
            raw,
            static_descriptors: Vec::new(),
            push_constant_defaults: push_constants
                .iter()
                .filter_map(|pc| pc.default.as_ref().map(|bytes| (pc.range, bytes.clone())))
                .collect(),
        })
    }

    /// Replay the recorded default push constant values, in declaration
    /// order.
    pub fn bind_default_push_constant_values(&self, cmd: vk::CommandBuffer) {
        for (range, bytes) in &self.push_constant_defaults {
            unsafe {
                self.device.get().cmd_push_constants(
                    cmd,
                    self.raw,
                    range.stage_flags,
                    range.offset,
                    bytes,
                )
            };
        }
    }

    /// Bind every static descriptor through its registered provider.
    pub fn bind_static_descriptors(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        registry: &DescriptorRegistry,
    ) -> Result<()> {
        for (set_index, id) in &self.static_descriptors {
            let provider = registry.provider(*id)?;
            provider.bind(&self.device, cmd, bind_point, self.raw, *set_index);
        }

        Ok(())
    }

    pub fn static_descriptors(&self) -> &[(u32, DescriptorId)] {
        &self.static_descriptors
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.get().destroy_pipeline_layout(self.raw, None) };
    }
}

enum LayoutEntry {
    Named(Descriptor),
    Resolved(vk::DescriptorSetLayout),
}

/// Mutable draft of a pipeline layout. Accepts named descriptors (which
/// end up in a reusable template) as well as already-resolved set
/// layouts for one-off pipelines.
#[derive(Default)]
pub struct PipelineLayoutBuilder {
    descriptors: Vec<LayoutEntry>,
    push_constants: Vec<PushConstant>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_descriptor(mut self, name: impl Into<DescriptorName>, is_static: bool) -> Self {
        self.descriptors.push(LayoutEntry::Named(Descriptor {
            name: name.into(),
            is_static,
        }));
        self
    }

    pub fn add_resolved_descriptor(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.descriptors.push(LayoutEntry::Resolved(layout));
        self
    }

    pub fn add_push_constant(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constants.push(PushConstant {
            range,
            default: None,
        });
        self
    }

    pub fn add_push_constant_with_default<T: Sized + Copy>(
        mut self,
        range: vk::PushConstantRange,
        value: T,
    ) -> Self {
        assert_eq!(std::mem::size_of::<T>() as u32, range.size);
        self.push_constants.push(PushConstant {
            range,
            default: Some(unsafe { torch_common::any_as_u8_slice(&value) }.to_vec()),
        });
        self
    }

    /// The reusable template of this draft. Fails if the draft carries
    /// pre-resolved set layouts, which cannot be named in a template.
    pub fn template(&self) -> Result<PipelineLayoutTemplate> {
        let mut descriptors = Vec::with_capacity(self.descriptors.len());
        for entry in &self.descriptors {
            match entry {
                LayoutEntry::Named(descriptor) => descriptors.push(descriptor.clone()),
                LayoutEntry::Resolved(_) => return Err(Error::InlineLayoutInTemplate),
            }
        }

        Ok(PipelineLayoutTemplate::new(
            descriptors,
            self.push_constants.clone(),
        ))
    }

    /// Build a concrete layout, resolving named descriptors through the
    /// registry and taking pre-resolved layouts as they are.
    pub fn build(
        &self,
        device: &Arc<Device>,
        registry: &DescriptorRegistry,
    ) -> Result<PipelineLayout> {
        let mut set_layouts = Vec::with_capacity(self.descriptors.len());
        for entry in &self.descriptors {
            match entry {
                LayoutEntry::Named(descriptor) => {
                    set_layouts.push(registry.descriptor_layout(&descriptor.name)?);
                }
                LayoutEntry::Resolved(layout) => set_layouts.push(*layout),
            }
        }

        PipelineLayout::from_set_layouts(device, &set_layouts, &self.push_constants)
    }

    /// Shorthand for template-then-register.
    pub fn register(&self, registry: &crate::PipelineRegistry) -> Result<crate::PipelineLayoutId> {
        Ok(registry.register_pipeline_layout(self.template()?))
    }
}

#[cfg(test)]
mod test {
    use ash::vk;

    use super::{Descriptor, PipelineLayoutBuilder, PipelineLayoutTemplate, PushConstant};
    use crate::{DescriptorName, Error};

    #[test]
    fn builder_produces_a_template_of_its_descriptors() {
        let builder = PipelineLayoutBuilder::new()
            .add_descriptor("camera", true)
            .add_descriptor("assets", false)
            .add_push_constant_with_default(
                vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::VERTEX,
                    offset: 0,
                    size: 16,
                },
                [1.0f32, 0.0, 0.0, 1.0],
            );

        let template = builder.template().unwrap();
        assert_eq!(
            &[
                Descriptor {
                    name: DescriptorName::new("camera"),
                    is_static: true
                },
                Descriptor {
                    name: DescriptorName::new("assets"),
                    is_static: false
                },
            ],
            template.descriptors()
        );
        assert_eq!(1, template.push_constants().len());
        let pc: &PushConstant = &template.push_constants()[0];
        assert_eq!(16, pc.range.size);
        assert_eq!(Some(16), pc.default.as_ref().map(Vec::len));
    }

    #[test]
    fn resolved_layouts_cannot_become_a_template() {
        let builder = PipelineLayoutBuilder::new()
            .add_descriptor("camera", true)
            .add_resolved_descriptor(vk::DescriptorSetLayout::null());
        assert!(matches!(
            builder.template(),
            Err(Error::InlineLayoutInTemplate)
        ));
    }

    #[test]
    fn templates_compare_by_value() {
        let a = PipelineLayoutTemplate::new(
            vec![Descriptor {
                name: DescriptorName::new("camera"),
                is_static: true,
            }],
            vec![],
        );
        let b = PipelineLayoutTemplate::new(
            vec![Descriptor {
                name: DescriptorName::new("camera"),
                is_static: true,
            }],
            vec![],
        );
        assert_eq!(a, b);
    }
}
