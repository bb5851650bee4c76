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

use std::collections::HashMap;

use ash::vk;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::{Error, Result};

pub type RenderPassName = SmolStr;

/// Compatibility information in the classic render pass form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassInfo {
    pub pass: vk::RenderPass,
    pub subpass: u32,
}

/// Compatibility information for `VK_KHR_dynamic_rendering`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DynamicRenderingInfo {
    pub view_mask: u32,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub stencil_format: vk::Format,
}

/// Everything Vulkan needs to judge render pass compatibility at
/// pipeline creation.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPassCompatInfo {
    RenderPass(RenderPassInfo),
    DynamicRendering(DynamicRenderingInfo),
}

/// Either a reference to a registered render pass or inline
/// compatibility information.
#[derive(Debug, Clone)]
pub enum RenderPassDefinition {
    Name(RenderPassName),
    Inline(RenderPassCompatInfo),
}

impl From<&str> for RenderPassDefinition {
    fn from(value: &str) -> Self {
        Self::Name(RenderPassName::new(value))
    }
}

type RenderPassGetter = Box<dyn Fn() -> RenderPassCompatInfo + Send + Sync>;

/// Name -> render-pass-compatibility dictionary. Exists solely so that
/// pipeline creation can obtain compatibility info without owning render
/// passes.
#[derive(Default)]
pub struct RenderPassRegistry {
    passes: RwLock<HashMap<RenderPassName, RenderPassGetter>>,
}

impl RenderPassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_render_pass(
        &self,
        name: impl Into<RenderPassName>,
        pass: vk::RenderPass,
        subpass: u32,
    ) -> Result<()> {
        self.add_render_pass_getter(name, move || {
            RenderPassCompatInfo::RenderPass(RenderPassInfo { pass, subpass })
        })
    }

    pub fn add_dynamic_rendering(
        &self,
        name: impl Into<RenderPassName>,
        info: DynamicRenderingInfo,
    ) -> Result<()> {
        self.add_render_pass_getter(name, move || {
            RenderPassCompatInfo::DynamicRendering(info.clone())
        })
    }

    /// Register a getter for lazy access, for passes that are created
    /// conditionally or late.
    pub fn add_render_pass_getter<F>(&self, name: impl Into<RenderPassName>, getter: F) -> Result<()>
    where
        F: Fn() -> RenderPassCompatInfo + Send + Sync + 'static,
    {
        let name = name.into();
        let mut passes = self.passes.write();
        if passes.contains_key(&name) {
            return Err(Error::DuplicateRenderPass(name.to_string()));
        }
        passes.insert(name, Box::new(getter));

        Ok(())
    }

    pub fn get(&self, name: &RenderPassName) -> Result<RenderPassCompatInfo> {
        let passes = self.passes.read();
        let getter = passes
            .get(name)
            .ok_or_else(|| Error::RenderPassUndefined(name.to_string()))?;
        Ok(getter())
    }

    /// Resolve a possibly-by-name definition to concrete compatibility
    /// information.
    pub fn resolve(&self, definition: &RenderPassDefinition) -> Result<RenderPassCompatInfo> {
        match definition {
            RenderPassDefinition::Name(name) => self.get(name),
            RenderPassDefinition::Inline(info) => Ok(info.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use ash::vk::{self, Handle};

    use super::{
        DynamicRenderingInfo, RenderPassCompatInfo, RenderPassDefinition, RenderPassInfo,
        RenderPassName, RenderPassRegistry,
    };
    use crate::Error;

    #[test]
    fn registered_pass_resolves_by_name() {
        let registry = RenderPassRegistry::new();
        let pass = vk::RenderPass::from_raw(7);
        registry.add_render_pass("main", pass, 2).unwrap();

        let info = registry.get(&RenderPassName::new("main")).unwrap();
        assert_eq!(
            RenderPassCompatInfo::RenderPass(RenderPassInfo { pass, subpass: 2 }),
            info
        );
    }

    #[test]
    fn dynamic_rendering_and_inline_definitions() {
        let registry = RenderPassRegistry::new();
        let info = DynamicRenderingInfo {
            color_formats: vec![vk::Format::R8G8B8A8_UNORM],
            ..Default::default()
        };
        registry.add_dynamic_rendering("swapchain", info.clone()).unwrap();

        assert_eq!(
            RenderPassCompatInfo::DynamicRendering(info.clone()),
            registry.resolve(&RenderPassDefinition::from("swapchain")).unwrap()
        );
        assert_eq!(
            RenderPassCompatInfo::DynamicRendering(info.clone()),
            registry
                .resolve(&RenderPassDefinition::Inline(
                    RenderPassCompatInfo::DynamicRendering(info)
                ))
                .unwrap()
        );
    }

    #[test]
    fn duplicate_and_unknown_names_are_errors() {
        let registry = RenderPassRegistry::new();
        registry
            .add_render_pass("main", vk::RenderPass::null(), 0)
            .unwrap();
        assert!(matches!(
            registry.add_render_pass("main", vk::RenderPass::null(), 1),
            Err(Error::DuplicateRenderPass(_))
        ));
        assert!(matches!(
            registry.get(&RenderPassName::new("shadow")),
            Err(Error::RenderPassUndefined(_))
        ));
    }
}
