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

use std::sync::Arc;

use parking_lot::Mutex;
use torch_backend::Device;
use torch_common::{Id, SparseVec};

use crate::{
    make_compute_pipeline, make_graphics_pipeline, ComputePipelineTemplate, DescriptorRegistry,
    Error, Pipeline, PipelineLayout, PipelineLayoutTemplate, PipelineTemplate, RenderPassName,
    RenderPassRegistry, Result, ShaderCompiler,
};

pub enum PipelineLayoutTag {}
pub enum PipelineTag {}

/// Opaque id of a registered pipeline layout template.
pub type PipelineLayoutId = Id<PipelineLayoutTag>;
/// Opaque id of a registered pipeline template.
pub type PipelineId = Id<PipelineTag>;

/// Everything needed to turn templates into concrete objects for one
/// render configuration: the descriptor dictionary, the render pass
/// dictionary, and optionally a compiler for stages still in GLSL form.
#[derive(Default)]
pub struct RenderConfig {
    pub descriptors: DescriptorRegistry,
    pub render_passes: RenderPassRegistry,
    pub shader_compiler: Option<Arc<dyn ShaderCompiler>>,
}

#[derive(Clone)]
struct LayoutFactory {
    template: PipelineLayoutTemplate,
}

#[derive(Clone)]
enum PipelineKind {
    Graphics {
        template: PipelineTemplate,
        render_pass: RenderPassName,
    },
    Compute {
        template: ComputePipelineTemplate,
    },
}

/// Value snapshot of a registered pipeline: its template, layout id and
/// render pass reference.
#[derive(Clone)]
struct PipelineFactory {
    layout: PipelineLayoutId,
    kind: PipelineKind,
}

impl PipelineFactory {
    fn create(
        &self,
        device: &Arc<Device>,
        config: &RenderConfig,
        layout: &PipelineLayout,
    ) -> Result<Pipeline> {
        match &self.kind {
            PipelineKind::Graphics {
                template,
                render_pass,
            } => {
                let compat = config.render_passes.get(render_pass)?;
                make_graphics_pipeline(
                    device,
                    template,
                    layout,
                    &compat,
                    config.shader_compiler.as_ref(),
                )
            }
            PipelineKind::Compute { template } => {
                make_compute_pipeline(device, template, layout, config.shader_compiler.as_ref())
            }
        }
    }
}

/// Append-only repository of pipeline and pipeline layout templates.
/// Registration hands out opaque ids; concrete objects are built per
/// render configuration by [`PipelineStorage`].
///
/// Registration from multiple threads is fine; the two factory lists are
/// guarded independently.
#[derive(Default)]
pub struct PipelineRegistry {
    layout_factories: Mutex<Vec<LayoutFactory>>,
    pipeline_factories: Mutex<Vec<PipelineFactory>>,
}

impl PipelineRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_pipeline_layout(&self, template: PipelineLayoutTemplate) -> PipelineLayoutId {
        let mut factories = self.layout_factories.lock();
        let id = PipelineLayoutId::new(factories.len() as u32);
        factories.push(LayoutFactory { template });
        id
    }

    pub fn register_pipeline(
        &self,
        template: PipelineTemplate,
        layout: PipelineLayoutId,
        render_pass: impl Into<RenderPassName>,
    ) -> PipelineId {
        self.push_factory(PipelineFactory {
            layout,
            kind: PipelineKind::Graphics {
                template,
                render_pass: render_pass.into(),
            },
        })
    }

    pub fn register_compute_pipeline(
        &self,
        template: ComputePipelineTemplate,
        layout: PipelineLayoutId,
    ) -> PipelineId {
        self.push_factory(PipelineFactory {
            layout,
            kind: PipelineKind::Compute { template },
        })
    }

    fn push_factory(&self, factory: PipelineFactory) -> PipelineId {
        let mut factories = self.pipeline_factories.lock();
        let id = PipelineId::new(factories.len() as u32);
        factories.push(factory);
        id
    }

    /// A copy of the registered layout template, for inspection or reuse.
    pub fn clone_pipeline_layout(&self, id: PipelineLayoutId) -> Result<PipelineLayoutTemplate> {
        self.layout_factories
            .lock()
            .get(id.index())
            .map(|factory| factory.template.clone())
            .ok_or(Error::UnknownPipelineLayout(id.value()))
    }

    /// A copy of a registered graphics template.
    pub fn clone_graphics_pipeline(&self, id: PipelineId) -> Result<PipelineTemplate> {
        match &self.factory(id)?.kind {
            PipelineKind::Graphics { template, .. } => Ok(template.clone()),
            PipelineKind::Compute { .. } => Err(Error::WrongPipelineKind {
                id: id.value(),
                actual: "compute",
            }),
        }
    }

    /// A copy of a registered compute template.
    pub fn clone_compute_pipeline(&self, id: PipelineId) -> Result<ComputePipelineTemplate> {
        match &self.factory(id)?.kind {
            PipelineKind::Compute { template } => Ok(template.clone()),
            PipelineKind::Graphics { .. } => Err(Error::WrongPipelineKind {
                id: id.value(),
                actual: "graphics",
            }),
        }
    }

    pub fn pipeline_layout(&self, id: PipelineId) -> Result<PipelineLayoutId> {
        Ok(self.factory(id)?.layout)
    }

    /// The render pass name a graphics pipeline was registered against;
    /// None for compute pipelines.
    pub fn pipeline_render_pass(&self, id: PipelineId) -> Result<Option<RenderPassName>> {
        Ok(match &self.factory(id)?.kind {
            PipelineKind::Graphics { render_pass, .. } => Some(render_pass.clone()),
            PipelineKind::Compute { .. } => None,
        })
    }

    /// Create the cache of concrete objects for one render configuration.
    pub fn make_storage(
        self: &Arc<Self>,
        device: &Arc<Device>,
        config: Arc<RenderConfig>,
    ) -> PipelineStorage {
        PipelineStorage {
            registry: self.clone(),
            device: device.clone(),
            config,
            layouts: SparseVec::new(),
            pipelines: SparseVec::new(),
        }
    }

    fn factory(&self, id: PipelineId) -> Result<PipelineFactory> {
        self.pipeline_factories
            .lock()
            .get(id.index())
            .cloned()
            .ok_or(Error::UnknownPipeline(id.value()))
    }

    fn layout_factory(&self, id: PipelineLayoutId) -> Result<LayoutFactory> {
        self.layout_factories
            .lock()
            .get(id.index())
            .cloned()
            .ok_or(Error::UnknownPipelineLayout(id.value()))
    }
}

/// Cache of the concrete pipelines and layouts of one render
/// configuration. Single-threaded by design; `get` lazily invokes the
/// registered factories.
pub struct PipelineStorage {
    registry: Arc<PipelineRegistry>,
    device: Arc<Device>,
    config: Arc<RenderConfig>,
    layouts: SparseVec<PipelineLayout>,
    pipelines: SparseVec<Pipeline>,
}

impl PipelineStorage {
    pub fn get(&mut self, id: PipelineId) -> Result<&Pipeline> {
        if !self.pipelines.contains(id.index()) {
            let factory = self.registry.factory(id)?;
            self.ensure_layout(factory.layout)?;
            let layout = self.layouts.get(factory.layout.index()).unwrap();
            let pipeline = factory.create(&self.device, &self.config, layout)?;
            self.pipelines.insert(id.index(), pipeline);
        }

        Ok(self.pipelines.get(id.index()).unwrap())
    }

    pub fn get_layout(&mut self, id: PipelineLayoutId) -> Result<&PipelineLayout> {
        self.ensure_layout(id)?;
        Ok(self.layouts.get(id.index()).unwrap())
    }

    fn ensure_layout(&mut self, id: PipelineLayoutId) -> Result<()> {
        if !self.layouts.contains(id.index()) {
            let factory = self.registry.layout_factory(id)?;
            let layout = PipelineLayout::from_template(
                &self.device,
                &factory.template,
                &self.config.descriptors,
            )?;
            self.layouts.insert(id.index(), layout);
        }

        Ok(())
    }

    /// Destroy every cached pipeline and layout. Callers must ensure the
    /// device no longer uses them.
    pub fn clear(&mut self) {
        self.pipelines.clear();
        self.layouts.clear();
    }
}
