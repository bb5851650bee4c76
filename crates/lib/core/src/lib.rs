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

mod descriptor;
mod layout;
mod registry;
mod render_pass;
mod shader_loader;
mod template;

pub use descriptor::*;
pub use layout::*;
pub use registry::*;
pub use render_pass::*;
pub use shader_loader::*;
pub use template::*;

use torch_backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Descriptor \"{0}\" is not defined")]
    DescriptorUndefined(String),
    #[error("Descriptor \"{0}\" has no provider; call provide_descriptor before binding")]
    DescriptorUnprovided(String),
    #[error("Descriptor \"{0}\" is already defined")]
    DuplicateDescriptor(String),
    #[error("Render pass \"{0}\" is not defined")]
    RenderPassUndefined(String),
    #[error("Render pass \"{0}\" is already registered")]
    DuplicateRenderPass(String),
    #[error("Unknown pipeline layout id {0}")]
    UnknownPipelineLayout(u32),
    #[error("Unknown pipeline id {0}")]
    UnknownPipeline(u32),
    #[error("Pipeline {id} is a {actual} pipeline")]
    WrongPipelineKind { id: u32, actual: &'static str },
    #[error("A pipeline layout template cannot carry pre-resolved descriptor set layouts")]
    InlineLayoutInTemplate,
    #[error("Shader source {0} not found")]
    ShaderNotFound(String),
    #[error("Invalid shader database: {0}")]
    ShaderDatabase(String),
    #[error("Failed to compile shader {name}: {message}")]
    ShaderCompile { name: String, message: String },
    #[error("No shader compiler is configured for this render configuration")]
    NoShaderCompiler,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, Error>;
