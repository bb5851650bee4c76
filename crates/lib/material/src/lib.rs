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

mod compiler;
mod graph;
mod program;

pub use compiler::*;
pub use graph::*;
pub use program::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Material graph contains a cycle")]
    GraphCycle,
    #[error("Input \"{input}\" of node {node} is not connected and has no default value")]
    UnconnectedInput { node: String, input: String },
    #[error("Input \"{input}\" of node {node} cannot accept a value of type {ty}")]
    TypeMismatch {
        node: String,
        input: String,
        ty: String,
    },
    #[error("Cannot infer a concrete type for node {0}")]
    AmbiguousType(String),
    #[error("Push constants are only supported on the vertex stage, not {0}")]
    UnsupportedPushConstantStage(String),
    #[error(transparent)]
    Core(#[from] torch_core::Error),
    #[error(transparent)]
    Assets(#[from] torch_assets::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
