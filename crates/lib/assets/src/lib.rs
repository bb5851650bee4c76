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

mod animation;
mod animation_engine;
mod data_storage;
mod geometry;
mod manager;
mod manager_base;
mod material;
mod registry;
mod rig;
mod serializer;
mod source;
mod storage;
#[cfg(test)]
mod test_util;
mod texture;
mod types;

pub use animation::*;
pub use animation_engine::*;
pub use data_storage::*;
pub use geometry::*;
pub use manager::*;
pub use manager_base::*;
pub use material::*;
pub use registry::*;
pub use rig::*;
pub use serializer::*;
pub use source::*;
pub use storage::*;
pub use texture::*;
pub use types::*;

use torch_backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid asset id {id}: {reason}")]
    InvalidAssetId { id: u32, reason: String },
    #[error("Expected asset of type {expected}, but the asset has type {actual}")]
    InvalidAssetType { expected: String, actual: String },
    #[error("Invalid local id {id} for asset type {ty}")]
    InvalidLocalId { ty: &'static str, id: u32 },
    #[error("No registry module for asset type {0} is registered")]
    NoModule(&'static str),
    #[error("Registry module for {ty} is full (limit {limit})")]
    ModuleFull { ty: &'static str, limit: u32 },
    #[error("No asset at path {0}")]
    UnknownPath(String),
    #[error(transparent)]
    Load(#[from] AssetLoadError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, Error>;
