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

use std::{marker::PhantomData, sync::Arc};

use crate::{Asset, AssetMetadata, AssetPath, AssetStorage, AssetType, DataStorage};

/// Failure to produce an asset's data or metadata from its source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unable to load asset from \"{path}\": {reason}")]
pub struct AssetLoadError {
    pub path: String,
    pub reason: String,
}

impl AssetLoadError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Capability to produce an asset's data at a later point. Registry
/// modules decide whether to pull the data eagerly or lazily.
pub trait AssetSource<A: Asset>: Send + Sync {
    fn load(&self) -> Result<A::Data, AssetLoadError>;
    fn metadata(&self) -> Result<AssetMetadata, AssetLoadError>;
}

/// Source that owns its data. The data stays in host memory for the
/// lifetime of the source.
pub struct InMemorySource<A: Asset> {
    name: String,
    data: A::Data,
}

impl<A: Asset> InMemorySource<A> {
    pub fn new(name: impl Into<String>, data: A::Data) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl<A: Asset> AssetSource<A> for InMemorySource<A> {
    fn load(&self) -> Result<A::Data, AssetLoadError> {
        Ok(self.data.clone())
    }

    fn metadata(&self) -> Result<AssetMetadata, AssetLoadError> {
        Ok(AssetMetadata {
            name: self.name.clone(),
            ty: AssetType::of::<A>(),
            path: None,
        })
    }
}

/// Source bound to a path in an asset storage. Must outlive the managers
/// that consume it; it shares ownership of the underlying data storage.
pub struct StorageSource<A: Asset> {
    path: AssetPath,
    storage: Arc<dyn DataStorage>,
    _phantom: PhantomData<fn() -> A>,
}

impl<A: Asset> StorageSource<A> {
    pub(crate) fn new(path: AssetPath, storage: Arc<dyn DataStorage>) -> Self {
        Self {
            path,
            storage,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &AssetPath {
        &self.path
    }
}

impl<A: Asset> AssetSource<A> for StorageSource<A> {
    fn load(&self) -> Result<A::Data, AssetLoadError> {
        AssetStorage::new(self.storage.clone())
            .load::<A>(&self.path)
            .map_err(|err| {
                log::error!("Unable to load asset at {}: {}", self.path, err);
                AssetLoadError::new(self.path.as_str(), err.to_string())
            })
    }

    fn metadata(&self) -> Result<AssetMetadata, AssetLoadError> {
        AssetStorage::new(self.storage.clone())
            .metadata(&self.path)
            .ok_or_else(|| AssetLoadError::new(self.path.as_str(), "Metadata not found in storage"))
    }
}
