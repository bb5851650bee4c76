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

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use log::warn;

use crate::{
    Animation, Asset, AssetId, AssetManagerBase, AssetMetadata, AssetPath, AssetRegistry,
    AssetStorage, AssetType, DataStorage, Error, Geometry, InMemorySource, Material, Result, Rig,
    Texture, TypedAssetId,
};

/// Typed-dispatch entry for one asset type. Lets the manager act on "the
/// asset at this path" without knowing the type statically.
#[derive(Clone, Copy)]
pub struct ManagerOps {
    pub create: fn(&mut AssetManager, &AssetPath) -> Result<Option<AssetId>>,
    pub destroy: fn(&mut AssetManager, AssetId) -> Result<()>,
}

impl ManagerOps {
    pub fn of<A: Asset>() -> Self {
        Self {
            create: |manager, path| {
                Ok(manager
                    .create_at::<A>(path)?
                    .map(|typed| typed.asset_id()))
            },
            destroy: |manager, id| manager.base.destroy::<A>(id),
        }
    }
}

/// User-extensible per-asset-type behavior, keyed by the runtime asset
/// type and the trait's type id.
#[derive(Default)]
pub struct TraitStorage {
    traits: HashMap<(AssetType, TypeId), Box<dyn Any + Send + Sync>>,
}

impl TraitStorage {
    /// False if an implementation for this (type, trait) pair already
    /// exists; the existing one is kept.
    pub fn register<T: Any + Send + Sync>(&mut self, ty: AssetType, value: T) -> bool {
        let key = (ty, TypeId::of::<T>());
        if self.traits.contains_key(&key) {
            return false;
        }
        self.traits.insert(key, Box::new(value));
        true
    }

    pub fn get<T: Any + Send + Sync>(&self, ty: &AssetType) -> Option<&T> {
        self.traits
            .get(&(ty.clone(), TypeId::of::<T>()))
            .and_then(|value| value.downcast_ref::<T>())
    }
}

/// Path-addressed layer over [`AssetManagerBase`]: maps asset paths to
/// ids, dispatches dynamically-typed creation, and hosts asset traits.
pub struct AssetManager {
    base: AssetManagerBase,
    storage: AssetStorage,
    paths_to_assets: HashMap<AssetPath, AssetId>,
    ops: HashMap<AssetType, ManagerOps>,
    traits: TraitStorage,
}

impl AssetManager {
    pub fn new(data_storage: Arc<dyn DataStorage>, registry: AssetRegistry) -> Self {
        let mut manager = Self {
            base: AssetManagerBase::new(registry),
            storage: AssetStorage::new(data_storage),
            paths_to_assets: HashMap::new(),
            ops: HashMap::new(),
            traits: TraitStorage::default(),
        };
        manager.register_asset_type::<Geometry>();
        manager.register_asset_type::<Texture>();
        manager.register_asset_type::<Material>();
        manager.register_asset_type::<Rig>();
        manager.register_asset_type::<Animation>();
        manager
    }

    /// Make an asset type available to dynamically-typed creation.
    pub fn register_asset_type<A: Asset>(&mut self) {
        self.ops.insert(AssetType::of::<A>(), ManagerOps::of::<A>());
    }

    /// Create an asset from in-memory data. The data stays in host memory
    /// until the asset is destroyed.
    pub fn create_data<A: Asset>(
        &mut self,
        name: impl Into<String>,
        data: A::Data,
    ) -> Result<TypedAssetId<A>> {
        self.base
            .create(Box::new(InMemorySource::<A>::new(name, data)))
    }

    /// Create an asset from a path with an explicit type. Returns the
    /// existing id if the path already maps to an asset; None if storage
    /// has nothing usable at `path`.
    pub fn create_at<A: Asset>(&mut self, path: &AssetPath) -> Result<Option<TypedAssetId<A>>> {
        if let Some(&id) = self.paths_to_assets.get(path) {
            return match self.base.get_as::<A>(id)? {
                Some(typed) => Ok(Some(typed)),
                None => Err(Error::InvalidAssetType {
                    expected: A::type_name().to_string(),
                    actual: self.base.asset_type(id)?.name().to_string(),
                }),
            };
        }

        let Some(source) = self.storage.load_deferred::<A>(path) else {
            return Ok(None);
        };
        let typed = self.base.create::<A>(Box::new(source))?;
        self.paths_to_assets.insert(path.clone(), typed.asset_id());

        Ok(Some(typed))
    }

    /// Create an asset from a path, deriving the type from the stored
    /// metadata. None if no asset is stored at `path` or its type was
    /// never registered.
    pub fn create(&mut self, path: &AssetPath) -> Result<Option<AssetId>> {
        let Some(meta) = self.storage.metadata(path) else {
            return Ok(None);
        };
        let Some(ops) = self.ops.get(&meta.ty).copied() else {
            warn!(
                "Asset at {} has type {} which is not registered at the asset manager",
                path, meta.ty
            );
            return Ok(None);
        };

        (ops.create)(self, path)
    }

    /// Destroy an asset and its device data, whatever its type.
    pub fn destroy(&mut self, id: AssetId) -> Result<()> {
        let ty = self.base.asset_type(id)?;
        let Some(ops) = self.ops.get(&ty).copied() else {
            warn!(
                "Tried to destroy asset of type {} but the type is not registered",
                ty
            );
            return Ok(());
        };
        (ops.destroy)(self, id)?;
        self.paths_to_assets.retain(|_, mapped| *mapped != id);

        Ok(())
    }

    /// Destroy the asset at `path`. Does nothing if no asset is mapped.
    pub fn destroy_at(&mut self, path: &AssetPath) -> Result<()> {
        match self.paths_to_assets.get(path).copied() {
            Some(id) => self.destroy(id),
            None => Ok(()),
        }
    }

    pub fn exists(&self, path: &AssetPath) -> bool {
        self.paths_to_assets.contains_key(path)
    }

    /// The typed id mapped at `path`, or None if the asset there is of a
    /// different type.
    pub fn get_as<A: Asset>(&self, path: &AssetPath) -> Result<Option<TypedAssetId<A>>> {
        let id = self
            .paths_to_assets
            .get(path)
            .copied()
            .ok_or_else(|| Error::UnknownPath(path.as_str().to_string()))?;
        self.base.get_as::<A>(id)
    }

    pub fn metadata_at(&self, path: &AssetPath) -> Result<&AssetMetadata> {
        let id = self
            .paths_to_assets
            .get(path)
            .copied()
            .ok_or_else(|| Error::UnknownPath(path.as_str().to_string()))?;
        self.base.metadata(id)
    }

    pub fn get_handle<A: Asset>(&self, id: TypedAssetId<A>) -> Result<A::Handle> {
        self.base.get_handle(id)
    }

    pub fn register_trait<T: Any + Send + Sync>(&mut self, ty: AssetType, value: T) -> bool {
        self.traits.register(ty, value)
    }

    pub fn get_trait<T: Any + Send + Sync>(&self, ty: &AssetType) -> Option<&T> {
        self.traits.get(ty)
    }

    pub fn storage(&self) -> &AssetStorage {
        &self.storage
    }

    pub fn base(&self) -> &AssetManagerBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AssetManagerBase {
        &mut self.base
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use torch_common::Pathlet;

    use crate::{
        test_util::host_registry, AssetManager, AssetStorage, AssetType, Error, Geometry,
        GeometryData, MemoryDataStorage, Texture, TextureData,
    };

    fn make_manager() -> (AssetManager, AssetStorage) {
        let data = Arc::new(MemoryDataStorage::new());
        let storage = AssetStorage::new(data.clone());
        (AssetManager::new(data, host_registry()), storage)
    }

    #[test]
    fn create_at_path_is_idempotent_until_destroy() {
        let (mut manager, storage) = make_manager();
        let path = Pathlet::new("geo/plane").unwrap();
        storage.store::<Geometry>(&path, &GeometryData::plane(1.0, 1.0, 1, 1));

        let first = manager.create_at::<Geometry>(&path).unwrap().unwrap();
        let second = manager.create_at::<Geometry>(&path).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            Some(first),
            manager.get_as::<Geometry>(&path).unwrap()
        );

        manager.destroy(first.asset_id()).unwrap();
        assert!(!manager.exists(&path));

        let third = manager.create_at::<Geometry>(&path).unwrap().unwrap();
        assert_ne!(first.asset_id(), third.asset_id());
    }

    #[test]
    fn create_at_missing_path_returns_none() {
        let (mut manager, _) = make_manager();
        let path = Pathlet::new("not/there").unwrap();
        assert_eq!(None, manager.create_at::<Geometry>(&path).unwrap());
        assert_eq!(None, manager.create(&path).unwrap());
    }

    #[test]
    fn path_keeps_its_asset_type() {
        let (mut manager, storage) = make_manager();
        let path = Pathlet::new("tex/white").unwrap();
        storage.store::<Texture>(&path, &TextureData::solid_color(1, 1, [255; 4]));

        manager.create_at::<Texture>(&path).unwrap().unwrap();
        assert!(matches!(
            manager.create_at::<Geometry>(&path),
            Err(Error::InvalidAssetType { .. })
        ));
    }

    #[test]
    fn dynamic_create_dispatches_on_stored_type() {
        let (mut manager, storage) = make_manager();
        let path = Pathlet::new("tex/white").unwrap();
        storage.store::<Texture>(&path, &TextureData::solid_color(1, 1, [255; 4]));

        let id = manager.create(&path).unwrap().unwrap();
        assert_eq!(
            AssetType::of::<Texture>(),
            manager.base().asset_type(id).unwrap()
        );
        assert!(manager.get_as::<Texture>(&path).unwrap().is_some());
        assert!(manager.get_as::<Geometry>(&path).unwrap().is_none());
    }

    #[test]
    fn handle_after_destroy_is_an_invalid_id_error() {
        let (mut manager, storage) = make_manager();
        let path = Pathlet::new("geo/plane").unwrap();
        storage.store::<Geometry>(&path, &GeometryData::plane(1.0, 1.0, 1, 1));

        let id = manager.create_at::<Geometry>(&path).unwrap().unwrap();
        assert!(manager.get_handle(id).is_ok());

        manager.destroy_at(&path).unwrap();
        assert!(matches!(
            manager.get_handle(id),
            Err(Error::InvalidAssetId { .. })
        ));

        // Destroying an unmapped path is a no-op.
        manager.destroy_at(&path).unwrap();
    }

    #[test]
    fn traits_are_stored_per_type() {
        let (mut manager, _) = make_manager();
        struct Thumbnailer(&'static str);
        assert!(manager.register_trait(AssetType::of::<Texture>(), Thumbnailer("tex")));
        assert!(!manager.register_trait(AssetType::of::<Texture>(), Thumbnailer("dup")));

        let stored = manager
            .get_trait::<Thumbnailer>(&AssetType::of::<Texture>())
            .unwrap();
        assert_eq!("tex", stored.0);
        assert!(manager
            .get_trait::<Thumbnailer>(&AssetType::of::<Geometry>())
            .is_none());
    }
}
