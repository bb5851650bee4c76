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

use std::any::Any;

use torch_common::{Handle, Id, Pool};

use crate::{Asset, AssetMetadata, AssetRegistry, AssetSource, AssetType, Error, Result};

/// Process-unique id for basic asset data shared by all asset types.
/// Issued by [`AssetManagerBase`]; once the asset is destroyed, every copy
/// of the id is permanently invalid.
pub type AssetId = Handle<AssetInfo>;

/// Per-registry-module id for an asset's device data. Not unique across
/// asset types, and slots may be recycled by the module.
pub type LocalId<A> = Id<A>;

/// Pair of the global asset id and the module-local id, tagged with the
/// asset type.
pub struct TypedAssetId<A: Asset> {
    id: AssetId,
    local: LocalId<A>,
}

impl<A: Asset> Clone for TypedAssetId<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Asset> Copy for TypedAssetId<A> {}

impl<A: Asset> PartialEq for TypedAssetId<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A: Asset> Eq for TypedAssetId<A> {}

impl<A: Asset> std::fmt::Debug for TypedAssetId<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TypedAssetId<{}>({}, local {})",
            A::type_name(),
            self.id,
            self.local
        )
    }
}

impl<A: Asset> TypedAssetId<A> {
    /// Construct a valid id pair. Normally the manager does this; built
    /// by hand the id is only as valid as its parts.
    pub fn new(id: AssetId, local: LocalId<A>) -> Self {
        Self { id, local }
    }

    pub fn asset_id(&self) -> AssetId {
        self.id
    }

    pub fn local_id(&self) -> LocalId<A> {
        self.local
    }
}

impl<A: Asset> From<TypedAssetId<A>> for AssetId {
    fn from(value: TypedAssetId<A>) -> Self {
        value.id
    }
}

/// Metadata and the typed id of one live asset.
pub struct AssetInfo {
    metadata: AssetMetadata,
    typed: Box<dyn Any + Send + Sync>,
}

impl AssetInfo {
    pub fn metadata(&self) -> &AssetMetadata {
        &self.metadata
    }

    pub fn as_type<A: Asset>(&self) -> Option<TypedAssetId<A>> {
        self.typed.downcast_ref::<TypedAssetId<A>>().copied()
    }
}

/// Tracks the existence of assets and their data sources. Does not deal
/// with device data beyond delegating to the registry modules.
///
/// Logically single-writer: `create` and `destroy` take `&mut self` and
/// callers serialize them; lookups are free to run concurrently.
pub struct AssetManagerBase {
    info: Pool<AssetInfo>,
    registry: AssetRegistry,
}

impl AssetManagerBase {
    pub fn new(registry: AssetRegistry) -> Self {
        Self {
            info: Pool::new(),
            registry,
        }
    }

    /// Register an asset defined by a data source. The module for `A`
    /// decides whether the data is loaded now or on first handle access.
    pub fn create<A: Asset>(&mut self, source: Box<dyn AssetSource<A>>) -> Result<TypedAssetId<A>> {
        let metadata = source.metadata()?;
        if metadata.ty != AssetType::of::<A>() {
            return Err(Error::InvalidAssetType {
                expected: A::type_name().to_string(),
                actual: metadata.ty.name().to_string(),
            });
        }

        let local = self.registry.add::<A>(source)?;
        let id = self.info.push(AssetInfo {
            metadata,
            typed: Box::new(()),
        });
        let typed = TypedAssetId::new(id, local);
        self.info.get_mut(id).unwrap().typed = Box::new(typed);

        Ok(typed)
    }

    /// Remove an asset and its device data. The stored asset must be of
    /// type `A`.
    pub fn destroy<A: Asset>(&mut self, id: AssetId) -> Result<()> {
        let info = self.info.get(id).ok_or_else(|| Error::InvalidAssetId {
            id: id.into(),
            reason: "asset does not exist, possible double free".into(),
        })?;
        let typed = info.as_type::<A>().ok_or_else(|| Error::InvalidAssetType {
            expected: A::type_name().to_string(),
            actual: info.metadata.ty.name().to_string(),
        })?;

        self.registry.remove::<A>(typed.local_id())?;
        self.info.remove(id);

        Ok(())
    }

    pub fn destroy_typed<A: Asset>(&mut self, id: TypedAssetId<A>) -> Result<()> {
        self.destroy::<A>(id.asset_id())
    }

    /// Checked downcast of a typeless id.
    pub fn get_as<A: Asset>(&self, id: AssetId) -> Result<Option<TypedAssetId<A>>> {
        Ok(self.info(id)?.as_type::<A>())
    }

    /// Handle to the asset's device data. Forces lazily-loading modules
    /// to materialize the data.
    pub fn get_handle<A: Asset>(&self, id: TypedAssetId<A>) -> Result<A::Handle> {
        self.info(id.asset_id())?;
        self.registry.handle::<A>(id.local_id())
    }

    pub fn metadata(&self, id: AssetId) -> Result<&AssetMetadata> {
        Ok(self.info(id)?.metadata())
    }

    pub fn asset_type(&self, id: AssetId) -> Result<AssetType> {
        Ok(self.info(id)?.metadata().ty.clone())
    }

    pub fn contains(&self, id: AssetId) -> bool {
        self.info.is_valid(id)
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    fn info(&self, id: AssetId) -> Result<&AssetInfo> {
        self.info.get(id).ok_or_else(|| Error::InvalidAssetId {
            id: id.into(),
            reason: "has the asset already been destroyed?".into(),
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        test_util::{host_registry, in_memory_geo},
        AssetManagerBase, AssetType, Error, Geometry, Texture,
    };

    #[test]
    fn create_allocates_distinct_ids() {
        let mut manager = AssetManagerBase::new(host_registry());
        let a = manager.create::<Geometry>(in_memory_geo("a")).unwrap();
        let b = manager.create::<Geometry>(in_memory_geo("b")).unwrap();
        assert_ne!(a.asset_id(), b.asset_id());
        assert_eq!(
            AssetType::of::<Geometry>(),
            manager.asset_type(a.asset_id()).unwrap()
        );
    }

    #[test]
    fn destroyed_id_is_permanently_invalid() {
        let mut manager = AssetManagerBase::new(host_registry());
        let id = manager.create::<Geometry>(in_memory_geo("a")).unwrap();
        manager.destroy_typed(id).unwrap();

        assert!(matches!(
            manager.metadata(id.asset_id()),
            Err(Error::InvalidAssetId { .. })
        ));
        assert!(matches!(
            manager.destroy::<Geometry>(id.asset_id()),
            Err(Error::InvalidAssetId { .. })
        ));

        // A new asset may reuse the slot but never the id value.
        let next = manager.create::<Geometry>(in_memory_geo("b")).unwrap();
        assert_ne!(id.asset_id(), next.asset_id());
        assert!(manager.metadata(id.asset_id()).is_err());
    }

    #[test]
    fn destroy_with_wrong_type_fails_and_keeps_the_asset() {
        let mut manager = AssetManagerBase::new(host_registry());
        let id = manager.create::<Geometry>(in_memory_geo("a")).unwrap();
        assert!(matches!(
            manager.destroy::<Texture>(id.asset_id()),
            Err(Error::InvalidAssetType { .. })
        ));
        assert!(manager.contains(id.asset_id()));
    }

    #[test]
    fn get_as_checks_the_type() {
        let mut manager = AssetManagerBase::new(host_registry());
        let id = manager.create::<Geometry>(in_memory_geo("a")).unwrap();
        assert_eq!(
            Some(id),
            manager.get_as::<Geometry>(id.asset_id()).unwrap()
        );
        assert_eq!(None, manager.get_as::<Texture>(id.asset_id()).unwrap());
    }
}
