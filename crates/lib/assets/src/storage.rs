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

use log::{debug, warn};

use crate::{
    Asset, AssetMetadata, AssetPath, AssetType, DataStorage, MetadataRecord, ParseError,
    ParseResult, Serializable, StorageSource,
};

const META_SUFFIX: &str = ".meta";
const DATA_SUFFIX: &str = ".data";

/// Typed asset records on top of a [`DataStorage`]. Every asset at logical
/// path `p` occupies two keys: `p.meta` with the metadata and `p.data`
/// with the serialized payload.
#[derive(Clone)]
pub struct AssetStorage {
    storage: Arc<dyn DataStorage>,
}

impl AssetStorage {
    pub fn new(storage: Arc<dyn DataStorage>) -> Self {
        Self { storage }
    }

    pub fn data_storage(&self) -> &Arc<dyn DataStorage> {
        &self.storage
    }

    fn meta_path(path: &AssetPath) -> AssetPath {
        path.with_suffix(META_SUFFIX)
    }

    fn data_path(path: &AssetPath) -> AssetPath {
        path.with_suffix(DATA_SUFFIX)
    }

    /// Read only the metadata of the asset at `path`.
    pub fn metadata(&self, path: &AssetPath) -> Option<AssetMetadata> {
        let mut reader = self.storage.read(&Self::meta_path(path))?;
        match MetadataRecord::deserialize(&mut *reader) {
            Ok(record) => {
                let meta = record.into_metadata();
                if meta.is_none() {
                    warn!("Metadata at {} contains an invalid asset path", path);
                }
                meta
            }
            Err(err) => {
                warn!("Unable to parse metadata at {}: {}", path, err);
                None
            }
        }
    }

    /// Load and parse the payload at `path`, enforcing that the stored
    /// type matches `A`.
    pub fn load<A: Asset>(&self, path: &AssetPath) -> ParseResult<A::Data> {
        let meta = self.metadata(path).ok_or_else(|| {
            ParseError::system(format!("No asset metadata stored at {}", path))
        })?;
        if meta.ty != AssetType::of::<A>() {
            return Err(ParseError::semantic(format!(
                "Data at {} has type {}, not the requested type {}",
                path,
                meta.ty,
                A::type_name()
            )));
        }

        let mut reader = self.storage.read(&Self::data_path(path)).ok_or_else(|| {
            warn!(
                "Asset at {} has metadata but no data; storage is inconsistent",
                path
            );
            ParseError::system(format!("Unable to read asset data at {}", path))
        })?;

        A::Data::deserialize(&mut *reader)
    }

    /// Create a source that loads the asset at `path` later. None if no
    /// asset of type `A` is stored there.
    pub fn load_deferred<A: Asset>(&self, path: &AssetPath) -> Option<StorageSource<A>> {
        let meta = self.metadata(path)?;
        if meta.ty != AssetType::of::<A>() {
            return None;
        }
        Some(StorageSource::new(path.clone(), self.storage.clone()))
    }

    /// Write metadata and payload for the asset at `path`. False if either
    /// stream cannot be opened or serialization fails; in that case both
    /// keys are considered corrupt.
    pub fn store<A: Asset>(&self, path: &AssetPath, data: &A::Data) -> bool {
        let data_stream = self.storage.write(&Self::data_path(path));
        let meta_stream = self.storage.write(&Self::meta_path(path));
        let (Some(mut data_stream), Some(mut meta_stream)) = (data_stream, meta_stream) else {
            debug!(
                "Unable to open meta or data stream for asset at {}; \
                 if one of the two exists the storage is inconsistent",
                path
            );
            return false;
        };

        let meta = AssetMetadata {
            name: path.file_stem().to_string(),
            ty: AssetType::of::<A>(),
            path: Some(path.clone()),
        };
        if let Err(err) = MetadataRecord::from(&meta).serialize(&mut *meta_stream) {
            warn!("Unable to write metadata for {}: {}", path, err);
            return false;
        }
        if let Err(err) = data.serialize(&mut *data_stream) {
            warn!("Unable to write data for {}: {}", path, err);
            return false;
        }

        true
    }

    /// Delete the asset at `path` from storage. Depending on the backing
    /// storage this may be permanent.
    pub fn remove(&self, path: &AssetPath) -> bool {
        let meta = self.storage.remove(&Self::meta_path(path));
        let data = self.storage.remove(&Self::data_path(path));
        if meta != data {
            warn!(
                "Asset at {} had only one of its two keys; storage was inconsistent",
                path
            );
        }
        meta && data
    }

    /// Every unique asset path in storage, derived from the metadata keys.
    pub fn asset_paths(&self) -> Vec<AssetPath> {
        self.storage
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_suffix(META_SUFFIX))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use torch_common::Pathlet;

    use crate::{
        AssetStorage, AssetType, Geometry, GeometryData, MemoryDataStorage, ParseErrorCode,
        Texture, TextureData,
    };

    fn make_storage() -> (AssetStorage, MemoryDataStorage) {
        let data = MemoryDataStorage::new();
        (AssetStorage::new(Arc::new(data.clone())), data)
    }

    #[test]
    fn store_writes_both_keys_and_load_roundtrips() {
        let (storage, raw) = make_storage();
        let path = Pathlet::new("foo/bar/plane").unwrap();
        let geo = GeometryData::plane(1.0, 1.0, 1, 1);

        assert!(storage.store::<Geometry>(&path, &geo));
        assert!(raw.contains(&Pathlet::new("foo/bar/plane.meta").unwrap()));
        assert!(raw.contains(&Pathlet::new("foo/bar/plane.data").unwrap()));

        let loaded = storage.load::<Geometry>(&path).unwrap();
        assert_eq!(geo.vertices.len(), loaded.vertices.len());
        assert_eq!(geo.indices.len(), loaded.indices.len());
        assert_eq!(geo, loaded);
    }

    #[test]
    fn metadata_reflects_path_and_type() {
        let (storage, _) = make_storage();
        let path = Pathlet::new("textures/white").unwrap();
        storage.store::<Texture>(&path, &TextureData::solid_color(1, 1, [255; 4]));

        let meta = storage.metadata(&path).unwrap();
        assert_eq!("white", meta.name);
        assert_eq!(AssetType::of::<Texture>(), meta.ty);
        assert_eq!(Some(path), meta.path);
    }

    #[test]
    fn load_with_wrong_type_is_a_semantic_error() {
        let (storage, _) = make_storage();
        let path = Pathlet::new("plane").unwrap();
        storage.store::<Geometry>(&path, &GeometryData::plane(1.0, 1.0, 1, 1));

        let err = storage.load::<Texture>(&path).unwrap_err();
        assert_eq!(ParseErrorCode::Semantic, err.code);
    }

    #[test]
    fn load_of_missing_asset_is_a_system_error() {
        let (storage, _) = make_storage();
        let err = storage
            .load::<Geometry>(&Pathlet::new("nothing/here").unwrap())
            .unwrap_err();
        assert_eq!(ParseErrorCode::System, err.code);
    }

    #[test]
    fn remove_erases_both_keys() {
        let (storage, raw) = make_storage();
        let path = Pathlet::new("plane").unwrap();
        storage.store::<Geometry>(&path, &GeometryData::plane(1.0, 1.0, 1, 1));
        assert!(storage.remove(&path));
        assert!(raw.is_empty());
        assert!(!storage.remove(&path));
    }

    #[test]
    fn deferred_source_checks_the_stored_type() {
        let (storage, _) = make_storage();
        let path = Pathlet::new("plane").unwrap();
        storage.store::<Geometry>(&path, &GeometryData::plane(1.0, 1.0, 1, 1));

        assert!(storage.load_deferred::<Geometry>(&path).is_some());
        assert!(storage.load_deferred::<Texture>(&path).is_none());
        assert!(storage
            .load_deferred::<Geometry>(&Pathlet::new("missing").unwrap())
            .is_none());
    }

    #[test]
    fn iteration_lists_each_asset_once() {
        let (storage, _) = make_storage();
        let a = Pathlet::new("a/plane").unwrap();
        let b = Pathlet::new("b/plane").unwrap();
        storage.store::<Geometry>(&a, &GeometryData::plane(1.0, 1.0, 1, 1));
        storage.store::<Geometry>(&b, &GeometryData::plane(1.0, 1.0, 1, 1));

        let mut paths = storage.asset_paths();
        paths.sort();
        assert_eq!(vec![a, b], paths);
    }
}
