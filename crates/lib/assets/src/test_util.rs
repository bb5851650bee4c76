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
use parking_lot::Mutex;
use torch_backend::Device;
use torch_common::{IdPool, SparseVec};

use crate::{
    AnyRegistryModule, Asset, AssetRegistry, AssetSource, DescriptorBinding, DescriptorUpdate,
    Error, Geometry, GeometryData, GeometryHandle, InMemorySource, LocalId, RegistryModule,
    Result, Texture, TextureHandle,
};

/// Registry module that keeps loaded data in host memory. Stands in for
/// the device-backed modules in tests.
pub(crate) struct HostModule<A: Asset> {
    make_handle: fn(LocalId<A>) -> A::Handle,
    state: Mutex<HostState<A>>,
}

struct HostState<A: Asset> {
    ids: IdPool,
    data: SparseVec<A::Data>,
}

impl<A: Asset> HostModule<A> {
    pub fn new(make_handle: fn(LocalId<A>) -> A::Handle) -> Arc<Self> {
        Arc::new(Self {
            make_handle,
            state: Mutex::new(HostState {
                ids: IdPool::new(),
                data: SparseVec::new(),
            }),
        })
    }
}

impl<A: Asset> AnyRegistryModule for HostModule<A> {
    fn update(&self, _device: &Device, _cmd: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding> {
        Vec::new()
    }

    fn descriptor_updates(&self) -> Vec<DescriptorUpdate> {
        Vec::new()
    }
}

impl<A: Asset> RegistryModule<A> for HostModule<A> {
    fn add(&self, source: Box<dyn AssetSource<A>>) -> Result<LocalId<A>> {
        let data = source.load()?;
        let mut state = self.state.lock();
        let id = state.ids.generate_id();
        state.data.insert(id.index(), data);
        Ok(id)
    }

    fn remove(&self, id: LocalId<A>) -> Result<()> {
        let mut state = self.state.lock();
        state.data.remove(id.index()).ok_or(Error::InvalidLocalId {
            ty: A::type_name(),
            id: id.value(),
        })?;
        state.ids.free_id(id);
        Ok(())
    }

    fn handle(&self, id: LocalId<A>) -> Result<A::Handle> {
        let state = self.state.lock();
        if !state.data.contains(id.index()) {
            return Err(Error::InvalidLocalId {
                ty: A::type_name(),
                id: id.value(),
            });
        }
        Ok((self.make_handle)(id))
    }
}

pub(crate) fn host_registry() -> AssetRegistry {
    let mut registry = AssetRegistry::new();
    registry.register_module::<Geometry, _>(HostModule::new(|_| GeometryHandle::default()));
    registry.register_module::<Texture, _>(HostModule::new(|id| {
        TextureHandle::detached(id.value())
    }));
    registry
}

pub(crate) fn in_memory_geo(name: &str) -> Box<dyn AssetSource<Geometry>> {
    Box::new(InMemorySource::<Geometry>::new(
        name,
        GeometryData::plane(1.0, 1.0, 1, 1),
    ))
}
