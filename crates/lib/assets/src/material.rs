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

use std::{mem, sync::Arc};

use ash::vk;
use parking_lot::Mutex;
use torch_backend::{AsVulkan, Buffer, BufferCreateDesc, Device};
use torch_common::{IdPool, SparseVec};

use crate::{
    AnyRegistryModule, Asset, AssetSource, DescriptorBinding, DescriptorUpdate, Error, LocalId,
    Material, MaterialData, RegistryModule, Result, MATERIAL_BUFFER_BINDING,
};

pub const MAX_MATERIAL_COUNT: u32 = 1024;
pub const MATERIAL_BUFFER_DEFAULT_SIZE: usize =
    mem::size_of::<MaterialData>() * MAX_MATERIAL_COUNT as usize;

#[derive(Default)]
struct MaterialState {
    ids: IdPool,
    materials: SparseVec<MaterialData>,
    dirty: Vec<LocalId<Material>>,
}

/// View of one material's POD value. Writing through the handle flags the
/// entry dirty; the change reaches the GPU buffer on the next `update`.
#[derive(Clone)]
pub struct MaterialHandle {
    state: Arc<Mutex<MaterialState>>,
    id: LocalId<Material>,
}

impl MaterialHandle {
    pub fn get(&self) -> Option<MaterialData> {
        self.state.lock().materials.get(self.id.index()).copied()
    }

    pub fn set(&self, data: MaterialData) -> bool {
        let mut state = self.state.lock();
        if state.materials.contains(self.id.index()) {
            state.materials.insert(self.id.index(), data);
            state.dirty.push(self.id);
            true
        } else {
            false
        }
    }

    pub fn local_id(&self) -> LocalId<Material> {
        self.id
    }
}

impl std::fmt::Debug for MaterialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MaterialHandle({})", self.id)
    }
}

/// All material values live in one GPU buffer indexed by local id.
/// Writes are coalesced and flushed by `update`.
pub struct MaterialRegistry {
    state: Arc<Mutex<MaterialState>>,
    buffer: Mutex<Buffer>,
    buffer_raw: vk::Buffer,
    buffer_info_emitted: Mutex<bool>,
}

impl MaterialRegistry {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Self>> {
        let buffer = Buffer::new(
            device,
            BufferCreateDesc::host(MATERIAL_BUFFER_DEFAULT_SIZE)
                .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
                .name("materials"),
        )?;
        let buffer_raw = buffer.as_vk();

        Ok(Arc::new(Self {
            state: Arc::default(),
            buffer: Mutex::new(buffer),
            buffer_raw,
            buffer_info_emitted: Mutex::new(false),
        }))
    }
}

impl AnyRegistryModule for MaterialRegistry {
    fn update(&self, _device: &Device, _cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let mut dirty = mem::take(&mut state.dirty);
        dirty.sort_unstable_by_key(|id| id.value());
        dirty.dedup();

        let mut buffer = self.buffer.lock();
        for id in dirty {
            if let Some(data) = state.materials.get(id.index()) {
                let offset = (id.index() * mem::size_of::<MaterialData>()) as u64;
                buffer.write_typed(offset, data)?;
            }
        }

        Ok(())
    }

    fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding> {
        vec![DescriptorBinding {
            binding: MATERIAL_BUFFER_BINDING,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::ALL,
        }]
    }

    fn descriptor_updates(&self) -> Vec<DescriptorUpdate> {
        let mut emitted = self.buffer_info_emitted.lock();
        if *emitted {
            return Vec::new();
        }
        *emitted = true;
        vec![DescriptorUpdate::Buffer {
            binding: MATERIAL_BUFFER_BINDING,
            array_index: 0,
            ty: vk::DescriptorType::STORAGE_BUFFER,
            info: vk::DescriptorBufferInfo {
                buffer: self.buffer_raw,
                offset: 0,
                range: MATERIAL_BUFFER_DEFAULT_SIZE as u64,
            },
        }]
    }
}

impl RegistryModule<Material> for MaterialRegistry {
    fn add(&self, source: Box<dyn AssetSource<Material>>) -> Result<LocalId<Material>> {
        let data = source.load()?;
        let mut state = self.state.lock();
        let id: LocalId<Material> = state.ids.generate_id();
        if id.index() as u32 >= MAX_MATERIAL_COUNT {
            state.ids.free_id(id);
            return Err(Error::ModuleFull {
                ty: Material::type_name(),
                limit: MAX_MATERIAL_COUNT,
            });
        }
        state.materials.insert(id.index(), data);
        state.dirty.push(id);

        Ok(id)
    }

    fn remove(&self, id: LocalId<Material>) -> Result<()> {
        let mut state = self.state.lock();
        state
            .materials
            .remove(id.index())
            .ok_or(Error::InvalidLocalId {
                ty: Material::type_name(),
                id: id.value(),
            })?;
        state.ids.free_id(id);

        Ok(())
    }

    fn handle(&self, id: LocalId<Material>) -> Result<MaterialHandle> {
        let state = self.state.lock();
        if !state.materials.contains(id.index()) {
            return Err(Error::InvalidLocalId {
                ty: Material::type_name(),
                id: id.value(),
            });
        }

        Ok(MaterialHandle {
            state: self.state.clone(),
            id,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{MaterialHandle, MaterialState};
    use crate::{LocalId, MaterialData};

    #[test]
    fn handle_reads_and_marks_dirty() {
        let state = Arc::new(Mutex::new(MaterialState::default()));
        let id: LocalId<crate::Material> = state.lock().ids.generate_id();
        state.lock().materials.insert(id.index(), MaterialData::default());

        let handle = MaterialHandle {
            state: state.clone(),
            id,
        };
        assert_eq!(Some(MaterialData::default()), handle.get());

        let new_value = MaterialData {
            roughness: 0.5,
            ..Default::default()
        };
        assert!(handle.set(new_value));
        assert_eq!(Some(new_value), handle.get());
        assert_eq!(vec![id], state.lock().dirty);
    }

    #[test]
    fn handle_to_removed_slot_reports_failure() {
        let state = Arc::new(Mutex::new(MaterialState::default()));
        let handle = MaterialHandle {
            state,
            id: LocalId::new(0),
        };
        assert_eq!(None, handle.get());
        assert!(!handle.set(MaterialData::default()));
    }
}
