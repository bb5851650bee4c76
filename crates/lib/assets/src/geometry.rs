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

use std::{mem, slice, sync::Arc};

use ash::vk;
use parking_lot::Mutex;
use smol_str::SmolStr;
use torch_backend::{AsVulkan, Buffer, BufferCreateDesc, Device};
use torch_common::{IdPool, SparseVec};

use crate::{
    AnyRegistryModule, Asset, AssetSource, DescriptorBinding, DescriptorUpdate, Error, Geometry,
    LocalId, RegistryModule, Result, VertexType, GEOMETRY_INDEX_BINDING, GEOMETRY_VERTEX_BINDING,
};

pub const MAX_GEOMETRY_COUNT: u32 = 5000;

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    unsafe { slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

/// Non-owning view of one geometry's device data. The buffers stay alive
/// until the geometry is removed from the registry; callers must not
/// remove a geometry while command buffers still reference it.
#[derive(Debug, Clone, Default)]
pub struct GeometryHandle {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_type: VertexType,
    pub device_index: u32,
    rig: Option<SmolStr>,
}

impl GeometryHandle {
    pub fn rig_path(&self) -> Option<&str> {
        self.rig.as_deref()
    }

    pub fn bind_vertices(&self, device: &Device, cmd: vk::CommandBuffer, binding: u32) {
        unsafe {
            device
                .get()
                .cmd_bind_vertex_buffers(cmd, binding, &[self.vertex_buffer], &[0])
        };
    }

    pub fn bind_indices(&self, device: &Device, cmd: vk::CommandBuffer) {
        unsafe {
            device
                .get()
                .cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32)
        };
    }
}

struct GeometrySlot {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertex_count: u32,
    index_count: u32,
    vertex_type: VertexType,
    device_index: u32,
    rig: Option<SmolStr>,
}

struct PendingCopy {
    staging: Buffer,
    target: vk::Buffer,
    size: u64,
}

#[derive(Default)]
struct GeometryState {
    ids: IdPool,
    slots: SparseVec<GeometrySlot>,
    copies: Vec<PendingCopy>,
    // Staging kept alive for one frame after its copy was recorded.
    retired: Vec<Buffer>,
    descriptor_writes: Vec<DescriptorUpdate>,
    next_device_index: u32,
}

/// Owner of all geometry device buffers. `add` uploads vertex and index
/// data into device-local memory through staging buffers that are flushed
/// by the next `update`.
pub struct GeometryRegistry {
    device: Arc<Device>,
    state: Mutex<GeometryState>,
}

impl GeometryRegistry {
    pub fn new(device: &Arc<Device>) -> Arc<Self> {
        Arc::new(Self {
            device: device.clone(),
            state: Mutex::default(),
        })
    }

    fn upload(
        &self,
        state: &mut GeometryState,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Buffer> {
        let target = Buffer::new(
            &self.device,
            BufferCreateDesc::gpu(bytes.len())
                .usage(usage | vk::BufferUsageFlags::TRANSFER_DST)
                .name(name),
        )?;
        let mut staging = Buffer::new(
            &self.device,
            BufferCreateDesc::upload(bytes.len()).usage(vk::BufferUsageFlags::TRANSFER_SRC),
        )?;
        staging.write_bytes(0, bytes)?;
        state.copies.push(PendingCopy {
            staging,
            target: target.as_vk(),
            size: bytes.len() as u64,
        });

        Ok(target)
    }
}

impl AnyRegistryModule for GeometryRegistry {
    fn update(&self, device: &Device, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        state.retired.clear();
        let copies = mem::take(&mut state.copies);
        if copies.is_empty() {
            return Ok(());
        }

        for copy in &copies {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: copy.size,
            };
            unsafe {
                device
                    .get()
                    .cmd_copy_buffer(cmd, copy.staging.as_vk(), copy.target, &[region])
            };
        }
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ)
            .build();
        unsafe {
            device.get().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            )
        };

        state
            .retired
            .extend(copies.into_iter().map(|copy| copy.staging));

        Ok(())
    }

    fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding> {
        vec![
            DescriptorBinding {
                binding: GEOMETRY_VERTEX_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                count: MAX_GEOMETRY_COUNT,
                stages: vk::ShaderStageFlags::ALL,
            },
            DescriptorBinding {
                binding: GEOMETRY_INDEX_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                count: MAX_GEOMETRY_COUNT,
                stages: vk::ShaderStageFlags::ALL,
            },
        ]
    }

    fn descriptor_updates(&self) -> Vec<DescriptorUpdate> {
        mem::take(&mut self.state.lock().descriptor_writes)
    }
}

impl RegistryModule<Geometry> for GeometryRegistry {
    fn add(&self, source: Box<dyn AssetSource<Geometry>>) -> Result<LocalId<Geometry>> {
        let data = source.load()?;

        let mut state = self.state.lock();
        if state.slots.len() as u32 >= MAX_GEOMETRY_COUNT {
            return Err(Error::ModuleFull {
                ty: Geometry::type_name(),
                limit: MAX_GEOMETRY_COUNT,
            });
        }

        // Base vertices first, skinning attributes appended behind them.
        let mut vertex_bytes = as_bytes(&data.vertices).to_vec();
        vertex_bytes.extend_from_slice(as_bytes(&data.skin));
        let vertex_buffer = self.upload(
            &mut state,
            &vertex_bytes,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            "geometry vertices",
        )?;
        let index_buffer = self.upload(
            &mut state,
            as_bytes(&data.indices),
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            "geometry indices",
        )?;

        let device_index = state.next_device_index;
        state.next_device_index += 1;

        for (binding, buffer) in [
            (GEOMETRY_VERTEX_BINDING, &vertex_buffer),
            (GEOMETRY_INDEX_BINDING, &index_buffer),
        ] {
            state.descriptor_writes.push(DescriptorUpdate::Buffer {
                binding,
                array_index: device_index,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                info: vk::DescriptorBufferInfo {
                    buffer: buffer.as_vk(),
                    offset: 0,
                    range: buffer.size() as u64,
                },
            });
        }

        let slot = GeometrySlot {
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
            vertex_type: data.vertex_type(),
            device_index,
            rig: data.rig.as_deref().map(SmolStr::new),
            vertex_buffer,
            index_buffer,
        };
        let id = state.ids.generate_id();
        state.slots.insert(id.index(), slot);

        Ok(id)
    }

    fn remove(&self, id: LocalId<Geometry>) -> Result<()> {
        let mut state = self.state.lock();
        state.slots.remove(id.index()).ok_or(Error::InvalidLocalId {
            ty: Geometry::type_name(),
            id: id.value(),
        })?;
        state.ids.free_id(id);

        Ok(())
    }

    fn handle(&self, id: LocalId<Geometry>) -> Result<GeometryHandle> {
        let state = self.state.lock();
        let slot = state.slots.get(id.index()).ok_or(Error::InvalidLocalId {
            ty: Geometry::type_name(),
            id: id.value(),
        })?;

        Ok(GeometryHandle {
            vertex_buffer: slot.vertex_buffer.as_vk(),
            index_buffer: slot.index_buffer.as_vk(),
            vertex_count: slot.vertex_count,
            index_count: slot.index_count,
            vertex_type: slot.vertex_type,
            device_index: slot.device_index,
            rig: slot.rig.clone(),
        })
    }
}
