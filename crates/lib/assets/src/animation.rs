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
use log::warn;
use parking_lot::Mutex;
use torch_backend::{AsVulkan, Buffer, BufferCreateDesc, Device};
use torch_common::{IdPool, SparseVec};

use crate::{
    Animation, AnyRegistryModule, Asset, AssetSource, DescriptorBinding, DescriptorUpdate, Error,
    LocalId, RegistryModule, Result, ANIMATION_DATA_BINDING, ANIMATION_META_BINDING,
};

pub const MAX_ANIMATION_COUNT: u32 = 300;
/// Size of the shared keyframe matrix buffer in bytes.
pub const ANIMATION_BUFFER_SIZE: usize = 2_000_000;

const MATRIX_SIZE: usize = mem::size_of::<[f32; 16]>();

/// Location and timing data of one animation in the shared buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationHandle {
    buffer_index: u32,
    frame_count: u32,
    bone_count: u32,
    frame_time_ms: f32,
}

impl AnimationHandle {
    /// Index of this animation's metadata in the meta buffer.
    pub fn buffer_index(&self) -> u32 {
        self.buffer_index
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn bone_count(&self) -> u32 {
        self.bone_count
    }

    /// Duration of one frame in milliseconds. All frames share it.
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }

    pub fn duration_ms(&self) -> f32 {
        self.frame_count as f32 * self.frame_time_ms
    }

    #[cfg(test)]
    pub(crate) fn test_handle(buffer_index: u32, frame_count: u32, frame_time_ms: f32) -> Self {
        Self {
            buffer_index,
            frame_count,
            bone_count: 1,
            frame_time_ms,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct AnimationMeta {
    offset: u32,
    frame_count: u32,
    bone_count: u32,
}

struct PendingCopy {
    staging: Buffer,
    dst_offset: u64,
    size: u64,
}

#[derive(Default)]
struct AnimationState {
    ids: IdPool,
    handles: SparseVec<AnimationHandle>,
    copies: Vec<PendingCopy>,
    retired: Vec<Buffer>,
    animation_count: u32,
    // Next free byte in the keyframe buffer. The linear allocation never
    // reclaims space; removed animations leave a hole.
    buffer_offset: usize,
    buffer_infos_emitted: bool,
}

/// GPU storage for animation keyframes. One large device buffer holds all
/// keyframe matrices, a second one per-animation metadata. Allocation in
/// the big buffer is guarded by the registry's mutex.
pub struct AnimationRegistry {
    device: Arc<Device>,
    state: Mutex<AnimationState>,
    meta_buffer: Mutex<Buffer>,
    meta_buffer_raw: vk::Buffer,
    keyframe_buffer: Buffer,
}

impl AnimationRegistry {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Self>> {
        let meta_buffer = Buffer::new(
            device,
            BufferCreateDesc::host(mem::size_of::<AnimationMeta>() * MAX_ANIMATION_COUNT as usize)
                .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
                .name("animation meta"),
        )?;
        let meta_buffer_raw = meta_buffer.as_vk();
        let keyframe_buffer = Buffer::new(
            device,
            BufferCreateDesc::gpu(ANIMATION_BUFFER_SIZE)
                .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
                .name("animation keyframes"),
        )?;

        Ok(Arc::new(Self {
            device: device.clone(),
            state: Mutex::default(),
            meta_buffer: Mutex::new(meta_buffer),
            meta_buffer_raw,
            keyframe_buffer,
        }))
    }
}

impl AnyRegistryModule for AnimationRegistry {
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
                dst_offset: copy.dst_offset,
                size: copy.size,
            };
            unsafe {
                device.get().cmd_copy_buffer(
                    cmd,
                    copy.staging.as_vk(),
                    self.keyframe_buffer.as_vk(),
                    &[region],
                )
            };
        }
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build();
        unsafe {
            device.get().cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
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
                binding: ANIMATION_META_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::ALL,
            },
            DescriptorBinding {
                binding: ANIMATION_DATA_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::ALL,
            },
        ]
    }

    fn descriptor_updates(&self) -> Vec<DescriptorUpdate> {
        let mut state = self.state.lock();
        if state.buffer_infos_emitted {
            return Vec::new();
        }
        state.buffer_infos_emitted = true;
        vec![
            DescriptorUpdate::Buffer {
                binding: ANIMATION_META_BINDING,
                array_index: 0,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                info: vk::DescriptorBufferInfo {
                    buffer: self.meta_buffer_raw,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            },
            DescriptorUpdate::Buffer {
                binding: ANIMATION_DATA_BINDING,
                array_index: 0,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                info: vk::DescriptorBufferInfo {
                    buffer: self.keyframe_buffer.as_vk(),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            },
        ]
    }
}

impl RegistryModule<Animation> for AnimationRegistry {
    fn add(&self, source: Box<dyn AssetSource<Animation>>) -> Result<LocalId<Animation>> {
        let data = source.load()?;
        let size = data.keyframes.len() * MATRIX_SIZE;

        let mut state = self.state.lock();
        if state.animation_count >= MAX_ANIMATION_COUNT
            || state.buffer_offset + size > ANIMATION_BUFFER_SIZE
        {
            return Err(Error::ModuleFull {
                ty: Animation::type_name(),
                limit: MAX_ANIMATION_COUNT,
            });
        }

        let device_index = state.animation_count;
        state.animation_count += 1;
        let dst_offset = state.buffer_offset;
        state.buffer_offset += size;

        let matrix_offset = (dst_offset / MATRIX_SIZE) as u32;
        self.meta_buffer.lock().write_typed(
            (device_index as usize * mem::size_of::<AnimationMeta>()) as u64,
            &AnimationMeta {
                offset: matrix_offset,
                frame_count: data.frame_count,
                bone_count: data.bone_count,
            },
        )?;

        let mut staging = Buffer::new(
            &self.device,
            BufferCreateDesc::upload(size).usage(vk::BufferUsageFlags::TRANSFER_SRC),
        )?;
        let bytes = unsafe {
            std::slice::from_raw_parts(data.keyframes.as_ptr() as *const u8, size)
        };
        staging.write_bytes(0, bytes)?;
        state.copies.push(PendingCopy {
            staging,
            dst_offset: dst_offset as u64,
            size: size as u64,
        });

        let handle = AnimationHandle {
            buffer_index: device_index,
            frame_count: data.frame_count,
            bone_count: data.bone_count,
            frame_time_ms: data.frame_time_ms,
        };
        let id = state.ids.generate_id();
        state.handles.insert(id.index(), handle);

        Ok(id)
    }

    fn remove(&self, id: LocalId<Animation>) -> Result<()> {
        let mut state = self.state.lock();
        state
            .handles
            .remove(id.index())
            .ok_or(Error::InvalidLocalId {
                ty: Animation::type_name(),
                id: id.value(),
            })?;
        state.ids.free_id(id);
        warn!(
            "Animation {} removed; its keyframe buffer space is not reclaimed",
            id.value()
        );

        Ok(())
    }

    fn handle(&self, id: LocalId<Animation>) -> Result<AnimationHandle> {
        self.state
            .lock()
            .handles
            .get(id.index())
            .copied()
            .ok_or(Error::InvalidLocalId {
                ty: Animation::type_name(),
                id: id.value(),
            })
    }
}

#[cfg(test)]
mod test {
    use super::AnimationHandle;

    #[test]
    fn handle_timing() {
        let handle = AnimationHandle {
            buffer_index: 3,
            frame_count: 24,
            bone_count: 16,
            frame_time_ms: 10.0,
        };
        assert_eq!(3, handle.buffer_index());
        assert_eq!(240.0, handle.duration_ms());
        assert_eq!(10.0, handle.frame_time_ms());
    }
}
