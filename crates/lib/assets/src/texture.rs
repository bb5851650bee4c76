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
    mem,
    sync::{Arc, Weak},
};

use ash::vk;
use log::warn;
use parking_lot::Mutex;
use torch_backend::{AsVulkan, Buffer, BufferCreateDesc, Device, Image, ImageCreateDesc};
use torch_common::{IdPool, SparseVec};

use crate::{
    AnyRegistryModule, Asset, AssetSource, DescriptorBinding, DescriptorUpdate, Error, LocalId,
    RegistryModule, Result, Texture, TEXTURE_ARRAY_BINDING,
};

// Bounded so the descriptor set layout can use a static size.
pub const MAX_TEXTURE_COUNT: u32 = 2000;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// The side of the texture cache a cell reports load/unload transitions
/// to. Implemented by the registry; tests substitute probes.
pub(crate) trait TextureCacheBackend: Send + Sync {
    fn load(&self, id: LocalId<Texture>) -> Result<()>;
    fn unload(&self, id: LocalId<Texture>);
}

/// Reference-counting cache cell of one texture. The count crossing
/// 0 -> 1 loads the device data, 1 -> 0 unloads it.
pub struct TextureCell {
    id: LocalId<Texture>,
    device_index: u32,
    ref_count: Mutex<u32>,
    registry: Weak<dyn TextureCacheBackend>,
}

impl TextureCell {
    pub(crate) fn new(
        id: LocalId<Texture>,
        device_index: u32,
        registry: Weak<dyn TextureCacheBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            device_index,
            ref_count: Mutex::new(0),
            registry,
        })
    }

    fn inc(&self) -> Result<()> {
        let mut count = self.ref_count.lock();
        *count += 1;
        if *count == 1 {
            if let Some(registry) = self.registry.upgrade() {
                if let Err(err) = registry.load(self.id) {
                    *count = 0;
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    fn dec(&self) {
        let mut count = self.ref_count.lock();
        debug_assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            if let Some(registry) = self.registry.upgrade() {
                registry.unload(self.id);
            }
        }
    }

    pub fn ref_count(&self) -> u32 {
        *self.ref_count.lock()
    }
}

/// Shared reference to a texture's cache cell. Copying the handle bumps
/// the cell's count; dropping it releases the reference.
pub struct TextureHandle {
    cell: Arc<TextureCell>,
}

impl TextureHandle {
    pub(crate) fn acquire(cell: Arc<TextureCell>) -> Result<Self> {
        cell.inc()?;
        Ok(Self { cell })
    }

    #[cfg(test)]
    pub(crate) fn detached(device_index: u32) -> Self {
        let cell = Arc::new(TextureCell {
            id: LocalId::NONE,
            device_index,
            ref_count: Mutex::new(1),
            registry: Weak::<TextureRegistry>::new(),
        });
        Self { cell }
    }

    /// Index of this texture in the global texture descriptor array.
    pub fn device_index(&self) -> u32 {
        self.cell.device_index
    }

    pub fn ref_count(&self) -> u32 {
        self.cell.ref_count()
    }
}

impl Clone for TextureHandle {
    fn clone(&self) -> Self {
        // A live handle means the count is at least one, so this inc can
        // never trigger a load.
        self.cell.inc().expect("ref count was zero on a live handle");
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl Drop for TextureHandle {
    fn drop(&mut self) {
        self.cell.dec();
    }
}

impl std::fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TextureHandle(index {}, refs {})",
            self.cell.device_index,
            self.cell.ref_count()
        )
    }
}

struct TextureSlot {
    source: Box<dyn AssetSource<Texture>>,
    cell: Arc<TextureCell>,
    device_data: Option<Image>,
}

struct PendingUpload {
    staging: Buffer,
    image: vk::Image,
    mip_levels: u32,
    regions: Vec<vk::BufferImageCopy>,
}

#[derive(Default)]
struct TextureState {
    ids: IdPool,
    slots: SparseVec<TextureSlot>,
    uploads: Vec<PendingUpload>,
    retired_staging: Vec<Buffer>,
    // Two lists so loads triggered during recording do not alias the
    // writes currently being flushed.
    current_writes: Vec<DescriptorUpdate>,
    submitted_writes: Vec<DescriptorUpdate>,
    next_device_index: u32,
}

/// Lazily loading owner of texture images. Device data is created on
/// first handle acquisition and dropped when the last handle goes away.
pub struct TextureRegistry {
    device: Arc<Device>,
    sampler: vk::Sampler,
    state: Mutex<TextureState>,
    self_weak: Weak<TextureRegistry>,
}

impl TextureRegistry {
    pub fn new(device: &Arc<Device>) -> Result<Arc<Self>> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE)
            .build();
        let sampler = unsafe { device.get().create_sampler(&sampler_info, None) }
            .map_err(torch_backend::BackendError::from)?;

        Ok(Arc::new_cyclic(|self_weak| Self {
            device: device.clone(),
            sampler,
            state: Mutex::default(),
            self_weak: self_weak.clone(),
        }))
    }
}

impl Drop for TextureRegistry {
    fn drop(&mut self) {
        unsafe { self.device.get().destroy_sampler(self.sampler, None) };
    }
}

impl TextureCacheBackend for TextureRegistry {
    /// Creates the image and queues both the pixel upload and the
    /// descriptor write. Runs under the state lock so the descriptor
    /// entry can only be observed after the load completed.
    fn load(&self, id: LocalId<Texture>) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let slot = state.slots.get_mut(id.index()).ok_or(Error::InvalidLocalId {
            ty: Texture::type_name(),
            id: id.value(),
        })?;
        if slot.device_data.is_some() {
            return Ok(());
        }

        let data = slot.source.load()?;
        let image = Image::new(
            &self.device,
            ImageCreateDesc::texture(TEXTURE_FORMAT, [data.width, data.height])
                .mip_levels(data.mips.len() as u32),
        )?;

        let total_size = data.mips.iter().map(|mip| mip.len()).sum::<usize>();
        let mut staging = Buffer::new(
            &self.device,
            BufferCreateDesc::upload(total_size).usage(vk::BufferUsageFlags::TRANSFER_SRC),
        )?;
        let mut regions = Vec::with_capacity(data.mips.len());
        let mut offset = 0u64;
        for (level, mip) in data.mips.iter().enumerate() {
            staging.write_bytes(offset, mip)?;
            regions.push(
                vk::BufferImageCopy::builder()
                    .buffer_offset(offset)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level as u32,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width: (data.width >> level).max(1),
                        height: (data.height >> level).max(1),
                        depth: 1,
                    })
                    .build(),
            );
            offset += mip.len() as u64;
        }

        state.uploads.push(PendingUpload {
            staging,
            image: image.as_vk(),
            mip_levels: data.mips.len() as u32,
            regions,
        });
        state.current_writes.push(DescriptorUpdate::Image {
            binding: TEXTURE_ARRAY_BINDING,
            array_index: slot.cell.device_index,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            info: vk::DescriptorImageInfo {
                sampler: self.sampler,
                image_view: image.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        });
        slot.device_data = Some(image);

        Ok(())
    }

    fn unload(&self, id: LocalId<Texture>) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(id.index()) {
            slot.device_data = None;
        }
    }
}

impl AnyRegistryModule for TextureRegistry {
    fn update(&self, device: &Device, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        state.retired_staging.clear();
        let uploads = mem::take(&mut state.uploads);
        drop(state);

        for upload in &uploads {
            let range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: upload.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            };
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(upload.image)
                .subresource_range(range)
                .build();
            let to_sampled = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(upload.image)
                .subresource_range(range)
                .build();
            unsafe {
                device.get().cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                device.get().cmd_copy_buffer_to_image(
                    cmd,
                    upload.staging.as_vk(),
                    upload.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &upload.regions,
                );
                device.get().cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_sampled],
                );
            }
        }

        let mut state = self.state.lock();
        state
            .retired_staging
            .extend(uploads.into_iter().map(|upload| upload.staging));

        Ok(())
    }

    fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding> {
        vec![DescriptorBinding {
            binding: TEXTURE_ARRAY_BINDING,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: MAX_TEXTURE_COUNT,
            stages: vk::ShaderStageFlags::ALL,
        }]
    }

    /// Swaps the write lists. Correct for two frames in flight; callers
    /// with deeper pipelining must call this once per frame.
    fn descriptor_updates(&self) -> Vec<DescriptorUpdate> {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.submitted_writes.clear();
        mem::swap(&mut state.current_writes, &mut state.submitted_writes);
        state.submitted_writes.clone()
    }
}

impl RegistryModule<Texture> for TextureRegistry {
    fn add(&self, source: Box<dyn AssetSource<Texture>>) -> Result<LocalId<Texture>> {
        let mut state = self.state.lock();
        if state.slots.len() as u32 >= MAX_TEXTURE_COUNT {
            return Err(Error::ModuleFull {
                ty: Texture::type_name(),
                limit: MAX_TEXTURE_COUNT,
            });
        }

        let id = state.ids.generate_id();
        let device_index = state.next_device_index;
        state.next_device_index += 1;

        let registry: Weak<dyn TextureCacheBackend> = self.self_weak.clone();
        let cell = TextureCell::new(id, device_index, registry);
        state.slots.insert(
            id.index(),
            TextureSlot {
                source,
                cell,
                device_data: None,
            },
        );

        Ok(id)
    }

    fn remove(&self, id: LocalId<Texture>) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state.slots.remove(id.index()).ok_or(Error::InvalidLocalId {
            ty: Texture::type_name(),
            id: id.value(),
        })?;
        state.ids.free_id(id);
        // The cell lock must not be taken while the state lock is held;
        // a concurrent handle acquisition takes them the other way round.
        drop(state);

        let refs = slot.cell.ref_count();
        if refs > 0 {
            warn!(
                "Texture {} removed while {} handles are still alive",
                id.value(),
                refs
            );
        }

        Ok(())
    }

    fn handle(&self, id: LocalId<Texture>) -> Result<TextureHandle> {
        let cell = {
            let state = self.state.lock();
            state
                .slots
                .get(id.index())
                .ok_or(Error::InvalidLocalId {
                    ty: Texture::type_name(),
                    id: id.value(),
                })?
                .cell
                .clone()
        };
        // The state lock is released here; acquiring may trigger a load
        // which takes it again.
        TextureHandle::acquire(cell)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Weak};

    use parking_lot::Mutex;

    use super::{TextureCacheBackend, TextureCell, TextureHandle};
    use crate::{Error, LocalId, Result, Texture};

    #[derive(Default)]
    struct Probe {
        loads: Mutex<u32>,
        unloads: Mutex<u32>,
        fail_load: bool,
    }

    impl TextureCacheBackend for Probe {
        fn load(&self, id: LocalId<Texture>) -> Result<()> {
            if self.fail_load {
                return Err(Error::InvalidLocalId {
                    ty: "torch_tex",
                    id: id.value(),
                });
            }
            *self.loads.lock() += 1;
            Ok(())
        }

        fn unload(&self, _id: LocalId<Texture>) {
            *self.unloads.lock() += 1;
        }
    }

    fn probe_cell(probe: &Arc<Probe>) -> Arc<TextureCell> {
        let weak: Weak<dyn TextureCacheBackend> = Arc::downgrade(probe) as Weak<dyn TextureCacheBackend>;
        TextureCell::new(LocalId::new(0), 7, weak)
    }

    #[test]
    fn first_acquire_loads_last_drop_unloads() {
        let probe = Arc::new(Probe::default());
        let cell = probe_cell(&probe);

        let handle = TextureHandle::acquire(cell.clone()).unwrap();
        assert_eq!(1, *probe.loads.lock());
        assert_eq!(1, handle.ref_count());
        assert_eq!(7, handle.device_index());

        let copies = vec![handle.clone(), handle.clone(), handle.clone()];
        assert_eq!(4, handle.ref_count());
        assert_eq!(1, *probe.loads.lock());

        drop(copies);
        assert_eq!(1, handle.ref_count());
        assert_eq!(0, *probe.unloads.lock());

        drop(handle);
        assert_eq!(0, cell.ref_count());
        assert_eq!(1, *probe.unloads.lock());

        // Re-acquiring loads again.
        let handle = TextureHandle::acquire(cell.clone()).unwrap();
        assert_eq!(2, *probe.loads.lock());
        drop(handle);
        assert_eq!(2, *probe.unloads.lock());
    }

    #[test]
    fn failed_load_leaves_the_count_at_zero() {
        let probe = Arc::new(Probe {
            fail_load: true,
            ..Default::default()
        });
        let cell = probe_cell(&probe);

        assert!(TextureHandle::acquire(cell.clone()).is_err());
        assert_eq!(0, cell.ref_count());
        assert_eq!(0, *probe.unloads.lock());
    }

    #[test]
    fn detached_handles_count_without_a_registry() {
        let handle = TextureHandle::detached(3);
        assert_eq!(3, handle.device_index());
        assert_eq!(1, handle.ref_count());
        let copy = handle.clone();
        assert_eq!(2, copy.ref_count());
        drop(handle);
        assert_eq!(1, copy.ref_count());
    }
}
