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

use crate::{AsVulkan, BackendResult, Device, GpuMemory};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: [u32; 2],
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_elements: u32,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ImageCreateDesc<'a> {
    pub format: vk::Format,
    pub extent: [u32; 2],
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_elements: u32,
    pub name: Option<&'a str>,
}

impl<'a> ImageCreateDesc<'a> {
    /// A sampled 2D texture that receives its contents by transfer.
    pub fn texture(format: vk::Format, extent: [u32; 2]) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            mip_levels: 1,
            array_elements: 1,
            name: None,
        }
    }

    pub fn usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn name(mut self, value: &'a str) -> Self {
        self.name = Some(value);
        self
    }

    fn build(&self) -> vk::ImageCreateInfo {
        vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.extent[0],
                height: self.extent[1],
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(self.array_elements)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build()
    }
}

/// A 2D image with a color view, backed by device-local memory.
#[derive(Debug)]
pub struct Image {
    device: Arc<Device>,
    raw: vk::Image,
    view: vk::ImageView,
    desc: ImageDesc,
    memory: Option<GpuMemory>,
}

impl AsVulkan<vk::Image> for Image {
    fn as_vk(&self) -> vk::Image {
        self.raw
    }
}

impl Image {
    pub fn new(device: &Arc<Device>, desc: ImageCreateDesc) -> BackendResult<Self> {
        let image = unsafe { device.get().create_image(&desc.build(), None) }?;
        let requirements = unsafe { device.get().get_image_memory_requirements(image) };
        let memory = device.allocate(
            requirements,
            gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
            false,
        )?;
        unsafe {
            device
                .get()
                .bind_image_memory(image, *memory.memory(), memory.offset())
        }?;

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_elements,
            })
            .build();
        let view = unsafe { device.get().create_image_view(&view_create_info, None) }?;

        Ok(Self {
            device: device.clone(),
            raw: image,
            view,
            desc: ImageDesc {
                format: desc.format,
                extent: desc.extent,
                usage: desc.usage,
                mip_levels: desc.mip_levels,
                array_elements: desc.array_elements,
            },
            memory: Some(memory),
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn extent(&self) -> [u32; 2] {
        self.desc.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(memory) = self.memory.take() {
            unsafe {
                self.device.get().destroy_image_view(self.view, None);
                self.device.get().destroy_image(self.raw, None);
            }
            self.device.deallocate(memory);
        }
    }
}
