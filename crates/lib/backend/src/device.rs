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

use std::sync::Arc;

use ash::vk;
use gpu_alloc::{Config, Dedicated, GpuAllocator, MemoryBlock, Request, UsageFlags};
use gpu_alloc_ash::AshMemoryDevice;
use parking_lot::Mutex;

use crate::{BackendError, BackendResult};

pub type GpuMemory = MemoryBlock<vk::DeviceMemory>;

/// Owner of the logical device and its memory allocator. Everything above
/// this crate talks to Vulkan through it; the instance, physical device
/// selection and queues live with the caller.
pub struct Device {
    raw: ash::Device,
    allocator: Mutex<GpuAllocator<vk::DeviceMemory>>,
}

impl Device {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        device: ash::Device,
    ) -> BackendResult<Arc<Self>> {
        let props = unsafe {
            gpu_alloc_ash::device_properties(instance, vk::API_VERSION_1_2, pdevice)
        }?;
        let allocator = GpuAllocator::new(Config::i_am_prototyping(), props);

        Ok(Arc::new(Self {
            raw: device,
            allocator: Mutex::new(allocator),
        }))
    }

    pub fn get(&self) -> &ash::Device {
        &self.raw
    }

    pub fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        usage: UsageFlags,
        dedicated: bool,
    ) -> BackendResult<GpuMemory> {
        let request = Request {
            size: requirements.size,
            align_mask: requirements.alignment - 1,
            usage,
            memory_types: requirements.memory_type_bits,
        };
        let mut allocator = self.allocator.lock();
        let memory = unsafe {
            if dedicated {
                allocator.alloc_with_dedicated(
                    AshMemoryDevice::wrap(&self.raw),
                    request,
                    Dedicated::Preferred,
                )
            } else {
                allocator.alloc(AshMemoryDevice::wrap(&self.raw), request)
            }
        }?;

        Ok(memory)
    }

    pub fn deallocate(&self, memory: GpuMemory) {
        unsafe {
            self.allocator
                .lock()
                .dealloc(AshMemoryDevice::wrap(&self.raw), memory)
        };
    }

    /// Create a shader module from SPIR-V words. The words are expected to
    /// start with the SPIR-V magic number.
    pub fn create_shader_module(&self, code: &[u32]) -> BackendResult<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            log::warn!("Rejecting shader module: missing SPIR-V magic number");
            return Err(BackendError::InvalidSpirv);
        }
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code).build();
        Ok(unsafe { self.raw.create_shader_module(&create_info, None) }?)
    }

    pub fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.raw.destroy_shader_module(module, None) };
    }

    pub fn wait_idle(&self) {
        let _ = unsafe { self.raw.device_wait_idle() };
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
            self.allocator
                .lock()
                .cleanup(AshMemoryDevice::wrap(&self.raw));
            self.raw.destroy_device(None);
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}
