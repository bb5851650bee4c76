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

mod buffer;
mod device;
mod image;

use ash::vk;

pub use buffer::*;
pub use device::*;
pub use image::*;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocation(#[from] gpu_alloc::AllocationError),
    #[error("Memory mapping failed: {0}")]
    MemoryMap(#[from] gpu_alloc::MapError),
    #[error("Invalid SPIR-V binary")]
    InvalidSpirv,
}

pub type BackendResult<T> = Result<T, BackendError>;

pub trait AsVulkan<T> {
    fn as_vk(&self) -> T;
}
