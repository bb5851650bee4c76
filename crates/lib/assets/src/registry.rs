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
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use ash::vk;
use torch_backend::Device;

use crate::{Asset, AssetSource, Error, LocalId, Result};

// Binding slots of the global asset descriptor set. Fixed so that shader
// code can refer to them without reflection.
pub const GEOMETRY_VERTEX_BINDING: u32 = 0;
pub const GEOMETRY_INDEX_BINDING: u32 = 1;
pub const MATERIAL_BUFFER_BINDING: u32 = 2;
pub const TEXTURE_ARRAY_BINDING: u32 = 3;
pub const ANIMATION_META_BINDING: u32 = 4;
pub const ANIMATION_DATA_BINDING: u32 = 5;

/// One binding of the global asset descriptor set, as reported by a
/// registry module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// A pending write into the global asset descriptor set.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorUpdate {
    Image {
        binding: u32,
        array_index: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    Buffer {
        binding: u32,
        array_index: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
}

/// Type-erased part of the registry module contract; shared by every
/// asset type.
pub trait AnyRegistryModule: Send + Sync + 'static {
    /// Flush staged device work into `cmd`. Descriptor updates produced by
    /// `add` become visible to the next `update`, never to a frame already
    /// recorded.
    fn update(&self, device: &Device, cmd: vk::CommandBuffer) -> Result<()>;

    fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding>;

    fn descriptor_updates(&self) -> Vec<DescriptorUpdate>;
}

/// Typed part of the registry module contract for asset type `A`. A
/// module exclusively owns the device resources of its type; ids are
/// recycled after `remove`.
pub trait RegistryModule<A: Asset>: AnyRegistryModule {
    fn add(&self, source: Box<dyn AssetSource<A>>) -> Result<LocalId<A>>;
    fn remove(&self, id: LocalId<A>) -> Result<()>;
    fn handle(&self, id: LocalId<A>) -> Result<A::Handle>;
}

struct ModuleSlot {
    typed: Box<dyn Any + Send + Sync>,
    shared: Arc<dyn AnyRegistryModule>,
}

struct RegistryDescriptors {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl Drop for RegistryDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.get().destroy_descriptor_pool(self.pool, None);
            self.device
                .get()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Container of the per-type registry modules and owner of the global
/// asset descriptor set that reflects all of them.
#[derive(Default)]
pub struct AssetRegistry {
    modules: HashMap<TypeId, ModuleSlot>,
    order: Vec<TypeId>,
    descriptors: Option<RegistryDescriptors>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module<A: Asset, M: RegistryModule<A>>(&mut self, module: Arc<M>) {
        let key = TypeId::of::<A>();
        assert!(
            !self.modules.contains_key(&key),
            "Registry module for {} is already registered",
            A::type_name()
        );
        self.order.push(key);
        self.modules.insert(
            key,
            ModuleSlot {
                typed: Box::new(module.clone() as Arc<dyn RegistryModule<A>>),
                shared: module,
            },
        );
    }

    pub fn module<A: Asset>(&self) -> Result<&Arc<dyn RegistryModule<A>>> {
        self.modules
            .get(&TypeId::of::<A>())
            .and_then(|slot| slot.typed.downcast_ref::<Arc<dyn RegistryModule<A>>>())
            .ok_or(Error::NoModule(A::type_name()))
    }

    pub fn add<A: Asset>(&self, source: Box<dyn AssetSource<A>>) -> Result<LocalId<A>> {
        self.module::<A>()?.add(source)
    }

    pub fn remove<A: Asset>(&self, id: LocalId<A>) -> Result<()> {
        self.module::<A>()?.remove(id)
    }

    pub fn handle<A: Asset>(&self, id: LocalId<A>) -> Result<A::Handle> {
        self.module::<A>()?.handle(id)
    }

    /// All layout bindings of the global descriptor set, in module
    /// registration order.
    pub fn descriptor_layout_bindings(&self) -> Vec<DescriptorBinding> {
        self.order
            .iter()
            .flat_map(|key| self.modules[key].shared.descriptor_layout_bindings())
            .collect()
    }

    /// Create the descriptor set layout, pool and set covering every
    /// registered module. Must be called after all modules are registered.
    pub fn init_descriptors(&mut self, device: &Arc<Device>) -> Result<()> {
        let bindings = self.descriptor_layout_bindings();
        let vk_bindings = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect::<Vec<_>>();
        let flags = bindings
            .iter()
            .map(|binding| {
                if binding.count > 1 {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect::<Vec<_>>();
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&flags)
            .build();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&vk_bindings)
            .push_next(&mut flags_info)
            .build();
        let layout = unsafe {
            device
                .get()
                .create_descriptor_set_layout(&layout_info, None)
        }
        .map_err(torch_backend::BackendError::from)?;

        let mut pool_sizes = HashMap::new();
        for binding in &bindings {
            *pool_sizes.entry(binding.ty).or_insert(0u32) += binding.count;
        }
        let pool_sizes = pool_sizes
            .into_iter()
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            })
            .collect::<Vec<_>>();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes)
            .build();
        let pool = unsafe { device.get().create_descriptor_pool(&pool_info, None) }
            .map_err(torch_backend::BackendError::from)?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts)
            .build();
        let set = unsafe { device.get().allocate_descriptor_sets(&alloc_info) }
            .map_err(torch_backend::BackendError::from)?[0];

        self.descriptors = Some(RegistryDescriptors {
            device: device.clone(),
            layout,
            pool,
            set,
        });

        Ok(())
    }

    pub fn descriptor_set_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.descriptors.as_ref().map(|d| d.layout)
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptors.as_ref().map(|d| d.set)
    }

    /// Run every module's per-frame update and flush the descriptor
    /// writes they produced since the last call.
    pub fn update(&self, device: &Device, cmd: vk::CommandBuffer) -> Result<()> {
        let mut updates = Vec::new();
        for key in &self.order {
            let module = &self.modules[key].shared;
            module.update(device, cmd)?;
            updates.extend(module.descriptor_updates());
        }

        let Some(descriptors) = &self.descriptors else {
            return Ok(());
        };
        if updates.is_empty() {
            return Ok(());
        }

        let writes = updates
            .iter()
            .map(|update| match update {
                DescriptorUpdate::Image {
                    binding,
                    array_index,
                    ty,
                    info,
                } => vk::WriteDescriptorSet::builder()
                    .dst_set(descriptors.set)
                    .dst_binding(*binding)
                    .dst_array_element(*array_index)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
                    .build(),
                DescriptorUpdate::Buffer {
                    binding,
                    array_index,
                    ty,
                    info,
                } => vk::WriteDescriptorSet::builder()
                    .dst_set(descriptors.set)
                    .dst_binding(*binding)
                    .dst_array_element(*array_index)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
            })
            .collect::<Vec<_>>();
        unsafe { device.get().update_descriptor_sets(&writes, &[]) };

        Ok(())
    }
}
