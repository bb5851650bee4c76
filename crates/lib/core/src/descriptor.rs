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

use std::{collections::HashMap, sync::Arc};

use ash::vk;
use parking_lot::RwLock;
use smol_str::SmolStr;
use torch_backend::Device;
use torch_common::{Id, IdPool, SparseVec};

use crate::{Error, Result};

/// Pipelines reference descriptors by name, never by set index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorName(SmolStr);

impl DescriptorName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DescriptorName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for DescriptorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub enum DescriptorTag {}

/// Small integer equivalent of a descriptor name. Exists so command
/// recording does not hash strings; there is no semantic difference.
pub type DescriptorId = Id<DescriptorTag>;

/// Binds a concrete descriptor set during command recording.
pub trait DescriptorProvider: Send + Sync {
    fn bind(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
    );
}

/// Provider for descriptors whose set is fixed after creation.
pub struct StaticSetProvider {
    set: vk::DescriptorSet,
}

impl StaticSetProvider {
    pub fn new(set: vk::DescriptorSet) -> Arc<Self> {
        Arc::new(Self { set })
    }
}

impl DescriptorProvider for StaticSetProvider {
    fn bind(
        &self,
        device: &Device,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
    ) {
        unsafe {
            device.get().cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                layout,
                set_index,
                &[self.set],
                &[],
            )
        };
    }
}

#[derive(Default)]
struct DescriptorState {
    ids: IdPool,
    ids_per_name: HashMap<DescriptorName, DescriptorId>,
    layouts: SparseVec<vk::DescriptorSetLayout>,
    providers: SparseVec<Arc<dyn DescriptorProvider>>,
}

/// Name -> id -> layout/provider dictionary. A descriptor is *defined*
/// when its set layout is known and *provided* once a runtime provider is
/// attached; pipeline layout creation needs the former, binding the
/// latter.
///
/// Concurrent lookups are safe once the last `define_descriptor` has
/// happened; `provide_descriptor` takes the write lock.
#[derive(Default)]
pub struct DescriptorRegistry {
    state: RwLock<DescriptorState>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor's set layout under `name`. The id issued for
    /// a name never changes; re-defining a name is an error.
    pub fn define_descriptor(
        &self,
        name: impl Into<DescriptorName>,
        layout: vk::DescriptorSetLayout,
    ) -> Result<DescriptorId> {
        let name = name.into();
        let mut state = self.state.write();
        let id = match state.ids_per_name.get(&name) {
            Some(&id) => id,
            None => {
                let id = state.ids.generate_id();
                state.ids_per_name.insert(name.clone(), id);
                id
            }
        };
        if state.layouts.contains(id.index()) {
            return Err(Error::DuplicateDescriptor(name.to_string()));
        }
        state.layouts.insert(id.index(), layout);

        Ok(id)
    }

    /// Attach the runtime provider for a defined descriptor.
    pub fn provide_descriptor(
        &self,
        name: impl Into<DescriptorName>,
        provider: Arc<dyn DescriptorProvider>,
    ) -> Result<()> {
        let name = name.into();
        let mut state = self.state.write();
        let id = *state
            .ids_per_name
            .get(&name)
            .ok_or_else(|| Error::DescriptorUndefined(name.to_string()))?;
        state.providers.insert(id.index(), provider);

        Ok(())
    }

    pub fn descriptor_id(&self, name: &DescriptorName) -> Result<DescriptorId> {
        self.state
            .read()
            .ids_per_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::DescriptorUndefined(name.to_string()))
    }

    pub fn descriptor_layout(&self, name: &DescriptorName) -> Result<vk::DescriptorSetLayout> {
        let state = self.state.read();
        let id = state
            .ids_per_name
            .get(name)
            .ok_or_else(|| Error::DescriptorUndefined(name.to_string()))?;
        state
            .layouts
            .get(id.index())
            .copied()
            .ok_or_else(|| Error::DescriptorUndefined(name.to_string()))
    }

    /// The provider attached to a descriptor, for command recording.
    pub fn provider(&self, id: DescriptorId) -> Result<Arc<dyn DescriptorProvider>> {
        self.state
            .read()
            .providers
            .get(id.index())
            .cloned()
            .ok_or_else(|| Error::DescriptorUnprovided(format!("#{}", id)))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ash::vk::{self, Handle};

    use super::{DescriptorName, DescriptorRegistry, StaticSetProvider};
    use crate::Error;

    fn layout(value: u64) -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(value)
    }

    #[test]
    fn id_for_a_name_is_stable() {
        let registry = DescriptorRegistry::new();
        let id = registry.define_descriptor("camera", layout(1)).unwrap();
        assert_eq!(id, registry.descriptor_id(&DescriptorName::new("camera")).unwrap());
        assert_eq!(
            layout(1),
            registry
                .descriptor_layout(&DescriptorName::new("camera"))
                .unwrap()
        );
    }

    #[test]
    fn redefinition_is_rejected() {
        let registry = DescriptorRegistry::new();
        registry.define_descriptor("camera", layout(1)).unwrap();
        assert!(matches!(
            registry.define_descriptor("camera", layout(2)),
            Err(Error::DuplicateDescriptor(_))
        ));
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let registry = DescriptorRegistry::new();
        let a = registry.define_descriptor("camera", layout(1)).unwrap();
        let b = registry.define_descriptor("assets", layout(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn providing_an_undefined_descriptor_fails() {
        let registry = DescriptorRegistry::new();
        let provider = StaticSetProvider::new(vk::DescriptorSet::null());
        assert!(matches!(
            registry.provide_descriptor("ghost", provider),
            Err(Error::DescriptorUndefined(_))
        ));
    }

    #[test]
    fn unprovided_descriptor_cannot_be_bound() {
        let registry = DescriptorRegistry::new();
        let id = registry.define_descriptor("camera", layout(1)).unwrap();
        assert!(matches!(
            registry.provider(id),
            Err(Error::DescriptorUnprovided(_))
        ));

        registry
            .provide_descriptor("camera", StaticSetProvider::new(vk::DescriptorSet::null()))
            .unwrap();
        let provider = registry.provider(id);
        assert!(provider.is_ok());
        let _: Arc<_> = provider.unwrap();
    }
}
