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
use parking_lot::Mutex;
use torch_backend::Device;
use torch_common::{IdPool, SparseVec};

use crate::{
    Animation, AnyRegistryModule, Asset, AssetSource, Bone, DescriptorBinding, DescriptorUpdate,
    Error, LocalId, RegistryModule, Result, Rig, TypedAssetId,
};

struct RigSlot {
    name: String,
    bones: Vec<Bone>,
    bone_names: HashMap<String, u32>,
    animation_paths: Vec<String>,
    // Filled in once the referenced animations have been created.
    animations: Mutex<Vec<TypedAssetId<Animation>>>,
}

/// View of one rig's bone metadata and attached animations.
#[derive(Clone)]
pub struct RigHandle {
    slot: Arc<RigSlot>,
}

impl RigHandle {
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    pub fn bone_count(&self) -> u32 {
        self.slot.bones.len() as u32
    }

    pub fn bone(&self, index: u32) -> Option<&Bone> {
        self.slot.bones.get(index as usize)
    }

    pub fn bone_by_name(&self, name: &str) -> Option<&Bone> {
        let index = *self.slot.bone_names.get(name)?;
        self.slot.bones.get(index as usize)
    }

    /// Storage paths of the animations this rig was authored with.
    pub fn animation_paths(&self) -> &[String] {
        &self.slot.animation_paths
    }

    pub fn animation_count(&self) -> u32 {
        self.slot.animations.lock().len() as u32
    }

    /// The attached animation at `index`. The rig decides which
    /// animations are legal for drawables using it.
    pub fn animation(&self, index: u32) -> Option<TypedAssetId<Animation>> {
        self.slot.animations.lock().get(index as usize).copied()
    }
}

impl std::fmt::Debug for RigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RigHandle({})", self.slot.name)
    }
}

#[derive(Default)]
struct RigState {
    ids: IdPool,
    slots: SparseVec<Arc<RigSlot>>,
}

/// Host-side storage of rig data. Owns no device resources.
#[derive(Default)]
pub struct RigRegistry {
    state: Mutex<RigState>,
}

impl RigRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a created animation asset to a rig. Usually called after
    /// the rig's animation paths have been resolved through the manager.
    pub fn attach_animation(
        &self,
        rig: LocalId<Rig>,
        animation: TypedAssetId<Animation>,
    ) -> Result<()> {
        let state = self.state.lock();
        let slot = state.slots.get(rig.index()).ok_or(Error::InvalidLocalId {
            ty: Rig::type_name(),
            id: rig.value(),
        })?;
        slot.animations.lock().push(animation);

        Ok(())
    }
}

impl AnyRegistryModule for RigRegistry {
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

impl RegistryModule<Rig> for RigRegistry {
    fn add(&self, source: Box<dyn AssetSource<Rig>>) -> Result<LocalId<Rig>> {
        let data = source.load()?;
        let bone_names = data
            .bones
            .iter()
            .enumerate()
            .map(|(index, bone)| (bone.name.clone(), index as u32))
            .collect();
        let slot = Arc::new(RigSlot {
            name: data.name,
            bones: data.bones,
            bone_names,
            animation_paths: data.animations,
            animations: Mutex::new(Vec::new()),
        });

        let mut state = self.state.lock();
        let id = state.ids.generate_id();
        state.slots.insert(id.index(), slot);

        Ok(id)
    }

    fn remove(&self, id: LocalId<Rig>) -> Result<()> {
        let mut state = self.state.lock();
        state.slots.remove(id.index()).ok_or(Error::InvalidLocalId {
            ty: Rig::type_name(),
            id: id.value(),
        })?;
        state.ids.free_id(id);

        Ok(())
    }

    fn handle(&self, id: LocalId<Rig>) -> Result<RigHandle> {
        let state = self.state.lock();
        let slot = state.slots.get(id.index()).ok_or(Error::InvalidLocalId {
            ty: Rig::type_name(),
            id: id.value(),
        })?;

        Ok(RigHandle { slot: slot.clone() })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        Asset, AssetSource, Bone, InMemorySource, RegistryModule, Rig, RigData, RigRegistry,
    };

    fn test_rig() -> Box<dyn AssetSource<Rig>> {
        Box::new(InMemorySource::<Rig>::new(
            "biped",
            RigData {
                name: "biped".into(),
                bones: vec![
                    Bone {
                        name: "root".into(),
                        parent: u32::MAX,
                        inverse_bind_pose: [0.0; 16],
                    },
                    Bone {
                        name: "spine".into(),
                        parent: 0,
                        inverse_bind_pose: [0.0; 16],
                    },
                ],
                animations: vec!["anims/walk".into()],
            },
        ))
    }

    #[test]
    fn bones_are_queryable_by_name() {
        let registry = RigRegistry::new();
        let id = registry.add(test_rig()).unwrap();
        let handle = registry.handle(id).unwrap();

        assert_eq!("biped", handle.name());
        assert_eq!(2, handle.bone_count());
        assert_eq!(0, handle.bone_by_name("spine").unwrap().parent);
        assert!(handle.bone_by_name("tail").is_none());
        assert_eq!(&["anims/walk".to_string()], handle.animation_paths());
    }

    #[test]
    fn removed_rig_is_gone() {
        let registry = RigRegistry::new();
        let id = registry.add(test_rig()).unwrap();
        registry.remove(id).unwrap();
        assert!(registry.handle(id).is_err());
        assert!(registry.remove(id).is_err());
    }
}
