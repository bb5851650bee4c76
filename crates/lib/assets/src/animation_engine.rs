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

use parking_lot::Mutex;
use smol_str::SmolStr;
use torch_common::{Id, IdPool};

use crate::AnimationHandle;

pub const NO_ANIMATION: u32 = u32::MAX;

/// Per-drawable animation state in the layout the shaders consume.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationDeviceData {
    /// Buffer index of the playing animation, or [`NO_ANIMATION`].
    pub current_animation: u32,
    pub keyframes: [u32; 2],
    pub keyframe_weight: f32,
}

impl Default for AnimationDeviceData {
    fn default() -> Self {
        Self {
            current_animation: NO_ANIMATION,
            keyframes: [0, 0],
            keyframe_weight: 0.0,
        }
    }
}

/// Flat slot storage for POD values that are written every frame and read
/// by whoever uploads them to the GPU. Slots come from a free list.
pub struct ExternalStorage<T: Copy + Default> {
    state: Mutex<ExternalStorageState<T>>,
}

struct ExternalStorageState<T> {
    ids: IdPool,
    slots: Vec<T>,
}

impl<T: Copy + Default> Default for ExternalStorage<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(ExternalStorageState {
                ids: IdPool::new(),
                slots: Vec::new(),
            }),
        }
    }
}

impl<T: Copy + Default> ExternalStorage<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocate(&self) -> Id<T> {
        let mut state = self.state.lock();
        let id: Id<T> = state.ids.generate_id();
        if id.index() >= state.slots.len() {
            state.slots.resize(id.index() + 1, T::default());
        }
        state.slots[id.index()] = T::default();
        id
    }

    pub fn free(&self, id: Id<T>) {
        let mut state = self.state.lock();
        state.slots[id.index()] = T::default();
        state.ids.free_id(id);
    }

    pub fn set(&self, id: Id<T>, value: T) {
        self.state.lock().slots[id.index()] = value;
    }

    pub fn get(&self, id: Id<T>) -> T {
        self.state.lock().slots[id.index()]
    }

    /// Copy of all slots, for the uploader.
    pub fn snapshot(&self) -> Vec<T> {
        self.state.lock().slots.clone()
    }
}

/// Advances a two-keyframe interpolation for one drawable and publishes
/// the state into its external-storage slot. The set of playable
/// animations comes from the drawable's rig.
pub struct AnimationEngine {
    storage: Arc<ExternalStorage<AnimationDeviceData>>,
    slot: Id<AnimationDeviceData>,
    animations: Vec<(SmolStr, AnimationHandle)>,
    current: Option<usize>,
    time_ms: f32,
}

impl AnimationEngine {
    pub fn new(
        storage: Arc<ExternalStorage<AnimationDeviceData>>,
        animations: Vec<(SmolStr, AnimationHandle)>,
    ) -> Self {
        let slot = storage.allocate();
        Self {
            storage,
            slot,
            animations,
            current: None,
            time_ms: 0.0,
        }
    }

    /// Start playing the animation at `index` in the rig's list.
    pub fn play(&mut self, index: usize) -> bool {
        if index < self.animations.len() {
            self.current = Some(index);
            self.time_ms = 0.0;
            true
        } else {
            false
        }
    }

    pub fn play_by_name(&mut self, name: &str) -> bool {
        match self.animations.iter().position(|(n, _)| n == name) {
            Some(index) => self.play(index),
            None => false,
        }
    }

    pub fn stop(&mut self) {
        self.current = None;
        self.time_ms = 0.0;
        self.storage.set(self.slot, AnimationDeviceData::default());
    }

    /// Advance by `dt_ms` and write the interpolation state to the slot.
    pub fn update(&mut self, dt_ms: f32) {
        let Some(index) = self.current else {
            return;
        };
        let animation = &self.animations[index].1;
        let duration = animation.duration_ms();
        if duration <= 0.0 {
            return;
        }

        self.time_ms = (self.time_ms + dt_ms) % duration;
        let frame = self.time_ms / animation.frame_time_ms();
        let first = frame as u32 % animation.frame_count();
        let second = (first + 1) % animation.frame_count();
        let weight = frame.fract();

        self.storage.set(
            self.slot,
            AnimationDeviceData {
                current_animation: animation.buffer_index(),
                keyframes: [first, second],
                keyframe_weight: weight,
            },
        );
    }

    /// Slot of this drawable's state in the external storage.
    pub fn state_id(&self) -> Id<AnimationDeviceData> {
        self.slot
    }
}

impl Drop for AnimationEngine {
    fn drop(&mut self) {
        self.storage.free(self.slot);
    }
}

#[cfg(test)]
mod test {
    use smol_str::SmolStr;

    use super::{AnimationDeviceData, AnimationEngine, ExternalStorage, NO_ANIMATION};
    use crate::AnimationHandle;

    fn walk() -> AnimationHandle {
        AnimationHandle::test_handle(0, 3, 10.0)
    }

    #[test]
    fn storage_slots_are_recycled() {
        let storage = ExternalStorage::<u32>::new();
        let a = storage.allocate();
        let b = storage.allocate();
        storage.set(a, 10);
        storage.set(b, 20);
        assert_eq!(10, storage.get(a));
        assert_eq!(20, storage.get(b));

        storage.free(a);
        let c = storage.allocate();
        assert_eq!(a, c);
        assert_eq!(0, storage.get(c));
    }

    #[test]
    fn update_interpolates_between_two_keyframes() {
        let storage = ExternalStorage::new();
        let mut engine =
            AnimationEngine::new(storage.clone(), vec![(SmolStr::new("walk"), walk())]);
        let slot = engine.state_id();

        assert_eq!(NO_ANIMATION, storage.get(slot).current_animation);
        assert!(engine.play_by_name("walk"));
        assert!(!engine.play_by_name("run"));

        engine.update(5.0);
        let state = storage.get(slot);
        assert_eq!([0, 1], state.keyframes);
        assert!((state.keyframe_weight - 0.5).abs() < 1e-5);

        engine.update(10.0);
        let state = storage.get(slot);
        assert_eq!([1, 2], state.keyframes);

        // Wraps around at the end of the animation.
        engine.update(20.0);
        let state = storage.get(slot);
        assert_eq!([0, 1], state.keyframes);
        assert!((state.keyframe_weight - 0.5).abs() < 1e-5);
    }

    #[test]
    fn stop_resets_the_slot() {
        let storage = ExternalStorage::new();
        let mut engine =
            AnimationEngine::new(storage.clone(), vec![(SmolStr::new("walk"), walk())]);
        let slot = engine.state_id();
        engine.play(0);
        engine.update(5.0);
        engine.stop();
        assert_eq!(AnimationDeviceData::default(), storage.get(slot));
    }
}
