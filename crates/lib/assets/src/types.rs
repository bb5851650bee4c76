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

use std::hash::{Hash, Hasher};

use smol_str::SmolStr;
use speedy::{Readable, Writable};
use torch_common::Pathlet;

use crate::Serializable;

/// A logical path to an asset inside the asset storage.
pub type AssetPath = Pathlet;

/// Static description of an asset type. Marker types implement this; the
/// data and handle types hang off it.
pub trait Asset: Send + Sync + 'static {
    /// The host-side payload stored and serialized for this asset type.
    type Data: Serializable + Clone + Send + Sync + 'static;

    /// The value handed out by this type's registry module. Handles are
    /// cheap to clone and never own device memory.
    type Handle: Clone + Send + Sync + 'static;

    /// Stable name used in stored metadata. Must be unique per type.
    fn type_name() -> &'static str;
}

/// Runtime tag for an asset type. Equality is name-based.
#[derive(Debug, Clone, Eq)]
pub struct AssetType {
    name: SmolStr,
}

impl AssetType {
    pub fn of<A: Asset>() -> Self {
        Self {
            name: SmolStr::new_static(A::type_name()),
        }
    }

    pub fn from_name(name: impl AsRef<str>) -> Self {
        Self {
            name: SmolStr::new(name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is<A: Asset>(&self) -> bool {
        self.name == A::type_name()
    }
}

impl PartialEq for AssetType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for AssetType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Metadata shared by every asset, stored next to the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetMetadata {
    pub name: String,
    pub ty: AssetType,
    pub path: Option<AssetPath>,
}

/// Wire form of [`AssetMetadata`].
#[derive(Debug, Readable, Writable)]
pub(crate) struct MetadataRecord {
    pub name: String,
    pub type_name: String,
    pub path: Option<String>,
}

impl From<&AssetMetadata> for MetadataRecord {
    fn from(meta: &AssetMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            type_name: meta.ty.name().to_string(),
            path: meta.path.as_ref().map(|p| p.as_str().to_string()),
        }
    }
}

impl MetadataRecord {
    pub fn into_metadata(self) -> Option<AssetMetadata> {
        let path = match self.path {
            Some(raw) => Some(Pathlet::new(raw).ok()?),
            None => None,
        };
        Some(AssetMetadata {
            name: self.name,
            ty: AssetType::from_name(self.type_name),
            path,
        })
    }
}

pub struct Geometry;
pub struct Texture;
pub struct Material;
pub struct Rig;
pub struct Animation;

impl Asset for Geometry {
    type Data = GeometryData;
    type Handle = crate::GeometryHandle;

    fn type_name() -> &'static str {
        "torch_geo"
    }
}

impl Asset for Texture {
    type Data = TextureData;
    type Handle = crate::TextureHandle;

    fn type_name() -> &'static str {
        "torch_tex"
    }
}

impl Asset for Material {
    type Data = MaterialData;
    type Handle = crate::MaterialHandle;

    fn type_name() -> &'static str {
        "torch_mat"
    }
}

impl Asset for Rig {
    type Data = RigData;
    type Handle = crate::RigHandle;

    fn type_name() -> &'static str {
        "torch_rig"
    }
}

impl Asset for Animation {
    type Data = AnimationData;
    type Handle = crate::AnimationHandle;

    fn type_name() -> &'static str {
        "torch_anim"
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Per-vertex skinning attributes, present only for rigged geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct SkinnedVertex {
    pub bone_indices: [u32; 4],
    pub bone_weights: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexType {
    #[default]
    Static,
    Skinned,
}

#[derive(Debug, Clone, PartialEq, Default, Readable, Writable)]
pub struct GeometryData {
    pub vertices: Vec<Vertex>,
    /// One entry per vertex when the geometry is skinned, empty otherwise.
    pub skin: Vec<SkinnedVertex>,
    pub indices: Vec<u32>,
    /// Storage path of the rig this geometry is bound to.
    pub rig: Option<String>,
}

impl GeometryData {
    pub fn vertex_type(&self) -> VertexType {
        if self.skin.is_empty() {
            VertexType::Static
        } else {
            VertexType::Skinned
        }
    }

    /// An axis-aligned plane in the xz-plane, segmented into a grid.
    pub fn plane(width: f32, depth: f32, x_segments: u32, z_segments: u32) -> Self {
        assert!(x_segments > 0 && z_segments > 0);
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for z in 0..=z_segments {
            for x in 0..=x_segments {
                let u = x as f32 / x_segments as f32;
                let v = z as f32 / z_segments as f32;
                vertices.push(Vertex {
                    position: [(u - 0.5) * width, 0.0, (v - 0.5) * depth],
                    normal: [0.0, 1.0, 0.0],
                    uv: [u, v],
                });
            }
        }
        let stride = x_segments + 1;
        for z in 0..z_segments {
            for x in 0..x_segments {
                let base = z * stride + x;
                indices.extend_from_slice(&[
                    base,
                    base + stride,
                    base + 1,
                    base + 1,
                    base + stride,
                    base + stride + 1,
                ]);
            }
        }

        Self {
            vertices,
            skin: Vec::new(),
            indices,
            rig: None,
        }
    }
}

/// RGBA8 image payload, tightly packed, one entry per mip level.
#[derive(Debug, Clone, PartialEq, Default, Readable, Writable)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub mips: Vec<Vec<u8>>,
}

impl TextureData {
    pub fn solid_color(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (0..width * height).flat_map(|_| rgba).collect::<Vec<_>>();
        Self {
            width,
            height,
            mips: vec![pixels],
        }
    }
}

/// Material parameters in their device layout. This struct is copied into
/// the material buffer verbatim.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Readable, Writable)]
pub struct MaterialData {
    pub color: [f32; 4],
    pub emissive: [f32; 4],
    pub specular_rate: f32,
    pub roughness: f32,
    pub metallicness: f32,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct Bone {
    pub name: String,
    pub parent: u32,
    /// Column-major inverse bind pose.
    pub inverse_bind_pose: [f32; 16],
}

impl Bone {
    pub fn inverse_bind_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from_cols_array(&self.inverse_bind_pose)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Readable, Writable)]
pub struct RigData {
    pub name: String,
    pub bones: Vec<Bone>,
    /// Storage paths of the animations attached to this rig.
    pub animations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Readable, Writable)]
pub struct AnimationData {
    pub name: String,
    pub frame_count: u32,
    pub bone_count: u32,
    pub frame_time_ms: f32,
    /// Column-major bone matrices, `frame_count * bone_count` entries.
    pub keyframes: Vec<[f32; 16]>,
}

impl AnimationData {
    pub fn duration_ms(&self) -> f32 {
        self.frame_count as f32 * self.frame_time_ms
    }

    pub fn keyframe_matrix(&self, frame: u32, bone: u32) -> Option<glam::Mat4> {
        if bone >= self.bone_count {
            return None;
        }
        self.keyframes
            .get((frame * self.bone_count + bone) as usize)
            .map(glam::Mat4::from_cols_array)
    }
}

#[cfg(test)]
mod test {
    use super::{Asset, AssetType, Geometry, GeometryData, Texture, VertexType};

    #[test]
    fn type_equality_is_name_based() {
        assert_eq!(AssetType::of::<Geometry>(), AssetType::from_name("torch_geo"));
        assert_ne!(AssetType::of::<Geometry>(), AssetType::of::<Texture>());
        assert!(AssetType::from_name(Geometry::type_name()).is::<Geometry>());
    }

    #[test]
    fn plane_counts() {
        let plane = GeometryData::plane(1.0, 1.0, 1, 1);
        assert_eq!(4, plane.vertices.len());
        assert_eq!(6, plane.indices.len());
        assert_eq!(VertexType::Static, plane.vertex_type());

        let plane = GeometryData::plane(2.0, 2.0, 2, 3);
        assert_eq!(3 * 4, plane.vertices.len());
        assert_eq!(2 * 3 * 6, plane.indices.len());
    }
}
