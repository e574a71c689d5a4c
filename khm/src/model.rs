use crate::ids::NodeKind;
use glam::{Mat4, Quat, Vec2, Vec3};
use std::f32::consts::PI;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// A whole KHM asset. Every section is optional; animation-only files carry neither
/// bones nor a mesh.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Model {
    pub bones: Vec<Node>,
    pub helpers: Vec<Node>,
    pub mesh: Option<Mesh>,
    pub animation: Option<Animation>,
    pub animation_mask: Option<AnimationMask>,
}

impl Model {
    /// Looks up a bone, helper, or the mesh node by ID.
    pub fn node_by_id(&self, id: u32) -> Option<&Node> {
        self.nodes().find(|n| n.id == id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes().find(|n| n.name == name)
    }

    /// Bones, then helpers, then the mesh node.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.bones
            .iter()
            .chain(&self.helpers)
            .chain(self.mesh.as_ref().map(|m| &m.node))
    }

    pub fn node_kind(&self, id: u32) -> Option<NodeKind> {
        if self.bones.iter().any(|n| n.id == id) {
            Some(NodeKind::Bone)
        } else if self.helpers.iter().any(|n| n.id == id) {
            Some(NodeKind::Helper)
        } else {
            None
        }
    }
}

/// Shared record for bones, helpers and the mesh object.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Node {
    pub name: String,
    pub id: u32,
    /// `None` is stored as `-1`.
    pub parent_id: Option<u32>,
    /// Relative to the parent.
    pub local: Mat4,
    /// World space.
    pub global: Mat4,
}

impl Node {
    pub fn new(name: impl Into<String>, id: u32, parent_id: Option<u32>) -> Self {
        Self {
            name: name.into(),
            id,
            parent_id,
            local: Mat4::IDENTITY,
            global: Mat4::IDENTITY,
        }
    }

    pub fn with_transforms(mut self, local: Mat4, global: Mat4) -> Self {
        self.local = local;
        self.global = global;
        self
    }
}

/// Up to four (bone ID, weight) influences. Unused slots are zero.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct SkinWeights {
    pub bones: [u8; 4],
    pub weights: [f32; 4],
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn volume(&self) -> f32 {
        let s = self.size();
        s.x * s.y * s.z
    }

    pub(crate) fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Mesh {
    pub node: Node,
    pub positions: Vec<Vec3>,
    /// One per vertex.
    pub normals: Vec<Vec3>,
    /// One per triangle.
    pub face_normals: Vec<Vec3>,
    /// RGBA, one per vertex.
    pub colors: Option<Vec<[u8; 4]>>,
    /// Each map holds one coordinate per vertex; the first map is the primary one.
    pub uv_maps: Vec<Vec<Vec2>>,
    pub indices: Vec<u16>,
    pub skin: Option<Vec<SkinWeights>>,
    pub collisions: Vec<CollisionShape>,
    pub bounds: Aabb,
}

impl Mesh {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            positions: Vec::new(),
            normals: Vec::new(),
            face_normals: Vec::new(),
            colors: None,
            uv_maps: Vec::new(),
            indices: Vec::new(),
            skin: None,
            collisions: Vec::new(),
            bounds: Aabb::default(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Physical volume estimate summed over the collision shapes.
    ///
    /// Triangle-based shapes have no closed form here and contribute the volume of the
    /// mesh bounds instead.
    pub fn volume(&self) -> f32 {
        self.collisions
            .iter()
            .map(|c| c.kind.volume().unwrap_or_else(|| self.bounds.volume()))
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct CollisionShape {
    /// Relative to the mesh.
    pub transform: Mat4,
    pub kind: CollisionKind,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum CollisionKind {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// Elongated along the shape's local X axis; a zero half-height is a sphere.
    Capsule { radius: f32, half_height: f32 },
    ConvexMesh(CollisionMesh),
}

impl CollisionKind {
    /// Type code stored in front of the payload.
    pub fn type_code(&self) -> u32 {
        match self {
            Self::Sphere { .. } => CollisionType::Sphere as u32,
            Self::Box { .. } => CollisionType::Box as u32,
            Self::Capsule { .. } => CollisionType::Capsule as u32,
            Self::ConvexMesh(_) => CollisionType::ConvexMesh as u32,
        }
    }

    /// `None` for triangle-based shapes.
    pub fn volume(&self) -> Option<f32> {
        match *self {
            Self::Sphere { radius } => Some(sphere_volume(radius)),
            Self::Box { half_extents } => {
                let e = half_extents.abs() * 2.0;
                Some(e.x * e.y * e.z)
            }
            Self::Capsule {
                radius,
                half_height,
            } => Some(PI * radius * radius * 2.0 * half_height.max(0.0) + sphere_volume(radius)),
            Self::ConvexMesh(_) => None,
        }
    }
}

fn sphere_volume(radius: f32) -> f32 {
    4.0 / 3.0 * PI * radius.abs().powi(3)
}

/// On-disk collision type codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum CollisionType {
    Sphere = 0,
    Box = 1,
    Capsule = 2,
    ConvexMesh = 3,
    /// Reserved; no payload layout is defined.
    Mesh = 4,
    /// Reserved; no payload layout is defined.
    Plane = 5,
}

impl CollisionType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Sphere,
            1 => Self::Box,
            2 => Self::Capsule,
            3 => Self::ConvexMesh,
            4 => Self::Mesh,
            5 => Self::Plane,
            _ => return None,
        })
    }
}

/// Triangle soup that the game cooks into a convex hull at load time.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct CollisionMesh {
    pub polygons: Vec<CollisionPolygon>,
    pub indices: Vec<u16>,
    pub vertices: Vec<Vec3>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct CollisionPolygon {
    pub normal: Vec3,
    /// Plane equation `dot(normal, p) + d = 0`.
    pub d: f32,
    pub index_count: u16,
    pub index_start: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct AnimationNode {
    pub id: u32,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct NodeTransform {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: Vec3,
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Baked animation: one transform per node per frame.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Animation {
    pub nodes: Vec<AnimationNode>,
    /// Seconds. Always `0.0` in loadable files.
    pub start_time: f32,
    /// Seconds.
    pub end_time: f32,
    pub frame_count: u32,
    /// Node-major: `transforms[node * frame_count + frame]`.
    pub transforms: Vec<NodeTransform>,
}

impl Animation {
    /// Builds an animation sampled at a fixed frame duration, starting at time zero.
    pub fn from_samples(
        nodes: Vec<AnimationNode>,
        frame_duration_ms: f32,
        frame_count: u32,
        transforms: Vec<NodeTransform>,
    ) -> Self {
        let end_time = frame_count.saturating_sub(1) as f32 * frame_duration_ms / 1000.0;
        Self {
            nodes,
            start_time: 0.0,
            end_time,
            frame_count,
            transforms,
        }
    }

    /// Single-frame animations report the whole clip length as their frame duration.
    pub fn frame_duration_ms(&self) -> f32 {
        let intervals = self.frame_count.saturating_sub(1).max(1);
        self.end_time * 1000.0 / intervals as f32
    }

    pub fn transform(&self, node_index: usize, frame: usize) -> Option<&NodeTransform> {
        if frame >= self.frame_count as usize {
            return None;
        }
        let index = node_index
            .checked_mul(self.frame_count as usize)?
            .checked_add(frame)?;
        self.transforms.get(index)
    }

    /// All frames of one node.
    pub fn track(&self, node_index: usize) -> Option<&[NodeTransform]> {
        let frames = self.frame_count as usize;
        let start = node_index.checked_mul(frames)?;
        self.transforms.get(start..start.checked_add(frames)?)
    }

    pub(crate) fn expected_transform_count(&self) -> usize {
        self.nodes.len() * self.frame_count as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct AnimationMaskEntry {
    pub name: String,
    pub masked: bool,
}

/// Selects which bones an animation clip drives.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct AnimationMask {
    pub entries: Vec<AnimationMaskEntry>,
}

impl AnimationMask {
    /// One entry per bone name, masked when it appears in `selected`.
    pub fn from_selection<'a>(
        names: impl IntoIterator<Item = &'a str>,
        selected: &[&str],
    ) -> Self {
        Self {
            entries: names
                .into_iter()
                .map(|name| AnimationMaskEntry {
                    name: name.to_string(),
                    masked: selected.contains(&name),
                })
                .collect(),
        }
    }

    pub fn is_masked(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.masked && e.name == name)
    }
}
