//! KHM decoder.
//!
//! The decoder is IO-free: it operates on an in-memory byte slice. Sections are read
//! strictly in file order (header, bones, helpers, mesh, animation, animation mask) and
//! any short read aborts the whole decode.

use crate::geometry::{mat4_from_rows, swap_yz, swizzle_mat4, swizzle_quat, swizzle_vec3};
use crate::ids::{MAX_NODE_ID, clamp_id};
use crate::{
    Aabb, Animation, AnimationMask, AnimationMaskEntry, AnimationNode, CollisionKind,
    CollisionMesh, CollisionPolygon, CollisionShape, CollisionType, Error, KHM_MAX_OBJECT_NAME,
    KHM_SIGNATURE, KHM_VERSION, Mesh, Model, Node, NodeTransform, Result, SkinWeights,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::{Mat4, Quat, Vec2, Vec3};

#[derive(Clone, Debug)]
pub(crate) struct BinaryInput<'a> {
    bytes: &'a [u8],
    cursor: usize,
    /// Section being read, for diagnostics.
    section: &'static str,
}

impl<'a> BinaryInput<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            cursor: 0,
            section: "header",
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    pub(crate) fn offset(&self) -> usize {
        self.cursor
    }

    fn enter(&mut self, section: &'static str) {
        self.section = section;
        tracing::debug!(section, offset = self.cursor, "reading section");
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::UnexpectedEof {
                context: self.section,
                offset: self.cursor,
                needed: len,
            });
        }
        let out = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Signed 32-bit element count.
    fn read_count(&mut self, context: &'static str) -> Result<usize> {
        let value = self.read_i32()?;
        usize::try_from(value).map_err(|_| Error::InvalidCount {
            context,
            value: value as i64,
        })
    }

    /// Capacity hint that a corrupt count cannot turn into a huge allocation.
    fn capacity(&self, count: usize, element_size: usize) -> usize {
        count.min(self.remaining() / element_size.max(1))
    }

    fn read_vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub(crate) fn read_swizzled_vec3(&mut self) -> Result<Vec3> {
        Ok(swizzle_vec3(self.read_vec3()?))
    }

    pub(crate) fn read_quat(&mut self) -> Result<Quat> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        let z = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(swizzle_quat(Quat::from_xyzw(x, y, z, w)))
    }

    pub(crate) fn read_mat4(&mut self) -> Result<Mat4> {
        let bytes = self.take(64)?;
        let mut rows = [0f32; 16];
        LittleEndian::read_f32_into(bytes, &mut rows);
        Ok(swizzle_mat4(mat4_from_rows(&rows)))
    }

    /// Fixed 48-byte name; everything from the first NUL on is padding.
    pub(crate) fn read_name(&mut self) -> Result<String> {
        let offset = self.cursor;
        let field = self.take(KHM_MAX_OBJECT_NAME)?;
        let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let s = std::str::from_utf8(&field[..len]).map_err(|e| Error::InvalidName {
            offset,
            message: format!("invalid utf-8: {e}; bytes=[{}]", hex_preview(field)),
        })?;
        Ok(s.to_string())
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

impl Model {
    /// Decodes a complete `.khm` file.
    ///
    /// Fails on a foreign signature, a version other than [`KHM_VERSION`], a truncated
    /// section, or an animation whose start time is not zero. No partial model is
    /// returned.
    pub fn from_khm_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = BinaryInput::new(bytes);
        read_header(&mut input)?;

        input.enter("bones");
        let bones = read_nodes(&mut input)?;
        input.enter("helpers");
        let helpers = read_nodes(&mut input)?;
        input.enter("mesh");
        let mesh = read_mesh(&mut input)?;
        input.enter("animation");
        let animation = read_animation(&mut input)?;
        input.enter("animation mask");
        let animation_mask = read_animation_mask(&mut input)?;

        if input.remaining() > 0 {
            tracing::warn!(
                offset = input.offset(),
                trailing = input.remaining(),
                "ignoring trailing bytes after the last KHM section"
            );
        }

        Ok(Self {
            bones,
            helpers,
            mesh,
            animation,
            animation_mask,
        })
    }

    /// Reads and decodes a `.khm` file from disk.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_khm_bytes(&bytes)
    }
}

fn read_header(input: &mut BinaryInput<'_>) -> Result<()> {
    let signature = input.take(4)?;
    if signature != KHM_SIGNATURE {
        let mut found = [0u8; 4];
        found.copy_from_slice(signature);
        return Err(Error::BadSignature { found });
    }
    let version = input.read_u32()?;
    if version != KHM_VERSION {
        return Err(Error::VersionMismatch {
            found: version,
            expected: KHM_VERSION,
        });
    }
    Ok(())
}

fn read_nodes(input: &mut BinaryInput<'_>) -> Result<Vec<Node>> {
    let count = input.read_u8()? as usize;
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(read_node(input, false)?);
    }
    Ok(nodes)
}

fn read_node(input: &mut BinaryInput<'_>, clamp: bool) -> Result<Node> {
    let name = input.read_name()?;
    let raw_id = input.read_i32()?;
    let raw_parent = input.read_i32()?;
    let local = input.read_mat4()?;
    let global = input.read_mat4()?;

    let id = u32::try_from(raw_id).map_err(|_| Error::InvalidValue {
        message: format!("negative id {raw_id} for node '{name}'"),
    })?;
    // Any negative parent is a root; writers use -1.
    let parent_id = u32::try_from(raw_parent).ok();

    let (id, parent_id) = if clamp {
        if id > MAX_NODE_ID || parent_id.is_some_and(|p| p > MAX_NODE_ID) {
            tracing::warn!(
                node = %name,
                id,
                parent_id = ?parent_id,
                "clamping out-of-range node ids to {MAX_NODE_ID}"
            );
        }
        (clamp_id(id), parent_id.map(clamp_id))
    } else {
        (id, parent_id)
    };

    Ok(Node {
        name,
        id,
        parent_id,
        local,
        global,
    })
}

fn read_mesh(input: &mut BinaryInput<'_>) -> Result<Option<Mesh>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let node = read_node(input, true)?;
    let mut mesh = Mesh::new(node);
    read_geometry(input, &mut mesh)?;
    Ok(Some(mesh))
}

fn read_geometry(input: &mut BinaryInput<'_>, mesh: &mut Mesh) -> Result<()> {
    let vertex_count = input.read_count("vertex")?;
    mesh.positions = read_swizzled_vec3s(input, vertex_count)?;
    mesh.normals = read_swizzled_vec3s(input, vertex_count)?;

    let index_count = input.read_count("index")?;
    let mut indices = Vec::with_capacity(input.capacity(index_count, 2));
    for _ in 0..index_count {
        indices.push(input.read_u16()?);
    }
    mesh.indices = indices;
    mesh.face_normals = read_swizzled_vec3s(input, index_count / 3)?;

    if input.read_bool()? {
        let mut colors = Vec::with_capacity(input.capacity(vertex_count, 4));
        for _ in 0..vertex_count {
            let c = input.take(4)?;
            colors.push([c[0], c[1], c[2], c[3]]);
        }
        mesh.colors = Some(colors);
    }

    let uv_map_count = input.read_u32()? as usize;
    let mut uv_maps = Vec::with_capacity(uv_map_count.min(8));
    for _ in 0..uv_map_count {
        let mut uvs = Vec::with_capacity(input.capacity(vertex_count, 8));
        for _ in 0..vertex_count {
            let uv = input.read_vec2()?;
            uvs.push(Vec2::new(uv.x, 1.0 - uv.y));
        }
        uv_maps.push(uvs);
    }
    mesh.uv_maps = uv_maps;

    if input.read_bool()? {
        let mut skin = Vec::with_capacity(input.capacity(vertex_count, 20));
        for _ in 0..vertex_count {
            let mut weights = [0f32; 4];
            LittleEndian::read_f32_into(input.take(16)?, &mut weights);
            skin.push(SkinWeights {
                bones: [0; 4],
                weights,
            });
        }
        for slot in skin.iter_mut() {
            slot.bones.copy_from_slice(input.take(4)?);
        }
        mesh.skin = Some(skin);
    }

    input.enter("collisions");
    let collision_count = input.read_count("collision")?;
    let mut collisions = Vec::with_capacity(input.capacity(collision_count, 68));
    for _ in 0..collision_count {
        collisions.push(read_collision(input)?);
    }
    mesh.collisions = collisions;

    input.enter("bounds");
    let min = swap_yz(input.read_vec3()?);
    let max = swap_yz(input.read_vec3()?);
    mesh.bounds = Aabb { min, max };
    Ok(())
}

fn read_swizzled_vec3s(input: &mut BinaryInput<'_>, count: usize) -> Result<Vec<Vec3>> {
    let mut out = Vec::with_capacity(input.capacity(count, 12));
    for _ in 0..count {
        out.push(input.read_swizzled_vec3()?);
    }
    Ok(out)
}

fn read_collision(input: &mut BinaryInput<'_>) -> Result<CollisionShape> {
    let code = input.read_u32()?;
    let transform = input.read_mat4()?;
    let kind = match CollisionType::from_code(code) {
        Some(CollisionType::Sphere) => CollisionKind::Sphere {
            radius: input.read_f32()?,
        },
        Some(CollisionType::Box) => CollisionKind::Box {
            half_extents: input.read_swizzled_vec3()?,
        },
        Some(CollisionType::Capsule) => CollisionKind::Capsule {
            radius: input.read_f32()?,
            half_height: input.read_f32()?,
        },
        Some(CollisionType::ConvexMesh) => CollisionKind::ConvexMesh(read_collision_mesh(input)?),
        Some(CollisionType::Mesh | CollisionType::Plane) => {
            return Err(Error::UnsupportedCollisionType { kind: code });
        }
        None => return Err(Error::UnknownCollisionType { kind: code }),
    };
    Ok(CollisionShape { transform, kind })
}

fn read_collision_mesh(input: &mut BinaryInput<'_>) -> Result<CollisionMesh> {
    let polygon_count = input.read_count("collision polygon")?;
    let mut polygons = Vec::with_capacity(input.capacity(polygon_count, 20));
    for _ in 0..polygon_count {
        polygons.push(CollisionPolygon {
            normal: input.read_swizzled_vec3()?,
            d: input.read_f32()?,
            index_count: input.read_u16()?,
            index_start: input.read_u16()?,
        });
    }

    let index_count = input.read_count("collision index")?;
    let mut indices = Vec::with_capacity(input.capacity(index_count, 2));
    for _ in 0..index_count {
        indices.push(input.read_u16()?);
    }

    let vertex_count = input.read_count("collision vertex")?;
    let vertices = read_swizzled_vec3s(input, vertex_count)?;

    Ok(CollisionMesh {
        polygons,
        indices,
        vertices,
    })
}

fn read_animation(input: &mut BinaryInput<'_>) -> Result<Option<Animation>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let node_count = input.read_count("animation node")?;
    let start_time = input.read_f32()?;
    let end_time = input.read_f32()?;
    let frame_count = input.read_count("animation frame")?;
    if start_time != 0.0 {
        return Err(Error::NonZeroAnimationStart { start_time });
    }

    let mut nodes = Vec::with_capacity(input.capacity(node_count, 52));
    for _ in 0..node_count {
        let id = input.read_u32()?;
        let name = input.read_name()?;
        nodes.push(AnimationNode { id, name });
    }

    let transform_count =
        node_count
            .checked_mul(frame_count)
            .ok_or(Error::InvalidCount {
                context: "animation transform",
                value: i64::MAX,
            })?;
    let mut transforms = Vec::with_capacity(input.capacity(transform_count, 40));
    for _ in 0..transform_count {
        transforms.push(NodeTransform {
            rotation: input.read_quat()?,
            translation: input.read_swizzled_vec3()?,
            scale: input.read_vec3()?,
        });
    }

    Ok(Some(Animation {
        nodes,
        start_time,
        end_time,
        frame_count: frame_count as u32,
        transforms,
    }))
}

fn read_animation_mask(input: &mut BinaryInput<'_>) -> Result<Option<AnimationMask>> {
    if !input.read_bool()? {
        return Ok(None);
    }
    let count = input.read_u32()? as usize;
    let mut entries = Vec::with_capacity(input.capacity(count, 52));
    for _ in 0..count {
        let name = input.read_name()?;
        let masked = input.read_i32()? != 0;
        entries.push(AnimationMaskEntry { name, masked });
    }
    Ok(Some(AnimationMask { entries }))
}

#[cfg(test)]
mod tests {
    use super::BinaryInput;
    use crate::Error;

    #[test]
    fn name_stops_at_first_nul() {
        let mut bytes = vec![0u8; 48];
        bytes[..4].copy_from_slice(b"Hips");
        bytes[10..13].copy_from_slice(b"xyz");
        let mut input = BinaryInput::new(&bytes);
        assert_eq!(input.read_name().expect("name"), "Hips");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn name_filling_the_whole_field_is_accepted() {
        let bytes = vec![b'a'; 48];
        let mut input = BinaryInput::new(&bytes);
        assert_eq!(input.read_name().expect("name").len(), 48);
    }

    #[test]
    fn invalid_utf8_name_reports_offset() {
        let mut bytes = vec![0u8; 48];
        bytes[0] = 0xff;
        let mut input = BinaryInput::new(&bytes);
        match input.read_name() {
            Err(Error::InvalidName { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("expected InvalidName, got {other:?}"),
        }
    }

    #[test]
    fn short_read_does_not_advance() {
        let bytes = [1u8, 2, 3];
        let mut input = BinaryInput::new(&bytes);
        assert!(matches!(
            input.read_u32(),
            Err(Error::UnexpectedEof { needed: 4, offset: 0, .. })
        ));
        assert_eq!(input.remaining(), 3);
        assert_eq!(input.read_u16().expect("u16"), 0x0201);
    }
}
