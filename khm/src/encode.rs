//! KHM encoder.
//!
//! Mirrors the decoder section for section. The encoder trusts the model's node graph
//! (dense IDs, parents emitted before children) and only checks what would otherwise
//! produce a file the decoder cannot read back: counts that overflow their fields,
//! per-vertex arrays that disagree with the vertex count, and names that do not fit.

use crate::geometry::{mat4_to_rows, swap_yz, unswizzle_mat4, unswizzle_quat, unswizzle_vec3};
use crate::{
    Animation, AnimationMask, CollisionKind, CollisionMesh, CollisionShape, Error,
    KHM_MAX_OBJECT_NAME, KHM_SIGNATURE, KHM_VERSION, Mesh, Model, Node, Result,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::{Mat4, Quat, Vec2, Vec3};

/// What to do with names that do not fit the fixed 48-byte field.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum NamePolicy {
    /// Cut the name at a UTF-8 boundary so the field still ends with a NUL.
    #[default]
    Truncate,
    /// Fail with [`Error::NameTooLong`].
    Reject,
}

#[derive(Clone, Debug, Default)]
pub struct EncodeOptions {
    pub name_policy: NamePolicy,
}

/// Longest name that still leaves room for the terminating NUL.
pub const MAX_NAME_BYTES: usize = KHM_MAX_OBJECT_NAME - 1;

/// Applies `policy` to `name`, returning the bytes that will be stored.
pub fn fit_name<'a>(name: &'a str, policy: NamePolicy) -> Result<&'a str> {
    if name.len() <= MAX_NAME_BYTES {
        return Ok(name);
    }
    match policy {
        NamePolicy::Reject => Err(Error::NameTooLong {
            name: name.to_string(),
            len: name.len(),
            max: MAX_NAME_BYTES,
        }),
        NamePolicy::Truncate => {
            let mut end = MAX_NAME_BYTES;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            tracing::warn!(name, kept = end, "truncating name to fit a KHM name field");
            Ok(&name[..end])
        }
    }
}

fn u32_count(context: &'static str, count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| Error::CountOverflow {
        context,
        count,
        max: u32::MAX as usize,
    })
}

struct BinaryOutput<'o> {
    out: Vec<u8>,
    options: &'o EncodeOptions,
}

impl BinaryOutput<'_> {
    fn enter(&self, section: &'static str) {
        tracing::debug!(section, offset = self.out.len(), "writing section");
    }

    fn write_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    fn write_u16(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.out.extend_from_slice(&buf);
    }

    fn write_i32(&mut self, v: i32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, v);
        self.out.extend_from_slice(&buf);
    }

    fn write_u32(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.out.extend_from_slice(&buf);
    }

    fn write_f32(&mut self, v: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, v);
        self.out.extend_from_slice(&buf);
    }

    /// Signed 32-bit element count.
    fn write_count(&mut self, context: &'static str, count: usize) -> Result<()> {
        let value = i32::try_from(count).map_err(|_| Error::CountOverflow {
            context,
            count,
            max: i32::MAX as usize,
        })?;
        self.write_i32(value);
        Ok(())
    }

    /// Unsigned 32-bit element count.
    fn write_u32_count(&mut self, context: &'static str, count: usize) -> Result<()> {
        let value = u32_count(context, count)?;
        self.write_u32(value);
        Ok(())
    }

    fn write_vec2(&mut self, v: Vec2) {
        self.write_f32(v.x);
        self.write_f32(v.y);
    }

    fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    fn write_swizzled_vec3(&mut self, v: Vec3) {
        self.write_vec3(unswizzle_vec3(v));
    }

    fn write_quat(&mut self, q: Quat) {
        let q = unswizzle_quat(q);
        self.write_f32(q.x);
        self.write_f32(q.y);
        self.write_f32(q.z);
        self.write_f32(q.w);
    }

    fn write_mat4(&mut self, m: &Mat4) {
        for v in mat4_to_rows(&unswizzle_mat4(*m)) {
            self.write_f32(v);
        }
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        let name = fit_name(name, self.options.name_policy)?;
        self.out.extend_from_slice(name.as_bytes());
        self.out
            .resize(self.out.len() + KHM_MAX_OBJECT_NAME - name.len(), 0);
        Ok(())
    }
}

impl Model {
    /// Encodes with default options (over-long names are truncated).
    pub fn to_khm_bytes(&self) -> Result<Vec<u8>> {
        self.to_khm_bytes_with(&EncodeOptions::default())
    }

    pub fn to_khm_bytes_with(&self, options: &EncodeOptions) -> Result<Vec<u8>> {
        let mut output = BinaryOutput {
            out: Vec::new(),
            options,
        };
        output.out.extend_from_slice(&KHM_SIGNATURE);
        output.write_u32(KHM_VERSION);

        output.enter("bones");
        write_nodes(&mut output, "bone", &self.bones)?;
        output.enter("helpers");
        write_nodes(&mut output, "helper", &self.helpers)?;
        output.enter("mesh");
        write_mesh(&mut output, self.mesh.as_ref())?;
        output.enter("animation");
        write_animation(&mut output, self.animation.as_ref())?;
        output.enter("animation mask");
        write_animation_mask(&mut output, self.animation_mask.as_ref())?;

        Ok(output.out)
    }

    /// Encodes and writes the whole file in one call.
    pub fn save(&self, path: impl AsRef<std::path::Path>, options: &EncodeOptions) -> Result<()> {
        let bytes = self.to_khm_bytes_with(options)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn write_nodes(output: &mut BinaryOutput<'_>, context: &'static str, nodes: &[Node]) -> Result<()> {
    let count = u8::try_from(nodes.len()).map_err(|_| Error::CountOverflow {
        context,
        count: nodes.len(),
        max: u8::MAX as usize,
    })?;
    output.write_u8(count);
    for node in nodes {
        write_node(output, node)?;
    }
    Ok(())
}

fn write_node(output: &mut BinaryOutput<'_>, node: &Node) -> Result<()> {
    output.write_name(&node.name)?;
    output.write_i32(node_id_field(node.id)?);
    output.write_i32(match node.parent_id {
        Some(parent) => node_id_field(parent)?,
        None => -1,
    });
    output.write_mat4(&node.local);
    output.write_mat4(&node.global);
    Ok(())
}

fn node_id_field(id: u32) -> Result<i32> {
    i32::try_from(id).map_err(|_| Error::InvalidValue {
        message: format!("node id {id} does not fit a signed 32-bit field"),
    })
}

fn write_mesh(output: &mut BinaryOutput<'_>, mesh: Option<&Mesh>) -> Result<()> {
    output.write_bool(mesh.is_some());
    let Some(mesh) = mesh else {
        return Ok(());
    };
    write_node(output, &mesh.node)?;
    check_mesh(mesh)?;

    let vertex_count = mesh.vertex_count();
    output.write_count("vertex", vertex_count)?;
    for &p in &mesh.positions {
        output.write_swizzled_vec3(p);
    }
    for &n in &mesh.normals {
        output.write_swizzled_vec3(n);
    }

    output.write_count("index", mesh.indices.len())?;
    for &i in &mesh.indices {
        output.write_u16(i);
    }
    for &n in &mesh.face_normals {
        output.write_swizzled_vec3(n);
    }

    output.write_bool(mesh.colors.is_some());
    if let Some(colors) = &mesh.colors {
        for c in colors {
            output.out.extend_from_slice(c);
        }
    }

    output.write_u32_count("uv map", mesh.uv_maps.len())?;
    for map in &mesh.uv_maps {
        for &uv in map {
            output.write_vec2(Vec2::new(uv.x, 1.0 - uv.y));
        }
    }

    output.write_bool(mesh.skin.is_some());
    if let Some(skin) = &mesh.skin {
        for s in skin {
            for w in s.weights {
                output.write_f32(w);
            }
        }
        for s in skin {
            output.out.extend_from_slice(&s.bones);
        }
    }

    output.enter("collisions");
    output.write_count("collision", mesh.collisions.len())?;
    for shape in &mesh.collisions {
        write_collision(output, shape)?;
    }

    output.enter("bounds");
    output.write_vec3(swap_yz(mesh.bounds.min));
    output.write_vec3(swap_yz(mesh.bounds.max));
    Ok(())
}

fn check_mesh(mesh: &Mesh) -> Result<()> {
    let vertex_count = mesh.vertex_count();
    let mismatch = |what: &str, len: usize| Error::InvalidValue {
        message: format!(
            "mesh '{}' has {vertex_count} vertices but {len} {what}",
            mesh.node.name
        ),
    };
    if mesh.normals.len() != vertex_count {
        return Err(mismatch("normals", mesh.normals.len()));
    }
    if let Some(colors) = &mesh.colors {
        if colors.len() != vertex_count {
            return Err(mismatch("colors", colors.len()));
        }
    }
    if let Some(map) = mesh.uv_maps.iter().find(|m| m.len() != vertex_count) {
        return Err(mismatch("texture coordinates in a UV map", map.len()));
    }
    if let Some(skin) = &mesh.skin {
        if skin.len() != vertex_count {
            return Err(mismatch("skin entries", skin.len()));
        }
    }
    let triangles = mesh.indices.len() / 3;
    if mesh.face_normals.len() != triangles {
        return Err(Error::InvalidValue {
            message: format!(
                "mesh '{}' has {triangles} triangles but {} face normals",
                mesh.node.name,
                mesh.face_normals.len()
            ),
        });
    }
    Ok(())
}

fn write_collision(output: &mut BinaryOutput<'_>, shape: &CollisionShape) -> Result<()> {
    output.write_u32(shape.kind.type_code());
    output.write_mat4(&shape.transform);
    match &shape.kind {
        CollisionKind::Sphere { radius } => output.write_f32(*radius),
        CollisionKind::Box { half_extents } => output.write_swizzled_vec3(*half_extents),
        CollisionKind::Capsule {
            radius,
            half_height,
        } => {
            output.write_f32(*radius);
            output.write_f32(*half_height);
        }
        CollisionKind::ConvexMesh(mesh) => write_collision_mesh(output, mesh)?,
    }
    Ok(())
}

fn write_collision_mesh(output: &mut BinaryOutput<'_>, mesh: &CollisionMesh) -> Result<()> {
    output.write_count("collision polygon", mesh.polygons.len())?;
    for poly in &mesh.polygons {
        output.write_swizzled_vec3(poly.normal);
        output.write_f32(poly.d);
        output.write_u16(poly.index_count);
        output.write_u16(poly.index_start);
    }
    output.write_count("collision index", mesh.indices.len())?;
    for &i in &mesh.indices {
        output.write_u16(i);
    }
    output.write_count("collision vertex", mesh.vertices.len())?;
    for &v in &mesh.vertices {
        output.write_swizzled_vec3(v);
    }
    Ok(())
}

fn write_animation(output: &mut BinaryOutput<'_>, animation: Option<&Animation>) -> Result<()> {
    output.write_bool(animation.is_some());
    let Some(animation) = animation else {
        return Ok(());
    };
    if animation.transforms.len() != animation.expected_transform_count() {
        return Err(Error::InvalidValue {
            message: format!(
                "animation has {} nodes x {} frames but {} transforms",
                animation.nodes.len(),
                animation.frame_count,
                animation.transforms.len()
            ),
        });
    }

    output.write_count("animation node", animation.nodes.len())?;
    output.write_f32(animation.start_time);
    output.write_f32(animation.end_time);
    output.write_count("animation frame", animation.frame_count as usize)?;

    for node in &animation.nodes {
        output.write_u32(node.id);
        output.write_name(&node.name)?;
    }
    for t in &animation.transforms {
        output.write_quat(t.rotation);
        output.write_swizzled_vec3(t.translation);
        output.write_vec3(t.scale);
    }
    Ok(())
}

fn write_animation_mask(output: &mut BinaryOutput<'_>, mask: Option<&AnimationMask>) -> Result<()> {
    output.write_bool(mask.is_some());
    let Some(mask) = mask else {
        return Ok(());
    };
    output.write_u32_count("animation mask", mask.entries.len())?;
    for entry in &mask.entries {
        output.write_name(&entry.name)?;
        output.write_i32(entry.masked as i32);
    }
    Ok(())
}
