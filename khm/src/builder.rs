//! Export-side model assembly.
//!
//! The authoring host walks its scene and hands over plain data: skeleton nodes,
//! per-triangle corner attributes, vertex group names and collision proxies. This module
//! turns that into a [`Model`]: IDs are assigned, corners are deduplicated into a 16-bit
//! indexed vertex buffer, and named vertex groups are remapped onto bone IDs.

use crate::ids::{ForestNode, IdAssignment, MAX_NODE_ID, NodeKind, assign_ids, clamp_id};
use crate::{
    Aabb, Animation, AnimationNode, CollisionKind, CollisionShape, Error,
    KHM_MAX_BONE_INFLUENCES, Mesh, Model, Node, NodeTransform, Result, SkinWeights,
};
use glam::{Mat4, Vec2, Vec3};
use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Height correction between the cylinder proxy used in the authoring tool and the
/// capsule stored on disk.
pub const CAPSULE_PROXY_HEIGHT_OFFSET: f32 = 0.2488;

/// Largest vertex buffer a 16-bit index list can address.
pub const MAX_MESH_VERTICES: usize = u16::MAX as usize + 1;

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Marks helper nodes in the host skeleton and helper targets in vertex group names.
    pub helper_prefix: String,
    /// Marks collision proxies, followed by the shape name (`COL_SPHERE`, `COL_BOX.001`).
    pub collision_prefix: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            helper_prefix: "HELPER_".to_string(),
            collision_prefix: "COL_".to_string(),
        }
    }
}

/// Non-fatal problems met while building. Each is also logged once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildReport {
    /// Vertex groups that name neither a bone nor a helper; their weights are dropped.
    pub unmatched_groups: Vec<String>,
    /// Collision proxies that were not exported.
    pub skipped_collisions: Vec<String>,
}

/// A skeleton node as the host sees it. Helpers carry the helper prefix in their name.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub name: String,
    /// Index into the same node list.
    pub parent: Option<usize>,
    pub global: Mat4,
}

#[derive(Clone, Debug, Default)]
pub struct SceneVertex {
    pub position: Vec3,
    pub normal: Vec3,
    /// `(vertex group index, weight)` in host order.
    pub groups: Vec<(usize, f32)>,
}

/// One triangle corner ("loop").
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SceneCorner {
    pub vertex: usize,
    pub uv: Vec2,
    /// Linear RGBA in `0.0..=1.0`.
    pub color: Option<[f32; 4]>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SceneTriangle {
    pub corners: [SceneCorner; 3],
    pub normal: Vec3,
}

/// Collision proxy object; `transform` is relative to the mesh and carries the proxy's
/// scale, which encodes the shape's size.
#[derive(Clone, Debug)]
pub struct CollisionProxy {
    pub name: String,
    pub transform: Mat4,
}

#[derive(Clone, Debug, Default)]
pub struct SceneMesh {
    pub name: String,
    pub local: Mat4,
    pub global: Mat4,
    pub vertices: Vec<SceneVertex>,
    pub triangles: Vec<SceneTriangle>,
    /// Vertex group names, indexed by [`SceneVertex::groups`].
    pub groups: Vec<String>,
    pub collisions: Vec<CollisionProxy>,
}

/// Baked per-frame transforms of one animated node, relative to its parent.
#[derive(Clone, Debug)]
pub struct SceneTrack {
    pub name: String,
    pub frames: Vec<Mat4>,
}

/// Vertex group name to bone/helper ID. Built once per export and never mutated.
#[derive(Clone, Debug, Default)]
pub struct SkinTargets {
    by_name: HashMap<String, u32>,
}

impl SkinTargets {
    /// Bones are addressed by name, helpers by `helper_prefix` + name.
    pub fn new(bones: &[Node], helpers: &[Node], helper_prefix: &str) -> Self {
        let mut by_name = HashMap::with_capacity(bones.len() + helpers.len());
        for bone in bones {
            by_name.insert(bone.name.clone(), bone.id);
        }
        for helper in helpers {
            by_name.insert(format!("{helper_prefix}{}", helper.name), helper.id);
        }
        Self { by_name }
    }

    pub fn get(&self, group: &str) -> Option<u32> {
        self.by_name.get(group).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Turns host skeleton nodes into bone and helper records.
///
/// Nodes whose name starts with the helper prefix become helpers (prefix stripped).
/// IDs follow [`assign_ids`]; local transforms are derived from the parents' globals.
pub fn build_skeleton(
    nodes: &[SceneNode],
    options: &BuildOptions,
) -> (Vec<Node>, Vec<Node>, IdAssignment) {
    let forest: Vec<ForestNode> = nodes
        .iter()
        .map(|n| ForestNode {
            kind: if n.name.starts_with(&options.helper_prefix) {
                NodeKind::Helper
            } else {
                NodeKind::Bone
            },
            parent: n.parent,
        })
        .collect();
    let assignment = assign_ids(&forest);

    let mut bones = Vec::with_capacity(assignment.bone_count);
    let mut helpers = Vec::with_capacity(assignment.helper_count);
    for kind in [NodeKind::Bone, NodeKind::Helper] {
        for (index, node) in nodes.iter().enumerate() {
            if forest[index].kind != kind {
                continue;
            }
            let parent_id = assignment.parents[index];
            let local = match (parent_id, node.parent) {
                (Some(_), Some(parent)) => nodes[parent].global.inverse() * node.global,
                _ => node.global,
            };
            let name = match kind {
                NodeKind::Bone => node.name.clone(),
                NodeKind::Helper => node.name[options.helper_prefix.len()..].to_string(),
            };
            let record = Node {
                name,
                id: assignment.ids[index],
                parent_id,
                local,
                global: node.global,
            };
            match kind {
                NodeKind::Bone => bones.push(record),
                NodeKind::Helper => helpers.push(record),
            }
        }
    }
    (bones, helpers, assignment)
}

/// Maps one vertex's `(group name, weight)` list onto four skin slots.
///
/// Influences keep host order; the first four are kept and the rest dropped, without
/// renormalizing. Unknown group names occupy a slot with bone 0 and weight 0, and are
/// reported once per name through `warned`.
pub fn remap_skin(
    groups: &[(&str, f32)],
    targets: &SkinTargets,
    warned: &mut HashSet<String>,
) -> SkinWeights {
    let mut out = SkinWeights::default();
    for (slot, &(name, weight)) in groups.iter().enumerate() {
        let target = targets.get(name);
        if target.is_none() && warned.insert(name.to_string()) {
            tracing::warn!(
                group = name,
                "vertex group matches no bone or helper, its weights are dropped"
            );
        }
        if slot >= KHM_MAX_BONE_INFLUENCES {
            continue;
        }
        match target {
            Some(id) => {
                if id > MAX_NODE_ID {
                    tracing::warn!(
                        group = name,
                        id,
                        "skin target id does not fit a bone slot, clamping"
                    );
                }
                out.bones[slot] = clamp_id(id) as u8;
                out.weights[slot] = weight;
            }
            None => {
                out.bones[slot] = 0;
                out.weights[slot] = 0.0;
            }
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VertexKey {
    position: [u32; 3],
    uv: [u32; 2],
    normal: [u32; 3],
    color: Option<[u32; 4]>,
    /// Sorted, so the influences compare as a set.
    groups: Vec<(usize, u32)>,
}

impl VertexKey {
    fn new(vertex: &SceneVertex, corner: &SceneCorner) -> Self {
        let mut groups: Vec<(usize, u32)> = vertex
            .groups
            .iter()
            .map(|&(g, w)| (g, w.to_bits()))
            .collect();
        groups.sort_unstable();
        Self {
            position: vertex.position.to_array().map(f32::to_bits),
            uv: corner.uv.to_array().map(f32::to_bits),
            normal: vertex.normal.to_array().map(f32::to_bits),
            color: corner.color.map(|c| c.map(f32::to_bits)),
            groups,
        }
    }
}

/// Output of [`dedup_corners`]: unique `(vertex, corner)` pairs and the index list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DedupedVertices {
    /// `(source vertex index, corner)` of each output vertex, in first-seen order.
    pub vertices: Vec<(usize, SceneCorner)>,
    pub indices: Vec<u16>,
}

/// Collapses triangle corners that agree on position, UV, normal, color and skin
/// influences. Corners that differ in any of these, weighting included, stay distinct.
pub fn dedup_corners(mesh: &SceneMesh) -> Result<DedupedVertices> {
    let mut lookup: HashMap<VertexKey, u16> = HashMap::new();
    let mut out = DedupedVertices {
        vertices: Vec::new(),
        indices: Vec::with_capacity(mesh.triangles.len() * 3),
    };
    for triangle in &mesh.triangles {
        for corner in &triangle.corners {
            let vertex = mesh.vertices.get(corner.vertex).ok_or_else(|| Error::InvalidValue {
                message: format!(
                    "mesh '{}' corner references vertex {} of {}",
                    mesh.name,
                    corner.vertex,
                    mesh.vertices.len()
                ),
            })?;
            let index = match lookup.entry(VertexKey::new(vertex, corner)) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let next = out.vertices.len();
                    if next >= MAX_MESH_VERTICES {
                        return Err(Error::TooManyVertices { count: next + 1 });
                    }
                    out.vertices.push((corner.vertex, *corner));
                    *e.insert(next as u16)
                }
            };
            out.indices.push(index);
        }
    }
    Ok(out)
}

/// Converts collision proxies into shapes and grows the mesh bounds around them.
///
/// Bounds start at the origin and cover each proxy's unit cube; proxies that cannot be
/// exported still contribute to the bounds.
pub fn build_collisions(
    proxies: &[CollisionProxy],
    options: &BuildOptions,
    report: &mut BuildReport,
) -> (Vec<CollisionShape>, Aabb) {
    let mut bounds = Aabb::default();
    let mut shapes = Vec::new();
    for proxy in proxies {
        for corner in UNIT_CUBE_CORNERS {
            bounds.grow(proxy.transform.transform_point3(corner));
        }

        let (scale, rotation, translation) = proxy.transform.to_scale_rotation_translation();
        let transform = Mat4::from_rotation_translation(rotation, translation);
        let shape = proxy.name.strip_prefix(&options.collision_prefix);
        let kind = match shape {
            Some(s) if s.starts_with("SPHERE") => CollisionKind::Sphere { radius: scale.x },
            Some(s) if s.starts_with("BOX") => CollisionKind::Box {
                half_extents: scale,
            },
            Some(s) if s.starts_with("CAPSULE") => CollisionKind::Capsule {
                radius: scale.x,
                half_height: scale.z - CAPSULE_PROXY_HEIGHT_OFFSET,
            },
            _ => {
                tracing::warn!(
                    proxy = %proxy.name,
                    "collision proxy type is not exportable, skipping"
                );
                report.skipped_collisions.push(proxy.name.clone());
                continue;
            }
        };
        shapes.push(CollisionShape { transform, kind });
    }
    (shapes, bounds)
}

const UNIT_CUBE_CORNERS: [Vec3; 8] = [
    Vec3::new(-1.0, -1.0, -1.0),
    Vec3::new(-1.0, -1.0, 1.0),
    Vec3::new(-1.0, 1.0, -1.0),
    Vec3::new(-1.0, 1.0, 1.0),
    Vec3::new(1.0, -1.0, -1.0),
    Vec3::new(1.0, -1.0, 1.0),
    Vec3::new(1.0, 1.0, -1.0),
    Vec3::new(1.0, 1.0, 1.0),
];

/// Builds the mesh record: deduplicated geometry, remapped skin, collisions and bounds.
pub fn build_mesh(
    scene: &SceneMesh,
    id: u32,
    targets: &SkinTargets,
    options: &BuildOptions,
    report: &mut BuildReport,
) -> Result<Mesh> {
    let deduped = dedup_corners(scene)?;
    let mut mesh = Mesh::new(Node {
        name: scene.name.clone(),
        id,
        parent_id: None,
        local: scene.local,
        global: scene.global,
    });

    let has_colors = scene
        .triangles
        .iter()
        .any(|t| t.corners.iter().any(|c| c.color.is_some()));
    let mut uvs = Vec::with_capacity(deduped.vertices.len());
    let mut colors = Vec::new();
    for &(vertex, corner) in &deduped.vertices {
        let source = &scene.vertices[vertex];
        mesh.positions.push(source.position);
        mesh.normals.push(source.normal);
        uvs.push(corner.uv);
        if has_colors {
            colors.push(corner.color.unwrap_or([1.0; 4]).map(color_to_byte));
        }
    }
    mesh.uv_maps = vec![uvs];
    mesh.colors = has_colors.then_some(colors);
    mesh.indices = deduped.indices;
    mesh.face_normals = scene.triangles.iter().map(|t| t.normal).collect();

    if !scene.groups.is_empty() {
        let mut warned = HashSet::new();
        let mut skin = Vec::with_capacity(deduped.vertices.len());
        for &(vertex, _) in &deduped.vertices {
            let labels: Vec<(Cow<'_, str>, f32)> = scene.vertices[vertex]
                .groups
                .iter()
                .map(|&(g, w)| {
                    let name = scene
                        .groups
                        .get(g)
                        .map_or_else(|| Cow::Owned(format!("#{g}")), |n| Cow::Borrowed(n.as_str()));
                    (name, w)
                })
                .collect();
            let names: Vec<(&str, f32)> = labels.iter().map(|(n, w)| (n.as_ref(), *w)).collect();
            skin.push(remap_skin(&names, targets, &mut warned));
        }
        let mut unmatched: Vec<String> = warned.into_iter().collect();
        unmatched.sort();
        report.unmatched_groups.extend(unmatched);
        mesh.skin = Some(skin);
    }

    let (collisions, bounds) = build_collisions(&scene.collisions, options, report);
    mesh.collisions = collisions;
    mesh.bounds = bounds;

    tracing::debug!(
        mesh = %mesh.node.name,
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        collisions = mesh.collisions.len(),
        "built mesh"
    );
    Ok(mesh)
}

fn color_to_byte(c: f32) -> u8 {
    // Truncates like the game's own exporter; `as` saturates out-of-range values.
    (c * 255.0) as u8
}

/// Assembles a model from a host skeleton and an optional mesh. The mesh takes the first
/// ID after the skeleton and is a root.
pub fn build_model(
    skeleton: &[SceneNode],
    mesh: Option<&SceneMesh>,
    options: &BuildOptions,
) -> Result<(Model, BuildReport)> {
    let mut report = BuildReport::default();
    let (bones, helpers, assignment) = build_skeleton(skeleton, options);
    let targets = SkinTargets::new(&bones, &helpers, &options.helper_prefix);
    let mesh = mesh
        .map(|m| build_mesh(m, assignment.next_id(), &targets, options, &mut report))
        .transpose()?;
    Ok((
        Model {
            bones,
            helpers,
            mesh,
            animation: None,
            animation_mask: None,
        },
        report,
    ))
}

/// Bakes per-frame local matrices into an animation. Every track must have the same
/// number of frames; node IDs follow track order.
pub fn bake_animation(tracks: &[SceneTrack], frame_duration_ms: f32) -> Result<Animation> {
    let frame_count = tracks.first().map_or(0, |t| t.frames.len());
    if let Some(track) = tracks.iter().find(|t| t.frames.len() != frame_count) {
        return Err(Error::InvalidValue {
            message: format!(
                "track '{}' has {} frames, expected {frame_count}",
                track.name,
                track.frames.len()
            ),
        });
    }
    let frame_count_u32 = u32::try_from(frame_count).map_err(|_| Error::CountOverflow {
        context: "animation frame",
        count: frame_count,
        max: u32::MAX as usize,
    })?;

    let nodes = tracks
        .iter()
        .enumerate()
        .map(|(id, t)| AnimationNode {
            id: id as u32,
            name: t.name.clone(),
        })
        .collect();
    let transforms = tracks
        .iter()
        .flat_map(|t| t.frames.iter())
        .map(|m| {
            let (scale, rotation, translation) = m.to_scale_rotation_translation();
            NodeTransform {
                rotation,
                translation,
                scale,
            }
        })
        .collect();
    Ok(Animation::from_samples(
        nodes,
        frame_duration_ms,
        frame_count_u32,
        transforms,
    ))
}
