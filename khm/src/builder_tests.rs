use crate::builder::{
    BuildOptions, BuildReport, CAPSULE_PROXY_HEIGHT_OFFSET, CollisionProxy, MAX_MESH_VERTICES,
    SceneCorner, SceneMesh, SceneNode, SceneTrack, SceneTriangle, SceneVertex, SkinTargets,
    bake_animation, build_collisions, build_model, build_skeleton, dedup_corners, remap_skin,
};
use crate::{CollisionKind, Error, Model, Node};
use glam::{Mat4, Quat, Vec2, Vec3};
use std::collections::HashSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn assert_approx(a: f32, b: f32, ctx: &str) {
    assert!((a - b).abs() <= 1e-5, "{ctx}: expected {b}, got {a}");
}

fn vertex(x: f32, y: f32, groups: &[(usize, f32)]) -> SceneVertex {
    SceneVertex {
        position: Vec3::new(x, y, 0.0),
        normal: Vec3::Z,
        groups: groups.to_vec(),
    }
}

fn corner(vertex: usize, u: f32, v: f32) -> SceneCorner {
    SceneCorner {
        vertex,
        uv: Vec2::new(u, v),
        color: None,
    }
}

fn triangle(corners: [SceneCorner; 3]) -> SceneTriangle {
    SceneTriangle {
        corners,
        normal: Vec3::Z,
    }
}

/// Two triangles sharing an edge; UVs follow positions, so the shared corners agree.
fn quad() -> SceneMesh {
    SceneMesh {
        name: "Quad".to_string(),
        local: Mat4::IDENTITY,
        global: Mat4::IDENTITY,
        vertices: vec![
            vertex(0.0, 0.0, &[(0, 1.0)]),
            vertex(1.0, 0.0, &[(0, 0.5), (1, 0.5)]),
            vertex(0.0, 1.0, &[(1, 1.0)]),
            vertex(1.0, 1.0, &[(1, 1.0)]),
        ],
        triangles: vec![
            triangle([corner(0, 0.0, 0.0), corner(1, 1.0, 0.0), corner(2, 0.0, 1.0)]),
            triangle([corner(2, 0.0, 1.0), corner(1, 1.0, 0.0), corner(3, 1.0, 1.0)]),
        ],
        groups: vec!["Root".to_string(), "Arm".to_string()],
        collisions: Vec::new(),
    }
}

fn skeleton() -> Vec<SceneNode> {
    vec![
        SceneNode {
            name: "HELPER_Muzzle".to_string(),
            parent: Some(2),
            global: Mat4::from_translation(Vec3::new(2.0, 0.0, 1.0)),
        },
        SceneNode {
            name: "Root".to_string(),
            parent: None,
            global: Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)),
        },
        SceneNode {
            name: "Arm".to_string(),
            parent: Some(1),
            global: Mat4::from_translation(Vec3::new(1.0, 0.0, 1.0)),
        },
    ]
}

fn targets(names: &[&str]) -> SkinTargets {
    let bones: Vec<Node> = names
        .iter()
        .enumerate()
        .map(|(i, n)| Node::new(*n, i as u32, None))
        .collect();
    SkinTargets::new(&bones, &[], "HELPER_")
}

#[test]
fn shared_corners_collapse_into_one_vertex() {
    let deduped = dedup_corners(&quad()).expect("dedup");
    assert_eq!(deduped.vertices.len(), 4);
    assert_eq!(deduped.indices, vec![0, 1, 2, 2, 1, 3]);
    let sources: Vec<usize> = deduped.vertices.iter().map(|(v, _)| *v).collect();
    assert_eq!(sources, vec![0, 1, 2, 3]);
}

#[test]
fn dedup_is_deterministic() {
    let mesh = quad();
    let first = dedup_corners(&mesh).expect("dedup");
    assert_eq!(first, dedup_corners(&mesh).expect("dedup"));
    assert_eq!(first.vertices[3], (3, corner(3, 1.0, 1.0)));
}

#[test]
fn uv_seams_keep_corners_apart() {
    let mut mesh = quad();
    mesh.triangles[1].corners[1].uv = Vec2::new(0.5, 0.0);
    let deduped = dedup_corners(&mesh).expect("dedup");
    assert_eq!(deduped.vertices.len(), 5);
    assert_eq!(deduped.indices, vec![0, 1, 2, 2, 3, 4]);
}

#[test]
fn skin_influences_take_part_in_vertex_identity() {
    let mut mesh = quad();
    // Vertex 4 sits on vertex 1 with a different weighting.
    mesh.vertices.push(vertex(1.0, 0.0, &[(0, 0.25), (1, 0.75)]));
    mesh.triangles[1].corners[1].vertex = 4;
    assert_eq!(dedup_corners(&mesh).expect("dedup").vertices.len(), 5);

    // Same influences listed in another order.
    mesh.vertices[4] = vertex(1.0, 0.0, &[(1, 0.5), (0, 0.5)]);
    let deduped = dedup_corners(&mesh).expect("dedup");
    assert_eq!(deduped.vertices.len(), 4);
    assert_eq!(deduped.indices, vec![0, 1, 2, 2, 1, 3]);
}

#[test]
fn colors_take_part_in_vertex_identity() {
    let mut mesh = quad();
    mesh.triangles[1].corners[1].color = Some([1.0, 0.0, 0.0, 1.0]);
    assert_eq!(dedup_corners(&mesh).expect("dedup").vertices.len(), 5);
}

#[test]
fn corner_outside_the_vertex_list_is_an_error() {
    let mut mesh = quad();
    mesh.triangles[0].corners[2].vertex = 99;
    assert!(matches!(
        dedup_corners(&mesh),
        Err(Error::InvalidValue { .. })
    ));
}

#[test]
fn vertex_buffer_is_limited_to_16_bit_indices() {
    let full = SceneMesh {
        name: "Dense".to_string(),
        vertices: (0..MAX_MESH_VERTICES)
            .map(|i| vertex(i as f32, 0.0, &[]))
            .collect(),
        triangles: (0..MAX_MESH_VERTICES / 3)
            .map(|t| {
                triangle([
                    corner(3 * t, 0.0, 0.0),
                    corner(3 * t + 1, 0.0, 0.0),
                    corner(3 * t + 2, 0.0, 0.0),
                ])
            })
            .chain(std::iter::once(triangle([
                corner(MAX_MESH_VERTICES - 1, 0.0, 0.0),
                corner(0, 0.0, 0.0),
                corner(1, 0.0, 0.0),
            ])))
            .collect(),
        ..SceneMesh::default()
    };
    let deduped = dedup_corners(&full).expect("exactly 65536 vertices fit");
    assert_eq!(deduped.vertices.len(), MAX_MESH_VERTICES);
    assert_eq!(deduped.indices.iter().max(), Some(&u16::MAX));

    let mut over = full;
    over.vertices.push(vertex(-1.0, 0.0, &[]));
    over.triangles.push(triangle([
        corner(MAX_MESH_VERTICES, 0.0, 0.0),
        corner(0, 0.0, 0.0),
        corner(1, 0.0, 0.0),
    ]));
    assert!(matches!(
        dedup_corners(&over),
        Err(Error::TooManyVertices { count: 65537 })
    ));
}

#[test]
fn only_the_first_four_influences_are_kept() {
    let targets = targets(&["a", "b", "c", "d", "e"]);
    let mut warned = HashSet::new();
    let skin = remap_skin(
        &[("e", 0.1), ("d", 0.2), ("c", 0.3), ("b", 0.15), ("a", 0.25)],
        &targets,
        &mut warned,
    );
    assert_eq!(skin.bones, [4, 3, 2, 1]);
    // Not renormalized.
    assert_eq!(skin.weights, [0.1, 0.2, 0.3, 0.15]);
    assert!(warned.is_empty());
}

#[test]
fn unknown_groups_take_an_empty_slot_and_warn_once() {
    init_tracing();
    let targets = targets(&["Root", "Arm"]);
    let mut warned = HashSet::new();
    let skin = remap_skin(&[("Ghost", 0.4), ("Arm", 0.6)], &targets, &mut warned);
    assert_eq!(skin.bones, [0, 1, 0, 0]);
    assert_eq!(skin.weights, [0.0, 0.6, 0.0, 0.0]);

    remap_skin(&[("Ghost", 1.0)], &targets, &mut warned);
    assert_eq!(warned.len(), 1);
    assert!(warned.contains("Ghost"));
}

#[test]
fn helpers_are_addressed_with_their_prefix() {
    let bones = vec![Node::new("Root", 0, None)];
    let helpers = vec![Node::new("Muzzle", 1, Some(0))];
    let targets = SkinTargets::new(&bones, &helpers, "HELPER_");
    assert_eq!(targets.len(), 2);
    assert_eq!(targets.get("HELPER_Muzzle"), Some(1));
    assert_eq!(targets.get("Muzzle"), None);
    assert_eq!(targets.get("Root"), Some(0));
}

#[test]
fn skeleton_numbers_bones_before_helpers() {
    let (bones, helpers, assignment) = build_skeleton(&skeleton(), &BuildOptions::default());
    let names: Vec<&str> = bones.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["Root", "Arm"]);
    assert_eq!(bones[0].id, 0);
    assert_eq!(bones[0].parent_id, None);
    assert_eq!(bones[1].id, 1);
    assert_eq!(bones[1].parent_id, Some(0));

    assert_eq!(helpers.len(), 1);
    assert_eq!(helpers[0].name, "Muzzle");
    assert_eq!(helpers[0].id, 2);
    assert_eq!(helpers[0].parent_id, Some(1));
    assert_eq!(assignment.next_id(), 3);

    let arm_local = bones[1].local.to_scale_rotation_translation().2;
    assert_approx(arm_local.x, 1.0, "arm local x");
    assert_approx(arm_local.z, 0.0, "arm local z");
    assert_eq!(bones[0].local, bones[0].global);
}

#[test]
fn collision_proxies_become_shapes() {
    let options = BuildOptions::default();
    let mut report = BuildReport::default();
    let proxies = vec![
        CollisionProxy {
            name: "COL_SPHERE".to_string(),
            transform: Mat4::from_scale_rotation_translation(
                Vec3::splat(0.5),
                Quat::IDENTITY,
                Vec3::new(0.0, 0.0, 1.0),
            ),
        },
        CollisionProxy {
            name: "COL_BOX.001".to_string(),
            transform: Mat4::from_scale(Vec3::new(1.0, 2.0, 3.0)),
        },
        CollisionProxy {
            name: "COL_CAPSULE".to_string(),
            transform: Mat4::from_scale_rotation_translation(
                Vec3::new(0.3, 0.3, 1.0),
                Quat::from_rotation_z(0.5),
                Vec3::ZERO,
            ),
        },
        CollisionProxy {
            name: "COL_CONVEX".to_string(),
            transform: Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
        },
    ];
    let (shapes, bounds) = build_collisions(&proxies, &options, &mut report);

    assert_eq!(shapes.len(), 3);
    assert_eq!(shapes[0].kind, CollisionKind::Sphere { radius: 0.5 });
    // Scale is folded into the shape size, not the transform.
    assert_eq!(shapes[0].transform, Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)));
    assert_eq!(
        shapes[1].kind,
        CollisionKind::Box {
            half_extents: Vec3::new(1.0, 2.0, 3.0)
        }
    );
    match shapes[2].kind {
        CollisionKind::Capsule {
            radius,
            half_height,
        } => {
            assert_approx(radius, 0.3, "capsule radius");
            assert_approx(half_height, 1.0 - CAPSULE_PROXY_HEIGHT_OFFSET, "capsule half height");
        }
        ref other => panic!("expected a capsule, got {other:?}"),
    }

    assert_eq!(report.skipped_collisions, vec!["COL_CONVEX".to_string()]);
    // The skipped proxy still widens the bounds.
    assert_approx(bounds.max.x, 11.0, "bounds max x");
    assert_approx(bounds.max.z, 3.0, "bounds max z");
    assert_approx(bounds.min.y, -2.0, "bounds min y");
}

#[test]
fn bounds_start_at_the_origin() {
    let mut report = BuildReport::default();
    let proxies = vec![CollisionProxy {
        name: "COL_SPHERE".to_string(),
        transform: Mat4::from_translation(Vec3::new(5.0, 5.0, 5.0)),
    }];
    let (_, bounds) = build_collisions(&proxies, &BuildOptions::default(), &mut report);
    assert_eq!(bounds.min, Vec3::ZERO);
    assert_eq!(bounds.max, Vec3::splat(6.0));

    let (shapes, empty) = build_collisions(&[], &BuildOptions::default(), &mut report);
    assert!(shapes.is_empty());
    assert_eq!(empty.min, Vec3::ZERO);
    assert_eq!(empty.max, Vec3::ZERO);
}

#[test]
fn model_places_the_mesh_after_the_skeleton() {
    init_tracing();
    let mut mesh = quad();
    mesh.groups = vec!["Root".to_string(), "HELPER_Muzzle".to_string(), "Tail".to_string()];
    mesh.vertices[3].groups = vec![(2, 1.0), (7, 0.5)];
    mesh.triangles[0].corners[0].color = Some([0.5, 1.0, 0.0, 1.0]);

    let (model, report) =
        build_model(&skeleton(), Some(&mesh), &BuildOptions::default()).expect("build");
    let built = model.mesh.as_ref().expect("mesh");
    assert_eq!(built.node.id, 3);
    assert_eq!(built.node.parent_id, None);
    assert_eq!(built.vertex_count(), 4);
    assert_eq!(built.uv_maps.len(), 1);
    assert_eq!(built.face_normals.len(), 2);

    let colors = built.colors.as_ref().expect("colors");
    assert_eq!(colors[0], [127, 255, 0, 255]);
    assert_eq!(colors[1], [255, 255, 255, 255]);

    let skin = built.skin.as_ref().expect("skin");
    assert_eq!(skin[0].bones[0], 0);
    // HELPER_Muzzle resolves to the helper's id.
    assert_eq!(skin[1].bones[..2], [0, 2]);
    assert_eq!(skin[1].weights[..2], [0.5, 0.5]);
    assert_eq!(skin[3].weights, [0.0; 4]);
    assert_eq!(report.unmatched_groups, vec!["#7".to_string(), "Tail".to_string()]);
}

#[test]
fn built_model_survives_the_file_format() {
    let (model, _) =
        build_model(&skeleton(), Some(&quad()), &BuildOptions::default()).expect("build");
    let bytes = model.to_khm_bytes().expect("encode");
    let decoded = Model::from_khm_bytes(&bytes).expect("decode");

    let names: Vec<&str> = decoded.nodes().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Root", "Arm", "Muzzle", "Quad"]);
    let mesh = decoded.mesh.as_ref().expect("mesh");
    let original = model.mesh.as_ref().expect("mesh");
    assert_eq!(mesh.positions, original.positions);
    assert_eq!(mesh.indices, original.indices);
    assert_eq!(mesh.uv_maps, original.uv_maps);
    assert_eq!(mesh.skin, original.skin);
}

#[test]
fn model_without_mesh_has_only_a_skeleton() {
    let (model, report) = build_model(&skeleton(), None, &BuildOptions::default()).expect("build");
    assert!(model.mesh.is_none());
    assert_eq!(model.bones.len() + model.helpers.len(), 3);
    assert_eq!(report, BuildReport::default());
}

#[test]
fn baked_animation_is_node_major() {
    let track = |name: &str, x: f32| SceneTrack {
        name: name.to_string(),
        frames: (0..3)
            .map(|f| Mat4::from_translation(Vec3::new(x, f as f32, 0.0)))
            .collect(),
    };
    let animation = bake_animation(&[track("Root", 0.0), track("Arm", 1.0)], 40.0).expect("bake");
    assert_eq!(animation.frame_count, 3);
    assert_eq!(animation.start_time, 0.0);
    assert_approx(animation.end_time, 0.08, "end time");
    assert_approx(animation.frame_duration_ms(), 40.0, "frame duration");
    assert_eq!(animation.nodes[1].id, 1);
    assert_eq!(animation.nodes[1].name, "Arm");

    let t = animation.transform(1, 2).expect("transform");
    assert_eq!(t.translation, Vec3::new(1.0, 2.0, 0.0));
    assert_eq!(t.scale, Vec3::ONE);
}

#[test]
fn tracks_with_different_lengths_are_rejected() {
    let tracks = [
        SceneTrack {
            name: "Root".to_string(),
            frames: vec![Mat4::IDENTITY; 3],
        },
        SceneTrack {
            name: "Arm".to_string(),
            frames: vec![Mat4::IDENTITY; 2],
        },
    ];
    assert!(matches!(
        bake_animation(&tracks, 40.0),
        Err(Error::InvalidValue { .. })
    ));
    let empty = bake_animation(&[], 40.0).expect("empty");
    assert_eq!(empty.frame_count, 0);
    assert!(empty.transforms.is_empty());
}
