//! Axis conversion between the file space and the authoring space.
//!
//! KHM files are written in the engine's Y-up space; the in-memory model uses the
//! authoring tool's Z-up space. A vector `(x, y, z)` read from a file becomes
//! `(x, -z, y)` in memory, and writing applies the exact inverse `(x, z, -y)`.
//! The mapping is a proper rotation (determinant +1), so quaternions are converted by
//! permuting their vector part the same way and matrices are converted by decomposing
//! them, converting translation and rotation, and recomposing. Scale is never permuted.

use glam::{Mat4, Quat, Vec3};

/// File space to authoring space.
#[inline]
pub fn swizzle_vec3(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.z, v.y)
}

/// Authoring space to file space.
#[inline]
pub fn unswizzle_vec3(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, -v.y)
}

#[inline]
pub fn swizzle_quat(q: Quat) -> Quat {
    Quat::from_xyzw(q.x, -q.z, q.y, q.w)
}

#[inline]
pub fn unswizzle_quat(q: Quat) -> Quat {
    Quat::from_xyzw(q.x, q.z, -q.y, q.w)
}

/// Converts a file-space transform into authoring space.
///
/// Permuting matrix cells directly is not equivalent once the matrix carries non-uniform
/// scale, so this always goes through translation/rotation/scale.
pub fn swizzle_mat4(m: Mat4) -> Mat4 {
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    Mat4::from_scale_rotation_translation(
        scale,
        swizzle_quat(rotation),
        swizzle_vec3(translation),
    )
}

/// Inverse of [`swizzle_mat4`].
pub fn unswizzle_mat4(m: Mat4) -> Mat4 {
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    Mat4::from_scale_rotation_translation(
        scale,
        unswizzle_quat(rotation),
        unswizzle_vec3(translation),
    )
}

/// Bounding boxes swap y and z without negating so `min <= max` survives the conversion.
#[inline]
pub(crate) fn swap_yz(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, v.y)
}

/// Builds a matrix from 16 floats in file (row-major) order.
#[inline]
pub(crate) fn mat4_from_rows(rows: &[f32; 16]) -> Mat4 {
    Mat4::from_cols_array(rows).transpose()
}

#[inline]
pub(crate) fn mat4_to_rows(m: &Mat4) -> [f32; 16] {
    m.transpose().to_cols_array()
}
