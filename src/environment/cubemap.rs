//! Cubemap face addressing.
//!
//! Faces are stored +X, -X, +Y, -Y, +Z, -Z. Each face is seen by a 90 degree
//! camera at the origin looking down the face axis with a fixed up vector;
//! `right = up x forward` (left-handed), texture `u` grows along `right` and
//! `v` grows against `up`.

use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3};

pub const FACE_COUNT: u32 = 6;

/// Look direction and up vector of each face camera.
pub const FACE_VIEWS: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::Z),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
];

/// Orthonormal frame of one face camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBasis {
    pub forward: Vec3,
    pub up: Vec3,
    pub right: Vec3,
}

pub fn face_basis(face: u32) -> FaceBasis {
    let (forward, up) = FACE_VIEWS[(face % FACE_COUNT) as usize];
    FaceBasis {
        forward,
        up,
        right: up.cross(forward),
    }
}

/// View matrix of a face camera.
pub fn face_view_matrix(face: u32) -> Mat4 {
    let basis = face_basis(face);
    Mat4::look_to_lh(Vec3::ZERO, basis.forward, basis.up)
}

/// Unnormalized direction through face coordinates `uv` in `[0, 1]`.
pub fn face_uv_direction(face: u32, uv: Vec2) -> Vec3 {
    let basis = face_basis(face);
    let ndc_x = uv.x * 2.0 - 1.0;
    let ndc_y = 1.0 - uv.y * 2.0;
    basis.forward + basis.right * ndc_x + basis.up * ndc_y
}

/// Normalized direction through the center of texel `(x, y)`.
pub fn texel_direction(face: u32, x: u32, y: u32, size: u32) -> Vec3 {
    let size = size.max(1) as f32;
    let uv = Vec2::new((x as f32 + 0.5) / size, (y as f32 + 0.5) / size);
    face_uv_direction(face, uv).normalize()
}

/// Face hit by `dir` and the face coordinates in `[0, 1]`.
pub fn direction_to_face_uv(dir: Vec3) -> (u32, Vec2) {
    let abs = dir.abs();
    let face = if abs.x >= abs.y && abs.x >= abs.z {
        if dir.x >= 0.0 {
            0
        } else {
            1
        }
    } else if abs.y >= abs.z {
        if dir.y >= 0.0 {
            2
        } else {
            3
        }
    } else if dir.z >= 0.0 {
        4
    } else {
        5
    };

    let basis = face_basis(face);
    let major = dir.dot(basis.forward);
    if major <= 0.0 {
        return (face, Vec2::splat(0.5));
    }
    let p = dir / major;
    let uv = Vec2::new((p.dot(basis.right) + 1.0) * 0.5, (1.0 - p.dot(basis.up)) * 0.5);
    (face, uv.clamp(Vec2::ZERO, Vec2::ONE))
}

/// Average solid angle covered by one texel of a cube face.
pub fn texel_solid_angle(face_size: u32) -> f32 {
    let size = face_size.max(1) as f32;
    4.0 * PI / (6.0 * size * size)
}
