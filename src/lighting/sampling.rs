//! Low-discrepancy sequences and lobe importance sampling.

use std::f32::consts::PI;

use glam::{UVec2, Vec2, Vec3};

/// Scrambled Hammersley point `index` of a `count`-point set.
///
/// `random.x` rotates the first coordinate (Cranley-Patterson), `random.y`
/// xors the radical inverse, so different scrambles decorrelate pixels and
/// frames without breaking the stratification of the set.
pub fn hammersley(index: u32, count: u32, random: UVec2) -> Vec2 {
    let rotation = (random.x & 0xffff) as f32 / 65536.0;
    let e1 = (index as f32 / count.max(1) as f32 + rotation).fract();
    let e2 = radical_inverse(index, random.y);
    Vec2::new(e1, e2)
}

/// Van der Corput radical inverse in base 2 with an xor scramble.
pub fn radical_inverse(index: u32, scramble: u32) -> f32 {
    // large values round up to 1.0 in f32
    ((index.reverse_bits() ^ scramble) as f32 * 2.328_306_4e-10).min(ONE_MINUS_EPSILON)
}

/// Largest f32 below one.
pub const ONE_MINUS_EPSILON: f32 = 1.0 - f32::EPSILON / 2.0;

/// Tangent frame around `n`, returned as `(tangent_x, tangent_y)`.
pub fn tangent_frame(n: Vec3) -> (Vec3, Vec3) {
    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent_x = up.cross(n).normalize();
    let tangent_y = n.cross(tangent_x);
    (tangent_x, tangent_y)
}

fn to_world(local: Vec3, n: Vec3) -> Vec3 {
    let (tangent_x, tangent_y) = tangent_frame(n);
    tangent_x * local.x + tangent_y * local.y + n * local.z
}

/// GGX-distributed half vector around `n` for `roughness` (alpha).
pub fn importance_sample_ggx(e: Vec2, roughness: f32, n: Vec3) -> Vec3 {
    let m2 = roughness * roughness;

    let phi = 2.0 * PI * e.x;
    let cos_theta = ((1.0 - e.y) / (1.0 + (m2 - 1.0) * e.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    let h = Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
    to_world(h, n)
}

/// Cosine-weighted direction around `n`, pdf `N.L / pi`.
pub fn importance_sample_cosine(e: Vec2, n: Vec3) -> Vec3 {
    let cos_theta = (1.0 - e.y).max(0.0).sqrt();
    let sin_theta = e.y.max(0.0).sqrt();
    let phi = 2.0 * PI * e.x;

    let l = Vec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
    to_world(l, n)
}

/// Mirror `v` about `n`.
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    2.0 * v.dot(n) * n - v
}

/// Cheap integer hash used to derive per-pixel scrambles.
pub fn hash_u32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

/// Scramble for a pixel in a given frame.
pub fn pixel_scramble(x: u32, y: u32, frame: u32) -> UVec2 {
    let seed = hash_u32(x ^ hash_u32(y ^ hash_u32(frame)));
    UVec2::new(seed, hash_u32(seed))
}
