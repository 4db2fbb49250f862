//! Directional light and its shadow camera

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Distance from the origin the shadow camera is placed at, along the light direction
pub const SHADOW_CAMERA_DISTANCE: f32 = 50.0;
/// Width and height of the shadow frustum in world units
pub const SHADOW_FRUSTUM_SIZE: f32 = 40.0;
pub const SHADOW_NEAR: f32 = 1.0;
pub const SHADOW_FAR: f32 = 100.0;

/// Directional light (like the sun), placed by two angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalLight {
    pub enabled: bool,
    pub shadow: bool,
    /// Angle from the zenith
    pub vertical_angle: f32,
    /// Angle around the vertical axis
    pub horizontal_angle: f32,
    /// Illuminance in lux
    pub illuminance: f32,
    pub color: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            enabled: true,
            shadow: true,
            vertical_angle: 45.0,
            horizontal_angle: 130.0,
            illuminance: 1.0,
            color: Vec3::ONE,
        }
    }
}

impl DirectionalLight {
    /// Unit vector pointing towards the light.
    pub fn direction(&self) -> Vec3 {
        let v = self.vertical_angle.to_radians();
        let h = self.horizontal_angle.to_radians();
        Vec3::new(v.sin() * h.sin(), v.cos(), v.sin() * h.cos()).normalize()
    }

    /// Colored illuminance, zero when disabled.
    pub fn illuminance(&self) -> Vec3 {
        if self.enabled {
            self.color * self.illuminance
        } else {
            Vec3::ZERO
        }
    }

    pub fn shadow_view(&self) -> Mat4 {
        let l = self.direction();
        let up = if l.y.abs() > 0.999 { Vec3::Z } else { Vec3::Y };
        Mat4::look_at_lh(l * SHADOW_CAMERA_DISTANCE, Vec3::ZERO, up)
    }

    pub fn shadow_projection(&self) -> Mat4 {
        let half = SHADOW_FRUSTUM_SIZE / 2.0;
        Mat4::orthographic_lh(-half, half, -half, half, SHADOW_NEAR, SHADOW_FAR)
    }

    pub fn shadow_view_projection(&self) -> Mat4 {
        self.shadow_projection() * self.shadow_view()
    }

    /// World to shadow-map texture space: `xy` in `[0, 1]` with `y` down, `z` depth.
    pub fn shadow_matrix(&self) -> Mat4 {
        let to_texture = Mat4::from_cols(
            Vec4::new(0.5, 0.0, 0.0, 0.0),
            Vec4::new(0.0, -0.5, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            Vec4::new(0.5, 0.5, 0.0, 1.0),
        );
        to_texture * self.shadow_view_projection()
    }

    pub fn uniform_data(&self) -> LightUniformData {
        let view_proj = self.shadow_view_projection();
        LightUniformData {
            direction: self.direction().extend(0.0),
            illuminance: self.illuminance().extend(if self.shadow { 1.0 } else { 0.0 }),
            shadow_view_proj: view_proj,
            inv_shadow_view_proj: view_proj.inverse(),
            shadow_matrix: self.shadow_matrix(),
        }
    }
}

/// Light constants for shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniformData {
    /// xyz = direction towards the light
    pub direction: Vec4,
    /// xyz = colored illuminance, w = 1 when shadows are enabled
    pub illuminance: Vec4,
    pub shadow_view_proj: Mat4,
    pub inv_shadow_view_proj: Mat4,
    pub shadow_matrix: Mat4,
}

impl LightUniformData {
    pub fn shadows_enabled(&self) -> bool {
        self.illuminance.w > 0.0
    }
}

/// Shadow-map lookup position for a surface point.
///
/// Applies the normal offset and depth bias: the point is pushed along the
/// normal by `texel * saturate(1 - L.N)` and its depth lowered by one texel,
/// where `texel = 2 / shadow_map_size`.
pub fn shadow_lookup(light: &LightUniformData, position: Vec3, normal: Vec3, shadow_map_size: u32) -> Vec3 {
    let texel = 2.0 / shadow_map_size.max(1) as f32;
    let offset_scale = (1.0 - light.direction.truncate().dot(normal)).clamp(0.0, 1.0);
    let offset_position = position + normal * (texel * offset_scale);
    let mut uv = light.shadow_matrix.project_point3(offset_position);
    uv.z -= texel;
    uv
}
