//! Microfacet BRDF terms shared by direct and image-based lighting.

use std::f32::consts::{FRAC_1_PI, PI};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::material::MaterialSample;

/// Floor applied to roughness before evaluating analytic lights.
pub const MIN_DIRECT_ROUGHNESS: f32 = 1e-4;

/// Offset keeping `N.V` away from zero at grazing angles.
pub const NOV_EPSILON: f32 = 1e-5;

pub fn saturate(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// `|N.V| + 1e-5`, never zero.
pub fn clamped_nov(n: Vec3, v: Vec3) -> f32 {
    n.dot(v).abs() + NOV_EPSILON
}

/// Smith joint GGX visibility `G / (4 N.L N.V)`, height-correlated approximation.
pub fn vis_smith_joint_ggx(nol: f32, nov: f32, roughness: f32) -> f32 {
    let a = roughness;
    let lambda_v = nol * (nov * (1.0 - a) + a);
    let lambda_l = nov * (nol * (1.0 - a) + a);
    0.5 / (lambda_v + lambda_l)
}

/// GGX normal distribution for `roughness` (alpha).
pub fn d_ggx(noh: f32, roughness: f32) -> f32 {
    let a2 = roughness * roughness;
    let d = (noh * a2 - noh) * noh + 1.0;
    a2 / (PI * d * d)
}

/// Schlick weight `(1 - V.H)^5`.
pub fn schlick_weight(voh: f32) -> f32 {
    let m = 1.0 - voh;
    let m2 = m * m;
    m2 * m2 * m
}

pub fn f_schlick(f0: Vec3, voh: f32) -> Vec3 {
    let fc = schlick_weight(voh);
    f0 * (1.0 - fc) + Vec3::splat(fc)
}

/// Dominant direction of the specular lobe, between `N` and `R`.
///
/// Not normalized, only used for cubemap lookups.
pub fn specular_dominant_dir(n: Vec3, r: Vec3, roughness: f32) -> Vec3 {
    let smoothness = saturate(1.0 - roughness);
    let lerp_factor = smoothness * (smoothness.sqrt() + roughness);
    n + (r - n) * lerp_factor
}

/// Lambert term for materials with a diffuse lobe.
pub fn diffuse_brdf(material: &MaterialSample) -> Vec3 {
    if !material.brdf.has_diffuse_lobe() {
        return Vec3::ZERO;
    }
    material.albedo * FRAC_1_PI
}

/// GGX / Smith / Schlick specular for materials with a specular lobe.
pub fn specular_brdf(n: Vec3, l: Vec3, v: Vec3, material: &MaterialSample) -> Vec3 {
    if !material.brdf.has_specular_lobe() {
        return Vec3::ZERO;
    }
    let h = (v + l).normalize_or_zero();
    let nov = clamped_nov(n, v);
    let nol = saturate(n.dot(l));
    let noh = saturate(n.dot(h));
    let voh = saturate(v.dot(h));

    let vis = vis_smith_joint_ggx(nol, nov, material.roughness);
    let d = d_ggx(noh, material.roughness);
    let f = f_schlick(material.f0, voh);
    f * (d * vis)
}

/// Which lobes are enabled globally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobeToggles {
    pub diffuse: bool,
    pub specular: bool,
}

impl Default for LobeToggles {
    fn default() -> Self {
        Self {
            diffuse: true,
            specular: true,
        }
    }
}

/// Outgoing radiance per unit illuminance from a directional light along `l`.
pub fn direct_light(
    n: Vec3,
    l: Vec3,
    v: Vec3,
    material: &MaterialSample,
    toggles: LobeToggles,
) -> Vec3 {
    let nol = saturate(n.dot(l));
    let mut material = *material;
    material.roughness = material.roughness.max(MIN_DIRECT_ROUGHNESS);

    let diffuse = if toggles.diffuse {
        diffuse_brdf(&material)
    } else {
        Vec3::ZERO
    };
    let specular = if toggles.specular {
        specular_brdf(n, l, v, &material)
    } else {
        Vec3::ZERO
    };
    (diffuse + specular) * nol
}
