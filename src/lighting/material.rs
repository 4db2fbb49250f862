//! User-facing material parameters and the shading sample derived from them.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Reflectance of common dielectrics at normal incidence.
pub const DIELECTRIC_F0: f32 = 0.04;

/// BRDF model of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BrdfType {
    /// Metalness workflow: Lambert diffuse plus GGX specular
    #[default]
    Simple,
    SmoothDiffuse,
    RoughDiffuse,
    SmoothConductor,
    RoughConductor,
    RoughPlastic,
    /// Simple mapping with parameters fetched from textures
    Textured,
    /// Measured BRDF, no analytic lobes
    Tabulated,
}

impl BrdfType {
    pub const ALL: [BrdfType; 8] = [
        BrdfType::Simple,
        BrdfType::SmoothDiffuse,
        BrdfType::RoughDiffuse,
        BrdfType::SmoothConductor,
        BrdfType::RoughConductor,
        BrdfType::RoughPlastic,
        BrdfType::Textured,
        BrdfType::Tabulated,
    ];

    /// Index written to shader constants.
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn has_specular_lobe(self) -> bool {
        matches!(
            self,
            BrdfType::Simple
                | BrdfType::Textured
                | BrdfType::SmoothConductor
                | BrdfType::RoughConductor
                | BrdfType::RoughPlastic
        )
    }

    pub fn has_diffuse_lobe(self) -> bool {
        matches!(
            self,
            BrdfType::Simple
                | BrdfType::Textured
                | BrdfType::SmoothDiffuse
                | BrdfType::RoughDiffuse
                | BrdfType::RoughPlastic
        )
    }

    /// Types whose roughness is forced to zero.
    pub fn is_smooth(self) -> bool {
        matches!(self, BrdfType::SmoothDiffuse | BrdfType::SmoothConductor)
    }
}

/// Parameters as edited by the user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialParams {
    pub brdf: BrdfType,
    pub metalness: f32,
    pub perceptual_roughness: f32,
    pub reflectance: f32,
    pub base_color: Vec3,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            brdf: BrdfType::Simple,
            metalness: 1.0,
            perceptual_roughness: 0.5,
            reflectance: 1.0,
            base_color: Vec3::ONE,
        }
    }
}

impl MaterialParams {
    pub fn sample(&self) -> MaterialSample {
        MaterialSample::from_params(self)
    }
}

/// Material terms at one shading point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSample {
    pub brdf: BrdfType,
    pub albedo: Vec3,
    pub f0: Vec3,
    /// GGX alpha, the square of perceptual roughness
    pub roughness: f32,
}

impl MaterialSample {
    pub fn from_params(params: &MaterialParams) -> Self {
        let metalness = params.metalness.clamp(0.0, 1.0);
        let perceptual = params.perceptual_roughness.clamp(0.0, 1.0);
        let dielectric_spec = DIELECTRIC_F0 * params.reflectance.max(0.0);
        let base = params.base_color;

        let metal_workflow = |metalness: f32| {
            let one_minus_reflectivity = (1.0 - dielectric_spec) * (1.0 - metalness);
            let f0 = Vec3::splat(dielectric_spec).lerp(base, metalness);
            (base * one_minus_reflectivity, f0)
        };

        let (albedo, f0) = match params.brdf {
            BrdfType::Simple | BrdfType::Textured => metal_workflow(metalness),
            BrdfType::RoughPlastic => metal_workflow(0.0),
            BrdfType::SmoothDiffuse | BrdfType::RoughDiffuse => (base, Vec3::ZERO),
            BrdfType::SmoothConductor | BrdfType::RoughConductor => (Vec3::ZERO, base),
            BrdfType::Tabulated => (Vec3::ZERO, Vec3::ZERO),
        };
        let roughness = if params.brdf.is_smooth() {
            0.0
        } else {
            perceptual * perceptual
        };

        Self {
            brdf: params.brdf,
            albedo,
            f0,
            roughness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(brdf: BrdfType) -> MaterialParams {
        MaterialParams {
            brdf,
            metalness: 0.25,
            perceptual_roughness: 0.6,
            reflectance: 0.5,
            base_color: Vec3::new(0.8, 0.4, 0.2),
        }
    }

    #[test]
    fn test_simple_metal_workflow() {
        let sample = params(BrdfType::Simple).sample();
        let ds = 0.02;
        assert!((sample.roughness - 0.36).abs() < 1e-6);
        let expected_f0 = Vec3::splat(ds).lerp(Vec3::new(0.8, 0.4, 0.2), 0.25);
        assert!((sample.f0 - expected_f0).length() < 1e-6);
        let expected_albedo = Vec3::new(0.8, 0.4, 0.2) * (1.0 - ds) * 0.75;
        assert!((sample.albedo - expected_albedo).length() < 1e-6);
        assert_eq!(params(BrdfType::Textured).sample().f0, sample.f0);
    }

    #[test]
    fn test_smooth_types_force_zero_roughness() {
        assert_eq!(params(BrdfType::SmoothConductor).sample().roughness, 0.0);
        assert_eq!(params(BrdfType::SmoothDiffuse).sample().roughness, 0.0);
        assert!(params(BrdfType::RoughConductor).sample().roughness > 0.0);
    }

    #[test]
    fn test_conductor_and_diffuse_mappings() {
        let conductor = params(BrdfType::RoughConductor).sample();
        assert_eq!(conductor.albedo, Vec3::ZERO);
        assert_eq!(conductor.f0, Vec3::new(0.8, 0.4, 0.2));

        let diffuse = params(BrdfType::RoughDiffuse).sample();
        assert_eq!(diffuse.albedo, Vec3::new(0.8, 0.4, 0.2));
        assert_eq!(diffuse.f0, Vec3::ZERO);
    }

    #[test]
    fn test_rough_plastic_ignores_metalness() {
        let mut p = params(BrdfType::RoughPlastic);
        p.metalness = 1.0;
        let sample = p.sample();
        assert_eq!(sample.f0, Vec3::splat(0.02));
        assert!(sample.albedo.x > 0.0);
    }

    #[test]
    fn test_lobe_gating() {
        let specular: Vec<_> = BrdfType::ALL
            .iter()
            .filter(|b| b.has_specular_lobe())
            .collect();
        let diffuse: Vec<_> = BrdfType::ALL.iter().filter(|b| b.has_diffuse_lobe()).collect();
        assert_eq!(specular.len(), 5);
        assert_eq!(diffuse.len(), 5);
        assert!(!BrdfType::Tabulated.has_specular_lobe());
        assert!(!BrdfType::Tabulated.has_diffuse_lobe());
        for brdf in BrdfType::ALL {
            assert_eq!(BrdfType::from_index(brdf.index()), Some(brdf));
        }
    }
}
