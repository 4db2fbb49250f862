//! Split-sum approximation.
//!
//! The specular integral is split into prefiltered radiance times a
//! scale/bias pair applied to F0. Both factors can be integrated per pixel
//! or read from the precomputed cubemaps and LUT.

use glam::{UVec2, Vec2, Vec3};

use super::importance::{diffuse_sample_lod, specular_sample_lod};
use super::{IndirectEstimator, IndirectInputs, IndirectSample, SampleRange, SamplingMode};
use crate::environment::CubeSampler;
use crate::lighting::brdf::{
    d_ggx, saturate, schlick_weight, specular_dominant_dir, vis_smith_joint_ggx,
};
use crate::lighting::sampling::{
    hammersley, importance_sample_cosine, importance_sample_ggx, reflect,
};
use crate::lighting::MaterialSample;

/// GGX-weighted environment radiance around `n` seen from `v`.
pub fn prefilter_specular(
    environment: &dyn CubeSampler,
    roughness: f32,
    n: Vec3,
    v: Vec3,
    total: u32,
    random: UVec2,
) -> Vec3 {
    let face_size = environment.face_size();
    let mut weight = 0.0;
    let mut accum = Vec3::ZERO;
    for i in 0..total {
        let e = hammersley(i, total, random);
        let h = importance_sample_ggx(e, roughness, n);
        let l = 2.0 * v.dot(h) * h - v;
        let nol = saturate(n.dot(l));
        let noh = saturate(n.dot(h));
        let voh = saturate(v.dot(h));
        if nol > 0.0 {
            let pdf = d_ggx(noh, roughness) * noh / (4.0 * voh);
            let lod = specular_sample_lod(pdf, total, roughness, face_size);
            accum += environment.sample_level(l, lod) * nol;
            weight += nol;
        }
    }
    if weight > 0.0 {
        accum / weight
    } else {
        Vec3::ZERO
    }
}

/// Cosine-weighted environment irradiance around `n`, divided by pi.
pub fn prefilter_diffuse(environment: &dyn CubeSampler, n: Vec3, total: u32, random: UVec2) -> Vec3 {
    let face_size = environment.face_size();
    let mut accum = Vec3::ZERO;
    for i in 0..total {
        let e = hammersley(i, total, random);
        let l = importance_sample_cosine(e, n);
        let nol = saturate(n.dot(l));
        if nol > 0.0 {
            let pdf = nol * std::f32::consts::FRAC_1_PI;
            let lod = diffuse_sample_lod(pdf, total, face_size);
            accum += environment.sample_level(l, lod);
        }
    }
    if total == 0 {
        return Vec3::ZERO;
    }
    accum / total as f32
}

/// Scale and bias applied to F0 for the given roughness and `N.V`.
pub fn generate_brdf_lut(roughness: f32, nov: f32, total: u32, random: UVec2) -> Vec2 {
    let n = Vec3::Z;
    let v = Vec3::new((1.0 - nov * nov).max(0.0).sqrt(), 0.0, nov);

    let mut lut = Vec2::ZERO;
    for i in 0..total {
        let e = hammersley(i, total, random);
        let h = importance_sample_ggx(e, roughness, n);
        let l = 2.0 * v.dot(h) * h - v;
        let nol = saturate(n.dot(l));
        let noh = saturate(n.dot(h));
        let voh = saturate(v.dot(h));
        if nol > 0.0 && noh > 0.0 {
            let vis = vis_smith_joint_ggx(nol, nov, roughness) * nol * (4.0 * voh / noh);
            let fc = schlick_weight(voh);
            lut.x += vis * (1.0 - fc);
            lut.y += vis * fc;
        }
    }
    if total == 0 {
        return Vec2::ZERO;
    }
    lut / total as f32
}

/// Roughness baked into mip `mip` of a prefiltered specular cubemap.
pub fn prefilter_roughness(mip: u32, mip_count: u32) -> f32 {
    let t = mip as f32 / mip_count.max(1) as f32;
    t * t
}

/// Lookup coordinates of LUT texel `(x, y)` as `(roughness, N.V)`.
pub fn lut_texel_coords(x: u32, y: u32, size: u32) -> Vec2 {
    let size = size.max(1) as f32;
    Vec2::new((x as f32 + 0.5) / size, (y as f32 + 0.5) / size)
}

fn combine(
    inputs: &IndirectInputs<'_>,
    material: &MaterialSample,
    specular: Option<(Vec3, Vec2)>,
    diffuse: Option<Vec3>,
) -> Vec3 {
    let mut radiance = Vec3::ZERO;
    if let Some((prefiltered, lut)) = specular {
        if inputs.specular_enabled(material) {
            radiance += prefiltered * (material.f0 * lut.x + Vec3::splat(lut.y));
        }
    }
    if let Some(irradiance) = diffuse {
        if inputs.diffuse_enabled(material) {
            radiance += material.albedo * irradiance;
        }
    }
    radiance
}

/// Split-sum integrated per pixel over the whole sample budget.
///
/// With `nv` set the specular lobe is centered on the reflection vector and
/// viewed from it, which assumes `N = V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSum {
    pub nv: bool,
}

impl IndirectEstimator for SplitSum {
    fn mode(&self) -> SamplingMode {
        if self.nv {
            SamplingMode::SplitSumNV
        } else {
            SamplingMode::SplitSum
        }
    }

    fn estimate(
        &self,
        inputs: &IndirectInputs<'_>,
        n: Vec3,
        v: Vec3,
        material: &MaterialSample,
        range: SampleRange,
    ) -> IndirectSample {
        let environment = inputs.environment;
        let total = range.total;
        let nov = n.dot(v).abs().min(1.0);

        let specular = inputs.specular_enabled(material).then(|| {
            let prefiltered = if self.nv {
                let r = reflect(v, n);
                prefilter_specular(environment, material.roughness, r, r, total, inputs.random)
            } else {
                prefilter_specular(environment, material.roughness, n, v, total, inputs.random)
            };
            let lut = generate_brdf_lut(material.roughness, nov, total, inputs.random);
            (prefiltered, lut)
        });
        let diffuse = inputs
            .diffuse_enabled(material)
            .then(|| prefilter_diffuse(environment, n, total, inputs.random));

        IndirectSample {
            radiance: combine(inputs, material, specular, diffuse),
            sample_count: 1,
        }
    }
}

/// Split-sum read from the precomputed resources in constant time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BakedSplitSum;

impl IndirectEstimator for BakedSplitSum {
    fn mode(&self) -> SamplingMode {
        SamplingMode::BakedSplitSumNV
    }

    fn estimate(
        &self,
        inputs: &IndirectInputs<'_>,
        n: Vec3,
        v: Vec3,
        material: &MaterialSample,
        _range: SampleRange,
    ) -> IndirectSample {
        let roughness = material.roughness;
        let nov = n.dot(v).abs();

        let specular = match (inputs.prefiltered_specular, inputs.brdf_lut) {
            (Some(prefiltered), Some(lut)) if inputs.specular_enabled(material) => {
                let mip = roughness.sqrt() * prefiltered.mip_levels() as f32;
                let dir = specular_dominant_dir(n, reflect(v, n), roughness);
                let radiance = prefiltered.sample_level(dir, mip);
                Some((radiance, lut.sample(Vec2::new(roughness, nov))))
            }
            _ => None,
        };
        let diffuse = inputs
            .prefiltered_diffuse
            .filter(|_| inputs.diffuse_enabled(material))
            .map(|cube| cube.sample_level(n, 0.0));

        IndirectSample {
            radiance: combine(inputs, material, specular, diffuse),
            sample_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::UniformCube;
    use crate::lighting::{BrdfType, LobeToggles, MaterialParams};

    #[test]
    fn test_prefilter_roughness_per_mip() {
        assert_eq!(prefilter_roughness(0, 8), 0.0);
        assert_eq!(prefilter_roughness(4, 8), 0.25);
        assert_eq!(prefilter_roughness(8, 8), 1.0);
    }

    #[test]
    fn test_lut_texel_coords_are_centered() {
        assert_eq!(lut_texel_coords(0, 0, 4), Vec2::new(0.125, 0.125));
        assert_eq!(lut_texel_coords(3, 1, 4), Vec2::new(0.875, 0.375));
    }

    #[test]
    fn test_prefilter_of_uniform_environment_is_uniform() {
        let env = UniformCube::new(Vec3::new(2.0, 1.0, 0.5), 32);
        let n = Vec3::new(0.2, 0.9, -0.1).normalize();
        let spec = prefilter_specular(&env, 0.4, n, n, 64, UVec2::ZERO);
        assert!((spec - env.radiance).length() < 1e-5);
        let diff = prefilter_diffuse(&env, n, 64, UVec2::ZERO);
        assert!((diff - env.radiance).length() < 1e-4);
    }

    #[test]
    fn test_brdf_lut_is_bounded() {
        for roughness in [0.05, 0.3, 0.8] {
            for nov in [0.1, 0.5, 0.95] {
                let lut = generate_brdf_lut(roughness, nov, 128, UVec2::ZERO);
                assert!(lut.x >= 0.0 && lut.y >= 0.0, "{lut:?}");
                assert!(lut.x + lut.y <= 1.05, "{roughness} {nov}: {lut:?}");
            }
        }
    }

    #[test]
    fn test_baked_without_resources_returns_black() {
        let env = UniformCube::new(Vec3::ONE, 16);
        let inputs = IndirectInputs::new(&env);
        let material = MaterialParams::default().sample();
        let range = SampleRange::full(16);
        let sample = BakedSplitSum.estimate(&inputs, Vec3::Y, Vec3::Y, &material, range);
        assert_eq!(sample.radiance, Vec3::ZERO);
        assert_eq!(sample.sample_count, 1);
    }

    #[test]
    fn test_split_sum_respects_toggles() {
        let env = UniformCube::new(Vec3::ONE, 16);
        let mut inputs = IndirectInputs::new(&env);
        inputs.toggles = LobeToggles {
            diffuse: false,
            specular: false,
        };
        let material = MaterialParams {
            brdf: BrdfType::RoughPlastic,
            ..Default::default()
        }
        .sample();
        let sample = SplitSum { nv: false }.estimate(
            &inputs,
            Vec3::Y,
            Vec3::Y,
            &material,
            SampleRange::full(32),
        );
        assert_eq!(sample.radiance, Vec3::ZERO);
    }
}
