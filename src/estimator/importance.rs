//! Progressive importance sampling of the environment cubemap.

use std::f32::consts::FRAC_1_PI;

use glam::Vec3;

use super::{IndirectEstimator, IndirectInputs, IndirectSample, SampleRange, SamplingMode};
use crate::environment::texel_solid_angle;
use crate::lighting::brdf::{clamped_nov, d_ggx, f_schlick, saturate, vis_smith_joint_ggx};
use crate::lighting::sampling::{hammersley, importance_sample_cosine, importance_sample_ggx};
use crate::lighting::MaterialSample;

/// Mip level whose texel footprint matches a sample of density `pdf`
/// drawn out of `total` samples. Never below zero.
pub fn specular_sample_lod(pdf: f32, total: u32, roughness: f32, face_size: u32) -> f32 {
    if roughness == 0.0 {
        return 0.0;
    }
    unclamped_lod(pdf, total, face_size).max(0.0)
}

/// Mip level for a cosine-lobe sample. May be negative; the sampler clamps it.
pub fn diffuse_sample_lod(pdf: f32, total: u32, face_size: u32) -> f32 {
    unclamped_lod(pdf, total, face_size)
}

fn unclamped_lod(pdf: f32, total: u32, face_size: u32) -> f32 {
    let sample_solid_angle = 1.0 / (total.max(1) as f32 * pdf);
    0.5 * (sample_solid_angle / texel_solid_angle(face_size)).log2()
}

/// GGX specular and cosine diffuse importance sampling.
///
/// `filtered` selects the mip-biased variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportanceSampled {
    pub filtered: bool,
}

impl ImportanceSampled {
    fn specular(
        &self,
        inputs: &IndirectInputs<'_>,
        n: Vec3,
        v: Vec3,
        material: &MaterialSample,
        index: u32,
        total: u32,
    ) -> Vec3 {
        let environment = inputs.environment;
        let roughness = material.roughness;
        let e = hammersley(index, total, inputs.random);
        let h = importance_sample_ggx(e, roughness, n);
        let l = 2.0 * v.dot(h) * h - v;

        let nov = clamped_nov(n, v);
        let nol = saturate(n.dot(l));
        let noh = saturate(n.dot(h));
        let voh = saturate(v.dot(h));
        if nol <= 0.0 || noh <= 0.0 {
            return Vec3::ZERO;
        }

        let lod = if self.filtered {
            let pdf = d_ggx(noh, roughness) * noh / (4.0 * voh);
            specular_sample_lod(pdf, total, roughness, environment.face_size())
        } else {
            0.0
        };
        let color = environment.sample_level(l, lod);

        // pdf = D * NoH / (4 VoH), D cancels against the BRDF
        let vis = vis_smith_joint_ggx(nol, nov, roughness);
        let f = f_schlick(material.f0, voh);
        color * f * (nol * vis * 4.0 * voh / noh)
    }

    fn diffuse(
        &self,
        inputs: &IndirectInputs<'_>,
        n: Vec3,
        material: &MaterialSample,
        index: u32,
        total: u32,
    ) -> Vec3 {
        let environment = inputs.environment;
        let e = hammersley(index, total, inputs.random);
        let l = importance_sample_cosine(e, n);
        let nol = saturate(n.dot(l));
        if nol <= 0.0 {
            return Vec3::ZERO;
        }

        let pdf = nol * FRAC_1_PI;
        let lod = if self.filtered {
            diffuse_sample_lod(pdf, total, environment.face_size())
        } else {
            0.0
        };
        let color = environment.sample_level(l, lod);
        color * material.albedo * FRAC_1_PI * nol / pdf
    }
}

impl IndirectEstimator for ImportanceSampled {
    fn mode(&self) -> SamplingMode {
        if self.filtered {
            SamplingMode::FilteredImportanceSampling
        } else {
            SamplingMode::ImportanceSampling
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
        if range.is_empty() {
            return IndirectSample::default();
        }

        let specular = inputs.specular_enabled(material);
        let diffuse = inputs.diffuse_enabled(material);

        let mut radiance = Vec3::ZERO;
        for index in range.indices() {
            if specular {
                radiance += self.specular(inputs, n, v, material, index, range.total);
            }
            if diffuse {
                radiance += self.diffuse(inputs, n, material, index, range.total);
            }
        }

        IndirectSample {
            radiance,
            sample_count: range.count,
        }
    }
}
