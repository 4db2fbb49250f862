//! Indirect lighting estimators
//!
//! Five strategies integrate the environment for a shading point. The two
//! importance-sampled ones are progressive: each call adds a partial sum over
//! a window of the sample budget. The split-sum family is evaluated in full
//! on every call.
//!
//! - [`importance`]: naive and mip-filtered importance sampling
//! - [`split_sum`]: on-the-fly and baked split-sum, plus the precompute
//!   integrals the baked variant reads

pub mod importance;
pub mod split_sum;

use std::ops::Range;

use glam::{UVec2, Vec3};
use serde::{Deserialize, Serialize};

pub use importance::ImportanceSampled;
pub use split_sum::{
    generate_brdf_lut, prefilter_diffuse, prefilter_specular, prefilter_roughness, BakedSplitSum,
    SplitSum,
};

use crate::environment::{CubeSampler, LutSampler};
use crate::lighting::{LobeToggles, MaterialSample};

/// Indirect lighting strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SamplingMode {
    /// GGX and cosine importance sampling of mip 0
    #[default]
    ImportanceSampling,
    /// Importance sampling with a solid-angle mip bias
    FilteredImportanceSampling,
    /// Prefiltered radiance and BRDF integral evaluated per pixel
    SplitSum,
    /// Split-sum with the lobe centered on the reflection vector
    SplitSumNV,
    /// Split-sum read from the precomputed cubemaps and LUT
    BakedSplitSumNV,
}

impl SamplingMode {
    pub const ALL: [SamplingMode; 5] = [
        SamplingMode::ImportanceSampling,
        SamplingMode::FilteredImportanceSampling,
        SamplingMode::SplitSum,
        SamplingMode::SplitSumNV,
        SamplingMode::BakedSplitSumNV,
    ];

    /// Whether samples accumulate over frames.
    pub fn is_progressive(self) -> bool {
        matches!(
            self,
            SamplingMode::ImportanceSampling | SamplingMode::FilteredImportanceSampling
        )
    }

    /// Whether the mode reads the precomputed split-sum resources.
    pub fn needs_precompute(self) -> bool {
        self == SamplingMode::BakedSplitSumNV
    }

    pub fn name(self) -> &'static str {
        match self {
            SamplingMode::ImportanceSampling => "IS",
            SamplingMode::FilteredImportanceSampling => "FilteredIS",
            SamplingMode::SplitSum => "SplitSum",
            SamplingMode::SplitSumNV => "SplitSumNV",
            SamplingMode::BakedSplitSumNV => "BakedSplitSumNV",
        }
    }

    /// Index written to shader constants.
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// Window `[start, start + count)` of a `total`-sample budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRange {
    pub start: u32,
    pub count: u32,
    pub total: u32,
}

impl SampleRange {
    /// Window for a frame that starts at `processed` and takes up to `step` samples.
    pub fn for_frame(processed: u32, step: u32, total: u32) -> Self {
        let start = processed.min(total);
        let count = step.min(total - start);
        Self {
            start,
            count,
            total,
        }
    }

    /// The whole budget at once.
    pub fn full(total: u32) -> Self {
        Self {
            start: 0,
            count: total,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn indices(&self) -> Range<u32> {
        self.start..self.start + self.count
    }
}

/// Resources an estimator may read
#[derive(Clone, Copy)]
pub struct IndirectInputs<'a> {
    /// Baked environment cubemap with mips
    pub environment: &'a dyn CubeSampler,
    pub prefiltered_specular: Option<&'a dyn CubeSampler>,
    pub prefiltered_diffuse: Option<&'a dyn CubeSampler>,
    pub brdf_lut: Option<&'a dyn LutSampler>,
    pub toggles: LobeToggles,
    /// Per-pixel, per-frame Hammersley scramble
    pub random: UVec2,
}

impl<'a> IndirectInputs<'a> {
    pub fn new(environment: &'a dyn CubeSampler) -> Self {
        Self {
            environment,
            prefiltered_specular: None,
            prefiltered_diffuse: None,
            brdf_lut: None,
            toggles: LobeToggles::default(),
            random: UVec2::ZERO,
        }
    }

    pub(crate) fn specular_enabled(&self, material: &MaterialSample) -> bool {
        self.toggles.specular && material.brdf.has_specular_lobe()
    }

    pub(crate) fn diffuse_enabled(&self, material: &MaterialSample) -> bool {
        self.toggles.diffuse && material.brdf.has_diffuse_lobe()
    }
}

/// Radiance summed over `sample_count` samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndirectSample {
    pub radiance: Vec3,
    pub sample_count: u32,
}

impl IndirectSample {
    /// Mean radiance, zero when no samples were taken.
    pub fn resolve(&self) -> Vec3 {
        if self.sample_count == 0 {
            Vec3::ZERO
        } else {
            self.radiance / self.sample_count as f32
        }
    }
}

/// One indirect lighting strategy.
pub trait IndirectEstimator: Send + Sync {
    fn mode(&self) -> SamplingMode;

    /// Estimate indirect radiance leaving along `v` from a point with normal `n`.
    fn estimate(
        &self,
        inputs: &IndirectInputs<'_>,
        n: Vec3,
        v: Vec3,
        material: &MaterialSample,
        range: SampleRange,
    ) -> IndirectSample;
}

static IMPORTANCE_SAMPLED: ImportanceSampled = ImportanceSampled { filtered: false };
static FILTERED_IMPORTANCE_SAMPLED: ImportanceSampled = ImportanceSampled { filtered: true };
static SPLIT_SUM: SplitSum = SplitSum { nv: false };
static SPLIT_SUM_NV: SplitSum = SplitSum { nv: true };
static BAKED_SPLIT_SUM: BakedSplitSum = BakedSplitSum;

/// Strategy implementing `mode`.
pub fn estimator_for(mode: SamplingMode) -> &'static dyn IndirectEstimator {
    match mode {
        SamplingMode::ImportanceSampling => &IMPORTANCE_SAMPLED,
        SamplingMode::FilteredImportanceSampling => &FILTERED_IMPORTANCE_SAMPLED,
        SamplingMode::SplitSum => &SPLIT_SUM,
        SamplingMode::SplitSumNV => &SPLIT_SUM_NV,
        SamplingMode::BakedSplitSumNV => &BAKED_SPLIT_SUM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_range_clamps_to_budget() {
        assert_eq!(SampleRange::for_frame(0, 16, 128).indices(), 0..16);
        assert_eq!(SampleRange::for_frame(120, 16, 128).indices(), 120..128);
        assert!(SampleRange::for_frame(128, 16, 128).is_empty());
        assert!(SampleRange::for_frame(200, 16, 128).is_empty());
        assert_eq!(SampleRange::for_frame(0, 500, 128).count, 128);
    }

    #[test]
    fn test_estimator_for_matches_mode() {
        for mode in SamplingMode::ALL {
            assert_eq!(estimator_for(mode).mode(), mode);
            assert_eq!(SamplingMode::from_index(mode.index()), Some(mode));
        }
        assert_eq!(SamplingMode::from_index(5), None);
    }

    #[test]
    fn test_progressive_modes() {
        let progressive: Vec<_> = SamplingMode::ALL
            .into_iter()
            .filter(|m| m.is_progressive())
            .collect();
        assert_eq!(
            progressive,
            vec![
                SamplingMode::ImportanceSampling,
                SamplingMode::FilteredImportanceSampling
            ]
        );
    }

    #[test]
    fn test_resolve_divides_by_count() {
        let sample = IndirectSample {
            radiance: Vec3::splat(6.0),
            sample_count: 3,
        };
        assert_eq!(sample.resolve(), Vec3::splat(2.0));
        assert_eq!(IndirectSample::default().resolve(), Vec3::ZERO);
    }
}
