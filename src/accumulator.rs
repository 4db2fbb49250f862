//! Progressive sample accumulation
//!
//! [`SamplingState`] tracks how much of the indirect lighting sample budget
//! has been integrated. At the start of every frame it consumes the set of
//! [`DirtyReasons`] collected since the previous frame, resets when any
//! integrand-affecting input changed, and hands out a [`FrameSnapshot`] that
//! tells the passes which window of samples to take.

use bitflags::bitflags;
use glam::Mat4;

use crate::config::SamplingSettings;
use crate::estimator::{SampleRange, SamplingMode};

bitflags! {
    /// Why accumulated indirect lighting is no longer valid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyReasons: u32 {
        /// The view-projection matrix changed (progressive modes only)
        const CAMERA = 1 << 0;
        /// The environment source or its parameters changed
        const ENVIRONMENT = 1 << 1;
        /// Material parameters or BRDF type changed
        const MATERIAL = 1 << 2;
        /// Diffuse or specular lobe toggled
        const BRDF_TOGGLES = 1 << 3;
        /// A different estimator was selected
        const SAMPLING_MODE = 1 << 4;
        /// Shaders were rebuilt
        const SHADER_RELOAD = 1 << 5;
        /// Total sample count or per-frame step changed
        const SAMPLE_BUDGET = 1 << 6;
        /// Different objects are shown
        const SCENE = 1 << 7;
    }
}

/// Where the accumulation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationPhase {
    /// Samples taken so far in a progressive mode
    Accumulating(u32),
    /// The whole budget is integrated
    Converged,
    /// A split-sum mode waiting for its one-shot evaluation
    Baking,
}

/// Per-frame plan handed to the passes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSnapshot {
    pub mode: SamplingMode,
    /// Samples integrated before this frame
    pub samples_processed: u32,
    pub total_samples: u32,
    /// Samples the estimator integrates this frame
    pub range: SampleRange,
    /// Reasons consumed at the start of this frame
    pub reasons: DirtyReasons,
    pub view_projection: Mat4,
    /// Frame counter used to decorrelate sample scrambles
    pub frame_index: u32,
}

impl FrameSnapshot {
    /// The accumulation restarted at the beginning of this frame or has not started yet.
    pub fn is_first_sample(&self) -> bool {
        self.samples_processed == 0
    }

    /// Run the split-sum precompute this frame.
    pub fn needs_precompute(&self) -> bool {
        self.mode.needs_precompute() && self.samples_processed == 0
    }

    /// Start the indirect buffer from zero this frame.
    pub fn clear_indirect(&self) -> bool {
        self.samples_processed == 0 || !self.mode.is_progressive()
    }
}

/// Sample bookkeeping for indirect lighting
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingState {
    samples_processed: u32,
    samples_per_frame_step: u32,
    total_samples_target: u32,
    sampling_mode: SamplingMode,
    last_view_projection: Option<Mat4>,
    frame_index: u32,
}

impl Default for SamplingState {
    fn default() -> Self {
        Self::new(&SamplingSettings::default())
    }
}

impl SamplingState {
    pub fn new(settings: &SamplingSettings) -> Self {
        let mut state = Self {
            samples_processed: 0,
            samples_per_frame_step: 0,
            total_samples_target: 0,
            sampling_mode: settings.mode,
            last_view_projection: None,
            frame_index: 0,
        };
        state.set_budget(settings.total_samples, settings.samples_per_frame);
        state
    }

    pub fn samples_processed(&self) -> u32 {
        self.samples_processed
    }

    pub fn samples_per_frame_step(&self) -> u32 {
        self.samples_per_frame_step
    }

    pub fn total_samples_target(&self) -> u32 {
        self.total_samples_target
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    /// `(samples_processed, total_samples_target)` for progress display.
    pub fn progress(&self) -> (u32, u32) {
        (self.samples_processed, self.total_samples_target)
    }

    pub fn phase(&self) -> AccumulationPhase {
        if self.sampling_mode.is_progressive() {
            if self.samples_processed < self.total_samples_target {
                AccumulationPhase::Accumulating(self.samples_processed)
            } else {
                AccumulationPhase::Converged
            }
        } else if self.samples_processed == 0 {
            AccumulationPhase::Baking
        } else {
            AccumulationPhase::Converged
        }
    }

    /// Set the budget, clamping the per-frame step to the total. Returns whether anything changed.
    fn set_budget(&mut self, total: u32, step: u32) -> bool {
        let clamped = step.min(total);
        if clamped != step {
            log::warn!("Samples per frame {step} exceeds total {total}, clamping to {clamped}");
        }
        let changed = total != self.total_samples_target || clamped != self.samples_per_frame_step;
        self.total_samples_target = total;
        self.samples_per_frame_step = clamped;
        changed
    }

    /// Drop everything accumulated so far.
    pub fn reset(&mut self) {
        self.samples_processed = 0;
    }

    /// Apply this frame's settings, camera and dirty reasons, and plan the frame.
    pub fn begin_frame(
        &mut self,
        settings: &SamplingSettings,
        mut reasons: DirtyReasons,
        view_projection: Mat4,
    ) -> FrameSnapshot {
        if settings.mode != self.sampling_mode {
            self.sampling_mode = settings.mode;
            reasons |= DirtyReasons::SAMPLING_MODE;
        }
        if self.set_budget(settings.total_samples, settings.samples_per_frame) {
            reasons |= DirtyReasons::SAMPLE_BUDGET;
        }

        let camera_moved = match &self.last_view_projection {
            Some(last) => bytemuck::bytes_of(last) != bytemuck::bytes_of(&view_projection),
            None => false,
        };
        self.last_view_projection = Some(view_projection);
        if camera_moved {
            reasons |= DirtyReasons::CAMERA;
        }
        if !self.sampling_mode.is_progressive() {
            reasons.remove(DirtyReasons::CAMERA);
        }

        if !reasons.is_empty() {
            log::debug!(
                "Resetting {} accumulation at {}/{}: {:?}",
                self.sampling_mode.name(),
                self.samples_processed,
                self.total_samples_target,
                reasons
            );
            self.reset();
        }

        let range = if self.sampling_mode.is_progressive() {
            SampleRange::for_frame(
                self.samples_processed,
                self.samples_per_frame_step,
                self.total_samples_target,
            )
        } else {
            SampleRange::full(self.total_samples_target)
        };

        FrameSnapshot {
            mode: self.sampling_mode,
            samples_processed: self.samples_processed,
            total_samples: self.total_samples_target,
            range,
            reasons,
            view_projection,
            frame_index: self.frame_index,
        }
    }

    /// Record the samples integrated by `frame`.
    pub fn end_frame(&mut self, frame: &FrameSnapshot) {
        self.samples_processed = if frame.mode.is_progressive() {
            (self.samples_processed + frame.range.count).min(self.total_samples_target)
        } else {
            self.total_samples_target
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        log::trace!(
            "Samples processed {}/{}",
            self.samples_processed,
            self.total_samples_target
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: SamplingMode, total: u32, step: u32) -> SamplingSettings {
        SamplingSettings {
            mode,
            total_samples: total,
            samples_per_frame: step,
        }
    }

    #[test]
    fn test_step_is_clamped_to_total() {
        let state = SamplingState::new(&settings(SamplingMode::ImportanceSampling, 8, 64));
        assert_eq!(state.samples_per_frame_step(), 8);
    }

    #[test]
    fn test_first_frame_is_not_a_camera_move() {
        let mut state = SamplingState::default();
        let s = SamplingSettings::default();
        let frame = state.begin_frame(&s, DirtyReasons::empty(), Mat4::IDENTITY);
        assert!(frame.reasons.is_empty());
        assert_eq!(frame.range, SampleRange::for_frame(0, 16, 128));
    }

    #[test]
    fn test_camera_move_ignored_in_split_sum() {
        let s = settings(SamplingMode::SplitSum, 64, 16);
        let mut state = SamplingState::new(&s);
        let frame = state.begin_frame(&s, DirtyReasons::empty(), Mat4::IDENTITY);
        state.end_frame(&frame);
        let moved = Mat4::from_translation(glam::Vec3::X);
        let frame = state.begin_frame(&s, DirtyReasons::empty(), moved);
        assert!(frame.reasons.is_empty());
        assert_eq!(frame.samples_processed, 64);
        assert_eq!(frame.range, SampleRange::full(64));
    }

    #[test]
    fn test_split_sum_phases() {
        let s = settings(SamplingMode::BakedSplitSumNV, 32, 4);
        let mut state = SamplingState::new(&s);
        assert_eq!(state.phase(), AccumulationPhase::Baking);
        let frame = state.begin_frame(&s, DirtyReasons::empty(), Mat4::IDENTITY);
        assert!(frame.needs_precompute());
        assert!(frame.clear_indirect());
        state.end_frame(&frame);
        assert_eq!(state.phase(), AccumulationPhase::Converged);
        assert_eq!(state.progress(), (32, 32));

        let frame = state.begin_frame(&s, DirtyReasons::empty(), Mat4::IDENTITY);
        assert!(!frame.needs_precompute());
        assert!(frame.clear_indirect());
    }

    #[test]
    fn test_mode_change_resets() {
        let s = settings(SamplingMode::ImportanceSampling, 32, 16);
        let mut state = SamplingState::new(&s);
        let frame = state.begin_frame(&s, DirtyReasons::empty(), Mat4::IDENTITY);
        state.end_frame(&frame);
        assert_eq!(state.samples_processed(), 16);

        let filtered = settings(SamplingMode::FilteredImportanceSampling, 32, 16);
        let frame = state.begin_frame(&filtered, DirtyReasons::empty(), Mat4::IDENTITY);
        assert_eq!(frame.reasons, DirtyReasons::SAMPLING_MODE);
        assert_eq!(frame.samples_processed, 0);
    }
}
