//! IBL Lab - progressive image-based lighting research renderer
//!
//! Renders analytic test objects under a directional light and an
//! environment, comparing five ways of integrating environment lighting:
//! - importance sampling, accumulated over frames
//! - filtered importance sampling with a solid-angle mip bias
//! - split-sum evaluated per pixel, with the lobe on `N` or on `R`
//! - split-sum read from precomputed cubemaps and a BRDF LUT
//!
//! # Features
//! - Progressive accumulation with explicit invalidation reasons
//! - Environment cubemap baking with a barrier-ordered mip chain
//! - Compute device abstraction with per-subresource state tracking
//! - CPU software device running every pass, with a command log for tests
//! - TOML settings persistence

pub mod accumulator;
pub mod backend;
pub mod config;
pub mod environment;
pub mod estimator;
pub mod lighting;
pub mod pipeline;
pub mod renderer;
pub mod scene;

pub use accumulator::{AccumulationPhase, DirtyReasons, FrameSnapshot, SamplingState};
pub use backend::software::SoftwareDevice;
pub use config::LabSettings;
pub use estimator::SamplingMode;
pub use renderer::Renderer;

/// Resolutions of every render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabConfig {
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Face size of the baked environment cubemap
    pub environment_size: u32,
    /// Face size of the prefiltered specular cubemap
    pub specular_size: u32,
    /// Face size of the prefiltered diffuse cubemap
    pub diffuse_size: u32,
    pub brdf_lut_size: u32,
    pub shadow_map_size: u32,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            environment_size: 256,
            specular_size: 256,
            diffuse_size: 128,
            brdf_lut_size: 256,
            shadow_map_size: 2048,
        }
    }
}

impl LabConfig {
    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}
