//! Environment lighting sources and cubemap access
//!
//! - [`source`]: the radiance source (constant sky or a loaded texture)
//! - [`cubemap`]: face addressing shared by baking and sampling

pub mod cubemap;
pub mod source;

pub use cubemap::*;
pub use source::*;

use glam::{Vec2, Vec3};

/// Filtered read access to a cubemap with a mip chain.
pub trait CubeSampler {
    /// Edge length of mip 0
    fn face_size(&self) -> u32;

    fn mip_levels(&self) -> u32;

    /// Trilinear sample along `dir`; `lod` is clamped to the mip chain.
    fn sample_level(&self, dir: Vec3, lod: f32) -> Vec3;
}

/// Filtered read access to a two-channel lookup table.
pub trait LutSampler {
    /// Bilinear sample with clamp-to-edge addressing.
    fn sample(&self, uv: Vec2) -> Vec2;
}

/// A cubemap that holds the same radiance in every texel of every mip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformCube {
    pub radiance: Vec3,
    pub face_size: u32,
}

impl UniformCube {
    pub fn new(radiance: Vec3, face_size: u32) -> Self {
        Self {
            radiance,
            face_size,
        }
    }
}

impl CubeSampler for UniformCube {
    fn face_size(&self) -> u32 {
        self.face_size
    }

    fn mip_levels(&self) -> u32 {
        crate::backend::mip_levels_for(self.face_size)
    }

    fn sample_level(&self, _dir: Vec3, _lod: f32) -> Vec3 {
        self.radiance
    }
}
