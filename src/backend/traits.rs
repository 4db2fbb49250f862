//! Core device abstraction
//!
//! Everything the lighting passes need from a device: bindless textures,
//! named compute pipelines with preprocessor defines, per-frame constants,
//! and explicit per-subresource state barriers.

use crate::backend::state::Barrier;
use crate::backend::types::*;
use glam::Vec4;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to compile shader: {0}")]
    ShaderCompilationFailed(String),
    #[error("Failed to dispatch {0}: {1}")]
    DispatchFailed(String, String),
    #[error("Invalid texture handle: {0:?}")]
    InvalidTexture(TextureHandle),
    #[error("Invalid pipeline handle: {0:?}")]
    InvalidPipeline(PipelineHandle),
    #[error("Invalid constants handle: {0:?}")]
    InvalidConstants(ConstantsHandle),
    #[error("Invalid subresource: mip {mip}, slice {slice}")]
    InvalidSubresource { mip: u32, slice: u32 },
    #[error("Texture data size mismatch: expected {expected} texels, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a device texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to constants uploaded for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantsHandle(pub(crate) u64);

/// Compute pipeline descriptor
///
/// `shader` names the source, `defines` select a variant within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDescriptor {
    pub label: String,
    pub shader: String,
    pub defines: Vec<String>,
}

impl ComputePipelineDescriptor {
    pub fn new(label: &str, shader: &str) -> Self {
        Self {
            label: label.to_string(),
            shader: shader.to_string(),
            defines: Vec::new(),
        }
    }

    pub fn with_define(mut self, define: &str) -> Self {
        self.defines.push(define.to_string());
        self
    }

    pub fn has_define(&self, define: &str) -> bool {
        self.defines.iter().any(|d| d == define)
    }
}

/// Main device trait
pub trait ComputeDevice {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Begin a new frame, recycling last frame's constants
    fn begin_frame(&mut self);

    /// End the current frame
    fn end_frame(&mut self);

    // Resource creation

    /// Create a texture. Every subresource starts `Undefined`.
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Descriptor a texture was created with
    fn texture_descriptor(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor>;

    /// Index of the texture in the shader-visible table
    fn bindless_index(&self, texture: TextureHandle) -> BackendResult<u32>;

    /// Build a compute pipeline from a named shader and its defines
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    /// Release a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Upload constants visible to dispatches of the current frame
    fn upload_constants(&mut self, data: &[u8]) -> ConstantsHandle;

    // Command recording and execution

    /// Apply state transitions
    fn barrier(&mut self, barriers: &[Barrier]);

    /// Dispatch compute work
    fn dispatch(
        &mut self,
        pipeline: PipelineHandle,
        constants: ConstantsHandle,
        groups: [u32; 3],
    ) -> BackendResult<()>;

    /// Fill every slice of one mip with a value
    fn clear_texture(&mut self, texture: TextureHandle, mip: u32, value: Vec4) -> BackendResult<()>;

    /// Upload one subresource
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        slice: u32,
        texels: &[Vec4],
    ) -> BackendResult<()>;

    /// Read one subresource back
    fn read_texture(&self, texture: TextureHandle, mip: u32, slice: u32) -> BackendResult<Vec<Vec4>>;

    // Resource cleanup

    /// Destroy a texture. Its handle and bindless index become invalid.
    fn destroy_texture(&mut self, texture: TextureHandle);
}
