//! Software compute device.
//!
//! Runs compute shaders as Rust kernels on the CPU. The device records an
//! ordered command log and keeps its own view of every subresource state so
//! that barrier streams can be checked against what the passes believe.

pub mod kernel;
pub mod storage;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::Vec4;

pub use kernel::{check_defines, ComputeKernel, DispatchContext, KernelFactory, ShaderLibrary};
pub use storage::{filter_bilinear, AddressMode, CubeView, Texture2dView, TextureStorage};

use crate::backend::state::Barrier;
use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded device command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(Barrier),
    Dispatch {
        label: String,
        shader: String,
        defines: Vec<String>,
        groups: [u32; 3],
        constants: Vec<u8>,
    },
    Clear {
        texture: TextureHandle,
        mip: u32,
    },
}

struct SoftwarePipeline {
    desc: ComputePipelineDescriptor,
    kernel: Arc<dyn ComputeKernel>,
}

/// CPU implementation of [`ComputeDevice`].
pub struct SoftwareDevice {
    /// Indexed by handle; destroyed slots stay empty and are never reused
    textures: Vec<Option<Arc<TextureStorage>>>,
    pipelines: HashMap<PipelineHandle, SoftwarePipeline>,
    next_pipeline_id: u64,
    constants: Vec<Vec<u8>>,
    library: ShaderLibrary,
    failing_shaders: HashSet<String>,
    states: HashMap<(TextureHandle, u32), ResourceState>,
    commands: Vec<Command>,
    validation_errors: usize,
    frame_index: u64,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device with the built-in lighting shaders.
    pub fn new() -> Self {
        Self::with_library(ShaderLibrary::with_builtin_shaders())
    }

    pub fn with_library(library: ShaderLibrary) -> Self {
        log::info!("Creating software compute device");
        Self {
            textures: Vec::new(),
            pipelines: HashMap::new(),
            next_pipeline_id: 0,
            constants: Vec::new(),
            library,
            failing_shaders: HashSet::new(),
            states: HashMap::new(),
            commands: Vec::new(),
            validation_errors: 0,
            frame_index: 0,
        }
    }

    /// Make every later compilation of `shader` fail, as a broken edit would.
    pub fn break_shader(&mut self, shader: &str) {
        self.failing_shaders.insert(shader.to_string());
    }

    /// Undo [`SoftwareDevice::break_shader`].
    pub fn fix_shader(&mut self, shader: &str) {
        self.failing_shaders.remove(shader);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Barriers whose `before` did not match the device's view.
    pub fn validation_errors(&self) -> usize {
        self.validation_errors
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Texel storage of a live texture, for filtered reads outside a dispatch.
    pub fn texture_storage(&self, texture: TextureHandle) -> BackendResult<&TextureStorage> {
        self.storage(texture).map(|storage| &**storage)
    }

    /// Textures created and not yet destroyed.
    pub fn live_texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }

    /// Current state of a subresource as seen by the device.
    pub fn subresource_state(&self, texture: TextureHandle, subresource: u32) -> ResourceState {
        self.states
            .get(&(texture, subresource))
            .copied()
            .unwrap_or_default()
    }

    fn storage(&self, texture: TextureHandle) -> BackendResult<&Arc<TextureStorage>> {
        self.textures
            .get(texture.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(BackendError::InvalidTexture(texture))
    }

    fn check_subresource(
        storage: &TextureStorage,
        mip: u32,
        slice: u32,
    ) -> BackendResult<()> {
        let desc = storage.desc();
        if mip >= desc.mip_levels || slice >= desc.array_layers() {
            return Err(BackendError::InvalidSubresource { mip, slice });
        }
        Ok(())
    }
}

impl ComputeDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "Software Device"
    }

    fn begin_frame(&mut self) {
        self.constants.clear();
        log::trace!("SoftwareDevice: begin frame {}", self.frame_index);
    }

    fn end_frame(&mut self) {
        self.frame_index += 1;
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: zero-sized {}x{} with {} mips",
                desc.label_or_default(),
                desc.width,
                desc.height,
                desc.mip_levels
            )));
        }
        if desc.dimension == TextureDimension::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: cube faces must be square",
                desc.label_or_default()
            )));
        }
        if desc.mip_levels > mip_levels_for(desc.width.max(desc.height)) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: {} mips exceed the chain length",
                desc.label_or_default(),
                desc.mip_levels
            )));
        }

        log::trace!(
            "SoftwareDevice: creating texture {:?} ({}x{}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels,
            desc.format
        );
        let handle = TextureHandle(self.textures.len() as u64);
        self.textures
            .push(Some(Arc::new(TextureStorage::new(desc.clone()))));
        Ok(handle)
    }

    fn texture_descriptor(&self, texture: TextureHandle) -> BackendResult<TextureDescriptor> {
        Ok(self.storage(texture)?.desc().clone())
    }

    fn bindless_index(&self, texture: TextureHandle) -> BackendResult<u32> {
        self.storage(texture)?;
        Ok(texture.0 as u32)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if self.failing_shaders.contains(&desc.shader) {
            return Err(BackendError::ShaderCompilationFailed(format!(
                "{}: compilation failed",
                desc.shader
            )));
        }
        let kernel = self
            .library
            .compile(desc)
            .map_err(|e| BackendError::PipelineCreationFailed(format!("{}: {}", desc.label, e)))?;

        let handle = PipelineHandle(self.next_pipeline_id);
        self.next_pipeline_id += 1;
        log::trace!(
            "SoftwareDevice: created pipeline {} ({} {:?})",
            desc.label,
            desc.shader,
            desc.defines
        );
        self.pipelines.insert(
            handle,
            SoftwarePipeline {
                desc: desc.clone(),
                kernel,
            },
        );
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn upload_constants(&mut self, data: &[u8]) -> ConstantsHandle {
        self.constants.push(data.to_vec());
        ConstantsHandle(self.constants.len() as u64 - 1)
    }

    fn barrier(&mut self, barriers: &[Barrier]) {
        for barrier in barriers {
            let key = (barrier.texture, barrier.subresource);
            let current = self.states.get(&key).copied().unwrap_or_default();
            if current != barrier.before {
                self.validation_errors += 1;
                log::warn!(
                    "Barrier on {:?} subresource {} expects {:?} but it is {:?}",
                    barrier.texture,
                    barrier.subresource,
                    barrier.before,
                    current
                );
            }
            self.states.insert(key, barrier.after);
            self.commands.push(Command::Barrier(*barrier));
        }
    }

    fn dispatch(
        &mut self,
        pipeline: PipelineHandle,
        constants: ConstantsHandle,
        groups: [u32; 3],
    ) -> BackendResult<()> {
        let pipeline = self
            .pipelines
            .get(&pipeline)
            .ok_or(BackendError::InvalidPipeline(pipeline))?;
        let data = self
            .constants
            .get(constants.0 as usize)
            .ok_or(BackendError::InvalidConstants(constants))?;

        log::trace!(
            "SoftwareDevice: dispatch {} {:?}",
            pipeline.desc.label,
            groups
        );
        let ctx = DispatchContext {
            label: &pipeline.desc.label,
            textures: &self.textures,
            constants: data,
            groups,
            group_size: pipeline.kernel.group_size(),
        };
        pipeline.kernel.execute(&ctx)?;

        self.commands.push(Command::Dispatch {
            label: pipeline.desc.label.clone(),
            shader: pipeline.desc.shader.clone(),
            defines: pipeline.desc.defines.clone(),
            groups,
            constants: data.clone(),
        });
        Ok(())
    }

    fn clear_texture(&mut self, texture: TextureHandle, mip: u32, value: Vec4) -> BackendResult<()> {
        let storage = self.storage(texture)?;
        Self::check_subresource(storage, mip, 0)?;
        let value = storage.desc().format.quantize(value);
        storage.write_mip(mip)?.iter_mut().for_each(|t| *t = value);
        self.commands.push(Command::Clear { texture, mip });
        Ok(())
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        slice: u32,
        texels: &[Vec4],
    ) -> BackendResult<()> {
        let storage = self.storage(texture)?;
        Self::check_subresource(storage, mip, slice)?;
        let len = storage.slice_len(mip);
        if texels.len() != len {
            return Err(BackendError::DataSizeMismatch {
                expected: len,
                actual: texels.len(),
            });
        }
        let format = storage.desc().format;
        let start = slice as usize * len;
        let mut data = storage.write_mip(mip)?;
        for (dst, src) in data[start..start + len].iter_mut().zip(texels) {
            *dst = format.quantize(*src);
        }
        Ok(())
    }

    fn read_texture(&self, texture: TextureHandle, mip: u32, slice: u32) -> BackendResult<Vec<Vec4>> {
        let storage = self.storage(texture)?;
        Self::check_subresource(storage, mip, slice)?;
        let len = storage.slice_len(mip);
        let start = slice as usize * len;
        Ok(storage.read_mip(mip)?[start..start + len].to_vec())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let Some(slot) = self.textures.get_mut(texture.0 as usize) else {
            return;
        };
        if let Some(storage) = slot.take() {
            log::trace!("SoftwareDevice: destroying texture {:?}", storage.desc().label);
            self.states.retain(|(handle, _), _| *handle != texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::state::ResourceStateTracker;

    #[test]
    fn test_write_and_read_back_quantized() {
        let mut device = SoftwareDevice::with_library(ShaderLibrary::new());
        let desc = TextureDescriptor::target_2d("t", 2, 1, TextureFormat::Rgba8Unorm);
        let tex = device.create_texture(&desc).unwrap();
        device
            .write_texture(tex, 0, 0, &[Vec4::splat(2.0), Vec4::splat(0.5)])
            .unwrap();
        let texels = device.read_texture(tex, 0, 0).unwrap();
        assert_eq!(texels[0], Vec4::ONE);
        assert!((texels[1].x - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_write_rejects_wrong_size() {
        let mut device = SoftwareDevice::with_library(ShaderLibrary::new());
        let tex = device
            .create_texture(&TextureDescriptor::target_2d("t", 2, 2, TextureFormat::Rgba32Float))
            .unwrap();
        assert!(matches!(
            device.write_texture(tex, 0, 0, &[Vec4::ZERO]),
            Err(BackendError::DataSizeMismatch { expected: 4, actual: 1 })
        ));
        assert!(device.read_texture(tex, 1, 0).is_err());
    }

    #[test]
    fn test_create_texture_validation() {
        let mut device = SoftwareDevice::with_library(ShaderLibrary::new());
        let mut desc = TextureDescriptor::cubemap("c", 8, true, TextureFormat::Rgba16Float);
        desc.height = 4;
        assert!(device.create_texture(&desc).is_err());
        let desc = TextureDescriptor {
            mip_levels: 9,
            ..TextureDescriptor::cubemap("c", 8, false, TextureFormat::Rgba16Float)
        };
        assert!(device.create_texture(&desc).is_err());
    }

    #[test]
    fn test_destroyed_texture_is_released() {
        let mut device = SoftwareDevice::with_library(ShaderLibrary::new());
        let desc = TextureDescriptor::target_2d("t", 2, 2, TextureFormat::Rgba32Float);
        let first = device.create_texture(&desc).unwrap();
        let second = device.create_texture(&desc).unwrap();
        let mut tracker = ResourceStateTracker::new(1, 1);
        device.barrier(&tracker.transition_all(first, ResourceState::ShaderResource));
        assert_eq!(device.live_texture_count(), 2);

        device.destroy_texture(first);
        assert_eq!(device.live_texture_count(), 1);
        assert!(device.read_texture(first, 0, 0).is_err());
        assert!(device.bindless_index(first).is_err());
        assert_eq!(device.subresource_state(first, 0), ResourceState::Undefined);
        assert!(device.read_texture(second, 0, 0).is_ok());

        // handles are not recycled
        let third = device.create_texture(&desc).unwrap();
        assert_ne!(third, first);
        device.destroy_texture(first);
        assert_eq!(device.live_texture_count(), 2);
    }

    #[test]
    fn test_barrier_validation_counts_mismatches() {
        let mut device = SoftwareDevice::with_library(ShaderLibrary::new());
        let tex = device
            .create_texture(&TextureDescriptor::target_2d("t", 1, 1, TextureFormat::Rgba32Float))
            .unwrap();
        let mut tracker = ResourceStateTracker::new(1, 1);
        let barriers = tracker.transition_all(tex, ResourceState::RenderTarget);
        device.barrier(&barriers);
        assert_eq!(device.validation_errors(), 0);

        device.barrier(&[Barrier {
            texture: tex,
            subresource: 0,
            before: ResourceState::ShaderResource,
            after: ResourceState::UnorderedAccess,
        }]);
        assert_eq!(device.validation_errors(), 1);
        assert_eq!(device.subresource_state(tex, 0), ResourceState::UnorderedAccess);
        assert_eq!(device.commands().len(), 2);
    }

    #[test]
    fn test_broken_shader_fails_pipeline_creation() {
        let mut device = SoftwareDevice::new();
        device.break_shader("mips_generator");
        let desc = ComputePipelineDescriptor::new("MipsGenerator", "mips_generator");
        assert!(matches!(
            device.create_compute_pipeline(&desc),
            Err(BackendError::ShaderCompilationFailed(_))
        ));
        device.fix_shader("mips_generator");
        assert!(device.create_compute_pipeline(&desc).is_ok());
    }
}
