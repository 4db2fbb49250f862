//! Lighting passes
//!
//! Each pass owns its textures and pipelines and records barriers and
//! dispatches on a [`ComputeDevice`]. The compute kernels they dispatch live
//! next to the host code and are registered by name in the shader library:
//! 1. Environment emitter - bakes the source into a cubemap, builds its mips, draws the sky
//! 2. Environment map filter - split-sum precompute (prefiltered cubemaps and BRDF LUT)
//! 3. Object pass - shadow map and per-pixel direct plus indirect lighting
//! 4. Post-processing - exposure, tonemapping and sRGB encode
//!
//! A pass whose pipeline failed to build keeps running as a no-op that only
//! moves its textures to a readable state.

pub mod env_emitter;
pub mod env_map_filter;
pub mod object_pass;
pub mod postprocess;

pub use env_emitter::CubemapBaker;
pub use env_map_filter::EnvMapFilter;
pub use object_pass::{LightingInputs, ObjectPass};
pub use postprocess::Compositor;

use bytemuck::Pod;

use crate::backend::software::ShaderLibrary;
use crate::backend::{
    group_count, Barrier, BarrierBatch, ComputeDevice, ComputePipelineDescriptor,
    ConstantsHandle, PipelineHandle,
};

/// Threads per group along x and y for every kernel
pub const THREAD_GROUP_SIZE: u32 = 32;

/// Bindless index meaning "no texture bound"
pub const UNBOUND: u32 = u32::MAX;

/// Register every lighting kernel under its shader source name.
pub fn register_shaders(library: &mut ShaderLibrary) {
    library.register(env_emitter::ENV_EMITTER_SHADER, env_emitter::env_emitter_kernel);
    library.register(env_emitter::MIPS_GENERATOR_SHADER, env_emitter::mips_generator_kernel);
    library.register(
        env_map_filter::ENV_MAP_PREFILTER_SHADER,
        env_map_filter::env_map_prefilter_kernel,
    );
    library.register(env_map_filter::BRDF_LUT_SHADER, env_map_filter::brdf_lut_kernel);
    library.register(object_pass::OBJECT_SHADER, object_pass::object_kernel);
    library.register(postprocess::POSTPROCESS_SHADER, postprocess::postprocess_kernel);
}

/// Build a pipeline, or log why the pass will be skipped.
pub(crate) fn build_pipeline(
    device: &mut dyn ComputeDevice,
    desc: ComputePipelineDescriptor,
) -> Option<PipelineHandle> {
    match device.create_compute_pipeline(&desc) {
        Ok(pipeline) => Some(pipeline),
        Err(e) => {
            log::warn!("{} disabled: {}", desc.label, e);
            None
        }
    }
}

pub(crate) fn destroy_pipeline(
    device: &mut dyn ComputeDevice,
    pipeline: &mut Option<PipelineHandle>,
) {
    if let Some(pipeline) = pipeline.take() {
        device.destroy_pipeline(pipeline);
    }
}

pub(crate) fn upload<T: Pod>(device: &mut dyn ComputeDevice, constants: &T) -> ConstantsHandle {
    device.upload_constants(bytemuck::bytes_of(constants))
}

/// Groups covering a `width x height` image with `depth` slices.
pub(crate) fn groups_2d(width: u32, height: u32, depth: u32) -> [u32; 3] {
    [
        group_count(width, THREAD_GROUP_SIZE),
        group_count(height, THREAD_GROUP_SIZE),
        depth,
    ]
}

pub(crate) fn submit(device: &mut dyn ComputeDevice, barriers: impl IntoIterator<Item = Barrier>) {
    let mut batch = BarrierBatch::new();
    batch.extend(barriers);
    batch.submit(device);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_library_has_every_shader() {
        let library = ShaderLibrary::with_builtin_shaders();
        for name in [
            env_emitter::ENV_EMITTER_SHADER,
            env_emitter::MIPS_GENERATOR_SHADER,
            env_map_filter::ENV_MAP_PREFILTER_SHADER,
            env_map_filter::BRDF_LUT_SHADER,
            object_pass::OBJECT_SHADER,
            postprocess::POSTPROCESS_SHADER,
        ] {
            assert!(library.contains(name), "{name}");
        }
    }

    #[test]
    fn test_groups_cover_extent() {
        assert_eq!(groups_2d(256, 256, 6), [8, 8, 6]);
        assert_eq!(groups_2d(33, 1, 1), [2, 1, 1]);
    }
}
