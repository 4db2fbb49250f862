//! Split-sum precompute
//!
//! Bakes the resources the baked split-sum estimator reads: a specular
//! cubemap prefiltered at one roughness per mip, a diffuse irradiance
//! cubemap, and the BRDF scale/bias lookup table. Every integral uses an
//! unscrambled sample set, so two runs over the same environment produce
//! identical texels.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec4};

use super::{build_pipeline, destroy_pipeline, groups_2d, submit, upload, THREAD_GROUP_SIZE};
use crate::backend::software::{check_defines, ComputeKernel, DispatchContext};
use crate::backend::{
    mip_size, BackendError, BackendResult, ComputeDevice, ComputePipelineDescriptor,
    PipelineHandle, ResourceState, TextureDescriptor, TextureFormat, TrackedTexture,
};
use crate::environment::{texel_direction, FACE_COUNT};
use crate::estimator::split_sum::lut_texel_coords;
use crate::estimator::{
    generate_brdf_lut, prefilter_diffuse, prefilter_roughness, prefilter_specular,
};

pub const ENV_MAP_PREFILTER_SHADER: &str = "envmapprefilter";
pub const BRDF_LUT_SHADER: &str = "brdflutgen";

pub const SPECULAR: &str = "SPECULAR";
pub const DIFFUSE: &str = "DIFFUSE";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PrefilterConstants {
    /// Baked environment cubemap
    pub environment: u32,
    pub target: u32,
    pub mip: u32,
    pub total_samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lobe {
    Specular,
    Diffuse,
}

struct EnvMapPrefilterKernel {
    lobe: Lobe,
}

impl ComputeKernel for EnvMapPrefilterKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let c: PrefilterConstants = ctx.constants()?;
        let environment = ctx.texture(c.environment)?.cube_view()?;
        let target = ctx.texture(c.target)?;
        let desc = target.desc();
        let format = desc.format;
        let size = mip_size(desc.width, c.mip);
        let roughness = prefilter_roughness(c.mip, desc.mip_levels);

        let mut texels = target.write_mip(c.mip)?;
        ctx.for_each_thread(|id| {
            if id.x >= size || id.y >= size || id.z >= FACE_COUNT {
                return;
            }
            let n = texel_direction(id.z, id.x, id.y, size);
            let radiance = match self.lobe {
                Lobe::Specular => {
                    prefilter_specular(&environment, roughness, n, n, c.total_samples, UVec2::ZERO)
                }
                Lobe::Diffuse => prefilter_diffuse(&environment, n, c.total_samples, UVec2::ZERO),
            };
            let index = ((id.z * size + id.y) * size + id.x) as usize;
            texels[index] = format.quantize(radiance.extend(1.0));
        });
        Ok(())
    }
}

pub fn env_map_prefilter_kernel(
    desc: &ComputePipelineDescriptor,
) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[SPECULAR, DIFFUSE])?;
    let lobe = match (desc.has_define(SPECULAR), desc.has_define(DIFFUSE)) {
        (true, false) => Lobe::Specular,
        (false, true) => Lobe::Diffuse,
        _ => {
            return Err(BackendError::ShaderCompilationFailed(format!(
                "{}: exactly one of {} or {} must be defined",
                desc.shader, SPECULAR, DIFFUSE
            )))
        }
    };
    Ok(Arc::new(EnvMapPrefilterKernel { lobe }))
}

struct BrdfLutKernel;

impl ComputeKernel for BrdfLutKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let c: PrefilterConstants = ctx.constants()?;
        let target = ctx.texture(c.target)?;
        let format = target.desc().format;
        let size = target.desc().width;

        let mut texels = target.write_mip(0)?;
        ctx.for_each_thread(|id| {
            if id.x >= size || id.y >= size {
                return;
            }
            let coords = lut_texel_coords(id.x, id.y, size);
            let lut = generate_brdf_lut(coords.x, coords.y, c.total_samples, UVec2::ZERO);
            texels[(id.y * size + id.x) as usize] =
                format.quantize(Vec4::new(lut.x, lut.y, 0.0, 1.0));
        });
        Ok(())
    }
}

pub fn brdf_lut_kernel(desc: &ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[])?;
    Ok(Arc::new(BrdfLutKernel))
}

/// Owns the precomputed split-sum resources.
pub struct EnvMapFilter {
    specular: TrackedTexture,
    diffuse: TrackedTexture,
    brdf_lut: TrackedTexture,
    specular_pipeline: Option<PipelineHandle>,
    diffuse_pipeline: Option<PipelineHandle>,
    lut_pipeline: Option<PipelineHandle>,
}

impl EnvMapFilter {
    pub fn new(
        device: &mut dyn ComputeDevice,
        specular_size: u32,
        diffuse_size: u32,
        lut_size: u32,
    ) -> BackendResult<Self> {
        let specular = TrackedTexture::create(
            device,
            TextureDescriptor::cubemap(
                "PrefilteredSpecular",
                specular_size,
                true,
                TextureFormat::Rgba16Float,
            ),
        )?;
        let diffuse = TrackedTexture::create(
            device,
            TextureDescriptor::cubemap(
                "PrefilteredDiffuse",
                diffuse_size,
                false,
                TextureFormat::Rgba16Float,
            ),
        )?;
        let brdf_lut = TrackedTexture::create(
            device,
            TextureDescriptor::target_2d("BRDFLut", lut_size, lut_size, TextureFormat::Rg16Float),
        )?;

        let mut filter = Self {
            specular,
            diffuse,
            brdf_lut,
            specular_pipeline: None,
            diffuse_pipeline: None,
            lut_pipeline: None,
        };
        filter.reload_pipelines(device);
        Ok(filter)
    }

    pub fn reload_pipelines(&mut self, device: &mut dyn ComputeDevice) {
        destroy_pipeline(device, &mut self.specular_pipeline);
        destroy_pipeline(device, &mut self.diffuse_pipeline);
        destroy_pipeline(device, &mut self.lut_pipeline);

        self.specular_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("SpecEnvMapPrefilter", ENV_MAP_PREFILTER_SHADER)
                .with_define(SPECULAR),
        );
        self.lut_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("BRDFLutGenerator", BRDF_LUT_SHADER),
        );
        self.diffuse_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("DiffEnvMapPrefilter", ENV_MAP_PREFILTER_SHADER)
                .with_define(DIFFUSE),
        );
    }

    pub fn prefiltered_specular(&self) -> &TrackedTexture {
        &self.specular
    }

    pub fn prefiltered_diffuse(&self) -> &TrackedTexture {
        &self.diffuse
    }

    pub fn brdf_lut(&self) -> &TrackedTexture {
        &self.brdf_lut
    }

    pub(crate) fn transition_outputs(&mut self, device: &mut dyn ComputeDevice, state: ResourceState) {
        let mut barriers = self.specular.transition_to(state);
        barriers.extend(self.brdf_lut.transition_to(state));
        barriers.extend(self.diffuse.transition_to(state));
        submit(device, barriers);
    }

    /// Integrate every output from `environment` with `total_samples` samples per texel.
    ///
    /// Without pipelines the outputs are only moved to a readable state.
    pub fn run(
        &mut self,
        device: &mut dyn ComputeDevice,
        environment: &mut TrackedTexture,
        total_samples: u32,
    ) -> BackendResult<()> {
        let (Some(specular_pipeline), Some(lut_pipeline), Some(diffuse_pipeline)) =
            (self.specular_pipeline, self.lut_pipeline, self.diffuse_pipeline)
        else {
            log::debug!("Split-sum precompute skipped: missing pipeline");
            self.transition_outputs(device, ResourceState::ShaderResource);
            return Ok(());
        };

        submit(device, environment.transition_to(ResourceState::ShaderResource));
        self.transition_outputs(device, ResourceState::UnorderedAccess);

        let base = PrefilterConstants {
            environment: environment.bindless(),
            target: self.specular.bindless(),
            mip: 0,
            total_samples,
        };
        for mip in 0..self.specular.mip_levels() {
            let extent = mip_size(self.specular.width(), mip);
            let handle = upload(device, &PrefilterConstants { mip, ..base });
            device.dispatch(specular_pipeline, handle, groups_2d(extent, extent, FACE_COUNT))?;
        }

        let lut_size = self.brdf_lut.width();
        let handle = upload(
            device,
            &PrefilterConstants {
                target: self.brdf_lut.bindless(),
                ..base
            },
        );
        device.dispatch(lut_pipeline, handle, groups_2d(lut_size, lut_size, 1))?;

        let diffuse_size = self.diffuse.width();
        let handle = upload(
            device,
            &PrefilterConstants {
                target: self.diffuse.bindless(),
                ..base
            },
        );
        device.dispatch(
            diffuse_pipeline,
            handle,
            groups_2d(diffuse_size, diffuse_size, FACE_COUNT),
        )?;

        self.transition_outputs(device, ResourceState::ShaderResource);
        log::info!("Split-sum precompute done with {} samples", total_samples);
        Ok(())
    }
}
