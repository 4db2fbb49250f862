//! Exposure, tonemapping and display encode

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4, Vec4Swizzles};

use super::{build_pipeline, destroy_pipeline, groups_2d, submit, upload, ObjectPass, THREAD_GROUP_SIZE};
use crate::backend::software::{check_defines, AddressMode, ComputeKernel, DispatchContext};
use crate::backend::{
    BackendResult, ComputeDevice, ComputePipelineDescriptor, PipelineHandle, ResourceState,
    TextureDescriptor, TextureFormat, TrackedTexture,
};
use crate::config::PostSettings;

pub const POSTPROCESS_SHADER: &str = "postprocess";

pub const MIN_EV100: f32 = -5.0;
pub const MAX_EV100: f32 = 25.0;

/// Photometric exposure for an EV100 value, clamped to the supported range.
pub fn exposure(ev100: f32) -> f32 {
    let ev100 = ev100.clamp(MIN_EV100, MAX_EV100);
    1.0 / (1.2 * 2f32.powf(ev100))
}

/// ACES filmic curve fit
pub fn aces_filmic(color: Vec3) -> Vec3 {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    ((color * (a * color + b)) / (color * (c * color + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
}

pub fn linear_to_srgb(value: f32) -> f32 {
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

/// Average indirect radiance of an accumulation texel, `rgb / a`.
pub fn resolve_indirect(texel: Vec4) -> Vec3 {
    if texel.w > 0.0 {
        texel.xyz() / texel.w
    } else {
        Vec3::ZERO
    }
}

/// Display color of one pixel.
pub fn composite(direct: Vec3, indirect: Vec4, exposure: f32, tonemap: bool) -> Vec3 {
    let color = (direct + resolve_indirect(indirect)) * exposure;
    let mapped = if tonemap {
        aces_filmic(color)
    } else {
        color.clamp(Vec3::ZERO, Vec3::ONE)
    };
    Vec3::new(
        linear_to_srgb(mapped.x),
        linear_to_srgb(mapped.y),
        linear_to_srgb(mapped.z),
    )
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PostConstants {
    pub direct: u32,
    pub indirect: u32,
    pub output: u32,
    pub tonemap: u32,
    pub width: u32,
    pub height: u32,
    pub exposure: f32,
    pub _padding: u32,
}

struct PostprocessKernel;

impl ComputeKernel for PostprocessKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let c: PostConstants = ctx.constants()?;
        let direct = ctx.texture(c.direct)?.view_2d(AddressMode::ClampToEdge)?;
        let indirect = ctx.texture(c.indirect)?.view_2d(AddressMode::ClampToEdge)?;
        let output = ctx.texture(c.output)?;
        let format = output.desc().format;

        let mut texels = output.write_mip(0)?;
        ctx.for_each_thread(|id| {
            if id.x >= c.width || id.y >= c.height {
                return;
            }
            let color = composite(
                direct.load(id.x, id.y).xyz(),
                indirect.load(id.x, id.y),
                c.exposure,
                c.tonemap != 0,
            );
            texels[(id.y * c.width + id.x) as usize] = format.quantize(color.extend(1.0));
        });
        Ok(())
    }
}

pub fn postprocess_kernel(desc: &ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[])?;
    Ok(Arc::new(PostprocessKernel))
}

/// Combines the lighting buffers into the displayable `Rgba8Unorm` image.
pub struct Compositor {
    output: TrackedTexture,
    pipeline: Option<PipelineHandle>,
}

impl Compositor {
    pub fn new(device: &mut dyn ComputeDevice, width: u32, height: u32) -> BackendResult<Self> {
        let output = TrackedTexture::create(
            device,
            TextureDescriptor::target_2d("Output", width, height, TextureFormat::Rgba8Unorm),
        )?;
        let mut compositor = Self {
            output,
            pipeline: None,
        };
        compositor.reload_pipelines(device);
        Ok(compositor)
    }

    pub fn reload_pipelines(&mut self, device: &mut dyn ComputeDevice) {
        destroy_pipeline(device, &mut self.pipeline);
        self.pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("Postprocess", POSTPROCESS_SHADER),
        );
    }

    pub fn output(&self) -> &TrackedTexture {
        &self.output
    }

    /// Composite `lighting` into the output. Without a pipeline the output
    /// keeps its previous contents.
    pub fn run(
        &mut self,
        device: &mut dyn ComputeDevice,
        settings: &PostSettings,
        lighting: &mut ObjectPass,
    ) -> BackendResult<()> {
        lighting.transition_outputs(device, ResourceState::ShaderResource);
        submit(device, self.output.transition_to(ResourceState::UnorderedAccess));

        if let Some(pipeline) = self.pipeline {
            let width = self.output.width();
            let height = self.output.desc().height;
            let constants = PostConstants {
                direct: lighting.direct().bindless(),
                indirect: lighting.indirect().bindless(),
                output: self.output.bindless(),
                tonemap: settings.tonemap as u32,
                width,
                height,
                exposure: exposure(settings.ev100),
                _padding: 0,
            };
            let handle = upload(device, &constants);
            device.dispatch(pipeline, handle, groups_2d(width, height, 1))?;
        }

        submit(device, self.output.transition_to(ResourceState::CopySource));
        Ok(())
    }

    /// Read the output back as tightly packed RGBA8 rows.
    pub fn read_rgba8(&self, device: &dyn ComputeDevice) -> BackendResult<Vec<u8>> {
        let texels = device.read_texture(self.output.handle(), 0, 0)?;
        Ok(texels
            .iter()
            .flat_map(|t| t.to_array().map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect())
    }
}
