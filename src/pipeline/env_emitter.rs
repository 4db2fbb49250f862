//! Environment emitter
//!
//! Bakes the environment source into the scene cubemap, downsamples its mip
//! chain, and draws the sky behind the objects.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::{
    build_pipeline, destroy_pipeline, groups_2d, submit, upload, THREAD_GROUP_SIZE, UNBOUND,
};
use crate::backend::software::{
    check_defines, AddressMode, ComputeKernel, CubeView, DispatchContext, Texture2dView,
};
use crate::backend::{
    mip_size, BackendResult, ComputeDevice, ComputePipelineDescriptor, PipelineHandle,
    ResourceState, TextureDescriptor, TextureFormat, TextureUsage, TrackedTexture,
};
use crate::environment::{
    equirect_uv, texel_direction, CubeSampler, EnvironmentLayout, EnvironmentSource,
    EnvironmentTexture, FACE_COUNT,
};
use crate::scene::CameraUniformData;

pub const ENV_EMITTER_SHADER: &str = "env_emitter";
pub const MIPS_GENERATOR_SHADER: &str = "mips_generator";

/// Selects the cubemap bake variant of the emitter shader
pub const CUBEMAP_BAKE: &str = "CUBEMAP_BAKE";

const SOURCE_CONSTANT: u32 = 0;
const SOURCE_EQUIRECT: u32 = 1;
const SOURCE_CUBE: u32 = 2;

/// Constants of the emitter shader, shared by both variants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EnvEmitterConstants {
    /// Background only
    pub camera: CameraUniformData,
    /// xyz = constant radiance, w = texture scale
    pub radiance: Vec4,
    pub source: u32,
    pub source_kind: u32,
    /// Cubemap being baked, or the target the background is drawn into
    pub target: u32,
    pub width: u32,
    pub height: u32,
    /// Baked cubemap the background reads
    pub cubemap: u32,
    pub _padding: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MipsConstants {
    pub texture: u32,
    /// Mip written; mip `dst_mip - 1` is read
    pub dst_mip: u32,
    pub _padding: [u32; 2],
}

enum SourceView<'a> {
    Constant(Vec3),
    Equirect(Texture2dView<'a>, f32),
    Cube(CubeView<'a>, f32),
}

impl<'a> SourceView<'a> {
    fn bind(ctx: &DispatchContext<'a>, c: &EnvEmitterConstants) -> BackendResult<Self> {
        let scale = c.radiance.w;
        match c.source_kind {
            SOURCE_EQUIRECT => Ok(Self::Equirect(
                ctx.texture(c.source)?.view_2d(AddressMode::RepeatU)?,
                scale,
            )),
            SOURCE_CUBE => Ok(Self::Cube(ctx.texture(c.source)?.cube_view()?, scale)),
            _ => Ok(Self::Constant(c.radiance.xyz())),
        }
    }

    fn radiance(&self, dir: Vec3) -> Vec3 {
        match self {
            Self::Constant(radiance) => *radiance,
            Self::Equirect(view, scale) => view.sample_bilinear(equirect_uv(dir)).xyz() * *scale,
            Self::Cube(view, scale) => view.sample_level(dir, 0.0) * *scale,
        }
    }
}

struct EnvEmitterKernel {
    bake: bool,
}

impl EnvEmitterKernel {
    fn bake(&self, ctx: &DispatchContext<'_>, c: &EnvEmitterConstants) -> BackendResult<()> {
        let source = SourceView::bind(ctx, c)?;
        let target = ctx.texture(c.target)?;
        let size = target.desc().width;
        let format = target.desc().format;
        let mut texels = target.write_mip(0)?;
        ctx.for_each_thread(|id| {
            if id.x >= size || id.y >= size || id.z >= FACE_COUNT {
                return;
            }
            let dir = texel_direction(id.z, id.x, id.y, size);
            let index = ((id.z * size + id.y) * size + id.x) as usize;
            texels[index] = format.quantize(source.radiance(dir).extend(1.0));
        });
        Ok(())
    }

    fn background(&self, ctx: &DispatchContext<'_>, c: &EnvEmitterConstants) -> BackendResult<()> {
        let cubemap = ctx.texture(c.cubemap)?.cube_view()?;
        let target = ctx.texture(c.target)?;
        let format = target.desc().format;
        let size = Vec2::new(c.width as f32, c.height as f32);
        let mut texels = target.write_mip(0)?;
        ctx.for_each_thread(|id| {
            if id.x >= c.width || id.y >= c.height {
                return;
            }
            let ray = c.camera.pixel_ray(Vec2::new(id.x as f32, id.y as f32), size);
            let radiance = cubemap.sample_level(ray.direction, 0.0);
            texels[(id.y * c.width + id.x) as usize] = format.quantize(radiance.extend(1.0));
        });
        Ok(())
    }
}

impl ComputeKernel for EnvEmitterKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let constants: EnvEmitterConstants = ctx.constants()?;
        if self.bake {
            self.bake(ctx, &constants)
        } else {
            self.background(ctx, &constants)
        }
    }
}

pub fn env_emitter_kernel(
    desc: &ComputePipelineDescriptor,
) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[CUBEMAP_BAKE])?;
    Ok(Arc::new(EnvEmitterKernel {
        bake: desc.has_define(CUBEMAP_BAKE),
    }))
}

/// 2x2 box filter from mip `k - 1` into mip `k` of every face.
struct MipsGeneratorKernel;

impl ComputeKernel for MipsGeneratorKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let c: MipsConstants = ctx.constants()?;
        if c.dst_mip == 0 {
            return Err(ctx.error("mip 0 has no source level".into()));
        }
        let texture = ctx.texture(c.texture)?;
        let desc = texture.desc();
        let faces = desc.array_layers();
        let format = desc.format;
        let src_size = mip_size(desc.width, c.dst_mip - 1);
        let dst_size = mip_size(desc.width, c.dst_mip);

        let src = texture.read_mip(c.dst_mip - 1)?;
        let mut dst = texture.write_mip(c.dst_mip)?;
        let load = |face: u32, x: u32, y: u32| {
            let (x, y) = (x.min(src_size - 1), y.min(src_size - 1));
            let index = ((face * src_size + y) * src_size + x) as usize;
            src.get(index).copied().unwrap_or(Vec4::ZERO)
        };
        ctx.for_each_thread(|id| {
            if id.x >= dst_size || id.y >= dst_size || id.z >= faces {
                return;
            }
            let (x, y, face) = (id.x * 2, id.y * 2, id.z);
            let sum = load(face, x, y)
                + load(face, x + 1, y)
                + load(face, x, y + 1)
                + load(face, x + 1, y + 1);
            let index = ((face * dst_size + id.y) * dst_size + id.x) as usize;
            dst[index] = format.quantize(sum * 0.25);
        });
        Ok(())
    }
}

pub fn mips_generator_kernel(
    desc: &ComputePipelineDescriptor,
) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[])?;
    Ok(Arc::new(MipsGeneratorKernel))
}

/// Environment image uploaded to the device
struct UploadedTexture {
    texture: Arc<EnvironmentTexture>,
    gpu: TrackedTexture,
}

enum BoundSource {
    Constant(Vec3),
    Texture { uploaded: UploadedTexture, scale: f32 },
}

/// Owns the scene environment cubemap and renders it from the current source.
pub struct CubemapBaker {
    cubemap: TrackedTexture,
    source: BoundSource,
    bake_pipeline: Option<PipelineHandle>,
    background_pipeline: Option<PipelineHandle>,
    mips_pipeline: Option<PipelineHandle>,
}

impl CubemapBaker {
    /// Allocate a `size` cubemap with a full mip chain.
    pub fn new(device: &mut dyn ComputeDevice, size: u32) -> BackendResult<Self> {
        let cubemap = TrackedTexture::create(
            device,
            TextureDescriptor::cubemap("EnvironmentCubemap", size, true, TextureFormat::Rgba16Float),
        )?;
        log::info!(
            "Environment cubemap {}x{} with {} mips",
            size,
            size,
            cubemap.mip_levels()
        );
        let mut baker = Self {
            cubemap,
            source: BoundSource::Constant(Vec3::ONE),
            bake_pipeline: None,
            background_pipeline: None,
            mips_pipeline: None,
        };
        baker.reload_pipelines(device);
        Ok(baker)
    }

    /// Rebuild every pipeline. Pipelines that fail stay `None`.
    pub fn reload_pipelines(&mut self, device: &mut dyn ComputeDevice) {
        destroy_pipeline(device, &mut self.bake_pipeline);
        destroy_pipeline(device, &mut self.background_pipeline);
        destroy_pipeline(device, &mut self.mips_pipeline);

        self.bake_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("EnvEmitterCubemapBake", ENV_EMITTER_SHADER)
                .with_define(CUBEMAP_BAKE),
        );
        self.background_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("EnvEmitterBackground", ENV_EMITTER_SHADER),
        );
        self.mips_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("MipsGenerator", MIPS_GENERATOR_SHADER),
        );
    }

    pub fn cubemap(&self) -> &TrackedTexture {
        &self.cubemap
    }

    pub fn cubemap_mut(&mut self) -> &mut TrackedTexture {
        &mut self.cubemap
    }

    /// Bind the source the next bake reads. Textures are uploaded once per image;
    /// a replaced upload is destroyed.
    pub fn set_source(
        &mut self,
        device: &mut dyn ComputeDevice,
        source: &EnvironmentSource,
    ) -> BackendResult<()> {
        let next = match source {
            EnvironmentSource::Constant { radiance } => BoundSource::Constant(*radiance),
            EnvironmentSource::Texture { texture, scale } => {
                if let BoundSource::Texture {
                    uploaded,
                    scale: bound_scale,
                } = &mut self.source
                {
                    if Arc::ptr_eq(&uploaded.texture, texture) {
                        *bound_scale = *scale;
                        return Ok(());
                    }
                }
                BoundSource::Texture {
                    uploaded: Self::upload_texture(device, texture)?,
                    scale: *scale,
                }
            }
        };
        if let BoundSource::Texture { uploaded, .. } = std::mem::replace(&mut self.source, next) {
            log::debug!("Releasing environment {}", uploaded.texture.path().display());
            device.destroy_texture(uploaded.gpu.handle());
        }
        Ok(())
    }

    /// Change the radiance of the bound source without reloading it: the
    /// texture scale of an uploaded image, or the constant radiance otherwise.
    pub fn set_radiance(&mut self, texture_scale: f32, constant: Vec3) {
        match &mut self.source {
            BoundSource::Constant(radiance) => *radiance = constant,
            BoundSource::Texture { scale, .. } => *scale = texture_scale,
        }
    }

    /// Whether an image is uploaded and bound.
    pub fn has_texture_source(&self) -> bool {
        matches!(self.source, BoundSource::Texture { .. })
    }

    fn upload_texture(
        device: &mut dyn ComputeDevice,
        texture: &Arc<EnvironmentTexture>,
    ) -> BackendResult<UploadedTexture> {
        let mut desc = match texture.layout() {
            EnvironmentLayout::Equirectangular => TextureDescriptor::target_2d(
                "EnvironmentSource",
                texture.width(),
                texture.height(),
                TextureFormat::Rgba32Float,
            ),
            EnvironmentLayout::CubeStrip => TextureDescriptor::cubemap(
                "EnvironmentSource",
                texture.face_size(),
                false,
                TextureFormat::Rgba32Float,
            ),
        };
        desc.usage = TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST;
        let mut gpu = TrackedTexture::create(device, desc)?;

        submit(device, gpu.transition_to(ResourceState::CopyDest));
        match texture.layout() {
            EnvironmentLayout::Equirectangular => {
                device.write_texture(gpu.handle(), 0, 0, &texture.rgba_texels())?;
            }
            EnvironmentLayout::CubeStrip => {
                for face in 0..FACE_COUNT {
                    device.write_texture(gpu.handle(), 0, face, &texture.face_texels(face))?;
                }
            }
        }
        submit(device, gpu.transition_to(ResourceState::ShaderResource));
        log::debug!(
            "Uploaded environment {} as {:?}",
            texture.path().display(),
            texture.layout()
        );

        Ok(UploadedTexture {
            texture: Arc::clone(texture),
            gpu,
        })
    }

    fn source_constants(&self) -> EnvEmitterConstants {
        let (radiance, source, source_kind) = match &self.source {
            BoundSource::Constant(radiance) => (radiance.extend(1.0), UNBOUND, SOURCE_CONSTANT),
            BoundSource::Texture { uploaded, scale } => {
                let kind = match uploaded.texture.layout() {
                    EnvironmentLayout::Equirectangular => SOURCE_EQUIRECT,
                    EnvironmentLayout::CubeStrip => SOURCE_CUBE,
                };
                (Vec4::new(0.0, 0.0, 0.0, *scale), uploaded.gpu.bindless(), kind)
            }
        };
        EnvEmitterConstants {
            radiance,
            source,
            source_kind,
            ..EnvEmitterConstants::zeroed()
        }
    }

    /// Render mip 0 of every face from the source, then each mip from the one above.
    ///
    /// Without pipelines the cubemap is only moved to a readable state.
    pub fn bake(&mut self, device: &mut dyn ComputeDevice) -> BackendResult<()> {
        let Some(bake_pipeline) = self.bake_pipeline else {
            log::debug!("Cubemap bake skipped: no pipeline");
            submit(device, self.cubemap.transition_to(ResourceState::ShaderResource));
            return Ok(());
        };

        let size = self.cubemap.width();
        let constants = EnvEmitterConstants {
            target: self.cubemap.bindless(),
            width: size,
            height: size,
            ..self.source_constants()
        };
        submit(device, self.cubemap.transition_mip(0, ResourceState::RenderTarget));
        let handle = upload(device, &constants);
        device.dispatch(bake_pipeline, handle, groups_2d(size, size, FACE_COUNT))?;
        submit(device, self.cubemap.transition_mip(0, ResourceState::ShaderResource));

        let Some(mips_pipeline) = self.mips_pipeline else {
            log::debug!("Mip generation skipped: no pipeline");
            submit(device, self.cubemap.transition_to(ResourceState::ShaderResource));
            return Ok(());
        };
        for mip in 1..self.cubemap.mip_levels() {
            let extent = mip_size(size, mip);
            submit(device, self.cubemap.transition_mip(mip, ResourceState::UnorderedAccess));
            let handle = upload(
                device,
                &MipsConstants {
                    texture: self.cubemap.bindless(),
                    dst_mip: mip,
                    _padding: [0; 2],
                },
            );
            device.dispatch(mips_pipeline, handle, groups_2d(extent, extent, FACE_COUNT))?;
            submit(device, self.cubemap.transition_mip(mip, ResourceState::ShaderResource));
        }
        log::info!("Baked environment cubemap ({} mips)", self.cubemap.mip_levels());
        Ok(())
    }

    /// Draw mip 0 of the baked cubemap along every view ray of `target`.
    pub fn draw_background(
        &mut self,
        device: &mut dyn ComputeDevice,
        camera: &CameraUniformData,
        target: &mut TrackedTexture,
    ) -> BackendResult<()> {
        submit(device, target.transition_to(ResourceState::UnorderedAccess));
        let Some(pipeline) = self.background_pipeline else {
            return Ok(());
        };
        submit(device, self.cubemap.transition_to(ResourceState::ShaderResource));

        let (width, height) = (target.width(), target.desc().height);
        let constants = EnvEmitterConstants {
            camera: *camera,
            target: target.bindless(),
            width,
            height,
            cubemap: self.cubemap.bindless(),
            ..EnvEmitterConstants::zeroed()
        };
        let handle = upload(device, &constants);
        device.dispatch(pipeline, handle, groups_2d(width, height, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareDevice;

    #[test]
    fn test_constants_are_tightly_packed() {
        assert_eq!(std::mem::size_of::<EnvEmitterConstants>() % 16, 0);
        assert_eq!(std::mem::size_of::<MipsConstants>(), 16);
    }

    #[test]
    fn test_constant_bake_fills_every_mip() {
        let mut device = SoftwareDevice::new();
        let mut baker = CubemapBaker::new(&mut device, 8).unwrap();
        baker
            .set_source(&mut device, &EnvironmentSource::constant(Vec3::new(1.0, 0.5, 0.25), 2.0))
            .unwrap();
        baker.bake(&mut device).unwrap();

        let handle = baker.cubemap().handle();
        for mip in 0..baker.cubemap().mip_levels() {
            for face in 0..FACE_COUNT {
                let texels = device.read_texture(handle, mip, face).unwrap();
                assert!(texels.iter().all(|t| *t == Vec4::new(2.0, 1.0, 0.5, 1.0)));
            }
        }
        assert_eq!(
            baker.cubemap().states().uniform_state(),
            Some(ResourceState::ShaderResource)
        );
        assert_eq!(device.validation_errors(), 0);
    }

    #[test]
    fn test_box_filter_averages_quads() {
        let mut device = SoftwareDevice::new();
        let texture = device
            .create_texture(&TextureDescriptor::cubemap("c", 2, true, TextureFormat::Rgba32Float))
            .unwrap();
        let checker = [Vec4::ZERO, Vec4::ONE, Vec4::ONE, Vec4::splat(2.0)];
        device.write_texture(texture, 0, 4, &checker).unwrap();

        let pipeline = device
            .create_compute_pipeline(&ComputePipelineDescriptor::new("Mips", MIPS_GENERATOR_SHADER))
            .unwrap();
        let index = device.bindless_index(texture).unwrap();
        let constants = upload(
            &mut device,
            &MipsConstants {
                texture: index,
                dst_mip: 1,
                _padding: [0; 2],
            },
        );
        device.dispatch(pipeline, constants, [1, 1, 6]).unwrap();
        assert_eq!(device.read_texture(texture, 1, 4).unwrap()[0], Vec4::splat(1.0));
        assert_eq!(device.read_texture(texture, 1, 0).unwrap()[0], Vec4::ZERO);
    }

    #[test]
    fn test_equirect_source_is_uploaded_once() {
        let mut device = SoftwareDevice::new();
        let mut baker = CubemapBaker::new(&mut device, 4).unwrap();
        let texture =
            EnvironmentTexture::from_texels("sky.hdr", 8, 4, vec![Vec3::splat(3.0); 32]).unwrap();
        let source = EnvironmentSource::texture(texture, 0.5);
        baker.set_source(&mut device, &source).unwrap();
        baker.set_source(&mut device, &source).unwrap();
        baker.bake(&mut device).unwrap();

        let texels = device.read_texture(baker.cubemap().handle(), 0, 2).unwrap();
        assert!(texels.iter().all(|t| (t.x - 1.5).abs() < 1e-3));
        // cubemap plus a single source texture
        assert_eq!(device.live_texture_count(), 2);
    }

    #[test]
    fn test_replaced_source_texture_is_destroyed() {
        let mut device = SoftwareDevice::new();
        let mut baker = CubemapBaker::new(&mut device, 4).unwrap();
        let sky = |value: f32| {
            let texture =
                EnvironmentTexture::from_texels("sky.hdr", 8, 4, vec![Vec3::splat(value); 32])
                    .unwrap();
            EnvironmentSource::texture(texture, 1.0)
        };
        for value in [1.0, 2.0, 3.0] {
            baker.set_source(&mut device, &sky(value)).unwrap();
            assert_eq!(device.live_texture_count(), 2);
        }
        baker.bake(&mut device).unwrap();
        let texels = device.read_texture(baker.cubemap().handle(), 0, 0).unwrap();
        assert!(texels.iter().all(|t| (t.x - 3.0).abs() < 1e-2));

        baker
            .set_source(&mut device, &EnvironmentSource::constant(Vec3::ONE, 1.0))
            .unwrap();
        assert!(!baker.has_texture_source());
        assert_eq!(device.live_texture_count(), 1);
    }

    #[test]
    fn test_set_radiance_rescales_without_upload() {
        let mut device = SoftwareDevice::new();
        let mut baker = CubemapBaker::new(&mut device, 4).unwrap();
        let texture =
            EnvironmentTexture::from_texels("sky.hdr", 8, 4, vec![Vec3::splat(2.0); 32]).unwrap();
        baker
            .set_source(&mut device, &EnvironmentSource::texture(texture, 1.0))
            .unwrap();
        baker.set_radiance(0.25, Vec3::splat(9.0));
        baker.bake(&mut device).unwrap();

        assert_eq!(device.live_texture_count(), 2);
        let texels = device.read_texture(baker.cubemap().handle(), 0, 1).unwrap();
        assert!(texels.iter().all(|t| (t.x - 0.5).abs() < 1e-3));
    }
}
