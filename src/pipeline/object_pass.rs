//! Object shading
//!
//! One shader with two variants. `SHADOW_PASS` ray-casts the scene from the
//! light camera into the shadow map. The default variant ray-casts from the
//! view camera and, for every covered pixel, writes direct lighting into the
//! direct buffer and adds this frame's indirect estimate to the indirect
//! accumulation buffer as `(sum of radiance, sample count)`.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec2, Vec3, Vec4, Vec4Swizzles};

use super::{
    build_pipeline, destroy_pipeline, groups_2d, submit, EnvMapFilter, THREAD_GROUP_SIZE, UNBOUND,
};
use crate::accumulator::FrameSnapshot;
use crate::backend::software::{
    check_defines, filter_bilinear, AddressMode, ComputeKernel, CubeView, DispatchContext,
    Texture2dView,
};
use crate::backend::{
    BackendResult, ComputeDevice, ComputePipelineDescriptor, ConstantsHandle, PipelineHandle,
    ResourceState, TextureDescriptor, TextureFormat, TrackedTexture,
};
use crate::environment::{CubeSampler, LutSampler};
use crate::estimator::{estimator_for, IndirectInputs, SampleRange, SamplingMode};
use crate::lighting::sampling::pixel_scramble;
use crate::lighting::{direct_light, BrdfType, LobeToggles, MaterialParams};
use crate::scene::{
    closest_hit, shadow_lookup, CameraUniformData, DirectionalLight, LightUniformData, ObjectType,
    Ray, Scene, SceneObject,
};

pub const OBJECT_SHADER: &str = "object";

/// Selects the shadow-map variant of the object shader
pub const SHADOW_PASS: &str = "SHADOW_PASS";

/// Depth the shadow map holds where nothing was hit
const SHADOW_CLEAR_DEPTH: f32 = 1.0;

bitflags! {
    /// Feature switches of the light pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectPassFlags: u32 {
        /// Evaluate the diffuse lobe
        const DIFFUSE = 1 << 0;
        /// Evaluate the specular lobe
        const SPECULAR = 1 << 1;
        /// Integrate indirect lighting from the environment
        const ENVIRONMENT = 1 << 2;
    }
}

impl ObjectPassFlags {
    fn toggles(self) -> LobeToggles {
        LobeToggles {
            diffuse: self.contains(Self::DIFFUSE),
            specular: self.contains(Self::SPECULAR),
        }
    }
}

/// Per-dispatch constants, followed in the constant buffer by
/// `instance_count` [`InstanceData`] records
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub camera: CameraUniformData,
    pub light: LightUniformData,
    pub environment: u32,
    pub prefiltered_specular: u32,
    pub prefiltered_diffuse: u32,
    pub brdf_lut: u32,
    pub shadow_map: u32,
    pub direct: u32,
    pub indirect: u32,
    pub instance_count: u32,
    pub width: u32,
    pub height: u32,
    pub sampling_mode: u32,
    /// [`ObjectPassFlags`] bits
    pub flags: u32,
    pub sample_start: u32,
    pub sample_count: u32,
    pub total_samples: u32,
    pub frame_index: u32,
}

/// One scene object as the shader sees it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// xyz = center, w = radius or half extent
    pub position_size: Vec4,
    /// rgb = base color, w = metalness
    pub base_color_metalness: Vec4,
    /// x = perceptual roughness, y = reflectance
    pub params: Vec4,
    /// x = object type, y = BRDF type
    pub kind_brdf: UVec4,
}

impl InstanceData {
    pub fn from_object(object: &SceneObject) -> Self {
        let kind = match object.kind {
            ObjectType::Sphere => 0,
            ObjectType::Cube => 1,
        };
        let material = &object.material;
        Self {
            position_size: object.position.extend(object.size),
            base_color_metalness: material.base_color.extend(material.metalness),
            params: Vec4::new(material.perceptual_roughness, material.reflectance, 0.0, 0.0),
            kind_brdf: UVec4::new(kind, material.brdf.index(), 0, 0),
        }
    }

    pub fn to_object(&self) -> SceneObject {
        let kind = if self.kind_brdf.x == 1 {
            ObjectType::Cube
        } else {
            ObjectType::Sphere
        };
        let material = MaterialParams {
            brdf: BrdfType::from_index(self.kind_brdf.y).unwrap_or_default(),
            metalness: self.base_color_metalness.w,
            perceptual_roughness: self.params.x,
            reflectance: self.params.y,
            base_color: self.base_color_metalness.xyz(),
        };
        SceneObject {
            kind,
            position: self.position_size.xyz(),
            size: self.position_size.w,
            material,
        }
    }
}

fn bind_cube<'a>(ctx: &DispatchContext<'a>, index: u32) -> BackendResult<Option<CubeView<'a>>> {
    if index == UNBOUND {
        return Ok(None);
    }
    ctx.texture(index)?.cube_view().map(Some)
}

fn bind_2d<'a>(ctx: &DispatchContext<'a>, index: u32) -> BackendResult<Option<Texture2dView<'a>>> {
    if index == UNBOUND {
        return Ok(None);
    }
    ctx.texture(index)?.view_2d(AddressMode::ClampToEdge).map(Some)
}

/// Fraction of a 2x2 depth-comparison footprint that is lit.
fn shadow_visibility(shadow_map: &Texture2dView<'_>, uv: Vec3) -> f32 {
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || uv.z > 1.0 {
        return 1.0;
    }
    let compare = |x: u32, y: u32| {
        if uv.z <= shadow_map.load(x, y).x {
            Vec4::ONE
        } else {
            Vec4::ZERO
        }
    };
    filter_bilinear(
        shadow_map.width(),
        shadow_map.height(),
        uv.truncate(),
        AddressMode::ClampToEdge,
        compare,
    )
    .x
}

struct ObjectKernel {
    shadow_pass: bool,
}

impl ObjectKernel {
    fn shadow(
        &self,
        ctx: &DispatchContext<'_>,
        c: &ObjectConstants,
        objects: &[SceneObject],
    ) -> BackendResult<()> {
        let target = ctx.texture(c.shadow_map)?;
        let format = target.desc().format;
        let size = target.desc().width;
        let inv_view_proj = c.light.inv_shadow_view_proj;
        let view_proj = c.light.shadow_view_proj;

        let mut texels = target.write_mip(0)?;
        ctx.for_each_thread(|id| {
            if id.x >= size || id.y >= size {
                return;
            }
            let ndc = Vec2::new(
                (id.x as f32 + 0.5) / size as f32 * 2.0 - 1.0,
                1.0 - (id.y as f32 + 0.5) / size as f32 * 2.0,
            );
            let near = inv_view_proj.project_point3(ndc.extend(0.0));
            let far = inv_view_proj.project_point3(ndc.extend(1.0));
            let ray = Ray::new(near, (far - near).normalize());
            let depth = closest_hit(objects, &ray, 0.0)
                .map(|hit| view_proj.project_point3(hit.position).z)
                .unwrap_or(SHADOW_CLEAR_DEPTH);
            texels[(id.y * size + id.x) as usize] = format.quantize(Vec4::new(depth, 0.0, 0.0, 1.0));
        });
        Ok(())
    }

    fn lighting(
        &self,
        ctx: &DispatchContext<'_>,
        c: &ObjectConstants,
        objects: &[SceneObject],
    ) -> BackendResult<()> {
        let mode = SamplingMode::from_index(c.sampling_mode)
            .ok_or_else(|| ctx.error(format!("unknown sampling mode {}", c.sampling_mode)))?;
        let estimator = estimator_for(mode);
        let range = SampleRange {
            start: c.sample_start,
            count: c.sample_count,
            total: c.total_samples,
        };
        let flags = ObjectPassFlags::from_bits_truncate(c.flags);
        let toggles = flags.toggles();
        let integrate = flags.contains(ObjectPassFlags::ENVIRONMENT) && !range.is_empty();

        let environment = if integrate {
            bind_cube(ctx, c.environment)?
        } else {
            None
        };
        let prefiltered_specular = bind_cube(ctx, c.prefiltered_specular)?;
        let prefiltered_diffuse = bind_cube(ctx, c.prefiltered_diffuse)?;
        let brdf_lut = bind_2d(ctx, c.brdf_lut)?;
        let shadow_map = if c.light.shadows_enabled() {
            bind_2d(ctx, c.shadow_map)?
        } else {
            None
        };
        let light_dir = c.light.direction.xyz();
        let illuminance = c.light.illuminance.xyz();

        let direct_target = ctx.texture(c.direct)?;
        let indirect_target = ctx.texture(c.indirect)?;
        let direct_format = direct_target.desc().format;
        let indirect_format = indirect_target.desc().format;
        let mut direct = direct_target.write_mip(0)?;
        let mut indirect = indirect_target.write_mip(0)?;

        let size = Vec2::new(c.width as f32, c.height as f32);
        ctx.for_each_thread(|id| {
            if id.x >= c.width || id.y >= c.height {
                return;
            }
            let ray = c.camera.pixel_ray(Vec2::new(id.x as f32, id.y as f32), size);
            let Some(hit) = closest_hit(objects, &ray, 0.0) else {
                return;
            };
            let index = (id.y * c.width + id.x) as usize;
            let material = objects[hit.object].material.sample();
            let n = hit.normal;
            let v = -ray.direction;

            let visibility = shadow_map.as_ref().map_or(1.0, |shadow_map| {
                let uv = shadow_lookup(&c.light, hit.position, n, shadow_map.width());
                shadow_visibility(shadow_map, uv)
            });
            let radiance = direct_light(n, light_dir, v, &material, toggles) * illuminance * visibility;
            direct[index] = direct_format.quantize(radiance.extend(1.0));

            if let Some(environment) = environment.as_ref() {
                let inputs = IndirectInputs {
                    environment,
                    prefiltered_specular: prefiltered_specular.as_ref().map(|v| v as &dyn CubeSampler),
                    prefiltered_diffuse: prefiltered_diffuse.as_ref().map(|v| v as &dyn CubeSampler),
                    brdf_lut: brdf_lut.as_ref().map(|v| v as &dyn LutSampler),
                    toggles,
                    random: pixel_scramble(id.x, id.y, c.frame_index),
                };
                let sample = estimator.estimate(&inputs, n, v, &material, range);
                let sum = indirect[index] + sample.radiance.extend(sample.sample_count as f32);
                indirect[index] = indirect_format.quantize(sum);
            }
        });
        Ok(())
    }
}

impl ComputeKernel for ObjectKernel {
    fn group_size(&self) -> [u32; 3] {
        [THREAD_GROUP_SIZE, THREAD_GROUP_SIZE, 1]
    }

    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()> {
        let constants: ObjectConstants = ctx.constants()?;
        let objects: Vec<SceneObject> = ctx
            .constants_array::<InstanceData>(
                std::mem::size_of::<ObjectConstants>(),
                constants.instance_count as usize,
            )?
            .iter()
            .map(InstanceData::to_object)
            .collect();
        if self.shadow_pass {
            self.shadow(ctx, &constants, &objects)
        } else {
            self.lighting(ctx, &constants, &objects)
        }
    }
}

pub fn object_kernel(desc: &ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>> {
    check_defines(desc, &[SHADOW_PASS])?;
    Ok(Arc::new(ObjectKernel {
        shadow_pass: desc.has_define(SHADOW_PASS),
    }))
}

/// Everything the light pass reads for one frame
pub struct LightingInputs<'a> {
    pub scene: &'a Scene,
    pub light: &'a DirectionalLight,
    pub toggles: LobeToggles,
    /// Integrate indirect lighting at all
    pub environment_enabled: bool,
    pub frame: &'a FrameSnapshot,
}

/// Owns the shadow map and the direct and indirect radiance buffers.
pub struct ObjectPass {
    shadow_map: TrackedTexture,
    direct: TrackedTexture,
    indirect: TrackedTexture,
    shadow_pipeline: Option<PipelineHandle>,
    light_pipeline: Option<PipelineHandle>,
}

impl ObjectPass {
    pub fn new(
        device: &mut dyn ComputeDevice,
        width: u32,
        height: u32,
        shadow_map_size: u32,
    ) -> BackendResult<Self> {
        let shadow_map = TrackedTexture::create(
            device,
            TextureDescriptor::target_2d(
                "ShadowMap",
                shadow_map_size,
                shadow_map_size,
                TextureFormat::R32Float,
            ),
        )?;
        let direct = TrackedTexture::create(
            device,
            TextureDescriptor::target_2d("DirectLight", width, height, TextureFormat::Rgba16Float),
        )?;
        let indirect = TrackedTexture::create(
            device,
            TextureDescriptor::target_2d("IndirectLight", width, height, TextureFormat::Rgba32Float),
        )?;
        let mut pass = Self {
            shadow_map,
            direct,
            indirect,
            shadow_pipeline: None,
            light_pipeline: None,
        };
        pass.reload_pipelines(device);
        Ok(pass)
    }

    pub fn reload_pipelines(&mut self, device: &mut dyn ComputeDevice) {
        destroy_pipeline(device, &mut self.shadow_pipeline);
        destroy_pipeline(device, &mut self.light_pipeline);
        self.shadow_pipeline = build_pipeline(
            device,
            ComputePipelineDescriptor::new("ShadowPass", OBJECT_SHADER).with_define(SHADOW_PASS),
        );
        self.light_pipeline =
            build_pipeline(device, ComputePipelineDescriptor::new("LightPass", OBJECT_SHADER));
    }

    pub fn width(&self) -> u32 {
        self.direct.width()
    }

    pub fn height(&self) -> u32 {
        self.direct.desc().height
    }

    pub fn shadow_map(&self) -> &TrackedTexture {
        &self.shadow_map
    }

    pub fn direct(&self) -> &TrackedTexture {
        &self.direct
    }

    /// Sky target of the background draw
    pub fn direct_mut(&mut self) -> &mut TrackedTexture {
        &mut self.direct
    }

    /// Accumulated indirect radiance, `rgb` summed over `a` samples
    pub fn indirect(&self) -> &TrackedTexture {
        &self.indirect
    }

    pub(crate) fn transition_outputs(&mut self, device: &mut dyn ComputeDevice, state: ResourceState) {
        let mut barriers = self.direct.transition_to(state);
        barriers.extend(self.indirect.transition_to(state));
        submit(device, barriers);
    }

    fn base_constants(
        &self,
        scene: &Scene,
        light: &DirectionalLight,
    ) -> (ObjectConstants, Vec<InstanceData>) {
        let instances: Vec<InstanceData> =
            scene.objects.iter().map(InstanceData::from_object).collect();
        let constants = ObjectConstants {
            camera: scene.camera.uniform_data(),
            light: light.uniform_data(),
            environment: UNBOUND,
            prefiltered_specular: UNBOUND,
            prefiltered_diffuse: UNBOUND,
            brdf_lut: UNBOUND,
            shadow_map: self.shadow_map.bindless(),
            direct: self.direct.bindless(),
            indirect: self.indirect.bindless(),
            instance_count: instances.len() as u32,
            width: self.width(),
            height: self.height(),
            ..ObjectConstants::zeroed()
        };
        (constants, instances)
    }

    fn upload(
        device: &mut dyn ComputeDevice,
        constants: &ObjectConstants,
        instances: &[InstanceData],
    ) -> ConstantsHandle {
        let mut data = bytemuck::bytes_of(constants).to_vec();
        data.extend_from_slice(bytemuck::cast_slice(instances));
        device.upload_constants(&data)
    }

    /// Render light-space depth. The map is cleared to the far plane first, so
    /// a disabled or failed pass leaves everything lit.
    pub fn render_shadows(
        &mut self,
        device: &mut dyn ComputeDevice,
        scene: &Scene,
        light: &DirectionalLight,
    ) -> BackendResult<()> {
        submit(device, self.shadow_map.transition_to(ResourceState::DepthWrite));
        device.clear_texture(self.shadow_map.handle(), 0, Vec4::splat(SHADOW_CLEAR_DEPTH))?;

        if let (Some(pipeline), true) = (self.shadow_pipeline, light.enabled && light.shadow) {
            let (constants, instances) = self.base_constants(scene, light);
            let handle = Self::upload(device, &constants, &instances);
            let size = self.shadow_map.width();
            device.dispatch(pipeline, handle, groups_2d(size, size, 1))?;
        }
        submit(device, self.shadow_map.transition_to(ResourceState::ShaderResource));
        Ok(())
    }

    /// Clear the direct buffer, and the indirect buffer when the frame restarts accumulation.
    pub fn clear(
        &mut self,
        device: &mut dyn ComputeDevice,
        frame: &FrameSnapshot,
    ) -> BackendResult<()> {
        self.transition_outputs(device, ResourceState::UnorderedAccess);
        device.clear_texture(self.direct.handle(), 0, Vec4::ZERO)?;
        if frame.clear_indirect() {
            log::trace!("Clearing indirect accumulation");
            device.clear_texture(self.indirect.handle(), 0, Vec4::ZERO)?;
        }
        Ok(())
    }

    /// Shade every covered pixel. Leaves both buffers readable.
    pub fn render_lighting(
        &mut self,
        device: &mut dyn ComputeDevice,
        inputs: &LightingInputs<'_>,
        environment: &mut TrackedTexture,
        precomputed: &mut EnvMapFilter,
    ) -> BackendResult<()> {
        self.transition_outputs(device, ResourceState::UnorderedAccess);

        if let Some(pipeline) = self.light_pipeline {
            let frame = inputs.frame;
            let (mut constants, instances) = self.base_constants(inputs.scene, inputs.light);
            let mut flags = ObjectPassFlags::empty();
            flags.set(ObjectPassFlags::DIFFUSE, inputs.toggles.diffuse);
            flags.set(ObjectPassFlags::SPECULAR, inputs.toggles.specular);
            flags.set(ObjectPassFlags::ENVIRONMENT, inputs.environment_enabled);

            if inputs.environment_enabled {
                submit(device, environment.transition_to(ResourceState::ShaderResource));
                constants.environment = environment.bindless();
                if frame.mode.needs_precompute() {
                    precomputed.transition_outputs(device, ResourceState::ShaderResource);
                    constants.prefiltered_specular = precomputed.prefiltered_specular().bindless();
                    constants.prefiltered_diffuse = precomputed.prefiltered_diffuse().bindless();
                    constants.brdf_lut = precomputed.brdf_lut().bindless();
                }
            }
            constants.sampling_mode = frame.mode.index();
            constants.flags = flags.bits();
            constants.sample_start = frame.range.start;
            constants.sample_count = frame.range.count;
            constants.total_samples = frame.range.total;
            constants.frame_index = frame.frame_index;

            let handle = Self::upload(device, &constants, &instances);
            device.dispatch(pipeline, handle, groups_2d(self.width(), self.height(), 1))?;
        }

        self.transition_outputs(device, ResourceState::ShaderResource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneSettings;

    #[test]
    fn test_constants_layout() {
        assert_eq!(std::mem::size_of::<ObjectConstants>() % 16, 0);
        assert_eq!(std::mem::size_of::<InstanceData>(), 64);
    }

    #[test]
    fn test_instance_round_trip_keeps_material() {
        let scene = Scene::build(
            SceneSettings {
                scene: crate::scene::SceneType::ObjectsGrid,
                object: ObjectType::Cube,
            },
            &MaterialParams {
                brdf: BrdfType::RoughPlastic,
                ..Default::default()
            },
            1.0,
        );
        for object in &scene.objects {
            assert_eq!(InstanceData::from_object(object).to_object(), *object);
        }
    }

    #[test]
    fn test_shadow_visibility_compares_depth() {
        let storage = crate::backend::software::TextureStorage::new(TextureDescriptor::target_2d(
            "s",
            2,
            2,
            TextureFormat::R32Float,
        ));
        storage
            .write_mip(0)
            .unwrap()
            .iter_mut()
            .for_each(|t| *t = Vec4::new(0.5, 0.0, 0.0, 1.0));
        let view = storage.view_2d(AddressMode::ClampToEdge).unwrap();
        assert_eq!(shadow_visibility(&view, Vec3::new(0.5, 0.5, 0.4)), 1.0);
        assert_eq!(shadow_visibility(&view, Vec3::new(0.5, 0.5, 0.6)), 0.0);
        assert_eq!(shadow_visibility(&view, Vec3::new(1.5, 0.5, 0.6)), 1.0);
    }
}
