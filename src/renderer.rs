//! Frame orchestration

use crate::accumulator::{AccumulationPhase, DirtyReasons, FrameSnapshot, SamplingState};
use crate::backend::software::SoftwareDevice;
use crate::backend::{BackendResult, ComputeDevice};
use crate::config::LabSettings;
use crate::pipeline::{Compositor, CubemapBaker, EnvMapFilter, LightingInputs, ObjectPass};
use crate::scene::{Camera, Scene};
use crate::LabConfig;

/// Runs every pass of a frame on a compute device and tracks accumulation.
pub struct Renderer<D: ComputeDevice = SoftwareDevice> {
    device: D,
    config: LabConfig,
    settings: LabSettings,
    scene: Scene,
    sampling: SamplingState,
    /// Reasons collected since the last frame
    pending: DirtyReasons,
    environment_dirty: bool,
    baker: CubemapBaker,
    filter: EnvMapFilter,
    object_pass: ObjectPass,
    compositor: Compositor,
}

impl<D: ComputeDevice> Renderer<D> {
    pub fn new(mut device: D, config: LabConfig, settings: LabSettings) -> BackendResult<Self> {
        log::info!(
            "Creating renderer {}x{} on {}",
            config.width,
            config.height,
            device.name()
        );
        let mut baker = CubemapBaker::new(&mut device, config.environment_size)?;
        baker.set_source(&mut device, &settings.environment.load_source())?;
        let filter = EnvMapFilter::new(
            &mut device,
            config.specular_size,
            config.diffuse_size,
            config.brdf_lut_size,
        )?;
        let object_pass =
            ObjectPass::new(&mut device, config.width, config.height, config.shadow_map_size)?;
        let compositor = Compositor::new(&mut device, config.width, config.height)?;

        let scene = Scene::build(settings.scene, &settings.material, config.aspect());
        let sampling = SamplingState::new(&settings.sampling);

        Ok(Self {
            device,
            config,
            settings,
            scene,
            sampling,
            pending: DirtyReasons::empty(),
            environment_dirty: true,
            baker,
            filter,
            object_pass,
            compositor,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn settings(&self) -> &LabSettings {
        &self.settings
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Camera changes are picked up at the next frame.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.scene.camera
    }

    pub fn sampling(&self) -> &SamplingState {
        &self.sampling
    }

    /// `(samples_processed, total_samples_target)`
    pub fn progress(&self) -> (u32, u32) {
        self.sampling.progress()
    }

    pub fn phase(&self) -> AccumulationPhase {
        self.sampling.phase()
    }

    pub fn baker(&self) -> &CubemapBaker {
        &self.baker
    }

    pub fn filter(&self) -> &EnvMapFilter {
        &self.filter
    }

    pub fn object_pass(&self) -> &ObjectPass {
        &self.object_pass
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Queue an invalidation for the next frame.
    pub fn invalidate(&mut self, reasons: DirtyReasons) {
        self.pending |= reasons;
    }

    /// Apply a new parameter set, queueing whatever it invalidates.
    pub fn update_settings(&mut self, settings: LabSettings) -> BackendResult<()> {
        let reasons = settings.diff(&self.settings);

        if reasons.intersects(DirtyReasons::SCENE | DirtyReasons::MATERIAL) {
            let camera = self.scene.camera.clone();
            let same_layout = settings.scene.scene == self.scene.scene_type;
            self.scene = Scene::build(settings.scene, &settings.material, self.config.aspect());
            if same_layout {
                self.scene.camera = camera;
            }
        }
        if reasons.contains(DirtyReasons::ENVIRONMENT) {
            let environment = &settings.environment;
            if environment.needs_reload(&self.settings.environment) {
                self.baker
                    .set_source(&mut self.device, &environment.load_source())?;
            } else {
                self.baker
                    .set_radiance(environment.texture_scale, environment.constant_radiance());
            }
            self.environment_dirty = true;
        }

        if !reasons.is_empty() {
            log::debug!("Settings changed: {:?}", reasons);
        }
        self.pending |= reasons;
        self.settings = settings;
        Ok(())
    }

    /// Rebuild every pipeline and start over.
    pub fn reload_shaders(&mut self) {
        log::info!("Reloading shaders");
        self.baker.reload_pipelines(&mut self.device);
        self.filter.reload_pipelines(&mut self.device);
        self.object_pass.reload_pipelines(&mut self.device);
        self.compositor.reload_pipelines(&mut self.device);
        self.environment_dirty = true;
        self.pending |= DirtyReasons::SHADER_RELOAD;
    }

    /// Render one frame and advance the accumulation.
    pub fn render_frame(&mut self) -> BackendResult<FrameSnapshot> {
        self.device.begin_frame();

        let reasons = std::mem::take(&mut self.pending);
        let frame = self.sampling.begin_frame(
            &self.settings.sampling,
            reasons,
            self.scene.camera.view_projection_matrix(),
        );
        let environment_enabled = self.settings.environment.enabled;

        if self.environment_dirty {
            self.baker.bake(&mut self.device)?;
            self.environment_dirty = false;
        }
        if environment_enabled && frame.needs_precompute() {
            log::info!("Running split-sum precompute ({} samples)", frame.total_samples);
            self.filter
                .run(&mut self.device, self.baker.cubemap_mut(), frame.total_samples)?;
        }

        self.object_pass
            .render_shadows(&mut self.device, &self.scene, &self.settings.light)?;
        self.object_pass.clear(&mut self.device, &frame)?;
        if environment_enabled {
            let camera = self.scene.camera.uniform_data();
            self.baker
                .draw_background(&mut self.device, &camera, self.object_pass.direct_mut())?;
        }

        let inputs = LightingInputs {
            scene: &self.scene,
            light: &self.settings.light,
            toggles: self.settings.brdf,
            environment_enabled,
            frame: &frame,
        };
        self.object_pass.render_lighting(
            &mut self.device,
            &inputs,
            self.baker.cubemap_mut(),
            &mut self.filter,
        )?;
        self.compositor
            .run(&mut self.device, &self.settings.post, &mut self.object_pass)?;

        self.device.end_frame();
        self.sampling.end_frame(&frame);
        Ok(frame)
    }

    /// Render until the sample budget is integrated or `max_frames` ran.
    pub fn render_until_converged(&mut self, max_frames: u32) -> BackendResult<u32> {
        for frame in 0..max_frames {
            self.render_frame()?;
            if self.phase() == AccumulationPhase::Converged {
                return Ok(frame + 1);
            }
        }
        Ok(max_frames)
    }

    /// Composited image as tightly packed RGBA8 rows.
    pub fn read_output(&self) -> BackendResult<Vec<u8>> {
        self.compositor.read_rgba8(&self.device)
    }
}
