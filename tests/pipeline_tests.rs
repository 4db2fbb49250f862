//! Lighting passes on the software device.
//!
//! # Test Categories
//!
//! - **Precompute**: split-sum resources are a pure function of the cubemap
//! - **Barrier ordering**: mip `k` is generated only after mip `k - 1` is readable
//! - **Degraded output**: a pass whose shader fails to build becomes a no-op
//! - **Environment fallback**: unusable images fall back to constant luminance

mod common;

use glam::Vec3;
use rstest::rstest;

use common::{
    barriers_of, init_logging, settings, sky_source, small_config, texture_bits,
    write_equirect_png,
};
use ibl_lab::backend::software::{Command, SoftwareDevice};
use ibl_lab::backend::{ComputeDevice, ResourceState};
use ibl_lab::config::{EnvironmentKind, EnvironmentSettings};
use ibl_lab::lighting::BrdfType;
use ibl_lab::environment::EnvironmentSource;
use ibl_lab::pipeline::env_emitter::{MipsConstants, ENV_EMITTER_SHADER, MIPS_GENERATOR_SHADER};
use ibl_lab::pipeline::env_map_filter::{BRDF_LUT_SHADER, ENV_MAP_PREFILTER_SHADER};
use ibl_lab::pipeline::object_pass::OBJECT_SHADER;
use ibl_lab::pipeline::postprocess::POSTPROCESS_SHADER;
use ibl_lab::pipeline::{CubemapBaker, EnvMapFilter};
use ibl_lab::{AccumulationPhase, LabConfig, Renderer, SamplingMode};

fn baked_sky(device: &mut SoftwareDevice) -> CubemapBaker {
    let mut baker = CubemapBaker::new(device, 16).unwrap();
    baker.set_source(device, &sky_source()).unwrap();
    baker.bake(device).unwrap();
    baker
}

// ============================================================================
// Precompute
// ============================================================================

#[test]
fn test_precompute_twice_is_bit_identical() {
    init_logging();
    let mut device = SoftwareDevice::new();
    let mut baker = baked_sky(&mut device);
    let mut filter = EnvMapFilter::new(&mut device, 8, 4, 8).unwrap();

    filter.run(&mut device, baker.cubemap_mut(), 32).unwrap();
    let first = [
        texture_bits(&device, filter.prefiltered_specular().handle()),
        texture_bits(&device, filter.prefiltered_diffuse().handle()),
        texture_bits(&device, filter.brdf_lut().handle()),
    ];
    assert!(first[0].iter().any(|&b| b != 0));

    filter.run(&mut device, baker.cubemap_mut(), 32).unwrap();
    let second = [
        texture_bits(&device, filter.prefiltered_specular().handle()),
        texture_bits(&device, filter.prefiltered_diffuse().handle()),
        texture_bits(&device, filter.brdf_lut().handle()),
    ];
    assert_eq!(first, second);
    assert_eq!(device.validation_errors(), 0);
}

#[test]
fn test_rebake_of_same_source_is_bit_identical() {
    let mut device = SoftwareDevice::new();
    let mut baker = baked_sky(&mut device);
    let first = texture_bits(&device, baker.cubemap().handle());
    baker.bake(&mut device).unwrap();
    assert_eq!(first, texture_bits(&device, baker.cubemap().handle()));
}

/// Resolved indirect radiance at the center pixel after one frame.
fn center_indirect(mode: SamplingMode, brdf: BrdfType, perceptual_roughness: f32) -> Vec3 {
    let config = LabConfig {
        environment_size: 16,
        specular_size: 16,
        diffuse_size: 8,
        brdf_lut_size: 32,
        ..small_config()
    };
    let mut lab = settings(mode, 64, 64);
    lab.light.enabled = false;
    lab.material.brdf = brdf;
    lab.material.metalness = 0.5;
    lab.material.perceptual_roughness = perceptual_roughness;
    let mut renderer = Renderer::new(SoftwareDevice::new(), config, lab).unwrap();
    renderer.render_frame().unwrap();
    assert_eq!(renderer.device().validation_errors(), 0);

    let indirect = renderer
        .device()
        .read_texture(renderer.object_pass().indirect().handle(), 0, 0)
        .unwrap();
    let center = indirect[(config.height / 2 * config.width + config.width / 2) as usize];
    assert!(center.w > 0.0, "center pixel missed the object");
    center.truncate() / center.w
}

#[rstest]
#[case::simple(BrdfType::Simple, 0.5)]
#[case::rough_conductor(BrdfType::RoughConductor, 0.8)]
#[case::mirror(BrdfType::SmoothConductor, 0.0)]
#[case::plastic(BrdfType::RoughPlastic, 0.3)]
fn test_baked_split_sum_agrees_with_per_pixel_split_sum(
    #[case] brdf: BrdfType,
    #[case] perceptual_roughness: f32,
) {
    init_logging();
    let baked = center_indirect(SamplingMode::BakedSplitSumNV, brdf, perceptual_roughness);
    let per_pixel = center_indirect(SamplingMode::SplitSumNV, brdf, perceptual_roughness);
    log::info!("{brdf:?}: baked {baked} per pixel {per_pixel}");

    assert!(per_pixel.max_element() > 0.0);
    let error = (baked - per_pixel).length() / per_pixel.length();
    assert!(error < 0.03, "{baked} vs {per_pixel}: {error}");
}

// ============================================================================
// Barrier ordering
// ============================================================================

#[test]
fn test_mip_generation_reads_only_transitioned_mips() {
    init_logging();
    let mut device = SoftwareDevice::new();
    let baker = baked_sky(&mut device);
    let cubemap = baker.cubemap();
    let mip_levels = cubemap.mip_levels();
    assert!(mip_levels > 2);

    let commands = device.commands();
    let barriers = barriers_of(commands, cubemap.handle());
    let mip_dispatches: Vec<(usize, u32)> = commands
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Command::Dispatch {
                shader, constants, ..
            } if shader == MIPS_GENERATOR_SHADER => {
                let c: MipsConstants = bytemuck::pod_read_unaligned(&constants[..16]);
                Some((i, c.dst_mip))
            }
            _ => None,
        })
        .collect();

    let dst_mips: Vec<u32> = mip_dispatches.iter().map(|&(_, mip)| mip).collect();
    assert_eq!(dst_mips, (1..mip_levels).collect::<Vec<_>>());

    for &(at, mip) in &mip_dispatches {
        for face in 0..6 {
            let source = (mip - 1) + face * mip_levels;
            let target = mip + face * mip_levels;
            let last = |subresource: u32| {
                barriers
                    .iter()
                    .filter(|(i, b)| *i < at && b.subresource == subresource)
                    .last()
                    .map(|(_, b)| b.after)
            };
            assert_eq!(
                last(source),
                Some(ResourceState::ShaderResource),
                "mip {mip} face {face} read before its source was readable"
            );
            assert_eq!(last(target), Some(ResourceState::UnorderedAccess));
        }
    }
    assert_eq!(device.validation_errors(), 0);
}

#[test]
fn test_bake_leaves_every_mip_readable() {
    let mut device = SoftwareDevice::new();
    let baker = baked_sky(&mut device);
    let cubemap = baker.cubemap();
    for subresource in 0..cubemap.mip_levels() * 6 {
        assert_eq!(
            device.subresource_state(cubemap.handle(), subresource),
            ResourceState::ShaderResource
        );
    }
}

// ============================================================================
// Degraded output
// ============================================================================

#[rstest]
#[case::env_emitter(ENV_EMITTER_SHADER, SamplingMode::ImportanceSampling)]
#[case::mips(MIPS_GENERATOR_SHADER, SamplingMode::FilteredImportanceSampling)]
#[case::prefilter(ENV_MAP_PREFILTER_SHADER, SamplingMode::BakedSplitSumNV)]
#[case::brdf_lut(BRDF_LUT_SHADER, SamplingMode::BakedSplitSumNV)]
#[case::object(OBJECT_SHADER, SamplingMode::SplitSumNV)]
#[case::postprocess(POSTPROCESS_SHADER, SamplingMode::ImportanceSampling)]
fn test_broken_shader_keeps_rendering(#[case] shader: &str, #[case] mode: SamplingMode) {
    init_logging();
    let mut device = SoftwareDevice::new();
    device.break_shader(shader);
    let mut renderer = Renderer::new(device, small_config(), settings(mode, 4, 2)).unwrap();

    renderer.render_until_converged(4).unwrap();
    assert_eq!(renderer.phase(), AccumulationPhase::Converged);
    assert_eq!(renderer.device().validation_errors(), 0);

    let dispatched = renderer.device().commands().iter().any(|c| {
        matches!(c, Command::Dispatch { shader: s, .. } if s == shader)
    });
    assert!(!dispatched, "{shader} dispatched without a pipeline");

    if mode == SamplingMode::BakedSplitSumNV {
        let filter = renderer.filter();
        for texture in [
            filter.prefiltered_specular(),
            filter.prefiltered_diffuse(),
            filter.brdf_lut(),
        ] {
            assert_eq!(
                renderer.device().subresource_state(texture.handle(), 0),
                ResourceState::ShaderResource
            );
        }
    }
}

#[test]
fn test_fixed_shader_comes_back_after_reload() {
    init_logging();
    let mut device = SoftwareDevice::new();
    device.break_shader(POSTPROCESS_SHADER);
    let mut renderer = Renderer::new(
        device,
        small_config(),
        settings(SamplingMode::SplitSumNV, 4, 4),
    )
    .unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.read_output().unwrap().iter().all(|&b| b == 0));

    renderer.device_mut().fix_shader(POSTPROCESS_SHADER);
    renderer.reload_shaders();
    renderer.render_frame().unwrap();
    let pixels = renderer.read_output().unwrap();
    assert!(pixels.chunks(4).all(|p| p[3] == 255));
    assert!(pixels.chunks(4).any(|p| p[0] > 0));
}

// ============================================================================
// Environment fallback
// ============================================================================

#[test]
fn test_missing_environment_file_falls_back_to_constant() {
    init_logging();
    let environment = EnvironmentSettings {
        kind: EnvironmentKind::Texture,
        texture: Some("does/not/exist.hdr".into()),
        luminance: 2.0,
        color: Vec3::new(1.0, 0.5, 0.25),
        ..Default::default()
    };
    match environment.load_source() {
        EnvironmentSource::Constant { radiance } => {
            assert_eq!(radiance, Vec3::new(2.0, 1.0, 0.5));
        }
        other => panic!("expected constant fallback, got {other:?}"),
    }
}

#[test]
fn test_disabled_environment_renders_black_background() {
    init_logging();
    let mut lab = settings(SamplingMode::ImportanceSampling, 4, 4);
    lab.environment.enabled = false;
    lab.light.enabled = false;
    let mut renderer = Renderer::new(SoftwareDevice::new(), small_config(), lab).unwrap();
    renderer.render_frame().unwrap();

    let pixels = renderer.read_output().unwrap();
    assert!(pixels.chunks(4).all(|p| p[..3] == [0, 0, 0]));
}

#[test]
fn test_constant_environment_lights_the_background() {
    init_logging();
    let mut renderer = Renderer::new(
        SoftwareDevice::new(),
        small_config(),
        settings(SamplingMode::SplitSumNV, 4, 4),
    )
    .unwrap();
    renderer.render_frame().unwrap();

    // corner pixels see the sky
    let pixels = renderer.read_output().unwrap();
    assert!(pixels[..3].iter().all(|&c| c > 0));
    let device = renderer.device();
    let direct = device
        .read_texture(renderer.object_pass().direct().handle(), 0, 0)
        .unwrap();
    assert!((direct[0].truncate() - Vec3::ONE).abs().max_element() < 1e-2);
}

#[test]
fn test_texture_scale_edits_reuse_the_uploaded_image() {
    init_logging();
    let path = write_equirect_png("scale-edits", 255);
    let mut lab = settings(SamplingMode::ImportanceSampling, 4, 4);
    lab.environment.kind = EnvironmentKind::Texture;
    lab.environment.texture = Some(path.clone());
    let mut renderer = Renderer::new(SoftwareDevice::new(), small_config(), lab).unwrap();
    renderer.render_frame().unwrap();
    assert!(renderer.baker().has_texture_source());
    let before = renderer.device().live_texture_count();

    // a reload would now fall back to constant luminance
    std::fs::remove_file(&path).unwrap();
    for step in 1..=10 {
        let mut edited = renderer.settings().clone();
        edited.environment.texture_scale = step as f32 * 0.5;
        edited.environment.luminance = step as f32;
        renderer.update_settings(edited).unwrap();
        renderer.render_frame().unwrap();
    }
    assert_eq!(renderer.device().live_texture_count(), before);
    assert!(renderer.baker().has_texture_source());

    let cubemap = renderer.baker().cubemap().handle();
    let texels = renderer.device().read_texture(cubemap, 0, 2).unwrap();
    assert!(texels.iter().all(|t| (t.x - 5.0).abs() < 1e-2), "{:?}", texels[0]);
    assert_eq!(renderer.device().validation_errors(), 0);
}

#[test]
fn test_switching_environment_file_releases_the_old_upload() {
    init_logging();
    let first = write_equirect_png("switch-first", 255);
    let second = write_equirect_png("switch-second", 51);
    let mut lab = settings(SamplingMode::ImportanceSampling, 4, 4);
    lab.environment.kind = EnvironmentKind::Texture;
    lab.environment.texture = Some(first.clone());
    let mut renderer = Renderer::new(SoftwareDevice::new(), small_config(), lab).unwrap();
    renderer.render_frame().unwrap();
    let before = renderer.device().live_texture_count();

    for path in [&second, &first, &second] {
        let mut edited = renderer.settings().clone();
        edited.environment.texture = Some(path.clone());
        renderer.update_settings(edited).unwrap();
        renderer.render_frame().unwrap();
        assert_eq!(renderer.device().live_texture_count(), before);
    }

    let mut constant = renderer.settings().clone();
    constant.environment.kind = EnvironmentKind::ConstLuminance;
    renderer.update_settings(constant).unwrap();
    assert_eq!(renderer.device().live_texture_count(), before - 1);

    let cubemap = renderer.baker().cubemap().handle();
    renderer.render_frame().unwrap();
    let texels = renderer.device().read_texture(cubemap, 0, 0).unwrap();
    assert!(texels.iter().all(|t| (t.x - 1.0).abs() < 1e-2));
    for path in [first, second] {
        let _ = std::fs::remove_file(path);
    }
}
