//! Shared helpers for the integration tests.

#![allow(dead_code)]

use glam::Vec3;

use ibl_lab::backend::software::{Command, SoftwareDevice};
use ibl_lab::backend::{Barrier, ComputeDevice, TextureHandle};
use ibl_lab::config::LabSettings;
use ibl_lab::environment::{CubeSampler, EnvironmentSource, EnvironmentTexture};
use ibl_lab::estimator::SamplingMode;
use ibl_lab::LabConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Render targets small enough for the software device.
pub fn small_config() -> LabConfig {
    LabConfig {
        width: 16,
        height: 12,
        environment_size: 8,
        specular_size: 8,
        diffuse_size: 4,
        brdf_lut_size: 8,
        shadow_map_size: 32,
    }
}

pub fn settings(mode: SamplingMode, total: u32, step: u32) -> LabSettings {
    let mut settings = LabSettings::default();
    settings.sampling.mode = mode;
    settings.sampling.total_samples = total;
    settings.sampling.samples_per_frame = step;
    settings
}

/// Bright sky over a dark ground with a warm horizon.
pub fn sky_radiance(dir: Vec3) -> Vec3 {
    let up = dir.y.max(0.0);
    let down = (-dir.y).max(0.0);
    let horizon = 1.0 - dir.y.abs();
    Vec3::new(0.4, 0.6, 1.0) * (0.5 + up)
        + Vec3::new(0.3, 0.15, 0.05) * horizon
        + Vec3::splat(0.05) * down
}

/// A 32x16 equirectangular image of [`sky_radiance`].
pub fn sky_source() -> EnvironmentSource {
    let (width, height) = (32u32, 16u32);
    let texels = (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                let phi = ((x as f32 + 0.5) / width as f32 - 0.5) * std::f32::consts::TAU;
                let theta = (0.5 - (y as f32 + 0.5) / height as f32) * std::f32::consts::PI;
                let dir = Vec3::new(theta.cos() * phi.cos(), theta.sin(), theta.cos() * phi.sin());
                sky_radiance(dir)
            })
        })
        .collect();
    let texture = EnvironmentTexture::from_texels("sky.hdr", width, height, texels)
        .expect("32x16 is an equirectangular layout");
    EnvironmentSource::texture(texture, 1.0)
}

/// Analytic [`sky_radiance`] environment, ignoring the mip level.
pub struct SkyGradient;

impl CubeSampler for SkyGradient {
    fn face_size(&self) -> u32 {
        64
    }

    fn mip_levels(&self) -> u32 {
        7
    }

    fn sample_level(&self, dir: Vec3, _lod: f32) -> Vec3 {
        sky_radiance(dir.normalize())
    }
}

/// Every texel of every mip and slice, as raw bits.
pub fn texture_bits(device: &SoftwareDevice, texture: TextureHandle) -> Vec<u32> {
    let desc = device.texture_descriptor(texture).unwrap();
    let mut bits = Vec::new();
    for mip in 0..desc.mip_levels {
        for slice in 0..desc.array_layers() {
            let texels = device.read_texture(texture, mip, slice).unwrap();
            bits.extend(texels.iter().flat_map(|t| t.to_array().map(f32::to_bits)));
        }
    }
    bits
}

pub fn barriers_of(commands: &[Command], texture: TextureHandle) -> Vec<(usize, Barrier)> {
    commands
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Command::Barrier(b) if b.texture == texture => Some((i, *b)),
            _ => None,
        })
        .collect()
}

/// Write a uniform 8x4 latitude-longitude PNG into the temp directory.
pub fn write_equirect_png(name: &str, value: u8) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("ibl-lab-{}-{name}.png", std::process::id()));
    image::RgbImage::from_pixel(8, 4, image::Rgb([value; 3]))
        .save(&path)
        .unwrap();
    path
}
