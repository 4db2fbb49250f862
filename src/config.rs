//! User-facing settings persisted as TOML
//!
//! [`LabSettings`] is the parameter set an interactive front end edits.
//! Comparing two snapshots with [`LabSettings::diff`] yields the reasons the
//! accumulated lighting has to be thrown away.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::accumulator::DirtyReasons;
use crate::environment::EnvironmentSource;
use crate::estimator::SamplingMode;
use crate::lighting::{LobeToggles, MaterialParams};
use crate::scene::{DirectionalLight, SceneSettings};

/// Settings persistence errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to write settings {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Sample budget and integration strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub mode: SamplingMode,
    pub total_samples: u32,
    pub samples_per_frame: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            mode: SamplingMode::ImportanceSampling,
            total_samples: 128,
            samples_per_frame: 16,
        }
    }
}

/// Kind of environment lighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvironmentKind {
    Texture,
    #[default]
    ConstLuminance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub enabled: bool,
    pub kind: EnvironmentKind,
    pub texture: Option<PathBuf>,
    pub texture_scale: f32,
    pub luminance: f32,
    pub color: Vec3,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: EnvironmentKind::ConstLuminance,
            texture: None,
            texture_scale: 1.0,
            luminance: 1.0,
            color: Vec3::ONE,
        }
    }
}

impl EnvironmentSettings {
    /// Radiance used by the constant source and as the fallback for failed loads.
    pub fn constant_radiance(&self) -> Vec3 {
        self.color * self.luminance
    }

    /// Whether going from `previous` to these settings needs a new source.
    /// Scale, luminance and color edits apply to the bound source in place.
    pub fn needs_reload(&self, previous: &EnvironmentSettings) -> bool {
        self.kind != previous.kind || self.texture != previous.texture
    }

    /// Build the radiance source these settings describe.
    pub fn load_source(&self) -> EnvironmentSource {
        match (self.kind, &self.texture) {
            (EnvironmentKind::Texture, Some(path)) => {
                EnvironmentSource::load(path, self.texture_scale, self.constant_radiance())
            }
            (EnvironmentKind::Texture, None) => {
                log::warn!("Texture environment without a file; using constant luminance");
                EnvironmentSource::Constant {
                    radiance: self.constant_radiance(),
                }
            }
            (EnvironmentKind::ConstLuminance, _) => {
                EnvironmentSource::constant(self.color, self.luminance)
            }
        }
    }
}

/// Exposure and tone mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    pub ev100: f32,
    pub tonemap: bool,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            ev100: 0.0,
            tonemap: true,
        }
    }
}

/// Every parameter the lab exposes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabSettings {
    pub sampling: SamplingSettings,
    pub environment: EnvironmentSettings,
    pub light: DirectionalLight,
    pub brdf: LobeToggles,
    pub material: MaterialParams,
    pub scene: SceneSettings,
    pub post: PostSettings,
}

impl LabSettings {
    /// Load settings from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let settings = Self::from_toml(&content)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e}, using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::Write(path.to_path_buf(), e))?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Why lighting accumulated under `previous` is invalid under `self`.
    pub fn diff(&self, previous: &LabSettings) -> DirtyReasons {
        let mut reasons = DirtyReasons::empty();
        reasons.set(
            DirtyReasons::SAMPLING_MODE,
            self.sampling.mode != previous.sampling.mode,
        );
        reasons.set(
            DirtyReasons::SAMPLE_BUDGET,
            self.sampling.total_samples != previous.sampling.total_samples
                || self.sampling.samples_per_frame != previous.sampling.samples_per_frame,
        );
        reasons.set(
            DirtyReasons::ENVIRONMENT,
            self.environment != previous.environment,
        );
        reasons.set(DirtyReasons::BRDF_TOGGLES, self.brdf != previous.brdf);
        reasons.set(DirtyReasons::MATERIAL, self.material != previous.material);
        reasons.set(DirtyReasons::SCENE, self.scene != previous.scene);
        reasons
    }
}
