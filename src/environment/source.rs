//! Environment radiance sources: a constant sky or a decoded texture.

use std::f32::consts::{FRAC_1_PI, PI};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use super::cubemap::{direction_to_face_uv, FACE_COUNT};
use crate::backend::software::{filter_bilinear, AddressMode};

/// Environment loading errors
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Failed to decode environment image {0}: {1}")]
    Decode(PathBuf, String),

    #[error("Unsupported environment layout {width}x{height}: expected 2:1 latitude-longitude or a 6:1 horizontal cube strip")]
    UnsupportedLayout { width: u32, height: u32 },

    #[error("Environment pixel count mismatch: expected {expected}, got {actual}")]
    PixelCount { expected: usize, actual: usize },
}

pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

/// How the texels of an environment image map to directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentLayout {
    /// Latitude-longitude map, twice as wide as high
    Equirectangular,
    /// Six square faces side by side in +X, -X, +Y, -Y, +Z, -Z order
    CubeStrip,
}

impl EnvironmentLayout {
    pub fn detect(width: u32, height: u32) -> EnvironmentResult<Self> {
        if width == 0 || height == 0 {
            return Err(EnvironmentError::UnsupportedLayout { width, height });
        }
        if width == 2 * height {
            Ok(Self::Equirectangular)
        } else if width == FACE_COUNT * height {
            Ok(Self::CubeStrip)
        } else {
            Err(EnvironmentError::UnsupportedLayout { width, height })
        }
    }
}

/// Latitude-longitude texture coordinates of a direction.
pub fn equirect_uv(dir: Vec3) -> Vec2 {
    let dir = dir.normalize_or_zero();
    let u = dir.z.atan2(dir.x) / (2.0 * PI) + 0.5;
    let v = 0.5 - dir.y.clamp(-1.0, 1.0).asin() * FRAC_1_PI;
    Vec2::new(u, v)
}

/// A decoded HDR environment image in linear radiance.
#[derive(Debug, Clone)]
pub struct EnvironmentTexture {
    path: PathBuf,
    layout: EnvironmentLayout,
    width: u32,
    height: u32,
    texels: Vec<Vec3>,
}

impl EnvironmentTexture {
    /// Decode an image file (Radiance HDR, OpenEXR or any LDR format `image` reads).
    pub fn open(path: impl AsRef<Path>) -> EnvironmentResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| EnvironmentError::Decode(path.to_path_buf(), e.to_string()))?
            .into_rgb32f();
        let (width, height) = image.dimensions();
        let texels = image.pixels().map(|p| Vec3::from(p.0)).collect();
        Self::from_texels(path, width, height, texels)
    }

    pub fn from_texels(
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        texels: Vec<Vec3>,
    ) -> EnvironmentResult<Self> {
        let layout = EnvironmentLayout::detect(width, height)?;
        let expected = (width * height) as usize;
        if texels.len() != expected {
            return Err(EnvironmentError::PixelCount {
                expected,
                actual: texels.len(),
            });
        }
        Ok(Self {
            path: path.into(),
            layout,
            width,
            height,
            texels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> EnvironmentLayout {
        self.layout
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Edge length of one cube face, for strip layouts.
    pub fn face_size(&self) -> u32 {
        self.height
    }

    pub fn load(&self, x: u32, y: u32) -> Vec3 {
        let index = (y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize;
        self.texels.get(index).copied().unwrap_or(Vec3::ZERO)
    }

    /// Bilinearly filtered radiance along `dir`.
    pub fn radiance(&self, dir: Vec3) -> Vec3 {
        let load = |x: u32, y: u32| self.load(x, y).extend(1.0);
        match self.layout {
            EnvironmentLayout::Equirectangular => filter_bilinear(
                self.width,
                self.height,
                equirect_uv(dir),
                AddressMode::RepeatU,
                load,
            )
            .truncate(),
            EnvironmentLayout::CubeStrip => {
                let size = self.face_size();
                let (face, uv) = direction_to_face_uv(dir);
                filter_bilinear(size, size, uv, AddressMode::ClampToEdge, |x, y| {
                    load(face * size + x, y)
                })
                .truncate()
            }
        }
    }

    /// Texels of one cube face, row-major, for strip layouts.
    pub fn face_texels(&self, face: u32) -> Vec<Vec4> {
        let size = self.face_size();
        let mut texels = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                texels.push(self.load(face * size + x, y).extend(1.0));
            }
        }
        texels
    }

    /// Every texel as RGBA, row-major.
    pub fn rgba_texels(&self) -> Vec<Vec4> {
        self.texels.iter().map(|t| t.extend(1.0)).collect()
    }
}

/// Where environment radiance comes from
#[derive(Debug, Clone)]
pub enum EnvironmentSource {
    /// The same radiance from every direction
    Constant { radiance: Vec3 },
    /// A decoded image with a radiance multiplier
    Texture {
        texture: Arc<EnvironmentTexture>,
        scale: f32,
    },
}

impl Default for EnvironmentSource {
    fn default() -> Self {
        Self::constant(Vec3::ONE, 1.0)
    }
}

impl EnvironmentSource {
    pub fn constant(color: Vec3, luminance: f32) -> Self {
        Self::Constant {
            radiance: color * luminance,
        }
    }

    pub fn texture(texture: EnvironmentTexture, scale: f32) -> Self {
        Self::Texture {
            texture: Arc::new(texture),
            scale,
        }
    }

    /// Load an environment image, falling back to `fallback` when it cannot be used.
    pub fn load(path: impl AsRef<Path>, scale: f32, fallback: Vec3) -> Self {
        let path = path.as_ref();
        match EnvironmentTexture::open(path) {
            Ok(texture) => {
                log::info!(
                    "Loaded environment {} ({}x{}, {:?})",
                    path.display(),
                    texture.width(),
                    texture.height(),
                    texture.layout()
                );
                Self::texture(texture, scale)
            }
            Err(e) => {
                log::warn!("{}; using constant luminance environment", e);
                Self::Constant { radiance: fallback }
            }
        }
    }

    /// Radiance arriving from `dir`.
    pub fn radiance(&self, dir: Vec3) -> Vec3 {
        match self {
            Self::Constant { radiance } => *radiance,
            Self::Texture { texture, scale } => texture.radiance(dir) * *scale,
        }
    }

    pub fn is_cubemap(&self) -> bool {
        matches!(self, Self::Texture { texture, .. } if texture.layout() == EnvironmentLayout::CubeStrip)
    }

    /// File the source was loaded from, `None` for a constant source.
    pub fn current_file(&self) -> Option<&Path> {
        match self {
            Self::Constant { .. } => None,
            Self::Texture { texture, .. } => Some(texture.path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_equirect() -> EnvironmentTexture {
        // top row bright, bottom row dark
        let texels = (0..8 * 4)
            .map(|i| Vec3::splat(if i / 8 < 2 { 4.0 } else { 1.0 }))
            .collect();
        EnvironmentTexture::from_texels("sky.hdr", 8, 4, texels).unwrap()
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            EnvironmentLayout::detect(512, 256).unwrap(),
            EnvironmentLayout::Equirectangular
        );
        assert_eq!(
            EnvironmentLayout::detect(384, 64).unwrap(),
            EnvironmentLayout::CubeStrip
        );
        assert!(matches!(
            EnvironmentLayout::detect(300, 200),
            Err(EnvironmentError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_equirect_uv_poles_and_seam() {
        assert!((equirect_uv(Vec3::Y).y).abs() < 1e-6);
        assert!((equirect_uv(Vec3::NEG_Y).y - 1.0).abs() < 1e-6);
        assert!((equirect_uv(Vec3::X) - Vec2::new(0.5, 0.5)).length() < 1e-6);
        assert!((equirect_uv(Vec3::Z).x - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_equirect_radiance_orientation() {
        let texture = gradient_equirect();
        assert_eq!(texture.radiance(Vec3::Y), Vec3::splat(4.0));
        assert_eq!(texture.radiance(Vec3::NEG_Y), Vec3::ONE);
    }

    #[test]
    fn test_strip_faces_map_to_axes() {
        let size = 2;
        let texels = (0..FACE_COUNT * size * size)
            .map(|i| Vec3::splat(((i % (FACE_COUNT * size)) / size) as f32))
            .collect();
        let texture =
            EnvironmentTexture::from_texels("strip.hdr", FACE_COUNT * size, size, texels).unwrap();
        assert_eq!(texture.radiance(Vec3::X), Vec3::splat(0.0));
        assert_eq!(texture.radiance(Vec3::NEG_Z), Vec3::splat(5.0));
        assert_eq!(texture.face_texels(3)[0], Vec4::new(3.0, 3.0, 3.0, 1.0));

        let source = EnvironmentSource::texture(texture, 2.0);
        assert!(source.is_cubemap());
        assert_eq!(source.radiance(Vec3::Y), Vec3::splat(4.0));
        assert_eq!(source.current_file(), Some(Path::new("strip.hdr")));
    }

    #[test]
    fn test_missing_file_falls_back_to_constant() {
        let source = EnvironmentSource::load("does/not/exist.hdr", 1.0, Vec3::splat(0.5));
        assert!(matches!(source, EnvironmentSource::Constant { .. }));
        assert!(!source.is_cubemap());
        assert_eq!(source.current_file(), None);
        assert_eq!(source.radiance(Vec3::X), Vec3::splat(0.5));
    }

    #[test]
    fn test_pixel_count_mismatch() {
        assert!(matches!(
            EnvironmentTexture::from_texels("x", 4, 2, vec![Vec3::ONE; 3]),
            Err(EnvironmentError::PixelCount { expected: 8, actual: 3 })
        ));
    }
}
