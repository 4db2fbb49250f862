//! Texel storage for the software device.
//!
//! Each mip level sits behind its own lock so a kernel can read mip `k - 1`
//! while writing mip `k` of the same texture.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{TextureDescriptor, TextureDimension};
use crate::environment::{direction_to_face_uv, CubeSampler, LutSampler};

/// Addressing mode for 2D filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    /// Repeat horizontally, clamp vertically (latitude-longitude maps).
    RepeatU,
}

/// All mips of one texture, slice-major within a mip.
#[derive(Debug)]
pub struct TextureStorage {
    desc: TextureDescriptor,
    mips: Vec<RwLock<Vec<Vec4>>>,
}

impl TextureStorage {
    pub fn new(desc: TextureDescriptor) -> Self {
        let mips = (0..desc.mip_levels)
            .map(|mip| {
                let count = desc.array_layers() * desc.mip_width(mip) * desc.mip_height(mip);
                RwLock::new(vec![Vec4::ZERO; count as usize])
            })
            .collect();
        Self { desc, mips }
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Texels in one slice of a mip.
    pub fn slice_len(&self, mip: u32) -> usize {
        (self.desc.mip_width(mip) * self.desc.mip_height(mip)) as usize
    }

    pub fn read_mip(&self, mip: u32) -> BackendResult<RwLockReadGuard<'_, Vec<Vec4>>> {
        self.mips
            .get(mip as usize)
            .map(|m| m.read())
            .ok_or(BackendError::InvalidSubresource { mip, slice: 0 })
    }

    pub fn write_mip(&self, mip: u32) -> BackendResult<RwLockWriteGuard<'_, Vec<Vec4>>> {
        self.mips
            .get(mip as usize)
            .map(|m| m.write())
            .ok_or(BackendError::InvalidSubresource { mip, slice: 0 })
    }

    /// Lock every mip for filtered cube reads.
    pub fn cube_view(&self) -> BackendResult<CubeView<'_>> {
        if self.desc.dimension != TextureDimension::Cube {
            return Err(BackendError::DispatchFailed(
                self.desc.label_or_default().to_string(),
                "sampled as a cubemap but is not one".into(),
            ));
        }
        Ok(CubeView {
            face_size: self.desc.width,
            mips: self.mips.iter().map(|m| m.read()).collect(),
        })
    }

    /// Lock mip 0 for filtered 2D reads.
    pub fn view_2d(&self, address: AddressMode) -> BackendResult<Texture2dView<'_>> {
        Ok(Texture2dView {
            width: self.desc.width,
            height: self.desc.height,
            address,
            texels: self.read_mip(0)?,
        })
    }
}

/// Locked, filterable view of a cubemap.
pub struct CubeView<'a> {
    face_size: u32,
    mips: Vec<RwLockReadGuard<'a, Vec<Vec4>>>,
}

impl CubeView<'_> {
    fn mip_extent(&self, mip: u32) -> u32 {
        crate::backend::mip_size(self.face_size, mip)
    }

    /// Unfiltered read of one texel.
    pub fn load(&self, mip: u32, face: u32, x: u32, y: u32) -> Vec4 {
        let size = self.mip_extent(mip);
        let index = (face * size * size + y.min(size - 1) * size + x.min(size - 1)) as usize;
        self.mips
            .get(mip as usize)
            .and_then(|texels| texels.get(index).copied())
            .unwrap_or(Vec4::ZERO)
    }

    /// Bilinear read within one face, clamped at the face edges.
    pub fn sample_face(&self, mip: u32, face: u32, uv: Vec2) -> Vec4 {
        let size = self.mip_extent(mip);
        filter_bilinear(size, size, uv, AddressMode::ClampToEdge, |x, y| {
            self.load(mip, face, x, y)
        })
    }
}

impl CubeSampler for CubeView<'_> {
    fn face_size(&self) -> u32 {
        self.face_size
    }

    fn mip_levels(&self) -> u32 {
        self.mips.len() as u32
    }

    fn sample_level(&self, dir: Vec3, lod: f32) -> Vec3 {
        let (face, uv) = direction_to_face_uv(dir);
        let max_lod = self.mip_levels().saturating_sub(1) as f32;
        let lod = if lod.is_nan() { 0.0 } else { lod.clamp(0.0, max_lod) };
        let lower = lod.floor();
        let t = lod - lower;
        let low = self.sample_face(lower as u32, face, uv);
        if t == 0.0 {
            return low.xyz();
        }
        let high = self.sample_face(lower as u32 + 1, face, uv);
        (low + (high - low) * t).xyz()
    }
}

/// Locked, filterable view of mip 0 of a 2D texture.
pub struct Texture2dView<'a> {
    width: u32,
    height: u32,
    address: AddressMode,
    texels: RwLockReadGuard<'a, Vec<Vec4>>,
}

impl Texture2dView<'_> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn load(&self, x: u32, y: u32) -> Vec4 {
        let index = (y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize;
        self.texels.get(index).copied().unwrap_or(Vec4::ZERO)
    }

    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        filter_bilinear(self.width, self.height, uv, self.address, |x, y| self.load(x, y))
    }
}

impl LutSampler for Texture2dView<'_> {
    fn sample(&self, uv: Vec2) -> Vec2 {
        self.sample_bilinear(uv).xy()
    }
}

/// Bilinear filter over a `width x height` grid of texels at `uv` in `[0, 1]`.
pub fn filter_bilinear<F>(width: u32, height: u32, uv: Vec2, address: AddressMode, load: F) -> Vec4
where
    F: Fn(u32, u32) -> Vec4,
{
    let width = width.max(1);
    let height = height.max(1);
    let fx = uv.x * width as f32 - 0.5;
    let fy = uv.y * height as f32 - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;

    let wrap_x = |x: i64| -> u32 {
        match address {
            AddressMode::ClampToEdge => x.clamp(0, width as i64 - 1) as u32,
            AddressMode::RepeatU => x.rem_euclid(width as i64) as u32,
        }
    };
    let clamp_y = |y: i64| -> u32 { y.clamp(0, height as i64 - 1) as u32 };

    let (x0, y0) = (x0 as i64, y0 as i64);
    let a = load(wrap_x(x0), clamp_y(y0));
    let b = load(wrap_x(x0 + 1), clamp_y(y0));
    let c = load(wrap_x(x0), clamp_y(y0 + 1));
    let d = load(wrap_x(x0 + 1), clamp_y(y0 + 1));

    let top = a + (b - a) * tx;
    let bottom = c + (d - c) * tx;
    top + (bottom - top) * ty
}
