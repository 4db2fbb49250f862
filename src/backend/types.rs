//! Common types shared between the device layer and the passes built on it

use bitflags::bitflags;
use glam::Vec4;
use half::f16;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rg16Float
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    pub fn channel_count(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba16Float
            | TextureFormat::Rgba32Float => 4,
            TextureFormat::Rg16Float => 2,
            TextureFormat::R32Float | TextureFormat::Depth32Float => 1,
        }
    }

    /// Round a texel to what this format can store.
    ///
    /// Channels the format does not have read back as zero (alpha as one).
    pub fn quantize(&self, texel: Vec4) -> Vec4 {
        let half = |v: f32| f16::from_f32(v).to_f32();
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() / 255.0;
        match self {
            TextureFormat::Rgba8Unorm => {
                Vec4::new(unorm(texel.x), unorm(texel.y), unorm(texel.z), unorm(texel.w))
            }
            TextureFormat::Rgba16Float => {
                Vec4::new(half(texel.x), half(texel.y), half(texel.z), half(texel.w))
            }
            TextureFormat::Rgba32Float => texel,
            TextureFormat::Rg16Float => Vec4::new(half(texel.x), half(texel.y), 0.0, 1.0),
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                Vec4::new(texel.x, 0.0, 0.0, 1.0)
            }
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be written from a compute shader.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Shape of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    /// Six square array slices in +X, -X, +Y, -Y, +Z, -Z order.
    Cube,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            dimension: TextureDimension::D2,
            mip_levels: 1,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    /// Square cubemap, optionally with a full mip chain.
    pub fn cubemap(label: &str, size: u32, with_mips: bool, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            dimension: TextureDimension::Cube,
            mip_levels: if with_mips { mip_levels_for(size) } else { 1 },
            format,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::STORAGE_BINDING
                | TextureUsage::RENDER_ATTACHMENT,
        }
    }

    /// Single-mip 2D target.
    pub fn target_2d(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            dimension: TextureDimension::D2,
            mip_levels: 1,
            format,
            usage: TextureUsage::TEXTURE_BINDING
                | TextureUsage::STORAGE_BINDING
                | TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::COPY_SRC,
        }
    }

    pub fn array_layers(&self) -> u32 {
        match self.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers()
    }

    pub fn mip_width(&self, mip: u32) -> u32 {
        mip_size(self.width, mip)
    }

    pub fn mip_height(&self, mip: u32) -> u32 {
        mip_size(self.height, mip)
    }

    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }
}

/// Number of levels in a full mip chain: `floor(log2(size)) + 1`.
pub fn mip_levels_for(size: u32) -> u32 {
    (u32::BITS - size.max(1).leading_zeros()).max(1)
}

/// Extent of one axis at the given mip level.
pub fn mip_size(base: u32, mip: u32) -> u32 {
    base.checked_shr(mip).unwrap_or(0).max(1)
}

/// Flat subresource index, mips of one slice are contiguous.
pub fn subresource_index(mip: u32, slice: u32, mip_levels: u32) -> u32 {
    mip + slice * mip_levels
}

/// Number of thread groups covering `size` threads.
pub fn group_count(size: u32, group_size: u32) -> u32 {
    size.div_ceil(group_size.max(1))
}

/// Resource state of one texture subresource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents are undefined (freshly created)
    #[default]
    Undefined,
    /// Bound as a color render target
    RenderTarget,
    /// Bound for compute writes
    UnorderedAccess,
    /// Bound for sampling
    ShaderResource,
    /// Bound as a depth target
    DepthWrite,
    CopySource,
    CopyDest,
}

impl ResourceState {
    /// Check if this state allows the resource to be written.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::UnorderedAccess
                | ResourceState::DepthWrite
                | ResourceState::CopyDest
        )
    }

    /// Check if this state allows the resource to be read.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            ResourceState::ShaderResource | ResourceState::CopySource | ResourceState::UnorderedAccess
        )
    }

    /// `Undefined` can be a starting state but never a destination.
    pub fn is_valid_destination(&self) -> bool {
        !matches!(self, ResourceState::Undefined)
    }
}
