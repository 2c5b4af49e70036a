use serde::{Deserialize, Serialize};

use crate::extent::Extent3D;
use crate::format::TextureFormat;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    #[default]
    Tex2d,
    Tex3d,
    Cubemap,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multisampling {
    #[default]
    None,
    X4,
    X8,
    X16,
    X32,
}

impl Multisampling {
    pub fn sample_count(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X16 => 16,
            Self::X32 => 32,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MipmapMode {
    #[default]
    None,
    Nearest,
    Linear,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filters {
    pub min: ImageFilter,
    pub mag: ImageFilter,
}

impl Filters {
    pub const fn linear() -> Self {
        Self {
            min: ImageFilter::Linear,
            mag: ImageFilter::Linear,
        }
    }

    pub const fn nearest() -> Self {
        Self {
            min: ImageFilter::Nearest,
            mag: ImageFilter::Nearest,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WrapModes {
    pub u: WrapMode,
    pub v: WrapMode,
    pub w: WrapMode,
}

impl WrapModes {
    pub const fn repeat_all() -> Self {
        Self {
            u: WrapMode::Repeat,
            v: WrapMode::Repeat,
            w: WrapMode::Repeat,
        }
    }

    pub const fn clamp_all_to_edge() -> Self {
        Self {
            u: WrapMode::ClampToEdge,
            v: WrapMode::ClampToEdge,
            w: WrapMode::ClampToEdge,
        }
    }
}

/// Complete backend-agnostic description of a texture. Everything derived
/// (mip counts, per-mip extents, aspect flags) comes from here so that the
/// backends never have to be asked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDescription {
    pub ty: TextureType,
    pub array_count: u32,
    pub extent: Extent3D,
    pub format: TextureFormat,
    pub filters: Filters,
    pub wrap_modes: WrapModes,
    pub mipmap_mode: MipmapMode,
    pub multisampling: Multisampling,
}

impl Default for TextureDescription {
    fn default() -> Self {
        Self {
            ty: TextureType::Tex2d,
            array_count: 1,
            extent: Extent3D::new(1, 1, 1),
            format: TextureFormat::Rgba8Unorm,
            filters: Filters::linear(),
            wrap_modes: WrapModes::repeat_all(),
            mipmap_mode: MipmapMode::None,
            multisampling: Multisampling::None,
        }
    }
}

impl TextureDescription {
    pub fn has_mipmaps(&self) -> bool {
        !matches!(self.mipmap_mode, MipmapMode::None)
    }

    pub fn is_multisampled(&self) -> bool {
        !matches!(self.multisampling, Multisampling::None)
    }

    /// Full mip chain count down to 1x1, or 1 when not mipmapped.
    pub fn mip_levels(&self) -> u32 {
        if self.has_mipmaps() {
            let largest = self.extent.width.max(self.extent.height).max(1);
            32 - largest.leading_zeros()
        } else {
            1
        }
    }

    pub fn extent_at_mip(&self, mip_level: u32) -> Extent3D {
        self.extent.at_mip_level(mip_level)
    }

    /// Number of array layers as the backends see it (cubemaps are six
    /// 2D layers per array element).
    pub fn layer_count(&self) -> u32 {
        match self.ty {
            TextureType::Cubemap => 6 * self.array_count,
            _ => self.array_count,
        }
    }

    pub fn is_storage_capable(&self) -> bool {
        self.format.is_storage_capable() && !self.is_multisampled()
    }

    /// Checks the documented invariants; returns a description of the first
    /// violation, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.array_count < 1 {
            return Err("texture array count must be at least 1".into());
        }
        if self.is_multisampled() && self.has_mipmaps() {
            return Err("a multisampled texture cannot have mipmaps".into());
        }
        if matches!(self.ty, TextureType::Tex3d) && self.is_multisampled() {
            return Err("a 3D texture cannot be multisampled".into());
        }
        if self.extent.width == 0 || self.extent.height == 0 || self.extent.depth == 0 {
            return Err("texture extent must be non-zero on every axis".into());
        }
        if !matches!(self.ty, TextureType::Tex3d) && self.extent.depth != 1 {
            return Err("only 3D textures may have depth > 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex_2d(width: u32, height: u32, mipmap_mode: MipmapMode) -> TextureDescription {
        TextureDescription {
            extent: Extent3D::new(width, height, 1),
            mipmap_mode,
            ..Default::default()
        }
    }

    #[test]
    fn mip_levels_match_log2_of_largest_axis() {
        assert_eq!(tex_2d(1024, 1024, MipmapMode::Linear).mip_levels(), 11);
        assert_eq!(tex_2d(1024, 512, MipmapMode::Linear).mip_levels(), 11);
        assert_eq!(tex_2d(256, 256, MipmapMode::Nearest).mip_levels(), 9);
        assert_eq!(tex_2d(1, 1, MipmapMode::Linear).mip_levels(), 1);
        assert_eq!(tex_2d(1000, 600, MipmapMode::Linear).mip_levels(), 10);
        assert_eq!(tex_2d(1024, 1024, MipmapMode::None).mip_levels(), 1);
    }

    #[test]
    fn multisampled_textures_reject_mipmaps() {
        let desc = TextureDescription {
            extent: Extent3D::new(256, 256, 1),
            mipmap_mode: MipmapMode::Linear,
            multisampling: Multisampling::X4,
            ..Default::default()
        };
        assert!(desc.validate().is_err());

        let desc = TextureDescription {
            multisampling: Multisampling::X4,
            extent: Extent3D::new(256, 256, 1),
            ..Default::default()
        };
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn cubemaps_expose_six_layers_per_array_element() {
        let desc = TextureDescription {
            ty: TextureType::Cubemap,
            extent: Extent3D::new(64, 64, 1),
            ..Default::default()
        };
        assert_eq!(desc.layer_count(), 6);
    }
}
