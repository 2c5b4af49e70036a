use serde::{Deserialize, Serialize};

/// Texel formats supported by every backend.
///
/// The set is intentionally small: what the renderer actually consumes, not
/// what the graphics APIs could express.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    #[default]
    Unknown,

    R8Unorm,
    R8Uint,
    R16F,
    R32F,
    R32Uint,

    Rg16F,
    Rg32F,

    Rgba8Unorm,
    Srgba8Unorm,
    Rgba16F,
    Rgba32F,

    Depth32F,
    Depth24Stencil8,

    Bc5,
    Bc7,
    Bc7Srgb,
}

impl TextureFormat {
    pub fn is_depth_format(&self) -> bool {
        matches!(self, Self::Depth32F | Self::Depth24Stencil8)
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self, Self::Srgba8Unorm | Self::Bc7Srgb)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Bc5 | Self::Bc7 | Self::Bc7Srgb)
    }

    /// Whether a texture of this format may be bound as a storage image.
    /// sRGB-encoded, depth and block-compressed formats never are.
    pub fn is_storage_capable(&self) -> bool {
        !(self.is_srgb() || self.is_depth_format() || self.is_compressed())
            && !matches!(self, Self::Unknown)
    }

    /// Byte size of a single texel, `None` for block-compressed formats.
    pub fn bytes_per_texel(&self) -> Option<u32> {
        match self {
            Self::Unknown => None,
            Self::R8Unorm | Self::R8Uint => Some(1),
            Self::R16F => Some(2),
            Self::R32F | Self::R32Uint => Some(4),
            Self::Rg16F => Some(4),
            Self::Rg32F => Some(8),
            Self::Rgba8Unorm | Self::Srgba8Unorm => Some(4),
            Self::Rgba16F => Some(8),
            Self::Rgba32F => Some(16),
            Self::Depth32F => Some(4),
            Self::Depth24Stencil8 => Some(4),
            Self::Bc5 | Self::Bc7 | Self::Bc7Srgb => None,
        }
    }

    /// `(block_dim, bytes_per_block)` for block-compressed formats.
    pub fn block_info(&self) -> Option<(u32, u32)> {
        match self {
            Self::Bc5 | Self::Bc7 | Self::Bc7Srgb => Some((4, 16)),
            _ => None,
        }
    }

    /// Byte size of a tightly packed `width`x`height`x`depth` region.
    pub fn data_size_for(&self, width: u32, height: u32, depth: u32) -> Option<usize> {
        if let Some((block_dim, block_size)) = self.block_info() {
            let blocks_x = width.div_ceil(block_dim) as usize;
            let blocks_y = height.div_ceil(block_dim) as usize;
            Some(blocks_x * blocks_y * depth as usize * block_size as usize)
        } else {
            self.bytes_per_texel()
                .map(|texel| width as usize * height as usize * depth as usize * texel as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_capability_excludes_srgb_depth_and_compressed() {
        assert!(TextureFormat::Rgba8Unorm.is_storage_capable());
        assert!(TextureFormat::R32Uint.is_storage_capable());
        assert!(!TextureFormat::Srgba8Unorm.is_storage_capable());
        assert!(!TextureFormat::Depth32F.is_storage_capable());
        assert!(!TextureFormat::Depth24Stencil8.is_storage_capable());
        assert!(!TextureFormat::Bc7.is_storage_capable());
        assert!(!TextureFormat::Unknown.is_storage_capable());
    }

    #[test]
    fn block_compressed_data_sizes_round_up_to_whole_blocks() {
        // 5x5 needs 2x2 blocks of 16 bytes each
        assert_eq!(TextureFormat::Bc7.data_size_for(5, 5, 1), Some(64));
        assert_eq!(TextureFormat::Rgba8Unorm.data_size_for(5, 5, 1), Some(100));
    }
}
