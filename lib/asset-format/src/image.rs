use render_types::format::TextureFormat;
use serde::{Deserialize, Serialize};

use crate::AssetEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageAssetFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
    Bc5,
    Bc7,
}

impl ImageAssetFormat {
    /// Byte size of one pixel, `None` for block-compressed formats.
    pub fn pixel_byte_size(&self) -> Option<usize> {
        match self {
            Self::R8 => Some(1),
            Self::Rg8 => Some(2),
            Self::Rgb8 => Some(3),
            Self::Rgba8 => Some(4),
            Self::R32F => Some(4),
            Self::Rg32F => Some(8),
            Self::Rgb32F => Some(12),
            Self::Rgba32F => Some(16),
            Self::Bc5 | Self::Bc7 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    /// Pixel values are sRGB encoded and need the sRGB transfer function.
    SrgbEncoded,
    /// Raw data values (normal maps, masks, HDR); sampled as-is.
    Data,
}

/// The image asset the renderer consumes: dimensions, format, color space
/// and pixel bytes, optionally zstd compressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: ImageAssetFormat,
    pub color_space: ColorSpace,
    pub pixel_data: Vec<u8>,
    pub is_compressed: bool,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl ImageAsset {
    pub const MAGIC: &'static str = "ARIM";
    pub const VERSION: u64 = 2024012600;

    const COMPRESSION_LEVEL: i32 = 3;

    pub fn from_rgba8(width: u32, height: u32, color_space: ColorSpace, pixel_data: Vec<u8>) -> Self {
        assert_eq!(
            pixel_data.len(),
            width as usize * height as usize * 4,
            "rgba8 pixel data size does not match {width}x{height}"
        );
        let uncompressed_size = pixel_data.len() as u32;
        Self {
            width,
            height,
            depth: 1,
            format: ImageAssetFormat::Rgba8,
            color_space,
            pixel_data,
            is_compressed: false,
            uncompressed_size,
            compressed_size: 0,
        }
    }

    /// The GPU texture format this asset maps onto.
    pub fn texture_format(&self) -> TextureFormat {
        match (self.format, self.color_space) {
            (ImageAssetFormat::Rgba8, ColorSpace::SrgbEncoded) => TextureFormat::Srgba8Unorm,
            (ImageAssetFormat::Rgba8, ColorSpace::Data) => TextureFormat::Rgba8Unorm,
            (ImageAssetFormat::R8, _) => TextureFormat::R8Unorm,
            (ImageAssetFormat::R32F, _) => TextureFormat::R32F,
            (ImageAssetFormat::Rg32F, _) => TextureFormat::Rg32F,
            (ImageAssetFormat::Rgba32F, _) => TextureFormat::Rgba32F,
            (ImageAssetFormat::Bc5, _) => TextureFormat::Bc5,
            (ImageAssetFormat::Bc7, ColorSpace::SrgbEncoded) => TextureFormat::Bc7Srgb,
            (ImageAssetFormat::Bc7, ColorSpace::Data) => TextureFormat::Bc7,
            // three-channel and rg8 sources are expanded by the importer
            // before they reach the GPU
            (ImageAssetFormat::Rgb8 | ImageAssetFormat::Rg8, _) => TextureFormat::Unknown,
            (ImageAssetFormat::Rgb32F, _) => TextureFormat::Unknown,
        }
    }

    /// Compresses the pixel payload with zstd. No-op when already
    /// compressed.
    pub fn compress(&mut self) -> anyhow::Result<()> {
        if self.is_compressed {
            return Ok(());
        }
        self.uncompressed_size = self.pixel_data.len() as u32;
        let mut compressed = Vec::new();
        zstd::stream::copy_encode(
            self.pixel_data.as_slice(),
            &mut compressed,
            Self::COMPRESSION_LEVEL,
        )?;
        self.compressed_size = compressed.len() as u32;
        self.pixel_data = compressed;
        self.is_compressed = true;
        Ok(())
    }

    /// Decompresses the pixel payload and checks it against the recorded
    /// uncompressed size. No-op when not compressed.
    pub fn decompress(&mut self) -> anyhow::Result<()> {
        if !self.is_compressed {
            return Ok(());
        }
        let decompressed = zstd::stream::decode_all(self.pixel_data.as_slice())?;
        anyhow::ensure!(
            decompressed.len() == self.uncompressed_size as usize,
            "decompressed image payload is {} bytes but the asset records {}",
            decompressed.len(),
            self.uncompressed_size
        );
        self.pixel_data = decompressed;
        self.is_compressed = false;
        self.compressed_size = 0;
        Ok(())
    }

    pub fn write(&self, encoding: AssetEncoding) -> anyhow::Result<Vec<u8>> {
        crate::write_envelope(Self::MAGIC, Self::VERSION, encoding, self)
    }

    pub fn read(bytes: &[u8]) -> anyhow::Result<Self> {
        crate::read_envelope(Self::MAGIC, Self::VERSION, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_image() -> ImageAsset {
        let mut pixels = Vec::with_capacity(16 * 16 * 4);
        for y in 0..16u32 {
            for x in 0..16u32 {
                let on = (x + y) % 2 == 0;
                pixels.extend_from_slice(if on {
                    &[255, 255, 255, 255]
                } else {
                    &[0, 0, 0, 255]
                });
            }
        }
        ImageAsset::from_rgba8(16, 16, ColorSpace::SrgbEncoded, pixels)
    }

    #[test]
    fn compress_then_decompress_is_lossless() {
        let original = checker_image();
        let mut asset = original.clone();

        asset.compress().unwrap();
        assert!(asset.is_compressed);
        assert_eq!(asset.uncompressed_size as usize, original.pixel_data.len());
        assert_ne!(asset.pixel_data, original.pixel_data);

        asset.decompress().unwrap();
        assert!(!asset.is_compressed);
        assert_eq!(asset.pixel_data, original.pixel_data);
    }

    #[test]
    fn binary_envelope_round_trips() {
        let mut asset = checker_image();
        asset.compress().unwrap();

        let bytes = asset.write(AssetEncoding::Binary).unwrap();
        assert!(crate::has_magic(&bytes, ImageAsset::MAGIC));

        let read_back = ImageAsset::read(&bytes).unwrap();
        assert_eq!(read_back, asset);
    }

    #[test]
    fn json_envelope_round_trips() {
        let asset = checker_image();
        let bytes = asset.write(AssetEncoding::Json).unwrap();
        let read_back = ImageAsset::read(&bytes).unwrap();
        assert_eq!(read_back, asset);
    }

    #[test]
    fn reading_garbage_fails_cleanly() {
        assert!(ImageAsset::read(b"notanimage").is_err());
        assert!(ImageAsset::read(b"AR").is_err());
    }

    #[test]
    fn texture_format_mapping_respects_color_space() {
        let mut asset = checker_image();
        assert_eq!(asset.texture_format(), TextureFormat::Srgba8Unorm);
        asset.color_space = ColorSpace::Data;
        assert_eq!(asset.texture_format(), TextureFormat::Rgba8Unorm);
    }
}
