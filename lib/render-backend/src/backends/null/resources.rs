//! CPU-side resource stores for the null backend. Buffers and textures
//! hold their bytes in plain vectors so copies, uploads and readbacks all
//! behave observably, which is what makes the frame machinery testable
//! without a device.

use log::warn;
use parking_lot::RwLock;
use render_backend_traits::binding::{BindingSetBackendData, TextureBindingUpdate};
use render_backend_traits::buffer::BufferBackendData;
use render_backend_traits::pipeline_state::StateBackendData;
use render_backend_traits::render_target::RenderTargetBackendData;
use render_backend_traits::rt::AccelerationStructureBackendData;
use render_backend_traits::sampler::SamplerBackendData;
use render_backend_traits::texture::TextureBackendData;
use render_types::buffer::{BufferMapMode, ReallocateStrategy};
use render_types::format::TextureFormat;
use render_types::rendering::ClearColor;
use render_types::texture::TextureDescription;

#[derive(Debug)]
pub struct NullBufferBackendData {
    pub store: RwLock<Vec<u8>>,
}

impl NullBufferBackendData {
    pub fn new(size_in_memory: usize) -> Self {
        Self {
            store: RwLock::new(vec![0u8; size_in_memory]),
        }
    }
}

impl BufferBackendData for NullBufferBackendData {
    fn set_debug_name(&self, _name: &str) {}

    fn update_data(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()> {
        let mut store = self.store.write();
        anyhow::ensure!(offset + bytes.len() <= store.len(), "update out of range");
        store[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn map_data(
        &self,
        _mode: BufferMapMode,
        offset: usize,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> anyhow::Result<()> {
        let mut store = self.store.write();
        anyhow::ensure!(offset + size <= store.len(), "map out of range");
        f(&mut store[offset..offset + size]);
        Ok(())
    }

    fn read_data(&self, offset: usize, dest: &mut [u8]) -> anyhow::Result<()> {
        let store = self.store.read();
        anyhow::ensure!(offset + dest.len() <= store.len(), "read out of range");
        dest.copy_from_slice(&store[offset..offset + dest.len()]);
        Ok(())
    }

    fn reallocate_with_size(
        &self,
        new_size: usize,
        strategy: ReallocateStrategy,
    ) -> anyhow::Result<()> {
        let mut store = self.store.write();
        match strategy {
            ReallocateStrategy::CopyOldData => store.resize(new_size, 0),
            ReallocateStrategy::DiscardOldData => *store = vec![0u8; new_size],
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullTextureBackendData {
    desc: TextureDescription,
    /// One byte vector per mip level, all layers in sequence.
    pub mips: RwLock<Vec<Vec<u8>>>,
}

impl NullTextureBackendData {
    pub fn new(desc: TextureDescription) -> Self {
        let mut mips = Vec::with_capacity(desc.mip_levels() as usize);
        for mip in 0..desc.mip_levels() {
            mips.push(vec![0u8; Self::mip_store_size(&desc, mip)]);
        }
        Self {
            desc,
            mips: RwLock::new(mips),
        }
    }

    fn mip_store_size(desc: &TextureDescription, mip: u32) -> usize {
        let extent = desc.extent_at_mip(mip);
        let per_layer = desc
            .format
            .data_size_for(extent.width, extent.height, extent.depth)
            .unwrap_or(0);
        per_layer * desc.layer_count() as usize
    }

    fn layer_byte_range(&self, mip: u32, layer: u32) -> (usize, usize) {
        let extent = self.desc.extent_at_mip(mip);
        let per_layer = self
            .desc
            .format
            .data_size_for(extent.width, extent.height, extent.depth)
            .unwrap_or(0);
        let start = per_layer * layer as usize;
        (start, start + per_layer)
    }

    fn fill_pattern(&self, color: ClearColor) -> Option<Vec<u8>> {
        match self.desc.format {
            TextureFormat::Rgba8Unorm | TextureFormat::Srgba8Unorm => {
                Some(color.as_rgba8().to_vec())
            }
            TextureFormat::R8Unorm | TextureFormat::R8Uint => Some(vec![color.as_rgba8()[0]]),
            TextureFormat::R32F | TextureFormat::Depth32F => Some(color.r.to_le_bytes().to_vec()),
            TextureFormat::R32Uint => Some((color.r as u32).to_le_bytes().to_vec()),
            TextureFormat::Rgba32F => Some(
                color
                    .as_array()
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// 2x2 box filter over tightly packed RGBA8 texels.
pub fn downsample_rgba8(src: &[u8], src_width: u32, src_height: u32) -> Vec<u8> {
    let dst_width = (src_width / 2).max(1);
    let dst_height = (src_height / 2).max(1);
    let mut dst = vec![0u8; dst_width as usize * dst_height as usize * 4];

    for dy in 0..dst_height {
        for dx in 0..dst_width {
            let mut accum = [0u32; 4];
            let mut samples = 0u32;
            for sy in 0..2u32 {
                for sx in 0..2u32 {
                    let x = (dx * 2 + sx).min(src_width - 1);
                    let y = (dy * 2 + sy).min(src_height - 1);
                    let src_index = ((y * src_width + x) * 4) as usize;
                    for channel in 0..4 {
                        accum[channel] += src[src_index + channel] as u32;
                    }
                    samples += 1;
                }
            }
            let dst_index = ((dy * dst_width + dx) * 4) as usize;
            for channel in 0..4 {
                dst[dst_index + channel] = (accum[channel] / samples) as u8;
            }
        }
    }
    dst
}

impl TextureBackendData for NullTextureBackendData {
    fn set_debug_name(&self, _name: &str) {}

    fn clear_color(&self, color: ClearColor) -> anyhow::Result<()> {
        let Some(pattern) = self.fill_pattern(color) else {
            warn!(
                "null backend cannot clear format {:?}, leaving contents untouched",
                self.desc.format
            );
            return Ok(());
        };
        let mut mips = self.mips.write();
        for mip in mips.iter_mut() {
            for chunk in mip.chunks_exact_mut(pattern.len()) {
                chunk.copy_from_slice(&pattern);
            }
        }
        Ok(())
    }

    fn set_data(&self, bytes: &[u8], mip_level: u32, array_layer: u32) -> anyhow::Result<()> {
        let (start, end) = self.layer_byte_range(mip_level, array_layer);
        let mut mips = self.mips.write();
        let mip = &mut mips[mip_level as usize];
        anyhow::ensure!(end <= mip.len(), "texture store range out of bounds");
        anyhow::ensure!(bytes.len() == end - start, "texture data size mismatch");
        mip[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn generate_mipmaps(&self) -> anyhow::Result<()> {
        if !matches!(
            self.desc.format,
            TextureFormat::Rgba8Unorm | TextureFormat::Srgba8Unorm
        ) {
            warn!(
                "null backend only generates mipmaps for rgba8 formats, not {:?}",
                self.desc.format
            );
            return Ok(());
        }

        let layer_count = self.desc.layer_count();
        let mut mips = self.mips.write();
        for mip in 1..self.desc.mip_levels() {
            let src_extent = self.desc.extent_at_mip(mip - 1);
            let src_layer_size = (src_extent.width * src_extent.height * 4) as usize;
            let dst_extent = self.desc.extent_at_mip(mip);
            let dst_layer_size = (dst_extent.width * dst_extent.height * 4) as usize;

            for layer in 0..layer_count as usize {
                let src =
                    mips[mip as usize - 1][layer * src_layer_size..(layer + 1) * src_layer_size]
                        .to_vec();
                let downsampled = downsample_rgba8(&src, src_extent.width, src_extent.height);
                debug_assert_eq!(downsampled.len(), dst_layer_size);
                mips[mip as usize][layer * dst_layer_size..(layer + 1) * dst_layer_size]
                    .copy_from_slice(&downsampled);
            }
        }
        Ok(())
    }

    fn read_data(&self, mip_level: u32, dest: &mut Vec<u8>) -> anyhow::Result<()> {
        let (start, end) = self.layer_byte_range(mip_level, 0);
        let mips = self.mips.read();
        let mip = &mips[mip_level as usize];
        anyhow::ensure!(end <= mip.len(), "texture read range out of bounds");
        dest.clear();
        dest.extend_from_slice(&mip[start..end]);
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullSamplerBackendData;

impl SamplerBackendData for NullSamplerBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

#[derive(Debug)]
pub struct NullRenderTargetBackendData;

impl RenderTargetBackendData for NullRenderTargetBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

#[derive(Debug)]
pub struct NullBindingSetBackendData;

impl BindingSetBackendData for NullBindingSetBackendData {
    fn set_debug_name(&self, _name: &str) {}

    fn update_textures(
        &self,
        _binding_index: u32,
        _updates: &[TextureBindingUpdate],
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct NullStateBackendData;

impl StateBackendData for NullStateBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

#[derive(Debug)]
pub struct NullAccelerationStructureBackendData;

impl AccelerationStructureBackendData for NullAccelerationStructureBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_preserves_constant_color() {
        let src = vec![128u8; 8 * 8 * 4];
        let dst = downsample_rgba8(&src, 8, 8);
        assert_eq!(dst.len(), 4 * 4 * 4);
        assert!(dst.iter().all(|&b| b == 128));
    }

    #[test]
    fn downsample_averages_2x2_blocks() {
        // 2x2 image: two black, two white pixels -> single mid-gray texel
        let mut src = vec![0u8; 2 * 2 * 4];
        src[0..4].copy_from_slice(&[255, 255, 255, 255]);
        src[12..16].copy_from_slice(&[255, 255, 255, 255]);
        let dst = downsample_rgba8(&src, 2, 2);
        assert_eq!(&dst[0..4], &[127, 127, 127, 127]);
    }
}
