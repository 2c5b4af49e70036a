use std::fmt::Debug;
use std::sync::Arc;

use downcast_rs::{impl_downcast, Downcast};
use log::warn;
use render_types::extent::Extent3D;
use render_types::format::TextureFormat;
use render_types::rendering::ClearColor;
use render_types::state::{AtomicResourceState, ResourceState};
use render_types::texture::TextureDescription;

use crate::resource::ResourceBase;

pub trait TextureBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);

    /// Immediate clear outside of any render pass (one-shot transfer work).
    fn clear_color(&self, color: ClearColor) -> anyhow::Result<()>;

    /// Upload tightly packed texel data for one mip of one array layer.
    fn set_data(&self, bytes: &[u8], mip_level: u32, array_layer: u32) -> anyhow::Result<()>;

    /// Downsample mip 0 through the whole chain (one-shot work, as opposed
    /// to the command-list variant recorded inside a frame).
    fn generate_mipmaps(&self) -> anyhow::Result<()>;

    /// Blocking readback of one mip of layer 0 into `dest`.
    fn read_data(&self, mip_level: u32, dest: &mut Vec<u8>) -> anyhow::Result<()>;
}
impl_downcast!(TextureBackendData);

pub struct Texture {
    base: ResourceBase,
    desc: TextureDescription,
    state: AtomicResourceState,
    backend_data: Box<dyn TextureBackendData>,
}

impl Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.base.name())
            .field("desc", &self.desc)
            .finish()
    }
}

impl Texture {
    /// Called by backend factories only; the description must already be
    /// validated (`TextureDescription::validate`).
    pub fn new(desc: TextureDescription, backend_data: Box<dyn TextureBackendData>) -> Self {
        debug_assert!(desc.validate().is_ok());
        Self {
            base: ResourceBase::default(),
            desc,
            state: AtomicResourceState::new(ResourceState::Undefined),
            backend_data,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        &self.base
    }

    pub fn name(&self) -> String {
        self.base.name()
    }

    pub fn set_name(&self, name: &str) {
        self.base.set_name(name);
        self.backend_data.set_debug_name(name);
    }

    pub fn description(&self) -> &TextureDescription {
        &self.desc
    }

    pub fn extent(&self) -> Extent3D {
        self.desc.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels()
    }

    pub fn has_mipmaps(&self) -> bool {
        self.desc.has_mipmaps()
    }

    pub fn is_multisampled(&self) -> bool {
        self.desc.is_multisampled()
    }

    pub fn is_depth_format(&self) -> bool {
        self.desc.format.is_depth_format()
    }

    pub fn is_storage_capable(&self) -> bool {
        self.desc.is_storage_capable()
    }

    pub fn layer_count(&self) -> u32 {
        self.desc.layer_count()
    }

    pub fn extent_at_mip(&self, mip_level: u32) -> Extent3D {
        self.desc.extent_at_mip(mip_level)
    }

    pub fn current_state(&self) -> ResourceState {
        self.state.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_current_state(&self, state: ResourceState) {
        self.state.store(state, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn backend_data(&self) -> &dyn TextureBackendData {
        self.backend_data.as_ref()
    }

    pub fn clear(&self, color: ClearColor) -> anyhow::Result<()> {
        self.backend_data.clear_color(color)
    }

    /// Fills the whole of mip 0 (every layer) with a single color value.
    /// Used for placeholder pixel textures.
    pub fn set_pixel_data(&self, color: ClearColor) -> anyhow::Result<()> {
        let texel: Vec<u8> = match self.desc.format {
            TextureFormat::Rgba8Unorm | TextureFormat::Srgba8Unorm => color.as_rgba8().to_vec(),
            TextureFormat::Rgba32F => color
                .as_array()
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
            TextureFormat::R8Unorm => vec![color.as_rgba8()[0]],
            TextureFormat::R32F => color.r.to_le_bytes().to_vec(),
            format => {
                anyhow::bail!("setPixelData is not implemented for format {format:?}")
            }
        };
        let pixel_count = self.desc.extent.pixel_count();
        let mut bytes = Vec::with_capacity(pixel_count * texel.len());
        for _ in 0..pixel_count {
            bytes.extend_from_slice(&texel);
        }
        for layer in 0..self.layer_count() {
            self.set_data(&bytes, 0, layer)?;
        }
        Ok(())
    }

    pub fn set_data(&self, bytes: &[u8], mip_level: u32, array_layer: u32) -> anyhow::Result<()> {
        anyhow::ensure!(
            mip_level < self.mip_levels(),
            "setData mip {mip_level} out of range for '{}' ({} mips)",
            self.name(),
            self.mip_levels()
        );
        anyhow::ensure!(
            array_layer < self.layer_count(),
            "setData layer {array_layer} out of range for '{}'",
            self.name()
        );
        let mip_extent = self.extent_at_mip(mip_level);
        if let Some(expected) = self.desc.format.data_size_for(
            mip_extent.width,
            mip_extent.height,
            mip_extent.depth,
        ) {
            anyhow::ensure!(
                bytes.len() == expected,
                "setData size mismatch for '{}' mip {mip_level}: got {}, expected {expected}",
                self.name(),
                bytes.len()
            );
        }
        self.backend_data.set_data(bytes, mip_level, array_layer)
    }

    /// Regenerates the mip chain from mip 0. Ignored with a warning on
    /// textures created without mipmaps.
    pub fn generate_mipmaps(&self) -> anyhow::Result<()> {
        if !self.has_mipmaps() {
            warn!(
                "generateMipmaps called on texture '{}' which has no mipmaps, ignoring",
                self.name()
            );
            return Ok(());
        }
        self.backend_data.generate_mipmaps()
    }

    pub fn read_data(&self, mip_level: u32, dest: &mut Vec<u8>) -> anyhow::Result<()> {
        anyhow::ensure!(
            mip_level < self.mip_levels(),
            "readback mip {mip_level} out of range for '{}'",
            self.name()
        );
        self.backend_data.read_data(mip_level, dest)
    }
}

/// Non-owning view of a single mip level, for storage-texture bindings.
#[derive(Debug, Clone)]
pub struct TextureMipView {
    texture: Arc<Texture>,
    mip_level: u32,
}

impl TextureMipView {
    pub fn new(texture: Arc<Texture>, mip_level: u32) -> Self {
        assert!(
            mip_level < texture.mip_levels(),
            "mip view level {mip_level} out of range for '{}' ({} mips)",
            texture.name(),
            texture.mip_levels()
        );
        Self { texture, mip_level }
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    pub fn mip_level(&self) -> u32 {
        self.mip_level
    }
}
