use serde::{Deserialize, Serialize};

use crate::AssetEncoding;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialBlendMode {
    #[default]
    Opaque,
    Masked,
    Translucent,
}

/// Material description; images are referenced by asset file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialAsset {
    pub name: String,
    pub base_color_image: Option<String>,
    pub normal_map_image: Option<String>,
    /// Occlusion / roughness / metallic packed image.
    pub material_properties_image: Option<String>,
    pub emissive_image: Option<String>,
    pub blend_mode: MaterialBlendMode,
    /// Alpha cutoff, only meaningful for the Masked blend mode.
    pub mask_cutoff: f32,
    pub color_tint: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub double_sided: bool,
}

impl Default for MaterialAsset {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_image: None,
            normal_map_image: None,
            material_properties_image: None,
            emissive_image: None,
            blend_mode: MaterialBlendMode::Opaque,
            mask_cutoff: 0.5,
            color_tint: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            double_sided: false,
        }
    }
}

impl MaterialAsset {
    pub const MAGIC: &'static str = "AMAT";
    pub const VERSION: u64 = 2024012600;

    pub fn write(&self, encoding: AssetEncoding) -> anyhow::Result<Vec<u8>> {
        crate::write_envelope(Self::MAGIC, Self::VERSION, encoding, self)
    }

    pub fn read(bytes: &[u8]) -> anyhow::Result<Self> {
        crate::read_envelope(Self::MAGIC, Self::VERSION, bytes)
    }

    pub fn referenced_images(&self) -> impl Iterator<Item = &str> {
        [
            self.base_color_image.as_deref(),
            self.normal_map_image.as_deref(),
            self.material_properties_image.as_deref(),
            self.emissive_image.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_round_trips_in_both_encodings() {
        let material = MaterialAsset {
            name: "painted-metal".into(),
            base_color_image: Some("textures/painted_metal_basecolor.arim".into()),
            normal_map_image: Some("textures/painted_metal_normal.arim".into()),
            blend_mode: MaterialBlendMode::Masked,
            mask_cutoff: 0.25,
            ..Default::default()
        };

        for encoding in [AssetEncoding::Binary, AssetEncoding::Json] {
            let bytes = material.write(encoding).unwrap();
            assert!(crate::has_magic(&bytes, MaterialAsset::MAGIC));
            assert_eq!(MaterialAsset::read(&bytes).unwrap(), material);
        }
    }

    #[test]
    fn referenced_images_skip_absent_slots() {
        let material = MaterialAsset {
            base_color_image: Some("a.arim".into()),
            ..Default::default()
        };
        assert_eq!(material.referenced_images().count(), 1);
    }
}
