use serde::{Deserialize, Serialize};

/// Per-attribute component layout, named by shader-side type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexComponent {
    F32,
    Vec2F32,
    Vec3F32,
    Vec4F32,
    U32,
    /// four unsigned bytes, normalized to [0, 1] floats
    UbVec4Normalized,
}

impl VertexComponent {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::F32 | Self::U32 | Self::UbVec4Normalized => 4,
            Self::Vec2F32 => 8,
            Self::Vec3F32 => 12,
            Self::Vec4F32 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub location: u32,
    pub component: VertexComponent,
    pub offset: usize,
}

/// Layout of one vertex buffer binding. Attributes are tightly described,
/// the stride is explicit so padded layouts are expressible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    pub stride: usize,
    pub rate: VertexRate,
}

impl VertexLayout {
    /// Packed layout from an ordered component list, locations 0..N.
    pub fn packed(components: &[VertexComponent]) -> Self {
        let mut attributes = Vec::with_capacity(components.len());
        let mut offset = 0;
        for (location, component) in components.iter().enumerate() {
            attributes.push(VertexAttribute {
                location: location as u32,
                component: *component,
                offset,
            });
            offset += component.size_in_bytes();
        }
        Self {
            attributes,
            stride: offset,
            rate: VertexRate::Vertex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_accumulates_offsets_and_stride() {
        let layout = VertexLayout::packed(&[
            VertexComponent::Vec3F32,
            VertexComponent::Vec2F32,
            VertexComponent::UbVec4Normalized,
        ]);
        assert_eq!(layout.stride, 24);
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[2].offset, 20);
        assert_eq!(layout.attributes[2].location, 2);
    }
}
