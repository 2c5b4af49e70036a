use serde::{Deserialize, Serialize};

use crate::extent::Extent2D;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadOp {
    #[default]
    Clear,
    Load,
    Discard,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    #[default]
    Store,
    Discard,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    None,
    Additive,
    AlphaBlending,
    PremultipliedAlpha,
}

/// Attachment slots of a render target. Color slots must be densely packed
/// starting at `Color0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachmentType {
    Color0,
    Color1,
    Color2,
    Color3,
    Color4,
    Color5,
    Color6,
    Color7,
    Depth,
}

impl AttachmentType {
    pub fn color_index(&self) -> Option<usize> {
        match self {
            Self::Color0 => Some(0),
            Self::Color1 => Some(1),
            Self::Color2 => Some(2),
            Self::Color3 => Some(3),
            Self::Color4 => Some(4),
            Self::Color5 => Some(5),
            Self::Color6 => Some(6),
            Self::Color7 => Some(7),
            Self::Depth => None,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// 8-bit quantization, for CPU-side texel stores.
    pub fn as_rgba8(&self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearValue {
    pub color: ClearColor,
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValue {
    fn default() -> Self {
        Self {
            color: ClearColor::BLACK,
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub extent: Extent2D,
}

impl Viewport {
    pub fn with_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            extent,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolygonMode {
    #[default]
    Filled,
    Lines,
    Points,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriangleCullMode {
    #[default]
    None,
    BackFaces,
    FrontFaces,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriangleWindingOrder {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterState {
    pub polygon_mode: PolygonMode,
    pub primitive_type: PrimitiveType,
    pub cull_mode: TriangleCullMode,
    pub winding_order: TriangleWindingOrder,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            polygon_mode: PolygonMode::Filled,
            primitive_type: PrimitiveType::Triangles,
            cull_mode: TriangleCullMode::BackFaces,
            winding_order: TriangleWindingOrder::CounterClockwise,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthCompareOp {
    #[default]
    Less,
    LessThanEqual,
    Greater,
    GreaterThanEqual,
    Equal,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthState {
    pub write_depth: bool,
    pub test_depth: bool,
    pub compare_op: DepthCompareOp,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            write_depth: true,
            test_depth: true,
            compare_op: DepthCompareOp::Less,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Always write the reference value where fragments pass.
    AlwaysWrite,
    /// Pass only fragments whose stencil equals the reference value.
    PassIfEqual,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilState {
    pub mode: StencilMode,
    pub reference_value: u32,
}

impl StencilState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, StencilMode::Disabled)
    }
}
