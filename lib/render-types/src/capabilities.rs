use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Shader stages a binding may be visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0b1;
        const FRAGMENT = 0b10;
        const COMPUTE = 0b100;
        const TASK = 0b1000;
        const MESH = 0b1_0000;
        const RT_RAY_GEN = 0b10_0000;
        const RT_CLOSEST_HIT = 0b100_0000;
        const RT_ANY_HIT = 0b1000_0000;
        const RT_MISS = 0b1_0000_0000;
        const RT_INTERSECTION = 0b10_0000_0000;
    }
}

impl ShaderStageFlags {
    /// Visible to every stage; used for bindings shared across pipelines.
    pub fn any() -> Self {
        Self::all()
    }

    pub fn any_ray_tracing() -> Self {
        Self::RT_RAY_GEN
            | Self::RT_CLOSEST_HIT
            | Self::RT_ANY_HIT
            | Self::RT_MISS
            | Self::RT_INTERSECTION
    }
}

/// Optional device features the application can require or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendCapability {
    RayTracing,
    MeshShading,
    Shader16BitFloat,
    ShaderBarycentrics,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub ray_tracing: bool,
    pub mesh_shading: bool,
    pub shader_16bit_float: bool,
    pub shader_barycentrics: bool,
}

impl BackendCapabilities {
    pub fn supports(&self, capability: BackendCapability) -> bool {
        match capability {
            BackendCapability::RayTracing => self.ray_tracing,
            BackendCapability::MeshShading => self.mesh_shading,
            BackendCapability::Shader16BitFloat => self.shader_16bit_float,
            BackendCapability::ShaderBarycentrics => self.shader_barycentrics,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapchainTransferFunction {
    #[default]
    SrgbNonLinear,
    St2084,
}

/// What the application asks of the backend at creation time.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppSpecification {
    pub app_name: String,
    pub required_capabilities: Vec<BackendCapability>,
    pub optional_capabilities: Vec<BackendCapability>,
    pub swapchain_transfer_function: SwapchainTransferFunction,
}
