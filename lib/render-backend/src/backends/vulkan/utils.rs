//! Pure mapping helpers between the backend-agnostic types and their
//! Vulkan equivalents.

use ash::vk;
use render_types::buffer::{BufferUsage, IndexType};
use render_types::capabilities::ShaderStageFlags;
use render_types::extent::Extent3D;
use render_types::format::TextureFormat;
use render_types::rendering::{
    BlendMode, DepthCompareOp, LoadOp, PolygonMode, PrimitiveType, StoreOp, TriangleCullMode,
    TriangleWindingOrder,
};
use render_types::state::ResourceState;
use render_types::texture::{ImageFilter, MipmapMode, Multisampling, TextureType, WrapMode};
use render_types::vertex::VertexComponent;

pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Unknown => vk::Format::UNDEFINED,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R8Uint => vk::Format::R8_UINT,
        TextureFormat::R16F => vk::Format::R16_SFLOAT,
        TextureFormat::R32F => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16F => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rg32F => vk::Format::R32G32_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Srgba8Unorm => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth32F => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Bc5 => vk::Format::BC5_UNORM_BLOCK,
        TextureFormat::Bc7 => vk::Format::BC7_UNORM_BLOCK,
        TextureFormat::Bc7Srgb => vk::Format::BC7_SRGB_BLOCK,
    }
}

pub fn vk_aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth_format() {
        if format.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn vk_sample_count(multisampling: Multisampling) -> vk::SampleCountFlags {
    match multisampling {
        Multisampling::None => vk::SampleCountFlags::TYPE_1,
        Multisampling::X4 => vk::SampleCountFlags::TYPE_4,
        Multisampling::X8 => vk::SampleCountFlags::TYPE_8,
        Multisampling::X16 => vk::SampleCountFlags::TYPE_16,
        Multisampling::X32 => vk::SampleCountFlags::TYPE_32,
    }
}

pub fn vk_image_type(ty: TextureType) -> vk::ImageType {
    match ty {
        TextureType::Tex2d | TextureType::Cubemap => vk::ImageType::TYPE_2D,
        TextureType::Tex3d => vk::ImageType::TYPE_3D,
    }
}

pub fn vk_image_view_type(ty: TextureType, array_count: u32) -> vk::ImageViewType {
    match (ty, array_count > 1) {
        (TextureType::Tex2d, false) => vk::ImageViewType::TYPE_2D,
        (TextureType::Tex2d, true) => vk::ImageViewType::TYPE_2D_ARRAY,
        (TextureType::Tex3d, _) => vk::ImageViewType::TYPE_3D,
        (TextureType::Cubemap, false) => vk::ImageViewType::CUBE,
        (TextureType::Cubemap, true) => vk::ImageViewType::CUBE_ARRAY,
    }
}

pub fn vk_extent_3d(extent: Extent3D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}

pub fn vk_filter(filter: ImageFilter) -> vk::Filter {
    match filter {
        ImageFilter::Nearest => vk::Filter::NEAREST,
        ImageFilter::Linear => vk::Filter::LINEAR,
    }
}

pub fn vk_mipmap_mode(mode: MipmapMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapMode::None | MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn vk_address_mode(mode: WrapMode) -> vk::SamplerAddressMode {
    match mode {
        WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        WrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        WrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub fn vk_index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::UInt16 => vk::IndexType::UINT16,
        IndexType::UInt32 => vk::IndexType::UINT32,
    }
}

pub fn vk_buffer_usage(usage: BufferUsage, ray_tracing_enabled: bool) -> vk::BufferUsageFlags {
    let device_address = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    let mut flags = match usage {
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
        }
        BufferUsage::Index => {
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
        }
        BufferUsage::RtInstance => {
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::ConstantBuffer => {
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::StorageBuffer => {
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
        }
        BufferUsage::IndirectBuffer => {
            vk::BufferUsageFlags::INDIRECT_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferUsage::Upload => vk::BufferUsageFlags::TRANSFER_SRC,
        BufferUsage::Readback => {
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER
        }
    };

    // vertex & index buffers feed acceleration-structure builds
    if ray_tracing_enabled {
        match usage {
            BufferUsage::Vertex | BufferUsage::Index => {
                flags |= device_address
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
            }
            BufferUsage::RtInstance => {
                flags |= device_address;
            }
            _ => {}
        }
    }

    flags
}

pub fn vk_shader_stages(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStageFlags::TASK) {
        flags |= vk::ShaderStageFlags::TASK_EXT;
    }
    if stages.contains(ShaderStageFlags::MESH) {
        flags |= vk::ShaderStageFlags::MESH_EXT;
    }
    if stages.contains(ShaderStageFlags::RT_RAY_GEN) {
        flags |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stages.contains(ShaderStageFlags::RT_CLOSEST_HIT) {
        flags |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::RT_ANY_HIT) {
        flags |= vk::ShaderStageFlags::ANY_HIT_KHR;
    }
    if stages.contains(ShaderStageFlags::RT_MISS) {
        flags |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stages.contains(ShaderStageFlags::RT_INTERSECTION) {
        flags |= vk::ShaderStageFlags::INTERSECTION_KHR;
    }
    flags
}

pub fn vk_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Discard => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn vk_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn vk_polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Filled => vk::PolygonMode::FILL,
        PolygonMode::Lines => vk::PolygonMode::LINE,
        PolygonMode::Points => vk::PolygonMode::POINT,
    }
}

pub fn vk_primitive_topology(ty: PrimitiveType) -> vk::PrimitiveTopology {
    match ty {
        PrimitiveType::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveType::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveType::Points => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn vk_cull_mode(mode: TriangleCullMode) -> vk::CullModeFlags {
    match mode {
        TriangleCullMode::None => vk::CullModeFlags::NONE,
        TriangleCullMode::BackFaces => vk::CullModeFlags::BACK,
        TriangleCullMode::FrontFaces => vk::CullModeFlags::FRONT,
    }
}

pub fn vk_front_face(order: TriangleWindingOrder) -> vk::FrontFace {
    match order {
        TriangleWindingOrder::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        TriangleWindingOrder::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub fn vk_compare_op(op: DepthCompareOp) -> vk::CompareOp {
    match op {
        DepthCompareOp::Less => vk::CompareOp::LESS,
        DepthCompareOp::LessThanEqual => vk::CompareOp::LESS_OR_EQUAL,
        DepthCompareOp::Greater => vk::CompareOp::GREATER,
        DepthCompareOp::GreaterThanEqual => vk::CompareOp::GREATER_OR_EQUAL,
        DepthCompareOp::Equal => vk::CompareOp::EQUAL,
        DepthCompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn vk_blend_state(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let mut state = vk::PipelineColorBlendAttachmentState::default();
    state.color_write_mask = vk::ColorComponentFlags::RGBA;
    match mode {
        BlendMode::None => {
            state.blend_enable = vk::FALSE;
        }
        BlendMode::Additive => {
            state.blend_enable = vk::TRUE;
            state.src_color_blend_factor = vk::BlendFactor::ONE;
            state.dst_color_blend_factor = vk::BlendFactor::ONE;
            state.color_blend_op = vk::BlendOp::ADD;
            state.src_alpha_blend_factor = vk::BlendFactor::ONE;
            state.dst_alpha_blend_factor = vk::BlendFactor::ONE;
            state.alpha_blend_op = vk::BlendOp::ADD;
        }
        BlendMode::AlphaBlending => {
            state.blend_enable = vk::TRUE;
            state.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
            state.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            state.color_blend_op = vk::BlendOp::ADD;
            state.src_alpha_blend_factor = vk::BlendFactor::ONE;
            state.dst_alpha_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            state.alpha_blend_op = vk::BlendOp::ADD;
        }
        BlendMode::PremultipliedAlpha => {
            state.blend_enable = vk::TRUE;
            state.src_color_blend_factor = vk::BlendFactor::ONE;
            state.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            state.color_blend_op = vk::BlendOp::ADD;
            state.src_alpha_blend_factor = vk::BlendFactor::ONE;
            state.dst_alpha_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
            state.alpha_blend_op = vk::BlendOp::ADD;
        }
    }
    state
}

pub fn vk_vertex_format(component: VertexComponent) -> vk::Format {
    match component {
        VertexComponent::F32 => vk::Format::R32_SFLOAT,
        VertexComponent::Vec2F32 => vk::Format::R32G32_SFLOAT,
        VertexComponent::Vec3F32 => vk::Format::R32G32B32_SFLOAT,
        VertexComponent::Vec4F32 => vk::Format::R32G32B32A32_SFLOAT,
        VertexComponent::U32 => vk::Format::R32_UINT,
        VertexComponent::UbVec4Normalized => vk::Format::R8G8B8A8_UNORM,
    }
}

/// `(layout, access mask, pipeline stage)` a resource state corresponds
/// to; what the lazy transition barriers are built from.
pub fn vk_state_info(
    state: ResourceState,
) -> (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) {
    match state {
        ResourceState::Undefined => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        ResourceState::TransferSrc => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::TransferDst => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        ResourceState::StorageReadWrite => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        ResourceState::ColorAttachment => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::DepthStencilAttachment => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::VERTEX_SHADER,
        ),
        ResourceState::IndexBuffer => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::INDEX_READ,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ),
        ResourceState::IndirectArgument => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::INDIRECT_COMMAND_READ,
            vk::PipelineStageFlags::DRAW_INDIRECT,
        ),
        ResourceState::AccelerationStructure => (
            vk::ImageLayout::UNDEFINED,
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        ),
    }
}
