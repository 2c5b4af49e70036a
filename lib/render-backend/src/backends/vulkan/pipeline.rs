//! PSO construction: the fully resolved pipeline objects behind
//! `RenderState` / `ComputeState` / `RayTracingState`. The root layout is
//! always `[named-uniform set, user sets...]`: set 0 is reserved for
//! named-uniform dispatch, a `StateBindings` entry at index i lands at
//! Vulkan set i + 1.

use std::ffi::CString;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use ash::vk;
use render_backend_traits::binding::StateBindings;
use render_backend_traits::pipeline_state::{
    RenderStateDescription, ShaderBindingTable, StateBackendData,
};
use render_backend_traits::shader::{NamedConstantLookup, Shader, ShaderFileType};
use render_types::rendering::StencilMode;

use super::ctx::VulkanCtx;
use super::descriptor::VulkanBindingSetBackendData;
use super::memory::{MemoryAllocation, MemoryKind};
use super::utils;
use crate::shaders::{CompiledShader, ShaderCompiler};

#[derive(Debug, Clone, Copy)]
pub struct RtSbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// Host-visible buffer holding the shader binding table records.
struct SbtBuffer {
    buffer: vk::Buffer,
    allocation: MemoryAllocation,
    device_address: u64,
    ctx: Arc<VulkanCtx>,
}

impl std::fmt::Debug for SbtBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SbtBuffer").finish()
    }
}

impl SbtBuffer {
    fn new(ctx: Arc<VulkanCtx>, size: u64) -> anyhow::Result<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.device.create_buffer(&create_info, None) }?;
        let requirements = unsafe { ctx.device.device.get_buffer_memory_requirements(buffer) };
        let allocation = ctx
            .allocator
            .lock()
            .allocate(requirements, MemoryKind::Staging, true)?;
        unsafe {
            ctx.device
                .device
                .bind_buffer_memory(buffer, allocation.block.mem, allocation.offset)
        }?;
        let device_address = unsafe {
            ctx.device
                .device
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        };
        Ok(Self {
            buffer,
            allocation,
            device_address,
            ctx,
        })
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> anyhow::Result<()> {
        let ptr = self
            .allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow!("SBT memory is not host visible"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());
        }
        Ok(())
    }
}

impl Drop for SbtBuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

pub struct VulkanStateBackendData {
    ctx: Arc<VulkanCtx>,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub bind_point: vk::PipelineBindPoint,
    pub rt_regions: Option<RtSbtRegions>,
    _sbt_buffer: Option<SbtBuffer>,
}

impl std::fmt::Debug for VulkanStateBackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanStateBackendData")
            .field("bind_point", &self.bind_point)
            .finish()
    }
}

impl StateBackendData for VulkanStateBackendData {
    fn set_debug_name(&self, name: &str) {
        self.ctx.device.set_object_name(self.pipeline, name);
    }
}

impl Drop for VulkanStateBackendData {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device.destroy_pipeline(self.pipeline, None);
            self.ctx
                .device
                .device
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// `[named-uniform layout, user set layouts (holes filled with the empty
/// layout)]`, the derivation of the root signature from `StateBindings`.
pub fn build_pipeline_layout(
    ctx: &Arc<VulkanCtx>,
    state_bindings: &StateBindings,
) -> anyhow::Result<vk::PipelineLayout> {
    let mut set_layouts = vec![ctx.named_uniform_set_layout];
    for set_index in 0..state_bindings.set_count() {
        match state_bindings.get(set_index) {
            Some(binding_set) => {
                let data = binding_set
                    .backend_data()
                    .downcast_ref::<VulkanBindingSetBackendData>()
                    .expect("binding set was not created by the vulkan backend");
                set_layouts.push(data.layout);
            }
            None => set_layouts.push(ctx.empty_set_layout),
        }
    }

    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    Ok(unsafe { ctx.device.device.create_pipeline_layout(&create_info, None) }?)
}

fn create_shader_module(ctx: &VulkanCtx, spirv: &[u32]) -> anyhow::Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
    Ok(unsafe { ctx.device.device.create_shader_module(&create_info, None) }?)
}

fn vk_stage(ty: ShaderFileType) -> vk::ShaderStageFlags {
    match ty {
        ShaderFileType::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderFileType::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderFileType::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderFileType::Task => vk::ShaderStageFlags::TASK_EXT,
        ShaderFileType::Mesh => vk::ShaderStageFlags::MESH_EXT,
        ShaderFileType::RtRaygen => vk::ShaderStageFlags::RAYGEN_KHR,
        ShaderFileType::RtClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        ShaderFileType::RtAnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
        ShaderFileType::RtMiss => vk::ShaderStageFlags::MISS_KHR,
        ShaderFileType::RtIntersection => vk::ShaderStageFlags::INTERSECTION_KHR,
    }
}

pub fn create_render_state_data(
    ctx: &Arc<VulkanCtx>,
    compiler: &ShaderCompiler,
    desc: &RenderStateDescription,
    window_color_format: vk::Format,
) -> anyhow::Result<(VulkanStateBackendData, NamedConstantLookup)> {
    let compiled = compiler
        .compile(&desc.shader)
        .context("compiling render state shader")?;

    let layout = build_pipeline_layout(ctx, &desc.state_bindings)?;

    let mut modules = Vec::with_capacity(compiled.stages.len());
    let mut entry_names = Vec::with_capacity(compiled.stages.len());
    for stage in &compiled.stages {
        modules.push(create_shader_module(ctx, &stage.spirv)?);
        entry_names.push(CString::new(stage.entry_point.as_str())?);
    }
    let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = compiled
        .stages
        .iter()
        .zip(modules.iter())
        .zip(entry_names.iter())
        .map(|((stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk_stage(stage.ty))
                .module(*module)
                .name(name)
        })
        .collect();

    // vertex input straight from the declared layouts
    let mut vertex_bindings = Vec::new();
    let mut vertex_attributes = Vec::new();
    for (binding_index, vertex_layout) in desc.vertex_layouts.iter().enumerate() {
        vertex_bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(binding_index as u32)
                .stride(vertex_layout.stride as u32)
                .input_rate(match vertex_layout.rate {
                    render_types::vertex::VertexRate::Vertex => vk::VertexInputRate::VERTEX,
                    render_types::vertex::VertexRate::Instance => vk::VertexInputRate::INSTANCE,
                }),
        );
        for attribute in &vertex_layout.attributes {
            vertex_attributes.push(
                vk::VertexInputAttributeDescription::default()
                    .location(attribute.location)
                    .binding(binding_index as u32)
                    .format(utils::vk_vertex_format(attribute.component))
                    .offset(attribute.offset as u32),
            );
        }
    }
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(utils::vk_primitive_topology(desc.raster_state.primitive_type));

    // actual rects are dynamic; the pipeline only fixes the counts
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(utils::vk_polygon_mode(desc.raster_state.polygon_mode))
        .cull_mode(utils::vk_cull_mode(desc.raster_state.cull_mode))
        .front_face(utils::vk_front_face(desc.raster_state.winding_order))
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(utils::vk_sample_count(desc.render_target.multisampling()));

    let target_has_depth = desc.render_target.has_depth_attachment();
    let stencil_enabled = desc.stencil_state.is_enabled();
    let stencil_op = match desc.stencil_state.mode {
        StencilMode::Disabled => vk::StencilOpState::default(),
        StencilMode::AlwaysWrite => vk::StencilOpState::default()
            .fail_op(vk::StencilOp::KEEP)
            .pass_op(vk::StencilOp::REPLACE)
            .depth_fail_op(vk::StencilOp::KEEP)
            .compare_op(vk::CompareOp::ALWAYS)
            .compare_mask(0xff)
            .write_mask(0xff),
        StencilMode::PassIfEqual => vk::StencilOpState::default()
            .fail_op(vk::StencilOp::KEEP)
            .pass_op(vk::StencilOp::KEEP)
            .depth_fail_op(vk::StencilOp::KEEP)
            .compare_op(vk::CompareOp::EQUAL)
            .compare_mask(0xff)
            .write_mask(0x00),
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(target_has_depth && desc.depth_state.test_depth)
        .depth_write_enable(target_has_depth && desc.depth_state.write_depth)
        .depth_compare_op(utils::vk_compare_op(desc.depth_state.compare_op))
        .stencil_test_enable(stencil_enabled)
        .front(stencil_op)
        .back(stencil_op);

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .render_target
        .color_attachments()
        .map(|attachment| utils::vk_blend_state(attachment.blend_mode))
        .collect();
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::STENCIL_REFERENCE,
    ];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    // dynamic rendering replaces render-pass objects entirely; the
    // window placeholder attachment renders in the real swapchain format
    let color_formats: Vec<vk::Format> = desc
        .render_target
        .color_attachments()
        .map(|attachment| {
            if attachment
                .texture
                .backend_data()
                .downcast_ref::<super::resources::VulkanWindowTextureBackendData>()
                .is_some()
            {
                window_color_format
            } else {
                utils::vk_format(attachment.texture.format())
            }
        })
        .collect();
    let depth_format = desc
        .render_target
        .depth_attachment()
        .map(|attachment| utils::vk_format(attachment.texture.format()))
        .unwrap_or(vk::Format::UNDEFINED);
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipeline = unsafe {
        ctx.device.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            &[create_info],
            None,
        )
    }
    .map_err(|(_, err)| anyhow!("graphics pipeline creation failed: {err}"))?[0];

    for module in modules {
        unsafe { ctx.device.device.destroy_shader_module(module, None) };
    }

    Ok((
        VulkanStateBackendData {
            ctx: ctx.clone(),
            pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            rt_regions: None,
            _sbt_buffer: None,
        },
        compiled.named_constants.clone(),
    ))
}

pub fn create_compute_state_data(
    ctx: &Arc<VulkanCtx>,
    compiler: &ShaderCompiler,
    shader: &Shader,
    state_bindings: &StateBindings,
) -> anyhow::Result<(VulkanStateBackendData, NamedConstantLookup)> {
    let compiled = compiler
        .compile(shader)
        .context("compiling compute state shader")?;
    let stage = compiled
        .stages
        .first()
        .ok_or_else(|| anyhow!("compute shader compiled to no stages"))?;

    let layout = build_pipeline_layout(ctx, state_bindings)?;
    let module = create_shader_module(ctx, &stage.spirv)?;
    let entry_name = CString::new(stage.entry_point.as_str())?;

    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(&entry_name);
    let create_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipeline = unsafe {
        ctx.device.device.create_compute_pipelines(
            vk::PipelineCache::null(),
            &[create_info],
            None,
        )
    }
    .map_err(|(_, err)| anyhow!("compute pipeline creation failed: {err}"))?[0];

    unsafe { ctx.device.device.destroy_shader_module(module, None) };

    Ok((
        VulkanStateBackendData {
            ctx: ctx.clone(),
            pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            rt_regions: None,
            _sbt_buffer: None,
        },
        compiled.named_constants.clone(),
    ))
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.next_multiple_of(alignment.max(1))
}

pub fn create_ray_tracing_state_data(
    ctx: &Arc<VulkanCtx>,
    compiler: &ShaderCompiler,
    shader_binding_table: &ShaderBindingTable,
    state_bindings: &StateBindings,
    max_recursion_depth: u32,
) -> anyhow::Result<(VulkanStateBackendData, NamedConstantLookup)> {
    let rt_loader = ctx
        .device
        .rt_pipeline_loader
        .as_ref()
        .ok_or_else(|| anyhow!("ray tracing was not enabled on this device"))?;
    let rt_props = ctx
        .device
        .phy_device
        .raytracing_properties
        .ok_or_else(|| anyhow!("missing ray tracing properties"))?;

    // pseudo-shader file order: raygen, hit groups (chit, ahit?, isect?),
    // then miss shaders; stage indices below rely on that order
    let pseudo_shader = shader_binding_table.pseudo_shader();
    let compiled: Arc<CompiledShader> = compiler
        .compile(&pseudo_shader)
        .context("compiling ray tracing shaders")?;

    let layout = build_pipeline_layout(ctx, state_bindings)?;

    let mut modules = Vec::with_capacity(compiled.stages.len());
    let mut entry_names = Vec::with_capacity(compiled.stages.len());
    for stage in &compiled.stages {
        modules.push(create_shader_module(ctx, &stage.spirv)?);
        entry_names.push(CString::new(stage.entry_point.as_str())?);
    }
    let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = compiled
        .stages
        .iter()
        .zip(modules.iter())
        .zip(entry_names.iter())
        .map(|((stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk_stage(stage.ty))
                .module(*module)
                .name(name)
        })
        .collect();

    let general_group = |stage_index: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(stage_index)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };

    // group order: raygen, then every hit group, then every miss shader
    let mut groups = Vec::new();
    groups.push(general_group(0));

    let mut stage_cursor = 1u32;
    for hit_group in shader_binding_table.hit_groups() {
        let closest_hit = stage_cursor;
        stage_cursor += 1;
        let any_hit = hit_group.any_hit().map(|_| {
            let index = stage_cursor;
            stage_cursor += 1;
            index
        });
        let intersection = hit_group.intersection().map(|_| {
            let index = stage_cursor;
            stage_cursor += 1;
            index
        });

        let group_ty = if intersection.is_some() {
            vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
        } else {
            vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
        };
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(group_ty)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(closest_hit)
                .any_hit_shader(any_hit.unwrap_or(vk::SHADER_UNUSED_KHR))
                .intersection_shader(intersection.unwrap_or(vk::SHADER_UNUSED_KHR)),
        );
    }

    let miss_count = shader_binding_table.miss_shaders().len() as u32;
    for miss_index in 0..miss_count {
        groups.push(general_group(stage_cursor + miss_index));
    }

    let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
        .stages(&stage_infos)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(max_recursion_depth)
        .layout(layout);

    let pipeline = unsafe {
        rt_loader.create_ray_tracing_pipelines(
            vk::DeferredOperationKHR::null(),
            vk::PipelineCache::null(),
            &[create_info],
            None,
        )
    }
    .map_err(|(_, err)| anyhow!("ray tracing pipeline creation failed: {err}"))?[0];

    for module in modules {
        unsafe { ctx.device.device.destroy_shader_module(module, None) };
    }

    // shader binding table: one raygen record, then hit records, then
    // miss records, each region base-aligned
    let group_count = groups.len() as u32;
    let handle_size = rt_props.shader_group_handle_size as u64;
    let handle_stride = align_up(handle_size, rt_props.shader_group_handle_alignment as u64);
    let base_alignment = rt_props.shader_group_base_alignment as u64;

    let handles = unsafe {
        rt_loader.get_ray_tracing_shader_group_handles(
            pipeline,
            0,
            group_count,
            (group_count as u64 * handle_size) as usize,
        )
    }?;

    let hit_count = shader_binding_table.hit_groups().len() as u64;
    let raygen_size = align_up(handle_stride, base_alignment);
    let hit_size = align_up(hit_count.max(1) * handle_stride, base_alignment);
    let miss_size = align_up((miss_count as u64).max(1) * handle_stride, base_alignment);

    let sbt = SbtBuffer::new(ctx.clone(), raygen_size + hit_size + miss_size)?;

    let handle_at = |group_index: u64| {
        let start = (group_index * handle_size) as usize;
        &handles[start..start + handle_size as usize]
    };

    // raygen is group 0
    sbt.write(0, handle_at(0))?;
    // hit groups are groups 1..1+hit_count
    for hit_index in 0..hit_count {
        sbt.write(
            (raygen_size + hit_index * handle_stride) as usize,
            handle_at(1 + hit_index),
        )?;
    }
    // miss shaders follow the hit groups
    for miss_index in 0..miss_count as u64 {
        sbt.write(
            (raygen_size + hit_size + miss_index * handle_stride) as usize,
            handle_at(1 + hit_count + miss_index),
        )?;
    }

    let regions = RtSbtRegions {
        raygen: vk::StridedDeviceAddressRegionKHR {
            device_address: sbt.device_address,
            stride: raygen_size,
            size: raygen_size,
        },
        hit: vk::StridedDeviceAddressRegionKHR {
            device_address: sbt.device_address + raygen_size,
            stride: handle_stride,
            size: hit_size,
        },
        miss: vk::StridedDeviceAddressRegionKHR {
            device_address: sbt.device_address + raygen_size + hit_size,
            stride: handle_stride,
            size: miss_size,
        },
        callable: vk::StridedDeviceAddressRegionKHR::default(),
    };

    Ok((
        VulkanStateBackendData {
            ctx: ctx.clone(),
            pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            rt_regions: Some(regions),
            _sbt_buffer: Some(sbt),
        },
        compiled.named_constants.clone(),
    ))
}
