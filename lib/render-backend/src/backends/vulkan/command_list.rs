//! The Vulkan command list: records into the frame context's command
//! buffer, emits lazy state-transition barriers from each resource's
//! cached state and dispatches named uniforms through the per-frame
//! uniform stream bound at set 0.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use log::{error, warn};
use render_backend_traits::binding::{ShaderBindingResource, StateBindings};
use render_backend_traits::buffer::{Buffer, BufferBackendData};
use render_backend_traits::command_list::{AccelerationStructureBuildType, CommandListInterface};
use render_backend_traits::pipeline_state::{ComputeState, RayTracingState, RenderState};
use render_backend_traits::rt::{BottomLevelAs, TopLevelAs};
use render_backend_traits::shader::NamedConstantLookup;
use render_backend_traits::texture::Texture;
use render_backend_traits::upload::{UploadBuffer, UploadOperation};
use render_types::buffer::IndexType;
use render_types::extent::Extent2D;
use render_types::rendering::ClearValue;
use render_types::state::ResourceState;

use super::ctx::VulkanCtx;
use super::frame::{UniformStream, NAMED_UNIFORM_SLICE_SIZE};
use super::pipeline::VulkanStateBackendData;
use super::resources::{
    image_barrier, record_mipmap_blits, VulkanBufferBackendData, VulkanTextureBackendData,
    VulkanWindowTextureBackendData,
};
use super::rt;
use super::utils;

/// The acquired back buffer, substituted for the window render target's
/// placeholder attachment while recording.
#[derive(Debug, Clone, Copy)]
pub struct BackbufferInfo {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: Extent2D,
}

struct NamedUniformState {
    lookup: NamedConstantLookup,
    shadow: Vec<u8>,
    dirty: bool,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

struct ActivePipeline {
    rt_regions: Option<super::pipeline::RtSbtRegions>,
}

pub struct VulkanCommandList<'a> {
    ctx: &'a Arc<VulkanCtx>,
    cmd: vk::CommandBuffer,
    uniform_stream: Option<&'a mut UniformStream>,
    backbuffer: Option<BackbufferInfo>,

    render_active: bool,
    compute_active: Option<ActivePipeline>,
    ray_tracing_active: Option<ActivePipeline>,
    named_uniforms: Option<NamedUniformState>,
    vertex_buffer_bound: bool,
    index_buffer_bound: bool,
    debug_label_depth: usize,
}

fn buffer_data(buffer: &Buffer) -> &VulkanBufferBackendData {
    buffer
        .backend_data()
        .downcast_ref::<VulkanBufferBackendData>()
        .expect("buffer was not created by the vulkan backend")
}

fn is_window_texture(texture: &Texture) -> bool {
    texture
        .backend_data()
        .downcast_ref::<VulkanWindowTextureBackendData>()
        .is_some()
}

fn texture_data(texture: &Texture) -> &VulkanTextureBackendData {
    texture
        .backend_data()
        .downcast_ref::<VulkanTextureBackendData>()
        .expect("texture was not created by the vulkan backend")
}

impl<'a> VulkanCommandList<'a> {
    pub fn new(
        ctx: &'a Arc<VulkanCtx>,
        cmd: vk::CommandBuffer,
        uniform_stream: Option<&'a mut UniformStream>,
        backbuffer: Option<BackbufferInfo>,
    ) -> Self {
        Self {
            ctx,
            cmd,
            uniform_stream,
            backbuffer,
            render_active: false,
            compute_active: None,
            ray_tracing_active: None,
            named_uniforms: None,
            vertex_buffer_bound: false,
            index_buffer_bound: false,
            debug_label_depth: 0,
        }
    }

    /// Balanced-scope validation at the end of recording.
    pub fn finish(&mut self) {
        assert!(
            !self.render_active,
            "command list closed while rendering is still active"
        );
        assert!(
            self.debug_label_depth == 0,
            "command list closed with {} unbalanced debug labels",
            self.debug_label_depth
        );
    }

    fn device(&self) -> &ash::Device {
        &self.ctx.device.device
    }

    fn transition_texture(&self, texture: &Texture, new_state: ResourceState) {
        if is_window_texture(texture) {
            // acquired/present transitions are the frame loop's business
            return;
        }
        let data = texture_data(texture);
        let (new_layout, _, _) = utils::vk_state_info(new_state);
        let mut layout = data.layout.lock();
        if *layout != new_layout {
            image_barrier(
                self.device(),
                self.cmd,
                data.image,
                data.aspect,
                0,
                texture.mip_levels(),
                0,
                texture.layer_count(),
                *layout,
                new_layout,
            );
            *layout = new_layout;
        }
        texture.set_current_state(new_state);
    }

    fn transition_buffer(&self, buffer: &Buffer, new_state: ResourceState) {
        let old_state = buffer.current_state();
        if old_state == new_state {
            return;
        }
        let (_, src_access, src_stage) = utils::vk_state_info(old_state);
        let (_, dst_access, dst_stage) = utils::vk_state_info(new_state);

        let mut barrier = vk::BufferMemoryBarrier::default();
        barrier.src_access_mask = src_access;
        barrier.dst_access_mask = dst_access;
        barrier.src_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
        barrier.dst_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
        barrier.buffer = buffer_data(buffer).vk_buffer();
        barrier.offset = 0;
        barrier.size = vk::WHOLE_SIZE;

        unsafe {
            self.device().cmd_pipeline_barrier(
                self.cmd,
                if src_stage.is_empty() {
                    vk::PipelineStageFlags::TOP_OF_PIPE
                } else {
                    src_stage
                },
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        buffer.set_current_state(new_state);
    }

    /// Transitions everything a pipeline's binding sets reference into
    /// the state its binding type implies.
    fn transition_bound_resources(&self, bindings: &StateBindings) {
        for (_, binding_set) in bindings.iter() {
            for binding in binding_set.bindings() {
                match binding.resource() {
                    ShaderBindingResource::ConstantBuffer(buffer) => {
                        self.transition_buffer(buffer, ResourceState::VertexAndConstantBuffer);
                    }
                    ShaderBindingResource::StorageBuffer(buffer) => {
                        self.transition_buffer(buffer, ResourceState::StorageReadWrite);
                    }
                    ShaderBindingResource::StorageTexture(view) => {
                        self.transition_texture(view.texture(), ResourceState::StorageReadWrite);
                    }
                    ShaderBindingResource::SampledTexture(textures) => {
                        for texture in textures {
                            self.transition_texture(texture, ResourceState::ShaderRead);
                        }
                    }
                    ShaderBindingResource::RtAccelerationStructure(_) => {}
                }
            }
        }
    }

    fn bind_user_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        bindings: &StateBindings,
    ) {
        for (set_index, binding_set) in bindings.iter() {
            let data = binding_set
                .backend_data()
                .downcast_ref::<super::descriptor::VulkanBindingSetBackendData>()
                .expect("binding set was not created by the vulkan backend");
            unsafe {
                self.device().cmd_bind_descriptor_sets(
                    self.cmd,
                    bind_point,
                    layout,
                    set_index + 1,
                    &[data.set],
                    &[],
                );
            }
        }
    }

    fn init_named_uniforms(
        &mut self,
        lookup: &NamedConstantLookup,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
    ) {
        let size = (lookup.total_size() as usize).min(NAMED_UNIFORM_SLICE_SIZE);
        self.named_uniforms = Some(NamedUniformState {
            lookup: lookup.clone(),
            shadow: vec![0u8; size],
            dirty: true,
            layout,
            bind_point,
        });
        self.flush_named_uniforms();
    }

    /// Pushes the shadow block into the uniform stream and rebinds set 0
    /// with the fresh dynamic offset. Called lazily before work launches.
    fn flush_named_uniforms(&mut self) {
        let Some(named) = &mut self.named_uniforms else {
            return;
        };
        if !named.dirty {
            return;
        }
        let Some(stream) = self.uniform_stream.as_deref_mut() else {
            // one-shot lists have no stream; named uniforms are a frame
            // feature
            named.dirty = false;
            return;
        };
        match stream.push(&named.shadow) {
            Ok(dynamic_offset) => unsafe {
                self.ctx.device.device.cmd_bind_descriptor_sets(
                    self.cmd,
                    named.bind_point,
                    named.layout,
                    0,
                    &[stream.set],
                    &[dynamic_offset],
                );
                named.dirty = false;
            },
            Err(err) => {
                error!("named-uniform flush failed: {err:#}");
                named.dirty = false;
            }
        }
    }

    fn resolve_color_view(&self, texture: &Texture) -> (vk::ImageView, vk::Format) {
        if is_window_texture(texture) {
            let backbuffer = self
                .backbuffer
                .expect("window render target recorded without an acquired back buffer");
            (backbuffer.view, backbuffer.format)
        } else {
            let data = texture_data(texture);
            (data.full_view, data.vk_format)
        }
    }

    fn begin_rendering_impl(&mut self, state: &RenderState, clear_override: Option<ClearValue>) {
        assert!(
            !self.render_active,
            "beginRendering while rendering is already active"
        );
        assert!(
            self.compute_active.is_none() && self.ray_tracing_active.is_none(),
            "beginRendering with an active compute/ray-tracing state"
        );

        let target = state.render_target();
        let state_data = state
            .backend_data()
            .downcast_ref::<VulkanStateBackendData>()
            .expect("render state was not created by the vulkan backend");

        // attachments first, then everything the shader reads
        for attachment in target.attachments() {
            let new_state = if attachment.ty.is_depth() {
                ResourceState::DepthStencilAttachment
            } else {
                ResourceState::ColorAttachment
            };
            self.transition_texture(&attachment.texture, new_state);
            if let Some(resolve) = &attachment.multisample_resolve_texture {
                self.transition_texture(resolve, ResourceState::ColorAttachment);
            }
        }
        self.transition_bound_resources(state.state_bindings());

        let extent = if target.is_window_target() {
            self.backbuffer
                .map(|b| b.extent)
                .unwrap_or_else(|| target.extent())
        } else {
            target.extent()
        };

        let mut color_infos: Vec<vk::RenderingAttachmentInfo> = Vec::new();
        let mut depth_info: Option<vk::RenderingAttachmentInfo> = None;
        for attachment in target.attachments() {
            let clear_value = clear_override.unwrap_or_default();
            if attachment.ty.is_depth() {
                let data = texture_data(&attachment.texture);
                depth_info = Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(data.full_view)
                        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                        .load_op(utils::vk_load_op(attachment.load_op))
                        .store_op(utils::vk_store_op(attachment.store_op))
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: clear_value.depth,
                                stencil: clear_value.stencil,
                            },
                        }),
                );
            } else {
                let (view, _) = self.resolve_color_view(&attachment.texture);
                let mut info = vk::RenderingAttachmentInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(utils::vk_load_op(attachment.load_op))
                    .store_op(utils::vk_store_op(attachment.store_op))
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_value.color.as_array(),
                        },
                    });
                if let Some(resolve) = &attachment.multisample_resolve_texture {
                    let resolve_data = texture_data(resolve);
                    info = info
                        .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                        .resolve_image_view(resolve_data.full_view)
                        .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                }
                color_infos.push(info);
            }
        }

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: extent.width,
                    height: extent.height,
                },
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth) = &depth_info {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device().cmd_begin_rendering(self.cmd, &rendering_info);
            self.device().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                state_data.pipeline,
            );
            // full-target viewport & scissor unless a node overrides
            self.device().cmd_set_viewport(
                self.cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            self.device().cmd_set_scissor(
                self.cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: vk::Extent2D {
                        width: extent.width,
                        height: extent.height,
                    },
                }],
            );
            if state.stencil_state().is_enabled() {
                self.device().cmd_set_stencil_reference(
                    self.cmd,
                    vk::StencilFaceFlags::FRONT_AND_BACK,
                    state.stencil_state().reference_value,
                );
            }
        }

        self.bind_user_sets(
            vk::PipelineBindPoint::GRAPHICS,
            state_data.layout,
            state.state_bindings(),
        );

        self.render_active = true;
        self.vertex_buffer_bound = false;
        self.index_buffer_bound = false;
        self.init_named_uniforms(
            state.named_constants(),
            state_data.layout,
            vk::PipelineBindPoint::GRAPHICS,
        );
    }
}

impl CommandListInterface for VulkanCommandList<'_> {
    fn fill_buffer(&mut self, buffer: &Buffer, fill_value: u32) {
        assert!(!self.render_active, "fillBuffer inside an active render pass");
        self.transition_buffer(buffer, ResourceState::TransferDst);
        unsafe {
            self.device().cmd_fill_buffer(
                self.cmd,
                buffer_data(buffer).vk_buffer(),
                0,
                vk::WHOLE_SIZE,
                fill_value,
            );
        }
    }

    fn clear_texture(&mut self, texture: &Texture, clear_value: ClearValue) {
        assert!(
            !self.render_active,
            "clearTexture inside an active render pass"
        );
        self.transition_texture(texture, ResourceState::TransferDst);
        let data = texture_data(texture);
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(data.aspect)
            .base_mip_level(0)
            .level_count(texture.mip_levels())
            .base_array_layer(0)
            .layer_count(texture.layer_count());
        unsafe {
            if texture.is_depth_format() {
                self.device().cmd_clear_depth_stencil_image(
                    self.cmd,
                    data.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearDepthStencilValue {
                        depth: clear_value.depth,
                        stencil: clear_value.stencil,
                    },
                    &[range],
                );
            } else {
                self.device().cmd_clear_color_image(
                    self.cmd,
                    data.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearColorValue {
                        float32: clear_value.color.as_array(),
                    },
                    &[range],
                );
            }
        }
    }

    fn copy_texture(&mut self, src: &Texture, src_mip: u32, dst: &Texture, dst_mip: u32) {
        assert!(
            !self.render_active,
            "copyTexture inside an active render pass"
        );
        self.transition_texture(src, ResourceState::TransferSrc);
        self.transition_texture(dst, ResourceState::TransferDst);

        let src_data = texture_data(src);
        let dst_data = texture_data(dst);
        let src_extent = src.extent_at_mip(src_mip);
        let dst_extent = dst.extent_at_mip(dst_mip);

        let src_subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(src_data.aspect)
            .mip_level(src_mip)
            .base_array_layer(0)
            .layer_count(src.layer_count().min(dst.layer_count()));
        let dst_subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(dst_data.aspect)
            .mip_level(dst_mip)
            .base_array_layer(0)
            .layer_count(src.layer_count().min(dst.layer_count()));

        if src_extent == dst_extent {
            let region = vk::ImageCopy::default()
                .src_subresource(src_subresource)
                .dst_subresource(dst_subresource)
                .extent(utils::vk_extent_3d(src_extent));
            unsafe {
                self.device().cmd_copy_image(
                    self.cmd,
                    src_data.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_data.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        } else {
            // differing extents use a filtered blit
            let blit = vk::ImageBlit::default()
                .src_subresource(src_subresource)
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src_extent.width as i32,
                        y: src_extent.height as i32,
                        z: src_extent.depth.max(1) as i32,
                    },
                ])
                .dst_subresource(dst_subresource)
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_extent.width as i32,
                        y: dst_extent.height as i32,
                        z: dst_extent.depth.max(1) as i32,
                    },
                ]);
            unsafe {
                self.device().cmd_blit_image(
                    self.cmd,
                    src_data.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_data.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }
        }
    }

    fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        size: usize,
    ) {
        assert!(
            !self.render_active,
            "copyBuffer inside an active render pass"
        );
        self.transition_buffer(src, ResourceState::TransferSrc);
        self.transition_buffer(dst, ResourceState::TransferDst);
        let region = vk::BufferCopy {
            src_offset: src_offset as u64,
            dst_offset: dst_offset as u64,
            size: size as u64,
        };
        unsafe {
            self.device().cmd_copy_buffer(
                self.cmd,
                buffer_data(src).vk_buffer(),
                buffer_data(dst).vk_buffer(),
                &[region],
            );
        }
    }

    fn generate_mipmaps(&mut self, texture: &Texture) {
        assert!(
            !self.render_active,
            "generateMipmaps inside an active render pass"
        );
        if !texture.has_mipmaps() {
            warn!(
                "generateMipmaps recorded for '{}' which has no mipmaps, ignoring",
                texture.name()
            );
            return;
        }
        let data = texture_data(texture);
        record_mipmap_blits(
            self.device(),
            self.cmd,
            data.image,
            data.aspect,
            texture.description(),
            &mut data.layout.lock(),
        );
        texture.set_current_state(ResourceState::ShaderRead);
    }

    fn execute_upload_operations(&mut self, upload_buffer: &mut UploadBuffer) {
        assert!(
            !self.render_active,
            "upload operations must be recorded outside a render pass"
        );
        let staging = upload_buffer.backing_buffer().clone();
        let staging_vk = buffer_data(&staging).vk_buffer();
        for operation in upload_buffer.drain_pending_operations() {
            match operation {
                UploadOperation::BufferCopy {
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    self.transition_buffer(&dst, ResourceState::TransferDst);
                    let region = vk::BufferCopy {
                        src_offset: src_offset as u64,
                        dst_offset: dst_offset as u64,
                        size: size as u64,
                    };
                    unsafe {
                        self.device().cmd_copy_buffer(
                            self.cmd,
                            staging_vk,
                            buffer_data(&dst).vk_buffer(),
                            &[region],
                        );
                    }
                }
                UploadOperation::TextureCopy {
                    src_offset,
                    dst,
                    mip_level,
                    array_layer,
                    ..
                } => {
                    self.transition_texture(&dst, ResourceState::TransferDst);
                    let data = texture_data(&dst);
                    let extent = dst.extent_at_mip(mip_level);
                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(src_offset as u64)
                        .image_subresource(
                            vk::ImageSubresourceLayers::default()
                                .aspect_mask(data.aspect)
                                .mip_level(mip_level)
                                .base_array_layer(array_layer)
                                .layer_count(1),
                        )
                        .image_extent(utils::vk_extent_3d(extent));
                    unsafe {
                        self.device().cmd_copy_buffer_to_image(
                            self.cmd,
                            staging_vk,
                            data.image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[region],
                        );
                    }
                }
            }
        }
    }

    fn begin_rendering(&mut self, state: &RenderState) {
        self.begin_rendering_impl(state, None);
    }

    fn begin_rendering_with_clear(&mut self, state: &RenderState, clear_value: ClearValue) {
        self.begin_rendering_impl(state, Some(clear_value));
    }

    fn end_rendering(&mut self) {
        assert!(
            self.render_active,
            "endRendering without an active render state"
        );
        unsafe {
            self.device().cmd_end_rendering(self.cmd);
        }
        self.render_active = false;
        self.named_uniforms = None;
    }

    fn set_compute_state(&mut self, state: &ComputeState) {
        assert!(
            !self.render_active,
            "setComputeState inside an active render pass"
        );
        let state_data = state
            .backend_data()
            .downcast_ref::<VulkanStateBackendData>()
            .expect("compute state was not created by the vulkan backend");

        self.transition_bound_resources(state.state_bindings());
        unsafe {
            self.device().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::COMPUTE,
                state_data.pipeline,
            );
        }
        self.bind_user_sets(
            vk::PipelineBindPoint::COMPUTE,
            state_data.layout,
            state.state_bindings(),
        );
        self.compute_active = Some(ActivePipeline { rt_regions: None });
        self.ray_tracing_active = None;
        self.init_named_uniforms(
            state.named_constants(),
            state_data.layout,
            vk::PipelineBindPoint::COMPUTE,
        );
    }

    fn set_ray_tracing_state(&mut self, state: &RayTracingState) {
        assert!(
            !self.render_active,
            "setRayTracingState inside an active render pass"
        );
        let state_data = state
            .backend_data()
            .downcast_ref::<VulkanStateBackendData>()
            .expect("ray tracing state was not created by the vulkan backend");

        self.transition_bound_resources(state.state_bindings());
        unsafe {
            self.device().cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                state_data.pipeline,
            );
        }
        self.bind_user_sets(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            state_data.layout,
            state.state_bindings(),
        );
        self.ray_tracing_active = Some(ActivePipeline {
            rt_regions: state_data.rt_regions,
        });
        self.compute_active = None;
        self.init_named_uniforms(
            state.named_constants(),
            state_data.layout,
            vk::PipelineBindPoint::RAY_TRACING_KHR,
        );
    }

    fn set_named_uniform(&mut self, name: &str, data: &[u8]) {
        let Some(named) = &mut self.named_uniforms else {
            warn!("setNamedUniform('{name}') without a bound pipeline state");
            return;
        };
        match named.lookup.lookup(name) {
            Some(constant) => {
                let end = (constant.offset + constant.size) as usize;
                if end > named.shadow.len() {
                    named.shadow.resize(end, 0);
                }
                let write_len = data.len().min(constant.size as usize);
                named.shadow[constant.offset as usize..constant.offset as usize + write_len]
                    .copy_from_slice(&data[..write_len]);
                named.dirty = true;
            }
            // non-fatal by contract: shader variants legitimately lose
            // constants to preprocessing
            None => warn!("named uniform '{name}' not found in the bound pipeline"),
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: &Buffer, _stride: usize, binding_index: u32) {
        assert!(
            self.render_active,
            "bindVertexBuffer outside of rendering"
        );
        unsafe {
            self.device().cmd_bind_vertex_buffers(
                self.cmd,
                binding_index,
                &[buffer_data(buffer).vk_buffer()],
                &[0],
            );
        }
        buffer.set_current_state(ResourceState::VertexAndConstantBuffer);
        self.vertex_buffer_bound = true;
    }

    fn bind_index_buffer(&mut self, buffer: &Buffer, index_type: IndexType) {
        assert!(self.render_active, "bindIndexBuffer outside of rendering");
        unsafe {
            self.device().cmd_bind_index_buffer(
                self.cmd,
                buffer_data(buffer).vk_buffer(),
                0,
                utils::vk_index_type(index_type),
            );
        }
        buffer.set_current_state(ResourceState::IndexBuffer);
        self.index_buffer_bound = true;
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        assert!(self.render_active, "draw outside of rendering");
        assert!(self.vertex_buffer_bound, "draw without a bound vertex buffer");
        self.flush_named_uniforms();
        unsafe {
            self.device().cmd_draw(self.cmd, vertex_count, 1, first_vertex, 0);
        }
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        assert!(self.render_active, "drawIndexed outside of rendering");
        assert!(
            self.vertex_buffer_bound && self.index_buffer_bound,
            "drawIndexed without bound vertex & index buffers"
        );
        self.flush_named_uniforms();
        unsafe {
            self.device()
                .cmd_draw_indexed(self.cmd, index_count, 1, first_index, vertex_offset, 0);
        }
    }

    fn draw_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        count_buffer: &Buffer,
        max_draw_count: u32,
    ) {
        assert!(self.render_active, "drawIndirect outside of rendering");
        self.flush_named_uniforms();
        indirect_buffer.set_current_state(ResourceState::IndirectArgument);
        count_buffer.set_current_state(ResourceState::IndirectArgument);
        unsafe {
            self.device().cmd_draw_indexed_indirect_count(
                self.cmd,
                buffer_data(indirect_buffer).vk_buffer(),
                0,
                buffer_data(count_buffer).vk_buffer(),
                0,
                max_draw_count,
                std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32,
            );
        }
    }

    fn draw_mesh_tasks(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        assert!(self.render_active, "drawMeshTasks outside of rendering");
        let Some(loader) = self.ctx.device.mesh_shader_loader.as_ref() else {
            error!("drawMeshTasks recorded without the MeshShading capability");
            return;
        };
        self.flush_named_uniforms();
        unsafe {
            loader.cmd_draw_mesh_tasks(self.cmd, group_count_x, group_count_y, group_count_z);
        }
    }

    fn draw_mesh_tasks_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        indirect_data_stride: u32,
        indirect_data_offset: u32,
        count_buffer: &Buffer,
        count_data_offset: u32,
    ) {
        assert!(
            self.render_active,
            "drawMeshTasksIndirect outside of rendering"
        );
        let Some(loader) = self.ctx.device.mesh_shader_loader.as_ref() else {
            error!("drawMeshTasksIndirect recorded without the MeshShading capability");
            return;
        };
        self.flush_named_uniforms();
        indirect_buffer.set_current_state(ResourceState::IndirectArgument);
        count_buffer.set_current_state(ResourceState::IndirectArgument);
        let max_draw_count = ((indirect_buffer.size() as u32).saturating_sub(indirect_data_offset))
            / indirect_data_stride.max(1);
        unsafe {
            loader.cmd_draw_mesh_tasks_indirect_count(
                self.cmd,
                buffer_data(indirect_buffer).vk_buffer(),
                indirect_data_offset as u64,
                buffer_data(count_buffer).vk_buffer(),
                count_data_offset as u64,
                max_draw_count,
                indirect_data_stride,
            );
        }
    }

    fn build_bottom_level_acceleration_structure(
        &mut self,
        blas: &BottomLevelAs,
        _build_type: AccelerationStructureBuildType,
    ) {
        assert!(
            !self.render_active,
            "acceleration structure builds must be outside a render pass"
        );
        if let Err(err) = rt::record_blas_build(self.ctx, self.cmd, blas) {
            error!("BLAS build failed: {err:#}");
        }
    }

    fn build_top_level_acceleration_structure(
        &mut self,
        tlas: &TopLevelAs,
        _build_type: AccelerationStructureBuildType,
    ) {
        assert!(
            !self.render_active,
            "acceleration structure builds must be outside a render pass"
        );
        if let Err(err) = rt::record_tlas_build(self.ctx, self.cmd, tlas) {
            error!("TLAS build failed: {err:#}");
        }
    }

    fn trace_rays(&mut self, extent: Extent2D) {
        let regions = self
            .ray_tracing_active
            .as_ref()
            .expect("traceRays without an active ray tracing state")
            .rt_regions
            .expect("active ray tracing state has no shader binding table");
        self.flush_named_uniforms();
        let Some(loader) = self.ctx.device.rt_pipeline_loader.as_ref() else {
            error!("traceRays recorded without the RayTracing capability");
            return;
        };
        unsafe {
            loader.cmd_trace_rays(
                self.cmd,
                &regions.raygen,
                &regions.miss,
                &regions.hit,
                &regions.callable,
                extent.width,
                extent.height,
                1,
            );
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        assert!(
            self.compute_active.is_some(),
            "dispatch without an active compute state"
        );
        self.flush_named_uniforms();
        unsafe {
            self.device().cmd_dispatch(self.cmd, x, y, z);
        }
    }

    fn debug_barrier(&mut self) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    fn begin_debug_label(&mut self, label: &str) {
        self.debug_label_depth += 1;
        if let Some(debug_utils) = &self.ctx.device.debug_utils {
            if let Ok(name) = CString::new(label) {
                let label_info = vk::DebugUtilsLabelEXT::default().label_name(&name);
                unsafe {
                    debug_utils.cmd_begin_debug_utils_label(self.cmd, &label_info);
                }
            }
        }
    }

    fn end_debug_label(&mut self) {
        assert!(self.debug_label_depth > 0, "endDebugLabel without begin");
        self.debug_label_depth -= 1;
        if let Some(debug_utils) = &self.ctx.device.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.cmd);
            }
        }
    }

    fn texture_write_barrier(&mut self, texture: &Texture) {
        self.texture_mip_write_barrier(texture, 0);
    }

    fn texture_mip_write_barrier(&mut self, texture: &Texture, mip_level: u32) {
        // write-after-write between dispatches on a storage image; the
        // layout stays GENERAL
        let data = texture_data(texture);
        let mut barrier = vk::ImageMemoryBarrier::default();
        barrier.old_layout = vk::ImageLayout::GENERAL;
        barrier.new_layout = vk::ImageLayout::GENERAL;
        barrier.src_access_mask = vk::AccessFlags::SHADER_WRITE;
        barrier.dst_access_mask = vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
        barrier.src_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
        barrier.dst_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
        barrier.image = data.image;
        barrier.subresource_range.aspect_mask = data.aspect;
        barrier.subresource_range.base_mip_level = mip_level;
        barrier.subresource_range.level_count = 1;
        barrier.subresource_range.base_array_layer = 0;
        barrier.subresource_range.layer_count = texture.layer_count();
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn buffer_write_barrier(&mut self, buffers: &[&Buffer]) {
        let barriers: Vec<vk::BufferMemoryBarrier> = buffers
            .iter()
            .map(|buffer| {
                let mut barrier = vk::BufferMemoryBarrier::default();
                barrier.src_access_mask = vk::AccessFlags::SHADER_WRITE;
                barrier.dst_access_mask =
                    vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
                barrier.src_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
                barrier.dst_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
                barrier.buffer = buffer_data(buffer).vk_buffer();
                barrier.offset = 0;
                barrier.size = vk::WHOLE_SIZE;
                barrier
            })
            .collect();
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &barriers,
                &[],
            );
        }
    }

    fn slow_blocking_read_from_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        dest: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        // drains previously submitted work; commands recorded on this
        // list but not yet submitted are not covered
        self.ctx.device.wait_idle()?;
        dest.resize(size, 0);
        buffer.backend_data().read_data(offset, dest)
    }
}
