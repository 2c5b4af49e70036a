//! The Vulkan device entry point: owns the instance/device/swapchain and
//! the N-buffered frame contexts, implements every resource factory and
//! runs the per-frame execute loop.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use ash::vk;
use log::{debug, info, warn};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use render_backend_traits::backend::{
    BackendInterface, FrameContextFenceInfo, FrameOutcome, FrameRecordContext,
};
use render_backend_traits::binding::{
    resolve_binding_indices, BindingSet, ShaderBinding, StateBindings,
};
use render_backend_traits::buffer::{Buffer, BufferBackendData};
use render_backend_traits::command_list::CommandListInterface;
use render_backend_traits::pipeline_state::{
    ComputeState, RayTracingState, RenderState, RenderStateDescription, ShaderBindingTable,
};
use render_backend_traits::render_target::{Attachment, RenderTarget};
use render_backend_traits::rt::{BottomLevelAs, RtGeometry, RtGeometryInstance, TopLevelAs};
use render_backend_traits::sampler::{Sampler, SamplerDescription};
use render_backend_traits::shader::Shader;
use render_backend_traits::texture::Texture;
use render_backend_traits::upload::UploadBuffer;
use render_types::buffer::BufferUsage;
use render_types::capabilities::{BackendCapabilities, SwapchainTransferFunction};
use render_types::config::GfxOptions;
use render_types::extent::Extent2D;
use render_types::format::TextureFormat;
use render_types::rendering::{AttachmentType, LoadOp};
use render_types::texture::TextureDescription;

use super::command_list::{BackbufferInfo, VulkanCommandList};
use super::command_pool::CommandPool;
use super::ctx::VulkanCtx;
use super::dbg_utils_messenger::DbgUtilsMessenger;
use super::descriptor::{DescriptorAllocator, VulkanBindingSetBackendData};
use super::fence::Fence;
use super::frame::{FrameContext, UniformStream};
use super::instance::Instance;
use super::logical_device::LogicalDevice;
use super::phy_device::PhyDevice;
use super::pipeline;
use super::resources::{
    image_barrier, VulkanBufferBackendData, VulkanRenderTargetBackendData,
    VulkanSamplerBackendData, VulkanTextureBackendData, VulkanWindowTextureBackendData,
};
use super::rt;
use super::semaphore::Semaphore;
use super::surface::BackendSurface;
use super::swapchain::Swapchain;
use crate::shaders::ShaderCompiler;

struct FrameState {
    swapchain: Swapchain,
    frame_contexts: Vec<FrameContext>,
    current_frame: u64,
    window_render_target: Arc<RenderTarget>,
    recreate_requested: bool,
}

pub struct VulkanBackend {
    ctx: Arc<VulkanCtx>,
    _dbg_messenger: Option<DbgUtilsMessenger>,
    shader_compiler: ShaderCompiler,
    descriptor_allocator: DescriptorAllocator,
    options: GfxOptions,
    transfer_function: SwapchainTransferFunction,
    frame_command_pool: CommandPool,
    state: Mutex<FrameState>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.ctx.device)
            .finish()
    }
}

impl VulkanBackend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_name: &str,
        options: GfxOptions,
        transfer_function: SwapchainTransferFunction,
        shader_base_dir: impl AsRef<std::path::Path>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        window_extent: Extent2D,
    ) -> anyhow::Result<Arc<Self>> {
        let instance = Instance::new(app_name, options.validation, Some(display_handle))?;
        let dbg_messenger = instance
            .validation_enabled
            .then(|| DbgUtilsMessenger::new(instance.clone()))
            .transpose()?;
        let surface = BackendSurface::new(instance.clone(), display_handle, window_handle)?;
        let phy_device = PhyDevice::select(instance.clone(), Some(&surface))?;
        let device = LogicalDevice::new(instance, phy_device)?;
        let ctx = VulkanCtx::new(device.clone())?;

        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            &options,
            transfer_function,
            window_extent,
            None,
        )?;

        let frame_command_pool = CommandPool::new(device.clone())?;
        let descriptor_allocator = DescriptorAllocator::default();

        let image_count = swapchain.image_count();
        let command_buffers = frame_command_pool.allocate_primary(image_count)?;
        let mut frame_contexts = Vec::with_capacity(image_count as usize);
        for command_buffer in command_buffers {
            frame_contexts.push(FrameContext {
                command_buffer,
                frame_fence: Fence::new(device.clone(), true)?,
                fence_value_signaled: 0,
                fence_value_completed: 0,
                image_available: Semaphore::new(device.clone())?,
                render_finished: Semaphore::new(device.clone())?,
                upload_buffer: UploadBuffer::new(Arc::new(Buffer::new(
                    options.upload_buffer_capacity,
                    BufferUsage::Upload,
                    None,
                    Box::new(VulkanBufferBackendData::new(
                        ctx.clone(),
                        options.upload_buffer_capacity,
                        BufferUsage::Upload,
                    )?),
                ))),
                uniform_stream: UniformStream::new(ctx.clone(), &descriptor_allocator)?,
            });
        }

        let window_render_target = Arc::new(Self::build_window_render_target(
            &ctx,
            swapchain.extent,
        )?);

        info!(
            "vulkan backend ready: {image_count} frame contexts, {}x{} swapchain",
            swapchain.extent.width, swapchain.extent.height
        );

        Ok(Arc::new(Self {
            ctx,
            _dbg_messenger: dbg_messenger,
            shader_compiler: ShaderCompiler::new(shader_base_dir),
            descriptor_allocator,
            options,
            transfer_function,
            frame_command_pool,
            state: Mutex::new(FrameState {
                swapchain,
                frame_contexts,
                current_frame: 0,
                window_render_target,
                recreate_requested: false,
            }),
        }))
    }

    /// Color placeholder (patched to the back buffer each frame) plus a
    /// real depth texture at the swapchain extent.
    fn build_window_render_target(
        ctx: &Arc<VulkanCtx>,
        extent: Extent2D,
    ) -> anyhow::Result<RenderTarget> {
        let color_desc = TextureDescription {
            extent: extent.into(),
            format: TextureFormat::Rgba8Unorm,
            ..Default::default()
        };
        let color = Texture::new(color_desc, Box::new(VulkanWindowTextureBackendData));
        color.set_name("WindowColor");

        let depth_desc = TextureDescription {
            extent: extent.into(),
            format: TextureFormat::Depth32F,
            ..Default::default()
        };
        let depth = Texture::new(
            depth_desc.clone(),
            Box::new(VulkanTextureBackendData::new(ctx.clone(), depth_desc)?),
        );
        depth.set_name("WindowDepth");

        let attachments = vec![
            Attachment {
                load_op: LoadOp::Clear,
                ..Attachment::with_texture(AttachmentType::Color0, Arc::new(color))
            },
            Attachment {
                load_op: LoadOp::Clear,
                ..Attachment::with_texture(AttachmentType::Depth, Arc::new(depth))
            },
        ];
        let target = RenderTarget::new(attachments, true, Box::new(VulkanRenderTargetBackendData));
        target.set_name("WindowRenderTarget");
        Ok(target)
    }

    /// Swapchain + window render target recreation; device-idle first.
    fn recreate_swapchain_locked(
        &self,
        state: &mut FrameState,
        window_extent: Extent2D,
    ) -> anyhow::Result<()> {
        self.ctx.device.wait_idle()?;
        state
            .swapchain
            .recreate(&self.options, self.transfer_function, window_extent)?;
        state.window_render_target =
            Arc::new(Self::build_window_render_target(&self.ctx, state.swapchain.extent)?);
        state.recreate_requested = false;
        Ok(())
    }
}

impl BackendInterface for VulkanBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.ctx.device.capabilities
    }

    fn create_buffer(
        &self,
        size: usize,
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer> {
        Ok(Buffer::new(
            size,
            usage,
            stride,
            Box::new(VulkanBufferBackendData::new(self.ctx.clone(), size, usage)?),
        ))
    }

    fn create_buffer_with_data(
        &self,
        data: &[u8],
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer> {
        let buffer = self.create_buffer(data.len(), usage, stride)?;
        buffer
            .backend_data()
            .update_data(data, 0)
            .context("initial buffer data upload")?;
        Ok(buffer)
    }

    fn create_texture(&self, desc: TextureDescription) -> anyhow::Result<Texture> {
        if let Err(msg) = desc.validate() {
            anyhow::bail!("invalid texture description: {msg}");
        }
        let backend_data = VulkanTextureBackendData::new(self.ctx.clone(), desc.clone())?;
        Ok(Texture::new(desc, Box::new(backend_data)))
    }

    fn create_sampler(&self, desc: SamplerDescription) -> anyhow::Result<Sampler> {
        let sampler = self.ctx.get_or_create_sampler(desc)?;
        Ok(Sampler::new(
            desc,
            Box::new(VulkanSamplerBackendData { sampler }),
        ))
    }

    fn create_render_target(&self, attachments: Vec<Attachment>) -> anyhow::Result<RenderTarget> {
        Ok(RenderTarget::new(
            attachments,
            false,
            Box::new(VulkanRenderTargetBackendData),
        ))
    }

    fn window_render_target(&self) -> Arc<RenderTarget> {
        self.state.lock().window_render_target.clone()
    }

    fn create_binding_set(&self, mut bindings: Vec<ShaderBinding>) -> anyhow::Result<BindingSet> {
        resolve_binding_indices(&mut bindings);
        let backend_data =
            VulkanBindingSetBackendData::new(self.ctx.clone(), &self.descriptor_allocator, &bindings)?;
        Ok(BindingSet::new(bindings, Box::new(backend_data)))
    }

    fn create_render_state(&self, desc: RenderStateDescription) -> anyhow::Result<RenderState> {
        let window_color_format = self.state.lock().swapchain.format.format;
        let (backend_data, named_constants) = pipeline::create_render_state_data(
            &self.ctx,
            &self.shader_compiler,
            &desc,
            window_color_format,
        )?;
        Ok(RenderState::new(desc, named_constants, Box::new(backend_data)))
    }

    fn create_compute_state(
        &self,
        shader: Shader,
        state_bindings: StateBindings,
    ) -> anyhow::Result<ComputeState> {
        let (backend_data, named_constants) = pipeline::create_compute_state_data(
            &self.ctx,
            &self.shader_compiler,
            &shader,
            &state_bindings,
        )?;
        Ok(ComputeState::new(
            shader,
            state_bindings,
            named_constants,
            Box::new(backend_data),
        ))
    }

    fn create_ray_tracing_state(
        &self,
        shader_binding_table: ShaderBindingTable,
        state_bindings: StateBindings,
        max_recursion_depth: u32,
    ) -> anyhow::Result<RayTracingState> {
        let (backend_data, named_constants) = pipeline::create_ray_tracing_state_data(
            &self.ctx,
            &self.shader_compiler,
            &shader_binding_table,
            &state_bindings,
            max_recursion_depth,
        )?;
        Ok(RayTracingState::new(
            shader_binding_table,
            state_bindings,
            max_recursion_depth,
            named_constants,
            Box::new(backend_data),
        ))
    }

    fn create_bottom_level_acceleration_structure(
        &self,
        geometries: Vec<RtGeometry>,
    ) -> anyhow::Result<BottomLevelAs> {
        let backend_data = rt::create_blas_backend_data(self.ctx.clone(), &geometries)?;
        Ok(BottomLevelAs::new(geometries, Box::new(backend_data)))
    }

    fn create_top_level_acceleration_structure(
        &self,
        max_instance_count: u32,
        initial_instances: Vec<RtGeometryInstance>,
    ) -> anyhow::Result<TopLevelAs> {
        let backend_data =
            rt::create_tlas_backend_data(self.ctx.clone(), max_instance_count, &initial_instances)?;
        Ok(TopLevelAs::new(
            max_instance_count,
            initial_instances,
            Box::new(backend_data),
        ))
    }

    fn wait_for_frame_ready(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let slot = (state.current_frame % state.frame_contexts.len() as u64) as usize;
        let context = &mut state.frame_contexts[slot];
        context.frame_fence.wait()?;
        context.fence_value_completed = context.fence_value_signaled;
        Ok(())
    }

    fn execute_frame(
        &self,
        window_extent: Extent2D,
        record: &mut dyn FnMut(&mut FrameRecordContext<'_>),
    ) -> anyhow::Result<FrameOutcome> {
        let mut outcome = FrameOutcome::default();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // 1. frame context = swapchain slot round robin
        let context_count = state.frame_contexts.len() as u64;
        let frame_index = state.current_frame;
        let slot = (frame_index % context_count) as usize;

        // 2. block until this context's previous submission completed
        {
            let context = &mut state.frame_contexts[slot];
            context.frame_fence.wait()?;
            context.fence_value_completed = context.fence_value_signaled;
        }

        // acquire the back buffer; out-of-date swapchains recreate and
        // skip this frame's recording
        let acquire_result = {
            let context = &state.frame_contexts[slot];
            state.swapchain.acquire(context.image_available.semaphore)
        };
        let (image_index, suboptimal) = match acquire_result {
            Ok(result) => result,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("swapchain out of date at acquire, recreating");
                self.recreate_swapchain_locked(state, window_extent)?;
                outcome.needs_pipeline_reconstruction = true;
                return Ok(outcome);
            }
            Err(err) => return Err(anyhow!("acquiring the next swapchain image failed: {err}")),
        };
        if suboptimal {
            state.recreate_requested = true;
        }

        let swapchain_extent = state.swapchain.extent;
        let backbuffer = BackbufferInfo {
            image: state.swapchain.images[image_index as usize],
            view: state.swapchain.image_views[image_index as usize],
            format: state.swapchain.format.format,
            extent: swapchain_extent,
        };

        // 3. reset + open the command list
        let context = &mut state.frame_contexts[slot];
        let cmd = context.command_buffer;
        unsafe {
            self.ctx
                .device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.ctx.device.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        // 4. rewind the per-frame allocators
        context.upload_buffer.reset();
        context.uniform_stream.reset();

        // 5. back buffer becomes a render target
        let old_layout = state.swapchain.image_layouts[image_index as usize];
        image_barrier(
            &self.ctx.device.device,
            cmd,
            backbuffer.image,
            vk::ImageAspectFlags::COLOR,
            0,
            1,
            0,
            1,
            old_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        // 6./7. record node callbacks against the patched window target
        {
            let mut command_list = VulkanCommandList::new(
                &self.ctx,
                cmd,
                Some(&mut context.uniform_stream),
                Some(backbuffer),
            );
            {
                let mut frame = FrameRecordContext {
                    command_list: &mut command_list,
                    upload_buffer: &mut context.upload_buffer,
                    frame_index,
                    swapchain_image_index: image_index,
                    window_extent: swapchain_extent,
                };
                record(&mut frame);
            }

            // uploads a node staged but never flushed still run this frame
            if context.upload_buffer.has_pending_operations() {
                debug!("flushing upload operations left pending at end of frame");
                command_list.execute_upload_operations(&mut context.upload_buffer);
            }
            command_list.finish();
        }

        // 9. back to present & submit with the frame fence
        image_barrier(
            &self.ctx.device.device,
            cmd,
            backbuffer.image,
            vk::ImageAspectFlags::COLOR,
            0,
            1,
            0,
            1,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        state.swapchain.image_layouts[image_index as usize] = vk::ImageLayout::PRESENT_SRC_KHR;

        unsafe {
            self.ctx.device.device.end_command_buffer(cmd)?;
        }
        context.frame_fence.reset()?;

        let wait_semaphores = [context.image_available.semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [context.render_finished.semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        {
            let queue = self.ctx.device.queue.lock();
            unsafe {
                self.ctx.device.device.queue_submit(
                    queue.graphics_queue,
                    &[submit_info],
                    context.frame_fence.fence,
                )
            }
            .map_err(|err| anyhow!("frame submit failed: {err}"))?;
        }

        // 10. the context's next sequential fence value
        context.fence_value_signaled += 1;

        let present_result = {
            let queue = self.ctx.device.queue.lock();
            state
                .swapchain
                .present(queue.present_queue, image_index, context.render_finished.semaphore)
        };
        match present_result {
            Ok(suboptimal) => {
                if suboptimal {
                    state.recreate_requested = true;
                }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => state.recreate_requested = true,
            Err(err) => return Err(anyhow!("presenting failed: {err}")),
        }

        state.current_frame += 1;

        // 11. framebuffer size changed since last frame -> recreate and
        // ask for a pipeline rebuild
        if (window_extent != state.swapchain.extent && !window_extent.has_zero_area())
            || state.recreate_requested
        {
            info!(
                "recreating swapchain ({}x{} -> {}x{})",
                state.swapchain.extent.width,
                state.swapchain.extent.height,
                window_extent.width,
                window_extent.height,
            );
            self.recreate_swapchain_locked(state, window_extent)?;
            outcome.needs_pipeline_reconstruction = true;
        }

        Ok(outcome)
    }

    fn complete_pending_operations(&self) -> anyhow::Result<()> {
        self.ctx.one_shot.wait_all()?;
        self.ctx.device.wait_idle()?;
        let mut state = self.state.lock();
        for context in &mut state.frame_contexts {
            context.fence_value_completed = context.fence_value_signaled;
        }
        Ok(())
    }

    fn swapchain_extent(&self) -> Extent2D {
        self.state.lock().swapchain.extent
    }

    fn swapchain_image_count(&self) -> u32 {
        self.state.lock().swapchain.image_count()
    }

    fn submit_one_shot(
        &self,
        record: &mut dyn FnMut(&mut dyn CommandListInterface),
    ) -> anyhow::Result<u64> {
        self.ctx.one_shot.submit(|cmd| {
            let mut command_list = VulkanCommandList::new(&self.ctx, cmd, None, None);
            record(&mut command_list);
            command_list.finish();
            Ok(())
        })
    }

    fn poll_fence(&self, fence_value: u64) -> bool {
        self.ctx.one_shot.poll(fence_value)
    }

    fn wait_fence(&self, fence_value: u64) -> anyhow::Result<()> {
        self.ctx.one_shot.wait(fence_value)
    }

    fn frame_fence_info(&self) -> Vec<FrameContextFenceInfo> {
        self.state
            .lock()
            .frame_contexts
            .iter()
            .map(|context| FrameContextFenceInfo {
                signaled_value: context.fence_value_signaled,
                completed_value: context.fence_value_completed,
            })
            .collect()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // nothing of the frame contexts may still be in flight when
        // their fences/semaphores/streams drop
        if let Err(err) = self.ctx.device.wait_idle() {
            warn!("device idle at shutdown failed: {err:#}");
        }
    }
}
