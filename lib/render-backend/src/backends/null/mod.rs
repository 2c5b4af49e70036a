//! Headless backend: every resource is a CPU-side store and the "GPU"
//! completes work at submit time. Carries the whole frame-scheduling
//! surface (frame contexts, fence values, swapchain slots, resize &
//! recreation) so the registry/pipeline machinery and tests run without a
//! device.

pub mod command_list;
pub mod resources;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use parking_lot::Mutex;
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
use render_backend_traits::shader::{NamedConstantLookup, Shader};
use render_backend_traits::texture::Texture;
use render_backend_traits::upload::UploadBuffer;
use render_types::buffer::BufferUsage;
use render_types::capabilities::BackendCapabilities;
use render_types::config::GfxOptions;
use render_types::extent::Extent2D;
use render_types::format::TextureFormat;
use render_types::rendering::{AttachmentType, LoadOp};
use render_types::texture::TextureDescription;

use crate::shaders::ShaderCompiler;
use command_list::NullCommandList;
use resources::{
    NullAccelerationStructureBackendData, NullBindingSetBackendData, NullBufferBackendData,
    NullRenderTargetBackendData, NullSamplerBackendData, NullStateBackendData,
    NullTextureBackendData,
};

struct NullFrameContext {
    upload_buffer: UploadBuffer,
    /// Fence value recorded at this context's most recent submit.
    signaled_fence_value: u64,
    /// The null GPU completes instantly, so this trails never.
    completed_fence_value: u64,
    /// Monotonic per-context counter handed out at submit.
    next_fence_value: u64,
}

struct NullBackendInner {
    swapchain_extent: Extent2D,
    window_render_target: Arc<RenderTarget>,
    frame_contexts: Vec<NullFrameContext>,
    current_frame_index: u64,
}

pub struct NullBackend {
    capabilities: BackendCapabilities,
    options: GfxOptions,
    shader_compiler: ShaderCompiler,
    inner: Mutex<NullBackendInner>,
    one_shot_fence_counter: AtomicU64,
}

impl std::fmt::Debug for NullBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullBackend").finish()
    }
}

impl NullBackend {
    pub fn new(
        options: GfxOptions,
        initial_extent: Extent2D,
        shader_base_dir: impl AsRef<std::path::Path>,
    ) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(
            !initial_extent.has_zero_area(),
            "null backend needs a non-zero initial extent"
        );
        let buffer_count = options.swapchain_buffer_count.max(2);

        let backend = Self {
            // nothing actually executes, so everything is "supported"
            capabilities: BackendCapabilities {
                ray_tracing: true,
                mesh_shading: true,
                shader_16bit_float: true,
                shader_barycentrics: true,
            },
            shader_compiler: ShaderCompiler::new(shader_base_dir),
            inner: Mutex::new(NullBackendInner {
                swapchain_extent: initial_extent,
                window_render_target: Arc::new(Self::build_window_render_target(initial_extent)),
                frame_contexts: Vec::new(),
                current_frame_index: 0,
            }),
            one_shot_fence_counter: AtomicU64::new(0),
            options,
        };

        {
            let mut inner = backend.inner.lock();
            for _ in 0..buffer_count {
                inner.frame_contexts.push(NullFrameContext {
                    upload_buffer: UploadBuffer::new(Arc::new(
                        backend.make_buffer(
                            backend.options.upload_buffer_capacity,
                            BufferUsage::Upload,
                            None,
                        ),
                    )),
                    signaled_fence_value: 0,
                    completed_fence_value: 0,
                    next_fence_value: 0,
                });
            }
        }

        info!(
            "null backend ready: {buffer_count} frame contexts, {}x{} swapchain",
            initial_extent.width, initial_extent.height
        );
        Ok(Arc::new(backend))
    }

    fn make_buffer(&self, size: usize, usage: BufferUsage, stride: Option<usize>) -> Buffer {
        Buffer::new(
            size,
            usage,
            stride,
            Box::new(NullBufferBackendData::new(usage.size_in_memory(size))),
        )
    }

    fn make_texture(desc: TextureDescription) -> Texture {
        Texture::new(desc.clone(), Box::new(NullTextureBackendData::new(desc)))
    }

    /// The swapchain stand-in: one color attachment the size of the
    /// window plus a depth attachment, like the real window target.
    fn build_window_render_target(extent: Extent2D) -> RenderTarget {
        let color = Self::make_texture(TextureDescription {
            extent: extent.into(),
            format: TextureFormat::Rgba8Unorm,
            ..Default::default()
        });
        color.set_name("WindowColor");
        let depth = Self::make_texture(TextureDescription {
            extent: extent.into(),
            format: TextureFormat::Depth32F,
            ..Default::default()
        });
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
        let target = RenderTarget::new(attachments, true, Box::new(NullRenderTargetBackendData));
        target.set_name("WindowRenderTarget");
        target
    }

    fn named_constants_for(&self, shader: &Shader) -> NamedConstantLookup {
        match self.shader_compiler.compile(shader) {
            Ok(compiled) => compiled.named_constants.clone(),
            Err(err) => {
                // headless runs routinely have no shader sources on disk
                debug!("null backend shader compile skipped: {err:#}");
                NamedConstantLookup::default()
            }
        }
    }
}

impl BackendInterface for NullBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_buffer(
        &self,
        size: usize,
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer> {
        Ok(self.make_buffer(size, usage, stride))
    }

    fn create_buffer_with_data(
        &self,
        data: &[u8],
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer> {
        let buffer = self.make_buffer(data.len(), usage, stride);
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
        Ok(Self::make_texture(desc))
    }

    fn create_sampler(&self, desc: SamplerDescription) -> anyhow::Result<Sampler> {
        Ok(Sampler::new(desc, Box::new(NullSamplerBackendData)))
    }

    fn create_render_target(&self, attachments: Vec<Attachment>) -> anyhow::Result<RenderTarget> {
        Ok(RenderTarget::new(
            attachments,
            false,
            Box::new(NullRenderTargetBackendData),
        ))
    }

    fn window_render_target(&self) -> Arc<RenderTarget> {
        self.inner.lock().window_render_target.clone()
    }

    fn create_binding_set(&self, mut bindings: Vec<ShaderBinding>) -> anyhow::Result<BindingSet> {
        resolve_binding_indices(&mut bindings);
        Ok(BindingSet::new(bindings, Box::new(NullBindingSetBackendData)))
    }

    fn create_render_state(&self, desc: RenderStateDescription) -> anyhow::Result<RenderState> {
        let named_constants = self.named_constants_for(&desc.shader);
        Ok(RenderState::new(
            desc,
            named_constants,
            Box::new(NullStateBackendData),
        ))
    }

    fn create_compute_state(
        &self,
        shader: Shader,
        state_bindings: StateBindings,
    ) -> anyhow::Result<ComputeState> {
        let named_constants = self.named_constants_for(&shader);
        Ok(ComputeState::new(
            shader,
            state_bindings,
            named_constants,
            Box::new(NullStateBackendData),
        ))
    }

    fn create_ray_tracing_state(
        &self,
        shader_binding_table: ShaderBindingTable,
        state_bindings: StateBindings,
        max_recursion_depth: u32,
    ) -> anyhow::Result<RayTracingState> {
        let named_constants = self.named_constants_for(&shader_binding_table.pseudo_shader());
        Ok(RayTracingState::new(
            shader_binding_table,
            state_bindings,
            max_recursion_depth,
            named_constants,
            Box::new(NullStateBackendData),
        ))
    }

    fn create_bottom_level_acceleration_structure(
        &self,
        geometries: Vec<RtGeometry>,
    ) -> anyhow::Result<BottomLevelAs> {
        Ok(BottomLevelAs::new(
            geometries,
            Box::new(NullAccelerationStructureBackendData),
        ))
    }

    fn create_top_level_acceleration_structure(
        &self,
        max_instance_count: u32,
        initial_instances: Vec<RtGeometryInstance>,
    ) -> anyhow::Result<TopLevelAs> {
        Ok(TopLevelAs::new(
            max_instance_count,
            initial_instances,
            Box::new(NullAccelerationStructureBackendData),
        ))
    }

    fn wait_for_frame_ready(&self) -> anyhow::Result<()> {
        // the null GPU never lags behind
        Ok(())
    }

    fn execute_frame(
        &self,
        window_extent: Extent2D,
        record: &mut dyn FnMut(&mut FrameRecordContext<'_>),
    ) -> anyhow::Result<FrameOutcome> {
        let mut outcome = FrameOutcome::default();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let swapchain_extent = inner.swapchain_extent;
        let context_count = inner.frame_contexts.len() as u64;
        let frame_index = inner.current_frame_index;
        let image_index = (frame_index % context_count) as u32;
        let context = &mut inner.frame_contexts[image_index as usize];

        // the frame fence of this context must have completed before its
        // resources are reused (instant on the null GPU, but the invariant
        // is still asserted)
        assert!(
            context.completed_fence_value >= context.signaled_fence_value,
            "frame context reused before its fence completed"
        );

        context.upload_buffer.reset();

        let mut command_list = NullCommandList::new();
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

        // safety net for uploads nodes staged but never flushed
        if context.upload_buffer.has_pending_operations() {
            debug!("flushing upload operations left pending at end of frame");
            command_list.execute_upload_operations(&mut context.upload_buffer);
        }
        command_list.finish();

        // submit + present: signal the context's next sequential fence
        // value; completion is immediate
        context.next_fence_value += 1;
        context.signaled_fence_value = context.next_fence_value;
        context.completed_fence_value = context.next_fence_value;
        inner.current_frame_index += 1;

        if window_extent != inner.swapchain_extent && !window_extent.has_zero_area() {
            info!(
                "framebuffer size changed {}x{} -> {}x{}, recreating swapchain",
                inner.swapchain_extent.width,
                inner.swapchain_extent.height,
                window_extent.width,
                window_extent.height,
            );
            inner.swapchain_extent = window_extent;
            inner.window_render_target = Arc::new(Self::build_window_render_target(window_extent));
            outcome.needs_pipeline_reconstruction = true;
        }

        Ok(outcome)
    }

    fn complete_pending_operations(&self) -> anyhow::Result<()> {
        // signal-and-wait on every context; instant here
        let mut inner = self.inner.lock();
        for context in &mut inner.frame_contexts {
            context.next_fence_value += 1;
            context.signaled_fence_value = context.next_fence_value;
            context.completed_fence_value = context.next_fence_value;
        }
        Ok(())
    }

    fn swapchain_extent(&self) -> Extent2D {
        self.inner.lock().swapchain_extent
    }

    fn swapchain_image_count(&self) -> u32 {
        self.inner.lock().frame_contexts.len() as u32
    }

    fn submit_one_shot(
        &self,
        record: &mut dyn FnMut(&mut dyn CommandListInterface),
    ) -> anyhow::Result<u64> {
        let mut command_list = NullCommandList::new();
        record(&mut command_list);
        command_list.finish();
        Ok(self.one_shot_fence_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn poll_fence(&self, fence_value: u64) -> bool {
        fence_value <= self.one_shot_fence_counter.load(Ordering::SeqCst)
    }

    fn wait_fence(&self, fence_value: u64) -> anyhow::Result<()> {
        if !self.poll_fence(fence_value) {
            warn!("waiting on a fence value that was never submitted: {fence_value}");
        }
        Ok(())
    }

    fn frame_fence_info(&self) -> Vec<FrameContextFenceInfo> {
        self.inner
            .lock()
            .frame_contexts
            .iter()
            .map(|context| FrameContextFenceInfo {
                signaled_value: context.signaled_fence_value,
                completed_value: context.completed_fence_value,
            })
            .collect()
    }
}
