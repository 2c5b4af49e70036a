use std::fmt::Debug;
use std::sync::Arc;

use render_types::buffer::BufferUsage;
use render_types::capabilities::BackendCapabilities;
use render_types::capabilities::BackendCapability;
use render_types::extent::Extent2D;
use render_types::texture::TextureDescription;

use crate::binding::{ShaderBinding, BindingSet, StateBindings};
use crate::buffer::Buffer;
use crate::command_list::CommandListInterface;
use crate::pipeline_state::{
    ComputeState, RayTracingState, RenderState, RenderStateDescription, ShaderBindingTable,
};
use crate::render_target::{Attachment, RenderTarget};
use crate::rt::{BottomLevelAs, RtGeometry, RtGeometryInstance, TopLevelAs};
use crate::sampler::{Sampler, SamplerDescription};
use crate::shader::Shader;
use crate::upload::UploadBuffer;

/// Everything a node execute-callback gets handed for one frame.
pub struct FrameRecordContext<'a> {
    pub command_list: &'a mut dyn CommandListInterface,
    pub upload_buffer: &'a mut UploadBuffer,
    /// Absolute frame counter, never reset.
    pub frame_index: u64,
    /// Back-buffer slot rendered into this frame.
    pub swapchain_image_index: u32,
    pub window_extent: Extent2D,
}

/// What `execute_frame` reports back to the frame driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameOutcome {
    /// Swapchain was recreated this frame; per-pipeline resources that
    /// depend on the window extent must be reconstructed.
    pub needs_pipeline_reconstruction: bool,
}

/// Observable per-frame-context fence state, for diagnostics and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameContextFenceInfo {
    /// Fence value recorded at the context's most recent submit.
    pub signaled_value: u64,
    /// Last fence value the GPU has completed for this context.
    pub completed_value: u64,
}

/// The polymorphic device entry point. One instance per process under
/// normal use, but deliberately not a global: the handle is threaded
/// through explicitly so tests can hold several.
pub trait BackendInterface: Debug + Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    fn has_capability(&self, capability: BackendCapability) -> bool {
        self.capabilities().supports(capability)
    }

    // resource factories

    fn create_buffer(
        &self,
        size: usize,
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer>;

    /// Creates a device-local buffer and uploads `data` through an
    /// internal staging pass.
    fn create_buffer_with_data(
        &self,
        data: &[u8],
        usage: BufferUsage,
        stride: Option<usize>,
    ) -> anyhow::Result<Buffer>;

    fn create_texture(&self, desc: TextureDescription) -> anyhow::Result<crate::texture::Texture>;

    fn create_sampler(&self, desc: SamplerDescription) -> anyhow::Result<Sampler>;

    fn create_render_target(&self, attachments: Vec<Attachment>) -> anyhow::Result<RenderTarget>;

    /// The render target whose color attachment is patched to the acquired
    /// swapchain image every frame.
    fn window_render_target(&self) -> Arc<RenderTarget>;

    fn create_binding_set(&self, bindings: Vec<ShaderBinding>) -> anyhow::Result<BindingSet>;

    fn create_render_state(&self, desc: RenderStateDescription) -> anyhow::Result<RenderState>;

    fn create_compute_state(
        &self,
        shader: Shader,
        state_bindings: StateBindings,
    ) -> anyhow::Result<ComputeState>;

    fn create_ray_tracing_state(
        &self,
        shader_binding_table: ShaderBindingTable,
        state_bindings: StateBindings,
        max_recursion_depth: u32,
    ) -> anyhow::Result<RayTracingState>;

    fn create_bottom_level_acceleration_structure(
        &self,
        geometries: Vec<RtGeometry>,
    ) -> anyhow::Result<BottomLevelAs>;

    fn create_top_level_acceleration_structure(
        &self,
        max_instance_count: u32,
        initial_instances: Vec<RtGeometryInstance>,
    ) -> anyhow::Result<TopLevelAs>;

    // frame driver

    /// Blocks until the frame context for the next frame is reusable, i.e.
    /// its fence from `swapchain_image_count` frames ago has signaled.
    fn wait_for_frame_ready(&self) -> anyhow::Result<()>;

    /// Runs one frame: waits on the frame fence, acquires the back buffer,
    /// opens the command list, resets the upload buffer, patches the
    /// window render target, hands recording to `record`, then renders
    /// overlays, submits, signals the frame fence and presents. When
    /// `window_extent` differs from the current swapchain extent the
    /// swapchain is recreated first and the outcome asks for a pipeline
    /// reconstruction.
    fn execute_frame(
        &self,
        window_extent: Extent2D,
        record: &mut dyn FnMut(&mut FrameRecordContext<'_>),
    ) -> anyhow::Result<FrameOutcome>;

    /// Forces a device idle by signaling and waiting a fence on every
    /// frame context. The precondition to destroying resources.
    fn complete_pending_operations(&self) -> anyhow::Result<()>;

    // swapchain

    fn swapchain_extent(&self) -> Extent2D;

    fn swapchain_image_count(&self) -> u32;

    // off-thread submission primitives

    /// Records and submits a one-shot command list outside the frame loop,
    /// returning a fence value for `poll_fence`/`wait_fence`.
    fn submit_one_shot(
        &self,
        record: &mut dyn FnMut(&mut dyn CommandListInterface),
    ) -> anyhow::Result<u64>;

    fn poll_fence(&self, fence_value: u64) -> bool;

    fn wait_fence(&self, fence_value: u64) -> anyhow::Result<()>;

    // diagnostics

    fn frame_fence_info(&self) -> Vec<FrameContextFenceInfo>;
}
