//! Command recording for the null backend. Transfer-style commands
//! execute immediately against the CPU stores; draws and dispatches only
//! run the same state-machine validation the real backends do, so a test
//! that records an invalid command stream fails the same way everywhere.

use log::warn;
use render_backend_traits::binding::{ShaderBindingResource, StateBindings};
use render_backend_traits::buffer::{Buffer, BufferBackendData};
use render_backend_traits::command_list::{AccelerationStructureBuildType, CommandListInterface};
use render_backend_traits::pipeline_state::{ComputeState, RayTracingState, RenderState};
use render_backend_traits::rt::{BottomLevelAs, TopLevelAs};
use render_backend_traits::shader::NamedConstantLookup;
use render_backend_traits::texture::{Texture, TextureBackendData};
use render_backend_traits::upload::{UploadBuffer, UploadOperation};
use render_types::buffer::IndexType;
use render_types::extent::Extent2D;
use render_types::rendering::{ClearValue, LoadOp};
use render_types::state::ResourceState;

use super::resources::NullBufferBackendData;
use super::resources::NullTextureBackendData;

fn buffer_store(buffer: &Buffer) -> &NullBufferBackendData {
    buffer
        .backend_data()
        .downcast_ref::<NullBufferBackendData>()
        .expect("buffer was not created by the null backend")
}

fn texture_store(texture: &Texture) -> &NullTextureBackendData {
    texture
        .backend_data()
        .downcast_ref::<NullTextureBackendData>()
        .expect("texture was not created by the null backend")
}

#[derive(Default)]
pub struct NullCommandList {
    render_state_active: bool,
    compute_state_active: bool,
    ray_tracing_state_active: bool,
    vertex_buffer_bound: bool,
    index_buffer_bound: bool,
    named_constant_lookup: Option<NamedConstantLookup>,
    debug_label_depth: usize,
}

impl NullCommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// End-of-frame validation: every scope must be balanced.
    pub fn finish(&mut self) {
        assert!(
            !self.render_state_active,
            "command list closed while rendering is still active"
        );
        assert!(
            self.debug_label_depth == 0,
            "command list closed with {} unbalanced debug labels",
            self.debug_label_depth
        );
    }

    fn transition_bound_resources(&mut self, bindings: &StateBindings) {
        for (_, binding_set) in bindings.iter() {
            for binding in binding_set.bindings() {
                match binding.resource() {
                    ShaderBindingResource::ConstantBuffer(buffer) => {
                        buffer.set_current_state(ResourceState::VertexAndConstantBuffer);
                    }
                    ShaderBindingResource::StorageBuffer(buffer) => {
                        buffer.set_current_state(ResourceState::StorageReadWrite);
                    }
                    ShaderBindingResource::StorageTexture(view) => {
                        view.texture().set_current_state(ResourceState::StorageReadWrite);
                    }
                    ShaderBindingResource::SampledTexture(textures) => {
                        for texture in textures {
                            texture.set_current_state(ResourceState::ShaderRead);
                        }
                    }
                    ShaderBindingResource::RtAccelerationStructure(_) => {}
                }
            }
        }
    }

    fn clear_attachments(&self, state: &RenderState, clear_value: ClearValue) {
        for attachment in state.render_target().attachments() {
            if matches!(attachment.load_op, LoadOp::Clear) {
                let clear_color = if attachment.ty.is_depth() {
                    render_types::rendering::ClearColor::new(clear_value.depth, 0.0, 0.0, 0.0)
                } else {
                    clear_value.color
                };
                if let Err(err) = texture_store(&attachment.texture).clear_color(clear_color) {
                    warn!("null clear of '{}' failed: {err:#}", attachment.texture.name());
                }
            }
        }
    }

    fn begin_rendering_impl(&mut self, state: &RenderState, clear_value: ClearValue) {
        assert!(
            !self.render_state_active,
            "beginRendering while rendering is already active"
        );
        self.render_state_active = true;
        self.vertex_buffer_bound = false;
        self.index_buffer_bound = false;
        self.named_constant_lookup = Some(state.named_constants().clone());

        for attachment in state.render_target().attachments() {
            let target_state = if attachment.ty.is_depth() {
                ResourceState::DepthStencilAttachment
            } else {
                ResourceState::ColorAttachment
            };
            attachment.texture.set_current_state(target_state);
        }
        self.transition_bound_resources(state.state_bindings());
        self.clear_attachments(state, clear_value);
    }
}

impl CommandListInterface for NullCommandList {
    fn fill_buffer(&mut self, buffer: &Buffer, fill_value: u32) {
        let store = buffer_store(buffer);
        let mut bytes = store.store.write();
        for chunk in bytes.chunks_exact_mut(4) {
            chunk.copy_from_slice(&fill_value.to_le_bytes());
        }
        buffer.set_current_state(ResourceState::TransferDst);
    }

    fn clear_texture(&mut self, texture: &Texture, clear_value: ClearValue) {
        let color = if texture.is_depth_format() {
            render_types::rendering::ClearColor::new(clear_value.depth, 0.0, 0.0, 0.0)
        } else {
            clear_value.color
        };
        if let Err(err) = texture_store(texture).clear_color(color) {
            warn!("null clearTexture on '{}' failed: {err:#}", texture.name());
        }
        texture.set_current_state(ResourceState::TransferDst);
    }

    fn copy_texture(&mut self, src: &Texture, src_mip: u32, dst: &Texture, dst_mip: u32) {
        let src_extent = src.extent_at_mip(src_mip);
        let dst_extent = dst.extent_at_mip(dst_mip);
        assert!(
            src_extent == dst_extent,
            "null backend only copies equal-extent subresources ({}x{} vs {}x{})",
            src_extent.width,
            src_extent.height,
            dst_extent.width,
            dst_extent.height,
        );

        let mut data = Vec::new();
        if let Err(err) = texture_store(src).read_data(src_mip, &mut data) {
            warn!("null copyTexture read failed: {err:#}");
            return;
        }
        if let Err(err) = texture_store(dst).set_data(&data, dst_mip, 0) {
            warn!("null copyTexture write failed: {err:#}");
        }
        src.set_current_state(ResourceState::TransferSrc);
        dst.set_current_state(ResourceState::TransferDst);
    }

    fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        size: usize,
    ) {
        let mut data = vec![0u8; size];
        buffer_store(src)
            .read_data(src_offset, &mut data)
            .expect("copy source range out of bounds");
        buffer_store(dst)
            .update_data(&data, dst_offset)
            .expect("copy destination range out of bounds");
        src.set_current_state(ResourceState::TransferSrc);
        dst.set_current_state(ResourceState::TransferDst);
    }

    fn generate_mipmaps(&mut self, texture: &Texture) {
        if !texture.has_mipmaps() {
            warn!(
                "generateMipmaps recorded for '{}' which has no mipmaps, ignoring",
                texture.name()
            );
            return;
        }
        if let Err(err) = texture_store(texture).generate_mipmaps() {
            warn!("null generateMipmaps on '{}' failed: {err:#}", texture.name());
        }
    }

    fn execute_upload_operations(&mut self, upload_buffer: &mut UploadBuffer) {
        let staging = upload_buffer.backing_buffer().clone();
        for operation in upload_buffer.drain_pending_operations() {
            match operation {
                UploadOperation::BufferCopy {
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    self.copy_buffer(&staging, src_offset, &dst, dst_offset, size);
                }
                UploadOperation::TextureCopy {
                    src_offset,
                    dst,
                    mip_level,
                    array_layer,
                    size,
                } => {
                    let mut data = vec![0u8; size];
                    buffer_store(&staging)
                        .read_data(src_offset, &mut data)
                        .expect("staged texture data out of bounds");
                    if let Err(err) = texture_store(&dst).set_data(&data, mip_level, array_layer) {
                        warn!("null staged texture upload failed: {err:#}");
                    }
                    dst.set_current_state(ResourceState::TransferDst);
                }
            }
        }
    }

    fn begin_rendering(&mut self, state: &RenderState) {
        self.begin_rendering_impl(state, ClearValue::default());
    }

    fn begin_rendering_with_clear(&mut self, state: &RenderState, clear_value: ClearValue) {
        self.begin_rendering_impl(state, clear_value);
    }

    fn end_rendering(&mut self) {
        assert!(
            self.render_state_active,
            "endRendering without an active render state"
        );
        self.render_state_active = false;
        self.named_constant_lookup = None;
    }

    fn set_compute_state(&mut self, state: &ComputeState) {
        assert!(
            !self.render_state_active,
            "setComputeState inside an active render pass"
        );
        self.compute_state_active = true;
        self.ray_tracing_state_active = false;
        self.named_constant_lookup = Some(state.named_constants().clone());
        self.transition_bound_resources(state.state_bindings());
    }

    fn set_ray_tracing_state(&mut self, state: &RayTracingState) {
        assert!(
            !self.render_state_active,
            "setRayTracingState inside an active render pass"
        );
        self.ray_tracing_state_active = true;
        self.compute_state_active = false;
        self.named_constant_lookup = Some(state.named_constants().clone());
        self.transition_bound_resources(state.state_bindings());
    }

    fn set_named_uniform(&mut self, name: &str, data: &[u8]) {
        let Some(lookup) = &self.named_constant_lookup else {
            warn!("setNamedUniform('{name}') without a bound pipeline state");
            return;
        };
        match lookup.lookup(name) {
            Some(constant) => {
                assert!(
                    data.len() as u32 <= constant.size,
                    "named uniform '{name}' is {} bytes but {} were provided",
                    constant.size,
                    data.len(),
                );
            }
            // a miss is non-fatal: shader variants legitimately drop constants
            None => warn!("named uniform '{name}' not found in the bound pipeline"),
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: &Buffer, _stride: usize, _binding_index: u32) {
        assert!(
            self.render_state_active,
            "bindVertexBuffer outside of rendering"
        );
        buffer.set_current_state(ResourceState::VertexAndConstantBuffer);
        self.vertex_buffer_bound = true;
    }

    fn bind_index_buffer(&mut self, buffer: &Buffer, _index_type: IndexType) {
        assert!(
            self.render_state_active,
            "bindIndexBuffer outside of rendering"
        );
        buffer.set_current_state(ResourceState::IndexBuffer);
        self.index_buffer_bound = true;
    }

    fn draw(&mut self, _vertex_count: u32, _first_vertex: u32) {
        assert!(self.render_state_active, "draw outside of rendering");
        assert!(self.vertex_buffer_bound, "draw without a bound vertex buffer");
    }

    fn draw_indexed(&mut self, _index_count: u32, _first_index: u32, _vertex_offset: i32) {
        assert!(self.render_state_active, "drawIndexed outside of rendering");
        assert!(
            self.vertex_buffer_bound,
            "drawIndexed without a bound vertex buffer"
        );
        assert!(
            self.index_buffer_bound,
            "drawIndexed without a bound index buffer"
        );
    }

    fn draw_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        count_buffer: &Buffer,
        _max_draw_count: u32,
    ) {
        assert!(self.render_state_active, "drawIndirect outside of rendering");
        indirect_buffer.set_current_state(ResourceState::IndirectArgument);
        count_buffer.set_current_state(ResourceState::IndirectArgument);
    }

    fn draw_mesh_tasks(&mut self, _group_count_x: u32, _group_count_y: u32, _group_count_z: u32) {
        assert!(
            self.render_state_active,
            "drawMeshTasks outside of rendering"
        );
    }

    fn draw_mesh_tasks_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        _indirect_data_stride: u32,
        _indirect_data_offset: u32,
        count_buffer: &Buffer,
        _count_data_offset: u32,
    ) {
        assert!(
            self.render_state_active,
            "drawMeshTasksIndirect outside of rendering"
        );
        indirect_buffer.set_current_state(ResourceState::IndirectArgument);
        count_buffer.set_current_state(ResourceState::IndirectArgument);
    }

    fn build_bottom_level_acceleration_structure(
        &mut self,
        _blas: &BottomLevelAs,
        _build_type: AccelerationStructureBuildType,
    ) {
    }

    fn build_top_level_acceleration_structure(
        &mut self,
        _tlas: &TopLevelAs,
        _build_type: AccelerationStructureBuildType,
    ) {
    }

    fn trace_rays(&mut self, _extent: Extent2D) {
        assert!(
            self.ray_tracing_state_active,
            "traceRays without an active ray tracing state"
        );
    }

    fn dispatch(&mut self, _x: u32, _y: u32, _z: u32) {
        assert!(
            self.compute_state_active,
            "dispatch without an active compute state"
        );
    }

    fn debug_barrier(&mut self) {}

    fn begin_debug_label(&mut self, _label: &str) {
        self.debug_label_depth += 1;
    }

    fn end_debug_label(&mut self) {
        assert!(self.debug_label_depth > 0, "endDebugLabel without begin");
        self.debug_label_depth -= 1;
    }

    fn texture_write_barrier(&mut self, _texture: &Texture) {}

    fn texture_mip_write_barrier(&mut self, _texture: &Texture, _mip_level: u32) {}

    fn buffer_write_barrier(&mut self, _buffers: &[&Buffer]) {}

    fn slow_blocking_read_from_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        dest: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        dest.resize(size, 0);
        buffer_store(buffer).read_data(offset, dest)
    }
}
