use render_types::buffer::IndexType;
use render_types::extent::Extent2D;
use render_types::rendering::ClearValue;

use crate::buffer::Buffer;
use crate::pipeline_state::{ComputeState, RayTracingState, RenderState};
use crate::rt::{BottomLevelAs, TopLevelAs};
use crate::texture::Texture;
use crate::upload::UploadBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureBuildType {
    FullBuild,
    Update,
}

/// Single-threaded recording surface over a per-frame command allocator.
///
/// State-transition policy: every resource caches its last-known GPU state
/// and the command list emits transition barriers lazily, right before the
/// next use. Write-after-write ordering between dispatches on the same
/// storage resource needs an explicit `*_write_barrier` call; everything
/// read-after-write is inferred from binding usage.
///
/// Recording against the wrong state (a draw outside begin/end rendering,
/// nested begin_rendering, ...) is a programming error and panics.
pub trait CommandListInterface {
    fn fill_buffer(&mut self, buffer: &Buffer, fill_value: u32);

    fn clear_texture(&mut self, texture: &Texture, clear_value: ClearValue);

    /// Copies one mip of `src` into one mip of `dst`. Equal extents use a
    /// direct subresource copy; differing extents use a filtered blit.
    fn copy_texture(&mut self, src: &Texture, src_mip: u32, dst: &Texture, dst_mip: u32);

    fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        size: usize,
    );

    /// Downsamples mip 0 through the full chain.
    fn generate_mipmaps(&mut self, texture: &Texture);

    /// Records every staged upload of this frame's upload buffer. Runs
    /// before node commands so uploads are visible to the whole frame.
    fn execute_upload_operations(&mut self, upload_buffer: &mut UploadBuffer);

    /// Binds `state`, transitions every referenced resource, clears
    /// attachments per their load op and sets viewport & scissor to the
    /// full render target.
    fn begin_rendering(&mut self, state: &RenderState);

    /// Same, with an override clear value for all Clear load ops.
    fn begin_rendering_with_clear(&mut self, state: &RenderState, clear_value: ClearValue);

    fn end_rendering(&mut self);

    fn set_compute_state(&mut self, state: &ComputeState);

    fn set_ray_tracing_state(&mut self, state: &RayTracingState);

    /// Patches bytes of the reserved named-uniform constant buffer (set 0)
    /// at the offset shader reflection reported for `name`. An unknown
    /// name logs a warning and is otherwise ignored.
    fn set_named_uniform(&mut self, name: &str, data: &[u8]);

    fn bind_vertex_buffer(&mut self, buffer: &Buffer, stride: usize, binding_index: u32);

    fn bind_index_buffer(&mut self, buffer: &Buffer, index_type: IndexType);

    fn draw(&mut self, vertex_count: u32, first_vertex: u32);

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32);

    /// Indirect multi-draw with a GPU-side draw count.
    fn draw_indirect(&mut self, indirect_buffer: &Buffer, count_buffer: &Buffer, max_draw_count: u32);

    fn draw_mesh_tasks(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32);

    fn draw_mesh_tasks_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        indirect_data_stride: u32,
        indirect_data_offset: u32,
        count_buffer: &Buffer,
        count_data_offset: u32,
    );

    fn build_bottom_level_acceleration_structure(
        &mut self,
        blas: &BottomLevelAs,
        build_type: AccelerationStructureBuildType,
    );

    fn build_top_level_acceleration_structure(
        &mut self,
        tlas: &TopLevelAs,
        build_type: AccelerationStructureBuildType,
    );

    fn trace_rays(&mut self, extent: Extent2D);

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Full-pipeline barrier; the blunt instrument for debugging hazards.
    fn debug_barrier(&mut self);

    /// Nestable debug label scope, shown by capture tools.
    fn begin_debug_label(&mut self, label: &str);

    fn end_debug_label(&mut self);

    /// Write-after-write barrier for one storage texture.
    fn texture_write_barrier(&mut self, texture: &Texture);

    fn texture_mip_write_barrier(&mut self, texture: &Texture, mip_level: u32);

    /// Write-after-write barrier for a set of storage buffers.
    fn buffer_write_barrier(&mut self, buffers: &[&Buffer]);

    /// Blocks until the GPU is idle, then reads `size` bytes at `offset`
    /// from `buffer`. The slow path; tooling and tests only.
    fn slow_blocking_read_from_buffer(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        size: usize,
        dest: &mut Vec<u8>,
    ) -> anyhow::Result<()>;
}

/// Byte-level convenience over [`CommandListInterface::set_named_uniform`].
pub trait NamedUniformExt {
    fn set_named_uniform_f32(&mut self, name: &str, value: f32);
    fn set_named_uniform_u32(&mut self, name: &str, value: u32);
    fn set_named_uniform_vec4(&mut self, name: &str, value: [f32; 4]);
    fn set_named_uniform_mat4(&mut self, name: &str, value: [f32; 16]);
}

impl<T: CommandListInterface + ?Sized> NamedUniformExt for T {
    fn set_named_uniform_f32(&mut self, name: &str, value: f32) {
        self.set_named_uniform(name, &value.to_le_bytes());
    }

    fn set_named_uniform_u32(&mut self, name: &str, value: u32) {
        self.set_named_uniform(name, &value.to_le_bytes());
    }

    fn set_named_uniform_vec4(&mut self, name: &str, value: [f32; 4]) {
        let mut bytes = [0u8; 16];
        for (i, v) in value.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        self.set_named_uniform(name, &bytes);
    }

    fn set_named_uniform_mat4(&mut self, name: &str, value: [f32; 16]) {
        let mut bytes = [0u8; 64];
        for (i, v) in value.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        self.set_named_uniform(name, &bytes);
    }
}
