//! Per-in-flight-frame state: command buffer, frame fence with its
//! monotonically increasing value, acquire/present semaphores, the upload
//! buffer and the named-uniform stream.

use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use render_backend_traits::upload::UploadBuffer;

use super::ctx::VulkanCtx;
use super::descriptor::DescriptorAllocator;
use super::fence::Fence;
use super::memory::{MemoryAllocation, MemoryKind};
use super::semaphore::Semaphore;

/// Upper bound for one named-uniform block; also the per-draw slice size
/// of the stream.
pub const NAMED_UNIFORM_SLICE_SIZE: usize = 1024;
const UNIFORM_STREAM_CAPACITY: usize = 1024 * NAMED_UNIFORM_SLICE_SIZE;

/// Host-visible ring the command list carves per-draw named-uniform
/// blocks out of. One per frame context; rewound with the frame.
pub struct UniformStream {
    ctx: Arc<VulkanCtx>,
    buffer: vk::Buffer,
    allocation: MemoryAllocation,
    /// Descriptor set over the stream with a dynamic offset per draw.
    pub set: vk::DescriptorSet,
    cursor: usize,
    alignment: usize,
}

impl std::fmt::Debug for UniformStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformStream")
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl UniformStream {
    pub fn new(
        ctx: Arc<VulkanCtx>,
        descriptor_allocator: &DescriptorAllocator,
    ) -> anyhow::Result<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(UNIFORM_STREAM_CAPACITY as u64)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.device.create_buffer(&create_info, None) }?;
        let requirements = unsafe { ctx.device.device.get_buffer_memory_requirements(buffer) };
        let allocation = ctx
            .allocator
            .lock()
            .allocate(requirements, MemoryKind::Staging, false)?;
        unsafe {
            ctx.device
                .device
                .bind_buffer_memory(buffer, allocation.block.mem, allocation.offset)
        }?;

        let (set, _pool) = descriptor_allocator.allocate(&ctx, ctx.named_uniform_set_layout)?;
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(NAMED_UNIFORM_SLICE_SIZE as u64);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe {
            ctx.device.device.update_descriptor_sets(&[write], &[]);
        }

        let alignment = (ctx
            .device
            .phy_device
            .props
            .limits
            .min_uniform_buffer_offset_alignment as usize)
            .max(256);

        Ok(Self {
            ctx,
            buffer,
            allocation,
            set,
            cursor: 0,
            alignment,
        })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Copies `bytes` into the next slice, returning the dynamic offset
    /// to bind set 0 with.
    pub fn push(&mut self, bytes: &[u8]) -> anyhow::Result<u32> {
        anyhow::ensure!(
            bytes.len() <= NAMED_UNIFORM_SLICE_SIZE,
            "named uniform block of {} bytes exceeds the {NAMED_UNIFORM_SLICE_SIZE} byte slice",
            bytes.len(),
        );
        let offset = self.cursor.next_multiple_of(self.alignment);
        anyhow::ensure!(
            offset + NAMED_UNIFORM_SLICE_SIZE <= UNIFORM_STREAM_CAPACITY,
            "named-uniform stream exhausted for this frame"
        );
        let ptr = self
            .allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow!("uniform stream memory is not mapped"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());
        }
        self.cursor = offset + NAMED_UNIFORM_SLICE_SIZE;
        Ok(offset as u32)
    }
}

impl Drop for UniformStream {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Everything one swapchain slot owns.
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub frame_fence: Fence,
    /// Fence value recorded at this context's most recent submit.
    pub fence_value_signaled: u64,
    /// Last value known complete (updated when the fence wait returns).
    pub fence_value_completed: u64,
    pub image_available: Semaphore,
    pub render_finished: Semaphore,
    pub upload_buffer: UploadBuffer,
    pub uniform_stream: UniformStream,
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("fence_value_signaled", &self.fence_value_signaled)
            .finish()
    }
}
