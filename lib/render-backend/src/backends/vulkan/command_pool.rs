use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::logical_device::LogicalDevice;

/// A resettable command pool on the graphics queue family. Buffers are
/// reset individually (the pool carries the reset flag).
#[derive(Debug)]
pub struct CommandPool {
    pool: Mutex<vk::CommandPool>,
    device: Arc<LogicalDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.graphics_queue_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.device.create_command_pool(&create_info, None) }?;
        Ok(Self {
            pool: Mutex::new(pool),
            device,
        })
    }

    pub fn allocate_primary(&self, count: u32) -> anyhow::Result<Vec<vk::CommandBuffer>> {
        let pool = self.pool.lock();
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.device.allocate_command_buffers(&allocate_info) }?)
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        let pool = self.pool.lock();
        unsafe {
            self.device.device.free_command_buffers(*pool, buffers);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_command_pool(*self.pool.lock(), None);
        }
    }
}
