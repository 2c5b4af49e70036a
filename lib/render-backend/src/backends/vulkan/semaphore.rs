use std::sync::Arc;

use ash::vk;

use super::logical_device::LogicalDevice;

#[derive(Debug)]
pub struct Semaphore {
    pub semaphore: vk::Semaphore,

    device: Arc<LogicalDevice>,
}

impl Semaphore {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }?;
        Ok(Self { semaphore, device })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
