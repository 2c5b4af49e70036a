use std::sync::Arc;

use ash::vk;

use super::logical_device::LogicalDevice;

#[derive(Debug)]
pub struct Fence {
    pub fence: vk::Fence,

    device: Arc<LogicalDevice>,
}

impl Fence {
    pub fn new(device: Arc<LogicalDevice>, signaled: bool) -> anyhow::Result<Self> {
        let mut fence_info = vk::FenceCreateInfo::default();
        if signaled {
            fence_info.flags = vk::FenceCreateFlags::SIGNALED;
        }

        let fence = unsafe { device.device.create_fence(&fence_info, None) }?;

        Ok(Self { fence, device })
    }

    pub fn wait(&self) -> anyhow::Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }?;
        Ok(())
    }

    pub fn is_signaled(&self) -> anyhow::Result<bool> {
        Ok(unsafe { self.device.device.get_fence_status(self.fence) }?)
    }

    pub fn reset(&self) -> anyhow::Result<()> {
        unsafe { self.device.device.reset_fences(&[self.fence]) }?;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.fence, None);
        }
    }
}
