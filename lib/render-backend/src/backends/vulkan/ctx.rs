//! The shared context every Vulkan resource hangs onto: logical device,
//! memory allocator, one-shot submitter for out-of-frame transfer work,
//! sampler & descriptor caches and the reserved named-uniform set layout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use parking_lot::Mutex;
use render_backend_traits::sampler::SamplerDescription;

use super::command_pool::CommandPool;
use super::fence::Fence;
use super::logical_device::LogicalDevice;
use super::memory::MemoryAllocator;
use super::utils;

/// Fenced one-shot submissions: transfer and build work recorded outside
/// the frame loop (initial uploads, readbacks, AS builds). Each submit
/// gets a monotonically increasing value usable with poll/wait.
pub struct OneShotSubmitter {
    device: Arc<LogicalDevice>,
    pool: CommandPool,
    next_value: AtomicU64,
    completed_value: AtomicU64,
    pending: Mutex<Vec<(u64, vk::CommandBuffer, Fence)>>,
}

impl std::fmt::Debug for OneShotSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotSubmitter").finish()
    }
}

impl OneShotSubmitter {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Self> {
        Ok(Self {
            pool: CommandPool::new(device.clone())?,
            device,
            next_value: AtomicU64::new(0),
            completed_value: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Records with `record` and submits, returning the fence value.
    pub fn submit(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> anyhow::Result<()>,
    ) -> anyhow::Result<u64> {
        let command_buffer = self.pool.allocate_primary(1)?[0];
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .device
                .begin_command_buffer(command_buffer, &begin_info)
        }?;

        record(command_buffer)?;

        unsafe { self.device.device.end_command_buffer(command_buffer) }?;

        let fence = Fence::new(self.device.clone(), false)?;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        {
            let queue = self.device.queue.lock();
            unsafe {
                self.device
                    .device
                    .queue_submit(queue.graphics_queue, &[submit_info], fence.fence)
            }
            .map_err(|err| anyhow!("one-shot queue submit failed: {err}"))?;
        }

        let value = self.next_value.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().push((value, command_buffer, fence));
        Ok(value)
    }

    /// Submits and blocks until the work completed. The slow-but-simple
    /// path used by immediate resource operations.
    pub fn submit_and_wait(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let value = self.submit(record)?;
        self.wait(value)
    }

    fn prune_completed(&self) -> anyhow::Result<()> {
        let mut pending = self.pending.lock();
        let mut retained = Vec::with_capacity(pending.len());
        for (value, command_buffer, fence) in pending.drain(..) {
            if fence.is_signaled()? {
                self.pool.free(&[command_buffer]);
                self.completed_value.fetch_max(value, Ordering::SeqCst);
            } else {
                retained.push((value, command_buffer, fence));
            }
        }
        *pending = retained;
        Ok(())
    }

    pub fn poll(&self, value: u64) -> bool {
        let _ = self.prune_completed();
        self.completed_value.load(Ordering::SeqCst) >= value
    }

    pub fn wait(&self, value: u64) -> anyhow::Result<()> {
        loop {
            {
                let pending = self.pending.lock();
                if let Some((_, _, fence)) = pending.iter().find(|(v, ..)| *v == value) {
                    fence.wait()?;
                }
            }
            self.prune_completed()?;
            if self.completed_value.load(Ordering::SeqCst) >= value
                || self.next_value.load(Ordering::SeqCst) < value
            {
                return Ok(());
            }
        }
    }

    pub fn wait_all(&self) -> anyhow::Result<()> {
        let value = self.next_value.load(Ordering::SeqCst);
        if value > 0 {
            self.wait(value)?;
        }
        Ok(())
    }
}

impl Drop for OneShotSubmitter {
    fn drop(&mut self) {
        let _ = self.wait_all();
    }
}

pub struct VulkanCtx {
    pub device: Arc<LogicalDevice>,
    pub allocator: Mutex<MemoryAllocator>,
    pub one_shot: OneShotSubmitter,
    sampler_cache: Mutex<HashMap<SamplerDescription, vk::Sampler>>,
    /// Set 0 of every pipeline layout: one dynamic uniform buffer holding
    /// the named constants patched through `set_named_uniform`.
    pub named_uniform_set_layout: vk::DescriptorSetLayout,
    /// Filler for holes in a sparse `StateBindings` mapping.
    pub empty_set_layout: vk::DescriptorSetLayout,
}

impl std::fmt::Debug for VulkanCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCtx")
            .field("device", &self.device)
            .finish()
    }
}

impl VulkanCtx {
    pub fn new(device: Arc<LogicalDevice>) -> anyhow::Result<Arc<Self>> {
        let named_uniform_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::ALL)];
        let named_uniform_set_layout = unsafe {
            device.device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&named_uniform_bindings),
                None,
            )
        }?;

        let empty_set_layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default(), None)
        }?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(MemoryAllocator::new(device.clone())),
            one_shot: OneShotSubmitter::new(device.clone())?,
            sampler_cache: Mutex::new(HashMap::new()),
            named_uniform_set_layout,
            empty_set_layout,
            device,
        }))
    }

    /// Samplers are tiny immutable state; one per distinct description.
    pub fn get_or_create_sampler(&self, desc: SamplerDescription) -> anyhow::Result<vk::Sampler> {
        if let Some(sampler) = self.sampler_cache.lock().get(&desc) {
            return Ok(*sampler);
        }

        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(utils::vk_filter(desc.filters.min))
            .mag_filter(utils::vk_filter(desc.filters.mag))
            .mipmap_mode(utils::vk_mipmap_mode(desc.mipmap_mode))
            .address_mode_u(utils::vk_address_mode(desc.wrap_modes.u))
            .address_mode_v(utils::vk_address_mode(desc.wrap_modes.v))
            .address_mode_w(utils::vk_address_mode(desc.wrap_modes.w))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .anisotropy_enable(true)
            .max_anisotropy(
                self.device
                    .phy_device
                    .props
                    .limits
                    .max_sampler_anisotropy
                    .min(8.0),
            );

        let sampler = unsafe { self.device.device.create_sampler(&create_info, None) }?;
        self.sampler_cache.lock().insert(desc, sampler);
        Ok(sampler)
    }

    pub fn device_wait_idle(&self) -> anyhow::Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanCtx {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            for (_, sampler) in self.sampler_cache.lock().drain() {
                self.device.device.destroy_sampler(sampler, None);
            }
            self.device
                .device
                .destroy_descriptor_set_layout(self.named_uniform_set_layout, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.empty_set_layout, None);
        }
    }
}
