//! Device memory management: one suballocating allocator over large
//! memory blocks rather than a vkAllocateMemory per resource. Blocks are
//! chained per (memory-type, lifetime-kind); each block carves out slices
//! through an offset allocator. Host-visible blocks stay persistently
//! mapped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::debug;
use parking_lot::Mutex;

use super::logical_device::LogicalDevice;
use crate::offset_allocator::{Allocation, OffsetAllocator};

/// What a memory region is used for; determines heap flags and which
/// usage gauge it is accounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Device local, textures.
    Texture,
    /// Device local, buffers.
    Buffer,
    /// Host visible & coherent, staging and readback and streams.
    Staging,
}

impl MemoryKind {
    fn property_flags(&self) -> vk::MemoryPropertyFlags {
        match self {
            Self::Texture | Self::Buffer => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::Staging => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    fn is_host_visible(&self) -> bool {
        matches!(self, Self::Staging)
    }
}

pub struct DeviceMemoryBlock {
    pub mem: vk::DeviceMemory,
    pub size: u64,
    mapped_ptr: Option<*mut u8>,
    usage_gauge: Arc<AtomicU64>,
    device: Arc<LogicalDevice>,
}

// mapped_ptr is only a cached base address; all slicing goes through
// offsets handed out by the allocator
unsafe impl Send for DeviceMemoryBlock {}
unsafe impl Sync for DeviceMemoryBlock {}

impl std::fmt::Debug for DeviceMemoryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemoryBlock")
            .field("size", &self.size)
            .field("mapped", &self.mapped_ptr.is_some())
            .finish()
    }
}

impl DeviceMemoryBlock {
    fn allocate(
        device: Arc<LogicalDevice>,
        size: u64,
        memory_type_index: u32,
        host_visible: bool,
        needs_device_address: bool,
        usage_gauge: Arc<AtomicU64>,
    ) -> anyhow::Result<Arc<Self>> {
        let mut flags_info = vk::MemoryAllocateFlagsInfo::default()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        if needs_device_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }

        let mem = unsafe { device.device.allocate_memory(&allocate_info, None) }
            .map_err(|err| anyhow!("device memory allocation of {size} bytes failed: {err}"))?;

        let mapped_ptr = if host_visible {
            let ptr = unsafe {
                device
                    .device
                    .map_memory(mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|err| anyhow!("mapping device memory failed: {err}"))?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        usage_gauge.fetch_add(size, Ordering::Relaxed);

        Ok(Arc::new(Self {
            mem,
            size,
            mapped_ptr,
            usage_gauge,
            device,
        }))
    }

    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped_ptr
    }
}

impl Drop for DeviceMemoryBlock {
    fn drop(&mut self) {
        self.usage_gauge.fetch_sub(self.size, Ordering::Relaxed);
        unsafe {
            // freeing implicitly unmaps
            self.device.device.free_memory(self.mem, None);
        }
    }
}

struct BlockEntry {
    block: Arc<DeviceMemoryBlock>,
    sub_allocator: Mutex<OffsetAllocator>,
    memory_type_index: u32,
    kind: MemoryKind,
}

/// A slice of device memory. Dropping it returns the range to its block's
/// sub-allocator (or releases the whole block for dedicated allocations).
pub struct MemoryAllocation {
    pub block: Arc<DeviceMemoryBlock>,
    pub offset: u64,
    pub size: u64,
    free_target: Option<(Arc<BlockEntry>, Allocation)>,
}

impl std::fmt::Debug for MemoryAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocation")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

impl MemoryAllocation {
    /// Host pointer to the start of this slice, for host-visible memory.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.block
            .mapped_ptr()
            .map(|base| unsafe { base.add(self.offset as usize) })
    }
}

impl Drop for MemoryAllocation {
    fn drop(&mut self) {
        if let Some((entry, allocation)) = self.free_target.take() {
            entry.sub_allocator.lock().free(allocation);
        }
    }
}

const BLOCK_SIZE: u64 = 64 * 1024 * 1024;

pub struct MemoryAllocator {
    device: Arc<LogicalDevice>,
    blocks: Vec<Arc<BlockEntry>>,
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("block_count", &self.blocks.len())
            .finish()
    }
}

impl MemoryAllocator {
    pub fn new(device: Arc<LogicalDevice>) -> Self {
        Self {
            device,
            blocks: Vec::new(),
        }
    }

    fn gauge_for(&self, kind: MemoryKind) -> Arc<AtomicU64> {
        match kind {
            MemoryKind::Texture => self.device.texture_memory_usage.clone(),
            MemoryKind::Buffer => self.device.buffer_memory_usage.clone(),
            MemoryKind::Staging => self.device.staging_memory_usage.clone(),
        }
    }

    /// Sub-allocates (or dedicates, for very large requests) memory
    /// matching `requirements`.
    pub fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        kind: MemoryKind,
        needs_device_address: bool,
    ) -> anyhow::Result<MemoryAllocation> {
        let memory_type_index = self
            .device
            .phy_device
            .find_memory_type(requirements.memory_type_bits, kind.property_flags())?;

        // big resources get their own block; sharing would just fragment
        if requirements.size > BLOCK_SIZE / 2 {
            let block = DeviceMemoryBlock::allocate(
                self.device.clone(),
                requirements.size,
                memory_type_index,
                kind.is_host_visible(),
                needs_device_address,
                self.gauge_for(kind),
            )?;
            debug!(
                "dedicated memory block of {} bytes (type {memory_type_index})",
                requirements.size
            );
            return Ok(MemoryAllocation {
                block,
                offset: 0,
                size: requirements.size,
                free_target: None,
            });
        }

        for entry in &self.blocks {
            if entry.memory_type_index != memory_type_index || entry.kind != kind {
                continue;
            }
            if let Some(allocation) = entry
                .sub_allocator
                .lock()
                .allocate(requirements.size, requirements.alignment.max(1))
            {
                return Ok(MemoryAllocation {
                    block: entry.block.clone(),
                    offset: allocation.offset,
                    size: allocation.size,
                    free_target: Some((entry.clone(), allocation)),
                });
            }
        }

        // no block had room; chain a new one
        let block = DeviceMemoryBlock::allocate(
            self.device.clone(),
            BLOCK_SIZE,
            memory_type_index,
            kind.is_host_visible(),
            needs_device_address,
            self.gauge_for(kind),
        )?;
        let entry = Arc::new(BlockEntry {
            block,
            sub_allocator: Mutex::new(OffsetAllocator::new(BLOCK_SIZE)),
            memory_type_index,
            kind,
        });
        self.blocks.push(entry.clone());

        let allocation = entry
            .sub_allocator
            .lock()
            .allocate(requirements.size, requirements.alignment.max(1))
            .ok_or_else(|| anyhow!("fresh memory block cannot fit {} bytes", requirements.size))?;

        Ok(MemoryAllocation {
            block: entry.block.clone(),
            offset: allocation.offset,
            size: allocation.size,
            free_target: Some((entry, allocation)),
        })
    }

    /// Drops block chains that no longer have any live allocation.
    pub fn trim(&mut self) {
        self.blocks
            .retain(|entry| !entry.sub_allocator.lock().is_empty());
    }
}
