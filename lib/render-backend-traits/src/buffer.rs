use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use downcast_rs::{impl_downcast, Downcast};
use log::warn;
use render_types::buffer::{BufferMapMode, BufferUsage, ReallocateStrategy};
use render_types::state::{AtomicResourceState, ResourceState};

use crate::resource::ResourceBase;

/// Backend payload of a [`Buffer`]. The common layer validates; these
/// entry points trust their arguments.
pub trait BufferBackendData: Downcast + Debug + Send + Sync {
    fn set_debug_name(&self, name: &str);

    fn update_data(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()>;

    fn map_data(
        &self,
        mode: BufferMapMode,
        offset: usize,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> anyhow::Result<()>;

    /// Blocking readback into `dest`; forces the device idle first.
    fn read_data(&self, offset: usize, dest: &mut [u8]) -> anyhow::Result<()>;

    fn reallocate_with_size(
        &self,
        new_size: usize,
        strategy: ReallocateStrategy,
    ) -> anyhow::Result<()>;
}
impl_downcast!(BufferBackendData);

pub struct Buffer {
    base: ResourceBase,
    usage: BufferUsage,
    stride: Option<usize>,
    size: AtomicUsize,
    state: AtomicResourceState,
    backend_data: Box<dyn BufferBackendData>,
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.base.name())
            .field("usage", &self.usage)
            .field("size", &self.size())
            .finish()
    }
}

impl Buffer {
    /// Called by backend factories only.
    pub fn new(
        size: usize,
        usage: BufferUsage,
        stride: Option<usize>,
        backend_data: Box<dyn BufferBackendData>,
    ) -> Self {
        Self {
            base: ResourceBase::default(),
            usage,
            stride,
            size: AtomicUsize::new(size),
            state: AtomicResourceState::new(ResourceState::Undefined),
            backend_data,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        &self.base
    }

    pub fn name(&self) -> String {
        self.base.name()
    }

    pub fn set_name(&self, name: &str) {
        self.base.set_name(name);
        self.backend_data.set_debug_name(name);
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn stride(&self) -> Option<usize> {
        self.stride
    }

    pub fn is_storage_capable(&self) -> bool {
        self.usage.is_storage_capable()
    }

    /// Size of the backing allocation; equals `size()` except for constant
    /// buffers which round up to 256 bytes.
    pub fn size_in_memory(&self) -> usize {
        self.usage.size_in_memory(self.size())
    }

    pub fn current_state(&self) -> ResourceState {
        self.state.load(Ordering::Relaxed)
    }

    pub fn set_current_state(&self, state: ResourceState) {
        self.state.store(state, Ordering::Relaxed);
    }

    pub fn backend_data(&self) -> &dyn BufferBackendData {
        self.backend_data.as_ref()
    }

    pub fn update_data(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()> {
        anyhow::ensure!(
            offset + bytes.len() <= self.size(),
            "buffer update of {} bytes at offset {offset} exceeds buffer size {} ('{}')",
            bytes.len(),
            self.size(),
            self.name(),
        );
        self.backend_data.update_data(bytes, offset)
    }

    /// Maps a range and hands it to `f`. Only valid for Upload & Readback
    /// buffers; everything else lives in device-local memory.
    pub fn map_data(
        &self,
        mode: BufferMapMode,
        offset: usize,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> anyhow::Result<()> {
        assert!(
            self.usage.requires_host_visible(),
            "mapData is only valid for Upload/Readback buffers, but '{}' is {:?}",
            self.name(),
            self.usage,
        );
        anyhow::ensure!(
            offset + size <= self.size(),
            "buffer map range out of bounds for '{}'",
            self.name()
        );
        self.backend_data.map_data(mode, offset, size, f)
    }

    pub fn read_data(&self, offset: usize, dest: &mut [u8]) -> anyhow::Result<()> {
        anyhow::ensure!(
            offset + dest.len() <= self.size(),
            "buffer read range out of bounds for '{}'",
            self.name()
        );
        self.backend_data.read_data(offset, dest)
    }

    pub fn reallocate_with_size(
        &self,
        new_size: usize,
        strategy: ReallocateStrategy,
    ) -> anyhow::Result<()> {
        self.backend_data.reallocate_with_size(new_size, strategy)?;
        self.size.store(new_size, Ordering::Relaxed);
        Ok(())
    }

    /// Doubles the allocation until `required_size` fits, keeping existing
    /// contents. No-op when it already fits.
    pub fn grow_to_fit(&self, required_size: usize) -> anyhow::Result<()> {
        let current = self.size();
        if required_size <= current {
            return Ok(());
        }
        let mut new_size = current.max(1);
        while new_size < required_size {
            new_size *= 2;
        }
        warn!(
            "buffer '{}' growing from {current} to {new_size} bytes",
            self.name()
        );
        self.reallocate_with_size(new_size, ReallocateStrategy::CopyOldData)
    }
}
