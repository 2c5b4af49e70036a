use serde::{Deserialize, Serialize};

/// Constant buffers are bound with 256 byte granularity on both backends,
/// so their backing allocations round up to this.
pub const CONSTANT_BUFFER_ALIGNMENT: usize = 256;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    #[default]
    Vertex,
    Index,
    RtInstance,
    ConstantBuffer,
    StorageBuffer,
    IndirectBuffer,
    Upload,
    Readback,
}

impl BufferUsage {
    /// Whether a buffer of this usage may additionally be bound as a
    /// storage buffer in shaders.
    pub fn is_storage_capable(&self) -> bool {
        matches!(
            self,
            Self::Vertex | Self::Index | Self::StorageBuffer | Self::IndirectBuffer | Self::Readback
        )
    }

    /// Upload & readback buffers live in host-visible memory; everything
    /// else is device local.
    pub fn requires_host_visible(&self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }

    /// Size the backing allocation for a buffer of `size` bytes with this
    /// usage. Constant buffers round up to [`CONSTANT_BUFFER_ALIGNMENT`].
    pub fn size_in_memory(&self, size: usize) -> usize {
        match self {
            Self::ConstantBuffer => size.div_ceil(CONSTANT_BUFFER_ALIGNMENT).max(1)
                * CONSTANT_BUFFER_ALIGNMENT,
            _ => size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMapMode {
    Read,
    Write,
}

/// What to do with the previous contents when a buffer is reallocated to a
/// new size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReallocateStrategy {
    CopyOldData,
    DiscardOldData,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    UInt16,
    #[default]
    UInt32,
}

impl IndexType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::UInt16 => 2,
            Self::UInt32 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_buffers_round_up_to_256_bytes() {
        let usage = BufferUsage::ConstantBuffer;
        assert_eq!(usage.size_in_memory(1), 256);
        assert_eq!(usage.size_in_memory(256), 256);
        assert_eq!(usage.size_in_memory(257), 512);
        assert_eq!(usage.size_in_memory(0), 256);
        assert_eq!(BufferUsage::Vertex.size_in_memory(100), 100);
    }

    #[test]
    fn storage_capability_follows_usage() {
        assert!(BufferUsage::Vertex.is_storage_capable());
        assert!(BufferUsage::Index.is_storage_capable());
        assert!(BufferUsage::StorageBuffer.is_storage_capable());
        assert!(BufferUsage::IndirectBuffer.is_storage_capable());
        assert!(BufferUsage::Readback.is_storage_capable());
        assert!(!BufferUsage::ConstantBuffer.is_storage_capable());
        assert!(!BufferUsage::Upload.is_storage_capable());
        assert!(!BufferUsage::RtInstance.is_storage_capable());
    }
}
