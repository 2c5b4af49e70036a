use thiserror::Error;

/// Memory allocation failure classes, distinguished so callers can tell
/// a hard out-of-memory from a misfit between resource and heap.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no memory type satisfies the requested property flags")]
    NoSuitableMemoryType,
    #[error("the device is out of memory")]
    OutOfDeviceMemory,
}
