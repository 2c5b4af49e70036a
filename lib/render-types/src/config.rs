use atomic_enum::atomic_enum;
use serde::{Deserialize, Serialize};

/// How chatty the backend is about its internals. Stored atomically so the
/// value can be flipped at runtime from a debug UI or console.
#[atomic_enum]
#[derive(Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GfxDebugMode {
    #[default]
    None,
    Minimum,
    AffectsPerformance,
    Verbose,
    All,
}

pub fn is_verbose(mode: &AtomicGfxDebugMode) -> bool {
    matches!(
        mode.load(std::sync::atomic::Ordering::Relaxed),
        GfxDebugMode::Verbose | GfxDebugMode::All
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GfxOptions {
    pub vsync: bool,
    /// Enable API validation layers where the backend has them.
    pub validation: bool,
    pub debug_mode: GfxDebugMode,
    /// Requested number of swapchain buffers; clamped to what the surface
    /// supports. Two is the minimum for the frame pipelining model.
    pub swapchain_buffer_count: u32,
    /// Initial capacity of each per-frame upload buffer, in bytes.
    pub upload_buffer_capacity: usize,
}

impl Default for GfxOptions {
    fn default() -> Self {
        Self {
            vsync: true,
            validation: cfg!(debug_assertions),
            debug_mode: GfxDebugMode::default(),
            swapchain_buffer_count: 3,
            upload_buffer_capacity: 32 * 1024 * 1024,
        }
    }
}
