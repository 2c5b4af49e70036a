pub mod null;
pub mod vulkan;
