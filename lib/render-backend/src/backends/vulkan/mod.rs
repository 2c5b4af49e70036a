pub mod command_list;
pub mod command_pool;
pub mod ctx;
pub mod dbg_utils_messenger;
pub mod descriptor;
pub mod error;
pub mod fence;
pub mod frame;
pub mod instance;
pub mod logical_device;
pub mod memory;
pub mod phy_device;
pub mod pipeline;
pub mod queue;
pub mod resources;
pub mod rt;
pub mod semaphore;
pub mod surface;
pub mod swapchain;
pub mod utils;

mod backend;

pub use backend::VulkanBackend;
