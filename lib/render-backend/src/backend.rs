//! Backend selection & creation. The returned handle is threaded through
//! the registry and frame driver explicitly; there is no process global.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use render_backend_traits::backend::BackendInterface;
use render_types::capabilities::AppSpecification;
use render_types::config::GfxOptions;
use render_types::extent::Extent2D;

use crate::backends::null::NullBackend;
use crate::backends::vulkan::VulkanBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Vulkan,
    /// CPU-side stand-in; the whole frame machinery without a device.
    Null,
}

/// The OS window the Vulkan backend presents into.
#[derive(Debug, Clone, Copy)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

pub struct BackendCreateInfo<'a> {
    pub kind: BackendKind,
    pub app_spec: &'a AppSpecification,
    pub options: GfxOptions,
    pub shader_base_dir: PathBuf,
    pub initial_extent: Extent2D,
    /// Required for the Vulkan backend, ignored by the null backend.
    pub window: Option<WindowHandles>,
}

/// Creates the backend and validates the app's capability requirements.
/// A missing required capability is fatal; optional capabilities are
/// simply reported.
pub fn create_backend(info: BackendCreateInfo<'_>) -> anyhow::Result<Arc<dyn BackendInterface>> {
    let backend: Arc<dyn BackendInterface> = match info.kind {
        BackendKind::Null => NullBackend::new(
            info.options,
            info.initial_extent,
            &info.shader_base_dir,
        )?,
        BackendKind::Vulkan => {
            let window = info
                .window
                .ok_or_else(|| anyhow::anyhow!("the vulkan backend needs a window"))?;
            VulkanBackend::new(
                &info.app_spec.app_name,
                info.options,
                info.app_spec.swapchain_transfer_function,
                &info.shader_base_dir,
                window.display,
                window.window,
                info.initial_extent,
            )?
        }
    };

    for capability in &info.app_spec.required_capabilities {
        if !backend.has_capability(*capability) {
            error!("required capability {capability:?} is not supported by this device");
            panic!("required capability {capability:?} is not supported by this device");
        }
    }
    for capability in &info.app_spec.optional_capabilities {
        info!(
            "optional capability {capability:?}: {}",
            if backend.has_capability(*capability) {
                "enabled"
            } else {
                "unavailable"
            }
        );
    }

    Ok(backend)
}
