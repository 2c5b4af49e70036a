use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::{info, warn};
use raw_window_handle::RawDisplayHandle;

pub struct Instance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub validation_enabled: bool,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("validation_enabled", &self.validation_enabled)
            .finish()
    }
}

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

impl Instance {
    pub fn new(
        app_name: &str,
        want_validation: bool,
        display_handle: Option<RawDisplayHandle>,
    ) -> anyhow::Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| anyhow!("loading the Vulkan loader failed: {err}"))?;

        let app_name = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"arkose")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> = Vec::new();
        if let Some(display_handle) = display_handle {
            extensions
                .extend_from_slice(ash_window::enumerate_required_extensions(display_handle)?);
        }

        let validation_enabled = want_validation && Self::validation_layer_available(&entry)?;
        if want_validation && !validation_enabled {
            warn!("validation layers requested but not installed, continuing without");
        }
        if validation_enabled {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers: Vec<*const c_char> = if validation_enabled {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| anyhow!("creating the Vulkan instance failed: {err}"))?;

        info!(
            "vulkan instance created (validation: {})",
            validation_enabled
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            validation_enabled,
        }))
    }

    fn validation_layer_available(entry: &ash::Entry) -> anyhow::Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }?;
        Ok(layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        }))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}
