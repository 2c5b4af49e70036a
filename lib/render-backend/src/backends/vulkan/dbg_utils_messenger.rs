use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use log::{debug, error, info, warn};

use super::instance::Instance;

pub struct DbgUtilsMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    _instance: Arc<Instance>,
}

impl std::fmt::Debug for DbgUtilsMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbgUtilsMessenger").finish()
    }
}

unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        "<no message>".to_string()
    } else {
        unsafe { CStr::from_ptr((*callback_data).p_message) }
            .to_string_lossy()
            .into_owned()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vk] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vk] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[vk] {message}"),
        _ => debug!("[vk] {message}"),
    }

    vk::FALSE
}

impl DbgUtilsMessenger {
    pub fn new(instance: Arc<Instance>) -> anyhow::Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(&instance.entry, &instance.instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }?;

        Ok(Self {
            loader,
            messenger,
            _instance: instance,
        })
    }
}

impl Drop for DbgUtilsMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}
