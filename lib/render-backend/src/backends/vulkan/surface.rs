use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::instance::Instance;

pub struct BackendSurface {
    loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    _instance: Arc<Instance>,
}

impl std::fmt::Debug for BackendSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSurface").finish()
    }
}

impl BackendSurface {
    pub fn new(
        instance: Arc<Instance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> anyhow::Result<Arc<Self>> {
        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(|err| anyhow!("creating the window surface failed: {err}"))?;

        Ok(Arc::new(Self {
            loader,
            surface,
            _instance: instance,
        }))
    }

    pub fn get_capabilities(
        &self,
        phy_device: vk::PhysicalDevice,
    ) -> anyhow::Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phy_device, self.surface)
        }?)
    }

    pub fn get_formats(
        &self,
        phy_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_formats(phy_device, self.surface)
        }?)
    }

    pub fn get_present_modes(
        &self,
        phy_device: vk::PhysicalDevice,
    ) -> anyhow::Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phy_device, self.surface)
        }?)
    }

    pub fn supports_queue_family(
        &self,
        phy_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> anyhow::Result<bool> {
        Ok(unsafe {
            self.loader.get_physical_device_surface_support(
                phy_device,
                queue_family_index,
                self.surface,
            )
        }?)
    }
}

impl Drop for BackendSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
