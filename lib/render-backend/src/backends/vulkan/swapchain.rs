//! Swapchain management: format & present-mode selection, image views
//! and the recreate path driven by window resizes.

use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::{info, warn};
use render_types::capabilities::SwapchainTransferFunction;
use render_types::config::GfxOptions;
use render_types::extent::Extent2D;

use super::logical_device::LogicalDevice;
use super::surface::BackendSurface;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// Tracked layout per swapchain image, for the attach/present
    /// transitions around each frame.
    pub image_layouts: Vec<vk::ImageLayout>,

    device: Arc<LogicalDevice>,
    surface: Arc<BackendSurface>,
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish()
    }
}

fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    transfer_function: SwapchainTransferFunction,
) -> vk::SurfaceFormatKHR {
    match transfer_function {
        SwapchainTransferFunction::St2084 => {
            if let Some(format) = formats.iter().find(|f| {
                f.format == vk::Format::A2B10G10R10_UNORM_PACK32
                    && f.color_space == vk::ColorSpaceKHR::HDR10_ST2084_EXT
            }) {
                return *format;
            }
            warn!("ST2084 swapchain requested but unavailable, falling back to sRGB");
        }
        SwapchainTransferFunction::SrgbNonLinear => {}
    }

    // prefer RGBA ordering so the abstract Rgba8Unorm description of the
    // window target matches the real format
    let preferred = [vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM];
    for candidate in preferred {
        if let Some(format) = formats.iter().find(|f| {
            f.format == candidate && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return *format;
        }
    }
    formats.first().copied().unwrap_or_default()
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let wanted = if vsync {
        vk::PresentModeKHR::FIFO
    } else {
        vk::PresentModeKHR::IMMEDIATE
    };
    if modes.contains(&wanted) {
        return wanted;
    }
    let fallback = if vsync {
        vk::PresentModeKHR::FIFO_RELAXED
    } else {
        vk::PresentModeKHR::MAILBOX
    };
    if modes.contains(&fallback) {
        return fallback;
    }
    warn!("requested presentation mode unavailable, using FIFO");
    vk::PresentModeKHR::FIFO
}

impl Swapchain {
    pub fn new(
        device: Arc<LogicalDevice>,
        surface: Arc<BackendSurface>,
        options: &GfxOptions,
        transfer_function: SwapchainTransferFunction,
        window_extent: Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> anyhow::Result<Self> {
        let phy = device.phy_device.cur_device;
        let capabilities = surface.get_capabilities(phy)?;
        let format = choose_surface_format(&surface.get_formats(phy)?, transfer_function);
        let present_mode = choose_present_mode(&surface.get_present_modes(phy)?, options.vsync);

        let max_images = if capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            capabilities.max_image_count
        };
        let image_count = options
            .swapchain_buffer_count
            .max(2)
            .clamp(capabilities.min_image_count, max_images);

        let extent = if capabilities.current_extent.width == u32::MAX {
            Extent2D::new(
                window_extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                window_extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            )
        } else {
            Extent2D::new(
                capabilities.current_extent.width,
                capabilities.current_extent.height,
            )
        };
        anyhow::ensure!(
            !extent.has_zero_area(),
            "swapchain extent has zero area; the window is minimized"
        );

        let mut create_info = vk::SwapchainCreateInfoKHR::default();
        create_info.surface = surface.surface;
        create_info.min_image_count = image_count;
        create_info.image_format = format.format;
        create_info.image_color_space = format.color_space;
        create_info.image_extent = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        create_info.image_array_layers = 1;
        create_info.image_usage =
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        create_info.image_sharing_mode = vk::SharingMode::EXCLUSIVE;
        create_info.pre_transform = capabilities.current_transform;
        create_info.composite_alpha = vk::CompositeAlphaFlagsKHR::OPAQUE;
        create_info.present_mode = present_mode;
        create_info.clipped = vk::TRUE;
        if let Some(old) = old_swapchain {
            create_info.old_swapchain = old;
        }

        let swapchain = unsafe {
            device
                .swapchain_loader
                .create_swapchain(&create_info, None)
        }
        .map_err(|err| anyhow!("swapchain creation failed: {err}"))?;

        let images = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }?;
        let mut image_views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            image_views.push(unsafe { device.device.create_image_view(&view_info, None) }?);
        }

        info!(
            "swapchain: {} images at {}x{} ({:?}, {:?})",
            images.len(),
            extent.width,
            extent.height,
            format.format,
            present_mode,
        );

        let image_layouts = vec![vk::ImageLayout::UNDEFINED; images.len()];

        Ok(Self {
            swapchain,
            format,
            extent,
            images,
            image_views,
            image_layouts,
            device,
            surface,
        })
    }

    /// Recreates in place, reusing the surface and retiring the old
    /// swapchain. The caller must have drained the device first.
    pub fn recreate(
        &mut self,
        options: &GfxOptions,
        transfer_function: SwapchainTransferFunction,
        window_extent: Extent2D,
    ) -> anyhow::Result<()> {
        let new = Self::new(
            self.device.clone(),
            self.surface.clone(),
            options,
            transfer_function,
            window_extent,
            Some(self.swapchain),
        )?;
        let old = std::mem::replace(self, new);
        drop(old);
        Ok(())
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// `Ok((index, suboptimal))`; an `ERROR_OUT_OF_DATE_KHR` comes back
    /// as `Err` for the caller's recreate path.
    pub fn acquire(&self, signal_semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal_semaphore,
                vk::Fence::null(),
            )
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for view in &self.image_views {
                self.device.device.destroy_image_view(*view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}
