use std::ffi::{c_char, CStr, CString};
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use parking_lot::Mutex;
use render_types::capabilities::BackendCapabilities;

use super::instance::Instance;
use super::phy_device::PhyDevice;
use super::queue::Queue;

pub struct DeviceWrapper(ash::Device);

impl Deref for DeviceWrapper {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for DeviceWrapper {
    fn drop(&mut self) {
        unsafe {
            self.0.destroy_device(None);
        }
    }
}

/// The logical device plus its extension entry points and memory-usage
/// gauges. Every RAII wrapper in the backend holds an `Arc` of this so
/// destruction order sorts itself out.
pub struct LogicalDevice {
    pub device: DeviceWrapper,
    pub phy_device: Arc<PhyDevice>,
    pub instance: Arc<Instance>,

    pub swapchain_loader: ash::khr::swapchain::Device,
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub accel_loader: Option<ash::khr::acceleration_structure::Device>,
    pub rt_pipeline_loader: Option<ash::khr::ray_tracing_pipeline::Device>,
    pub mesh_shader_loader: Option<ash::ext::mesh_shader::Device>,

    pub queue: Mutex<Queue>,
    pub graphics_queue_index: u32,

    pub capabilities: BackendCapabilities,

    pub texture_memory_usage: Arc<AtomicU64>,
    pub buffer_memory_usage: Arc<AtomicU64>,
    pub staging_memory_usage: Arc<AtomicU64>,
}

impl std::fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("phy_device", &self.phy_device)
            .finish()
    }
}

impl LogicalDevice {
    pub fn new(instance: Arc<Instance>, phy_device: Arc<PhyDevice>) -> anyhow::Result<Arc<Self>> {
        let capabilities = phy_device.capabilities;
        let graphics_queue_index = phy_device.graphics_queue_index;

        let device = Self::create_logical_device(&instance, &phy_device)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);
        let debug_utils = instance
            .validation_enabled
            .then(|| ash::ext::debug_utils::Device::new(&instance.instance, &device));
        let accel_loader = capabilities
            .ray_tracing
            .then(|| ash::khr::acceleration_structure::Device::new(&instance.instance, &device));
        let rt_pipeline_loader = capabilities
            .ray_tracing
            .then(|| ash::khr::ray_tracing_pipeline::Device::new(&instance.instance, &device));
        let mesh_shader_loader = capabilities
            .mesh_shading
            .then(|| ash::ext::mesh_shader::Device::new(&instance.instance, &device));

        let queue = unsafe { device.get_device_queue(graphics_queue_index, 0) };

        Ok(Arc::new(Self {
            device: DeviceWrapper(device),
            phy_device,
            instance,
            swapchain_loader,
            debug_utils,
            accel_loader,
            rt_pipeline_loader,
            mesh_shader_loader,
            queue: Mutex::new(Queue {
                graphics_queue: queue,
                present_queue: queue,
            }),
            graphics_queue_index,
            capabilities,
            texture_memory_usage: Arc::new(AtomicU64::new(0)),
            buffer_memory_usage: Arc::new(AtomicU64::new(0)),
            staging_memory_usage: Arc::new(AtomicU64::new(0)),
        }))
    }

    fn create_logical_device(
        instance: &Instance,
        phy_device: &PhyDevice,
    ) -> anyhow::Result<ash::Device> {
        let capabilities = phy_device.capabilities;

        let mut extensions: Vec<&CStr> = vec![vk::KHR_SWAPCHAIN_NAME];
        if capabilities.ray_tracing {
            extensions.push(vk::KHR_ACCELERATION_STRUCTURE_NAME);
            extensions.push(vk::KHR_RAY_TRACING_PIPELINE_NAME);
            extensions.push(vk::KHR_DEFERRED_HOST_OPERATIONS_NAME);
        }
        if capabilities.mesh_shading {
            extensions.push(vk::EXT_MESH_SHADER_NAME);
        }
        if capabilities.shader_barycentrics {
            extensions.push(vk::KHR_FRAGMENT_SHADER_BARYCENTRIC_NAME);
        }

        let available = PhyDevice::available_extensions(instance, phy_device.cur_device)?;
        let extension_cstrings: Vec<CString> = extensions
            .iter()
            .filter(|name| available.contains(&name.to_string_lossy().into_owned()))
            .map(|name| CString::from(*name))
            .collect();
        let extension_ptrs: Vec<*const c_char> =
            extension_cstrings.iter().map(|s| s.as_ptr()).collect();

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(phy_device.graphics_queue_index)
            .queue_priorities(&queue_priorities)];

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .fill_mode_non_solid(true)
            .multi_draw_indirect(true);

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .draw_indirect_count(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_float16(capabilities.shader_16bit_float);

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);
        let mut rt_pipeline_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
            .ray_tracing_pipeline(true);
        let mut mesh_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::default()
            .mesh_shader(true)
            .task_shader(true);
        let mut barycentric_features =
            vk::PhysicalDeviceFragmentShaderBarycentricFeaturesKHR::default()
                .fragment_shader_barycentric(true);

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features)
            .push_next(&mut features12)
            .push_next(&mut features13);

        if capabilities.ray_tracing {
            create_info = create_info
                .push_next(&mut accel_features)
                .push_next(&mut rt_pipeline_features);
        }
        if capabilities.mesh_shading {
            create_info = create_info.push_next(&mut mesh_features);
        }
        if capabilities.shader_barycentrics {
            create_info = create_info.push_next(&mut barycentric_features);
        }

        let device = unsafe {
            instance
                .instance
                .create_device(phy_device.cur_device, &create_info, None)
        }
        .map_err(|err| anyhow!("creating the logical device failed: {err}"))?;

        Ok(device)
    }

    /// Attaches a debug name to any Vulkan object when validation is on.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        let _ = unsafe { debug_utils.set_debug_utils_object_name(&info) };
    }

    pub fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|err| anyhow!("device_wait_idle failed: {err}"))
    }
}
