use std::collections::BTreeSet;
use std::ffi::CStr;
use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use log::info;
use render_types::capabilities::BackendCapabilities;

use super::error::AllocationError;
use super::instance::Instance;
use super::surface::BackendSurface;

/// The selected physical device plus everything probed from it once at
/// startup: properties, memory layout, queue family and which optional
/// capabilities the device can actually deliver.
pub struct PhyDevice {
    pub cur_device: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub graphics_queue_index: u32,
    pub capabilities: BackendCapabilities,
    pub raytracing_properties: Option<RayTracingProperties>,
    _instance: Arc<Instance>,
}

#[derive(Debug, Clone, Copy)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
}

impl std::fmt::Debug for PhyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = unsafe { CStr::from_ptr(self.props.device_name.as_ptr()) };
        f.debug_struct("PhyDevice")
            .field("device_name", &name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    // "high performance adapter" preference
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

impl PhyDevice {
    pub fn select(
        instance: Arc<Instance>,
        surface: Option<&BackendSurface>,
    ) -> anyhow::Result<Arc<Self>> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }?;
        anyhow::ensure!(!devices.is_empty(), "no Vulkan-capable GPU found");

        let mut best: Option<(u32, vk::PhysicalDevice, vk::PhysicalDeviceProperties, u32)> = None;
        for device in devices {
            let props = unsafe { instance.instance.get_physical_device_properties(device) };
            if props.api_version < vk::API_VERSION_1_3 {
                continue;
            }
            let Some(queue_index) = Self::find_graphics_queue(&instance, device, surface)? else {
                continue;
            };
            let score = device_type_score(props.device_type);
            if best.map(|(s, ..)| s < score).unwrap_or(true) {
                best = Some((score, device, props, queue_index));
            }
        }

        let (_, cur_device, props, graphics_queue_index) = best.ok_or_else(|| {
            anyhow!("no GPU with Vulkan 1.3 and a usable graphics queue was found")
        })?;

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();
        info!("selected GPU: {name}");

        let mem_props = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(cur_device)
        };

        let extensions = Self::available_extensions(&instance, cur_device)?;
        let capabilities = Self::probe_capabilities(&instance, cur_device, &extensions);
        let raytracing_properties = capabilities
            .ray_tracing
            .then(|| Self::probe_raytracing_properties(&instance, cur_device));

        info!(
            "GPU capabilities: ray tracing {}, mesh shading {}, 16-bit float {}, barycentrics {}",
            capabilities.ray_tracing,
            capabilities.mesh_shading,
            capabilities.shader_16bit_float,
            capabilities.shader_barycentrics,
        );

        Ok(Arc::new(Self {
            cur_device,
            props,
            mem_props,
            graphics_queue_index,
            capabilities,
            raytracing_properties,
            _instance: instance,
        }))
    }

    fn find_graphics_queue(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: Option<&BackendSurface>,
    ) -> anyhow::Result<Option<u32>> {
        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(device)
        };
        for (index, family) in families.iter().enumerate() {
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            if let Some(surface) = surface {
                if !surface.supports_queue_family(device, index as u32)? {
                    continue;
                }
            }
            return Ok(Some(index as u32));
        }
        Ok(None)
    }

    pub fn available_extensions(
        instance: &Instance,
        device: vk::PhysicalDevice,
    ) -> anyhow::Result<BTreeSet<String>> {
        let props = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(device)
        }?;
        Ok(props
            .iter()
            .map(|p| {
                unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect())
    }

    fn probe_capabilities(
        instance: &Instance,
        device: vk::PhysicalDevice,
        extensions: &BTreeSet<String>,
    ) -> BackendCapabilities {
        let has_ext = |name: &CStr| extensions.contains(&name.to_string_lossy().into_owned());

        let mut accel = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut rt_pipeline = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let mut mesh = vk::PhysicalDeviceMeshShaderFeaturesEXT::default();
        let mut float16 = vk::PhysicalDeviceShaderFloat16Int8Features::default();
        let mut barycentric = vk::PhysicalDeviceFragmentShaderBarycentricFeaturesKHR::default();

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut accel)
            .push_next(&mut rt_pipeline)
            .push_next(&mut mesh)
            .push_next(&mut float16)
            .push_next(&mut barycentric);
        unsafe {
            instance
                .instance
                .get_physical_device_features2(device, &mut features2)
        };

        BackendCapabilities {
            ray_tracing: accel.acceleration_structure == vk::TRUE
                && rt_pipeline.ray_tracing_pipeline == vk::TRUE
                && has_ext(vk::KHR_ACCELERATION_STRUCTURE_NAME)
                && has_ext(vk::KHR_RAY_TRACING_PIPELINE_NAME)
                && has_ext(vk::KHR_DEFERRED_HOST_OPERATIONS_NAME),
            mesh_shading: mesh.mesh_shader == vk::TRUE
                && mesh.task_shader == vk::TRUE
                && has_ext(vk::EXT_MESH_SHADER_NAME),
            shader_16bit_float: float16.shader_float16 == vk::TRUE,
            shader_barycentrics: barycentric.fragment_shader_barycentric == vk::TRUE
                && has_ext(vk::KHR_FRAGMENT_SHADER_BARYCENTRIC_NAME),
        }
    }

    fn probe_raytracing_properties(
        instance: &Instance,
        device: vk::PhysicalDevice,
    ) -> RayTracingProperties {
        let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut rt_props);
        unsafe {
            instance
                .instance
                .get_physical_device_properties2(device, &mut props2)
        };
        RayTracingProperties {
            shader_group_handle_size: rt_props.shader_group_handle_size,
            shader_group_handle_alignment: rt_props.shader_group_handle_alignment,
            shader_group_base_alignment: rt_props.shader_group_base_alignment,
        }
    }

    /// Index of a memory type matching the filter and property flags.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, AllocationError> {
        for index in 0..self.mem_props.memory_type_count {
            if (type_filter & (1 << index)) != 0
                && self.mem_props.memory_types[index as usize]
                    .property_flags
                    .contains(properties)
            {
                return Ok(index);
            }
        }
        Err(AllocationError::NoSuitableMemoryType)
    }
}
