//! Ray tracing: acceleration-structure build plumbing and the ray
//! tracing pipeline with its shader binding table. Only reachable when
//! the RayTracing capability was granted at device creation.

use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use render_backend_traits::buffer::{Buffer, BufferBackendData};
use render_backend_traits::rt::{
    AccelerationStructureBackendData, BottomLevelAs, RtGeometry, RtGeometryInstance, TopLevelAs,
};
use render_types::buffer::IndexType;

use super::ctx::VulkanCtx;
use super::memory::{MemoryAllocation, MemoryKind};
use super::resources::VulkanBufferBackendData;

fn accel_loader(ctx: &VulkanCtx) -> anyhow::Result<&ash::khr::acceleration_structure::Device> {
    ctx.device
        .accel_loader
        .as_ref()
        .ok_or_else(|| anyhow!("ray tracing was not enabled on this device"))
}

fn buffer_device_address(buffer: &Buffer) -> u64 {
    buffer
        .backend_data()
        .downcast_ref::<VulkanBufferBackendData>()
        .expect("buffer was not created by the vulkan backend")
        .device_address()
}

/// A raw device-local buffer outside the `BufferUsage` taxonomy, for AS
/// storage and scratch.
struct RawBuffer {
    buffer: vk::Buffer,
    _allocation: MemoryAllocation,
    device_address: u64,
    ctx: Arc<VulkanCtx>,
}

impl std::fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer").finish()
    }
}

impl RawBuffer {
    fn new(ctx: Arc<VulkanCtx>, size: u64, usage: vk::BufferUsageFlags) -> anyhow::Result<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.device.create_buffer(&create_info, None) }?;
        let requirements = unsafe { ctx.device.device.get_buffer_memory_requirements(buffer) };
        let allocation = ctx
            .allocator
            .lock()
            .allocate(requirements, MemoryKind::Buffer, true)?;
        unsafe {
            ctx.device
                .device
                .bind_buffer_memory(buffer, allocation.block.mem, allocation.offset)
        }?;
        let device_address = unsafe {
            ctx.device
                .device
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        };
        Ok(Self {
            buffer,
            _allocation: allocation,
            device_address,
            ctx,
        })
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

pub struct VulkanAccelerationStructureBackendData {
    ctx: Arc<VulkanCtx>,
    pub accel: vk::AccelerationStructureKHR,
    pub device_address: u64,
    ty: vk::AccelerationStructureTypeKHR,
    _backing: RawBuffer,
    scratch: RawBuffer,
    /// TLAS only: host-visible array of `VkAccelerationStructureInstanceKHR`.
    instance_buffer: Option<VulkanBufferBackendData>,
}

impl std::fmt::Debug for VulkanAccelerationStructureBackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanAccelerationStructureBackendData")
            .field("ty", &self.ty)
            .finish()
    }
}

impl AccelerationStructureBackendData for VulkanAccelerationStructureBackendData {
    fn set_debug_name(&self, name: &str) {
        self.ctx.device.set_object_name(self.accel, name);
    }
}

impl Drop for VulkanAccelerationStructureBackendData {
    fn drop(&mut self) {
        if let Some(loader) = self.ctx.device.accel_loader.as_ref() {
            unsafe {
                loader.destroy_acceleration_structure(self.accel, None);
            }
        }
    }
}

struct TriangleGeometryDesc {
    vertex_address: u64,
    vertex_stride: u64,
    max_vertex: u32,
    index_address: u64,
    index_type: vk::IndexType,
    primitive_count: u32,
}

enum GeometryDesc {
    Triangles(TriangleGeometryDesc),
    Aabbs { address: u64, stride: u64, count: u32 },
}

fn describe_geometry(geometry: &RtGeometry) -> GeometryDesc {
    match geometry {
        RtGeometry::Triangles(triangles) => {
            let index_count =
                triangles.index_buffer.size() / triangles.index_type.size_in_bytes();
            GeometryDesc::Triangles(TriangleGeometryDesc {
                vertex_address: buffer_device_address(&triangles.vertex_buffer),
                vertex_stride: triangles.vertex_stride as u64,
                max_vertex: (triangles.vertex_buffer.size() / triangles.vertex_stride.max(1))
                    .saturating_sub(1) as u32,
                index_address: buffer_device_address(&triangles.index_buffer),
                index_type: match triangles.index_type {
                    IndexType::UInt16 => vk::IndexType::UINT16,
                    IndexType::UInt32 => vk::IndexType::UINT32,
                },
                primitive_count: (index_count / 3) as u32,
            })
        }
        RtGeometry::Aabbs(aabbs) => GeometryDesc::Aabbs {
            address: buffer_device_address(&aabbs.aabb_buffer),
            stride: aabbs.aabb_stride as u64,
            count: (aabbs.aabb_buffer.size() / aabbs.aabb_stride.max(1)) as u32,
        },
    }
}

fn vk_geometries(
    descs: &[GeometryDesc],
) -> (
    Vec<vk::AccelerationStructureGeometryKHR<'static>>,
    Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
    Vec<u32>,
) {
    let mut geometries = Vec::with_capacity(descs.len());
    let mut ranges = Vec::with_capacity(descs.len());
    let mut counts = Vec::with_capacity(descs.len());

    for desc in descs {
        match desc {
            GeometryDesc::Triangles(triangles) => {
                let data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: triangles.vertex_address,
                    })
                    .vertex_stride(triangles.vertex_stride)
                    .max_vertex(triangles.max_vertex)
                    .index_type(triangles.index_type)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: triangles.index_address,
                    });
                geometries.push(
                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
                        .flags(vk::GeometryFlagsKHR::OPAQUE),
                );
                ranges.push(
                    vk::AccelerationStructureBuildRangeInfoKHR::default()
                        .primitive_count(triangles.primitive_count),
                );
                counts.push(triangles.primitive_count);
            }
            GeometryDesc::Aabbs {
                address,
                stride,
                count,
            } => {
                let data = vk::AccelerationStructureGeometryAabbsDataKHR::default()
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: *address,
                    })
                    .stride(*stride);
                geometries.push(
                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::AABBS)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { aabbs: data })
                        .flags(vk::GeometryFlagsKHR::OPAQUE),
                );
                ranges.push(
                    vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(*count),
                );
                counts.push(*count);
            }
        }
    }

    (geometries, ranges, counts)
}

fn create_structure(
    ctx: &Arc<VulkanCtx>,
    ty: vk::AccelerationStructureTypeKHR,
    geometries: &[vk::AccelerationStructureGeometryKHR<'_>],
    primitive_counts: &[u32],
) -> anyhow::Result<(vk::AccelerationStructureKHR, u64, RawBuffer, RawBuffer)> {
    let loader = accel_loader(ctx)?;

    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(geometries);

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    unsafe {
        loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &build_info,
            primitive_counts,
            &mut sizes,
        );
    }

    let backing = RawBuffer::new(
        ctx.clone(),
        sizes.acceleration_structure_size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
    )?;
    let scratch = RawBuffer::new(
        ctx.clone(),
        sizes.build_scratch_size.max(sizes.update_scratch_size),
        vk::BufferUsageFlags::STORAGE_BUFFER,
    )?;

    let create_info = vk::AccelerationStructureCreateInfoKHR::default()
        .buffer(backing.buffer)
        .offset(0)
        .size(sizes.acceleration_structure_size)
        .ty(ty);
    let accel = unsafe { loader.create_acceleration_structure(&create_info, None) }?;

    let device_address = unsafe {
        loader.get_acceleration_structure_device_address(
            &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(accel),
        )
    };

    Ok((accel, device_address, backing, scratch))
}

fn record_build(
    ctx: &VulkanCtx,
    cmd: vk::CommandBuffer,
    ty: vk::AccelerationStructureTypeKHR,
    dst: vk::AccelerationStructureKHR,
    scratch_address: u64,
    geometries: &[vk::AccelerationStructureGeometryKHR<'_>],
    ranges: &[vk::AccelerationStructureBuildRangeInfoKHR],
) -> anyhow::Result<()> {
    let loader = accel_loader(ctx)?;

    let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(geometries);
    build_info.dst_acceleration_structure = dst;
    build_info.scratch_data = vk::DeviceOrHostAddressKHR {
        device_address: scratch_address,
    };

    unsafe {
        loader.cmd_build_acceleration_structures(cmd, &[build_info], &[ranges]);
    }

    // builds reading the result (or chained TLAS builds) must wait
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
        .dst_access_mask(
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::SHADER_READ,
        );
    unsafe {
        ctx.device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
                | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    }
    Ok(())
}

pub fn create_blas_backend_data(
    ctx: Arc<VulkanCtx>,
    geometries: &[RtGeometry],
) -> anyhow::Result<VulkanAccelerationStructureBackendData> {
    let descs: Vec<GeometryDesc> = geometries.iter().map(describe_geometry).collect();
    let (vk_geoms, ranges, counts) = vk_geometries(&descs);

    let ty = vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL;
    let (accel, device_address, backing, scratch) = create_structure(&ctx, ty, &vk_geoms, &counts)?;

    let scratch_address = scratch.device_address;
    ctx.one_shot.submit_and_wait(|cmd| {
        record_build(&ctx, cmd, ty, accel, scratch_address, &vk_geoms, &ranges)
    })?;

    Ok(VulkanAccelerationStructureBackendData {
        ctx,
        accel,
        device_address,
        ty,
        _backing: backing,
        scratch,
        instance_buffer: None,
    })
}

const INSTANCE_SIZE: usize = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>();

fn write_instances(
    instance_buffer: &VulkanBufferBackendData,
    instances: &[RtGeometryInstance],
) -> anyhow::Result<()> {
    let mut data: Vec<u8> = Vec::with_capacity(instances.len() * INSTANCE_SIZE);
    for instance in instances {
        let blas_address = instance
            .blas
            .backend_data()
            .downcast_ref::<VulkanAccelerationStructureBackendData>()
            .expect("BLAS was not created by the vulkan backend")
            .device_address;

        let mut matrix = [0.0f32; 12];
        for row in 0..3 {
            matrix[row * 4..row * 4 + 4].copy_from_slice(&instance.transform[row]);
        }

        let vk_instance = vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR { matrix },
            instance_custom_index_and_mask: vk::Packed24_8::new(
                instance.custom_instance_id,
                instance.mask,
            ),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                instance.hit_group_index,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas_address,
            },
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                (&vk_instance as *const vk::AccelerationStructureInstanceKHR) as *const u8,
                INSTANCE_SIZE,
            )
        };
        data.extend_from_slice(bytes);
    }
    if !data.is_empty() {
        instance_buffer.update_data(&data, 0)?;
    }
    Ok(())
}

pub fn create_tlas_backend_data(
    ctx: Arc<VulkanCtx>,
    max_instance_count: u32,
    initial_instances: &[RtGeometryInstance],
) -> anyhow::Result<VulkanAccelerationStructureBackendData> {
    let instance_buffer = VulkanBufferBackendData::new(
        ctx.clone(),
        max_instance_count as usize * INSTANCE_SIZE,
        render_types::buffer::BufferUsage::RtInstance,
    )?;
    write_instances(&instance_buffer, initial_instances)?;

    let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.device_address(),
        });
    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: instances_data,
        });
    let geometries = [geometry];

    // sized for the worst case so instance updates never need a resize
    let ty = vk::AccelerationStructureTypeKHR::TOP_LEVEL;
    let (accel, device_address, backing, scratch) =
        create_structure(&ctx, ty, &geometries, &[max_instance_count])?;

    let ranges = [vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(initial_instances.len() as u32)];
    let scratch_address = scratch.device_address;
    ctx.one_shot.submit_and_wait(|cmd| {
        record_build(&ctx, cmd, ty, accel, scratch_address, &geometries, &ranges)
    })?;

    Ok(VulkanAccelerationStructureBackendData {
        ctx,
        accel,
        device_address,
        ty,
        _backing: backing,
        scratch,
        instance_buffer: Some(instance_buffer),
    })
}

/// In-frame BLAS rebuild, recorded by the command list.
pub fn record_blas_build(
    ctx: &VulkanCtx,
    cmd: vk::CommandBuffer,
    blas: &BottomLevelAs,
) -> anyhow::Result<()> {
    let data = blas
        .backend_data()
        .downcast_ref::<VulkanAccelerationStructureBackendData>()
        .expect("BLAS was not created by the vulkan backend");

    let descs: Vec<GeometryDesc> = blas.geometries().iter().map(describe_geometry).collect();
    let (vk_geoms, ranges, _) = vk_geometries(&descs);
    record_build(
        ctx,
        cmd,
        data.ty,
        data.accel,
        data.scratch.device_address,
        &vk_geoms,
        &ranges,
    )
}

/// In-frame TLAS rebuild with the current instance list.
pub fn record_tlas_build(
    ctx: &VulkanCtx,
    cmd: vk::CommandBuffer,
    tlas: &TopLevelAs,
) -> anyhow::Result<()> {
    let data = tlas
        .backend_data()
        .downcast_ref::<VulkanAccelerationStructureBackendData>()
        .expect("TLAS was not created by the vulkan backend");
    let instance_buffer = data
        .instance_buffer
        .as_ref()
        .expect("TLAS backend data is missing its instance buffer");

    let instance_count =
        tlas.with_instances(|instances| write_instances(instance_buffer, instances).map(|_| instances.len()))?;

    let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.device_address(),
        });
    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: instances_data,
        });
    let geometries = [geometry];
    let ranges = [vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(instance_count as u32)];

    record_build(
        ctx,
        cmd,
        data.ty,
        data.accel,
        data.scratch.device_address,
        &geometries,
        &ranges,
    )
}
