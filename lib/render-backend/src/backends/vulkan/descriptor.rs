//! Descriptor machinery: a growable pool list plus the binding-set
//! payload that owns one descriptor set layout + set per `BindingSet`.
//! Bindless sampled-texture arrays use partially-bound, update-after-bind
//! descriptors so slots can be rewritten while the set stays bound.

use std::sync::Arc;

use anyhow::anyhow;
use ash::vk;
use parking_lot::Mutex;
use render_backend_traits::binding::{
    BindingSetBackendData, ShaderBinding, ShaderBindingResource, TextureBindingUpdate,
};
use render_backend_traits::sampler::SamplerDescription;
use render_backend_traits::texture::Texture;

use super::ctx::VulkanCtx;
use super::resources::VulkanTextureBackendData;
use super::rt::VulkanAccelerationStructureBackendData;
use super::utils;

const SETS_PER_POOL: u32 = 256;
const DESCRIPTORS_PER_TYPE: u32 = 4096;

pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    ctx: Arc<VulkanCtx>,
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorPool").finish()
    }
}

impl DescriptorPool {
    fn new(ctx: Arc<VulkanCtx>) -> anyhow::Result<Arc<Self>> {
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 64,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: 64,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
                    | vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            )
            .max_sets(SETS_PER_POOL)
            .pool_sizes(&sizes);
        let pool = unsafe { ctx.device.device.create_descriptor_pool(&create_info, None) }?;
        Ok(Arc::new(Self { pool, ctx }))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device
                .device
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Allocates descriptor sets, growing a new pool whenever the current
/// one runs dry. Exhaustion of a fresh pool is fatal by contract.
#[derive(Debug, Default)]
pub struct DescriptorAllocator {
    pools: Mutex<Vec<Arc<DescriptorPool>>>,
}

impl DescriptorAllocator {
    pub fn allocate(
        &self,
        ctx: &Arc<VulkanCtx>,
        layout: vk::DescriptorSetLayout,
    ) -> anyhow::Result<(vk::DescriptorSet, Arc<DescriptorPool>)> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.last() {
            if let Ok(set) = Self::try_allocate(ctx, pool, layout) {
                return Ok((set, pool.clone()));
            }
        }

        let pool = DescriptorPool::new(ctx.clone())?;
        pools.push(pool.clone());
        let set = Self::try_allocate(ctx, &pool, layout)
            .map_err(|err| anyhow!("descriptor allocation failed on a fresh pool: {err}"))?;
        Ok((set, pool))
    }

    fn try_allocate(
        ctx: &Arc<VulkanCtx>,
        pool: &Arc<DescriptorPool>,
        layout: vk::DescriptorSetLayout,
    ) -> anyhow::Result<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.pool)
            .set_layouts(&layouts);
        let sets = unsafe { ctx.device.device.allocate_descriptor_sets(&allocate_info) }?;
        Ok(sets[0])
    }
}

pub fn vk_descriptor_type(resource: &ShaderBindingResource) -> vk::DescriptorType {
    match resource {
        ShaderBindingResource::ConstantBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
        ShaderBindingResource::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
        ShaderBindingResource::StorageTexture(_) => vk::DescriptorType::STORAGE_IMAGE,
        ShaderBindingResource::SampledTexture(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ShaderBindingResource::RtAccelerationStructure(_) => {
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        }
    }
}

pub struct VulkanBindingSetBackendData {
    ctx: Arc<VulkanCtx>,
    pub layout: vk::DescriptorSetLayout,
    pub set: vk::DescriptorSet,
    pool: Arc<DescriptorPool>,
}

impl std::fmt::Debug for VulkanBindingSetBackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBindingSetBackendData").finish()
    }
}

fn texture_data(texture: &Texture) -> &VulkanTextureBackendData {
    texture
        .backend_data()
        .downcast_ref::<VulkanTextureBackendData>()
        .expect("texture was not created by the vulkan backend")
}

fn buffer_data(
    buffer: &render_backend_traits::buffer::Buffer,
) -> &super::resources::VulkanBufferBackendData {
    buffer
        .backend_data()
        .downcast_ref::<super::resources::VulkanBufferBackendData>()
        .expect("buffer was not created by the vulkan backend")
}

impl VulkanBindingSetBackendData {
    pub fn new(
        ctx: Arc<VulkanCtx>,
        allocator: &DescriptorAllocator,
        bindings: &[ShaderBinding],
    ) -> anyhow::Result<Self> {
        let layout = Self::create_layout(&ctx, bindings)?;
        let (set, pool) = allocator.allocate(&ctx, layout)?;

        let data = Self {
            ctx,
            layout,
            set,
            pool,
        };
        data.write_initial_descriptors(bindings)?;
        Ok(data)
    }

    fn create_layout(
        ctx: &Arc<VulkanCtx>,
        bindings: &[ShaderBinding],
    ) -> anyhow::Result<vk::DescriptorSetLayout> {
        let mut layout_bindings = Vec::with_capacity(bindings.len());
        let mut binding_flags = Vec::with_capacity(bindings.len());
        let mut any_update_after_bind = false;

        for binding in bindings {
            let index = binding
                .binding_index()
                .expect("binding indices must be resolved before backend creation");
            layout_bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(index)
                    .descriptor_type(vk_descriptor_type(binding.resource()))
                    .descriptor_count(binding.array_count())
                    .stage_flags(utils::vk_shader_stages(binding.shader_stage())),
            );

            // arrays are bindless-style: partially bound, rewritable
            let is_array = binding.array_count() > 1;
            binding_flags.push(if is_array {
                any_update_after_bind = true;
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            } else {
                vk::DescriptorBindingFlags::empty()
            });
        }

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let mut create_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        if any_update_after_bind {
            create_info = create_info
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut flags_info);
        }

        Ok(unsafe {
            ctx.device
                .device
                .create_descriptor_set_layout(&create_info, None)
        }?)
    }

    fn sampler_for_texture(&self, texture: &Texture) -> anyhow::Result<vk::Sampler> {
        let desc = texture.description();
        self.ctx.get_or_create_sampler(SamplerDescription {
            wrap_modes: desc.wrap_modes,
            filters: desc.filters,
            mipmap_mode: desc.mipmap_mode,
        })
    }

    fn write_initial_descriptors(&self, bindings: &[ShaderBinding]) -> anyhow::Result<()> {
        // the info vectors must outlive the write list
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut image_infos: Vec<Vec<vk::DescriptorImageInfo>> = Vec::new();
        let mut accel_handles: Vec<Vec<vk::AccelerationStructureKHR>> = Vec::new();

        struct PendingWrite {
            binding: u32,
            ty: vk::DescriptorType,
            buffer_index: Option<usize>,
            image_index: Option<usize>,
            accel_index: Option<usize>,
        }
        let mut pending: Vec<PendingWrite> = Vec::new();

        for binding in bindings {
            let index = binding.binding_index().expect("resolved index");
            match binding.resource() {
                ShaderBindingResource::ConstantBuffer(buffer)
                | ShaderBindingResource::StorageBuffer(buffer) => {
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(buffer_data(buffer).vk_buffer())
                            .offset(0)
                            .range(buffer.size_in_memory() as u64),
                    );
                    pending.push(PendingWrite {
                        binding: index,
                        ty: vk_descriptor_type(binding.resource()),
                        buffer_index: Some(buffer_infos.len() - 1),
                        image_index: None,
                        accel_index: None,
                    });
                }
                ShaderBindingResource::StorageTexture(view) => {
                    let data = texture_data(view.texture());
                    image_infos.push(vec![vk::DescriptorImageInfo::default()
                        .image_view(data.mip_views[view.mip_level() as usize])
                        .image_layout(vk::ImageLayout::GENERAL)]);
                    pending.push(PendingWrite {
                        binding: index,
                        ty: vk::DescriptorType::STORAGE_IMAGE,
                        buffer_index: None,
                        image_index: Some(image_infos.len() - 1),
                        accel_index: None,
                    });
                }
                ShaderBindingResource::SampledTexture(textures) => {
                    if textures.is_empty() {
                        continue;
                    }
                    let mut infos = Vec::with_capacity(textures.len());
                    for texture in textures {
                        let data = texture_data(texture);
                        infos.push(
                            vk::DescriptorImageInfo::default()
                                .sampler(self.sampler_for_texture(texture)?)
                                .image_view(data.full_view)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                        );
                    }
                    image_infos.push(infos);
                    pending.push(PendingWrite {
                        binding: index,
                        ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        buffer_index: None,
                        image_index: Some(image_infos.len() - 1),
                        accel_index: None,
                    });
                }
                ShaderBindingResource::RtAccelerationStructure(tlas) => {
                    let data = tlas
                        .backend_data()
                        .downcast_ref::<VulkanAccelerationStructureBackendData>()
                        .expect("TLAS was not created by the vulkan backend");
                    accel_handles.push(vec![data.accel]);
                    pending.push(PendingWrite {
                        binding: index,
                        ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                        buffer_index: None,
                        image_index: None,
                        accel_index: Some(accel_handles.len() - 1),
                    });
                }
            }
        }

        let mut accel_writes: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> =
            Vec::with_capacity(accel_handles.len());
        for handles in &accel_handles {
            accel_writes.push(
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(handles),
            );
        }

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::with_capacity(pending.len());
        let mut accel_write_iter = accel_writes.iter_mut();
        for write in &pending {
            let mut descriptor_write = vk::WriteDescriptorSet::default()
                .dst_set(self.set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(write.ty);
            if let Some(buffer_index) = write.buffer_index {
                descriptor_write =
                    descriptor_write.buffer_info(std::slice::from_ref(&buffer_infos[buffer_index]));
            }
            if let Some(image_index) = write.image_index {
                descriptor_write = descriptor_write.image_info(&image_infos[image_index]);
            }
            if write.accel_index.is_some() {
                let accel_write = accel_write_iter
                    .next()
                    .expect("one acceleration write per acceleration binding");
                descriptor_write = descriptor_write.push_next(accel_write);
                descriptor_write.descriptor_count = 1;
            }
            writes.push(descriptor_write);
        }

        unsafe {
            self.ctx.device.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }
}

impl BindingSetBackendData for VulkanBindingSetBackendData {
    fn set_debug_name(&self, name: &str) {
        self.ctx.device.set_object_name(self.set, name);
    }

    fn update_textures(
        &self,
        binding_index: u32,
        updates: &[TextureBindingUpdate],
    ) -> anyhow::Result<()> {
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::with_capacity(updates.len());
        for update in updates {
            let data = texture_data(&update.texture);
            image_infos.push(
                vk::DescriptorImageInfo::default()
                    .sampler(self.sampler_for_texture(&update.texture)?)
                    .image_view(data.full_view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            );
        }

        let writes: Vec<vk::WriteDescriptorSet> = updates
            .iter()
            .zip(image_infos.iter())
            .map(|(update, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(binding_index)
                    .dst_array_element(update.array_index)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
            })
            .collect();

        unsafe {
            self.ctx.device.device.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }
}

impl Drop for VulkanBindingSetBackendData {
    fn drop(&mut self) {
        unsafe {
            let _ = self
                .ctx
                .device
                .device
                .free_descriptor_sets(self.pool.pool, &[self.set]);
            self.ctx
                .device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
