//! Concrete Vulkan payloads behind the backend-agnostic resource structs.
//! Immediate operations (initial uploads, clears, readbacks, out-of-frame
//! mip generation) go through the context's one-shot submitter and block;
//! per-frame work is recorded by the command list instead.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use ash::vk;
use parking_lot::{Mutex, RwLock};
use render_backend_traits::buffer::BufferBackendData;
use render_backend_traits::render_target::RenderTargetBackendData;
use render_backend_traits::sampler::SamplerBackendData;
use render_backend_traits::texture::TextureBackendData;
use render_types::buffer::{BufferMapMode, BufferUsage, ReallocateStrategy};
use render_types::rendering::ClearColor;
use render_types::texture::TextureDescription;

use super::ctx::VulkanCtx;
use super::memory::{MemoryAllocation, MemoryKind};
use super::utils;

/// Access mask & stage producing/consuming a given layout; the blunt,
/// always-correct mapping used by one-shot transitions.
pub fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

/// Records a layout transition for a mip/layer range of `image`.
#[allow(clippy::too_many_arguments)]
pub fn image_barrier(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, src_stage) = layout_access(old_layout);
    let (dst_access, dst_stage) = layout_access(new_layout);

    let mut barrier = vk::ImageMemoryBarrier::default();
    barrier.old_layout = old_layout;
    barrier.new_layout = new_layout;
    barrier.src_access_mask = src_access;
    barrier.dst_access_mask = dst_access;
    barrier.src_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
    barrier.dst_queue_family_index = vk::QUEUE_FAMILY_IGNORED;
    barrier.image = image;
    barrier.subresource_range.aspect_mask = aspect_mask;
    barrier.subresource_range.base_mip_level = base_mip;
    barrier.subresource_range.level_count = mip_count;
    barrier.subresource_range.base_array_layer = base_layer;
    barrier.subresource_range.layer_count = layer_count;

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

struct BufferInner {
    buffer: vk::Buffer,
    allocation: MemoryAllocation,
    size_in_memory: usize,
}

pub struct VulkanBufferBackendData {
    ctx: Arc<VulkanCtx>,
    usage: BufferUsage,
    inner: RwLock<BufferInner>,
    /// Previous incarnations after a reallocation; commands recorded
    /// against the old handle may still be in flight, so the old buffer
    /// only dies with this payload.
    retired: Mutex<Vec<BufferInner>>,
}

impl std::fmt::Debug for VulkanBufferBackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBufferBackendData")
            .field("usage", &self.usage)
            .field("size", &self.inner.read().size_in_memory)
            .finish()
    }
}

fn create_raw_buffer(
    ctx: &Arc<VulkanCtx>,
    size_in_memory: usize,
    usage: BufferUsage,
) -> anyhow::Result<BufferInner> {
    let ray_tracing = ctx.device.capabilities.ray_tracing;
    let create_info = vk::BufferCreateInfo::default()
        .size(size_in_memory as u64)
        .usage(utils::vk_buffer_usage(usage, ray_tracing))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { ctx.device.device.create_buffer(&create_info, None) }
        .map_err(|err| anyhow!("buffer creation failed: {err}"))?;

    let requirements = unsafe { ctx.device.device.get_buffer_memory_requirements(buffer) };
    let kind = if usage.requires_host_visible() {
        MemoryKind::Staging
    } else {
        MemoryKind::Buffer
    };
    let allocation = ctx
        .allocator
        .lock()
        .allocate(requirements, kind, true)
        .with_context(|| format!("allocating {size_in_memory} bytes for a {usage:?} buffer"))?;

    unsafe {
        ctx.device
            .device
            .bind_buffer_memory(buffer, allocation.block.mem, allocation.offset)
    }?;

    Ok(BufferInner {
        buffer,
        allocation,
        size_in_memory,
    })
}

impl VulkanBufferBackendData {
    pub fn new(ctx: Arc<VulkanCtx>, size: usize, usage: BufferUsage) -> anyhow::Result<Self> {
        let inner = create_raw_buffer(&ctx, usage.size_in_memory(size).max(1), usage)?;
        Ok(Self {
            ctx,
            usage,
            inner: RwLock::new(inner),
            retired: Mutex::new(Vec::new()),
        })
    }

    pub fn vk_buffer(&self) -> vk::Buffer {
        self.inner.read().buffer
    }

    pub fn device_address(&self) -> u64 {
        let inner = self.inner.read();
        let info = vk::BufferDeviceAddressInfo::default().buffer(inner.buffer);
        unsafe { self.ctx.device.device.get_buffer_device_address(&info) }
    }

    fn write_host_visible(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()> {
        let inner = self.inner.read();
        let ptr = inner
            .allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow!("buffer memory is not host visible"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    fn staged_write(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()> {
        let staging = VulkanBufferBackendData::new(self.ctx.clone(), bytes.len(), BufferUsage::Upload)?;
        staging.write_host_visible(bytes, 0)?;

        let dst = self.inner.read().buffer;
        let src = staging.vk_buffer();
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset as u64,
            size: bytes.len() as u64,
        };
        let device = self.ctx.device.clone();
        self.ctx.one_shot.submit_and_wait(move |cmd| {
            unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
            Ok(())
        })
    }

    fn staged_read(&self, offset: usize, dest: &mut [u8]) -> anyhow::Result<()> {
        let staging =
            VulkanBufferBackendData::new(self.ctx.clone(), dest.len(), BufferUsage::Readback)?;

        let src = self.inner.read().buffer;
        let dst = staging.vk_buffer();
        let region = vk::BufferCopy {
            src_offset: offset as u64,
            dst_offset: 0,
            size: dest.len() as u64,
        };
        let device = self.ctx.device.clone();
        self.ctx.one_shot.submit_and_wait(move |cmd| {
            unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
            Ok(())
        })?;

        let inner = staging.inner.read();
        let ptr = inner
            .allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow!("readback staging memory is not mapped"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, dest.as_mut_ptr(), dest.len());
        }
        Ok(())
    }
}

impl BufferBackendData for VulkanBufferBackendData {
    fn set_debug_name(&self, name: &str) {
        self.ctx
            .device
            .set_object_name(self.inner.read().buffer, name);
    }

    fn update_data(&self, bytes: &[u8], offset: usize) -> anyhow::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.usage.requires_host_visible() {
            self.write_host_visible(bytes, offset)
        } else {
            // device local always goes through a staging copy
            self.staged_write(bytes, offset)
        }
    }

    fn map_data(
        &self,
        _mode: BufferMapMode,
        offset: usize,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> anyhow::Result<()> {
        // readback mappings must not race the GPU
        self.ctx.one_shot.wait_all()?;
        let inner = self.inner.read();
        let ptr = inner
            .allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow!("mapData on a non-host-visible buffer"))?;
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.add(offset), size) };
        f(slice);
        Ok(())
    }

    fn read_data(&self, offset: usize, dest: &mut [u8]) -> anyhow::Result<()> {
        if dest.is_empty() {
            return Ok(());
        }
        if self.usage.requires_host_visible() {
            self.ctx.one_shot.wait_all()?;
            let inner = self.inner.read();
            let ptr = inner
                .allocation
                .mapped_ptr()
                .ok_or_else(|| anyhow!("buffer memory is not host visible"))?;
            unsafe {
                std::ptr::copy_nonoverlapping(ptr.add(offset), dest.as_mut_ptr(), dest.len());
            }
            Ok(())
        } else {
            self.staged_read(offset, dest)
        }
    }

    fn reallocate_with_size(
        &self,
        new_size: usize,
        strategy: ReallocateStrategy,
    ) -> anyhow::Result<()> {
        let new_inner = create_raw_buffer(
            &self.ctx,
            self.usage.size_in_memory(new_size).max(1),
            self.usage,
        )?;

        if matches!(strategy, ReallocateStrategy::CopyOldData) {
            let old = self.inner.read();
            let copy_size = old.size_in_memory.min(new_inner.size_in_memory) as u64;
            let src = old.buffer;
            let dst = new_inner.buffer;
            drop(old);
            let device = self.ctx.device.clone();
            self.ctx.one_shot.submit_and_wait(move |cmd| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: copy_size,
                };
                unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
                Ok(())
            })?;
        }

        let old_inner = {
            let mut inner = self.inner.write();
            std::mem::replace(&mut *inner, new_inner)
        };
        self.retired.lock().push(old_inner);
        Ok(())
    }
}

impl Drop for VulkanBufferBackendData {
    fn drop(&mut self) {
        let inner = self.inner.read();
        unsafe {
            for retired in self.retired.lock().drain(..) {
                self.ctx.device.device.destroy_buffer(retired.buffer, None);
            }
            self.ctx.device.device.destroy_buffer(inner.buffer, None);
        }
    }
}

pub struct VulkanTextureBackendData {
    ctx: Arc<VulkanCtx>,
    desc: TextureDescription,
    pub vk_format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub image: vk::Image,
    _allocation: MemoryAllocation,
    pub full_view: vk::ImageView,
    pub mip_views: Vec<vk::ImageView>,
    /// Whole-image layout, advanced by both one-shot operations and the
    /// command list's lazy transitions.
    pub layout: Mutex<vk::ImageLayout>,
}

impl std::fmt::Debug for VulkanTextureBackendData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTextureBackendData")
            .field("desc", &self.desc)
            .finish()
    }
}

impl VulkanTextureBackendData {
    pub fn new(ctx: Arc<VulkanCtx>, desc: TextureDescription) -> anyhow::Result<Self> {
        let vk_format = utils::vk_format(desc.format);
        let aspect = utils::vk_aspect_mask(desc.format);

        let mut usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        if desc.is_storage_capable() {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if desc.format.is_depth_format() {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else if !desc.format.is_compressed() {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }

        let mut flags = vk::ImageCreateFlags::empty();
        if matches!(desc.ty, render_types::texture::TextureType::Cubemap) {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(utils::vk_image_type(desc.ty))
            .format(vk_format)
            .extent(utils::vk_extent_3d(desc.extent))
            .mip_levels(desc.mip_levels())
            .array_layers(desc.layer_count())
            .samples(utils::vk_sample_count(desc.multisampling))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { ctx.device.device.create_image(&create_info, None) }
            .map_err(|err| anyhow!("image creation failed: {err}"))?;

        let requirements = unsafe { ctx.device.device.get_image_memory_requirements(image) };
        let allocation = ctx
            .allocator
            .lock()
            .allocate(requirements, MemoryKind::Texture, false)
            .context("allocating texture memory")?;
        unsafe {
            ctx.device
                .device
                .bind_image_memory(image, allocation.block.mem, allocation.offset)
        }?;

        let full_view = Self::create_view(&ctx, image, &desc, vk_format, aspect, 0, desc.mip_levels())?;
        let mut mip_views = Vec::with_capacity(desc.mip_levels() as usize);
        for mip in 0..desc.mip_levels() {
            mip_views.push(Self::create_view(&ctx, image, &desc, vk_format, aspect, mip, 1)?);
        }

        Ok(Self {
            ctx,
            desc,
            vk_format,
            aspect,
            image,
            _allocation: allocation,
            full_view,
            mip_views,
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        })
    }

    fn create_view(
        ctx: &Arc<VulkanCtx>,
        image: vk::Image,
        desc: &TextureDescription,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
    ) -> anyhow::Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(utils::vk_image_view_type(desc.ty, desc.array_count))
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(base_mip)
                    .level_count(mip_count)
                    .base_array_layer(0)
                    .layer_count(desc.layer_count()),
            );
        Ok(unsafe { ctx.device.device.create_image_view(&create_info, None) }?)
    }

    /// One-shot whole-image transition from the tracked layout.
    fn transition_all(&self, cmd: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        let mut layout = self.layout.lock();
        if *layout == new_layout {
            return;
        }
        image_barrier(
            &self.ctx.device.device,
            cmd,
            self.image,
            self.aspect,
            0,
            self.desc.mip_levels(),
            0,
            self.desc.layer_count(),
            *layout,
            new_layout,
        );
        *layout = new_layout;
    }
}

impl TextureBackendData for VulkanTextureBackendData {
    fn set_debug_name(&self, name: &str) {
        self.ctx.device.set_object_name(self.image, name);
        self.ctx.device.set_object_name(self.full_view, name);
    }

    fn clear_color(&self, color: ClearColor) -> anyhow::Result<()> {
        let device = self.ctx.device.clone();
        let image = self.image;
        let aspect = self.aspect;
        let is_depth = self.desc.format.is_depth_format();
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect)
            .base_mip_level(0)
            .level_count(self.desc.mip_levels())
            .base_array_layer(0)
            .layer_count(self.desc.layer_count());

        self.ctx.one_shot.submit_and_wait(|cmd| {
            self.transition_all(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            unsafe {
                if is_depth {
                    let value = vk::ClearDepthStencilValue {
                        depth: color.r,
                        stencil: 0,
                    };
                    device.device.cmd_clear_depth_stencil_image(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        &[range],
                    );
                } else {
                    let value = vk::ClearColorValue {
                        float32: color.as_array(),
                    };
                    device.device.cmd_clear_color_image(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        &[range],
                    );
                }
            }
            self.transition_all(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            Ok(())
        })
    }

    fn set_data(&self, bytes: &[u8], mip_level: u32, array_layer: u32) -> anyhow::Result<()> {
        let staging =
            VulkanBufferBackendData::new(self.ctx.clone(), bytes.len(), BufferUsage::Upload)?;
        staging.write_host_visible(bytes, 0)?;

        let extent = self.desc.extent_at_mip(mip_level);
        let device = self.ctx.device.clone();
        let image = self.image;
        let src = staging.vk_buffer();
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .mip_level(mip_level)
                    .base_array_layer(array_layer)
                    .layer_count(1),
            )
            .image_extent(utils::vk_extent_3d(extent));

        self.ctx.one_shot.submit_and_wait(|cmd| {
            self.transition_all(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            unsafe {
                device.device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            self.transition_all(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            Ok(())
        })
    }

    fn generate_mipmaps(&self) -> anyhow::Result<()> {
        let device = self.ctx.device.clone();
        self.ctx.one_shot.submit_and_wait(|cmd| {
            record_mipmap_blits(
                &device.device,
                cmd,
                self.image,
                self.aspect,
                &self.desc,
                &mut self.layout.lock(),
            );
            Ok(())
        })
    }

    fn read_data(&self, mip_level: u32, dest: &mut Vec<u8>) -> anyhow::Result<()> {
        let extent = self.desc.extent_at_mip(mip_level);
        let size = self
            .desc
            .format
            .data_size_for(extent.width, extent.height, extent.depth)
            .ok_or_else(|| anyhow!("readback of {:?} textures is unsupported", self.desc.format))?;

        let staging =
            VulkanBufferBackendData::new(self.ctx.clone(), size, BufferUsage::Readback)?;
        let device = self.ctx.device.clone();
        let image = self.image;
        let dst = staging.vk_buffer();
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(self.aspect)
                    .mip_level(mip_level)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(utils::vk_extent_3d(extent));

        self.ctx.one_shot.submit_and_wait(|cmd| {
            self.transition_all(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            unsafe {
                device.device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst,
                    &[region],
                );
            }
            self.transition_all(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            Ok(())
        })?;

        dest.resize(size, 0);
        staging.read_data(0, dest)
    }
}

impl Drop for VulkanTextureBackendData {
    fn drop(&mut self) {
        unsafe {
            for view in &self.mip_views {
                self.ctx.device.device.destroy_image_view(*view, None);
            }
            self.ctx.device.device.destroy_image_view(self.full_view, None);
            self.ctx.device.device.destroy_image(self.image, None);
        }
    }
}

/// The standard blit chain: each mip is blitted from the previous one
/// with per-mip transitions; the whole image ends up shader-readable.
pub fn record_mipmap_blits(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    desc: &TextureDescription,
    tracked_layout: &mut vk::ImageLayout,
) {
    let mip_levels = desc.mip_levels();
    let layer_count = desc.layer_count();

    // everything becomes a blit destination first
    image_barrier(
        device,
        cmd,
        image,
        aspect,
        0,
        mip_levels,
        0,
        layer_count,
        *tracked_layout,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    for mip in 1..mip_levels {
        let src_extent = desc.extent_at_mip(mip - 1);
        let dst_extent = desc.extent_at_mip(mip);

        // previous mip: dst -> src
        image_barrier(
            device,
            cmd,
            image,
            aspect,
            mip - 1,
            1,
            0,
            layer_count,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let blit = vk::ImageBlit::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .mip_level(mip - 1)
                    .base_array_layer(0)
                    .layer_count(layer_count),
            )
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: src_extent.depth.max(1) as i32,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .mip_level(mip)
                    .base_array_layer(0)
                    .layer_count(layer_count),
            )
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: dst_extent.depth.max(1) as i32,
                },
            ]);

        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }

    // mips 0..N-1 are TRANSFER_SRC, the last is TRANSFER_DST; unify
    if mip_levels > 1 {
        image_barrier(
            device,
            cmd,
            image,
            aspect,
            0,
            mip_levels - 1,
            0,
            layer_count,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }
    image_barrier(
        device,
        cmd,
        image,
        aspect,
        mip_levels - 1,
        1,
        0,
        layer_count,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    *tracked_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
}

#[derive(Debug)]
pub struct VulkanSamplerBackendData {
    pub sampler: vk::Sampler,
}

impl SamplerBackendData for VulkanSamplerBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

#[derive(Debug)]
pub struct VulkanRenderTargetBackendData;

impl RenderTargetBackendData for VulkanRenderTargetBackendData {
    fn set_debug_name(&self, _name: &str) {}
}

/// Placeholder payload of the window render target's color attachment;
/// the command list swaps in the acquired back buffer at record time, so
/// direct data operations have nothing to act on.
#[derive(Debug)]
pub struct VulkanWindowTextureBackendData;

impl TextureBackendData for VulkanWindowTextureBackendData {
    fn set_debug_name(&self, _name: &str) {}

    fn clear_color(&self, _color: ClearColor) -> anyhow::Result<()> {
        anyhow::bail!("the swapchain texture is cleared through its render target load op")
    }

    fn set_data(&self, _bytes: &[u8], _mip: u32, _layer: u32) -> anyhow::Result<()> {
        anyhow::bail!("the swapchain texture cannot be written directly")
    }

    fn generate_mipmaps(&self) -> anyhow::Result<()> {
        anyhow::bail!("the swapchain texture has no mip chain")
    }

    fn read_data(&self, _mip: u32, _dest: &mut Vec<u8>) -> anyhow::Result<()> {
        anyhow::bail!("swapchain readback goes through the frame grabber, not the texture")
    }
}
