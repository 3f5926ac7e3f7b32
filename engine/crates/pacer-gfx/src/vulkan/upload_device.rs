use std::mem::ManuallyDrop;
use std::time::Duration;

use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::device::{GfxError, UploadDevice};
use crate::format::{TextureCopy, TextureDesc};
use crate::handles::{FenceHandle, GpuBufferHandle, StagingBufferHandle, TextureHandle};
use crate::mapped::MappedRegion;
use crate::vulkan::barrier::ImageBarrier;
use crate::vulkan::context::VulkanContext;
use crate::vulkan::format::vk_format;

struct VulkanStagingBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapped_ptr: *mut u8,
    size: u64,
}

/// 每个 fence 对应一个独立的 command buffer，fence signaled 之后才能重新录制
struct VulkanFence {
    fence: vk::Fence,
    command_buffer: vk::CommandBuffer,
}

struct VulkanTexture {
    image: vk::Image,
    allocation: vk_mem::Allocation,
    desc: TextureDesc,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
}

/// 基于 ash + vk-mem 的上传设备
///
/// staging buffer 是持久映射的 host visible 内存，拷贝通过 `vkCmdCopyBufferToImage2` 完成，
/// 拷贝前后分别把 mip level 转换到 `TRANSFER_DST_OPTIMAL` 和 `SHADER_READ_ONLY_OPTIMAL`。
pub struct VulkanUploadDevice {
    staging_buffers: SlotMap<StagingBufferHandle, VulkanStagingBuffer>,
    fences: SlotMap<FenceHandle, VulkanFence>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    mesh_buffers: SlotMap<GpuBufferHandle, VulkanBuffer>,

    command_pool: vk::CommandPool,
    /// 必须在 device 之前销毁
    allocator: ManuallyDrop<vk_mem::Allocator>,
    ctx: VulkanContext,
}

// new & init
impl VulkanUploadDevice {
    pub fn new(ctx: VulkanContext) -> Result<Self, GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::new");

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&ctx.instance, &ctx.device, ctx.physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }?;

        let command_pool = unsafe {
            ctx.device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(ctx.queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }?;

        Ok(Self {
            staging_buffers: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            mesh_buffers: SlotMap::with_key(),
            command_pool,
            allocator: ManuallyDrop::new(allocator),
            ctx,
        })
    }
}

// tools
impl VulkanUploadDevice {
    fn record_copies(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        copies: &[TextureCopy],
    ) -> Result<(), GfxError> {
        let device = &self.ctx.device;
        let targets = copies
            .iter()
            .map(|copy| {
                self.textures
                    .get(copy.texture)
                    .map(|texture| (copy, texture.image))
                    .ok_or(GfxError::InvalidHandle("texture"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // 1. transition the image layout
        // 2. copy the buffer into the image
        // 3. transition the layout 为了让 fragment shader 可读
        let to_transfer_dst: Vec<_> = targets
            .iter()
            .map(|(copy, image)| {
                *ImageBarrier::new()
                    .image(*image)
                    .mip_level(copy.mip_level)
                    .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::empty())
                    .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .inner()
            })
            .collect();
        let to_shader_read: Vec<_> = targets
            .iter()
            .map(|(copy, image)| {
                *ImageBarrier::new()
                    .image(*image)
                    .mip_level(copy.mip_level)
                    .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ)
                    .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .inner()
            })
            .collect();

        unsafe {
            device.begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default().image_memory_barriers(&to_transfer_dst),
            );

            for (copy, image) in &targets {
                let region = vk::BufferImageCopy2::default()
                    .buffer_offset(copy.buffer_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: copy.width,
                        height: copy.height,
                        depth: 1,
                    })
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: copy.mip_level,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                device.cmd_copy_buffer_to_image2(
                    command_buffer,
                    &vk::CopyBufferToImageInfo2::default()
                        .src_buffer(src_buffer)
                        .dst_image(*image)
                        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .regions(std::slice::from_ref(&region)),
                );
            }

            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default().image_memory_barriers(&to_shader_read),
            );

            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }
}

impl UploadDevice for VulkanUploadDevice {
    fn backend_name(&self) -> &'static str {
        "vulkan"
    }

    fn create_staging_buffer(&mut self, size: u64, name: &str) -> Result<StagingBufferHandle, GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::create_staging_buffer");
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(vk::BufferUsageFlags::TRANSFER_SRC);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }?;
        let mapped_ptr = match unsafe { self.allocator.map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(e.into());
            }
        };

        log::debug!("created staging buffer '{}' of {} bytes", name, size);
        Ok(self.staging_buffers.insert(VulkanStagingBuffer {
            buffer,
            allocation,
            mapped_ptr,
            size,
        }))
    }

    fn destroy_staging_buffer(&mut self, buffer: StagingBufferHandle) {
        if let Some(mut staging) = self.staging_buffers.remove(buffer) {
            unsafe {
                self.allocator.unmap_memory(&mut staging.allocation);
                self.allocator.destroy_buffer(staging.buffer, &mut staging.allocation);
            }
        }
    }

    fn staging_buffer_size(&self, buffer: StagingBufferHandle) -> Option<u64> {
        self.staging_buffers.get(buffer).map(|staging| staging.size)
    }

    fn mapped_region(&mut self, buffer: StagingBufferHandle) -> Result<MappedRegion<'_>, GfxError> {
        let staging = self.staging_buffers.get(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?;
        // mapped_ptr 在 buffer 销毁前一直有效，region 借用 self 保证期间不会销毁
        unsafe { MappedRegion::from_raw(staging.mapped_ptr, staging.size as usize) }
            .ok_or(GfxError::InvalidHandle("staging buffer"))
    }

    fn flush_staging_buffer(&mut self, buffer: StagingBufferHandle, offset: u64, size: u64) -> Result<(), GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::flush_staging_buffer");
        let staging = self.staging_buffers.get(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?;
        self.allocator.flush_allocation(&staging.allocation, offset, size)?;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool, name: &str) -> Result<FenceHandle, GfxError> {
        let device = &self.ctx.device;
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None) }?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_fence(fence, None) };
                return Err(e.into());
            }
        };

        log::debug!("created upload fence '{}'", name);
        Ok(self.fences.insert(VulkanFence { fence, command_buffer }))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(fence) = self.fences.remove(fence) {
            unsafe {
                self.ctx.device.free_command_buffers(self.command_pool, std::slice::from_ref(&fence.command_buffer));
                self.ctx.device.destroy_fence(fence.fence, None);
            }
        }
    }

    fn fence_signaled(&mut self, fence: FenceHandle) -> Result<bool, GfxError> {
        let fence = self.fences.get(fence).ok_or(GfxError::InvalidHandle("fence"))?;
        Ok(unsafe { self.ctx.device.get_fence_status(fence.fence) }?)
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> Result<bool, GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::wait_fence");
        let fence = self.fences.get(fence).ok_or(GfxError::InvalidHandle("fence"))?;
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.ctx.device.wait_for_fences(std::slice::from_ref(&fence.fence), true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn submit_texture_copies(
        &mut self,
        buffer: StagingBufferHandle,
        copies: &[TextureCopy],
        fence: FenceHandle,
    ) -> Result<(), GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::submit_texture_copies");
        let src_buffer = self.staging_buffers.get(buffer).ok_or(GfxError::InvalidHandle("staging buffer"))?.buffer;
        let (vk_fence, command_buffer) = self
            .fences
            .get(fence)
            .map(|fence| (fence.fence, fence.command_buffer))
            .ok_or(GfxError::InvalidHandle("fence"))?;

        let device = &self.ctx.device;
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        self.record_copies(command_buffer, src_buffer, copies)?;

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&command_buffer_infos);
        unsafe {
            device.reset_fences(std::slice::from_ref(&vk_fence))?;
            device.queue_submit2(self.ctx.queue, std::slice::from_ref(&submit_info), vk_fence)?;
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::create_texture");
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }?;
        Ok(self.textures.insert(VulkanTexture {
            image,
            allocation,
            desc: desc.clone(),
        }))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(mut texture) = self.textures.remove(texture) {
            log::debug!("destroy texture '{}'", texture.desc.name);
            unsafe { self.allocator.destroy_image(texture.image, &mut texture.allocation) };
        }
    }

    fn create_mesh_buffer(&mut self, bytes: &[u8], name: &str) -> Result<GpuBufferHandle, GfxError> {
        let _span = tracy_client::span!("VulkanUploadDevice::create_mesh_buffer");
        // 空模型也需要一个合法的 buffer
        let size = (bytes.len() as u64).max(4);
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }?;
        let write_result = unsafe {
            self.allocator.map_memory(&mut allocation).and_then(|ptr| {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
                let flushed = self.allocator.flush_allocation(&allocation, 0, size);
                self.allocator.unmap_memory(&mut allocation);
                flushed
            })
        };
        if let Err(e) = write_result {
            unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
            return Err(e.into());
        }

        log::debug!("created mesh buffer '{}' of {} bytes", name, bytes.len());
        Ok(self.mesh_buffers.insert(VulkanBuffer { buffer, allocation }))
    }

    fn destroy_mesh_buffer(&mut self, buffer: GpuBufferHandle) {
        if let Some(mut buffer) = self.mesh_buffers.remove(buffer) {
            unsafe { self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation) };
        }
    }
}

impl Drop for VulkanUploadDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.ctx.device.device_wait_idle();
        }

        let staging_buffers: Vec<_> = self.staging_buffers.keys().collect();
        staging_buffers.into_iter().for_each(|buffer| self.destroy_staging_buffer(buffer));
        let fences: Vec<_> = self.fences.keys().collect();
        fences.into_iter().for_each(|fence| self.destroy_fence(fence));
        let textures: Vec<_> = self.textures.keys().collect();
        textures.into_iter().for_each(|texture| self.destroy_texture(texture));
        let mesh_buffers: Vec<_> = self.mesh_buffers.keys().collect();
        mesh_buffers.into_iter().for_each(|buffer| self.destroy_mesh_buffer(buffer));

        unsafe {
            self.ctx.device.destroy_command_pool(self.command_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
        }
    }
}
