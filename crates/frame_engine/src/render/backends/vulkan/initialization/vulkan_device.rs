//! ash-backed implementation of the GPU device seam
//!
//! Images the engine creates itself are backed by vk-mem allocations; the device keeps
//! each allocation until the image is released.

use std::cell::RefCell;
use std::collections::HashMap;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use vk_mem::Alloc;

use super::context::{map_vk_result, DeviceContext, VulkanError, VulkanResult};
use crate::render::backends::vulkan::device::{
    GpuDevice, GpuResource, ImageRequest, Submission, SurfaceSupport, SwapchainRequest,
};

/// The real device: a [`DeviceContext`], the swapchain extension loader and a memory allocator
pub struct VulkanDevice {
    context: DeviceContext,
    swapchain_loader: SwapchainLoader,
    allocator: vk_mem::Allocator,
    allocations: RefCell<HashMap<vk::Image, vk_mem::Allocation>>,
}

impl VulkanDevice {
    /// Wrap a bootstrapped context
    pub fn new(context: DeviceContext) -> VulkanResult<Self> {
        context.validate()?;
        log::debug!(
            "Creating VulkanDevice on queue family {}",
            context.graphics_queue_family
        );
        let swapchain_loader = SwapchainLoader::new(&context.instance, &context.device);
        let allocator = unsafe {
            vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
                &context.instance,
                &context.device,
                context.physical_device,
            ))
        }
        .map_err(|e| VulkanError::InitializationFailed(format!("Memory allocator: {e}")))?;

        Ok(Self {
            context,
            swapchain_loader,
            allocator,
            allocations: RefCell::new(HashMap::new()),
        })
    }

    /// Access the wrapped context
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    fn raw(&self) -> &ash::Device {
        &self.context.device
    }

    fn destroy_allocated_image(&self, image: vk::Image) {
        let allocation = self.allocations.borrow_mut().remove(&image);
        unsafe {
            match allocation {
                Some(mut allocation) => self.allocator.destroy_image(image, &mut allocation),
                None => self.raw().destroy_image(image, None),
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let leaked: Vec<_> = self.allocations.get_mut().keys().copied().collect();
        if !leaked.is_empty() {
            log::warn!("{} image allocation(s) outlived the renderer, freeing", leaked.len());
        }
        for image in leaked {
            self.destroy_allocated_image(image);
        }
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
        .build()
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

fn timeout_or_api(result: vk::Result, operation: &'static str, timeout_ns: u64) -> VulkanError {
    if result == vk::Result::TIMEOUT {
        VulkanError::Timeout { operation, timeout_ns }
    } else {
        map_vk_result(result)
    }
}

impl GpuDevice for VulkanDevice {
    fn graphics_queue_family(&self) -> u32 {
        self.context.graphics_queue_family
    }

    fn surface_support(&self) -> VulkanResult<SurfaceSupport> {
        let loader = &self.context.surface_loader;
        let physical_device = self.context.physical_device;
        let surface = self.context.surface;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(VulkanError::Api)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.context.surface)
            .min_image_count(request.min_image_count)
            .image_format(request.surface_format.format)
            .image_color_space(request.surface_format.color_space)
            .image_extent(request.extent)
            .image_array_layers(1)
            .image_usage(request.image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(request.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(request.present_mode)
            .clipped(true);

        unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)
        }
    }

    fn create_image(&self, request: &ImageRequest) -> VulkanResult<vk::Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(request.format)
            .extent(vk::Extent3D {
                width: request.extent.width,
                height: request.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(request.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        };

        let (image, allocation) = unsafe {
            self.allocator
                .create_image(&image_info, &allocation_info)
                .map_err(VulkanError::Api)?
        };
        self.allocations.borrow_mut().insert(image, allocation);
        Ok(image)
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );

        unsafe {
            self.raw()
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
                .map_err(|e| timeout_or_api(e, "swapchain image", timeout_ns))
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.context.graphics_queue, &present_info)
                .map_err(map_vk_result)
        }
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.context.graphics_queue_family);

        unsafe {
            self.raw()
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe {
            self.raw()
                .allocate_command_buffers(&allocate_info)
                .map_err(VulkanError::Api)?
        };
        buffers.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no command buffer".to_string(),
        })
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.raw()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)
        }
    }

    fn cmd_transition_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .build();

        unsafe {
            self.raw().cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        let clear_value = vk::ClearColorValue { float32: color };
        unsafe {
            self.raw().cmd_clear_color_image(
                command_buffer,
                image,
                layout,
                &clear_value,
                &[color_subresource_range()],
            );
        }
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let layers = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
            .build();
        let region = vk::ImageBlit::builder()
            .src_subresource(layers)
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_subresource(layers)
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_extent)])
            .build();

        unsafe {
            self.raw().cmd_blit_image(
                command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }

    fn queue_submit(&self, submission: &Submission) -> VulkanResult<()> {
        let command_buffers = [submission.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<_> = submission.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.raw()
                .queue_submit(self.context.graphics_queue, &[submit_info], submission.fence)
                .map_err(VulkanError::Api)
        }
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        unsafe {
            self.raw()
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        unsafe {
            self.raw()
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .wait_for_fences(&[fence], true, timeout_ns)
                .map_err(|e| timeout_or_api(e, "fence", timeout_ns))
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.raw().reset_fences(&[fence]).map_err(VulkanError::Api) }
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.raw().device_wait_idle().map_err(VulkanError::Api) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

        unsafe {
            self.raw()
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        unsafe {
            self.raw()
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.raw()
                .allocate_descriptor_sets(&allocate_info)
                .map_err(VulkanError::Api)?
        };
        sets.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "driver returned no descriptor set".to_string(),
        })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        unsafe {
            self.raw()
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe {
            self.raw().update_descriptor_sets(writes, &[]);
        }
    }

    fn release(&self, resource: GpuResource) {
        log::trace!("Releasing {:?}", resource);
        let device = self.raw();
        unsafe {
            match resource {
                GpuResource::CommandPool(pool) => device.destroy_command_pool(pool, None),
                GpuResource::Fence(fence) => device.destroy_fence(fence, None),
                GpuResource::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                GpuResource::ImageView(view) => device.destroy_image_view(view, None),
                GpuResource::Image(image) => self.destroy_allocated_image(image),
                GpuResource::DeviceMemory(memory) => device.free_memory(memory, None),
                GpuResource::Buffer(buffer) => device.destroy_buffer(buffer, None),
                GpuResource::Swapchain(swapchain) => {
                    self.swapchain_loader.destroy_swapchain(swapchain, None);
                }
                GpuResource::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                GpuResource::DescriptorSetLayout(layout) => {
                    device.destroy_descriptor_set_layout(layout, None);
                }
                GpuResource::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                GpuResource::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                GpuResource::Sampler(sampler) => device.destroy_sampler(sampler, None),
            }
        }
    }
}
