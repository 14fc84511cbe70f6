//! GPU device seam
//!
//! Every Vulkan call the frame engine makes goes through [`GpuDevice`]. The production
//! implementation is [`super::VulkanDevice`]; unit tests substitute a scripted device so the
//! frame state machine can be exercised without a GPU.

use ash::vk;

use super::VulkanResult;

/// An engine-owned GPU object awaiting release
///
/// Each variant holds only the handle(s) needed to free it. Swapchain images are owned by
/// the presentation engine and never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    /// Command pool (frees its command buffers)
    CommandPool(vk::CommandPool),
    /// Fence
    Fence(vk::Fence),
    /// Binary semaphore
    Semaphore(vk::Semaphore),
    /// Image view
    ImageView(vk::ImageView),
    /// Image the engine created itself, with its allocation
    Image(vk::Image),
    /// Device memory allocation
    DeviceMemory(vk::DeviceMemory),
    /// Buffer
    Buffer(vk::Buffer),
    /// Swapchain
    Swapchain(vk::SwapchainKHR),
    /// Descriptor pool (frees its sets)
    DescriptorPool(vk::DescriptorPool),
    /// Descriptor set layout
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Pipeline
    Pipeline(vk::Pipeline),
    /// Pipeline layout
    PipelineLayout(vk::PipelineLayout),
    /// Sampler
    Sampler(vk::Sampler),
}

/// What the surface can back a swapchain with
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count, extent, usage and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Fully resolved swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    /// Images to request
    pub min_image_count: u32,
    /// Format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Pixel extent
    pub extent: vk::Extent2D,
    /// Present mode
    pub present_mode: vk::PresentModeKHR,
    /// Transform to apply on present
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Usages the engine records into the images with
    pub image_usage: vk::ImageUsageFlags,
}

/// A device-local 2D color image with one mip level and one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRequest {
    /// Texel format
    pub format: vk::Format,
    /// Pixel extent
    pub extent: vk::Extent2D,
    /// Usages the image is created with
    pub usage: vk::ImageUsageFlags,
}

/// One command buffer submission to the graphics queue
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    /// Recorded command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Semaphore to signal when the work completes
    pub signal: Option<vk::Semaphore>,
    /// Fence to signal when the work completes
    pub fence: vk::Fence,
}

/// The GPU operations the frame engine depends on
///
/// All methods take `&self`; the engine is single threaded and the trait stays object safe
/// so helpers can work with `&dyn GpuDevice`.
pub trait GpuDevice {
    /// Queue family of the graphics queue
    fn graphics_queue_family(&self) -> u32;

    /// Query surface capabilities, formats and present modes
    fn surface_support(&self) -> VulkanResult<SurfaceSupport>;

    /// Create a swapchain on the surface
    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR>;

    /// Images owned by a swapchain, in presentation-index order
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;

    /// Create an image backed by its own device-local allocation
    ///
    /// Releasing [`GpuResource::Image`] for the returned handle frees the allocation too.
    fn create_image(&self, request: &ImageRequest) -> VulkanResult<vk::Image>;

    /// Create a 2D color view over `image`
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VulkanResult<vk::ImageView>;

    /// Acquire the next presentable image, signaling `signal` when it is ready
    ///
    /// Returns the image index and whether the swapchain is suboptimal. An out of date
    /// swapchain is reported as [`super::VulkanError::SwapchainOutOfDate`].
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)>;

    /// Present `image_index` once `wait` is signaled; returns whether the swapchain is suboptimal
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VulkanResult<bool>;

    /// Create a command pool on the graphics family whose buffers can be reset individually
    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool>;

    /// Allocate one primary command buffer
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer>;

    /// Reset a command buffer for re-recording
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Begin one-time-submit recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Record a full-subresource color layout transition
    fn cmd_transition_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    );

    /// Record a clear of every color subresource of `image`
    fn cmd_clear_color_image(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    );

    /// Record a linear-filtered blit from `src` (`TRANSFER_SRC_OPTIMAL`) to `dst` (`TRANSFER_DST_OPTIMAL`)
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    );

    /// Submit recorded work to the graphics queue
    fn queue_submit(&self, submission: &Submission) -> VulkanResult<()>;

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;

    /// Block until `fence` signals, failing with [`super::VulkanError::Timeout`] after `timeout_ns`
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;

    /// Block until the device has no outstanding work
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Allocate one set with `layout` from `pool`
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;

    /// Return every set allocated from `pool`
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()>;

    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);

    /// Destroy an engine-owned object
    fn release(&self, resource: GpuResource);
}
