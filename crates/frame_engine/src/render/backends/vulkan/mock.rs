//! Scripted GPU device for unit tests
//!
//! Hands out unique fake handles, records every operation in order, and lets a test decide
//! when submitted work completes.

use std::cell::RefCell;
use std::rc::Rc;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};

use super::device::{
    GpuDevice, GpuResource, ImageRequest, Submission, SurfaceSupport, SwapchainRequest,
};
use super::{VulkanError, VulkanResult};

/// When submitted work is considered finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// Work finishes as soon as it is waited on
    Immediate,
    /// Work finishes this long after submission; waits sleep until then
    Delayed(Duration),
    /// Work finishes only on [`MockDevice::complete_all`]; waits on unfinished work time out
    Manual,
}

/// Scripted result for the next acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// Success, optionally suboptimal
    Image { suboptimal: bool },
    /// `ERROR_OUT_OF_DATE_KHR`
    OutOfDate,
}

/// Scripted result for the next present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Present {
    /// Success
    Ok,
    /// `SUBOPTIMAL_KHR`
    Suboptimal,
    /// `ERROR_OUT_OF_DATE_KHR`
    OutOfDate,
}

/// One recorded device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    CreateSwapchain { extent: vk::Extent2D, image_count: u32 },
    CreateImage { format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags },
    CreateImageView(vk::ImageView),
    CreateCommandPool(vk::CommandPool),
    CreateFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    CreateDescriptorSetLayout(vk::DescriptorSetLayout),
    CreateDescriptorPool(vk::DescriptorPool),
    Acquire { image_index: Option<u32> },
    Present { image_index: u32 },
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Transition { old: vk::ImageLayout, new: vk::ImageLayout },
    ClearColor { color: [u32; 4] },
    Blit { src: vk::Extent2D, dst: vk::Extent2D },
    Submit { fence: vk::Fence },
    FenceWaited(vk::Fence),
    FenceReset(vk::Fence),
    WaitIdle,
    AllocateDescriptorSet(vk::DescriptorSetLayout),
    ResetDescriptorPool(vk::DescriptorPool),
    UpdateDescriptorSets(usize),
    Released(GpuResource),
}

#[derive(Debug, Clone, Copy)]
struct FenceState {
    signaled: bool,
    submitted_at: Option<Instant>,
}

struct State {
    next_handle: u64,
    ops: Vec<Op>,
    fences: HashMap<vk::Fence, FenceState>,
    swapchain_images: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    next_image: u32,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<Present>,
    completion: Completion,
    support: SurfaceSupport,
}

/// In-memory [`GpuDevice`]
///
/// Clones share one state, so a test can keep a handle on a device it moved elsewhere.
#[derive(Clone)]
pub(crate) struct MockDevice {
    state: Rc<RefCell<State>>,
}

pub(crate) fn default_surface_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::with_completion(Completion::Immediate)
    }

    pub(crate) fn with_completion(completion: Completion) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                next_handle: 1,
                ops: Vec::new(),
                fences: HashMap::new(),
                swapchain_images: HashMap::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                completion,
                support: default_surface_support(),
            })),
        }
    }

    pub(crate) fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.borrow_mut().support = support;
    }

    pub(crate) fn script_acquire(&self, result: Acquire) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub(crate) fn script_present(&self, result: Present) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// Signal every fence with submitted work
    pub(crate) fn complete_all(&self) {
        for fence in self.state.borrow_mut().fences.values_mut() {
            if fence.submitted_at.take().is_some() {
                fence.signaled = true;
            }
        }
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.state.borrow().ops.clone()
    }

    pub(crate) fn op_count(&self) -> usize {
        self.state.borrow().ops.len()
    }

    pub(crate) fn released(&self) -> Vec<GpuResource> {
        self.state
            .borrow()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Released(resource) => Some(*resource),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Op) -> bool) -> usize {
        self.state.borrow().ops.iter().filter(|op| predicate(op)).count()
    }

    /// Position of the first operation matching `predicate`
    pub(crate) fn position(&self, predicate: impl Fn(&Op) -> bool) -> Option<usize> {
        self.state.borrow().ops.iter().position(predicate)
    }

    fn next<T: Handle>(&self) -> T {
        let mut state = self.state.borrow_mut();
        let raw = state.next_handle;
        state.next_handle += 1;
        T::from_raw(raw)
    }

    fn record(&self, op: Op) {
        self.state.borrow_mut().ops.push(op);
    }
}

impl GpuDevice for MockDevice {
    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn surface_support(&self) -> VulkanResult<SurfaceSupport> {
        Ok(self.state.borrow().support.clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VulkanResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.next();
        let images: Vec<vk::Image> = (0..request.min_image_count).map(|_| self.next()).collect();
        let mut state = self.state.borrow_mut();
        state.swapchain_images.insert(swapchain, images);
        state.next_image = 0;
        state.ops.push(Op::CreateSwapchain {
            extent: request.extent,
            image_count: request.min_image_count,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .swapchain_images
            .get(&swapchain)
            .cloned()
            .ok_or(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn create_image(&self, request: &ImageRequest) -> VulkanResult<vk::Image> {
        let image = self.next();
        self.record(Op::CreateImage {
            format: request.format,
            extent: request.extent,
            usage: request.usage,
        });
        Ok(image)
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VulkanResult<vk::ImageView> {
        let view = self.next();
        self.record(Op::CreateImageView(view));
        Ok(view)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _signal: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        let mut state = self.state.borrow_mut();
        let scripted = state.acquire_script.pop_front().unwrap_or(Acquire::Image { suboptimal: false });
        let Acquire::Image { suboptimal } = scripted else {
            state.ops.push(Op::Acquire { image_index: None });
            return Err(VulkanError::SwapchainOutOfDate);
        };
        let count = state
            .swapchain_images
            .get(&swapchain)
            .map_or(0, |images| u32::try_from(images.len()).unwrap_or(u32::MAX));
        if count == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        let image_index = state.next_image % count;
        state.next_image = state.next_image.wrapping_add(1);
        state.ops.push(Op::Acquire { image_index: Some(image_index) });
        Ok((image_index, suboptimal))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VulkanResult<bool> {
        let mut state = self.state.borrow_mut();
        state.ops.push(Op::Present { image_index });
        match state.present_script.pop_front().unwrap_or(Present::Ok) {
            Present::Ok => Ok(false),
            Present::Suboptimal => Ok(true),
            Present::OutOfDate => Err(VulkanError::SwapchainOutOfDate),
        }
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let pool = self.next();
        self.record(Op::CreateCommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffer(&self, _pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        Ok(self.next())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.record(Op::ResetCommandBuffer(command_buffer));
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.record(Op::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.record(Op::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_transition_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        _image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.record(Op::Transition { old: old_layout, new: new_layout });
    }

    fn cmd_clear_color_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        _image: vk::Image,
        _layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        self.record(Op::ClearColor { color: color.map(f32::to_bits) });
    }

    fn cmd_blit_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        _src: vk::Image,
        _dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        self.record(Op::Blit { src: src_extent, dst: dst_extent });
    }

    fn queue_submit(&self, submission: &Submission) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        let fence = state
            .fences
            .get_mut(&submission.fence)
            .ok_or(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))?;
        if fence.signaled {
            // Submitting with a signaled fence is a validation error
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        fence.submitted_at = Some(Instant::now());
        state.ops.push(Op::Submit { fence: submission.fence });
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let fence = self.next();
        let mut state = self.state.borrow_mut();
        state.fences.insert(fence, FenceState { signaled, submitted_at: None });
        state.ops.push(Op::CreateFence(fence));
        Ok(fence)
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let semaphore = self.next();
        self.record(Op::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VulkanResult<()> {
        let (state_now, completion) = {
            let state = self.state.borrow();
            let fence_state = *state
                .fences
                .get(&fence)
                .ok_or(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))?;
            (fence_state, state.completion)
        };

        if !state_now.signaled {
            match (completion, state_now.submitted_at) {
                (Completion::Immediate, Some(_)) => {}
                (Completion::Delayed(delay), Some(submitted_at)) => {
                    let ready_at = submitted_at + delay;
                    let now = Instant::now();
                    if ready_at > now {
                        std::thread::sleep(ready_at - now);
                    }
                }
                _ => return Err(VulkanError::Timeout { operation: "fence", timeout_ns }),
            }
        }

        let mut state = self.state.borrow_mut();
        if let Some(fence_state) = state.fences.get_mut(&fence) {
            fence_state.signaled = true;
            fence_state.submitted_at = None;
        }
        state.ops.push(Op::FenceWaited(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(fence_state) = state.fences.get_mut(&fence) {
            fence_state.signaled = false;
        }
        state.ops.push(Op::FenceReset(fence));
        Ok(())
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        let mut state = self.state.borrow_mut();
        for fence in state.fences.values_mut() {
            if fence.submitted_at.take().is_some() {
                fence.signaled = true;
            }
        }
        state.ops.push(Op::WaitIdle);
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let layout = self.next();
        self.record(Op::CreateDescriptorSetLayout(layout));
        Ok(layout)
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VulkanResult<vk::DescriptorPool> {
        let pool = self.next();
        self.record(Op::CreateDescriptorPool(pool));
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let set = self.next();
        self.record(Op::AllocateDescriptorSet(layout));
        Ok(set)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VulkanResult<()> {
        self.record(Op::ResetDescriptorPool(pool));
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.record(Op::UpdateDescriptorSets(writes.len()));
    }

    fn release(&self, resource: GpuResource) {
        self.record(Op::Released(resource));
    }
}
