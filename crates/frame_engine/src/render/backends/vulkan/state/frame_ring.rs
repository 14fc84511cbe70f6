//! Double-buffered per-frame resources
//!
//! Each [`FrameSlot`] owns everything one in-flight frame records into and synchronizes
//! with. A slot is reused every [`FRAME_OVERLAP`] frames, and only after its render fence
//! proves the GPU finished the previous use.

use ash::vk;

use crate::core::FRAMES_IN_FLIGHT;
use crate::render::backends::vulkan::device::{GpuDevice, GpuResource};
use crate::render::backends::vulkan::{DeletionQueue, VulkanResult};

/// Frames the CPU may record ahead of the GPU
pub const FRAME_OVERLAP: usize = FRAMES_IN_FLIGHT;

/// Monotonic count of frames started; never reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameCounter(u64);

impl FrameCounter {
    /// Frames started so far
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Move to the next frame
    pub fn advance(&mut self) {
        self.0 += 1;
    }

    /// Counter of the frame before this one (frame 0 maps to itself)
    pub const fn previous(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Slot the current frame uses
    #[allow(clippy::cast_possible_truncation)]
    pub const fn slot_index(self) -> usize {
        (self.0 % FRAME_OVERLAP as u64) as usize
    }
}

/// Resources for one in-flight frame
#[derive(Debug)]
pub struct FrameSlot {
    /// Pool owned exclusively by this slot
    pub command_pool: vk::CommandPool,
    /// Primary command buffer, reset on every reuse
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the slot's last submission completes; created signaled
    pub render_fence: vk::Fence,
    /// Signaled when the acquired swapchain image is ready
    pub acquire_semaphore: vk::Semaphore,
    /// Signaled when rendering finishes, waited on by present
    pub render_semaphore: vk::Semaphore,
    /// Releases that wait for this slot's fence
    pub deletion_queue: DeletionQueue,
}

impl FrameSlot {
    fn new(device: &dyn GpuDevice, global: &mut DeletionQueue) -> VulkanResult<Self> {
        let command_pool = device.create_command_pool()?;
        global.push(GpuResource::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;

        let render_fence = device.create_fence(true)?;
        global.push(GpuResource::Fence(render_fence));
        let acquire_semaphore = device.create_semaphore()?;
        global.push(GpuResource::Semaphore(acquire_semaphore));
        let render_semaphore = device.create_semaphore()?;
        global.push(GpuResource::Semaphore(render_semaphore));

        Ok(Self {
            command_pool,
            command_buffer,
            render_fence,
            acquire_semaphore,
            render_semaphore,
            deletion_queue: DeletionQueue::new(),
        })
    }
}

/// Fixed ring of [`FRAME_OVERLAP`] slots
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    /// Create every slot, registering its objects for release in `global`
    ///
    /// Objects created before a failure stay registered in `global`, so flushing it still
    /// releases them.
    pub fn new(device: &dyn GpuDevice, global: &mut DeletionQueue) -> VulkanResult<Self> {
        log::debug!("Creating FrameRing with {} slots", FRAME_OVERLAP);
        let slots = (0..FRAME_OVERLAP)
            .map(|_| FrameSlot::new(device, global))
            .collect::<VulkanResult<Vec<_>>>()?;
        Ok(Self { slots })
    }

    /// Slot used by frame `counter`
    pub fn slot(&self, counter: FrameCounter) -> &FrameSlot {
        &self.slots[counter.slot_index()]
    }

    /// Mutable slot used by frame `counter`
    pub fn slot_mut(&mut self, counter: FrameCounter) -> &mut FrameSlot {
        &mut self.slots[counter.slot_index()]
    }

    /// All slots, in index order
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut FrameSlot> {
        self.slots.iter_mut()
    }
}
