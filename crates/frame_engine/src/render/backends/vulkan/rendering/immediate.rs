//! Immediate submission channel
//!
//! One-shot GPU work outside the frame ring (uploads, one-off clears). The caller blocks
//! until the GPU signals the channel's fence. The channel has its own pool, buffer and
//! fence, so it never contends with frame slots.

use ash::vk;

use crate::render::backends::vulkan::device::{GpuDevice, GpuResource, Submission};
use crate::render::backends::vulkan::{CommandContext, DeletionQueue, VulkanResult};

/// Dedicated command pool, buffer and fence for blocking submissions
#[derive(Debug)]
pub struct ImmediateChannel {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    timeout_ns: u64,
}

impl ImmediateChannel {
    /// Create the channel, registering its objects for release in `global`
    pub fn new(device: &dyn GpuDevice, timeout_ns: u64, global: &mut DeletionQueue) -> VulkanResult<Self> {
        log::debug!("Creating immediate submission channel");
        let command_pool = device.create_command_pool()?;
        global.push(GpuResource::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let fence = device.create_fence(false)?;
        global.push(GpuResource::Fence(fence));

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            timeout_ns,
        })
    }

    /// Record with `record`, submit, and block until the GPU has finished
    ///
    /// Fence and buffer are reset first, so the channel is reusable after any earlier
    /// call. Expiry of the wait is reported as [`crate::render::backends::vulkan::VulkanError::Timeout`].
    pub fn submit_and_wait<F>(&mut self, device: &dyn GpuDevice, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&CommandContext<'_>) -> VulkanResult<()>,
    {
        device.reset_fence(self.fence)?;
        device.reset_command_buffer(self.command_buffer)?;

        device.begin_command_buffer(self.command_buffer)?;
        record(&CommandContext::new(device, self.command_buffer))?;
        device.end_command_buffer(self.command_buffer)?;

        device.queue_submit(&Submission {
            command_buffer: self.command_buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;

        device.wait_for_fence(self.fence, self.timeout_ns).map_err(|err| {
            log::warn!("Immediate submission did not complete: {}", err);
            err
        })
    }

    /// The channel's command pool
    pub const fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }
}
