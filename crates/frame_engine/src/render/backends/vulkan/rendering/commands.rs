//! Command recording helpers

use ash::vk;

use crate::render::backends::vulkan::device::GpuDevice;

/// A command buffer in the recording state plus the device that records into it
#[derive(Clone, Copy)]
pub struct CommandContext<'a> {
    device: &'a dyn GpuDevice,
    command_buffer: vk::CommandBuffer,
}

impl<'a> CommandContext<'a> {
    /// Wrap a command buffer that is already recording
    pub fn new(device: &'a dyn GpuDevice, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }

    /// The raw command buffer, for recording outside these helpers
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// The device the buffer belongs to
    pub fn device(&self) -> &'a dyn GpuDevice {
        self.device
    }

    /// Move every color subresource of `image` from `old_layout` to `new_layout`
    pub fn transition_image(&self, image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        self.device
            .cmd_transition_image(self.command_buffer, image, old_layout, new_layout);
    }

    /// Clear `image`, which must be in `GENERAL` or `TRANSFER_DST_OPTIMAL` layout
    pub fn clear_color(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        self.device
            .cmd_clear_color_image(self.command_buffer, image, layout, color);
    }

    /// Scale-copy `src` onto `dst`
    pub fn blit(&self, src: vk::Image, dst: vk::Image, src_extent: vk::Extent2D, dst_extent: vk::Extent2D) {
        self.device
            .cmd_blit_image(self.command_buffer, src, dst, src_extent, dst_extent);
    }
}

impl std::fmt::Debug for CommandContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("command_buffer", &self.command_buffer)
            .finish_non_exhaustive()
    }
}
