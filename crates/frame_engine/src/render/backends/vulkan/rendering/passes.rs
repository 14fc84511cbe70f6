//! Per-frame recording hooks
//!
//! The renderer owns the frame; passes only record into it. Neither hook may submit or
//! present.

use ash::vk;

use crate::render::backends::vulkan::device::GpuResource;
use crate::render::backends::vulkan::{CommandContext, DeletionQueue, VulkanResult};

/// What a background pass may touch while recording one frame
pub struct FrameContext<'a> {
    /// Recording command buffer
    pub commands: CommandContext<'a>,
    /// Number of the frame being recorded
    pub frame_number: u64,
    /// Index of the acquired swapchain image
    pub image_index: u32,
    /// Offscreen draw image, in `GENERAL` layout
    pub image: vk::Image,
    /// View over `image`
    pub image_view: vk::ImageView,
    /// Storage-image set bound to `image`, for compute backgrounds
    pub descriptor_set: vk::DescriptorSet,
    /// Region of `image` that reaches the screen
    pub extent: vk::Extent2D,
    deletion_queue: &'a mut DeletionQueue,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(
        commands: CommandContext<'a>,
        frame_number: u64,
        image_index: u32,
        image: vk::Image,
        image_view: vk::ImageView,
        descriptor_set: vk::DescriptorSet,
        extent: vk::Extent2D,
        deletion_queue: &'a mut DeletionQueue,
    ) -> Self {
        Self {
            commands,
            frame_number,
            image_index,
            image,
            image_view,
            descriptor_set,
            extent,
            deletion_queue,
        }
    }

    /// Release `resource` once the GPU has finished this frame
    pub fn defer_release(&mut self, resource: GpuResource) {
        self.deletion_queue.push(resource);
    }
}

/// Records the frame's background into the target image
pub trait BackgroundPass {
    /// Record into `frame.commands`; the target stays in `GENERAL` layout
    fn record(&mut self, frame: &mut FrameContext<'_>) -> VulkanResult<()>;
}

/// UI drawn onto the swapchain image after the draw image was copied there
pub trait OverlayPass {
    /// Record into `commands`; `target_view` is in `COLOR_ATTACHMENT_OPTIMAL` layout
    fn record(
        &mut self,
        commands: &CommandContext<'_>,
        target_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<()>;
}

/// Clears the target with a slowly pulsing blue
#[derive(Debug, Clone, Copy)]
pub struct ClearBackground {
    /// Frames per radian of the pulse
    pub period_frames: f64,
}

impl Default for ClearBackground {
    fn default() -> Self {
        Self { period_frames: 120.0 }
    }
}

impl ClearBackground {
    /// Clear color for `frame_number`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn color(&self, frame_number: u64) -> [f32; 4] {
        let flash = (frame_number as f64 / self.period_frames).sin().abs();
        [0.0, 0.0, flash as f32, 1.0]
    }
}

impl BackgroundPass for ClearBackground {
    fn record(&mut self, frame: &mut FrameContext<'_>) -> VulkanResult<()> {
        frame
            .commands
            .clear_color(frame.image, vk::ImageLayout::GENERAL, self.color(frame.frame_number));
        Ok(())
    }
}
