//! Per-frame draw orchestration
//!
//! Each frame runs wait, reclaim, reset, acquire, record, submit, present and advance
//! against the current frame slot. The background renders into the offscreen
//! [`DrawImage`], which is blitted onto the acquired swapchain image before the overlay.
//! Swapchain staleness is recovered here; every other failure is fatal and surfaces as
//! [`FatalFrameError`] naming the stage that failed.

use ash::vk;
use thiserror::Error;

use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::device::{GpuDevice, GpuResource, Submission};
use crate::render::backends::vulkan::{
    BackgroundPass, CommandContext, DeletionQueue, DescriptorAllocator, DescriptorLayout,
    DescriptorSetLayoutBuilder, DrawImage, FrameContext, FrameCounter, FrameRing, ImmediateChannel,
    OverlayPass, SwapchainManager, SwapchainPreferences, SwapchainState, VulkanError,
    VulkanResult,
};

/// Step of the frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// Waiting on the slot's render fence
    Wait,
    /// Resetting the slot's command buffer or fence
    Reset,
    /// Acquiring a swapchain image
    Acquire,
    /// Recording commands
    Record,
    /// Submitting to the graphics queue
    Submit,
    /// Presenting
    Present,
    /// Rebuilding the swapchain
    Recreate,
}

/// A frame failure the renderer cannot recover from
#[derive(Debug, Error)]
#[error("Frame {frame_number} failed during {stage:?}: {source}")]
pub struct FatalFrameError {
    /// Stage that failed
    pub stage: FrameStage,
    /// Frame being drawn
    pub frame_number: u64,
    /// Underlying error
    pub source: VulkanError,
}

fn fatal(stage: FrameStage, frame_number: u64, source: VulkanError) -> FatalFrameError {
    if let VulkanError::Timeout { operation, timeout_ns } = &source {
        log::warn!(
            "GPU wait on {} exceeded {} ns during {:?} of frame {}",
            operation,
            timeout_ns,
            stage,
            frame_number
        );
    }
    log::error!("Fatal error in {:?} stage of frame {}: {}", stage, frame_number, source);
    FatalFrameError {
        stage,
        frame_number,
        source,
    }
}

/// Result of one `draw_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented
    Presented,
    /// The frame was presented, then the swapchain was rebuilt
    PresentedAndRecreated,
    /// The swapchain was out of date at acquire; nothing was drawn
    Skipped,
    /// The window has zero area; nothing was touched
    Suspended,
}

/// Where the draw image is copied to each frame
#[derive(Debug, Clone, Copy)]
struct PresentTarget {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

/// Owns every engine-side GPU object and drives frames through them
pub struct VulkanRenderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    swapchain: SwapchainManager,
    frames: FrameRing,
    global_deletion: DeletionQueue,
    descriptors: DescriptorAllocator,
    draw_image: Option<DrawImage>,
    immediate: ImmediateChannel,
    frame_counter: FrameCounter,
    window_extent: vk::Extent2D,
    suspended: bool,
    resize_pending: bool,
    shut_down: bool,
}

impl<D: GpuDevice> VulkanRenderer<D> {
    /// Build the frame ring, immediate channel, descriptor pool, swapchain and draw image
    ///
    /// A zero-area `window_extent` starts the renderer suspended with neither swapchain nor
    /// draw image; both are created on the first non-zero resize.
    pub fn new(device: D, config: &RendererConfig, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        log::info!(
            "Creating VulkanRenderer for {}x{} window",
            window_extent.width,
            window_extent.height
        );
        let suspended = window_extent.width == 0 || window_extent.height == 0;

        let mut global_deletion = DeletionQueue::new();
        let parts = Self::create_parts(&device, config, window_extent, suspended, &mut global_deletion);
        let (swapchain, frames, descriptors, draw_image, immediate) = match parts {
            Ok(parts) => parts,
            Err(err) => {
                log::error!("Renderer initialization failed: {}", err);
                global_deletion.flush(&device);
                return Err(err);
            }
        };

        Ok(Self {
            device,
            config: config.clone(),
            swapchain,
            frames,
            global_deletion,
            descriptors,
            draw_image,
            immediate,
            frame_counter: FrameCounter::default(),
            window_extent,
            suspended,
            resize_pending: suspended,
            shut_down: false,
        })
    }

    fn create_parts(
        device: &dyn GpuDevice,
        config: &RendererConfig,
        window_extent: vk::Extent2D,
        suspended: bool,
        global: &mut DeletionQueue,
    ) -> VulkanResult<(SwapchainManager, FrameRing, DescriptorAllocator, Option<DrawImage>, ImmediateChannel)> {
        let frames = FrameRing::new(device, global)?;
        let immediate = ImmediateChannel::new(device, config.immediate_timeout_ns, global)?;

        let mut descriptors = DescriptorAllocator::new();
        descriptors.init_pool(device, config.descriptors.expected_sets, &config.descriptors.ratios)?;

        let mut swapchain = SwapchainManager::new(SwapchainPreferences::from_config(config));
        if suspended {
            return Ok((swapchain, frames, descriptors, None, immediate));
        }

        let draw_image = swapchain
            .create(device, window_extent)
            .and_then(|state| DrawImage::new(device, state.extent, &mut descriptors, global));
        match draw_image {
            Ok(draw_image) => Ok((swapchain, frames, descriptors, Some(draw_image), immediate)),
            Err(err) => {
                swapchain.destroy(device);
                descriptors.destroy_pool(device);
                Err(err)
            }
        }
    }

    /// Draw one frame
    ///
    /// Returns [`FrameOutcome::Suspended`] without touching the GPU while the window has
    /// zero area. Out-of-date and suboptimal swapchains are rebuilt; any other failure is
    /// logged and returned.
    pub fn draw_frame(
        &mut self,
        background: &mut dyn BackgroundPass,
        overlay: Option<&mut (dyn OverlayPass + '_)>,
    ) -> Result<FrameOutcome, FatalFrameError> {
        let frame_number = self.frame_counter.value();
        if self.shut_down {
            return Err(fatal(
                FrameStage::Wait,
                frame_number,
                VulkanError::InvalidOperation {
                    reason: "renderer has been shut down".to_string(),
                },
            ));
        }
        if self.suspended {
            return Ok(FrameOutcome::Suspended);
        }
        if self.resize_pending {
            let rebuilt = self
                .recreate_swapchain()
                .map_err(|e| fatal(FrameStage::Recreate, frame_number, e))?;
            if !rebuilt {
                return Ok(FrameOutcome::Suspended);
            }
        }

        let device: &dyn GpuDevice = &self.device;
        let slot = self.frames.slot_mut(self.frame_counter);

        device
            .wait_for_fence(slot.render_fence, self.config.frame_timeout_ns)
            .map_err(|e| fatal(FrameStage::Wait, frame_number, e))?;
        slot.deletion_queue.flush(device);
        device
            .reset_command_buffer(slot.command_buffer)
            .map_err(|e| fatal(FrameStage::Reset, frame_number, e))?;

        let (Some(swapchain), Some(draw_image)) = (self.swapchain.state(), self.draw_image.as_ref()) else {
            return Err(fatal(
                FrameStage::Acquire,
                frame_number,
                VulkanError::InvalidOperation {
                    reason: "no swapchain or draw image to render with".to_string(),
                },
            ));
        };
        let acquired = match device.acquire_next_image(
            swapchain.swapchain,
            self.config.acquire_timeout_ns,
            slot.acquire_semaphore,
        ) {
            Ok(acquired) => Some(acquired),
            Err(VulkanError::SwapchainOutOfDate) => None,
            Err(e) => return Err(fatal(FrameStage::Acquire, frame_number, e)),
        };
        let Some((image_index, acquire_suboptimal)) = acquired else {
            log::warn!("Swapchain out of date at acquire of frame {}, recreating", frame_number);
            self.frame_counter.advance();
            self.recreate_swapchain()
                .map_err(|e| fatal(FrameStage::Recreate, frame_number, e))?;
            return Ok(FrameOutcome::Skipped);
        };

        // The fence is only unsignaled once this frame is certain to submit
        device
            .reset_fence(slot.render_fence)
            .map_err(|e| fatal(FrameStage::Reset, frame_number, e))?;

        let index = image_index as usize;
        let (Some(&image), Some(&view)) = (swapchain.images.get(index), swapchain.image_views.get(index)) else {
            return Err(fatal(
                FrameStage::Acquire,
                frame_number,
                VulkanError::InvalidOperation {
                    reason: format!("acquired image {image_index} is outside the swapchain"),
                },
            ));
        };

        let command_buffer = slot.command_buffer;
        let render_fence = slot.render_fence;
        let acquire_semaphore = slot.acquire_semaphore;
        let render_semaphore = slot.render_semaphore;

        let target = PresentTarget {
            image,
            view,
            extent: swapchain.extent,
        };
        let mut frame = FrameContext::new(
            CommandContext::new(device, command_buffer),
            frame_number,
            image_index,
            draw_image.image(),
            draw_image.view(),
            draw_image.descriptor_set(),
            draw_image.draw_extent(swapchain.extent),
            &mut slot.deletion_queue,
        );
        Self::record_frame(&mut frame, target, background, overlay)
            .map_err(|e| fatal(FrameStage::Record, frame_number, e))?;

        device
            .queue_submit(&Submission {
                command_buffer,
                wait: Some((acquire_semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
                signal: Some(render_semaphore),
                fence: render_fence,
            })
            .map_err(|e| fatal(FrameStage::Submit, frame_number, e))?;

        let needs_recreate = match device.queue_present(swapchain.swapchain, image_index, render_semaphore) {
            Ok(present_suboptimal) => present_suboptimal || acquire_suboptimal,
            Err(VulkanError::SwapchainOutOfDate) => true,
            Err(e) => return Err(fatal(FrameStage::Present, frame_number, e)),
        };

        self.frame_counter.advance();

        if needs_recreate {
            log::warn!("Swapchain stale after frame {}, recreating", frame_number);
            let rebuilt = self
                .recreate_swapchain()
                .map_err(|e| fatal(FrameStage::Recreate, frame_number, e))?;
            if rebuilt {
                return Ok(FrameOutcome::PresentedAndRecreated);
            }
        }
        Ok(FrameOutcome::Presented)
    }

    fn record_frame(
        frame: &mut FrameContext<'_>,
        target: PresentTarget,
        background: &mut dyn BackgroundPass,
        overlay: Option<&mut (dyn OverlayPass + '_)>,
    ) -> VulkanResult<()> {
        let commands = frame.commands;
        let device = commands.device();
        device.begin_command_buffer(commands.command_buffer())?;

        commands.transition_image(frame.image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
        background.record(frame)?;

        commands.transition_image(
            frame.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        commands.transition_image(
            target.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        commands.blit(frame.image, target.image, frame.extent, target.extent);

        commands.transition_image(
            target.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        if let Some(overlay) = overlay {
            overlay.record(&commands, target.view, target.extent)?;
        }

        commands.transition_image(
            target.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        device.end_command_buffer(commands.command_buffer())
    }

    /// Rebuild the swapchain for the window extent, creating the draw image on first use
    ///
    /// Returns `false` without touching the swapchain when the surface itself reports zero
    /// area; drawing is then suspended and the rebuild stays pending.
    fn recreate_swapchain(&mut self) -> VulkanResult<bool> {
        self.device.wait_idle()?;

        // u32::MAX means the surface lets the swapchain pick its extent
        let current = self.device.surface_support()?.capabilities.current_extent;
        if current.width != u32::MAX && (current.width == 0 || current.height == 0) {
            log::info!("Surface reports zero area, postponing swapchain rebuild");
            self.suspend();
            self.resize_pending = true;
            return Ok(false);
        }

        let extent = self.swapchain.recreate(&self.device, self.window_extent)?.extent;
        self.resize_pending = false;

        if self.draw_image.is_none() {
            self.draw_image = Some(DrawImage::new(
                &self.device,
                extent,
                &mut self.descriptors,
                &mut self.global_deletion,
            )?);
        }
        Ok(true)
    }

    /// React to new framebuffer dimensions
    ///
    /// Zero area suspends drawing; the next non-zero size rebuilds the swapchain on the
    /// following frame and resumes.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.suspend();
            return;
        }
        let extent = vk::Extent2D { width, height };
        if !self.suspended && !self.resize_pending && extent == self.window_extent {
            return;
        }
        log::debug!("Resize to {}x{}", width, height);
        if self.suspended {
            log::info!("Window has area again, resuming rendering");
        }
        self.window_extent = extent;
        self.suspended = false;
        self.resize_pending = true;
    }

    /// Stop drawing until the next non-zero resize
    pub fn suspend(&mut self) {
        if !self.suspended {
            log::info!("Window has zero area, suspending rendering");
        }
        self.suspended = true;
    }

    /// True while drawing is suspended
    pub const fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Frames started so far
    pub const fn frame_number(&self) -> u64 {
        self.frame_counter.value()
    }

    /// Current window extent
    pub const fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    /// Current swapchain, if one exists
    pub const fn swapchain(&self) -> Option<&SwapchainState> {
        self.swapchain.state()
    }

    /// The offscreen draw image, once a swapchain has existed
    pub const fn draw_image(&self) -> Option<&DrawImage> {
        self.draw_image.as_ref()
    }

    /// The GPU device
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Release `resource` once the most recently submitted frame has finished on the GPU
    pub fn defer_release(&mut self, resource: GpuResource) {
        self.frames
            .slot_mut(self.frame_counter.previous())
            .deletion_queue
            .push(resource);
    }

    /// Release `resource` at shutdown
    pub fn defer_release_global(&mut self, resource: GpuResource) {
        self.global_deletion.push(resource);
    }

    /// Create a descriptor set layout owned by the renderer
    pub fn create_descriptor_layout(&mut self, builder: DescriptorSetLayoutBuilder) -> VulkanResult<DescriptorLayout> {
        let layout = builder.build(&self.device)?;
        self.global_deletion.push(layout.as_resource());
        Ok(layout)
    }

    /// Allocate a descriptor set from the renderer's pool
    pub fn allocate_descriptor_set(&mut self, layout: &DescriptorLayout) -> VulkanResult<vk::DescriptorSet> {
        self.descriptors.allocate(&self.device, layout)
    }

    /// Idle the device and return every descriptor set to the pool
    ///
    /// The draw image gets a freshly written set; sets handed out earlier are invalid.
    pub fn reset_descriptor_sets(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()?;
        self.descriptors.reset_pool(&self.device)?;
        if let Some(draw_image) = self.draw_image.as_mut() {
            draw_image.rebind(&self.device, &mut self.descriptors)?;
        }
        Ok(())
    }

    /// The renderer's descriptor allocator
    pub const fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    /// Run `record` on the immediate channel and block until the GPU finishes it
    pub fn immediate_submit<F>(&mut self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&CommandContext<'_>) -> VulkanResult<()>,
    {
        self.immediate.submit_and_wait(&self.device, record)
    }

    /// Release every GPU object the renderer owns. Later calls do nothing.
    ///
    /// Order: idle the device, flush per-slot queues, destroy the swapchain, destroy the
    /// descriptor pool, flush the global queue.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down renderer after {} frames", self.frame_counter.value());

        if let Err(err) = self.device.wait_idle() {
            log::error!("Device did not go idle during shutdown: {}", err);
        }
        for slot in self.frames.slots_mut() {
            slot.deletion_queue.flush(&self.device);
        }
        self.swapchain.destroy(&self.device);
        self.descriptors.destroy_pool(&self.device);
        self.draw_image = None;
        self.global_deletion.flush(&self.device);
    }
}

impl<D: GpuDevice> Drop for VulkanRenderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
