//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules, all speaking to
//! the GPU through the [`GpuDevice`] seam.

/// Vulkan initialization types (device context, ash-backed device)
pub mod initialization;

/// Vulkan resource management (descriptor layouts, pools, writers, draw image)
pub mod resources;

/// Vulkan rendering operations (command helpers, passes, immediate submission)
pub mod rendering;

/// Vulkan state management (swapchain, frame ring, deletion queues)
pub mod state;

/// GPU device seam
pub mod device;

/// Per-frame draw orchestration
pub mod renderer;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main renderer
pub use renderer::{FatalFrameError, FrameOutcome, FrameStage, VulkanRenderer};

// Re-export device seam
pub use device::{
    GpuDevice, GpuResource, ImageRequest, Submission, SurfaceSupport, SwapchainRequest,
};

// Re-export core initialization types
pub use initialization::context::{DeviceContext, VulkanError, VulkanResult};
pub use initialization::vulkan_device::VulkanDevice;

// Re-export resource types
pub use resources::descriptor_set::{
    DescriptorAllocator, DescriptorLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter,
};
pub use resources::draw_image::{DrawImage, DRAW_IMAGE_FORMAT, DRAW_IMAGE_USAGE};

// Re-export rendering types
pub use rendering::commands::CommandContext;
pub use rendering::immediate::ImmediateChannel;
pub use rendering::passes::{BackgroundPass, ClearBackground, FrameContext, OverlayPass};

// Re-export state types
pub use state::deletion_queue::DeletionQueue;
pub use state::frame_ring::{FrameCounter, FrameRing, FrameSlot, FRAME_OVERLAP};
pub use state::swapchain::{SwapchainManager, SwapchainPreferences, SwapchainState};
