// Vulkan state management

pub mod deletion_queue;
pub mod frame_ring;
pub mod swapchain;

pub use deletion_queue::*;
pub use frame_ring::*;
pub use swapchain::*;
