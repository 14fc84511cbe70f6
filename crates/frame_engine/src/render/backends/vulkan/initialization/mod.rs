// Vulkan initialization components

pub mod context;
pub mod vulkan_device;

pub use context::*;
pub use vulkan_device::*;
