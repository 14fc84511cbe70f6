// Vulkan resource management

pub mod descriptor_set;
pub mod draw_image;

pub use descriptor_set::*;
pub use draw_image::*;
