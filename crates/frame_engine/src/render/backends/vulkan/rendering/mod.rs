// Vulkan rendering operations

pub mod commands;
pub mod immediate;
pub mod passes;

pub use commands::*;
pub use immediate::*;
pub use passes::*;
