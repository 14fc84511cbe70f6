//! # Frame Engine
//!
//! The resource-lifecycle and frame-pacing core of a Vulkan renderer.
//!
//! ## Features
//!
//! - **Swapchain lifecycle**: creation, teardown and recreation on resize
//! - **Frame ring**: two frames in flight, each with its own command buffer and sync objects
//! - **Deletion queues**: deferred, LIFO destruction of GPU objects per frame slot and globally
//! - **Descriptor allocation**: ratio-sized pools with deterministic exhaustion
//! - **Immediate submission**: blocking one-shot GPU work outside the frame ring
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frame_engine::prelude::*;
//!
//! fn drive(context: DeviceContext, events: &mut dyn EventSource) -> Result<(), EngineError> {
//!     let config = EngineConfig::default();
//!     let device = VulkanDevice::new(context)?;
//!     let mut engine = Engine::new(config, device)?;
//!     let mut background = ClearBackground::default();
//!     engine.run(events, &mut background, None)?;
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Core engine modules
pub mod core;
pub mod config;
pub mod foundation;
pub mod render;

mod engine;

pub use engine::{Engine, EngineError, EventSource, WindowEvent};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        Engine, EngineError, EventSource, WindowEvent,
        config::{Config, ConfigError},
        core::config::{EngineConfig, LoggingConfig, RendererConfig, WindowConfig},
        render::backends::vulkan::{
            BackgroundPass, ClearBackground, CommandContext, DeletionQueue, DescriptorAllocator,
            DescriptorLayout, DescriptorSetLayoutBuilder, DeviceContext, DrawImage, FatalFrameError,
            FrameContext, FrameOutcome, GpuDevice, GpuResource, OverlayPass, VulkanDevice,
            VulkanError, VulkanRenderer, VulkanResult,
        },
    };
}
