//! # Rendering System
//!
//! Frame pacing and GPU resource lifecycle for a single graphics queue presenting to a
//! single surface.
//!
//! ## Architecture
//!
//! - **Device seam**: every GPU call goes through [`backends::vulkan::GpuDevice`]
//! - **State**: swapchain, frame ring and deletion queues
//! - **Resources**: descriptor layouts, pools and writers
//! - **Rendering**: command helpers, passes and the immediate-submission channel
//! - **Renderer**: the per-frame state machine tying the pieces together

/// Graphics backend implementations
pub mod backends;
