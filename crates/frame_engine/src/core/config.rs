//! # Unified Configuration System
//!
//! All configuration consumed by the frame engine, grouped by subsystem:
//!
//! - **Window Config**: initial window title and size
//! - **Renderer Config**: GPU wait timeouts, swapchain preferences, descriptor pool sizing
//! - **Logging Config**: default log filter when `RUST_LOG` is unset
//!
//! Every struct is `#[serde(default)]`, so a configuration file only needs the keys it
//! overrides.

use ash::vk;
use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Number of frame slots the renderer cycles through
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Top-level configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Reject values that parse but cannot drive the renderer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.renderer.validate()
    }
}

/// Window creation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in pixels
    pub width: u32,
    /// Initial height in pixels
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 1700,
            height: 900,
        }
    }
}

/// Renderer timing, swapchain and descriptor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Maximum wait on a frame slot's fence, in nanoseconds
    pub frame_timeout_ns: u64,
    /// Maximum wait for the next presentable image, in nanoseconds
    pub acquire_timeout_ns: u64,
    /// Maximum wait for an immediate submission, in nanoseconds
    pub immediate_timeout_ns: u64,
    /// Sleep between event polls while the window has zero area
    pub minimized_poll_interval_ms: u64,
    /// Swapchain color format to prefer
    pub color_format: ColorFormat,
    /// Present mode to prefer (FIFO is the fallback)
    pub present_mode: PresentModePreference,
    /// Descriptor pool sizing
    pub descriptors: DescriptorPoolConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ns: 1_000_000_000,
            acquire_timeout_ns: 100_000_000_000,
            immediate_timeout_ns: 999_999_999_999,
            minimized_poll_interval_ms: 100,
            color_format: ColorFormat::default(),
            present_mode: PresentModePreference::default(),
            descriptors: DescriptorPoolConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Validate timeouts and descriptor sizing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_timeout_ns == 0 || self.acquire_timeout_ns == 0 || self.immediate_timeout_ns == 0 {
            return Err(ConfigError::Invalid("GPU wait timeouts must be non-zero".to_string()));
        }
        if self.descriptors.expected_sets == 0 {
            return Err(ConfigError::Invalid("descriptor pool expected_sets must be non-zero".to_string()));
        }
        if let Some(bad) = self.descriptors.ratios.iter().find(|r| !(r.ratio >= 0.0 && r.ratio.is_finite())) {
            return Err(ConfigError::Invalid(format!(
                "descriptor ratio for {:?} must be a non-negative number, got {}",
                bad.kind, bad.ratio
            )));
        }
        Ok(())
    }
}

/// Descriptor pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Number of descriptor sets the global pool is sized for
    pub expected_sets: u32,
    /// Descriptors of each kind per expected set
    pub ratios: Vec<PoolSizeRatio>,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            expected_sets: 10,
            ratios: vec![PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)],
        }
    }
}

/// One (descriptor kind, ratio) pair used to size a pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor kind
    pub kind: DescriptorKind,
    /// Descriptors of this kind per expected set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Create a new ratio entry
    pub const fn new(kind: DescriptorKind, ratio: f32) -> Self {
        Self { kind, ratio }
    }

    /// Descriptor count this ratio yields for a pool sized for `expected_sets`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn descriptor_count(&self, expected_sets: u32) -> u32 {
        (self.ratio * expected_sets as f32) as u32
    }
}

/// Descriptor kinds the allocator can size pools for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// Standalone sampler
    Sampler,
    /// Combined image + sampler
    CombinedImageSampler,
    /// Sampled image
    SampledImage,
    /// Storage image
    StorageImage,
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
}

impl DescriptorKind {
    /// Matching Vulkan descriptor type
    pub const fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::Sampler => vk::DescriptorType::SAMPLER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// Kind for a Vulkan descriptor type, if the allocator supports it
    pub fn from_vk(ty: vk::DescriptorType) -> Option<Self> {
        match ty {
            vk::DescriptorType::SAMPLER => Some(Self::Sampler),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => Some(Self::CombinedImageSampler),
            vk::DescriptorType::SAMPLED_IMAGE => Some(Self::SampledImage),
            vk::DescriptorType::STORAGE_IMAGE => Some(Self::StorageImage),
            vk::DescriptorType::UNIFORM_BUFFER => Some(Self::UniformBuffer),
            vk::DescriptorType::STORAGE_BUFFER => Some(Self::StorageBuffer),
            _ => None,
        }
    }
}

/// Swapchain color formats the renderer knows how to prefer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// `B8G8R8A8_UNORM`, sRGB non-linear color space
    #[default]
    Bgra8Unorm,
    /// `B8G8R8A8_SRGB`, sRGB non-linear color space
    Bgra8Srgb,
    /// `R8G8B8A8_UNORM`, sRGB non-linear color space
    Rgba8Unorm,
}

impl ColorFormat {
    /// Vulkan surface format this preference maps to
    pub const fn to_vk(self) -> vk::SurfaceFormatKHR {
        let format = match self {
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        };
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

/// Present mode preference
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Vsync, never tears
    #[default]
    Fifo,
    /// Vsync that may tear when late
    FifoRelaxed,
    /// Low latency triple buffering
    Mailbox,
    /// No vsync
    Immediate,
}

impl PresentModePreference {
    /// Matching Vulkan present mode
    pub const fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Fifo => vk::PresentModeKHR::FIFO,
            Self::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub default_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
        }
    }
}
