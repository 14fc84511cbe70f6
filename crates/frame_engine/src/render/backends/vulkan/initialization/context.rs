//! Vulkan device context
//!
//! The handles the frame engine consumes from the setup-time bootstrap: a logical device,
//! one graphics queue able to present, and the surface it presents to. The engine never
//! creates or destroys these; whoever built the context tears it down after the engine
//! has shut down.

use ash::extensions::khr::Surface;
use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A bounded GPU wait expired
    #[error("Timed out after {timeout_ns} ns waiting on {operation}")]
    Timeout {
        /// The wait that expired
        operation: &'static str,
        /// The bound that was exceeded
        timeout_ns: u64,
    },

    /// The swapchain no longer matches the surface
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// The surface cannot back a swapchain the renderer can use
    #[error("Surface unsupported: {0}")]
    SurfaceUnsupported(String),

    /// The descriptor pool budget cannot satisfy an allocation
    #[error("Descriptor pool exhausted: requested {requested} {kind:?}, {remaining} remaining")]
    DescriptorPoolExhausted {
        /// Descriptor type that ran out, `None` when the set budget ran out
        kind: Option<vk::DescriptorType>,
        /// Amount the allocation needed
        requested: u32,
        /// Amount left in the pool
        remaining: u32,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Translate a raw result, keeping swapchain staleness distinguishable
pub(crate) fn map_vk_result(result: vk::Result) -> VulkanError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => VulkanError::SwapchainOutOfDate,
        other => VulkanError::Api(other),
    }
}

/// Handles produced by device bootstrap and borrowed by the engine
#[derive(Clone)]
pub struct DeviceContext {
    /// Vulkan instance
    pub instance: ash::Instance,
    /// Logical device
    pub device: ash::Device,
    /// Physical device backing `device`
    pub physical_device: vk::PhysicalDevice,
    /// Presentation surface
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader
    pub surface_loader: Surface,
    /// The graphics queue, able to present to `surface`
    pub graphics_queue: vk::Queue,
    /// Family index of `graphics_queue`
    pub graphics_queue_family: u32,
}

impl DeviceContext {
    /// Reject a context whose handles were never filled in
    pub fn validate(&self) -> VulkanResult<()> {
        use ash::vk::Handle;

        let missing = [
            ("logical device", self.device.handle().as_raw()),
            ("physical device", self.physical_device.as_raw()),
            ("surface", self.surface.as_raw()),
            ("graphics queue", self.graphics_queue.as_raw()),
        ]
        .into_iter()
        .filter(|(_, raw)| *raw == 0)
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(VulkanError::InitializationFailed(format!(
                "device context is missing: {}",
                missing.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.device.handle())
            .field("physical_device", &self.physical_device)
            .field("surface", &self.surface)
            .field("graphics_queue", &self.graphics_queue)
            .field("graphics_queue_family", &self.graphics_queue_family)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_is_distinguished() {
        assert!(matches!(
            map_vk_result(vk::Result::ERROR_OUT_OF_DATE_KHR),
            VulkanError::SwapchainOutOfDate
        ));
        assert!(matches!(
            map_vk_result(vk::Result::ERROR_DEVICE_LOST),
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)
        ));
    }

    #[test]
    fn test_timeout_message_names_the_wait() {
        let err = VulkanError::Timeout { operation: "frame fence", timeout_ns: 5 };
        assert_eq!(err.to_string(), "Timed out after 5 ns waiting on frame fence");
    }
}
