//! Swapchain lifecycle
//!
//! Builds the presentable image chain for the surface, tears it down and rebuilds it when
//! the window changes size. Swapchain images belong to the presentation engine; only the
//! views and the chain itself are released here.

use ash::vk;

use crate::core::config::RendererConfig;
use crate::render::backends::vulkan::device::{GpuDevice, GpuResource, SurfaceSupport, SwapchainRequest};
use crate::render::backends::vulkan::{DeletionQueue, VulkanError, VulkanResult};

/// Usages the renderer records into swapchain images with
pub const REQUIRED_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// A live swapchain and its per-image views
#[derive(Debug, Clone)]
pub struct SwapchainState {
    /// Swapchain handle
    pub swapchain: vk::SwapchainKHR,
    /// Image format
    pub format: vk::Format,
    /// Image color space
    pub color_space: vk::ColorSpaceKHR,
    /// Pixel extent
    pub extent: vk::Extent2D,
    /// Present mode in use
    pub present_mode: vk::PresentModeKHR,
    /// Images in presentation-index order
    pub images: Vec<vk::Image>,
    /// One view per image, same order
    pub image_views: Vec<vk::ImageView>,
}

impl SwapchainState {
    /// Number of images in the chain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// Format and present mode the manager asks for first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    /// Preferred format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Preferred present mode; FIFO is used when unavailable
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self::from_config(&RendererConfig::default())
    }
}

impl SwapchainPreferences {
    /// Preferences from renderer configuration
    pub const fn from_config(config: &RendererConfig) -> Self {
        Self {
            surface_format: config.color_format.to_vk(),
            present_mode: config.present_mode.to_vk(),
        }
    }
}

/// Owns at most one [`SwapchainState`] at a time
#[derive(Debug)]
pub struct SwapchainManager {
    preferences: SwapchainPreferences,
    state: Option<SwapchainState>,
}

impl SwapchainManager {
    /// Create a manager with no swapchain yet
    pub const fn new(preferences: SwapchainPreferences) -> Self {
        Self {
            preferences,
            state: None,
        }
    }

    /// Current swapchain, if one exists
    pub const fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    /// Build a swapchain for `extent`
    ///
    /// Fails if a swapchain already exists; call [`Self::recreate`] instead.
    pub fn create(&mut self, device: &dyn GpuDevice, extent: vk::Extent2D) -> VulkanResult<&SwapchainState> {
        if self.state.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "swapchain already exists; destroy it before creating another".to_string(),
            });
        }

        let support = device.surface_support()?;
        let request = self.build_request(&support, extent)?;
        log::debug!(
            "Creating swapchain {}x{} ({} images, {:?}, {:?})",
            request.extent.width,
            request.extent.height,
            request.min_image_count,
            request.surface_format.format,
            request.present_mode
        );

        let swapchain = device.create_swapchain(&request)?;
        let mut cleanup = DeletionQueue::new();
        cleanup.push(GpuResource::Swapchain(swapchain));

        let built = Self::create_views(device, swapchain, request.surface_format.format, &mut cleanup);
        let (images, image_views) = match built {
            Ok(built) => built,
            Err(err) => {
                cleanup.flush(device);
                return Err(err);
            }
        };

        log::debug!("Swapchain created with {} images", images.len());
        Ok(&*self.state.insert(SwapchainState {
            swapchain,
            format: request.surface_format.format,
            color_space: request.surface_format.color_space,
            extent: request.extent,
            present_mode: request.present_mode,
            images,
            image_views,
        }))
    }

    /// Release the views, then the chain. No-op without a swapchain.
    ///
    /// The caller guarantees no in-flight work references the swapchain.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        let Some(state) = self.state.take() else {
            return;
        };
        log::debug!("Destroying swapchain {}x{}", state.extent.width, state.extent.height);

        let mut queue = DeletionQueue::new();
        queue.push(GpuResource::Swapchain(state.swapchain));
        for view in state.image_views {
            queue.push(GpuResource::ImageView(view));
        }
        queue.flush(device);
    }

    /// Destroy the current swapchain and build one for `extent`
    pub fn recreate(&mut self, device: &dyn GpuDevice, extent: vk::Extent2D) -> VulkanResult<&SwapchainState> {
        log::debug!("Recreating swapchain for {}x{}", extent.width, extent.height);
        self.destroy(device);
        self.create(device, extent)
    }

    fn build_request(&self, support: &SurfaceSupport, extent: vk::Extent2D) -> VulkanResult<SwapchainRequest> {
        let capabilities = &support.capabilities;
        if capabilities.min_image_count == 0
            || capabilities.max_image_extent.width == 0
            || capabilities.max_image_extent.height == 0
        {
            return Err(VulkanError::SurfaceUnsupported(format!(
                "degenerate surface capabilities: {capabilities:?}"
            )));
        }
        if !capabilities.supported_usage_flags.contains(REQUIRED_IMAGE_USAGE) {
            return Err(VulkanError::SurfaceUnsupported(format!(
                "surface usage {:?} lacks {:?}",
                capabilities.supported_usage_flags, REQUIRED_IMAGE_USAGE
            )));
        }
        let surface_format = choose_surface_format(&support.formats, self.preferences.surface_format)
            .ok_or_else(|| VulkanError::SurfaceUnsupported("surface reports no formats".to_string()))?;

        Ok(SwapchainRequest {
            min_image_count: choose_image_count(capabilities),
            surface_format,
            extent: choose_extent(capabilities, extent),
            present_mode: choose_present_mode(&support.present_modes, self.preferences.present_mode),
            pre_transform: capabilities.current_transform,
            image_usage: REQUIRED_IMAGE_USAGE,
        })
    }

    fn create_views(
        device: &dyn GpuDevice,
        swapchain: vk::SwapchainKHR,
        format: vk::Format,
        cleanup: &mut DeletionQueue,
    ) -> VulkanResult<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let images = device.swapchain_images(swapchain)?;
        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view = device.create_image_view(image, format)?;
            cleanup.push(GpuResource::ImageView(view));
            views.push(view);
        }
        Ok((images, views))
    }
}

/// Pick the preferred format when available, else the surface's first
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        // A lone UNDEFINED entry means the surface takes any format
        [only] if only.format == vk::Format::UNDEFINED => Some(preferred),
        _ => formats
            .iter()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .or_else(|| formats.first())
            .copied(),
    }
}

/// Pick the preferred present mode when available, else FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's own extent when it dictates one, else clamp `requested` to its limits
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX && current.width > 0 && current.height > 0 {
        return current;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// One more than the minimum, capped by the maximum when the surface has one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::mock::{default_surface_support, MockDevice, Op};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_recreate_keeps_counts_and_takes_new_extent() {
        let device = MockDevice::new();
        let mut manager = SwapchainManager::new(SwapchainPreferences::default());
        let mut previous = manager.create(&device, extent(800, 600)).unwrap().clone();
        assert_eq!(previous.images.len(), previous.image_views.len());

        // (requested, expected): smallest surface, non-square, clamped to the 4096 maximum
        let cases = [
            (extent(1, 1), extent(1, 1)),
            (extent(300, 1200), extent(300, 1200)),
            (extent(9000, 5000), extent(4096, 4096)),
            (extent(5000, 720), extent(4096, 720)),
            (extent(1024, 768), extent(1024, 768)),
        ];
        for (requested, expected) in cases {
            let next = manager.recreate(&device, requested).unwrap().clone();
            assert_eq!(next.extent, expected, "requested {requested:?}");
            assert_eq!(next.image_count(), previous.image_count(), "requested {requested:?}");
            assert_eq!(next.images.len(), next.image_views.len());
            assert_ne!(next.swapchain, previous.swapchain);
            assert_eq!(
                device.count(|op| matches!(op, Op::CreateSwapchain { extent, .. } if *extent == expected)),
                1
            );

            // Old views go before the old chain
            let released = device.released();
            let chain_at = released
                .iter()
                .position(|r| *r == GpuResource::Swapchain(previous.swapchain))
                .unwrap();
            for view in &previous.image_views {
                let view_at = released.iter().position(|r| *r == GpuResource::ImageView(*view)).unwrap();
                assert!(view_at < chain_at);
            }
            previous = next;
        }
        assert_eq!(device.count(|op| matches!(op, Op::CreateSwapchain { .. })), cases.len() + 1);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let device = MockDevice::new();
        let mut manager = SwapchainManager::new(SwapchainPreferences::default());
        manager.create(&device, extent(64, 64)).unwrap();
        assert!(matches!(
            manager.create(&device, extent(64, 64)),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_destroy_releases_views_then_chain() {
        let device = MockDevice::new();
        let mut manager = SwapchainManager::new(SwapchainPreferences::default());
        let state = manager.create(&device, extent(64, 64)).unwrap().clone();
        manager.destroy(&device);

        let released = device.released();
        assert_eq!(released.len(), state.image_views.len() + 1);
        assert_eq!(released.last(), Some(&GpuResource::Swapchain(state.swapchain)));
        assert!(manager.state().is_none());

        // Nothing left to destroy
        let before = device.op_count();
        manager.destroy(&device);
        assert_eq!(device.op_count(), before);
    }

    #[test]
    fn test_surface_without_formats_is_fatal() {
        let device = MockDevice::new();
        let mut support = default_surface_support();
        support.formats.clear();
        device.set_surface_support(support);

        let mut manager = SwapchainManager::new(SwapchainPreferences::default());
        assert!(matches!(
            manager.create(&device, extent(64, 64)),
            Err(VulkanError::SurfaceUnsupported(_))
        ));
        assert_eq!(device.count(|op| matches!(op, Op::CreateSwapchain { .. })), 0);
    }

    #[test]
    fn test_surface_without_transfer_dst_is_fatal() {
        let device = MockDevice::new();
        let mut support = default_surface_support();
        support.capabilities.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        device.set_surface_support(support);

        let mut manager = SwapchainManager::new(SwapchainPreferences::default());
        assert!(matches!(
            manager.create(&device, extent(64, 64)),
            Err(VulkanError::SurfaceUnsupported(_))
        ));
    }

    #[test]
    fn test_format_selection() {
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[], preferred), None);
        assert_eq!(choose_surface_format(&[other, preferred], preferred), Some(preferred));
        assert_eq!(choose_surface_format(&[other], preferred), Some(other));
        assert_eq!(choose_surface_format(&[undefined], preferred), Some(preferred));
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_clamped_only_when_surface_defers() {
        let mut capabilities = default_surface_support().capabilities;
        assert_eq!(choose_extent(&capabilities, extent(9000, 0)), extent(4096, 1));

        capabilities.current_extent = extent(640, 480);
        assert_eq!(choose_extent(&capabilities, extent(9000, 10)), extent(640, 480));
    }

    #[test]
    fn test_image_count_capped_by_maximum() {
        let mut capabilities = default_surface_support().capabilities;
        capabilities.min_image_count = 3;
        capabilities.max_image_count = 3;
        assert_eq!(choose_image_count(&capabilities), 3);

        capabilities.max_image_count = 0;
        assert_eq!(choose_image_count(&capabilities), 4);
    }
}
