//! Offscreen draw target
//!
//! Backgrounds render into an engine-owned HDR image, which each frame blits onto the
//! acquired swapchain image. The image keeps the size it was created with; a frame draws
//! into the part that fits the current swapchain. Image, view and descriptor layout are
//! released through the global deletion queue.

use ash::vk;

use crate::render::backends::vulkan::device::{GpuDevice, GpuResource, ImageRequest};
use crate::render::backends::vulkan::{
    DeletionQueue, DescriptorAllocator, DescriptorLayout, DescriptorSetLayoutBuilder,
    DescriptorSetWriter, VulkanError, VulkanResult,
};

/// Texel format of the draw image
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Usages the draw image is created with: blit source, clears, compute writes, color output
pub const DRAW_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// Binding of the storage image in [`DrawImage::descriptor_set`]
pub const DRAW_IMAGE_BINDING: u32 = 0;

/// The offscreen image a frame is rendered into before presentation
#[derive(Debug, Clone)]
pub struct DrawImage {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    layout: DescriptorLayout,
    descriptor_set: vk::DescriptorSet,
}

impl DrawImage {
    /// Allocate the image at `extent` with its view and a compute storage-image set
    ///
    /// Every object is registered in `global` as soon as it exists, so a later failure
    /// still releases what was created.
    pub fn new(
        device: &dyn GpuDevice,
        extent: vk::Extent2D,
        descriptors: &mut DescriptorAllocator,
        global: &mut DeletionQueue,
    ) -> VulkanResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("draw image needs a non-zero extent, got {}x{}", extent.width, extent.height),
            });
        }
        log::debug!("Creating {}x{} draw image ({:?})", extent.width, extent.height, DRAW_IMAGE_FORMAT);

        let image = device.create_image(&ImageRequest {
            format: DRAW_IMAGE_FORMAT,
            extent,
            usage: DRAW_IMAGE_USAGE,
        })?;
        global.push(GpuResource::Image(image));
        let view = device.create_image_view(image, DRAW_IMAGE_FORMAT)?;
        global.push(GpuResource::ImageView(view));

        let layout = DescriptorSetLayoutBuilder::new()
            .add_storage_image(DRAW_IMAGE_BINDING, vk::ShaderStageFlags::COMPUTE)
            .build(device)?;
        global.push(layout.as_resource());

        let descriptor_set = Self::bind(device, descriptors, &layout, view)?;
        Ok(Self {
            image,
            view,
            extent,
            layout,
            descriptor_set,
        })
    }

    fn bind(
        device: &dyn GpuDevice,
        descriptors: &mut DescriptorAllocator,
        layout: &DescriptorLayout,
        view: vk::ImageView,
    ) -> VulkanResult<vk::DescriptorSet> {
        let set = descriptors.allocate(device, layout)?;
        DescriptorSetWriter::new()
            .write_storage_image(set, DRAW_IMAGE_BINDING, view)
            .update(device);
        Ok(set)
    }

    /// Allocate and write a fresh set after the allocator's pool was reset
    pub fn rebind(&mut self, device: &dyn GpuDevice, descriptors: &mut DescriptorAllocator) -> VulkanResult<()> {
        self.descriptor_set = Self::bind(device, descriptors, &self.layout, self.view)?;
        Ok(())
    }

    /// The image handle
    pub const fn image(&self) -> vk::Image {
        self.image
    }

    /// View over the whole image
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size the image was created with
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout of [`Self::descriptor_set`]
    pub const fn descriptor_layout(&self) -> &DescriptorLayout {
        &self.layout
    }

    /// Set exposing the image as a storage image at [`DRAW_IMAGE_BINDING`]
    pub const fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Region drawn each frame: the image's extent clipped to `target`
    pub fn draw_extent(&self, target: vk::Extent2D) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width.min(target.width),
            height: self.extent.height.min(target.height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolSizeRatio;
    use crate::core::config::DescriptorKind;
    use crate::render::backends::vulkan::mock::{MockDevice, Op};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn allocator(device: &MockDevice, sets: u32) -> DescriptorAllocator {
        let mut descriptors = DescriptorAllocator::new();
        descriptors
            .init_pool(device, sets, &[PoolSizeRatio::new(DescriptorKind::StorageImage, 1.0)])
            .unwrap();
        descriptors
    }

    #[test]
    fn test_new_allocates_image_and_writes_descriptor() {
        let device = MockDevice::new();
        let mut descriptors = allocator(&device, 4);
        let mut global = DeletionQueue::new();

        let draw = DrawImage::new(&device, extent(320, 240), &mut descriptors, &mut global).unwrap();
        assert_eq!(draw.extent(), extent(320, 240));
        assert!(device.ops().contains(&Op::CreateImage {
            format: DRAW_IMAGE_FORMAT,
            extent: extent(320, 240),
            usage: DRAW_IMAGE_USAGE,
        }));
        assert_eq!(device.count(|op| *op == Op::UpdateDescriptorSets(1)), 1);
        assert_eq!(descriptors.sets_remaining(), 3);
        assert_eq!(descriptors.descriptors_remaining(DescriptorKind::StorageImage), 3);

        // View and layout go before the image
        global.flush(&device);
        assert_eq!(
            device.released(),
            vec![
                draw.descriptor_layout().as_resource(),
                GpuResource::ImageView(draw.view()),
                GpuResource::Image(draw.image()),
            ]
        );
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let device = MockDevice::new();
        let mut descriptors = allocator(&device, 1);
        let mut global = DeletionQueue::new();

        let result = DrawImage::new(&device, extent(0, 240), &mut descriptors, &mut global);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert!(global.is_empty());
    }

    #[test]
    fn test_exhausted_pool_still_registers_created_objects() {
        let device = MockDevice::new();
        let mut descriptors = allocator(&device, 1);
        let mut global = DeletionQueue::new();
        let layout = DescriptorSetLayoutBuilder::new()
            .add_storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .build(&device)
            .unwrap();
        descriptors.allocate(&device, &layout).unwrap();

        let result = DrawImage::new(&device, extent(8, 8), &mut descriptors, &mut global);
        assert!(matches!(result, Err(VulkanError::DescriptorPoolExhausted { .. })));
        assert_eq!(global.len(), 3);
    }

    #[test]
    fn test_draw_extent_clips_to_target() {
        let device = MockDevice::new();
        let mut descriptors = allocator(&device, 1);
        let mut global = DeletionQueue::new();
        let draw = DrawImage::new(&device, extent(800, 600), &mut descriptors, &mut global).unwrap();

        assert_eq!(draw.draw_extent(extent(1920, 1080)), extent(800, 600));
        assert_eq!(draw.draw_extent(extent(400, 900)), extent(400, 600));
    }

    #[test]
    fn test_rebind_after_pool_reset() {
        let device = MockDevice::new();
        let mut descriptors = allocator(&device, 1);
        let mut global = DeletionQueue::new();
        let mut draw = DrawImage::new(&device, extent(16, 16), &mut descriptors, &mut global).unwrap();
        let first = draw.descriptor_set();

        descriptors.reset_pool(&device).unwrap();
        draw.rebind(&device, &mut descriptors).unwrap();
        assert_ne!(draw.descriptor_set(), first);
        assert_eq!(descriptors.sets_remaining(), 0);
        assert_eq!(device.count(|op| *op == Op::UpdateDescriptorSets(1)), 2);
    }
}
