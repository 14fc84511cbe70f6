//! Descriptor set layouts, pooled allocation and writes
//!
//! Sets are carved from one ratio-sized pool and never freed individually; the whole pool is
//! reset or destroyed at once. The allocator mirrors the pool's budget on the CPU so an
//! allocation that would not fit fails the same way on every driver, before the driver is
//! asked.

use std::collections::HashMap;

use ash::vk;

use crate::core::config::{DescriptorKind, PoolSizeRatio};
use crate::render::backends::vulkan::device::{GpuDevice, GpuResource};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Default, Clone)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding of `kind`
    pub fn add_binding(mut self, binding: u32, kind: DescriptorKind, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(kind.to_vk())
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::StorageImage, stage_flags)
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::UniformBuffer, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::StorageBuffer, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::CombinedImageSampler, stage_flags)
    }

    /// Build the descriptor set layout
    ///
    /// The returned layout is not registered anywhere; its owner must release it.
    pub fn build(self, device: &dyn GpuDevice) -> VulkanResult<DescriptorLayout> {
        let handle = device.create_descriptor_set_layout(&self.bindings)?;
        Ok(DescriptorLayout {
            handle,
            bindings: self.bindings,
        })
    }
}

/// A created layout together with the bindings it was built from
#[derive(Debug, Clone)]
pub struct DescriptorLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorLayout {
    /// Get the Vulkan descriptor set layout handle
    pub const fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Descriptors of each type one set with this layout consumes
    pub fn requirements(&self) -> HashMap<vk::DescriptorType, u32> {
        let mut needs = HashMap::new();
        for binding in &self.bindings {
            *needs.entry(binding.descriptor_type).or_insert(0) += binding.descriptor_count;
        }
        needs
    }

    /// Deferred release of the layout
    pub const fn as_resource(&self) -> GpuResource {
        GpuResource::DescriptorSetLayout(self.handle)
    }
}

#[derive(Debug, Default)]
struct PoolBudget {
    sets_remaining: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    remaining: HashMap<vk::DescriptorType, u32>,
}

/// Pool-backed descriptor set allocator
#[derive(Debug, Default)]
pub struct DescriptorAllocator {
    pool: Option<vk::DescriptorPool>,
    max_sets: u32,
    budget: PoolBudget,
}

impl DescriptorAllocator {
    /// Create an allocator with no pool yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pool: `expected_sets` sets, and `floor(ratio * expected_sets)` descriptors per kind
    pub fn init_pool(
        &mut self,
        device: &dyn GpuDevice,
        expected_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> VulkanResult<()> {
        if self.pool.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "descriptor pool already initialized".to_string(),
            });
        }

        let mut capacity: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for ratio in ratios {
            *capacity.entry(ratio.kind.to_vk()).or_insert(0) += ratio.descriptor_count(expected_sets);
        }
        let pool_sizes: Vec<_> = capacity
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(ty, count)| {
                vk::DescriptorPoolSize::builder()
                    .ty(*ty)
                    .descriptor_count(*count)
                    .build()
            })
            .collect();
        if expected_sets == 0 || pool_sizes.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "descriptor pool for {expected_sets} sets with ratios {ratios:?} would hold nothing"
                ),
            });
        }

        log::debug!(
            "Creating descriptor pool: {} sets, sizes {:?}",
            expected_sets,
            pool_sizes.iter().map(|s| (s.ty, s.descriptor_count)).collect::<Vec<_>>()
        );
        let pool = device.create_descriptor_pool(expected_sets, &pool_sizes)?;

        self.pool = Some(pool);
        self.max_sets = expected_sets;
        self.budget = PoolBudget {
            sets_remaining: expected_sets,
            remaining: capacity.clone(),
            capacity,
        };
        Ok(())
    }

    /// Allocate one set with `layout`
    ///
    /// Fails with [`VulkanError::DescriptorPoolExhausted`] when the set budget or the
    /// budget of any descriptor type the layout needs is short.
    pub fn allocate(&mut self, device: &dyn GpuDevice, layout: &DescriptorLayout) -> VulkanResult<vk::DescriptorSet> {
        let pool = self.pool.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "descriptor pool not initialized".to_string(),
        })?;

        if self.budget.sets_remaining == 0 {
            return Err(VulkanError::DescriptorPoolExhausted {
                kind: None,
                requested: 1,
                remaining: 0,
            });
        }
        let needs = layout.requirements();
        for (&kind, &requested) in &needs {
            let remaining = self.budget.remaining.get(&kind).copied().unwrap_or(0);
            if requested > remaining {
                return Err(VulkanError::DescriptorPoolExhausted {
                    kind: Some(kind),
                    requested,
                    remaining,
                });
            }
        }

        let set = device.allocate_descriptor_set(pool, layout.handle())?;

        self.budget.sets_remaining -= 1;
        for (kind, requested) in needs {
            if let Some(remaining) = self.budget.remaining.get_mut(&kind) {
                *remaining -= requested;
            }
        }
        Ok(set)
    }

    /// Return every set to the pool; previously allocated sets become invalid
    pub fn reset_pool(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        let Some(pool) = self.pool else {
            return Ok(());
        };
        device.reset_descriptor_pool(pool)?;
        self.budget.sets_remaining = self.max_sets;
        self.budget.remaining = self.budget.capacity.clone();
        Ok(())
    }

    /// Release the pool and every set in it
    pub fn destroy_pool(&mut self, device: &dyn GpuDevice) {
        if let Some(pool) = self.pool.take() {
            log::debug!("Destroying descriptor pool");
            device.release(GpuResource::DescriptorPool(pool));
        }
        self.max_sets = 0;
        self.budget = PoolBudget::default();
    }

    /// Sets still available before the pool is exhausted
    pub const fn sets_remaining(&self) -> u32 {
        self.budget.sets_remaining
    }

    /// Descriptors of `kind` still available
    pub fn descriptors_remaining(&self, kind: DescriptorKind) -> u32 {
        self.budget.remaining.get(&kind.to_vk()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingWrite {
    Image {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    Buffer {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
}

/// Batches descriptor writes and applies them in one update
///
/// Info structs are laid out only when [`Self::update`] runs, so the pointers the driver
/// reads stay valid for the whole call.
#[derive(Debug, Default, Clone)]
pub struct DescriptorSetWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a storage image in `GENERAL` layout
    pub fn write_storage_image(self, set: vk::DescriptorSet, binding: u32, image_view: vk::ImageView) -> Self {
        self.write_image(
            set,
            binding,
            image_view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        )
    }

    /// Write any image descriptor
    pub fn write_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> Self {
        let info = vk::DescriptorImageInfo::builder()
            .image_view(image_view)
            .sampler(sampler)
            .image_layout(layout)
            .build();
        self.writes.push(PendingWrite::Image { set, binding, ty, info });
        self
    }

    /// Write a uniform or storage buffer descriptor
    pub fn write_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> Self {
        let info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(offset)
            .range(range)
            .build();
        self.writes.push(PendingWrite::Buffer { set, binding, ty, info });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Execute all write operations
    pub fn update(&self, device: &dyn GpuDevice) {
        if self.writes.is_empty() {
            return;
        }
        let image_infos: Vec<vk::DescriptorImageInfo> = self
            .writes
            .iter()
            .filter_map(|w| match w {
                PendingWrite::Image { info, .. } => Some(*info),
                PendingWrite::Buffer { .. } => None,
            })
            .collect();
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = self
            .writes
            .iter()
            .filter_map(|w| match w {
                PendingWrite::Buffer { info, .. } => Some(*info),
                PendingWrite::Image { .. } => None,
            })
            .collect();

        let mut next_image = 0;
        let mut next_buffer = 0;
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|w| match *w {
                PendingWrite::Image { set, binding, ty, .. } => {
                    let info = std::slice::from_ref(&image_infos[next_image]);
                    next_image += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .dst_array_element(0)
                        .descriptor_type(ty)
                        .image_info(info)
                        .build()
                }
                PendingWrite::Buffer { set, binding, ty, .. } => {
                    let info = std::slice::from_ref(&buffer_infos[next_buffer]);
                    next_buffer += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(binding)
                        .dst_array_element(0)
                        .descriptor_type(ty)
                        .buffer_info(info)
                        .build()
                }
            })
            .collect();

        device.update_descriptor_sets(&writes);
    }
}
