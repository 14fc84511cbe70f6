//! Deferred destruction of GPU objects
//!
//! Objects are queued once the CPU is done with them and released on `flush`, after the
//! caller has waited on whatever fence proves the GPU is done too. Release runs in reverse
//! registration order so dependents go before the objects they were built from.

use crate::render::backends::vulkan::device::{GpuDevice, GpuResource};

/// LIFO queue of pending releases
#[derive(Debug, Default)]
pub struct DeletionQueue {
    pending: Vec<GpuResource>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `resource` for release on the next flush
    pub fn push(&mut self, resource: GpuResource) {
        self.pending.push(resource);
    }

    /// Release everything queued, newest first, leaving the queue empty
    pub fn flush(&mut self, device: &dyn GpuDevice) {
        if self.pending.is_empty() {
            return;
        }
        log::trace!("Flushing {} deferred releases", self.pending.len());
        while let Some(resource) = self.pending.pop() {
            device.release(resource);
        }
    }

    /// Number of pending releases
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::mock::MockDevice;
    use ash::vk::{self, Handle};

    #[test]
    fn test_flush_runs_newest_first() {
        let device = MockDevice::new();
        let a = GpuResource::Fence(vk::Fence::from_raw(100));
        let b = GpuResource::Semaphore(vk::Semaphore::from_raw(101));
        let c = GpuResource::CommandPool(vk::CommandPool::from_raw(102));

        let mut queue = DeletionQueue::new();
        queue.push(a);
        queue.push(b);
        queue.push(c);
        assert_eq!(queue.len(), 3);

        queue.flush(&device);
        assert_eq!(device.released(), vec![c, b, a]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_flush_is_noop() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        queue.push(GpuResource::Sampler(vk::Sampler::from_raw(7)));

        queue.flush(&device);
        let after_first = device.op_count();
        queue.flush(&device);
        assert_eq!(device.op_count(), after_first);
        assert_eq!(device.released().len(), 1);
    }

    #[test]
    fn test_empty_flush_touches_nothing() {
        let device = MockDevice::new();
        DeletionQueue::new().flush(&device);
        assert_eq!(device.op_count(), 0);
    }
}
