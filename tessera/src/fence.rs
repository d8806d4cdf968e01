//! Reference-counted fences.
use crate::{device::Device, vk};
use ash::prelude::VkResult;
use std::rc::Rc;

/// A fence that may be referenced by several command batches and sync objects.
///
/// The fence is returned to a [`FenceRecycler`] (or destroyed) when the last reference is
/// released.
#[derive(Debug, Default)]
pub struct SharedFence {
    inner: Option<Rc<vk::Fence>>,
}

impl SharedFence {
    pub fn new(fence: vk::Fence) -> SharedFence {
        SharedFence {
            inner: Some(Rc::new(fence)),
        }
    }

    /// Returns a new reference to the same fence.
    pub fn copy(&self) -> SharedFence {
        SharedFence {
            inner: self.inner.clone(),
        }
    }

    /// Returns the fence handle, or a null handle if this is an empty reference.
    pub fn get(&self) -> vk::Fence {
        self.inner.as_deref().copied().unwrap_or_default()
    }

    pub fn is_referenced(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of live references to the fence.
    pub fn ref_count(&self) -> usize {
        self.inner.as_ref().map(Rc::strong_count).unwrap_or(0)
    }

    /// Drops this reference. The fence goes back to `recycler` if it was the last one.
    pub fn reset_and_recycle(&mut self, device: &dyn Device, recycler: &mut FenceRecycler) -> VkResult<()> {
        if let Some(inner) = self.inner.take() {
            if let Ok(fence) = Rc::try_unwrap(inner) {
                return recycler.recycle(device, fence);
            }
        }
        Ok(())
    }

    /// Drops this reference. The fence is destroyed if it was the last one.
    pub fn reset_and_destroy(&mut self, device: &dyn Device) {
        if let Some(inner) = self.inner.take() {
            if let Ok(fence) = Rc::try_unwrap(inner) {
                device.destroy_fence(fence);
            }
        }
    }

    /// Blocks until the fence is signaled.
    pub fn wait(&self, device: &dyn Device, timeout_ns: u64) -> VkResult<()> {
        match self.inner.as_deref() {
            Some(&fence) => device.wait_for_fence(fence, timeout_ns),
            None => Ok(()),
        }
    }

    /// Returns whether the fence is signaled. An empty reference counts as signaled.
    pub fn is_signaled(&self, device: &dyn Device) -> VkResult<bool> {
        match self.inner.as_deref() {
            Some(&fence) => device.get_fence_status(fence),
            None => Ok(true),
        }
    }
}

/// A free list of unsignaled fences.
#[derive(Debug, Default)]
pub struct FenceRecycler {
    free: Vec<vk::Fence>,
}

impl FenceRecycler {
    /// Returns an unsignaled fence wrapped in a new `SharedFence`.
    pub fn new_shared_fence(&mut self, device: &dyn Device) -> VkResult<SharedFence> {
        let fence = match self.free.pop() {
            Some(fence) => fence,
            None => device.create_fence(false)?,
        };
        Ok(SharedFence::new(fence))
    }

    fn recycle(&mut self, device: &dyn Device, fence: vk::Fence) -> VkResult<()> {
        if let Err(err) = device.reset_fence(fence) {
            device.destroy_fence(fence);
            return Err(err);
        }
        self.free.push(fence);
        Ok(())
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for fence in self.free.drain(..) {
            device.destroy_fence(fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    #[test]
    fn last_reference_recycles_the_fence() {
        let device = SoftDevice::default();
        let mut recycler = FenceRecycler::default();
        let mut a = recycler.new_shared_fence(&device).unwrap();
        let mut b = a.copy();
        let fence = a.get();
        assert_eq!(a.ref_count(), 2);

        a.reset_and_recycle(&device, &mut recycler).unwrap();
        assert!(!a.is_referenced());
        assert_eq!(b.get(), fence);

        b.reset_and_recycle(&device, &mut recycler).unwrap();
        let c = recycler.new_shared_fence(&device).unwrap();
        assert_eq!(c.get(), fence);
        assert_eq!(device.stats().fences_created, 1);
    }
}
