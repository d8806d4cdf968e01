use crate::{device::Device, vk};
use ash::prelude::VkResult;

/// Allocates primary command buffers in a `vk::CommandPool` and allows re-use of freed command buffers.
#[derive(Debug)]
pub(crate) struct PersistentCommandPool {
    command_pool: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
}

impl PersistentCommandPool {
    pub(crate) fn new(device: &dyn Device) -> VkResult<PersistentCommandPool> {
        let command_pool = device.create_command_pool(false)?;
        Ok(PersistentCommandPool {
            command_pool,
            free: vec![],
        })
    }

    pub(crate) fn allocate(&mut self, device: &dyn Device) -> VkResult<vk::CommandBuffer> {
        match self.free.pop() {
            Some(cb) => Ok(cb),
            None => device.allocate_command_buffer(self.command_pool, vk::CommandBufferLevel::PRIMARY),
        }
    }

    /// Returns a command buffer whose execution has completed to the pool.
    pub(crate) fn collect(&mut self, device: &dyn Device, cb: vk::CommandBuffer) -> VkResult<()> {
        device.reset_command_buffer(cb)?;
        self.free.push(cb);
        Ok(())
    }

    pub(crate) fn destroy(self, device: &dyn Device) {
        // freeing the pool frees every buffer allocated from it
        device.destroy_command_pool(self.command_pool);
    }
}
