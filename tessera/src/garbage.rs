use crate::{device::Device, serial::Serial, vk};

/// A GPU object whose destruction must wait until the GPU is done with it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GarbageObject {
    Buffer(vk::Buffer),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    CommandPool(vk::CommandPool),
    ShaderModule(vk::ShaderModule),
    Event(vk::Event),
    QueryPool(vk::QueryPool),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
}

impl GarbageObject {
    pub fn destroy(self, device: &dyn Device) {
        match self {
            GarbageObject::Buffer(buffer) => device.destroy_buffer(buffer),
            GarbageObject::Pipeline(pipeline) => device.destroy_pipeline(pipeline),
            GarbageObject::PipelineLayout(layout) => device.destroy_pipeline_layout(layout),
            GarbageObject::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            GarbageObject::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            GarbageObject::CommandPool(pool) => device.destroy_command_pool(pool),
            GarbageObject::ShaderModule(module) => device.destroy_shader_module(module),
            GarbageObject::Event(event) => device.destroy_event(event),
            GarbageObject::QueryPool(pool) => device.destroy_query_pool(pool),
            GarbageObject::Fence(fence) => device.destroy_fence(fence),
            GarbageObject::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
        }
    }
}

macro_rules! impl_garbage_from {
    ($($ty:ident => $variant:ident),*) => {
        $(
            impl From<vk::$ty> for GarbageObject {
                fn from(handle: vk::$ty) -> Self {
                    GarbageObject::$variant(handle)
                }
            }
        )*
    };
}

impl_garbage_from!(
    Buffer => Buffer,
    Pipeline => Pipeline,
    PipelineLayout => PipelineLayout,
    DescriptorSetLayout => DescriptorSetLayout,
    DescriptorPool => DescriptorPool,
    CommandPool => CommandPool,
    ShaderModule => ShaderModule,
    Event => Event,
    QueryPool => QueryPool,
    Fence => Fence,
    Semaphore => Semaphore
);

/// A list of garbage objects that can be destroyed once the submission with the given serial
/// has completed.
#[derive(Debug)]
pub struct GarbageAndSerial {
    pub objects: Vec<GarbageObject>,
    pub serial: Serial,
}

impl GarbageAndSerial {
    pub fn destroy(self, device: &dyn Device) {
        for object in self.objects {
            object.destroy(device);
        }
    }
}
