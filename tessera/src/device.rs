//! The boundary between the submission engine and the GPU driver.
//!
//! Everything the engine does to the GPU goes through the [`Device`] trait. Handles are raw
//! `ash::vk` handles; failures are raw `vk::Result` codes.
mod vulkan;

pub use vulkan::AshDevice;

use crate::{pipeline::GraphicsPipelineDesc, vk};
use ash::prelude::VkResult;

/// Describes a batch of command buffers submitted to the queue.
#[derive(Copy, Clone, Debug, Default)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    /// One stage mask per wait semaphore.
    pub wait_dst_stage_masks: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Render pass state inherited by a secondary command buffer recorded inside a render pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderPassInheritance {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub framebuffer: vk::Framebuffer,
}

/// Parameters of `cmd_begin_render_pass`. The contents of the render pass are always
/// recorded in secondary command buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
}

/// One binding of a descriptor set layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorInfo {
    Buffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    CombinedImageSampler {
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// A single descriptor update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub info: DescriptorInfo,
}

/// Everything needed to create a graphics pipeline.
#[derive(Copy, Clone, Debug)]
pub struct GraphicsPipelineCreateInfo<'a> {
    pub layout: vk::PipelineLayout,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub desc: &'a GraphicsPipelineDesc,
}

/// GPU device used by the engine.
///
/// All methods are called from the thread owning the rendering context. Buffers created
/// through this trait are host-visible and persistently mapped.
pub trait Device {
    // --- fences ---
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    /// Returns whether the fence is signaled.
    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    /// Blocks until the fence is signaled. Returns `Err(vk::Result::TIMEOUT)` on timeout.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;

    // --- events & semaphores ---
    fn create_event(&self) -> VkResult<vk::Event>;
    fn destroy_event(&self, event: vk::Event);
    fn set_event(&self, event: vk::Event) -> VkResult<()>;
    fn reset_event(&self, event: vk::Event) -> VkResult<()>;
    /// Returns whether the event is set.
    fn get_event_status(&self, event: vk::Event) -> VkResult<bool>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // --- command pools & buffers ---
    fn create_command_pool(&self, transient: bool) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()>;
    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        inheritance: Option<&RenderPassInheritance>,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // --- queue ---
    fn queue_submit(&self, submit: &SubmitInfo, fence: vk::Fence) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;

    // --- buffers ---
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Writes to the mapped memory of a buffer.
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> VkResult<()>;
    /// Makes host writes to the given range visible to the device.
    fn flush_buffer(&self, buffer: vk::Buffer, offset: u64, size: u64) -> VkResult<()>;

    // --- descriptors ---
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    /// Allocates a set. Fails with `ERROR_OUT_OF_POOL_MEMORY` when the pool is exhausted.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // --- shaders & pipelines ---
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_graphics_pipeline(&self, info: &GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, layout: vk::PipelineLayout, shader: vk::ShaderModule) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // --- timestamp queries ---
    fn create_query_pool(&self, query_count: u32) -> VkResult<vk::QueryPool>;
    fn destroy_query_pool(&self, pool: vk::QueryPool);
    /// Non-blocking read of a timestamp query. Returns `Ok(None)` if the result is not available yet.
    fn get_query_result(&self, pool: vk::QueryPool, query: u32) -> VkResult<Option<u64>>;

    // --- recording ---
    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    #[allow(clippy::too_many_arguments)]
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[u64],
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    );
    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]);
    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags);
    fn cmd_wait_events(
        &self,
        command_buffer: vk::CommandBuffer,
        events: &[vk::Event],
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    );
    fn cmd_reset_query_pool(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32);
    fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    );
}
