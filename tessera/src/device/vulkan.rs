//! `Device` implementation over a real Vulkan device.
use crate::{
    config::DeviceLimits,
    device::{
        DescriptorBinding, DescriptorInfo, DescriptorWrite, Device, GraphicsPipelineCreateInfo, RenderPassBegin,
        RenderPassInheritance, SubmitInfo,
    },
    pipeline::MAX_VERTEX_ATTRIBS,
    vk,
};
use ash::prelude::VkResult;
use fxhash::FxHashMap;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
    MemoryLocation,
};
use std::{cell::RefCell, ffi::CStr, fmt, ptr};
use tracing::error;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Memory range to flush for `size` bytes at `offset` in an allocation that starts at
/// `allocation_offset` in its memory object.
///
/// The range is widened to multiples of `atom` and clamped to the atom-aligned end of the
/// allocation. Allocator blocks are sized in multiples of the atom, so the range stays inside
/// the memory object.
fn flush_range(allocation_offset: u64, allocation_size: u64, offset: u64, size: u64, atom: u64) -> (u64, u64) {
    let atom = atom.max(1);
    let align_up = |value: u64| (value + atom - 1) / atom * atom;
    let allocation_end = align_up(allocation_offset + allocation_size);
    let start = (allocation_offset + offset) / atom * atom;
    let end = align_up(allocation_offset + offset + size).min(allocation_end);
    (start, end.saturating_sub(start))
}

/// A Vulkan device, its submission queue, and a memory allocator for host-visible buffers.
pub struct AshDevice {
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    limits: DeviceLimits,
    allocator: RefCell<Allocator>,
    allocations: RefCell<FxHashMap<vk::Buffer, Allocation>>,
}

impl fmt::Debug for AshDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AshDevice")
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

impl AshDevice {
    /// Wraps an existing device. Commands are submitted to the first queue of `queue_family_index`.
    ///
    /// # Safety
    ///
    /// `device` must have been created from `physical_device` with at least one queue in
    /// `queue_family_index`, and must outlive the returned object.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
    ) -> VkResult<AshDevice> {
        let queue = device.get_device_queue(queue_family_index, 0);
        let properties = instance.get_physical_device_properties(physical_device);
        let limits = DeviceLimits::from_vk(&properties.limits);

        let allocator_create_desc = AllocatorCreateDesc {
            physical_device,
            debug_settings: Default::default(),
            device: device.clone(),
            instance: instance.clone(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        };
        let allocator = Allocator::new(&allocator_create_desc).map_err(|err| {
            error!("failed to create GPU allocator: {err}");
            vk::Result::ERROR_INITIALIZATION_FAILED
        })?;

        Ok(AshDevice {
            device,
            queue,
            queue_family_index,
            limits,
            allocator: RefCell::new(allocator),
            allocations: RefCell::new(FxHashMap::default()),
        })
    }

    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl Device for AshDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let create_info = vk::FenceCreateInfo {
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&create_info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        unsafe { self.device.create_event(&vk::EventCreateInfo::default(), None) }
    }

    fn destroy_event(&self, event: vk::Event) {
        unsafe { self.device.destroy_event(event, None) }
    }

    fn set_event(&self, event: vk::Event) -> VkResult<()> {
        unsafe { self.device.set_event(event) }
    }

    fn reset_event(&self, event: vk::Event) -> VkResult<()> {
        unsafe { self.device.reset_event(event) }
    }

    fn get_event_status(&self, event: vk::Event) -> VkResult<bool> {
        unsafe { self.device.get_event_status(event) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_command_pool(&self, transient: bool) -> VkResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo {
            flags: if transient {
                vk::CommandPoolCreateFlags::TRANSIENT
            } else {
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
            },
            queue_family_index: self.queue_family_index,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&create_info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        unsafe { self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
    }

    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo {
            command_pool: pool,
            level,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info)? };
        Ok(buffers[0])
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        inheritance: Option<&RenderPassInheritance>,
    ) -> VkResult<()> {
        let inheritance_info = vk::CommandBufferInheritanceInfo {
            render_pass: inheritance.map(|i| i.render_pass).unwrap_or_default(),
            subpass: inheritance.map(|i| i.subpass).unwrap_or_default(),
            framebuffer: inheritance.map(|i| i.framebuffer).unwrap_or_default(),
            ..Default::default()
        };
        let mut flags = vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        if inheritance.is_some() {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        let begin_info = vk::CommandBufferBeginInfo {
            flags,
            p_inheritance_info: &inheritance_info,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    fn queue_submit(&self, submit: &SubmitInfo, fence: vk::Fence) -> VkResult<()> {
        debug_assert_eq!(submit.wait_semaphores.len(), submit.wait_dst_stage_masks.len());
        let submit_info = vk::SubmitInfo {
            wait_semaphore_count: submit.wait_semaphores.len() as u32,
            p_wait_semaphores: submit.wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: submit.wait_dst_stage_masks.as_ptr(),
            command_buffer_count: submit.command_buffers.len() as u32,
            p_command_buffers: submit.command_buffers.as_ptr(),
            signal_semaphore_count: submit.signal_semaphores.len() as u32,
            p_signal_semaphores: submit.signal_semaphores.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.queue_submit(self.queue, &[submit_info], fence) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let handle = unsafe { self.device.create_buffer(&create_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(handle) };
        let allocation = self.allocator.borrow_mut().allocate(&AllocationCreateDesc {
            name: "tessera buffer",
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                error!("failed to allocate buffer memory: {err}");
                unsafe { self.device.destroy_buffer(handle, None) };
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
        };
        unsafe {
            self.device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
        }
        self.allocations.borrow_mut().insert(handle, allocation);
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.allocations.borrow_mut().remove(&buffer) {
            if let Err(err) = self.allocator.borrow_mut().free(allocation) {
                error!("failed to free buffer memory: {err}");
            }
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> VkResult<()> {
        let mut allocations = self.allocations.borrow_mut();
        let allocation = allocations.get_mut(&buffer).ok_or(vk::Result::ERROR_UNKNOWN)?;
        let mapped = allocation
            .mapped_slice_mut()
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let offset = offset as usize;
        mapped[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush_buffer(&self, buffer: vk::Buffer, offset: u64, size: u64) -> VkResult<()> {
        let allocations = self.allocations.borrow();
        let Some(allocation) = allocations.get(&buffer) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let (offset, size) = flush_range(
            allocation.offset(),
            allocation.size(),
            offset,
            size,
            self.limits.non_coherent_atom_size,
        );
        let range = vk::MappedMemoryRange {
            memory: unsafe { allocation.memory() },
            offset,
            size,
            ..Default::default()
        };
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let bindings: Vec<_> = bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                descriptor_count: b.count,
                stage_flags: b.stages,
                p_immutable_samplers: ptr::null(),
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo {
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo {
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_pipeline_layout(&create_info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo {
            max_sets,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let allocate_info = vk::DescriptorSetAllocateInfo {
            descriptor_pool: pool,
            descriptor_set_count: 1,
            p_set_layouts: &layout,
            ..Default::default()
        };
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        Ok(sets[0])
    }

    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        // Infos are collected first so that the pointers stay valid while building the writes.
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for write in writes {
            match write.info {
                DescriptorInfo::Buffer { buffer, offset, range } => {
                    buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range })
                }
                DescriptorInfo::CombinedImageSampler {
                    image_view,
                    sampler,
                    layout,
                } => image_infos.push(vk::DescriptorImageInfo {
                    sampler,
                    image_view,
                    image_layout: layout,
                }),
            }
        }

        let mut next_buffer = 0;
        let mut next_image = 0;
        let vk_writes: Vec<_> = writes
            .iter()
            .map(|write| {
                let mut w = vk::WriteDescriptorSet {
                    dst_set: write.set,
                    dst_binding: write.binding,
                    dst_array_element: write.array_element,
                    descriptor_count: 1,
                    descriptor_type: write.descriptor_type,
                    ..Default::default()
                };
                match write.info {
                    DescriptorInfo::Buffer { .. } => {
                        w.p_buffer_info = &buffer_infos[next_buffer];
                        next_buffer += 1;
                    }
                    DescriptorInfo::CombinedImageSampler { .. } => {
                        w.p_image_info = &image_infos[next_image];
                        next_image += 1;
                    }
                }
                w
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo {
            code_size: code.len() * 4,
            p_code: code.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_shader_module(&create_info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_graphics_pipeline(&self, info: &GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let desc = info.desc;

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::VERTEX,
                module: info.vertex_shader,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: info.fragment_shader,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
        ];

        // vertex input: one binding per attribute
        let mut bindings = Vec::with_capacity(MAX_VERTEX_ATTRIBS);
        let mut attributes = Vec::with_capacity(MAX_VERTEX_ATTRIBS);
        let mut divisors = Vec::new();
        for (location, attrib) in desc.vertex_attributes.iter().enumerate() {
            let Some(attrib) = attrib else { continue };
            let location = location as u32;
            bindings.push(vk::VertexInputBindingDescription {
                binding: location,
                stride: attrib.stride,
                input_rate: if attrib.divisor > 0 {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            });
            attributes.push(vk::VertexInputAttributeDescription {
                location,
                binding: location,
                format: attrib.format,
                offset: 0,
            });
            if attrib.divisor > 1 {
                divisors.push(vk::VertexInputBindingDivisorDescriptionEXT {
                    binding: location,
                    divisor: attrib.divisor,
                });
            }
        }
        let divisor_state = vk::PipelineVertexInputDivisorStateCreateInfoEXT {
            vertex_binding_divisor_count: divisors.len() as u32,
            p_vertex_binding_divisors: divisors.as_ptr(),
            ..Default::default()
        };
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo {
            p_next: if divisors.is_empty() {
                ptr::null()
            } else {
                &divisor_state as *const _ as *const _
            },
            vertex_binding_description_count: bindings.len() as u32,
            p_vertex_binding_descriptions: bindings.as_ptr(),
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo {
            topology: desc.topology.to_vk_primitive_topology(),
            primitive_restart_enable: desc.primitive_restart.into(),
            ..Default::default()
        };

        let viewport = desc.viewport.to_vk_viewport();
        let scissor = desc.scissor.to_vk_rect_2d();
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo {
            rasterizer_discard_enable: desc.rasterizer_discard.into(),
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: desc.cull_mode.to_vk_cull_mode_flags(),
            front_face: desc.front_face,
            depth_bias_enable: desc.polygon_offset.is_some().into(),
            depth_bias_constant_factor: desc.polygon_offset.map(|o| o.units.0).unwrap_or(0.0),
            depth_bias_slope_factor: desc.polygon_offset.map(|o| o.factor.0).unwrap_or(0.0),
            line_width: desc.line_width.0,
            ..Default::default()
        };

        let multisample_state = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::from_raw(desc.samples),
            alpha_to_coverage_enable: desc.alpha_to_coverage.into(),
            ..Default::default()
        };

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: desc.depth_test.into(),
            depth_write_enable: desc.depth_write.into(),
            depth_compare_op: desc.depth_compare.to_vk_compare_op(),
            stencil_test_enable: desc.stencil_test.into(),
            front: desc.stencil_front.to_vk_stencil_op_state(),
            back: desc.stencil_back.to_vk_stencil_op_state(),
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            ..Default::default()
        };

        let attachments: Vec<_> = (0..desc.color_attachment_count as usize)
            .map(|i| {
                let write_mask = desc.color_write_masks[i].to_vk_color_component_flags();
                match desc.blend[i] {
                    Some(eq) => vk::PipelineColorBlendAttachmentState {
                        blend_enable: vk::TRUE,
                        src_color_blend_factor: eq.src_color_blend_factor.to_vk_blend_factor(),
                        dst_color_blend_factor: eq.dst_color_blend_factor.to_vk_blend_factor(),
                        color_blend_op: eq.color_blend_op.to_vk_blend_op(),
                        src_alpha_blend_factor: eq.src_alpha_blend_factor.to_vk_blend_factor(),
                        dst_alpha_blend_factor: eq.dst_alpha_blend_factor.to_vk_blend_factor(),
                        alpha_blend_op: eq.alpha_blend_op.to_vk_blend_op(),
                        color_write_mask: write_mask,
                    },
                    None => vk::PipelineColorBlendAttachmentState {
                        blend_enable: vk::FALSE,
                        color_write_mask: write_mask,
                        ..Default::default()
                    },
                }
            })
            .collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo {
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            blend_constants: desc.blend_constants.map(|c| c.0),
            ..Default::default()
        };

        let create_info = vk::GraphicsPipelineCreateInfo {
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input_state,
            p_input_assembly_state: &input_assembly_state,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &rasterization_state,
            p_multisample_state: &multisample_state,
            p_depth_stencil_state: &depth_stencil_state,
            p_color_blend_state: &color_blend_state,
            layout: info.layout,
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        Ok(pipelines[0])
    }

    fn create_compute_pipeline(&self, layout: vk::PipelineLayout, shader: vk::ShaderModule) -> VkResult<vk::Pipeline> {
        let create_info = vk::ComputePipelineCreateInfo {
            stage: vk::PipelineShaderStageCreateInfo {
                stage: vk::ShaderStageFlags::COMPUTE,
                module: shader,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            layout,
            ..Default::default()
        };
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        Ok(pipelines[0])
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_query_pool(&self, query_count: u32) -> VkResult<vk::QueryPool> {
        let create_info = vk::QueryPoolCreateInfo {
            query_type: vk::QueryType::TIMESTAMP,
            query_count,
            ..Default::default()
        };
        unsafe { self.device.create_query_pool(&create_info, None) }
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.destroy_query_pool(pool, None) }
    }

    fn get_query_result(&self, pool: vk::QueryPool, query: u32) -> VkResult<Option<u64>> {
        let mut result = [0u64; 1];
        match unsafe {
            self.device
                .get_query_pool_results(pool, query, 1, &mut result, vk::QueryResultFlags::TYPE_64)
        } {
            Ok(()) => Ok(Some(result[0])),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(command_buffer, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(command_buffer, bind_point, layout, first_set, sets, dynamic_offsets)
        }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[u64],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets)
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(command_buffer, buffer, offset, index_type)
        }
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(command_buffer, x, y, z) }
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let begin_info = vk::RenderPassBeginInfo {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            render_area: begin.render_area,
            ..Default::default()
        };
        unsafe {
            self.device.cmd_begin_render_pass(
                command_buffer,
                &begin_info,
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) }
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        unsafe { self.device.cmd_execute_commands(command_buffer, secondaries) }
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
        unsafe { self.device.cmd_set_event(command_buffer, event, stage) }
    }

    fn cmd_wait_events(
        &self,
        command_buffer: vk::CommandBuffer,
        events: &[vk::Event],
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        unsafe {
            self.device
                .cmd_wait_events(command_buffer, events, src_stage, dst_stage, &[], &[], &[])
        }
    }

    fn cmd_reset_query_pool(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32) {
        unsafe { self.device.cmd_reset_query_pool(command_buffer, pool, first, count) }
    }

    fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) {
        unsafe { self.device.cmd_write_timestamp(command_buffer, stage, pool, query) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_ranges_cover_the_written_bytes_only() {
        // 100 bytes at offset 10 of an allocation placed at 4096
        assert_eq!(flush_range(4096, 1024, 10, 100, 64), (4096, 128));
        // unaligned allocation start
        assert_eq!(flush_range(4100, 1024, 0, 8, 64), (4096, 64));
        // the tail is clamped to the allocation, rounded to the atom
        assert_eq!(flush_range(0, 1000, 960, 40, 64), (960, 64));
        assert_eq!(flush_range(0, 1024, 1000, 24, 256), (768, 256));
        // no atom reported
        assert_eq!(flush_range(16, 64, 4, 4, 0), (20, 4));
    }
}
