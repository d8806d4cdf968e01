//! Draw and dispatch recording, and the handlers of the graphics and compute dirty bits.
use super::{
    ComputeDirtyBits, ContextVk, GraphicsDirtyBits, PipelineType, VertexBinding, SHADER_RESOURCES_SET, TEXTURES_SET,
    UNIFORMS_SET,
};
use crate::{
    device::{DescriptorInfo, DescriptorWrite},
    error::{Error, Result},
    pipeline::MAX_VERTEX_ATTRIBS,
    program::{ProgramVk, DEFAULT_UNIFORMS_BINDING, TRANSFORM_FEEDBACK_BINDING_BASE},
    state::{BufferBinding, State},
    types::{IndexType, PrimitiveMode},
    vertex_array::{client_stream_size, max_client_index, VertexSource},
    vk,
};
use std::rc::Rc;
use tracing::trace;

/// Source of the indices of an indexed draw.
#[derive(Copy, Clone, Debug)]
pub enum Indices<'a> {
    /// Byte offset into the element array buffer of the vertex array.
    Offset(u64),
    /// Index data in application memory, streamed at each draw.
    Client(&'a [u8]),
}

type GraphicsDirtyBitHandler = fn(&mut ContextVk, &State, vk::CommandBuffer) -> Result<()>;
type ComputeDirtyBitHandler = fn(&mut ContextVk, &State, vk::CommandBuffer) -> Result<()>;

/// Graphics dirty bit handlers, in processing order.
const GRAPHICS_DIRTY_BIT_HANDLERS: [(GraphicsDirtyBits, GraphicsDirtyBitHandler); 9] = [
    (GraphicsDirtyBits::DEFAULT_ATTRIBS, ContextVk::handle_dirty_graphics_default_attribs),
    (GraphicsDirtyBits::PIPELINE, ContextVk::handle_dirty_graphics_pipeline),
    (GraphicsDirtyBits::TEXTURES, ContextVk::handle_dirty_textures),
    (GraphicsDirtyBits::VERTEX_BUFFERS, ContextVk::handle_dirty_graphics_vertex_buffers),
    (GraphicsDirtyBits::INDEX_BUFFER, ContextVk::handle_dirty_graphics_index_buffer),
    (GraphicsDirtyBits::DRIVER_UNIFORMS, ContextVk::handle_dirty_graphics_driver_uniforms),
    (GraphicsDirtyBits::SHADER_RESOURCES, ContextVk::handle_dirty_shader_resources),
    (
        GraphicsDirtyBits::TRANSFORM_FEEDBACK_BUFFERS,
        ContextVk::handle_dirty_graphics_transform_feedback_buffers,
    ),
    (GraphicsDirtyBits::DESCRIPTOR_SETS, ContextVk::handle_dirty_graphics_descriptor_sets),
];

/// Compute dirty bit handlers, in processing order.
const COMPUTE_DIRTY_BIT_HANDLERS: [(ComputeDirtyBits, ComputeDirtyBitHandler); 5] = [
    (ComputeDirtyBits::PIPELINE, ContextVk::handle_dirty_compute_pipeline),
    (ComputeDirtyBits::TEXTURES, ContextVk::handle_dirty_textures),
    (ComputeDirtyBits::DRIVER_UNIFORMS, ContextVk::handle_dirty_compute_driver_uniforms),
    (ComputeDirtyBits::SHADER_RESOURCES, ContextVk::handle_dirty_shader_resources),
    (ComputeDirtyBits::DESCRIPTOR_SETS, ContextVk::handle_dirty_compute_descriptor_sets),
];

/// The index buffer binding is irrelevant to non-indexed draws.
const NON_INDEXED_DIRTY_BITS_MASK: GraphicsDirtyBits =
    GraphicsDirtyBits::all().difference(GraphicsDirtyBits::INDEX_BUFFER);

fn align_down(value: u64, alignment: u64) -> u64 {
    value - value % alignment.max(1)
}

impl ContextVk {
    pub fn draw_arrays(&mut self, state: &State, mode: PrimitiveMode, first: u32, count: u32) -> Result<()> {
        self.draw_arrays_instanced(state, mode, first, count, 1)
    }

    pub fn draw_arrays_instanced(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        instance_count: u32,
    ) -> Result<()> {
        if count == 0 || instance_count == 0 {
            return Ok(());
        }
        let result = self.setup_draw(state, mode, first, count, instance_count, NON_INDEXED_DIRTY_BITS_MASK);
        let commands = self.check_error(result)?;
        self.renderer
            .device()
            .cmd_draw(commands, count, instance_count, first, 0);
        self.on_draw(state, count, instance_count);
        Ok(())
    }

    pub fn draw_elements(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        indices: Indices,
    ) -> Result<()> {
        self.draw_elements_instanced(state, mode, count, index_type, indices, 1)
    }

    pub fn draw_elements_instanced(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        indices: Indices,
        instance_count: u32,
    ) -> Result<()> {
        self.draw_indexed(state, mode, count, index_type, indices, instance_count, None)
    }

    /// Indexed draw whose indices are known to lie in `start..=end`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_range_elements(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        start: u32,
        end: u32,
        count: u32,
        index_type: IndexType,
        indices: Indices,
    ) -> Result<()> {
        if end < start {
            return Err(Error::InvalidOperation("invalid index range"));
        }
        self.draw_indexed(state, mode, count, index_type, indices, 1, Some(end))
    }

    pub fn dispatch_compute(&mut self, state: &State, x: u32, y: u32, z: u32) -> Result<()> {
        if x == 0 || y == 0 || z == 0 {
            return Ok(());
        }
        let result = self.setup_dispatch(state);
        let commands = self.check_error(result)?;
        self.renderer.device().cmd_dispatch(commands, x, y, z);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_indexed(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        indices: Indices,
        instance_count: u32,
        max_index: Option<u32>,
    ) -> Result<()> {
        if count == 0 || instance_count == 0 {
            return Ok(());
        }
        let result = self.setup_indexed_draw(state, mode, count, index_type, indices, instance_count, max_index);
        let commands = self.check_error(result)?;
        self.renderer
            .device()
            .cmd_draw_indexed(commands, count, instance_count, 0, 0, 0);
        self.on_draw(state, count, instance_count);
        Ok(())
    }

    fn on_draw(&mut self, state: &State, vertex_count: u32, instance_count: u32) {
        if state.transform_feedback.is_active_unpaused() {
            self.xfb_vertices_drawn += vertex_count as u64 * instance_count as u64;
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Prepares the state of a draw and returns the command buffer to record it into.
    ///
    /// Only the dirty bits in `mask` are processed; the others stay dirty for a later draw.
    fn setup_draw(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        first_vertex: u32,
        vertex_count: u32,
        instance_count: u32,
        mask: GraphicsDirtyBits,
    ) -> Result<vk::CommandBuffer> {
        self.check_device_lost()?;
        self.sync_program_binding(state);
        let program = self.current_program()?;
        if program.is_compute() {
            return Err(Error::InvalidOperation("draw with a compute program"));
        }
        if self.unsupported_vertex_attributes != 0 {
            return Err(Error::InvalidOperation("unsupported vertex format"));
        }

        self.pipeline_desc.update_topology(&mut self.pipeline_transition, mode);
        self.invalidate_pipeline_if_changed();

        if state
            .vertex_array
            .has_active_client_attributes(program.active_attributes())
        {
            self.stream_client_attributes(state, &program, first_vertex, vertex_count, instance_count)?;
        }

        let commands = self.ensure_render_pass(state)?;

        if program.has_dirty_uniforms() || self.default_uniforms_needs_upload {
            self.upload_default_uniforms(&program)?;
        }
        if state.transform_feedback.is_active_unpaused() {
            // capture offsets move with every draw
            self.graphics_dirty_bits |= GraphicsDirtyBits::DRIVER_UNIFORMS;
        }

        self.last_processed_graphics_bits = GraphicsDirtyBits::empty();
        for &(bit, handler) in GRAPHICS_DIRTY_BIT_HANDLERS.iter() {
            // handlers may dirty bits that come after them
            if !(self.graphics_dirty_bits & mask).contains(bit) {
                continue;
            }
            handler(self, state, commands)?;
            self.graphics_dirty_bits.remove(bit);
            self.last_processed_graphics_bits |= bit;
        }
        Ok(commands)
    }

    #[allow(clippy::too_many_arguments)]
    fn setup_indexed_draw(
        &mut self,
        state: &State,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        indices: Indices,
        instance_count: u32,
        max_index: Option<u32>,
    ) -> Result<vk::CommandBuffer> {
        self.check_device_lost()?;
        let renderer = self.renderer.clone();
        let size = count as u64 * index_type.byte_size();

        let (binding, max_index) = match indices {
            Indices::Client(data) => {
                let data = data
                    .get(..size as usize)
                    .ok_or(Error::InvalidOperation("not enough index data"))?;
                let allocation = self.index_streaming.allocate_and_write(&renderer, data)?;
                let max_index =
                    max_index.or_else(|| max_client_index(data, index_type, state.primitive_restart));
                ((allocation.buffer, allocation.offset, index_type), max_index)
            }
            Indices::Offset(offset) => {
                let buffer = state
                    .vertex_array
                    .element_buffer
                    .ok_or(Error::InvalidOperation("no element array buffer bound"))?;
                if offset % index_type.byte_size() != 0 {
                    return Err(Error::InvalidOperation("misaligned index offset"));
                }
                ((buffer, offset, index_type), max_index)
            }
        };

        if self.index_binding != Some(binding) {
            self.index_binding = Some(binding);
            self.graphics_dirty_bits |= GraphicsDirtyBits::INDEX_BUFFER;
        }

        // client arrays are streamed up to the largest index, or entirely if it is unknown
        let vertex_count = max_index.map_or(u32::MAX, |max| max.saturating_add(1));
        self.setup_draw(state, mode, 0, vertex_count, instance_count, GraphicsDirtyBits::all())
    }

    /// Prepares the state of a dispatch and returns the command buffer to record it into.
    fn setup_dispatch(&mut self, state: &State) -> Result<vk::CommandBuffer> {
        self.check_device_lost()?;
        self.sync_program_binding(state);
        let program = self.current_program()?;
        if !program.is_compute() {
            return Err(Error::InvalidOperation("dispatch with a graphics program"));
        }

        let commands = self.ensure_outside_commands()?;
        if program.has_dirty_uniforms() || self.default_uniforms_needs_upload {
            self.upload_default_uniforms(&program)?;
        }

        self.last_processed_compute_bits = ComputeDirtyBits::empty();
        for &(bit, handler) in COMPUTE_DIRTY_BIT_HANDLERS.iter() {
            if !self.compute_dirty_bits.contains(bit) {
                continue;
            }
            handler(self, state, commands)?;
            self.compute_dirty_bits.remove(bit);
            self.last_processed_compute_bits |= bit;
        }
        Ok(commands)
    }

    /// Copies the client vertex data read by a draw into GPU memory.
    fn stream_client_attributes(
        &mut self,
        state: &State,
        program: &ProgramVk,
        first_vertex: u32,
        vertex_count: u32,
        instance_count: u32,
    ) -> Result<()> {
        let renderer = self.renderer.clone();
        for (location, attribute) in state.vertex_array.attributes.iter().enumerate() {
            let Some(attribute) = attribute else { continue };
            let VertexSource::Client(ref data) = attribute.source else {
                continue;
            };
            if !program.is_attribute_active(location) {
                continue;
            }
            let size = client_stream_size(attribute, data.len(), first_vertex, vertex_count, instance_count)?;
            let allocation = self
                .vertex_streaming
                .allocate_and_write(&renderer, &data[..size])?;
            trace!(location, size, offset = allocation.offset, "streamed client attribute");
            self.vertex_bindings[location] = VertexBinding {
                buffer: allocation.buffer,
                offset: allocation.offset,
            };
        }
        self.graphics_dirty_bits |= GraphicsDirtyBits::VERTEX_BUFFERS;
        Ok(())
    }

    /// Streams the default uniform block of `program`.
    fn upload_default_uniforms(&mut self, program: &ProgramVk) -> Result<()> {
        self.default_uniforms_needs_upload = false;
        if program.default_uniform_block_size() == 0 {
            return Ok(());
        }
        let renderer = self.renderer.clone();
        let default_uniforms = &mut self.default_uniforms;
        let allocation = program.upload_uniforms(|data| default_uniforms.allocate_and_write(&renderer, data))?;
        self.default_uniforms_offset = allocation.offset as u32;
        if allocation.new_buffer_allocated {
            // the uniforms set points to the previous buffer
            self.descriptor_sets[UNIFORMS_SET].invalidate();
        }
        self.invalidate_descriptor_sets();
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // graphics handlers

    fn handle_dirty_graphics_default_attribs(&mut self, state: &State, _commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        let renderer = self.renderer.clone();
        for location in 0..MAX_VERTEX_ATTRIBS {
            if !program.is_attribute_active(location) || state.vertex_array.attributes[location].is_some() {
                continue;
            }
            let value = bytemuck::bytes_of(&state.current_values[location]);
            let allocation = self.default_attribute_buffers[location].allocate_and_write(&renderer, value)?;
            self.vertex_bindings[location] = VertexBinding {
                buffer: allocation.buffer,
                offset: allocation.offset,
            };
        }
        self.graphics_dirty_bits |= GraphicsDirtyBits::VERTEX_BUFFERS;
        Ok(())
    }

    fn handle_dirty_graphics_pipeline(&mut self, _state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let (vertex_shader, fragment_shader) = program
            .graphics_shaders()
            .ok_or(Error::InvalidOperation("draw with a compute program"))?;
        let layout = program.pipeline_layout();
        let mut cache = program.pipeline_cache().borrow_mut();

        let id = match self.current_pipeline {
            Some(current) if self.pipeline_transition.is_empty() => current,
            Some(current) => {
                match cache.find_transition(current, self.pipeline_transition, &self.pipeline_desc) {
                    Some(target) => target,
                    None => {
                        let target =
                            cache.get_or_create(device, layout, vertex_shader, fragment_shader, &self.pipeline_desc)?;
                        cache.add_transition(current, self.pipeline_transition, &self.pipeline_desc, target);
                        target
                    }
                }
            }
            None => cache.get_or_create(device, layout, vertex_shader, fragment_shader, &self.pipeline_desc)?,
        };

        self.pipeline_transition = Default::default();
        self.current_pipeline = Some(id);
        device.cmd_bind_pipeline(commands, vk::PipelineBindPoint::GRAPHICS, cache.pipeline(id));
        drop(cache);
        self.use_pipeline(&program, Some(id));
        Ok(())
    }

    fn handle_dirty_graphics_vertex_buffers(&mut self, _state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        let device = self.renderer.device();
        let mut location = 0;
        // one bind per run of consecutive active locations
        while location < MAX_VERTEX_ATTRIBS {
            if !program.is_attribute_active(location) {
                location += 1;
                continue;
            }
            let first = location;
            let mut buffers = vec![];
            let mut offsets = vec![];
            while location < MAX_VERTEX_ATTRIBS && program.is_attribute_active(location) {
                let binding = self.vertex_bindings[location];
                if binding.buffer == vk::Buffer::null() {
                    return Err(Error::InvalidOperation("vertex attribute has no data"));
                }
                buffers.push(binding.buffer);
                offsets.push(binding.offset);
                location += 1;
            }
            device.cmd_bind_vertex_buffers(commands, first as u32, &buffers, &offsets);
        }
        Ok(())
    }

    fn handle_dirty_graphics_index_buffer(&mut self, _state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let (buffer, offset, index_type) = self
            .index_binding
            .ok_or(Error::InvalidOperation("no index buffer"))?;
        self.renderer
            .device()
            .cmd_bind_index_buffer(commands, buffer, offset, index_type.to_vk_index_type());
        Ok(())
    }

    fn handle_dirty_graphics_transform_feedback_buffers(
        &mut self,
        state: &State,
        _commands: vk::CommandBuffer,
    ) -> Result<()> {
        let program = self.current_program()?;
        let alignment = self.renderer.limits().min_storage_buffer_offset_alignment;
        let count = program.transform_feedback_strides().len();
        let bindings: Vec<Option<BufferBinding>> = (0..count)
            .map(|i| {
                state.transform_feedback.buffers.get(i).copied().flatten().map(|b| {
                    // the shader adds the remainder, see the driver uniforms
                    let offset = align_down(b.offset, alignment);
                    BufferBinding {
                        buffer: b.buffer,
                        offset,
                        size: b.size + (b.offset - offset),
                    }
                })
            })
            .collect();
        if bindings != self.xfb_bindings {
            self.xfb_bindings = bindings;
            self.descriptor_sets[UNIFORMS_SET].invalidate();
            self.graphics_dirty_bits |= GraphicsDirtyBits::DESCRIPTOR_SETS;
        }
        Ok(())
    }

    fn handle_dirty_graphics_descriptor_sets(&mut self, state: &State, commands: vk::CommandBuffer) -> Result<()> {
        self.bind_descriptor_sets(state, PipelineType::Graphics, commands)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // compute handlers

    fn handle_dirty_compute_pipeline(&mut self, _state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let pipeline = program.get_or_create_compute_pipeline(device)?;
        device.cmd_bind_pipeline(commands, vk::PipelineBindPoint::COMPUTE, pipeline);
        self.use_pipeline(&program, None);
        Ok(())
    }

    fn handle_dirty_compute_descriptor_sets(&mut self, state: &State, commands: vk::CommandBuffer) -> Result<()> {
        self.bind_descriptor_sets(state, PipelineType::Compute, commands)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // shared handlers

    fn handle_dirty_textures(&mut self, state: &State, _commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        self.update_textures_set(state, &program)?;
        self.invalidate_descriptor_sets();
        Ok(())
    }

    fn handle_dirty_shader_resources(&mut self, state: &State, _commands: vk::CommandBuffer) -> Result<()> {
        let program = self.current_program()?;
        self.update_shader_resources_set(state, &program)?;
        self.invalidate_descriptor_sets();
        Ok(())
    }

    /// Whether the cached descriptor set `index` can be bound as is.
    fn is_descriptor_set_current(&self, index: usize) -> bool {
        let cached = &self.descriptor_sets[index];
        !cached.stale
            && cached
                .allocation
                .map_or(false, |set| self.descriptor_pools[index].is_valid(&set))
    }

    /// Allocates descriptor set `index` of `program` and writes `bindings` into it.
    fn write_descriptor_set(
        &mut self,
        program: &ProgramVk,
        index: usize,
        bindings: &[(u32, vk::DescriptorType, DescriptorInfo)],
    ) -> Result<()> {
        let renderer = self.renderer.clone();
        let allocation = self.descriptor_pools[index].allocate_set(&renderer, program.set_layout(index as u32))?;
        let writes: Vec<DescriptorWrite> = bindings
            .iter()
            .map(|&(binding, descriptor_type, info)| DescriptorWrite {
                set: allocation.set,
                binding,
                array_element: 0,
                descriptor_type,
                info,
            })
            .collect();
        renderer.device().write_descriptor_sets(&writes);
        trace!(index, set = ?allocation.set, writes = writes.len(), "updated descriptor set");
        self.descriptor_sets[index].allocation = Some(allocation);
        self.descriptor_sets[index].stale = false;
        Ok(())
    }

    fn update_uniforms_set(&mut self, program: &ProgramVk) -> Result<()> {
        if self.is_descriptor_set_current(UNIFORMS_SET) {
            return Ok(());
        }
        let mut bindings = vec![];
        let block_size = program.default_uniform_block_size();
        if block_size > 0 {
            let buffer = self
                .default_uniforms
                .current_buffer()
                .ok_or(Error::InvalidOperation("default uniforms not uploaded"))?;
            bindings.push((
                DEFAULT_UNIFORMS_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                DescriptorInfo::Buffer {
                    buffer,
                    offset: 0,
                    range: block_size as u64,
                },
            ));
        }
        for i in 0..program.transform_feedback_strides().len() {
            let info = match self.xfb_bindings.get(i).copied().flatten() {
                Some(b) => DescriptorInfo::Buffer {
                    buffer: b.buffer,
                    offset: b.offset,
                    range: b.size,
                },
                None => DescriptorInfo::Buffer {
                    buffer: self.empty_storage_buffer()?,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                },
            };
            bindings.push((
                TRANSFORM_FEEDBACK_BINDING_BASE + i as u32,
                vk::DescriptorType::STORAGE_BUFFER,
                info,
            ));
        }
        self.write_descriptor_set(program, UNIFORMS_SET, &bindings)
    }

    fn update_textures_set(&mut self, state: &State, program: &ProgramVk) -> Result<()> {
        if self.is_descriptor_set_current(TEXTURES_SET) {
            return Ok(());
        }
        let bindings = (0..program.texture_count() as usize)
            .map(|unit| {
                let texture = state
                    .textures
                    .get(unit)
                    .copied()
                    .flatten()
                    .ok_or(Error::InvalidOperation("no texture bound to a sampler of the program"))?;
                Ok((
                    unit as u32,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    DescriptorInfo::CombinedImageSampler {
                        image_view: texture.image_view,
                        sampler: texture.sampler,
                        layout: texture.layout,
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        self.write_descriptor_set(program, TEXTURES_SET, &bindings)
    }

    fn update_shader_resources_set(&mut self, state: &State, program: &ProgramVk) -> Result<()> {
        if self.is_descriptor_set_current(SHADER_RESOURCES_SET) {
            return Ok(());
        }
        let alignment = self.renderer.limits().min_storage_buffer_offset_alignment;
        let bound = |bindings: &[Option<BufferBinding>], index: usize| -> Result<BufferBinding> {
            bindings
                .get(index)
                .copied()
                .flatten()
                .ok_or(Error::InvalidOperation("no buffer bound to a block of the program"))
        };
        let buffer_info = |b: BufferBinding| DescriptorInfo::Buffer {
            buffer: b.buffer,
            offset: b.offset,
            range: b.size,
        };

        let mut bindings: Vec<(u32, vk::DescriptorType, DescriptorInfo)> = vec![];
        let mut push = |descriptor_type: vk::DescriptorType, info: DescriptorInfo| {
            let binding = bindings.len() as u32;
            bindings.push((binding, descriptor_type, info));
        };
        for i in 0..program.uniform_block_count() as usize {
            push(vk::DescriptorType::UNIFORM_BUFFER, buffer_info(bound(&state.uniform_buffers, i)?));
        }
        for i in 0..program.storage_block_count() as usize {
            push(vk::DescriptorType::STORAGE_BUFFER, buffer_info(bound(&state.storage_buffers, i)?));
        }
        for i in 0..program.atomic_counter_buffer_count() as usize {
            let b = bound(&state.atomic_counter_buffers, i)?;
            // bound at an aligned offset, the shader adds the correction from the driver uniforms
            let offset = align_down(b.offset, alignment);
            let info = buffer_info(BufferBinding {
                buffer: b.buffer,
                offset,
                size: b.size + (b.offset - offset),
            });
            push(vk::DescriptorType::STORAGE_BUFFER, info);
        }
        self.write_descriptor_set(program, SHADER_RESOURCES_SET, &bindings)
    }

    fn empty_storage_buffer(&mut self) -> Result<vk::Buffer> {
        if let Some(buffer) = self.empty_storage_buffer {
            return Ok(buffer);
        }
        let buffer = self
            .renderer
            .device()
            .create_buffer(16, vk::BufferUsageFlags::STORAGE_BUFFER)?;
        self.empty_storage_buffer = Some(buffer);
        Ok(buffer)
    }

    /// Brings the three program sets up to date and binds them with the driver uniforms set.
    fn bind_descriptor_sets(&mut self, state: &State, kind: PipelineType, commands: vk::CommandBuffer) -> Result<()> {
        let program: Rc<ProgramVk> = self.current_program()?;
        self.update_uniforms_set(&program)?;
        self.update_textures_set(state, &program)?;
        self.update_shader_resources_set(state, &program)?;

        let renderer = self.renderer.clone();
        let mut sets = [vk::DescriptorSet::null(); 3];
        for (index, set) in sets.iter_mut().enumerate() {
            let Some(allocation) = self.descriptor_sets[index].allocation else {
                return Err(Error::InvalidOperation("descriptor set not allocated"));
            };
            self.descriptor_pools[index].retain(&allocation);
            *set = allocation.set;
        }

        let bind_point = match kind {
            PipelineType::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineType::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        let default_uniforms_offset = [self.default_uniforms_offset];
        let dynamic_offsets: &[u32] = if program.default_uniform_block_size() > 0 {
            &default_uniforms_offset
        } else {
            &[]
        };
        let layout = program.pipeline_layout();
        renderer
            .device()
            .cmd_bind_descriptor_sets(commands, bind_point, layout, 0, &sets, dynamic_offsets);
        // bindings do not survive a new command buffer, set 3 included
        self.bind_driver_uniforms(kind, commands, layout);
        Ok(())
    }
}
