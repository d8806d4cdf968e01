//! Uniforms generated by the context and read by every shader (set 3).
use super::{ContextVk, PipelineType};
use crate::{
    config::{Config, DeviceLimits},
    descriptor_pool::{DescriptorSetAllocation, DynamicDescriptorPool},
    device::{DescriptorBinding, DescriptorInfo, DescriptorWrite, Device},
    dynamic_buffer::DynamicBuffer,
    error::Result,
    program::{DRIVER_UNIFORMS_SET_INDEX, MAX_ATOMIC_COUNTER_BUFFERS, MAX_TRANSFORM_FEEDBACK_BUFFERS},
    serial::Serial,
    state::State,
    vk,
};
use bytemuck::{Pod, Zeroable};
use tracing::trace;

/// Driver uniforms of graphics pipelines.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GraphicsDriverUniforms {
    /// x, y, width, height of the frontend viewport.
    pub viewport: [f32; 4],
    pub half_render_area_height: f32,
    /// -1 if rendering is flipped vertically, 1 otherwise.
    pub viewport_y_scale: f32,
    pub neg_viewport_y_scale: f32,
    /// 1 if transform feedback is active and not paused.
    pub xfb_active_unpaused: u32,
    /// Index of the first vertex to capture in each transform feedback buffer, in words.
    pub xfb_buffer_offsets: [i32; MAX_TRANSFORM_FEEDBACK_BUFFERS],
    /// See [`pack_atomic_counter_buffer_offsets`].
    pub acb_buffer_offsets: [u32; MAX_ATOMIC_COUNTER_BUFFERS / 4],
    /// near, far, far - near, unused
    pub depth_range: [f32; 4],
}

/// Driver uniforms of compute pipelines.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputeDriverUniforms {
    pub acb_buffer_offsets: [u32; MAX_ATOMIC_COUNTER_BUFFERS / 4],
}

/// Packs the offset corrections of the atomic counter buffer bindings.
///
/// Storage buffers are bound at offsets aligned down to `alignment`. The shader adds back the
/// difference, in 32-bit words; the correction of buffer `i` is stored in byte `i % 4` of
/// word `i / 4`.
pub fn pack_atomic_counter_buffer_offsets(offsets: &[u64], alignment: u64) -> [u32; MAX_ATOMIC_COUNTER_BUFFERS / 4] {
    let alignment = alignment.max(1);
    let mut packed = [0u32; MAX_ATOMIC_COUNTER_BUFFERS / 4];
    for (i, &offset) in offsets.iter().enumerate().take(MAX_ATOMIC_COUNTER_BUFFERS) {
        let correction = (offset % alignment) / 4;
        debug_assert!(correction < 256);
        packed[i / 4] |= (correction as u32 & 0xff) << ((i % 4) * 8);
    }
    packed
}

/// Reads back the correction of buffer `index` from packed offsets, in words.
pub fn unpack_atomic_counter_buffer_offset(packed: &[u32; MAX_ATOMIC_COUNTER_BUFFERS / 4], index: usize) -> u32 {
    (packed[index / 4] >> ((index % 4) * 8)) & 0xff
}

/// Bindings of the descriptor set layout of the driver uniforms.
fn driver_uniforms_bindings(kind: PipelineType) -> [DescriptorBinding; 1] {
    [DescriptorBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        count: 1,
        stages: match kind {
            PipelineType::Graphics => vk::ShaderStageFlags::ALL_GRAPHICS,
            PipelineType::Compute => vk::ShaderStageFlags::COMPUTE,
        },
    }]
}

/// Per-pipeline-kind driver uniforms state.
///
/// Uniform data is streamed into a ring of buffers. The descriptor set points at the whole
/// current buffer and the data is selected with a dynamic offset, so a new set is only
/// needed when the ring moves to another buffer.
#[derive(Debug)]
pub(super) struct DriverUniformsDescriptorSet {
    pub(super) layout: vk::DescriptorSetLayout,
    descriptor_pool: DynamicDescriptorPool,
    descriptor_set: Option<DescriptorSetAllocation>,
    dynamic_offset: u32,
    buffer: DynamicBuffer,
}

impl DriverUniformsDescriptorSet {
    pub(super) fn new(
        device: &dyn Device,
        config: &Config,
        limits: &DeviceLimits,
        kind: PipelineType,
    ) -> Result<DriverUniformsDescriptorSet> {
        let layout = device.create_descriptor_set_layout(&driver_uniforms_bindings(kind))?;
        Ok(DriverUniformsDescriptorSet {
            layout,
            descriptor_pool: DynamicDescriptorPool::new(
                config.descriptor_pool_max_sets,
                &[vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    descriptor_count: 1,
                }],
            ),
            descriptor_set: None,
            dynamic_offset: 0,
            buffer: DynamicBuffer::new(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                limits.min_uniform_buffer_offset_alignment,
                config.driver_uniforms_buffer_size,
            ),
        })
    }

    pub(super) fn flush_buffer(&mut self, device: &dyn Device) -> Result<()> {
        self.buffer.flush(device)
    }

    pub(super) fn release_in_flight_resources(&mut self, serial: Serial) {
        self.buffer.release_in_flight_buffers(serial);
        self.descriptor_pool.release_in_flight_pools(serial);
    }

    pub(super) fn destroy(&mut self, device: &dyn Device) {
        self.buffer.destroy(device);
        self.descriptor_pool.destroy(device);
        self.descriptor_set = None;
        if self.layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.layout);
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}

impl ContextVk {
    /// Descriptor set currently holding the driver uniforms of the given pipeline kind.
    pub fn driver_uniforms_descriptor_set(&self, kind: PipelineType) -> Option<vk::DescriptorSet> {
        self.driver_uniforms[kind as usize].descriptor_set.map(|s| s.set)
    }

    /// Dynamic offset of the last driver uniforms written for the given pipeline kind.
    pub fn driver_uniforms_offset(&self, kind: PipelineType) -> u32 {
        self.driver_uniforms[kind as usize].dynamic_offset
    }

    /// Streams `data` into the driver uniforms ring. Returns the buffer written to and whether
    /// it differs from the buffer of the previous allocation.
    fn allocate_driver_uniforms(&mut self, kind: PipelineType, data: &[u8]) -> Result<(vk::Buffer, bool)> {
        let renderer = self.renderer.clone();
        let driver_uniforms = &mut self.driver_uniforms[kind as usize];
        let allocation = driver_uniforms.buffer.allocate_and_write(&renderer, data)?;
        driver_uniforms.dynamic_offset = allocation.offset as u32;
        Ok((allocation.buffer, allocation.new_buffer_allocated))
    }

    /// Makes sure the descriptor set of the driver uniforms points to `buffer`.
    fn update_driver_uniforms_descriptor_set(
        &mut self,
        kind: PipelineType,
        buffer: vk::Buffer,
        new_buffer: bool,
        size: u64,
    ) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let driver_uniforms = &mut self.driver_uniforms[kind as usize];
        driver_uniforms.buffer.flush(device)?;

        let set_valid = driver_uniforms
            .descriptor_set
            .map_or(false, |set| driver_uniforms.descriptor_pool.is_valid(&set));
        if !new_buffer && set_valid {
            return Ok(());
        }

        let allocation = driver_uniforms
            .descriptor_pool
            .allocate_set(&renderer, driver_uniforms.layout)?;
        device.write_descriptor_sets(&[DescriptorWrite {
            set: allocation.set,
            binding: 0,
            array_element: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            info: DescriptorInfo::Buffer {
                buffer,
                offset: 0,
                range: size,
            },
        }]);
        trace!(?kind, set = ?allocation.set, ?buffer, "new driver uniforms descriptor set");
        driver_uniforms.descriptor_set = Some(allocation);
        Ok(())
    }

    /// Binds the driver uniforms set at its current dynamic offset.
    pub(super) fn bind_driver_uniforms(
        &mut self,
        kind: PipelineType,
        commands: vk::CommandBuffer,
        layout: vk::PipelineLayout,
    ) {
        let renderer = self.renderer.clone();
        let driver_uniforms = &mut self.driver_uniforms[kind as usize];
        let Some(set) = driver_uniforms.descriptor_set else {
            return;
        };
        driver_uniforms.descriptor_pool.retain(&set);
        let bind_point = match kind {
            PipelineType::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineType::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        renderer.device().cmd_bind_descriptor_sets(
            commands,
            bind_point,
            layout,
            DRIVER_UNIFORMS_SET_INDEX,
            &[set.set],
            &[driver_uniforms.dynamic_offset],
        );
    }

    fn atomic_counter_buffer_offsets(&self, state: &State) -> [u32; MAX_ATOMIC_COUNTER_BUFFERS / 4] {
        let offsets: Vec<u64> = state
            .atomic_counter_buffers
            .iter()
            .map(|binding| binding.map_or(0, |b| b.offset))
            .collect();
        pack_atomic_counter_buffer_offsets(&offsets, self.renderer.limits().min_storage_buffer_offset_alignment)
    }

    /// Computes the graphics driver uniforms for the current state.
    pub(super) fn graphics_driver_uniforms(&self, state: &State) -> GraphicsDriverUniforms {
        let flip = state.is_viewport_flipped(self.renderer.features().flip_viewport_y);
        let y_scale = if flip { -1.0 } else { 1.0 };
        let (near, far) = state.depth_range;

        let xfb = &state.transform_feedback;
        let mut xfb_buffer_offsets = [0i32; MAX_TRANSFORM_FEEDBACK_BUFFERS];
        if xfb.active {
            let alignment = self.renderer.limits().min_storage_buffer_offset_alignment.max(1);
            let strides = self.program.as_ref().map_or(&[][..], |p| p.transform_feedback_strides());
            for (i, (binding, &stride)) in xfb.buffers.iter().zip(strides).enumerate() {
                let Some(binding) = binding else { continue };
                let word_offset = (binding.offset % alignment) / 4;
                let captured = self.xfb_vertices_drawn * stride as u64 / 4;
                xfb_buffer_offsets[i] = (word_offset + captured) as i32;
            }
        }

        GraphicsDriverUniforms {
            viewport: [
                state.viewport.x as f32,
                state.viewport.y as f32,
                state.viewport.width as f32,
                state.viewport.height as f32,
            ],
            half_render_area_height: state.draw_framebuffer.height as f32 * 0.5,
            viewport_y_scale: y_scale,
            neg_viewport_y_scale: -y_scale,
            xfb_active_unpaused: xfb.is_active_unpaused() as u32,
            xfb_buffer_offsets,
            acb_buffer_offsets: self.atomic_counter_buffer_offsets(state),
            depth_range: [near, far, far - near, 0.0],
        }
    }

    pub(super) fn handle_dirty_graphics_driver_uniforms(&mut self, state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let layout = self.current_program()?.pipeline_layout();
        let uniforms = self.graphics_driver_uniforms(state);
        let data = bytemuck::bytes_of(&uniforms);
        let (buffer, new_buffer) = self.allocate_driver_uniforms(PipelineType::Graphics, data)?;
        self.update_driver_uniforms_descriptor_set(PipelineType::Graphics, buffer, new_buffer, data.len() as u64)?;
        self.bind_driver_uniforms(PipelineType::Graphics, commands, layout);
        Ok(())
    }

    pub(super) fn handle_dirty_compute_driver_uniforms(&mut self, state: &State, commands: vk::CommandBuffer) -> Result<()> {
        let layout = self.current_program()?.pipeline_layout();
        let uniforms = ComputeDriverUniforms {
            acb_buffer_offsets: self.atomic_counter_buffer_offsets(state),
        };
        let data = bytemuck::bytes_of(&uniforms);
        let (buffer, new_buffer) = self.allocate_driver_uniforms(PipelineType::Compute, data)?;
        self.update_driver_uniforms_descriptor_set(PipelineType::Compute, buffer, new_buffer, data.len() as u64)?;
        self.bind_driver_uniforms(PipelineType::Compute, commands, layout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;
    use std::mem;

    #[test]
    fn graphics_driver_uniforms_layout() {
        assert_eq!(mem::size_of::<GraphicsDriverUniforms>(), 80);
        assert_eq!(offset_of!(GraphicsDriverUniforms, half_render_area_height), 16);
        assert_eq!(offset_of!(GraphicsDriverUniforms, xfb_active_unpaused), 28);
        assert_eq!(offset_of!(GraphicsDriverUniforms, xfb_buffer_offsets), 32);
        assert_eq!(offset_of!(GraphicsDriverUniforms, acb_buffer_offsets), 48);
        assert_eq!(offset_of!(GraphicsDriverUniforms, depth_range), 64);
        assert_eq!(mem::size_of::<ComputeDriverUniforms>(), 16);
    }

    #[test]
    fn atomic_counter_offsets_are_packed_per_byte() {
        let packed = pack_atomic_counter_buffer_offsets(&[260, 0, 256 + 12, 0, 8], 256);
        assert_eq!(unpack_atomic_counter_buffer_offset(&packed, 0), 1);
        assert_eq!(unpack_atomic_counter_buffer_offset(&packed, 1), 0);
        assert_eq!(unpack_atomic_counter_buffer_offset(&packed, 2), 3);
        assert_eq!(unpack_atomic_counter_buffer_offset(&packed, 4), 2);
        assert_eq!(packed[0], 1 | (3 << 16));
        assert_eq!(packed[1], 2);
    }

    #[test]
    fn aligned_offsets_need_no_correction() {
        let packed = pack_atomic_counter_buffer_offsets(&[0, 256, 512, 1024], 256);
        assert_eq!(packed, [0; 4]);
    }
}
