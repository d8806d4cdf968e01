mod common;

use common::Fixture;
use std::mem;
use tessera::{
    soft::SoftCommand, unpack_atomic_counter_buffer_offset, vk, BufferBinding, DescriptorInfo, FrontendDirtyBits,
    GraphicsDirtyBits, GraphicsDriverUniforms, PipelineType, PrimitiveMode, ProgramDesc, TransformFeedbackState,
    VertexAttribute, DRIVER_UNIFORMS_SET_INDEX,
};

/// Reads back the graphics driver uniforms written by the last draw.
fn read_graphics_driver_uniforms(fx: &Fixture) -> GraphicsDriverUniforms {
    let set = fx
        .context
        .driver_uniforms_descriptor_set(PipelineType::Graphics)
        .unwrap();
    let writes = fx.device.descriptor_set_writes(set);
    let DescriptorInfo::Buffer { buffer, .. } = writes[0].info else {
        panic!("driver uniforms set does not reference a buffer");
    };
    let contents = fx.device.buffer_contents(buffer).unwrap();
    let offset = fx.context.driver_uniforms_offset(PipelineType::Graphics) as usize;
    bytemuck::pod_read_unaligned(&contents[offset..offset + mem::size_of::<GraphicsDriverUniforms>()])
}

#[test]
fn descriptor_set_is_reused_until_the_buffer_rolls_over() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let first_set = fx
        .context
        .driver_uniforms_descriptor_set(PipelineType::Graphics)
        .unwrap();
    assert_eq!(fx.context.driver_uniforms_offset(PipelineType::Graphics), 0);

    // 16K buffers with 256-byte aligned slots: 64 allocations per buffer
    let mut offsets = vec![0];
    for _ in 1..64 {
        fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
        fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
        assert!(fx
            .context
            .last_processed_graphics_bits()
            .contains(GraphicsDirtyBits::DRIVER_UNIFORMS));
        assert_eq!(
            fx.context.driver_uniforms_descriptor_set(PipelineType::Graphics),
            Some(first_set)
        );
        offsets.push(fx.context.driver_uniforms_offset(PipelineType::Graphics));
    }
    assert!(offsets.windows(2).all(|w| w[1] == w[0] + 256));

    fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert_ne!(
        fx.context.driver_uniforms_descriptor_set(PipelineType::Graphics),
        Some(first_set)
    );
    assert_eq!(fx.context.driver_uniforms_offset(PipelineType::Graphics), 0);
}

#[test]
fn driver_uniforms_are_bound_with_their_dynamic_offset() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();

    let last_offset = fx
        .device
        .submitted_commands()
        .iter()
        .filter_map(|c| match c {
            SoftCommand::BindDescriptorSets {
                first_set,
                dynamic_offsets,
                ..
            } if *first_set == DRIVER_UNIFORMS_SET_INDEX => Some(dynamic_offsets[0]),
            _ => None,
        })
        .last();
    assert_eq!(last_offset, Some(256));
}

#[test]
fn atomic_counter_offsets_are_corrected_in_the_shader() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&ProgramDesc {
        atomic_counter_buffer_count: 1,
        ..common::graphics_desc()
    });
    let vertices = fx.create_buffer(64);
    let counters = fx.create_buffer(1024);
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(vk::Format::R32_SFLOAT, vertices, 0, 0));
    fx.state.atomic_counter_buffers = vec![Some(BufferBinding {
        buffer: counters,
        offset: 260,
        size: 64,
    })];
    fx.state.program = Some(program);
    fx.sync_all();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 1).unwrap();
    let uniforms = read_graphics_driver_uniforms(&fx);
    assert_eq!(unpack_atomic_counter_buffer_offset(&uniforms.acb_buffer_offsets, 0), 1);
    assert_eq!(unpack_atomic_counter_buffer_offset(&uniforms.acb_buffer_offsets, 1), 0);

    fx.context.flush().unwrap();
    // the storage buffer itself is bound at the aligned offset
    let acb_write = fx
        .device
        .submitted_commands()
        .iter()
        .filter_map(|c| match c {
            SoftCommand::BindDescriptorSets { first_set: 0, sets, .. } => Some(sets[2]),
            _ => None,
        })
        .flat_map(|set| fx.device.descriptor_set_writes(set))
        .find(|w| w.descriptor_type == vk::DescriptorType::STORAGE_BUFFER)
        .unwrap();
    assert_eq!(
        acb_write.info,
        DescriptorInfo::Buffer {
            buffer: counters,
            offset: 256,
            range: 68,
        }
    );
}

#[test]
fn transform_feedback_offsets_follow_captured_vertices() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&ProgramDesc {
        transform_feedback_strides: &[16],
        ..common::graphics_desc()
    });
    let vertices = fx.create_buffer(64);
    let capture = fx.create_buffer(4096);
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(vk::Format::R32_SFLOAT, vertices, 0, 0));
    fx.state.program = Some(program);
    fx.state.transform_feedback = TransformFeedbackState {
        active: true,
        paused: false,
        buffers: vec![Some(BufferBinding {
            buffer: capture,
            offset: 8,
            size: 4000,
        })],
    };
    fx.sync_all();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 3).unwrap();
    let uniforms = read_graphics_driver_uniforms(&fx);
    assert_eq!(uniforms.xfb_active_unpaused, 1);
    assert_eq!(uniforms.xfb_buffer_offsets[0], 2);

    // capture offsets are refreshed at every draw
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 3).unwrap();
    assert!(fx
        .context
        .last_processed_graphics_bits()
        .contains(GraphicsDirtyBits::DRIVER_UNIFORMS));
    let uniforms = read_graphics_driver_uniforms(&fx);
    assert_eq!(uniforms.xfb_buffer_offsets[0], 2 + 3 * 16 / 4);

    fx.state.transform_feedback.paused = true;
    fx.sync(FrontendDirtyBits::TRANSFORM_FEEDBACK);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 3).unwrap();
    let uniforms = read_graphics_driver_uniforms(&fx);
    assert_eq!(uniforms.xfb_active_unpaused, 0);
    assert_eq!(uniforms.xfb_buffer_offsets[0], 2 + 6 * 16 / 4);
}

#[test]
fn flipped_rendering_inverts_the_y_scale() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert_eq!(read_graphics_driver_uniforms(&fx).viewport_y_scale, 1.0);

    fx.state.draw_framebuffer.is_default = true;
    fx.sync(FrontendDirtyBits::DRAW_FRAMEBUFFER);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let uniforms = read_graphics_driver_uniforms(&fx);
    assert_eq!(uniforms.viewport_y_scale, -1.0);
    assert_eq!(uniforms.neg_viewport_y_scale, 1.0);
    assert_eq!(uniforms.half_render_area_height, 32.0);
}
