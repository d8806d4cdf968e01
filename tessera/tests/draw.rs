mod common;

use common::{compute_desc, Fixture};
use tessera::{
    soft::SoftCommand, vk, Error, FrontendDirtyBits, FrontendError, GraphicsDirtyBits, IndexType, Indices,
    PrimitiveMode, VertexAttribute,
};

fn count_commands(commands: &[SoftCommand], f: impl Fn(&SoftCommand) -> bool) -> usize {
    commands.iter().filter(|c| f(c)).count()
}

#[test]
fn second_draw_processes_no_dirty_bits() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let processed = fx.context.last_processed_graphics_bits();
    assert!(processed.contains(GraphicsDirtyBits::PIPELINE));
    assert!(processed.contains(GraphicsDirtyBits::VERTEX_BUFFERS));
    assert!(processed.contains(GraphicsDirtyBits::DRIVER_UNIFORMS));
    assert!(processed.contains(GraphicsDirtyBits::DESCRIPTOR_SETS));
    // non-indexed draws leave the index buffer alone
    assert!(!processed.contains(GraphicsDirtyBits::INDEX_BUFFER));
    assert_eq!(fx.context.graphics_dirty_bits(), GraphicsDirtyBits::INDEX_BUFFER);

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert!(fx.context.last_processed_graphics_bits().is_empty());
}

#[test]
fn new_render_pass_rebinds_state() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let processed = fx.context.last_processed_graphics_bits();
    assert!(processed.contains(GraphicsDirtyBits::PIPELINE));
    assert!(processed.contains(GraphicsDirtyBits::VERTEX_BUFFERS));
    assert!(processed.contains(GraphicsDirtyBits::DESCRIPTOR_SETS));
    // the same pipeline is bound again
    assert_eq!(fx.device.stats().pipelines_created, 1);

    fx.context.flush().unwrap();
    let commands = fx.device.submitted_commands();
    assert_eq!(
        count_commands(&commands, |c| matches!(c, SoftCommand::BeginRenderPass(_))),
        2
    );
    assert_eq!(
        count_commands(&commands, |c| matches!(
            c,
            SoftCommand::BindPipeline {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                ..
            }
        )),
        2
    );
}

#[test]
fn framebuffer_change_starts_a_new_render_pass() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();

    fx.state.draw_framebuffer = common::framebuffer(32, 32);
    fx.sync(FrontendDirtyBits::DRAW_FRAMEBUFFER);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();

    let render_areas: Vec<_> = fx
        .device
        .submitted_commands()
        .iter()
        .filter_map(|c| match c {
            SoftCommand::BeginRenderPass(begin) => Some(begin.render_area.extent.width),
            _ => None,
        })
        .collect();
    assert_eq!(render_areas, vec![64, 32]);
}

#[test]
fn topology_changes_reuse_pipelines() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let triangles = fx.context.current_graphics_pipeline().unwrap();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Lines, 0, 2).unwrap();
    let lines = fx.context.current_graphics_pipeline().unwrap();
    assert_ne!(triangles, lines);
    assert_eq!(fx.device.stats().pipelines_created, 2);

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert!(fx
        .context
        .last_processed_graphics_bits()
        .contains(GraphicsDirtyBits::PIPELINE));
    assert_eq!(fx.context.current_graphics_pipeline(), Some(triangles));
    assert_eq!(fx.device.stats().pipelines_created, 2);

    let desc = fx.device.graphics_pipeline_desc(lines).unwrap();
    assert_eq!(desc.topology, PrimitiveMode::Lines);
}

#[test]
fn state_changes_only_dirty_the_pipeline_when_they_differ() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();

    // same value: no new pipeline
    fx.sync(FrontendDirtyBits::LINE_WIDTH);
    assert!(!fx.context.graphics_dirty_bits().contains(GraphicsDirtyBits::PIPELINE));

    fx.state.line_width = 2.0;
    fx.sync(FrontendDirtyBits::LINE_WIDTH);
    assert!(fx.context.graphics_dirty_bits().contains(GraphicsDirtyBits::PIPELINE));
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert_eq!(fx.context.pipeline_desc().line_width.0, 2.0);
    assert_eq!(fx.device.stats().pipelines_created, 2);
}

#[test]
fn default_framebuffer_flips_the_viewport() {
    let mut fx = Fixture::new();
    fx.state.draw_framebuffer.is_default = true;
    fx.state.viewport = tessera::Rect::new(0, 8, 64, 32);
    fx.sync(FrontendDirtyBits::DRAW_FRAMEBUFFER);

    let viewport = fx.context.pipeline_desc().viewport;
    assert_eq!(viewport.y.0, 64.0 - 8.0);
    assert_eq!(viewport.height.0, -32.0);
    assert_eq!(fx.context.pipeline_desc().front_face, vk::FrontFace::CLOCKWISE);
}

#[test]
fn client_vertex_data_is_streamed() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&common::graphics_desc());
    let data: Vec<u8> = (0..36).collect();
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::client(
        vk::Format::R32G32B32_SFLOAT,
        data.clone(),
        0,
    ));
    fx.state.program = Some(program);
    fx.sync_all();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();

    let (buffer, offset) = fx
        .device
        .submitted_commands()
        .iter()
        .find_map(|c| match c {
            SoftCommand::BindVertexBuffers {
                first_binding: 0,
                buffers,
                offsets,
            } => Some((buffers[0], offsets[0])),
            _ => None,
        })
        .unwrap();
    let contents = fx.device.buffer_contents(buffer).unwrap();
    assert_eq!(&contents[offset as usize..offset as usize + 36], &data[..]);
}

#[test]
fn client_indices_are_streamed() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    let indices: Vec<u8> = [0u16, 1, 2, 2, 1, 3].iter().flat_map(|i| i.to_ne_bytes()).collect();

    fx.context
        .draw_elements(
            &fx.state,
            PrimitiveMode::Triangles,
            6,
            IndexType::U16,
            Indices::Client(&indices),
        )
        .unwrap();
    assert!(fx
        .context
        .last_processed_graphics_bits()
        .contains(GraphicsDirtyBits::INDEX_BUFFER));
    fx.context.flush().unwrap();

    let commands = fx.device.submitted_commands();
    let (buffer, offset) = commands
        .iter()
        .find_map(|c| match *c {
            SoftCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type: vk::IndexType::UINT16,
            } => Some((buffer, offset)),
            _ => None,
        })
        .unwrap();
    let contents = fx.device.buffer_contents(buffer).unwrap();
    assert_eq!(&contents[offset as usize..offset as usize + 12], &indices[..]);
    assert!(commands.iter().any(|c| matches!(
        c,
        SoftCommand::DrawIndexed {
            index_count: 6,
            instance_count: 1,
            ..
        }
    )));
}

#[test]
fn indexed_draws_validate_the_index_source() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();

    let err = fx
        .context
        .draw_elements(&fx.state, PrimitiveMode::Triangles, 3, IndexType::U16, Indices::Offset(0))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    fx.state.vertex_array.element_buffer = Some(fx.create_buffer(64));
    let err = fx
        .context
        .draw_elements(&fx.state, PrimitiveMode::Triangles, 3, IndexType::U32, Indices::Offset(2))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    fx.context
        .draw_elements(&fx.state, PrimitiveMode::Triangles, 3, IndexType::U32, Indices::Offset(4))
        .unwrap();

    let err = fx
        .context
        .draw_range_elements(
            &fx.state,
            PrimitiveMode::Triangles,
            5,
            2,
            3,
            IndexType::U32,
            Indices::Offset(0),
        )
        .unwrap_err();
    assert_eq!(err.frontend_error(), FrontendError::InvalidOperation);
}

#[test]
fn empty_draws_record_nothing() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 0).unwrap();
    fx.context
        .draw_arrays_instanced(&fx.state, PrimitiveMode::Triangles, 0, 3, 0)
        .unwrap();
    fx.context.dispatch_compute(&fx.state, 0, 1, 1).unwrap();
    assert!(!fx.context.has_recorded_commands());
}

#[test]
fn failed_pipeline_creation_stays_dirty() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.device
        .fail_pipeline_creation(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));

    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3)
        .unwrap_err();
    assert!(matches!(err, Error::PipelineCreation(_)));
    assert_eq!(err.frontend_error(), FrontendError::OutOfMemory);
    assert!(fx.context.graphics_dirty_bits().contains(GraphicsDirtyBits::PIPELINE));
    assert!(!fx.context.is_device_lost());

    fx.device.fail_pipeline_creation(None);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert!(fx.context.current_graphics_pipeline().is_some());
}

#[test]
fn unbound_resources_are_invalid_operations() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&tessera::ProgramDesc {
        texture_count: 1,
        ..common::graphics_desc()
    });
    let buffer = fx.create_buffer(64);
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(vk::Format::R32_SFLOAT, buffer, 0, 0));
    fx.state.program = Some(program);
    fx.sync_all();

    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Points, 0, 1)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    fx.state.textures = vec![Some(tessera::TextureBinding {
        image_view: vk::ImageView::null(),
        sampler: vk::Sampler::null(),
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    })];
    fx.sync(FrontendDirtyBits::TEXTURES);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 1).unwrap();
}

#[test]
fn disabled_attributes_read_current_values() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&common::graphics_desc());
    fx.state.program = Some(program);
    fx.state.current_values[0] = [0.25, 0.5, 0.75, 1.0];
    fx.sync_all();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Points, 0, 1).unwrap();
    fx.context.flush().unwrap();

    let (buffer, offset) = fx
        .device
        .submitted_commands()
        .iter()
        .find_map(|c| match c {
            SoftCommand::BindVertexBuffers { buffers, offsets, .. } => Some((buffers[0], offsets[0])),
            _ => None,
        })
        .unwrap();
    let contents = fx.device.buffer_contents(buffer).unwrap();
    let value: [f32; 4] = bytemuck::pod_read_unaligned(&contents[offset as usize..offset as usize + 16]);
    assert_eq!(value, [0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn dispatch_binds_the_compute_pipeline() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&compute_desc());
    fx.state.program = Some(program.clone());
    fx.sync(FrontendDirtyBits::PROGRAM);

    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    fx.context.dispatch_compute(&fx.state, 4, 2, 1).unwrap();
    assert_eq!(fx.context.last_processed_compute_bits(), tessera::ComputeDirtyBits::all());
    fx.context.dispatch_compute(&fx.state, 1, 1, 1).unwrap();
    assert!(fx.context.last_processed_compute_bits().is_empty());
    fx.context.flush().unwrap();

    let commands = fx.device.submitted_commands();
    assert!(commands.contains(&SoftCommand::Dispatch(4, 2, 1)));
    assert!(!commands.iter().any(|c| matches!(c, SoftCommand::BeginRenderPass(_))));
    assert_eq!(program.compute_pipeline_serial(), fx.context.last_submitted_serial());
}

#[test]
fn vertex_formats_are_validated_at_draw_time() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    let buffer = fx.create_buffer(64);
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(
        vk::Format::A2B10G10R10_SNORM_PACK32,
        buffer,
        0,
        0,
    ));
    fx.sync(FrontendDirtyBits::VERTEX_ARRAY);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();

    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(vk::Format::D32_SFLOAT, buffer, 0, 0));
    fx.sync(FrontendDirtyBits::VERTEX_ARRAY);
    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(err.frontend_error(), FrontendError::InvalidOperation);

    // client data with the same format is rejected too
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::client(vk::Format::D32_SFLOAT, vec![0u8; 64], 4));
    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3)
        .unwrap_err();
    assert_eq!(err.frontend_error(), FrontendError::InvalidOperation);

    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::buffer(vk::Format::R32G32B32_SFLOAT, buffer, 0, 0));
    fx.sync(FrontendDirtyBits::VERTEX_ARRAY);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();
}
