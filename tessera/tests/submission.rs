mod common;

use common::Fixture;
use std::rc::Rc;
use tessera::{
    soft::{CompletionMode, SoftCommand},
    vk, Config, ContextVk, DescriptorInfo, Device, FrontendDirtyBits, FrontendError, NullTraceSink, PipelineType,
    PrimitiveMode, VertexAttribute,
};

/// Driver uniforms set of the last draw and the buffer it points to.
fn driver_uniforms_binding(fx: &Fixture) -> (vk::DescriptorSet, vk::Buffer) {
    let set = fx
        .context
        .driver_uniforms_descriptor_set(PipelineType::Graphics)
        .unwrap();
    let writes = fx.device.descriptor_set_writes(set);
    let DescriptorInfo::Buffer { buffer, .. } = writes[0].info else {
        panic!("driver uniforms set does not reference a buffer");
    };
    (set, buffer)
}

fn count_render_passes(commands: &[SoftCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, SoftCommand::BeginRenderPass(_)))
        .count()
}

#[test]
fn flush_without_commands_submits_nothing() {
    let mut fx = Fixture::new();
    fx.context.flush().unwrap();
    fx.context.finish().unwrap();
    assert_eq!(fx.device.stats().submissions, 0);
    assert!(!fx.context.last_submitted_fence().is_referenced());
}

#[test]
fn flush_and_signal_always_submits() {
    let mut fx = Fixture::new();
    let semaphore = fx.device.create_semaphore().unwrap();
    let before = fx.context.last_submitted_serial();
    fx.context.flush_and_signal(semaphore).unwrap();
    assert_eq!(fx.device.stats().submissions, 1);
    assert!(fx.context.last_submitted_serial() > before);
}

#[test]
fn wait_semaphores_are_consumed_by_the_next_submission() {
    let mut fx = Fixture::new();
    let semaphore = fx.device.create_semaphore().unwrap();
    fx.context
        .add_wait_semaphore(semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    fx.context.flush().unwrap();
    assert_eq!(fx.device.stats().submissions, 1);

    fx.context.flush().unwrap();
    assert_eq!(fx.device.stats().submissions, 1);
}

#[test]
fn last_submitted_fence_tracks_the_latest_batch() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();

    let fence = fx.context.last_submitted_fence();
    assert!(fence.is_referenced());
    assert!(!fence.is_signaled(&*fx.device).unwrap());
    fx.device.complete_all();
    assert!(fence.is_signaled(&*fx.device).unwrap());
}

#[test]
fn finish_frees_released_objects() {
    let mut fx = Fixture::with_mode(CompletionMode::OnWait);
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let buffer = fx.create_buffer(16);
    fx.context.release_object(buffer);

    fx.context.finish().unwrap();
    assert!(fx.device.buffer_contents(buffer).is_none());
    assert_eq!(fx.context.pending_garbage_count(), 0);
    assert_eq!(fx.context.command_queue().pending_garbage_count(), 0);
    assert!(!fx.context.has_recorded_commands());
}

#[test]
fn draws_between_flushes_share_a_render_pass() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 3, 3).unwrap();
    fx.context.flush().unwrap();
    assert_eq!(count_render_passes(&fx.device.submitted_commands()), 1);

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();
    assert_eq!(count_render_passes(&fx.device.submitted_commands()), 2);
}

#[test]
fn submission_from_another_context_closes_open_scopes() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();

    let mut other = ContextVk::new(fx.renderer.clone(), Rc::new(NullTraceSink::default())).unwrap();
    let semaphore = fx.device.create_semaphore().unwrap();
    other.flush_and_signal(semaphore).unwrap();

    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();
    assert_eq!(count_render_passes(&fx.device.submitted_commands()), 2);
    other.destroy();
}

#[test]
fn submission_from_another_context_does_not_recycle_recorded_resources() {
    // one driver uniforms slot per buffer and one set per pool: every draw rolls over
    let config = Config {
        driver_uniforms_buffer_size: 256,
        descriptor_pool_max_sets: 1,
        ..Config::default()
    };
    let mut fx = Fixture::try_with(CompletionMode::Immediate, config, Rc::new(NullTraceSink::default())).unwrap();
    fx.bind_simple_program();
    let mut recorded = vec![];
    for _ in 0..3 {
        fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
        fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
        recorded.push(driver_uniforms_binding(&fx));
    }

    let mut other = ContextVk::new(fx.renderer.clone(), Rc::new(NullTraceSink::default())).unwrap();
    let semaphore = fx.device.create_semaphore().unwrap();
    other.flush_and_signal(semaphore).unwrap();
    assert_eq!(fx.renderer.last_completed_serial(), other.last_submitted_serial());

    fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    assert!(fx.context.has_recorded_commands());
    let (set, buffer) = driver_uniforms_binding(&fx);
    for &(recorded_set, recorded_buffer) in &recorded {
        assert_ne!(buffer, recorded_buffer);
        assert_ne!(set, recorded_set);
        // the pool of a recorded set was not reset
        assert_eq!(fx.device.descriptor_set_writes(recorded_set).len(), 1);
    }

    // once this context's own submission completes, the buffers come back
    fx.context.flush().unwrap();
    fx.sync(FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let (_, buffer) = driver_uniforms_binding(&fx);
    assert!(recorded.iter().any(|&(_, recorded_buffer)| recorded_buffer == buffer));
    other.destroy();
}

#[test]
fn pipelines_are_stamped_with_the_submission_that_used_them() {
    let mut fx = Fixture::new();
    let program = fx.create_program(&common::compute_desc());
    fx.state.program = Some(program.clone());
    fx.sync(FrontendDirtyBits::PROGRAM);
    fx.context.dispatch_compute(&fx.state, 1, 1, 1).unwrap();

    let mut other = ContextVk::new(fx.renderer.clone(), Rc::new(NullTraceSink::default())).unwrap();
    let semaphore = fx.device.create_semaphore().unwrap();
    other.flush_and_signal(semaphore).unwrap();
    let other_serial = other.last_submitted_serial();
    assert!(program.compute_pipeline_serial() < other_serial);

    fx.context.flush().unwrap();
    assert!(fx.context.last_submitted_serial() > other_serial);
    assert_eq!(program.compute_pipeline_serial(), fx.context.last_submitted_serial());
    other.destroy();
}

#[test]
fn failed_streaming_flush_gives_back_the_primary() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.state.vertex_array.attributes[0] = Some(VertexAttribute::client(
        vk::Format::R32G32B32_SFLOAT,
        vec![0u8; 36],
        0,
    ));
    fx.sync(FrontendDirtyBits::VERTEX_ARRAY);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();

    fx.device
        .fail_buffer_flushes(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    let err = fx.context.flush().unwrap_err();
    assert_eq!(err.frontend_error(), FrontendError::OutOfMemory);
    assert_eq!(fx.device.stats().submissions, 0);

    fx.device.fail_buffer_flushes(None);
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.finish().unwrap();
    assert_eq!(fx.device.stats().submissions, 1);
    // the primary of the failed flush was recycled for the successful one
    assert_eq!(fx.device.live_command_buffers(), 1);
}
