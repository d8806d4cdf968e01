mod common;

use common::Fixture;
use std::rc::Rc;
use tessera::{soft::CompletionMode, Config, Error, Features, FrontendError, NullTraceSink, PrimitiveMode};

fn draw_and_flush(fx: &mut Fixture) {
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.flush().unwrap();
}

#[test]
fn garbage_lives_until_its_submission_completes() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let buffer = fx.create_buffer(16);
    fx.context.release_object(buffer);
    assert_eq!(fx.context.pending_garbage_count(), 1);

    fx.context.flush().unwrap();
    assert_eq!(fx.context.pending_garbage_count(), 0);
    assert_eq!(fx.context.command_queue().pending_garbage_count(), 1);
    assert_eq!(fx.context.command_queue().in_flight_count(), 1);

    // not complete yet
    fx.context.check_completed_commands().unwrap();
    assert!(fx.device.buffer_contents(buffer).is_some());

    fx.device.complete_all();
    fx.context.check_completed_commands().unwrap();
    assert!(fx.device.buffer_contents(buffer).is_none());
    assert_eq!(fx.context.command_queue().pending_garbage_count(), 0);
    assert!(!fx.context.command_queue().has_in_flight_commands());
}

#[test]
fn completed_serials_advance_in_submission_order() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    fx.bind_simple_program();
    draw_and_flush(&mut fx);
    let first = fx.context.last_submitted_serial();
    draw_and_flush(&mut fx);
    let second = fx.context.last_submitted_serial();
    assert!(first < second);
    assert_eq!(fx.context.command_queue().in_flight_count(), 2);

    assert!(fx.device.complete_next());
    fx.context.check_completed_commands().unwrap();
    assert_eq!(fx.renderer.last_completed_serial(), first);
    assert_eq!(fx.context.command_queue().in_flight_count(), 1);

    assert!(fx.device.complete_next());
    fx.context.check_completed_commands().unwrap();
    assert_eq!(fx.renderer.last_completed_serial(), second);
}

#[test]
fn finish_waits_for_every_submission() {
    let mut fx = Fixture::with_mode(CompletionMode::OnWait);
    fx.bind_simple_program();
    draw_and_flush(&mut fx);
    draw_and_flush(&mut fx);
    assert_eq!(fx.context.command_queue().in_flight_count(), 2);
    assert_eq!(fx.device.pending_submissions(), 2);

    fx.context.finish().unwrap();
    assert!(!fx.context.command_queue().has_in_flight_commands());
    assert_eq!(fx.device.pending_submissions(), 0);
    assert_eq!(fx.renderer.last_completed_serial(), fx.context.last_submitted_serial());
}

#[test]
fn finish_to_serial_leaves_later_submissions_in_flight() {
    let mut fx = Fixture::with_mode(CompletionMode::OnWait);
    fx.bind_simple_program();
    let mut serials = vec![];
    for _ in 0..3 {
        draw_and_flush(&mut fx);
        serials.push(fx.context.last_submitted_serial());
    }
    assert_eq!(fx.context.command_queue().in_flight_count(), 3);

    fx.context.finish_to_serial(serials[1]).unwrap();
    assert_eq!(fx.renderer.last_completed_serial(), serials[1]);
    assert_eq!(fx.context.command_queue().in_flight_count(), 1);
    assert_eq!(fx.device.pending_submissions(), 1);

    fx.context.finish_to_serial(serials[2]).unwrap();
    assert_eq!(fx.renderer.last_completed_serial(), serials[2]);
    assert!(!fx.context.command_queue().has_in_flight_commands());
}

#[test]
fn in_flight_submissions_are_bounded() {
    let limit = Config::default().in_flight_commands_limit;
    let mut fx = Fixture::with_mode(CompletionMode::OnWait);
    fx.bind_simple_program();
    for _ in 0..150 {
        draw_and_flush(&mut fx);
        assert!(fx.context.command_queue().in_flight_count() <= limit);
    }
    assert_eq!(limit, 100);
    assert_eq!(fx.context.command_queue().in_flight_count(), limit);
    assert_eq!(fx.device.pending_submissions(), limit);
    assert_eq!(fx.device.stats().submissions, 150);
}

#[test]
fn transient_primaries_are_freed_with_their_pool() {
    let features = Features {
        transient_command_buffer: true,
        ..Features::default()
    };
    let mut fx = Fixture::try_with_features(
        CompletionMode::Immediate,
        features,
        Config::default(),
        Rc::new(NullTraceSink::default()),
    )
    .unwrap();
    fx.bind_simple_program();
    for _ in 0..5 {
        draw_and_flush(&mut fx);
    }
    fx.context.finish().unwrap();
    assert_eq!(fx.device.stats().submissions, 5);
    // no persistent primary pool, only the pool of the next submission
    assert_eq!(fx.device.live_command_pools(), 1);

    fx.context.destroy();
    assert_eq!(fx.device.live_command_pools(), 0);
    assert_eq!(fx.device.live_fences(), 0);
}

#[test]
fn steady_state_frames_recycle_fences_and_pools() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    for _ in 0..10 {
        draw_and_flush(&mut fx);
    }
    let fences = fx.device.live_fences();
    let pools = fx.device.live_command_pools();
    let fences_created = fx.device.stats().fences_created;

    for _ in 0..100 {
        draw_and_flush(&mut fx);
    }
    assert_eq!(fx.device.live_fences(), fences);
    assert_eq!(fx.device.live_command_pools(), pools);
    assert_eq!(fx.device.stats().fences_created, fences_created);
    assert_eq!(fx.device.stats().submissions, 110);
    assert!(!fx.context.command_queue().has_in_flight_commands());
}

#[test]
fn device_loss_during_flush_is_reported_as_context_lost() {
    let mut fx = Fixture::new();
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.device.lose_device();

    let err = fx.context.flush().unwrap_err();
    assert!(matches!(err, Error::DeviceLost));
    assert_eq!(err.frontend_error(), FrontendError::ContextLost);
    assert!(fx.context.is_device_lost());
    assert!(!fx.context.has_recorded_commands());

    let err = fx
        .context
        .draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3)
        .unwrap_err();
    assert_eq!(err.frontend_error(), FrontendError::ContextLost);
    assert!(matches!(fx.context.finish(), Err(Error::DeviceLost)));

    fx.context.destroy();
    assert_eq!(fx.device.live_command_pools(), 0);
}

#[test]
fn device_loss_while_waiting_releases_in_flight_work() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    let buffer = fx.create_buffer(16);
    fx.context.release_object(buffer);
    fx.context.flush().unwrap();
    assert_eq!(fx.context.command_queue().in_flight_count(), 1);

    fx.device.lose_device();
    assert!(matches!(fx.context.check_completed_commands(), Err(Error::DeviceLost)));
    assert!(fx.context.is_device_lost());
    assert!(!fx.context.command_queue().has_in_flight_commands());
    assert_eq!(fx.context.command_queue().pending_garbage_count(), 0);
    assert!(fx.device.buffer_contents(buffer).is_none());
}

#[test]
fn destroyed_programs_keep_their_pipelines_until_completion() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    let program = fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Lines, 0, 2).unwrap();
    assert_eq!(fx.device.live_pipelines(), 2);

    fx.context.destroy_program(&program);
    assert!(fx.context.current_graphics_pipeline().is_none());
    fx.context.flush().unwrap();
    assert_eq!(fx.device.live_pipelines(), 2);

    fx.device.complete_all();
    fx.context.check_completed_commands().unwrap();
    assert_eq!(fx.device.live_pipelines(), 0);
}

#[test]
fn destroying_a_program_twice_releases_it_once() {
    let mut fx = Fixture::with_mode(CompletionMode::Manual);
    let program = fx.bind_simple_program();
    fx.context.draw_arrays(&fx.state, PrimitiveMode::Triangles, 0, 3).unwrap();
    fx.context.destroy_program(&program);
    let pending = fx.context.pending_garbage_count();
    assert!(pending > 0);

    fx.context.destroy_program(&program);
    assert_eq!(fx.context.pending_garbage_count(), pending);
    fx.context.flush().unwrap();
    fx.device.complete_all();
    fx.context.check_completed_commands().unwrap();
    assert_eq!(fx.device.live_pipelines(), 0);
}
