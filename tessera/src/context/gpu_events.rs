//! GPU timestamp events and the calibration of the GPU clock against the CPU clock.
use super::ContextVk;
use crate::{
    device::Device,
    error::{Error, Result},
    query_pool::QueryHelper,
    trace::{drift_adjusted_time, gpu_cycles_to_seconds, GpuClockSync, GpuEvent, GpuEventQuery},
    vk,
};
use tracing::{debug, trace, trace_span, warn};

/// Events used to rendezvous the CPU and the GPU during a calibration attempt.
#[derive(Copy, Clone, Debug)]
struct SyncEvents {
    cpu_ready: vk::Event,
    gpu_ready: vk::Event,
    gpu_done: vk::Event,
}

impl SyncEvents {
    fn new(device: &dyn Device) -> Result<SyncEvents> {
        let cpu_ready = device.create_event()?;
        let gpu_ready = device.create_event().map_err(|err| {
            device.destroy_event(cpu_ready);
            err
        })?;
        let gpu_done = device.create_event().map_err(|err| {
            device.destroy_event(cpu_ready);
            device.destroy_event(gpu_ready);
            err
        })?;
        Ok(SyncEvents {
            cpu_ready,
            gpu_ready,
            gpu_done,
        })
    }

    fn reset(&self, device: &dyn Device) -> Result<()> {
        device.reset_event(self.cpu_ready)?;
        device.reset_event(self.gpu_ready)?;
        device.reset_event(self.gpu_done)?;
        Ok(())
    }

    fn destroy(self, device: &dyn Device) {
        device.destroy_event(self.cpu_ready);
        device.destroy_event(self.gpu_ready);
        device.destroy_event(self.gpu_done);
    }
}

/// Result of one calibration attempt.
#[derive(Copy, Clone, Debug)]
struct ClockSample {
    gpu_timestamp_cycles: u64,
    cpu_timestamp_s: f64,
    /// Time between the GPU reaching the rendezvous and the CPU seeing it finish.
    confidence_window_s: f64,
}

/// Polls `event` until it is set, at most `spin_limit` times.
fn spin_until_set(device: &dyn Device, event: vk::Event, spin_limit: u64, what: &'static str) -> Result<()> {
    let mut spins = 0;
    while !device.get_event_status(event)? {
        spins += 1;
        if spins >= spin_limit {
            return Err(Error::Timeout(what));
        }
        std::hint::spin_loop();
    }
    Ok(())
}

impl ContextVk {
    /// Measures matching GPU and CPU times, and emits the GPU events read back so far using
    /// the previous and the new measurement.
    ///
    /// Several attempts are made and the one where the CPU observed the GPU in the smallest
    /// time window is kept.
    pub(super) fn synchronize_cpu_gpu_time(&mut self) -> Result<()> {
        let _span = trace_span!("synchronize_cpu_gpu_time").entered();
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let attempts = renderer.config().clock_sync_attempts.max(1);

        let events = SyncEvents::new(device)?;
        let mut best: Option<ClockSample> = None;
        for attempt in 0..attempts {
            let sample = match self.clock_sync_attempt(events) {
                Ok(sample) => sample,
                Err(err) => {
                    // release a submission that may still wait on the CPU
                    if let Err(set_err) = device.set_event(events.cpu_ready) {
                        warn!("failed to release the clock sync submission: {set_err}");
                    }
                    // the events are still referenced by the submission
                    for event in [events.cpu_ready, events.gpu_ready, events.gpu_done] {
                        self.current_garbage.push(event.into());
                    }
                    return Err(err);
                }
            };
            trace!(attempt, window = sample.confidence_window_s, "clock sync sample");
            if self.gpu_event_timestamp_origin.is_none() {
                self.gpu_event_timestamp_origin = Some(sample.gpu_timestamp_cycles);
            }
            if best.map_or(true, |b| sample.confidence_window_s < b.confidence_window_s) {
                best = Some(sample);
            }
        }
        events.destroy(device);

        let Some(best) = best else {
            return Ok(());
        };
        let next = GpuClockSync {
            gpu_timestamp_s: gpu_cycles_to_seconds(
                best.gpu_timestamp_cycles,
                self.gpu_event_timestamp_origin.unwrap_or(0),
                renderer.limits().timestamp_period,
            ),
            cpu_timestamp_s: best.cpu_timestamp_s,
        };
        debug!(
            gpu = next.gpu_timestamp_s,
            cpu = next.cpu_timestamp_s,
            window = best.confidence_window_s,
            "synchronized CPU and GPU clocks"
        );
        self.flush_gpu_events(&next);
        self.gpu_clock_sync = Some(next);
        Ok(())
    }

    fn clock_sync_attempt(&mut self, events: SyncEvents) -> Result<ClockSample> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        events.reset(device)?;
        let query = self.gpu_event_query_pool.allocate_query(device)?;
        let sample = self.sample_clocks(events, query);
        // a later reset of the slot is queued behind this submission
        self.gpu_event_query_pool.free_query(query);
        sample
    }

    fn sample_clocks(&mut self, events: SyncEvents, query: QueryHelper) -> Result<ClockSample> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let spin_limit = renderer.config().clock_sync_spin_limit;

        let primary = self.command_queue.allocate_primary_command_buffer(self.command_pool)?;
        let recorded = (|| -> Result<()> {
            device.begin_command_buffer(primary, None)?;
            device.cmd_set_event(primary, events.gpu_ready, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
            device.cmd_wait_events(
                primary,
                &[events.cpu_ready],
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TOP_OF_PIPE,
            );
            device.cmd_reset_query_pool(primary, query.pool, query.index, 1);
            device.cmd_write_timestamp(primary, vk::PipelineStageFlags::BOTTOM_OF_PIPE, query.pool, query.index);
            device.cmd_set_event(primary, events.gpu_done, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
            device.end_command_buffer(primary)?;
            Ok(())
        })();
        if let Err(err) = recorded {
            self.release_unsubmitted_primary(primary);
            return Err(err);
        }
        self.submit_primary(primary, None)?;

        spin_until_set(device, events.gpu_ready, spin_limit, "GPU ready event")?;
        let start = self.trace_sink.monotonic_time();
        device.set_event(events.cpu_ready)?;
        let cpu_timestamp_s = self.trace_sink.monotonic_time();
        spin_until_set(device, events.gpu_done, spin_limit, "GPU done event")?;
        let end = self.trace_sink.monotonic_time();

        self.command_queue
            .finish_to_serial(renderer.last_submitted_serial(), renderer.max_fence_wait_ns())?;
        let gpu_timestamp_cycles = device
            .get_query_result(query.pool, query.index)?
            .ok_or(Error::Timeout("clock sync timestamp"))?;

        Ok(ClockSample {
            gpu_timestamp_cycles,
            cpu_timestamp_s,
            confidence_window_s: end - start,
        })
    }

    /// Records a timestamp into `commands`, to be emitted as a trace event once the
    /// submission has completed.
    pub(super) fn trace_gpu_event(&mut self, commands: vk::CommandBuffer, phase: char, name: String) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let query = self.gpu_event_query_pool.allocate_query(device)?;
        device.cmd_reset_query_pool(commands, query.pool, query.index, 1);
        device.cmd_write_timestamp(commands, vk::PipelineStageFlags::BOTTOM_OF_PIPE, query.pool, query.index);
        self.in_flight_gpu_event_queries.push(GpuEventQuery {
            name,
            phase,
            query,
            serial: renderer.current_queue_serial(),
        });
        Ok(())
    }

    /// Drops the timestamps queued after the first `count`; their commands were never submitted.
    pub(super) fn discard_gpu_event_queries(&mut self, count: usize) {
        for event_query in self.in_flight_gpu_event_queries.drain(count..) {
            self.gpu_event_query_pool.free_query(event_query.query);
        }
    }

    /// Reads back the timestamps of completed submissions, oldest first.
    pub(super) fn check_completed_gpu_events(&mut self) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let last_completed = renderer.last_completed_serial();

        let mut finished = 0;
        for event_query in self.in_flight_gpu_event_queries.iter() {
            if event_query.serial > last_completed {
                break;
            }
            let Some(gpu_timestamp_cycles) = device.get_query_result(event_query.query.pool, event_query.query.index)?
            else {
                break;
            };
            self.gpu_events.push(GpuEvent {
                gpu_timestamp_cycles,
                name: event_query.name.clone(),
                phase: event_query.phase,
            });
            self.gpu_event_query_pool.free_query(event_query.query);
            finished += 1;
        }
        self.in_flight_gpu_event_queries.drain(..finished);
        Ok(())
    }

    /// Emits the pending GPU events to the trace sink, mapped to CPU time between the last
    /// clock measurement and `next`.
    fn flush_gpu_events(&mut self, next: &GpuClockSync) {
        if self.gpu_events.is_empty() {
            return;
        }
        let last = self.gpu_clock_sync.unwrap_or(*next);
        let origin = self.gpu_event_timestamp_origin.unwrap_or(0);
        let period = self.renderer.limits().timestamp_period;
        debug!(count = self.gpu_events.len(), "flushing GPU events");
        for event in self.gpu_events.drain(..) {
            let gpu_timestamp_s = gpu_cycles_to_seconds(event.gpu_timestamp_cycles, origin, period);
            let timestamp_s = drift_adjusted_time(gpu_timestamp_s, &last, next);
            self.trace_sink
                .add_trace_event(event.phase, &event.name, self.next_trace_event_id, timestamp_s);
            self.next_trace_event_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, DeviceLimits, Features},
        renderer::Renderer,
        soft::{CompletionMode, SoftDevice},
        trace::RecordingTraceSink,
    };
    use std::rc::Rc;

    #[test]
    fn failed_clock_sync_gives_back_its_query() {
        let device = Rc::new(SoftDevice::new(CompletionMode::Immediate));
        let config = Config {
            timestamp_query_pool_size: 1,
            clock_sync_spin_limit: 100,
            ..Config::default()
        };
        let renderer = Renderer::new(device.clone(), DeviceLimits::default(), Features::default(), config);
        let mut context = ContextVk::new(renderer, Rc::new(RecordingTraceSink::new(true))).unwrap();
        assert_eq!(device.live_query_pools(), 1);

        device.set_completion_mode(CompletionMode::Manual);
        assert!(matches!(context.synchronize_cpu_gpu_time(), Err(Error::Timeout(_))));
        device.set_completion_mode(CompletionMode::Immediate);
        context.check_completed_commands().unwrap();

        // the single slot is free again
        context.synchronize_cpu_gpu_time().unwrap();
        assert_eq!(device.live_query_pools(), 1);
        context.destroy();
        assert_eq!(device.live_query_pools(), 0);
    }
}
