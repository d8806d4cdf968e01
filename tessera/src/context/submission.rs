//! Flush, finish and device loss.
use super::ContextVk;
use crate::{
    device::SubmitInfo,
    error::Result,
    fence::SharedFence,
    serial::Serial,
    trace::{PHASE_BEGIN, PHASE_END},
    vk,
};
use tracing::{debug, trace_span, warn};

impl ContextVk {
    /// Submits the commands recorded so far.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.flush_impl(None);
        self.check_error(result)
    }

    /// Submits the commands recorded so far and signals `semaphore` when they complete.
    ///
    /// A submission is made even if nothing was recorded.
    pub fn flush_and_signal(&mut self, semaphore: vk::Semaphore) -> Result<()> {
        let result = self.flush_impl(Some(semaphore));
        self.check_error(result)
    }

    /// Submits the commands recorded so far and waits for all submissions to complete.
    pub fn finish(&mut self) -> Result<()> {
        let result = self.finish_impl();
        self.check_error(result)
    }

    /// Waits for the submission with the given serial, then frees what the completed
    /// submissions held. Later submissions stay in flight.
    pub fn finish_to_serial(&mut self, serial: Serial) -> Result<()> {
        let timeout_ns = self.renderer.max_fence_wait_ns();
        let result = self.command_queue.finish_to_serial(serial, timeout_ns);
        self.check_error(result)
    }

    /// Makes the next submission wait on `semaphore` at the given stages.
    pub fn add_wait_semaphore(&mut self, semaphore: vk::Semaphore, stage_mask: vk::PipelineStageFlags) {
        self.wait_semaphores.push(semaphore);
        self.wait_semaphore_stage_masks.push(stage_mask);
    }

    /// Reference to the fence of the latest submission, to build sync objects on.
    pub fn last_submitted_fence(&self) -> SharedFence {
        self.command_queue.last_submitted_fence()
    }

    /// Serial of the latest submission.
    pub fn last_submitted_serial(&self) -> Serial {
        self.renderer.last_submitted_serial()
    }

    /// Retires completed submissions and frees the resources they held.
    pub fn check_completed_commands(&mut self) -> Result<()> {
        let result = self.command_queue.check_completed_commands();
        let result = self.check_error(result);
        if result.is_ok() && self.gpu_events_enabled {
            let events = self.check_completed_gpu_events();
            return self.check_error(events);
        }
        result
    }

    pub fn is_device_lost(&self) -> bool {
        self.renderer.is_device_lost()
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub(super) fn flush_impl(&mut self, signal_semaphore: Option<vk::Semaphore>) -> Result<()> {
        self.check_device_lost()?;
        if self.command_graph.is_empty() && signal_semaphore.is_none() && self.wait_semaphores.is_empty() {
            return Ok(());
        }
        let _span = trace_span!("flush").entered();

        self.close_command_scopes();
        let queued_gpu_events = self.in_flight_gpu_event_queries.len();
        let primary = self.command_queue.allocate_primary_command_buffer(self.command_pool)?;
        let recorded = self
            .record_primary(primary)
            .and_then(|()| self.flush_streaming_buffers());
        if let Err(err) = recorded {
            self.release_unsubmitted_primary(primary);
            self.discard_gpu_event_queries(queued_gpu_events);
            return Err(err);
        }

        let serial = match self.submit_primary(primary, signal_semaphore) {
            Ok(serial) => serial,
            Err(err) => {
                self.discard_gpu_event_queries(queued_gpu_events);
                return Err(err);
            }
        };
        self.release_in_flight_resources(serial);
        debug!(%serial, "flushed");

        if self.gpu_events_enabled {
            self.check_completed_gpu_events()?;
        }
        Ok(())
    }

    /// Records the command graph into `primary`, framed by GPU events if tracing is enabled.
    fn record_primary(&mut self, primary: vk::CommandBuffer) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        if !self.gpu_events_enabled {
            return self.command_graph.submit_commands(device, primary);
        }
        self.primary_buffer_counter += 1;
        let name = format!("Primary {}", self.primary_buffer_counter);
        device.begin_command_buffer(primary, None)?;
        self.trace_gpu_event(primary, PHASE_BEGIN, name.clone())?;
        self.command_graph.record(device, primary)?;
        self.trace_gpu_event(primary, PHASE_END, name)?;
        device.end_command_buffer(primary)?;
        Ok(())
    }

    /// Makes the data streamed since the last submission visible to the GPU.
    fn flush_streaming_buffers(&mut self) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        self.vertex_streaming.flush(device)?;
        self.index_streaming.flush(device)?;
        self.default_uniforms.flush(device)?;
        for buffer in self.default_attribute_buffers.iter_mut() {
            buffer.flush(device)?;
        }
        for driver_uniforms in self.driver_uniforms.iter_mut() {
            driver_uniforms.flush_buffer(device)?;
        }
        Ok(())
    }

    /// Gives back a primary command buffer that will not be submitted.
    pub(super) fn release_unsubmitted_primary(&mut self, primary: vk::CommandBuffer) {
        let result = self
            .command_queue
            .release_primary_command_buffer(primary, Some(self.command_pool));
        if let Err(err) = result {
            warn!(?primary, "failed to release unsubmitted primary command buffer: {err}");
        }
    }

    /// Tags the buffers, descriptor pools and pipelines used by the recorded commands with the
    /// serial of the submission that carried them. Only then do they become reusable.
    fn release_in_flight_resources(&mut self, serial: Serial) {
        self.vertex_streaming.release_in_flight_buffers(serial);
        self.index_streaming.release_in_flight_buffers(serial);
        self.default_uniforms.release_in_flight_buffers(serial);
        for buffer in self.default_attribute_buffers.iter_mut() {
            buffer.release_in_flight_buffers(serial);
        }
        for pool in self.descriptor_pools.iter_mut() {
            pool.release_in_flight_pools(serial);
        }
        for driver_uniforms in self.driver_uniforms.iter_mut() {
            driver_uniforms.release_in_flight_resources(serial);
        }
        for (program, pipeline) in self.pipelines_in_use.drain(..) {
            match pipeline {
                Some(id) => program.pipeline_cache().borrow_mut().update_serial(id, serial),
                None => program.update_compute_pipeline_serial(serial),
            }
        }
    }

    /// Submits a recorded primary along with the pending wait semaphores and garbage.
    pub(super) fn submit_primary(
        &mut self,
        primary: vk::CommandBuffer,
        signal_semaphore: Option<vk::Semaphore>,
    ) -> Result<Serial> {
        let mut fence = self.command_queue.new_shared_fence()?;
        let command_buffers = [primary];
        let submit = SubmitInfo {
            wait_semaphores: &self.wait_semaphores,
            wait_dst_stage_masks: &self.wait_semaphore_stage_masks,
            command_buffers: &command_buffers,
            signal_semaphores: signal_semaphore.as_slice(),
        };
        let result = self.command_queue.submit_frame(
            &submit,
            &fence,
            &mut self.current_garbage,
            &mut self.command_pool,
            primary,
        );
        self.command_queue.recycle_fence(&mut fence);
        let serial = result?;

        self.wait_semaphores.clear();
        self.wait_semaphore_stage_masks.clear();
        self.observed_epoch = self.renderer.submission_epoch();
        Ok(serial)
    }

    pub(super) fn finish_impl(&mut self) -> Result<()> {
        let _span = trace_span!("finish").entered();
        let renderer = self.renderer.clone();
        self.flush_impl(None)?;
        self.command_queue
            .finish_to_serial(renderer.last_submitted_serial(), renderer.max_fence_wait_ns())?;
        debug_assert!(!self.command_queue.has_in_flight_commands());
        self.command_queue.clear_all_garbage();

        if self.gpu_events_enabled {
            self.check_completed_gpu_events()?;
            if !self.in_flight_gpu_event_queries.is_empty() {
                warn!(
                    count = self.in_flight_gpu_event_queries.len(),
                    "GPU event timestamps unavailable after finish"
                );
            }
            // recalibrate so that the events read back can be placed on the CPU timeline
            if !self.gpu_events.is_empty() {
                self.synchronize_cpu_gpu_time()?;
            }
        }
        Ok(())
    }

    /// Releases everything tied to submissions that will never complete and notifies the
    /// renderer. Further operations fail with `DeviceLost`.
    pub(super) fn handle_device_lost(&mut self) {
        warn!("device lost");
        let renderer = self.renderer.clone();
        let device = renderer.device();
        self.command_queue.handle_device_lost();
        self.command_queue.clear_all_garbage();
        for object in self.current_garbage.drain(..) {
            object.destroy(device);
        }
        self.command_graph.clear();
        self.close_command_scopes();
        self.in_flight_gpu_event_queries.clear();
        self.gpu_events.clear();
        self.pipelines_in_use.clear();
        renderer.notify_device_lost();
    }
}
