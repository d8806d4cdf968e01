//! Submission history and serial-ordered resource reclamation.
use crate::{
    command_allocator::PersistentCommandPool,
    device::{Device, SubmitInfo},
    error::{Error, Result},
    fence::{FenceRecycler, SharedFence},
    garbage::{GarbageAndSerial, GarbageObject},
    renderer::Renderer,
    serial::Serial,
    vk,
};
use std::{collections::VecDeque, mem, rc::Rc};
use tracing::{debug, warn};

/// A submitted primary command buffer, together with the transient pool its secondary command
/// buffers were allocated from and the fence signaled when it completes.
///
/// Batches are move-only: ownership goes from `CommandQueue::submit_frame` to the in-flight list,
/// and the batch is consumed when its resources are released.
#[derive(Debug)]
pub struct CommandBatch {
    primary_commands: vk::CommandBuffer,
    command_pool: Option<vk::CommandPool>,
    fence: SharedFence,
    serial: Serial,
}

impl CommandBatch {
    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn fence(&self) -> &SharedFence {
        &self.fence
    }
}

/// Owns the ordered list of in-flight command batches and the serial-tagged garbage queue.
#[derive(Debug)]
pub struct CommandQueue {
    renderer: Rc<Renderer>,
    /// Submitted batches, in serial order.
    in_flight: VecDeque<CommandBatch>,
    /// Garbage waiting for the completion of a submission, in serial order.
    garbage_queue: VecDeque<GarbageAndSerial>,
    /// `None` if primary command buffers are transient.
    primary_pool: Option<PersistentCommandPool>,
    fence_recycler: FenceRecycler,
}

impl CommandQueue {
    pub fn new(renderer: Rc<Renderer>) -> Result<CommandQueue> {
        let primary_pool = if renderer.features().transient_command_buffer {
            None
        } else {
            Some(PersistentCommandPool::new(renderer.device())?)
        };
        Ok(CommandQueue {
            renderer,
            in_flight: VecDeque::new(),
            garbage_queue: VecDeque::new(),
            primary_pool,
            fence_recycler: FenceRecycler::default(),
        })
    }

    /// Releases every resource owned by the queue, waiting for the GPU first unless the
    /// device is lost.
    pub fn destroy(&mut self) {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        if !renderer.is_device_lost() {
            if let Err(err) = device.wait_idle() {
                debug!("wait_idle failed during destruction: {err}");
            }
        }
        for batch in mem::take(&mut self.in_flight) {
            self.release_batch(device, batch, false);
        }
        self.clear_all_garbage();
        if let Some(pool) = self.primary_pool.take() {
            pool.destroy(device);
        }
        self.fence_recycler.destroy(device);
    }

    /// Returns a primary command buffer ready to be recorded.
    ///
    /// `transient_pool` is the pool of the submission being recorded; it is only used if
    /// primary command buffers are transient.
    pub fn allocate_primary_command_buffer(&mut self, transient_pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let device = self.renderer.device();
        let cb = match self.primary_pool {
            Some(ref mut pool) => pool.allocate(device)?,
            None => device.allocate_command_buffer(transient_pool, vk::CommandBufferLevel::PRIMARY)?,
        };
        Ok(cb)
    }

    /// Returns a command buffer that is no longer executing.
    pub fn release_primary_command_buffer(
        &mut self,
        cb: vk::CommandBuffer,
        transient_pool: Option<vk::CommandPool>,
    ) -> Result<()> {
        let device = self.renderer.device();
        match self.primary_pool {
            Some(ref mut pool) => pool.collect(device, cb)?,
            None => {
                if let Some(transient_pool) = transient_pool {
                    device.free_command_buffer(transient_pool, cb);
                }
            }
        }
        Ok(())
    }

    /// Returns a fresh unsignaled fence for a submission.
    pub fn new_shared_fence(&mut self) -> Result<SharedFence> {
        Ok(self.fence_recycler.new_shared_fence(self.renderer.device())?)
    }

    /// Drops a reference obtained from `new_shared_fence`.
    pub fn recycle_fence(&mut self, fence: &mut SharedFence) {
        if let Err(err) = fence.reset_and_recycle(self.renderer.device(), &mut self.fence_recycler) {
            debug!("failed to recycle fence: {err}");
        }
    }

    /// Submits a recorded primary command buffer.
    ///
    /// `submit.command_buffers` must contain exactly `primary`. The batch keeps a reference to
    /// `fence` and takes ownership of `command_pool` and of the pending `garbage`, which are
    /// tagged with the serial of the submission; `command_pool` is replaced with a new pool for
    /// the next submission.
    pub fn submit_frame(
        &mut self,
        submit: &SubmitInfo,
        fence: &SharedFence,
        garbage: &mut Vec<GarbageObject>,
        command_pool: &mut vk::CommandPool,
        primary: vk::CommandBuffer,
    ) -> Result<Serial> {
        debug_assert_eq!(submit.command_buffers, &[primary]);
        let renderer = self.renderer.clone();
        let device = renderer.device();

        let serial = match renderer.queue_submit(submit, fence.get()) {
            Ok(serial) => serial,
            Err(err) => {
                // The command buffer never reached the GPU.
                if let Err(release_err) = self.release_primary_command_buffer(primary, Some(*command_pool)) {
                    warn!(?primary, "failed to release unsubmitted primary command buffer: {release_err}");
                }
                return Err(err);
            }
        };

        let batch = CommandBatch {
            primary_commands: primary,
            command_pool: Some(mem::take(command_pool)),
            fence: fence.copy(),
            serial,
        };
        if !garbage.is_empty() {
            self.garbage_queue.push_back(GarbageAndSerial {
                objects: mem::take(garbage),
                serial,
            });
        }
        self.in_flight.push_back(batch);

        self.check_completed_commands()?;

        // Keep the backlog of unconfirmed work bounded.
        let limit = renderer.config().in_flight_commands_limit;
        while self.in_flight.len() > limit {
            let oldest = self.in_flight[0].serial;
            warn!(in_flight = self.in_flight.len(), limit, "too many in-flight submissions, waiting for {oldest}");
            self.finish_to_serial(oldest, renderer.max_fence_wait_ns())?;
        }

        *command_pool = device.create_command_pool(true)?;
        Ok(serial)
    }

    /// Reclaims the resources of the batches that have completed, oldest first, then frees
    /// the garbage of completed submissions.
    pub fn check_completed_commands(&mut self) -> Result<()> {
        let renderer = self.renderer.clone();
        let device = renderer.device();

        while let Some(batch) = self.in_flight.front() {
            if !batch.fence.is_signaled(device)? {
                break;
            }
            let Some(batch) = self.in_flight.pop_front() else {
                break;
            };
            debug!(serial = %batch.serial, "submission complete");
            renderer.on_completed_serial(batch.serial);
            self.release_batch(device, batch, true);
        }

        let last_completed = renderer.last_completed_serial();
        while self
            .garbage_queue
            .front()
            .map_or(false, |garbage| garbage.serial <= last_completed)
        {
            if let Some(garbage) = self.garbage_queue.pop_front() {
                debug!(serial = %garbage.serial, objects = garbage.objects.len(), "freeing garbage");
                garbage.destroy(device);
            }
        }
        Ok(())
    }

    /// Blocks until the submission with the given serial (or the first one after it) completes.
    ///
    /// If every in-flight batch is older than `serial`, waits for the newest one.
    pub fn finish_to_serial(&mut self, serial: Serial, timeout_ns: u64) -> Result<()> {
        if self.in_flight.is_empty() {
            return Ok(());
        }
        let index = self
            .in_flight
            .iter()
            .position(|batch| batch.serial >= serial)
            .unwrap_or(self.in_flight.len() - 1);
        let batch = &self.in_flight[index];
        debug!(target_serial = %serial, batch_serial = %batch.serial, "waiting for submission");
        batch.fence.wait(self.renderer.device(), timeout_ns).map_err(|result| match result {
            vk::Result::TIMEOUT => Error::Timeout("submission fence"),
            other => Error::from(other),
        })?;
        self.check_completed_commands()
    }

    /// Releases every in-flight batch without expecting them to complete.
    pub fn handle_device_lost(&mut self) {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        let timeout = renderer.max_fence_wait_ns();
        for batch in mem::take(&mut self.in_flight) {
            // best effort: no completion signal is guaranteed after a device loss
            if let Err(err) = batch.fence.wait(device, timeout) {
                debug!(serial = %batch.serial, "fence wait failed after device loss: {err}");
            }
            self.release_batch(device, batch, false);
        }
    }

    pub fn has_in_flight_commands(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of garbage objects waiting for their submission to complete.
    pub fn pending_garbage_count(&self) -> usize {
        self.garbage_queue.iter().map(|g| g.objects.len()).sum()
    }

    /// Frees all garbage immediately, whether or not the GPU is done with it.
    pub fn clear_all_garbage(&mut self) {
        let device = self.renderer.device();
        for garbage in self.garbage_queue.drain(..) {
            garbage.destroy(device);
        }
    }

    /// Returns a reference to the fence of the most recent submission (empty if none is in flight).
    pub fn last_submitted_fence(&self) -> SharedFence {
        self.in_flight
            .back()
            .map(|batch| batch.fence.copy())
            .unwrap_or_default()
    }

    fn release_batch(&mut self, device: &dyn Device, batch: CommandBatch, recycle_fence: bool) {
        let CommandBatch {
            primary_commands,
            command_pool,
            mut fence,
            serial,
        } = batch;
        if recycle_fence {
            if let Err(err) = fence.reset_and_recycle(device, &mut self.fence_recycler) {
                debug!(%serial, "failed to recycle fence: {err}");
            }
        } else {
            fence.reset_and_destroy(device);
        }
        if let Err(err) = self.release_primary_command_buffer(primary_commands, command_pool) {
            debug!(%serial, "failed to release primary command buffer: {err}");
        }
        if let Some(pool) = command_pool {
            device.destroy_command_pool(pool);
        }
    }
}
