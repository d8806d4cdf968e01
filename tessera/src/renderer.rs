use crate::{
    config::{Config, DeviceLimits, Features},
    device::{Device, SubmitInfo},
    error::{Error, Result},
    serial::{Serial, SerialFactory},
    vk,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};
use tracing::{debug, error};

/// State shared by every context submitting to the same queue.
///
/// Holds the device, its limits, and the queue-wide serials: the serial that the next
/// submission will receive, the serial of the last submission, and the serial of the last
/// submission known to be complete.
pub struct Renderer {
    device: Rc<dyn Device>,
    limits: DeviceLimits,
    features: Features,
    config: Config,
    serial_factory: RefCell<SerialFactory>,
    current_queue_serial: Cell<Serial>,
    last_submitted_serial: Cell<Serial>,
    last_completed_serial: Cell<Serial>,
    device_lost: Cell<bool>,
    /// Incremented on every submission. A context whose recorded epoch differs knows that
    /// its active command buffer scope must be reopened.
    submission_epoch: Cell<u64>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("current_queue_serial", &self.current_queue_serial.get())
            .field("last_submitted_serial", &self.last_submitted_serial.get())
            .field("last_completed_serial", &self.last_completed_serial.get())
            .field("device_lost", &self.device_lost.get())
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub fn new(device: Rc<dyn Device>, limits: DeviceLimits, features: Features, config: Config) -> Rc<Renderer> {
        let mut serial_factory = SerialFactory::default();
        let current_queue_serial = serial_factory.generate();
        Rc::new(Renderer {
            device,
            limits,
            features,
            config,
            serial_factory: RefCell::new(serial_factory),
            current_queue_serial: Cell::new(current_queue_serial),
            last_submitted_serial: Cell::new(Serial::ZERO),
            last_completed_serial: Cell::new(Serial::ZERO),
            device_lost: Cell::new(false),
            submission_epoch: Cell::new(0),
        })
    }

    pub fn device(&self) -> &dyn Device {
        &*self.device
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serial that the next submission will receive.
    pub fn current_queue_serial(&self) -> Serial {
        self.current_queue_serial.get()
    }

    pub fn last_submitted_serial(&self) -> Serial {
        self.last_submitted_serial.get()
    }

    pub fn last_completed_serial(&self) -> Serial {
        self.last_completed_serial.get()
    }

    pub fn submission_epoch(&self) -> u64 {
        self.submission_epoch.get()
    }

    pub fn max_fence_wait_ns(&self) -> u64 {
        self.config.max_fence_wait.as_nanos() as u64
    }

    /// Submits work to the queue and returns the serial assigned to it.
    pub fn queue_submit(&self, submit: &SubmitInfo, fence: vk::Fence) -> Result<Serial> {
        if self.device_lost.get() {
            return Err(Error::DeviceLost);
        }
        if let Err(result) = self.device.queue_submit(submit, fence) {
            let err = Error::from(result);
            if err.is_device_lost() {
                self.notify_device_lost();
            }
            return Err(err);
        }

        let serial = self.current_queue_serial.get();
        self.last_submitted_serial.set(serial);
        self.current_queue_serial.set(self.serial_factory.borrow_mut().generate());
        self.submission_epoch.set(self.submission_epoch.get() + 1);
        debug!(%serial, command_buffers = submit.command_buffers.len(), "queue submit");
        Ok(serial)
    }

    /// Records that all submissions up to `serial` have completed.
    pub fn on_completed_serial(&self, serial: Serial) {
        if serial > self.last_completed_serial.get() {
            self.last_completed_serial.set(serial);
        }
    }

    pub fn notify_device_lost(&self) {
        if !self.device_lost.replace(true) {
            error!("device lost");
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.get()
    }
}
