//! Ring allocation of host-visible buffer memory.
use crate::{
    device::Device,
    error::Result,
    garbage::GarbageObject,
    renderer::Renderer,
    serial::Serial,
    vk,
};
use std::collections::VecDeque;
use tracing::trace;

/// A region returned by `DynamicBuffer::allocate`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DynamicAllocation {
    pub buffer: vk::Buffer,
    pub offset: u64,
    /// Whether the allocation was made in a different backing buffer than the previous one.
    pub new_buffer_allocated: bool,
}

#[derive(Copy, Clone, Debug)]
struct BackingBuffer {
    buffer: vk::Buffer,
    size: u64,
}

/// Suballocates regions from a sequence of backing buffers.
///
/// When the current buffer is full, it is retired and replaced. Retired buffers stay unusable
/// until the submission that uses them is made; `release_in_flight_buffers` then tags them with
/// its serial and they are reused once it has completed.
#[derive(Debug)]
pub struct DynamicBuffer {
    usage: vk::BufferUsageFlags,
    alignment: u64,
    buffer_size: u64,
    current: Option<BackingBuffer>,
    next_offset: u64,
    last_flush_offset: u64,
    /// Retired buffers used by the commands currently being recorded. Never reused.
    in_flight: Vec<BackingBuffer>,
    /// Retired buffers waiting for their submission to complete, in serial order.
    retired: VecDeque<(BackingBuffer, Serial)>,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

impl DynamicBuffer {
    pub fn new(usage: vk::BufferUsageFlags, alignment: u64, buffer_size: u64) -> DynamicBuffer {
        DynamicBuffer {
            usage,
            alignment: alignment.max(1),
            buffer_size,
            current: None,
            next_offset: 0,
            last_flush_offset: 0,
            in_flight: vec![],
            retired: VecDeque::new(),
        }
    }

    /// Allocates `size` bytes.
    pub fn allocate(&mut self, renderer: &Renderer, size: u64) -> Result<DynamicAllocation> {
        let device = renderer.device();
        let offset = align_up(self.next_offset, self.alignment);

        if let Some(current) = self.current {
            if offset + size <= current.size {
                self.next_offset = offset + size;
                return Ok(DynamicAllocation {
                    buffer: current.buffer,
                    offset,
                    new_buffer_allocated: false,
                });
            }
            // retire the full buffer
            self.flush(device)?;
            self.in_flight.push(current);
            self.current = None;
        }

        if size > self.buffer_size {
            self.buffer_size = size.next_power_of_two();
        }
        let backing = self.get_or_create_buffer(renderer)?;
        trace!(buffer = ?backing.buffer, size = backing.size, "new dynamic buffer");
        self.current = Some(backing);
        self.next_offset = size;
        self.last_flush_offset = 0;
        Ok(DynamicAllocation {
            buffer: backing.buffer,
            offset: 0,
            new_buffer_allocated: true,
        })
    }

    /// Allocates a region and copies `data` into it.
    pub fn allocate_and_write(&mut self, renderer: &Renderer, data: &[u8]) -> Result<DynamicAllocation> {
        let allocation = self.allocate(renderer, data.len() as u64)?;
        renderer
            .device()
            .write_buffer(allocation.buffer, allocation.offset, data)?;
        Ok(allocation)
    }

    fn get_or_create_buffer(&mut self, renderer: &Renderer) -> Result<BackingBuffer> {
        let device = renderer.device();
        let last_completed = renderer.last_completed_serial();
        while let Some(&(backing, serial)) = self.retired.front() {
            if serial > last_completed {
                break;
            }
            self.retired.pop_front();
            if backing.size >= self.buffer_size {
                return Ok(backing);
            }
            // too small after growing
            device.destroy_buffer(backing.buffer);
        }
        let buffer = device.create_buffer(self.buffer_size, self.usage)?;
        Ok(BackingBuffer {
            buffer,
            size: self.buffer_size,
        })
    }

    /// Tags the buffers retired since the last call with `serial`, the submission that carried
    /// the commands using them, so that they can be reused once it completes.
    pub fn release_in_flight_buffers(&mut self, serial: Serial) {
        for backing in self.in_flight.drain(..) {
            self.retired.push_back((backing, serial));
        }
    }

    /// Makes the writes to the current buffer visible to the GPU.
    pub fn flush(&mut self, device: &dyn Device) -> Result<()> {
        if let Some(current) = self.current {
            if self.next_offset > self.last_flush_offset {
                device.flush_buffer(
                    current.buffer,
                    self.last_flush_offset,
                    self.next_offset - self.last_flush_offset,
                )?;
                self.last_flush_offset = self.next_offset;
            }
        }
        Ok(())
    }

    /// Current backing buffer, if any.
    pub fn current_buffer(&self) -> Option<vk::Buffer> {
        self.current.map(|b| b.buffer)
    }

    /// Number of backing buffers owned, including retired ones.
    pub fn buffer_count(&self) -> usize {
        self.current.iter().count() + self.in_flight.len() + self.retired.len()
    }

    /// Moves every buffer to `garbage`.
    pub fn release(&mut self, garbage: &mut Vec<GarbageObject>) {
        let current = self.current.take();
        garbage.extend(current.into_iter().map(|b| GarbageObject::from(b.buffer)));
        garbage.extend(self.in_flight.drain(..).map(|b| GarbageObject::from(b.buffer)));
        garbage.extend(self.retired.drain(..).map(|(b, _)| GarbageObject::from(b.buffer)));
        self.next_offset = 0;
        self.last_flush_offset = 0;
    }

    /// Destroys every buffer immediately. The GPU must be done with them.
    pub fn destroy(&mut self, device: &dyn Device) {
        let mut garbage = vec![];
        self.release(&mut garbage);
        for object in garbage {
            object.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, DeviceLimits, Features},
        soft::SoftDevice,
    };
    use std::rc::Rc;

    fn renderer() -> (Rc<SoftDevice>, Rc<Renderer>) {
        let device = Rc::new(SoftDevice::default());
        let renderer = Renderer::new(
            device.clone(),
            DeviceLimits::default(),
            Features::default(),
            Config::default(),
        );
        (device, renderer)
    }

    #[test]
    fn allocations_are_aligned_and_wrap_to_a_new_buffer() {
        let (device, renderer) = renderer();
        let mut buffer = DynamicBuffer::new(vk::BufferUsageFlags::UNIFORM_BUFFER, 256, 1024);

        let a = buffer.allocate(&renderer, 80).unwrap();
        assert!(a.new_buffer_allocated);
        assert_eq!(a.offset, 0);
        let b = buffer.allocate(&renderer, 80).unwrap();
        assert!(!b.new_buffer_allocated);
        assert_eq!(b.offset, 256);
        assert_eq!(a.buffer, b.buffer);

        buffer.allocate(&renderer, 80).unwrap();
        buffer.allocate(&renderer, 80).unwrap();
        let e = buffer.allocate(&renderer, 80).unwrap();
        assert!(e.new_buffer_allocated);
        assert_ne!(e.buffer, a.buffer);
        assert_eq!(device.stats().buffers_created, 2);
        assert_eq!(buffer.buffer_count(), 2);
    }

    #[test]
    fn retired_buffers_are_reused_after_completion() {
        let (device, renderer) = renderer();
        let mut buffer = DynamicBuffer::new(vk::BufferUsageFlags::UNIFORM_BUFFER, 256, 256);
        let first = buffer.allocate(&renderer, 256).unwrap();
        buffer.allocate(&renderer, 256).unwrap();
        buffer.release_in_flight_buffers(renderer.current_queue_serial());

        // not complete yet: a third buffer is created
        buffer.allocate(&renderer, 256).unwrap();
        assert_eq!(device.stats().buffers_created, 3);

        renderer.on_completed_serial(renderer.current_queue_serial());
        let reused = buffer.allocate(&renderer, 256).unwrap();
        assert_eq!(reused.buffer, first.buffer);
        assert_eq!(device.stats().buffers_created, 3);
        assert_eq!(buffer.buffer_count(), 3);
    }

    #[test]
    fn untagged_buffers_are_never_reused() {
        let (device, renderer) = renderer();
        let mut buffer = DynamicBuffer::new(vk::BufferUsageFlags::UNIFORM_BUFFER, 256, 256);
        let first = buffer.allocate(&renderer, 256).unwrap();
        buffer.allocate(&renderer, 256).unwrap();

        // completes a submission that does not carry the commands using `first`
        renderer.on_completed_serial(renderer.current_queue_serial());
        let third = buffer.allocate(&renderer, 256).unwrap();
        assert_ne!(third.buffer, first.buffer);
        assert_eq!(device.stats().buffers_created, 3);
    }
}
