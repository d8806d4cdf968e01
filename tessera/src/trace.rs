//! GPU trace events and CPU/GPU clock correlation.
use crate::{query_pool::QueryHelper, serial::Serial};
use std::{cell::RefCell, time::Instant};

/// Trace event phase: beginning of a duration event.
pub const PHASE_BEGIN: char = 'B';
/// Trace event phase: end of a duration event.
pub const PHASE_END: char = 'E';
/// Trace event phase: instant event.
pub const PHASE_INSTANT: char = 'I';

/// Receives GPU trace events once their timestamps are known.
pub trait TraceSink {
    /// Monotonic CPU time in seconds.
    fn monotonic_time(&self) -> f64;
    /// Whether GPU events should be recorded at all. Queried once, when a context is created.
    fn is_gpu_tracing_enabled(&self) -> bool;
    /// Emits an event. `timestamp_s` is on the `monotonic_time` timeline.
    fn add_trace_event(&self, phase: char, name: &str, id: u64, timestamp_s: f64);
}

/// A sink with GPU tracing disabled.
#[derive(Debug)]
pub struct NullTraceSink {
    start: Instant,
}

impl Default for NullTraceSink {
    fn default() -> Self {
        NullTraceSink { start: Instant::now() }
    }
}

impl TraceSink for NullTraceSink {
    fn monotonic_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn is_gpu_tracing_enabled(&self) -> bool {
        false
    }

    fn add_trace_event(&self, _phase: char, _name: &str, _id: u64, _timestamp_s: f64) {}
}

/// An emitted trace event.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    pub phase: char,
    pub name: String,
    pub id: u64,
    pub timestamp_s: f64,
}

/// A sink that keeps every event in memory.
#[derive(Debug)]
pub struct RecordingTraceSink {
    start: Instant,
    enabled: bool,
    events: RefCell<Vec<TraceEvent>>,
}

impl RecordingTraceSink {
    pub fn new(enabled: bool) -> RecordingTraceSink {
        RecordingTraceSink {
            start: Instant::now(),
            enabled,
            events: RefCell::new(vec![]),
        }
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<TraceEvent> {
        self.events.take()
    }
}

impl TraceSink for RecordingTraceSink {
    fn monotonic_time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn is_gpu_tracing_enabled(&self) -> bool {
        self.enabled
    }

    fn add_trace_event(&self, phase: char, name: &str, id: u64, timestamp_s: f64) {
        self.events.borrow_mut().push(TraceEvent {
            phase,
            name: name.to_string(),
            id,
            timestamp_s,
        });
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// A timestamp written by a submission that may not have completed yet.
#[derive(Clone, Debug)]
pub struct GpuEventQuery {
    pub name: String,
    pub phase: char,
    pub query: QueryHelper,
    /// Serial of the submission writing the timestamp.
    pub serial: Serial,
}

/// A GPU event whose timestamp has been read back.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuEvent {
    pub gpu_timestamp_cycles: u64,
    pub name: String,
    pub phase: char,
}

/// Matching GPU and CPU times, in seconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GpuClockSync {
    /// Relative to the timestamp origin of the context.
    pub gpu_timestamp_s: f64,
    pub cpu_timestamp_s: f64,
}

impl GpuClockSync {
    /// CPU time minus GPU time.
    pub fn diff(&self) -> f64 {
        self.cpu_timestamp_s - self.gpu_timestamp_s
    }
}

/// Converts GPU cycles to seconds since `origin`.
pub fn gpu_cycles_to_seconds(cycles: u64, origin: u64, timestamp_period_ns: f32) -> f64 {
    cycles.saturating_sub(origin) as f64 * timestamp_period_ns as f64 * 1e-9
}

/// Maps a GPU time between two calibration points to the CPU timeline.
///
/// The CPU-GPU difference is interpolated linearly between `last` and `next`. Events recorded
/// long before `next` inherit the drift measured over the whole interval.
pub fn drift_adjusted_time(gpu_timestamp_s: f64, last: &GpuClockSync, next: &GpuClockSync) -> f64 {
    let interval = next.gpu_timestamp_s - last.gpu_timestamp_s;
    let slope = if interval > 0.0 {
        (next.diff() - last.diff()) / interval
    } else {
        0.0
    };
    gpu_timestamp_s + last.diff() + slope * (gpu_timestamp_s - last.gpu_timestamp_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_drift_is_a_constant_offset() {
        let last = GpuClockSync {
            gpu_timestamp_s: 1.0,
            cpu_timestamp_s: 11.0,
        };
        let next = GpuClockSync {
            gpu_timestamp_s: 3.0,
            cpu_timestamp_s: 13.0,
        };
        assert_eq!(drift_adjusted_time(2.0, &last, &next), 12.0);
    }

    #[test]
    fn drift_is_interpolated() {
        let last = GpuClockSync {
            gpu_timestamp_s: 0.0,
            cpu_timestamp_s: 10.0,
        };
        // the CPU clock gained one second over two GPU seconds
        let next = GpuClockSync {
            gpu_timestamp_s: 2.0,
            cpu_timestamp_s: 13.0,
        };
        assert!((drift_adjusted_time(1.0, &last, &next) - 11.5).abs() < 1e-9);
        assert!((drift_adjusted_time(2.0, &last, &next) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn cycles_are_relative_to_origin() {
        assert!((gpu_cycles_to_seconds(3_000, 1_000, 1.0) - 2e-6).abs() < 1e-15);
        assert_eq!(gpu_cycles_to_seconds(500, 1_000, 1.0), 0.0);
    }
}
