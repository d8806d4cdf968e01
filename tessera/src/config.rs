//! Renderer features, tunables and device limits.
use crate::vk;
use std::time::Duration;

/// Optional behaviors of the renderer.
#[derive(Copy, Clone, Debug)]
pub struct Features {
    /// Allocate primary command buffers from the transient per-submission pool instead of
    /// recycling them through a persistent pool.
    pub transient_command_buffer: bool,
    /// Flip the Y axis of the viewport when rendering to the default framebuffer.
    pub flip_viewport_y: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            transient_command_buffer: false,
            flip_viewport_y: true,
        }
    }
}

/// Tunables of the submission engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to block on a fence before giving up. A timed-out wait is fatal.
    pub max_fence_wait: Duration,
    /// Soft bound on the number of unconfirmed command batches.
    pub in_flight_commands_limit: usize,
    /// Number of CPU/GPU clock calibration attempts; the tightest one is kept.
    pub clock_sync_attempts: u32,
    /// Maximum number of polls in the busy-wait loops of clock calibration.
    pub clock_sync_spin_limit: u64,
    /// Size of each backing buffer of the driver uniforms ring.
    pub driver_uniforms_buffer_size: u64,
    /// Size of each backing buffer used to stream client vertex data.
    pub streaming_buffer_size: u64,
    /// Size of each backing buffer holding default-block uniforms.
    pub default_uniforms_buffer_size: u64,
    /// Number of descriptor sets in each pool of a dynamic descriptor pool.
    pub descriptor_pool_max_sets: u32,
    /// Number of timestamp queries in each query pool.
    pub timestamp_query_pool_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_fence_wait: Duration::from_secs(10),
            in_flight_commands_limit: 100,
            clock_sync_attempts: 10,
            clock_sync_spin_limit: 1 << 22,
            driver_uniforms_buffer_size: 16 * 1024,
            streaming_buffer_size: 1024 * 1024,
            default_uniforms_buffer_size: 64 * 1024,
            descriptor_pool_max_sets: 128,
            timestamp_query_pool_size: 64,
        }
    }
}

/// The subset of physical device limits used by the engine.
#[derive(Copy, Clone, Debug)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    pub non_coherent_atom_size: u64,
    pub max_vertex_input_bindings: u32,
}

impl DeviceLimits {
    pub fn from_vk(limits: &vk::PhysicalDeviceLimits) -> DeviceLimits {
        DeviceLimits {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            timestamp_period: limits.timestamp_period,
            non_coherent_atom_size: limits.non_coherent_atom_size,
            max_vertex_input_bindings: limits.max_vertex_input_bindings,
        }
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            timestamp_period: 1.0,
            non_coherent_atom_size: 64,
            max_vertex_input_bindings: 16,
        }
    }
}
