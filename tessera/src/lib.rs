//! Command submission and state synchronization for a Vulkan backend of a GL-style API.
//!
//! A [`Renderer`] owns the device and the queue-wide serials. Each [`ContextVk`] records the
//! draws and dispatches of a frontend into command buffers, revalidating GPU state through dirty
//! bits, and submits them through its [`CommandQueue`], which tracks in-flight batches and frees
//! resources once the GPU is done with them.

pub use ash::{self, vk};

pub use command_graph::*;
pub use command_queue::*;
pub use config::*;
pub use context::*;
pub use descriptor_pool::*;
pub use device::*;
pub use dynamic_buffer::*;
pub use error::*;
pub use fence::*;
pub use garbage::*;
pub use pipeline::*;
pub use program::*;
pub use query_pool::*;
pub use renderer::*;
pub use serial::*;
pub use state::*;
pub use trace::*;
pub use types::*;
pub use vertex_array::*;

mod command_allocator;
mod command_graph;
mod command_queue;
mod config;
mod context;
mod descriptor_pool;
mod device;
mod dynamic_buffer;
mod error;
mod fence;
mod garbage;
mod pipeline;
mod program;
mod query_pool;
mod renderer;
mod serial;
pub mod soft;
mod state;
mod trace;
mod types;
mod vertex_array;
