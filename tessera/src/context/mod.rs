//! The rendering context: dirty-bit driven state validation, draw recording and submission.
mod draw;
mod driver_uniforms;
mod gpu_events;
mod state_sync;
mod submission;

pub use driver_uniforms::{
    pack_atomic_counter_buffer_offsets, unpack_atomic_counter_buffer_offset, ComputeDriverUniforms,
    GraphicsDriverUniforms,
};
pub use draw::Indices;

use crate::{
    command_graph::CommandGraph,
    command_queue::CommandQueue,
    descriptor_pool::{DescriptorSetAllocation, DynamicDescriptorPool},
    device::RenderPassBegin,
    dynamic_buffer::DynamicBuffer,
    error::{Error, Result},
    garbage::GarbageObject,
    pipeline::{GraphicsPipelineDesc, PipelineId, PipelineTransitionBits, MAX_VERTEX_ATTRIBS},
    program::{
        ProgramDesc, ProgramVk, ShaderStages, MAX_TRANSFORM_FEEDBACK_BUFFERS, SHADER_RESOURCES_SET_INDEX,
        TEXTURES_SET_INDEX, UNIFORMS_SET_INDEX,
    },
    query_pool::DynamicQueryPool,
    renderer::Renderer,
    state::{BufferBinding, State},
    trace::{GpuClockSync, GpuEvent, GpuEventQuery, TraceSink},
    types::{IndexType, Rect},
    vk,
};
use bitflags::bitflags;
use driver_uniforms::DriverUniformsDescriptorSet;
use std::{fmt, rc::Rc};
use tracing::{debug, trace};

bitflags! {
    /// Graphics state to revalidate before the next draw. Bits are processed in declaration order.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GraphicsDirtyBits: u32 {
        const DEFAULT_ATTRIBS = 1 << 0;
        const PIPELINE = 1 << 1;
        const TEXTURES = 1 << 2;
        const VERTEX_BUFFERS = 1 << 3;
        const INDEX_BUFFER = 1 << 4;
        const DRIVER_UNIFORMS = 1 << 5;
        const SHADER_RESOURCES = 1 << 6;
        const TRANSFORM_FEEDBACK_BUFFERS = 1 << 7;
        const DESCRIPTOR_SETS = 1 << 8;
    }

    /// Compute state to revalidate before the next dispatch. Bits are processed in declaration order.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ComputeDirtyBits: u32 {
        const PIPELINE = 1 << 0;
        const TEXTURES = 1 << 1;
        const DRIVER_UNIFORMS = 1 << 2;
        const SHADER_RESOURCES = 1 << 3;
        const DESCRIPTOR_SETS = 1 << 4;
    }
}

/// Bindings recorded in a command buffer do not carry over to the next one.
const NEW_RENDER_PASS_DIRTY_BITS: GraphicsDirtyBits = GraphicsDirtyBits::PIPELINE
    .union(GraphicsDirtyBits::TEXTURES)
    .union(GraphicsDirtyBits::VERTEX_BUFFERS)
    .union(GraphicsDirtyBits::INDEX_BUFFER)
    .union(GraphicsDirtyBits::SHADER_RESOURCES)
    .union(GraphicsDirtyBits::TRANSFORM_FEEDBACK_BUFFERS)
    .union(GraphicsDirtyBits::DESCRIPTOR_SETS);

const NEW_OUTSIDE_COMMANDS_DIRTY_BITS: ComputeDirtyBits = ComputeDirtyBits::PIPELINE
    .union(ComputeDirtyBits::TEXTURES)
    .union(ComputeDirtyBits::SHADER_RESOURCES)
    .union(ComputeDirtyBits::DESCRIPTOR_SETS);

/// Kind of pipeline, used to index per-kind state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineType {
    Graphics = 0,
    Compute = 1,
}

const UNIFORMS_SET: usize = UNIFORMS_SET_INDEX as usize;
const TEXTURES_SET: usize = TEXTURES_SET_INDEX as usize;
const SHADER_RESOURCES_SET: usize = SHADER_RESOURCES_SET_INDEX as usize;

/// Maximum number of combined image samplers of a program.
const MAX_TEXTURES: u32 = 16;
const MAX_SHADER_BUFFERS: u32 = 24;
const DEFAULT_ATTRIBUTE_BUFFER_SIZE: u64 = 16 * 64;
const STREAMING_ALIGNMENT: u64 = 16;

/// A vertex buffer binding. A null buffer means the attribute has no data yet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct VertexBinding {
    buffer: vk::Buffer,
    offset: u64,
}

/// Descriptor sets of the current program, with a flag telling whether the bindings they
/// reference changed since they were written.
#[derive(Copy, Clone, Debug, Default)]
struct CachedSet {
    allocation: Option<DescriptorSetAllocation>,
    stale: bool,
}

impl CachedSet {
    fn invalidate(&mut self) {
        self.stale = true;
    }
}

/// Vulkan implementation of a rendering context.
///
/// The context translates frontend state into Vulkan bindings lazily. `sync_state` records which
/// categories of GPU state are stale in two dirty-bit sets (graphics and compute); draw and
/// dispatch calls revalidate the stale categories, in a fixed order, before recording.
/// Recorded commands accumulate in a command graph that is submitted on `flush` or `finish`.
pub struct ContextVk {
    renderer: Rc<Renderer>,
    trace_sink: Rc<dyn TraceSink>,
    command_queue: CommandQueue,
    /// Transient pool of the submission being recorded.
    command_pool: vk::CommandPool,
    command_graph: CommandGraph,
    /// Open render-pass-scoped secondary; it is always the last node of the graph.
    render_pass_commands: Option<vk::CommandBuffer>,
    /// Open outside-render-pass secondary; it is always the last node of the graph.
    outside_commands: Option<vk::CommandBuffer>,
    /// Submission epoch of the renderer when the open scopes were started.
    observed_epoch: u64,
    /// Objects released since the last submission.
    current_garbage: Vec<GarbageObject>,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_semaphore_stage_masks: Vec<vk::PipelineStageFlags>,

    graphics_dirty_bits: GraphicsDirtyBits,
    compute_dirty_bits: ComputeDirtyBits,
    last_processed_graphics_bits: GraphicsDirtyBits,
    last_processed_compute_bits: ComputeDirtyBits,

    program: Option<Rc<ProgramVk>>,
    pipeline_desc: GraphicsPipelineDesc,
    pipeline_transition: PipelineTransitionBits,
    current_pipeline: Option<PipelineId>,
    /// Pipelines bound since the last submission; `None` stands for the compute pipeline.
    pipelines_in_use: Vec<(Rc<ProgramVk>, Option<PipelineId>)>,
    /// Locations of active attributes whose format cannot be fetched. Draws fail while set.
    unsupported_vertex_attributes: u16,

    vertex_bindings: [VertexBinding; MAX_VERTEX_ATTRIBS],
    vertex_streaming: DynamicBuffer,
    index_streaming: DynamicBuffer,
    default_attribute_buffers: Vec<DynamicBuffer>,
    index_binding: Option<(vk::Buffer, u64, IndexType)>,

    /// Pools for the uniforms, textures and shader resources sets.
    descriptor_pools: [DynamicDescriptorPool; 3],
    /// Uniforms, textures and shader resources sets of the current program.
    descriptor_sets: [CachedSet; 3],
    default_uniforms: DynamicBuffer,
    default_uniforms_offset: u32,
    /// Set when the default uniform block of the current program was never streamed.
    default_uniforms_needs_upload: bool,
    /// Bound in place of unbound transform feedback buffers.
    empty_storage_buffer: Option<vk::Buffer>,
    xfb_bindings: Vec<Option<BufferBinding>>,
    xfb_was_active: bool,
    xfb_vertices_drawn: u64,

    driver_uniforms: [DriverUniformsDescriptorSet; 2],

    gpu_events_enabled: bool,
    gpu_event_query_pool: DynamicQueryPool,
    in_flight_gpu_event_queries: Vec<GpuEventQuery>,
    gpu_events: Vec<GpuEvent>,
    gpu_clock_sync: Option<GpuClockSync>,
    /// First GPU timestamp ever read; GPU times are measured from it.
    gpu_event_timestamp_origin: Option<u64>,
    next_trace_event_id: u64,
    primary_buffer_counter: u64,
}

impl fmt::Debug for ContextVk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ContextVk")
            .field("graphics_dirty_bits", &self.graphics_dirty_bits)
            .field("compute_dirty_bits", &self.compute_dirty_bits)
            .field("recorded_nodes", &self.command_graph.len())
            .field("in_flight", &self.command_queue.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl ContextVk {
    /// Creates a context submitting to the queue of `renderer`.
    ///
    /// If `trace_sink` has GPU tracing enabled, the CPU and GPU clocks are calibrated before
    /// this returns.
    pub fn new(renderer: Rc<Renderer>, trace_sink: Rc<dyn TraceSink>) -> Result<ContextVk> {
        let device = renderer.device();
        let limits = *renderer.limits();
        let config = renderer.config().clone();

        let command_queue = CommandQueue::new(renderer.clone())?;
        let command_pool = device.create_command_pool(true)?;
        let mut graphics_driver_uniforms =
            DriverUniformsDescriptorSet::new(device, &config, &limits, PipelineType::Graphics)?;
        let compute_driver_uniforms =
            match DriverUniformsDescriptorSet::new(device, &config, &limits, PipelineType::Compute) {
                Ok(driver_uniforms) => driver_uniforms,
                Err(err) => {
                    graphics_driver_uniforms.destroy(device);
                    return Err(err);
                }
            };
        let driver_uniforms = [graphics_driver_uniforms, compute_driver_uniforms];

        let pool_size = |ty: vk::DescriptorType, descriptor_count: u32| vk::DescriptorPoolSize { ty, descriptor_count };
        let descriptor_pools = [
            DynamicDescriptorPool::new(
                config.descriptor_pool_max_sets,
                &[
                    pool_size(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1),
                    pool_size(vk::DescriptorType::STORAGE_BUFFER, MAX_TRANSFORM_FEEDBACK_BUFFERS as u32),
                ],
            ),
            DynamicDescriptorPool::new(
                config.descriptor_pool_max_sets,
                &[pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, MAX_TEXTURES)],
            ),
            DynamicDescriptorPool::new(
                config.descriptor_pool_max_sets,
                &[
                    pool_size(vk::DescriptorType::UNIFORM_BUFFER, MAX_SHADER_BUFFERS),
                    pool_size(vk::DescriptorType::STORAGE_BUFFER, MAX_SHADER_BUFFERS),
                ],
            ),
        ];

        let gpu_events_enabled = trace_sink.is_gpu_tracing_enabled();
        let mut context = ContextVk {
            renderer: renderer.clone(),
            trace_sink,
            command_queue,
            command_pool,
            command_graph: CommandGraph::new(),
            render_pass_commands: None,
            outside_commands: None,
            observed_epoch: renderer.submission_epoch(),
            current_garbage: vec![],
            wait_semaphores: vec![],
            wait_semaphore_stage_masks: vec![],
            graphics_dirty_bits: GraphicsDirtyBits::all(),
            compute_dirty_bits: ComputeDirtyBits::all(),
            last_processed_graphics_bits: GraphicsDirtyBits::empty(),
            last_processed_compute_bits: ComputeDirtyBits::empty(),
            program: None,
            pipeline_desc: GraphicsPipelineDesc::default(),
            pipeline_transition: PipelineTransitionBits::empty(),
            current_pipeline: None,
            pipelines_in_use: vec![],
            unsupported_vertex_attributes: 0,
            vertex_bindings: [VertexBinding::default(); MAX_VERTEX_ATTRIBS],
            vertex_streaming: DynamicBuffer::new(
                vk::BufferUsageFlags::VERTEX_BUFFER,
                STREAMING_ALIGNMENT,
                config.streaming_buffer_size,
            ),
            index_streaming: DynamicBuffer::new(
                vk::BufferUsageFlags::INDEX_BUFFER,
                STREAMING_ALIGNMENT,
                config.streaming_buffer_size,
            ),
            default_attribute_buffers: (0..MAX_VERTEX_ATTRIBS)
                .map(|_| {
                    DynamicBuffer::new(
                        vk::BufferUsageFlags::VERTEX_BUFFER,
                        STREAMING_ALIGNMENT,
                        DEFAULT_ATTRIBUTE_BUFFER_SIZE,
                    )
                })
                .collect(),
            index_binding: None,
            descriptor_pools,
            descriptor_sets: [CachedSet::default(); 3],
            default_uniforms: DynamicBuffer::new(
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                limits.min_uniform_buffer_offset_alignment,
                config.default_uniforms_buffer_size,
            ),
            default_uniforms_offset: 0,
            default_uniforms_needs_upload: true,
            empty_storage_buffer: None,
            xfb_bindings: vec![],
            xfb_was_active: false,
            xfb_vertices_drawn: 0,
            driver_uniforms,
            gpu_events_enabled,
            gpu_event_query_pool: DynamicQueryPool::new(config.timestamp_query_pool_size),
            in_flight_gpu_event_queries: vec![],
            gpu_events: vec![],
            gpu_clock_sync: None,
            gpu_event_timestamp_origin: None,
            next_trace_event_id: 1,
            primary_buffer_counter: 0,
        };

        if gpu_events_enabled {
            let result = context.synchronize_cpu_gpu_time();
            if let Err(err) = context.check_error(result) {
                context.destroy();
                return Err(err);
            }
        }
        debug!("created context");
        Ok(context)
    }

    /// Waits for the GPU and releases every object owned by the context.
    pub fn destroy(&mut self) {
        let renderer = self.renderer.clone();
        let device = renderer.device();
        if !renderer.is_device_lost() {
            if let Err(err) = self.finish_impl() {
                debug!("finish failed while destroying context: {err}");
            }
        }
        self.command_graph.clear();
        self.close_command_scopes();
        self.command_queue.destroy();

        for object in self.current_garbage.drain(..) {
            object.destroy(device);
        }
        self.vertex_streaming.destroy(device);
        self.index_streaming.destroy(device);
        for buffer in self.default_attribute_buffers.iter_mut() {
            buffer.destroy(device);
        }
        self.default_uniforms.destroy(device);
        if let Some(buffer) = self.empty_storage_buffer.take() {
            device.destroy_buffer(buffer);
        }
        for pool in self.descriptor_pools.iter_mut() {
            pool.destroy(device);
        }
        for driver_uniforms in self.driver_uniforms.iter_mut() {
            driver_uniforms.destroy(device);
        }
        self.gpu_event_query_pool.destroy(device);
        device.destroy_command_pool(self.command_pool);
        self.command_pool = vk::CommandPool::null();
        self.program = None;
        self.current_pipeline = None;
        self.pipelines_in_use.clear();
        debug!("destroyed context");
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    /// Creates a program whose pipelines are compatible with the descriptor set layouts of
    /// this context.
    pub fn create_program(&mut self, desc: &ProgramDesc) -> Result<Rc<ProgramVk>> {
        self.check_device_lost()?;
        let kind = match desc.shaders {
            ShaderStages::Graphics { .. } => PipelineType::Graphics,
            ShaderStages::Compute { .. } => PipelineType::Compute,
        };
        let layout = self.driver_uniforms[kind as usize].layout;
        let result = ProgramVk::new(self.renderer.device(), desc, layout);
        Ok(Rc::new(self.check_error(result)?))
    }

    /// Releases the GPU objects of a program once the commands using them have completed.
    pub fn destroy_program(&mut self, program: &Rc<ProgramVk>) {
        if self.program.as_ref().map_or(false, |p| Rc::ptr_eq(p, program)) {
            self.program = None;
            self.current_pipeline = None;
        }
        program.release(&mut self.current_garbage);
    }

    /// Destroys `object` once the commands recorded so far have completed.
    pub fn release_object(&mut self, object: impl Into<GarbageObject>) {
        self.current_garbage.push(object.into());
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    pub fn renderer(&self) -> &Rc<Renderer> {
        &self.renderer
    }

    pub fn command_queue(&self) -> &CommandQueue {
        &self.command_queue
    }

    pub fn graphics_dirty_bits(&self) -> GraphicsDirtyBits {
        self.graphics_dirty_bits
    }

    pub fn compute_dirty_bits(&self) -> ComputeDirtyBits {
        self.compute_dirty_bits
    }

    /// Graphics dirty bits whose handler ran during the last draw.
    pub fn last_processed_graphics_bits(&self) -> GraphicsDirtyBits {
        self.last_processed_graphics_bits
    }

    /// Compute dirty bits whose handler ran during the last dispatch.
    pub fn last_processed_compute_bits(&self) -> ComputeDirtyBits {
        self.last_processed_compute_bits
    }

    /// Description of the graphics pipeline the next draw will use.
    pub fn pipeline_desc(&self) -> &GraphicsPipelineDesc {
        &self.pipeline_desc
    }

    /// Graphics pipeline bound by the last draw.
    pub fn current_graphics_pipeline(&self) -> Option<vk::Pipeline> {
        let program = self.program.as_ref()?;
        let id = self.current_pipeline?;
        Some(program.pipeline_cache().borrow().pipeline(id))
    }

    /// Whether commands were recorded since the last submission.
    pub fn has_recorded_commands(&self) -> bool {
        !self.command_graph.is_empty()
    }

    /// Number of objects released since the last submission.
    pub fn pending_garbage_count(&self) -> usize {
        self.current_garbage.len()
    }

    pub fn gpu_events_enabled(&self) -> bool {
        self.gpu_events_enabled
    }

    /// Timestamp queries whose results have not been read back yet.
    pub fn in_flight_gpu_event_count(&self) -> usize {
        self.in_flight_gpu_event_queries.len()
    }

    /// Events read back but not yet emitted to the trace sink.
    pub fn pending_gpu_event_count(&self) -> usize {
        self.gpu_events.len()
    }

    pub fn gpu_clock_sync(&self) -> Option<GpuClockSync> {
        self.gpu_clock_sync
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn check_device_lost(&self) -> Result<()> {
        if self.renderer.is_device_lost() {
            Err(Error::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Runs the device-lost cascade if `result` reports a lost device.
    fn check_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_device_lost() {
                self.handle_device_lost();
            }
        }
        result
    }

    fn current_program(&self) -> Result<Rc<ProgramVk>> {
        self.program
            .clone()
            .ok_or(Error::InvalidOperation("no program bound"))
    }

    /// Records that the commands being recorded bind `pipeline` of `program`.
    fn use_pipeline(&mut self, program: &Rc<ProgramVk>, pipeline: Option<PipelineId>) {
        let known = self
            .pipelines_in_use
            .iter()
            .any(|(p, id)| Rc::ptr_eq(p, program) && *id == pipeline);
        if !known {
            self.pipelines_in_use.push((program.clone(), pipeline));
        }
    }

    /// Marks the pipeline dirty if the pipeline description changed since the last bind.
    fn invalidate_pipeline_if_changed(&mut self) {
        if !self.pipeline_transition.is_empty() {
            self.graphics_dirty_bits |= GraphicsDirtyBits::PIPELINE;
        }
    }

    fn invalidate_descriptor_sets(&mut self) {
        self.graphics_dirty_bits |= GraphicsDirtyBits::DESCRIPTOR_SETS;
        self.compute_dirty_bits |= ComputeDirtyBits::DESCRIPTOR_SETS;
    }

    /// Ends the open command scopes; the next draw or dispatch starts a new secondary.
    fn close_command_scopes(&mut self) {
        self.render_pass_commands = None;
        self.outside_commands = None;
    }

    /// Closes the open scopes if another submission happened since they were started.
    fn check_submission_epoch(&mut self) {
        let epoch = self.renderer.submission_epoch();
        if epoch != self.observed_epoch {
            trace!(epoch, "queue submission since the command scope was opened");
            self.close_command_scopes();
            self.observed_epoch = epoch;
        }
    }

    /// Returns the secondary command buffer recording into the render pass of the current
    /// draw framebuffer, starting a new one if needed.
    fn ensure_render_pass(&mut self, state: &State) -> Result<vk::CommandBuffer> {
        self.check_submission_epoch();
        if let Some(commands) = self.render_pass_commands {
            return Ok(commands);
        }
        let framebuffer = &state.draw_framebuffer;
        if framebuffer.render_pass == vk::RenderPass::null() {
            return Err(Error::InvalidOperation("no draw framebuffer"));
        }
        let begin = RenderPassBegin {
            render_pass: framebuffer.render_pass,
            framebuffer: framebuffer.framebuffer,
            render_area: Rect::new(0, 0, framebuffer.width, framebuffer.height).to_vk_rect_2d(),
        };
        let commands = self
            .command_graph
            .begin_render_pass_node(self.renderer.device(), self.command_pool, begin)?;
        trace!(?commands, "new render pass commands");
        self.render_pass_commands = Some(commands);
        self.outside_commands = None;
        self.graphics_dirty_bits |= NEW_RENDER_PASS_DIRTY_BITS;
        Ok(commands)
    }

    /// Returns the secondary command buffer recording outside of render passes, starting a new
    /// one if needed.
    fn ensure_outside_commands(&mut self) -> Result<vk::CommandBuffer> {
        self.check_submission_epoch();
        if let Some(commands) = self.outside_commands {
            return Ok(commands);
        }
        let commands = self
            .command_graph
            .begin_outside_node(self.renderer.device(), self.command_pool)?;
        trace!(?commands, "new outside render pass commands");
        self.outside_commands = Some(commands);
        self.render_pass_commands = None;
        self.compute_dirty_bits |= NEW_OUTSIDE_COMMANDS_DIRTY_BITS;
        Ok(commands)
    }
}
