//! A deterministic software implementation of [`Device`].
//!
//! `SoftDevice` records commands into in-memory command buffers and "executes" submissions in
//! queue order: events are set and waited on, timestamp queries receive values from a
//! monotonic tick counter, and fences are signaled when a submission has run to completion.
//! When submissions complete is controlled by a [`CompletionMode`]. It is meant for testing
//! code that drives the engine without a GPU.
use crate::{
    device::{
        DescriptorBinding, DescriptorWrite, Device, GraphicsPipelineCreateInfo, RenderPassBegin,
        RenderPassInheritance, SubmitInfo,
    },
    pipeline::GraphicsPipelineDesc,
    vk::{self, Handle},
};
use ash::prelude::VkResult;
use fxhash::{FxHashMap, FxHashSet};
use std::{cell::RefCell, collections::VecDeque};
use tracing::trace;

/// Ticks between two timestamp writes.
const TIMESTAMP_STEP: u64 = 1000;

/// Controls when submitted work completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompletionMode {
    /// Submissions execute as soon as they are submitted (or as soon as the events they wait
    /// on are set).
    Immediate,
    /// Submissions execute when a fence that depends on them is waited on.
    OnWait,
    /// Submissions execute only through `SoftDevice::complete_next` or `complete_all`.
    /// Waiting on an unsignaled fence times out.
    Manual,
}

/// A command recorded by the soft device.
#[derive(Clone, Debug, PartialEq)]
pub enum SoftCommand {
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<u64>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch(u32, u32, u32),
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    SetEvent(vk::Event),
    WaitEvents(Vec<vk::Event>),
    ResetQueryPool {
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    },
    WriteTimestamp {
        pool: vk::QueryPool,
        query: u32,
    },
}

/// Object creation counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub submissions: usize,
    pub buffers_created: usize,
    pub pipelines_created: usize,
    pub descriptor_pools_created: usize,
    pub descriptor_sets_allocated: usize,
    pub command_buffers_allocated: usize,
    pub fences_created: usize,
}

#[derive(Debug)]
enum Recorded {
    Command(SoftCommand),
    Execute(Vec<vk::CommandBuffer>),
}

#[derive(Debug)]
struct CommandBufferState {
    pool: vk::CommandPool,
    commands: Vec<Recorded>,
}

#[derive(Debug)]
struct Submission {
    commands: Vec<SoftCommand>,
    cursor: usize,
    fence: vk::Fence,
}

#[derive(Debug)]
struct DescriptorPoolState {
    max_sets: u32,
    sets: Vec<vk::DescriptorSet>,
}

#[derive(Debug)]
struct State {
    next_handle: u64,
    mode: CompletionMode,
    lost: bool,
    pipeline_failure: Option<vk::Result>,
    flush_failure: Option<vk::Result>,
    fences: FxHashMap<vk::Fence, bool>,
    events: FxHashMap<vk::Event, bool>,
    semaphores: FxHashSet<vk::Semaphore>,
    command_pools: FxHashSet<vk::CommandPool>,
    command_buffers: FxHashMap<vk::CommandBuffer, CommandBufferState>,
    buffers: FxHashMap<vk::Buffer, Vec<u8>>,
    descriptor_set_layouts: FxHashSet<vk::DescriptorSetLayout>,
    pipeline_layouts: FxHashSet<vk::PipelineLayout>,
    descriptor_pools: FxHashMap<vk::DescriptorPool, DescriptorPoolState>,
    descriptor_sets: FxHashMap<vk::DescriptorSet, Vec<DescriptorWrite>>,
    shader_modules: FxHashSet<vk::ShaderModule>,
    pipelines: FxHashMap<vk::Pipeline, Option<GraphicsPipelineDesc>>,
    query_pools: FxHashMap<vk::QueryPool, Vec<Option<u64>>>,
    pending: VecDeque<Submission>,
    submitted: Vec<SoftCommand>,
    timestamp: u64,
    stats: SoftStats,
}

impl State {
    fn new_handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: SoftCommand) {
        if let Some(cb) = self.command_buffers.get_mut(&command_buffer) {
            cb.commands.push(Recorded::Command(command));
        }
    }

    fn flatten(&self, command_buffer: vk::CommandBuffer, out: &mut Vec<SoftCommand>) {
        let Some(cb) = self.command_buffers.get(&command_buffer) else {
            return;
        };
        for recorded in cb.commands.iter() {
            match recorded {
                Recorded::Command(command) => out.push(command.clone()),
                Recorded::Execute(secondaries) => {
                    for &secondary in secondaries {
                        self.flatten(secondary, out);
                    }
                }
            }
        }
    }

    /// Executes one command. Returns false if the command blocks.
    fn execute(&mut self, command: &SoftCommand) -> bool {
        match *command {
            SoftCommand::SetEvent(event) => {
                self.events.insert(event, true);
            }
            SoftCommand::WaitEvents(ref events) => {
                if !events.iter().all(|e| self.events.get(e).copied().unwrap_or(false)) {
                    return false;
                }
            }
            SoftCommand::ResetQueryPool { pool, first, count } => {
                if let Some(queries) = self.query_pools.get_mut(&pool) {
                    for query in &mut queries[first as usize..(first + count) as usize] {
                        *query = None;
                    }
                }
            }
            SoftCommand::WriteTimestamp { pool, query } => {
                self.timestamp += TIMESTAMP_STEP;
                let value = self.timestamp;
                if let Some(queries) = self.query_pools.get_mut(&pool) {
                    queries[query as usize] = Some(value);
                }
            }
            _ => {}
        }
        true
    }

    /// Runs the oldest pending submission as far as possible. Returns true if it completed.
    fn run_front(&mut self) -> bool {
        let Some(mut submission) = self.pending.pop_front() else {
            return false;
        };
        while submission.cursor < submission.commands.len() {
            let command = submission.commands[submission.cursor].clone();
            if !self.execute(&command) {
                self.pending.push_front(submission);
                return false;
            }
            submission.cursor += 1;
        }
        if submission.fence != vk::Fence::null() {
            self.fences.insert(submission.fence, true);
        }
        true
    }

    fn run_all(&mut self) {
        while self.run_front() {}
    }

    fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.get(&fence).copied().unwrap_or(false)
    }
}

/// A software GPU. See the module documentation.
#[derive(Debug)]
pub struct SoftDevice {
    state: RefCell<State>,
}

impl Default for SoftDevice {
    fn default() -> Self {
        SoftDevice::new(CompletionMode::Immediate)
    }
}

impl SoftDevice {
    pub fn new(mode: CompletionMode) -> SoftDevice {
        SoftDevice {
            state: RefCell::new(State {
                next_handle: 0x1000,
                mode,
                lost: false,
                pipeline_failure: None,
                flush_failure: None,
                fences: Default::default(),
                events: Default::default(),
                semaphores: Default::default(),
                command_pools: Default::default(),
                command_buffers: Default::default(),
                buffers: Default::default(),
                descriptor_set_layouts: Default::default(),
                pipeline_layouts: Default::default(),
                descriptor_pools: Default::default(),
                descriptor_sets: Default::default(),
                shader_modules: Default::default(),
                pipelines: Default::default(),
                query_pools: Default::default(),
                pending: Default::default(),
                submitted: vec![],
                timestamp: 1_000_000,
                stats: Default::default(),
            }),
        }
    }

    pub fn set_completion_mode(&self, mode: CompletionMode) {
        let mut state = self.state.borrow_mut();
        state.mode = mode;
        if mode == CompletionMode::Immediate {
            state.run_all();
        }
    }

    /// Runs the oldest pending submission. Returns false if there was none, or if it is
    /// blocked on an event.
    pub fn complete_next(&self) -> bool {
        self.state.borrow_mut().run_front()
    }

    /// Runs every pending submission that can run.
    pub fn complete_all(&self) {
        self.state.borrow_mut().run_all()
    }

    /// Number of submissions that have not finished executing.
    pub fn pending_submissions(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Simulates a device loss: every subsequent submission or wait fails with `ERROR_DEVICE_LOST`.
    pub fn lose_device(&self) {
        self.state.borrow_mut().lost = true;
    }

    /// Makes every subsequent pipeline creation fail with the given result.
    pub fn fail_pipeline_creation(&self, result: Option<vk::Result>) {
        self.state.borrow_mut().pipeline_failure = result;
    }

    /// Makes every subsequent mapped memory flush fail with the given result.
    pub fn fail_buffer_flushes(&self, result: Option<vk::Result>) {
        self.state.borrow_mut().flush_failure = result;
    }

    /// All commands submitted so far, in submission order, with secondary command buffers inlined.
    pub fn submitted_commands(&self) -> Vec<SoftCommand> {
        self.state.borrow().submitted.clone()
    }

    pub fn stats(&self) -> SoftStats {
        self.state.borrow().stats
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).cloned()
    }

    pub fn descriptor_set_writes(&self, set: vk::DescriptorSet) -> Vec<DescriptorWrite> {
        self.state
            .borrow()
            .descriptor_sets
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }

    pub fn graphics_pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<GraphicsPipelineDesc> {
        self.state.borrow().pipelines.get(&pipeline).copied().flatten()
    }

    pub fn live_pipelines(&self) -> usize {
        self.state.borrow().pipelines.len()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state.borrow().command_buffers.len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state.borrow().command_pools.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn live_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    pub fn live_query_pools(&self) -> usize {
        self.state.borrow().query_pools.len()
    }
}

impl Device for SoftDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence = state.new_handle();
        state.fences.insert(fence, signaled);
        state.stats.fences_created += 1;
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.borrow_mut().fences.remove(&fence);
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.fences.insert(fence, false);
        Ok(())
    }

    fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let state = self.state.borrow();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        Ok(state.fence_signaled(fence))
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        match state.mode {
            CompletionMode::Immediate => state.run_all(),
            CompletionMode::OnWait => {
                while !state.fence_signaled(fence) && state.run_front() {}
            }
            CompletionMode::Manual => {}
        }
        if state.fence_signaled(fence) {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn create_event(&self) -> VkResult<vk::Event> {
        let mut state = self.state.borrow_mut();
        let event = state.new_handle();
        state.events.insert(event, false);
        Ok(event)
    }

    fn destroy_event(&self, event: vk::Event) {
        self.state.borrow_mut().events.remove(&event);
    }

    fn set_event(&self, event: vk::Event) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.events.insert(event, true);
        if state.mode == CompletionMode::Immediate {
            state.run_all();
        }
        Ok(())
    }

    fn reset_event(&self, event: vk::Event) -> VkResult<()> {
        self.state.borrow_mut().events.insert(event, false);
        Ok(())
    }

    fn get_event_status(&self, event: vk::Event) -> VkResult<bool> {
        let state = self.state.borrow();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        Ok(state.events.get(&event).copied().unwrap_or(false))
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        let semaphore = state.new_handle();
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().semaphores.remove(&semaphore);
    }

    fn create_command_pool(&self, _transient: bool) -> VkResult<vk::CommandPool> {
        let mut state = self.state.borrow_mut();
        let pool = state.new_handle();
        state.command_pools.insert(pool);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.borrow_mut();
        state.command_pools.remove(&pool);
        state.command_buffers.retain(|_, cb| cb.pool != pool);
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        for cb in state.command_buffers.values_mut().filter(|cb| cb.pool == pool) {
            cb.commands.clear();
        }
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.borrow_mut();
        if !state.command_pools.contains(&pool) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let command_buffer = state.new_handle();
        state.command_buffers.insert(
            command_buffer,
            CommandBufferState {
                pool,
                commands: vec![],
            },
        );
        state.stats.command_buffers_allocated += 1;
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        self.state.borrow_mut().command_buffers.remove(&command_buffer);
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _inheritance: Option<&RenderPassInheritance>,
    ) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let cb = state
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        cb.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        if let Some(cb) = self.state.borrow_mut().command_buffers.get_mut(&command_buffer) {
            cb.commands.clear();
        }
        Ok(())
    }

    fn queue_submit(&self, submit: &SubmitInfo, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let mut commands = vec![];
        for &command_buffer in submit.command_buffers {
            state.flatten(command_buffer, &mut commands);
        }
        trace!(commands = commands.len(), ?fence, "soft queue submit");
        state.submitted.extend(commands.iter().cloned());
        state.pending.push_back(Submission {
            commands,
            cursor: 0,
            fence,
        });
        state.stats.submissions += 1;
        if state.mode == CompletionMode::Immediate {
            state.run_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        if state.mode != CompletionMode::Manual {
            state.run_all();
        }
        if state.pending.is_empty() {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn create_buffer(&self, size: u64, _usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        let mut state = self.state.borrow_mut();
        let buffer = state.new_handle();
        state.buffers.insert(buffer, vec![0; size as usize]);
        state.stats.buffers_created += 1;
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state.borrow_mut().buffers.remove(&buffer);
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let contents = state.buffers.get_mut(&buffer).ok_or(vk::Result::ERROR_UNKNOWN)?;
        let offset = offset as usize;
        let dst = contents
            .get_mut(offset..offset + data.len())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn flush_buffer(&self, buffer: vk::Buffer, _offset: u64, _size: u64) -> VkResult<()> {
        let state = self.state.borrow();
        if let Some(result) = state.flush_failure {
            return Err(result);
        }
        if state.buffers.contains_key(&buffer) {
            Ok(())
        } else {
            Err(vk::Result::ERROR_UNKNOWN)
        }
    }

    fn create_descriptor_set_layout(&self, _bindings: &[DescriptorBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let layout = state.new_handle();
        state.descriptor_set_layouts.insert(layout);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().descriptor_set_layouts.remove(&layout);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        let mut state = self.state.borrow_mut();
        let layout = state.new_handle();
        state.pipeline_layouts.insert(layout);
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.borrow_mut().pipeline_layouts.remove(&layout);
    }

    fn create_descriptor_pool(&self, max_sets: u32, _sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        let pool = state.new_handle();
        state
            .descriptor_pools
            .insert(pool, DescriptorPoolState { max_sets, sets: vec![] });
        state.stats.descriptor_pools_created += 1;
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        if let Some(pool) = state.descriptor_pools.remove(&pool) {
            for set in pool.sets {
                state.descriptor_sets.remove(&set);
            }
        }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let sets = match state.descriptor_pools.get_mut(&pool) {
            Some(pool) => std::mem::take(&mut pool.sets),
            None => return Err(vk::Result::ERROR_UNKNOWN),
        };
        for set in sets {
            state.descriptor_sets.remove(&set);
        }
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let mut state = self.state.borrow_mut();
        let set = state.new_handle();
        let pool_state = state.descriptor_pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        if pool_state.sets.len() as u32 >= pool_state.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        pool_state.sets.push(set);
        state.descriptor_sets.insert(set, vec![]);
        state.stats.descriptor_sets_allocated += 1;
        Ok(set)
    }

    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.borrow_mut();
        for write in writes {
            if let Some(set_writes) = state.descriptor_sets.get_mut(&write.set) {
                set_writes.retain(|w| (w.binding, w.array_element) != (write.binding, write.array_element));
                set_writes.push(*write);
            }
        }
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut state = self.state.borrow_mut();
        let module = state.new_handle();
        state.shader_modules.insert(module);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.borrow_mut().shader_modules.remove(&module);
    }

    fn create_graphics_pipeline(&self, info: &GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.pipeline_failure {
            return Err(result);
        }
        let pipeline = state.new_handle();
        state.pipelines.insert(pipeline, Some(*info.desc));
        state.stats.pipelines_created += 1;
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, _layout: vk::PipelineLayout, _shader: vk::ShaderModule) -> VkResult<vk::Pipeline> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.pipeline_failure {
            return Err(result);
        }
        let pipeline = state.new_handle();
        state.pipelines.insert(pipeline, None);
        state.stats.pipelines_created += 1;
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.borrow_mut().pipelines.remove(&pipeline);
    }

    fn create_query_pool(&self, query_count: u32) -> VkResult<vk::QueryPool> {
        let mut state = self.state.borrow_mut();
        let pool = state.new_handle();
        state.query_pools.insert(pool, vec![None; query_count as usize]);
        Ok(pool)
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.state.borrow_mut().query_pools.remove(&pool);
    }

    fn get_query_result(&self, pool: vk::QueryPool, query: u32) -> VkResult<Option<u64>> {
        let state = self.state.borrow();
        if state.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let queries = state.query_pools.get(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        Ok(queries.get(query as usize).copied().flatten())
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            SoftCommand::BindDescriptorSets {
                bind_point,
                first_set,
                sets: sets.to_vec(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[u64],
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            SoftCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
                offsets: offsets.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            SoftCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        );
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            SoftCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.state.borrow_mut().record(
            command_buffer,
            SoftCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::Dispatch(x, y, z));
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::BeginRenderPass(*begin));
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::EndRenderPass);
    }

    fn cmd_execute_commands(&self, command_buffer: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        if let Some(cb) = state.command_buffers.get_mut(&command_buffer) {
            cb.commands.push(Recorded::Execute(secondaries.to_vec()));
        }
    }

    fn cmd_set_event(&self, command_buffer: vk::CommandBuffer, event: vk::Event, _stage: vk::PipelineStageFlags) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::SetEvent(event));
    }

    fn cmd_wait_events(
        &self,
        command_buffer: vk::CommandBuffer,
        events: &[vk::Event],
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
    ) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::WaitEvents(events.to_vec()));
    }

    fn cmd_reset_query_pool(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::ResetQueryPool { pool, first, count });
    }

    fn cmd_write_timestamp(
        &self,
        command_buffer: vk::CommandBuffer,
        _stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) {
        self.state
            .borrow_mut()
            .record(command_buffer, SoftCommand::WriteTimestamp { pool, query });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_blocks_on_unset_event() {
        let device = SoftDevice::new(CompletionMode::Immediate);
        let pool = device.create_command_pool(true).unwrap();
        let cb = device
            .allocate_command_buffer(pool, vk::CommandBufferLevel::PRIMARY)
            .unwrap();
        let event = device.create_event().unwrap();
        let fence = device.create_fence(false).unwrap();
        device.begin_command_buffer(cb, None).unwrap();
        device.cmd_wait_events(
            cb,
            &[event],
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TOP_OF_PIPE,
        );
        device.end_command_buffer(cb).unwrap();
        device
            .queue_submit(
                &SubmitInfo {
                    command_buffers: &[cb],
                    ..Default::default()
                },
                fence,
            )
            .unwrap();
        assert!(!device.get_fence_status(fence).unwrap());
        device.set_event(event).unwrap();
        assert!(device.get_fence_status(fence).unwrap());
    }

    #[test]
    fn descriptor_pool_runs_out_of_sets() {
        let device = SoftDevice::default();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(1, &[]).unwrap();
        device.allocate_descriptor_set(pool, layout).unwrap();
        assert_eq!(
            device.allocate_descriptor_set(pool, layout),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        );
        device.reset_descriptor_pool(pool).unwrap();
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
    }
}
