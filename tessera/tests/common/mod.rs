#![allow(dead_code)]
use std::rc::Rc;
use tessera::{
    soft::{CompletionMode, SoftDevice},
    vk::{self, Handle},
    Config, ContextVk, Device, DeviceLimits, Features, FramebufferState, FrontendDirtyBits, NullTraceSink,
    ProgramDesc, ProgramVk, Rect, Renderer, ShaderStages, State, TraceSink, VertexAttribute,
};

pub const SPIRV: &[u32] = &[0x0723_0203, 0x0001_0000];

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn framebuffer(width: u32, height: u32) -> FramebufferState {
    FramebufferState {
        render_pass: vk::RenderPass::from_raw(0xf000_0001),
        framebuffer: vk::Framebuffer::from_raw(0xf000_0002),
        width,
        height,
        ..Default::default()
    }
}

/// A graphics program reading attribute 0.
pub fn graphics_desc() -> ProgramDesc<'static> {
    ProgramDesc {
        active_attributes: 0b1,
        ..ProgramDesc::new(ShaderStages::Graphics {
            vertex: SPIRV,
            fragment: SPIRV,
        })
    }
}

pub fn compute_desc() -> ProgramDesc<'static> {
    ProgramDesc::new(ShaderStages::Compute { compute: SPIRV })
}

/// A context on a soft device, with a 64x64 framebuffer bound.
pub struct Fixture {
    pub device: Rc<SoftDevice>,
    pub renderer: Rc<Renderer>,
    pub context: ContextVk,
    pub state: State,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with_mode(CompletionMode::Immediate)
    }

    pub fn with_mode(mode: CompletionMode) -> Fixture {
        Fixture::try_with(mode, Config::default(), Rc::new(NullTraceSink::default())).unwrap()
    }

    pub fn try_with(mode: CompletionMode, config: Config, trace_sink: Rc<dyn TraceSink>) -> tessera::Result<Fixture> {
        Fixture::try_with_features(mode, Features::default(), config, trace_sink)
    }

    pub fn try_with_features(
        mode: CompletionMode,
        features: Features,
        config: Config,
        trace_sink: Rc<dyn TraceSink>,
    ) -> tessera::Result<Fixture> {
        init_logging();
        let device = Rc::new(SoftDevice::new(mode));
        let renderer = Renderer::new(device.clone(), DeviceLimits::default(), features, config);
        let context = ContextVk::new(renderer.clone(), trace_sink)?;
        let state = State {
            draw_framebuffer: framebuffer(64, 64),
            viewport: Rect::new(0, 0, 64, 64),
            ..Default::default()
        };
        Ok(Fixture {
            device,
            renderer,
            context,
            state,
        })
    }

    pub fn create_program(&mut self, desc: &ProgramDesc) -> Rc<ProgramVk> {
        self.context.create_program(desc).unwrap()
    }

    pub fn create_buffer(&self, size: u64) -> vk::Buffer {
        self.device
            .create_buffer(size, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER)
            .unwrap()
    }

    /// Binds a graphics program reading attribute 0 from a buffer, and syncs all state.
    pub fn bind_simple_program(&mut self) -> Rc<ProgramVk> {
        let program = self.create_program(&graphics_desc());
        let buffer = self.create_buffer(1024);
        self.state.vertex_array.attributes[0] =
            Some(VertexAttribute::buffer(vk::Format::R32G32B32_SFLOAT, buffer, 0, 0));
        self.state.program = Some(program.clone());
        self.sync_all();
        program
    }

    pub fn sync(&mut self, bits: FrontendDirtyBits) {
        self.context.sync_state(&self.state, bits);
    }

    pub fn sync_all(&mut self) {
        self.sync(FrontendDirtyBits::all());
    }
}
