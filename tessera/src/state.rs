//! Frontend state consumed by `ContextVk::sync_state`.
use crate::{
    pipeline::MAX_VERTEX_ATTRIBS,
    program::ProgramVk,
    types::{ColorBlendEquation, ColorWriteMask, CompareOp, CullMode, FrontFace, Rect, StencilOpState},
    vertex_array::VertexArrayState,
    vk,
};
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Categories of frontend state changed since the last `sync_state`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct FrontendDirtyBits: u64 {
        const VIEWPORT = 1 << 0;
        const DEPTH_RANGE = 1 << 1;
        const SCISSOR_TEST = 1 << 2;
        const SCISSOR = 1 << 3;
        const BLEND = 1 << 4;
        const BLEND_COLOR = 1 << 5;
        const COLOR_MASK = 1 << 6;
        const DEPTH = 1 << 7;
        const STENCIL = 1 << 8;
        const CULL_FACE = 1 << 9;
        const FRONT_FACE = 1 << 10;
        const POLYGON_OFFSET = 1 << 11;
        const RASTERIZER_DISCARD = 1 << 12;
        const LINE_WIDTH = 1 << 13;
        const PRIMITIVE_RESTART = 1 << 14;
        const SAMPLE_ALPHA_TO_COVERAGE = 1 << 15;
        const DRAW_FRAMEBUFFER = 1 << 16;
        const VERTEX_ARRAY = 1 << 17;
        const PROGRAM = 1 << 18;
        const TEXTURES = 1 << 19;
        const UNIFORM_BUFFERS = 1 << 20;
        const STORAGE_BUFFERS = 1 << 21;
        const ATOMIC_COUNTER_BUFFERS = 1 << 22;
        const TRANSFORM_FEEDBACK = 1 << 23;
        const CURRENT_VALUES = 1 << 24;
    }
}

/// The framebuffer draws render to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FramebufferState {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub color_attachment_count: u32,
    /// Whether this is the window surface. Rendering to it is flipped vertically if the
    /// renderer enables `flip_viewport_y`.
    pub is_default: bool,
}

impl Default for FramebufferState {
    fn default() -> Self {
        FramebufferState {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            width: 0,
            height: 0,
            samples: 1,
            color_attachment_count: 1,
            is_default: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

/// A range of a buffer bound to an indexed binding point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformFeedbackState {
    pub active: bool,
    pub paused: bool,
    pub buffers: Vec<Option<BufferBinding>>,
}

impl TransformFeedbackState {
    pub fn is_active_unpaused(&self) -> bool {
        self.active && !self.paused
    }
}

/// Rendering state owned by the frontend.
#[derive(Clone, Debug)]
pub struct State {
    pub viewport: Rect,
    pub depth_range: (f32, f32),
    pub scissor_test: bool,
    pub scissor: Rect,
    /// Blend equation of every draw buffer; `None` disables blending.
    pub blend: Option<ColorBlendEquation>,
    pub blend_color: [f32; 4],
    pub color_write_mask: ColorWriteMask,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareOp,
    pub stencil_test: bool,
    pub stencil_front: StencilOpState,
    pub stencil_back: StencilOpState,
    pub cull_face: bool,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    /// Depth bias `(factor, units)`; `None` disables polygon offset.
    pub polygon_offset: Option<(f32, f32)>,
    pub rasterizer_discard: bool,
    pub line_width: f32,
    pub primitive_restart: bool,
    pub sample_alpha_to_coverage: bool,
    pub draw_framebuffer: FramebufferState,
    pub vertex_array: VertexArrayState,
    /// Values of disabled vertex attributes.
    pub current_values: [[f32; 4]; MAX_VERTEX_ATTRIBS],
    pub program: Option<Rc<ProgramVk>>,
    pub textures: Vec<Option<TextureBinding>>,
    pub uniform_buffers: Vec<Option<BufferBinding>>,
    pub storage_buffers: Vec<Option<BufferBinding>>,
    pub atomic_counter_buffers: Vec<Option<BufferBinding>>,
    pub transform_feedback: TransformFeedbackState,
}

impl Default for State {
    fn default() -> Self {
        State {
            viewport: Rect::default(),
            depth_range: (0.0, 1.0),
            scissor_test: false,
            scissor: Rect::default(),
            blend: None,
            blend_color: [0.0; 4],
            color_write_mask: ColorWriteMask::ALL,
            depth_test: false,
            depth_write: true,
            depth_func: CompareOp::Less,
            stencil_test: false,
            stencil_front: StencilOpState::IGNORE,
            stencil_back: StencilOpState::IGNORE,
            cull_face: false,
            cull_mode: CullMode::BACK,
            front_face: FrontFace::CounterClockwise,
            polygon_offset: None,
            rasterizer_discard: false,
            line_width: 1.0,
            primitive_restart: false,
            sample_alpha_to_coverage: false,
            draw_framebuffer: FramebufferState::default(),
            vertex_array: VertexArrayState::default(),
            current_values: [[0.0, 0.0, 0.0, 1.0]; MAX_VERTEX_ATTRIBS],
            program: None,
            textures: vec![],
            uniform_buffers: vec![],
            storage_buffers: vec![],
            atomic_counter_buffers: vec![],
            transform_feedback: TransformFeedbackState::default(),
        }
    }
}

impl State {
    /// Whether rendering to the current draw framebuffer is flipped vertically.
    pub fn is_viewport_flipped(&self, flip_viewport_y: bool) -> bool {
        flip_viewport_y && self.draw_framebuffer.is_default
    }
}
