//! Graphics pipeline descriptions and the per-program pipeline cache.
//!
//! A pipeline is looked up by its complete description. To avoid hashing the whole description
//! on every state change, each cached pipeline also remembers "transition edges": the
//! pipelines that were reached from it by changing a given subset of its state.
use crate::{
    device::{Device, GraphicsPipelineCreateInfo},
    error::{Error, Result},
    garbage::GarbageObject,
    serial::Serial,
    types::{ColorBlendEquation, ColorWriteMask, CompareOp, CullMode, PrimitiveMode, Rect, StencilOpState},
    vk,
};
use bitflags::bitflags;
use fxhash::FxHashMap;
use ordered_float::OrderedFloat;
use slotmap::SlotMap;
use tracing::debug;

/// Maximum number of vertex attributes.
pub const MAX_VERTEX_ATTRIBS: usize = 16;
/// Maximum number of color attachments.
pub const MAX_DRAW_BUFFERS: usize = 8;

/// Vertex input state of one attribute. Each attribute is fed from its own binding
/// (binding index == attribute location); the attribute offset is folded into the
/// vertex buffer binding offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttributeDesc {
    pub format: vk::Format,
    pub stride: u32,
    /// Instance divisor; 0 means per-vertex.
    pub divisor: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolygonOffset {
    pub factor: OrderedFloat<f32>,
    pub units: OrderedFloat<f32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: OrderedFloat<f32>,
    pub y: OrderedFloat<f32>,
    pub width: OrderedFloat<f32>,
    pub height: OrderedFloat<f32>,
    pub min_depth: OrderedFloat<f32>,
    pub max_depth: OrderedFloat<f32>,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) -> Viewport {
        Viewport {
            x: x.into(),
            y: y.into(),
            width: width.into(),
            height: height.into(),
            min_depth: min_depth.into(),
            max_depth: max_depth.into(),
        }
    }

    pub fn to_vk_viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: self.x.0,
            y: self.y.0,
            width: self.width.0,
            height: self.height.0,
            min_depth: self.min_depth.0,
            max_depth: self.max_depth.0,
        }
    }
}

bitflags! {
    /// Groups of pipeline state that changed since the current pipeline was bound.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineTransitionBits: u32 {
        const VERTEX_INPUT = 1 << 0;
        const INPUT_ASSEMBLY = 1 << 1;
        const RASTERIZATION = 1 << 2;
        const MULTISAMPLE = 1 << 3;
        const BLEND = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        const VIEWPORT = 1 << 6;
        const RENDER_PASS = 1 << 7;
    }
}

/// Complete description of a graphics pipeline, minus the shaders (those are owned by the
/// program the pipeline cache belongs to).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineDesc {
    // vertex input
    pub vertex_attributes: [Option<VertexAttributeDesc>; MAX_VERTEX_ATTRIBS],
    // input assembly
    pub topology: PrimitiveMode,
    pub primitive_restart: bool,
    // rasterization
    pub cull_mode: CullMode,
    pub front_face: vk::FrontFace,
    pub rasterizer_discard: bool,
    pub polygon_offset: Option<PolygonOffset>,
    pub line_width: OrderedFloat<f32>,
    // multisample
    pub samples: u32,
    pub alpha_to_coverage: bool,
    // blend
    pub color_attachment_count: u32,
    pub blend: [Option<ColorBlendEquation>; MAX_DRAW_BUFFERS],
    pub color_write_masks: [ColorWriteMask; MAX_DRAW_BUFFERS],
    pub blend_constants: [OrderedFloat<f32>; 4],
    // depth-stencil
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
    pub stencil_front: StencilOpState,
    pub stencil_back: StencilOpState,
    // viewport
    pub viewport: Viewport,
    pub scissor: Rect,
    // render pass
    pub render_pass: vk::RenderPass,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        GraphicsPipelineDesc {
            vertex_attributes: [None; MAX_VERTEX_ATTRIBS],
            topology: PrimitiveMode::Triangles,
            primitive_restart: false,
            cull_mode: CullMode::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            rasterizer_discard: false,
            polygon_offset: None,
            line_width: OrderedFloat(1.0),
            samples: 1,
            alpha_to_coverage: false,
            color_attachment_count: 1,
            blend: [None; MAX_DRAW_BUFFERS],
            color_write_masks: [ColorWriteMask::ALL; MAX_DRAW_BUFFERS],
            blend_constants: [OrderedFloat(0.0); 4],
            depth_test: false,
            depth_write: true,
            depth_compare: CompareOp::Less,
            stencil_test: false,
            stencil_front: StencilOpState::IGNORE,
            stencil_back: StencilOpState::IGNORE,
            viewport: Viewport::default(),
            scissor: Rect::default(),
            render_pass: vk::RenderPass::null(),
        }
    }
}

/// Assigns `value` to `field` and records `bit` in `transition` if it changed.
fn update<T: PartialEq>(field: &mut T, value: T, transition: &mut PipelineTransitionBits, bit: PipelineTransitionBits) {
    if *field != value {
        *field = value;
        *transition |= bit;
    }
}

impl GraphicsPipelineDesc {
    pub fn update_vertex_attribute(
        &mut self,
        transition: &mut PipelineTransitionBits,
        location: usize,
        attribute: Option<VertexAttributeDesc>,
    ) {
        update(
            &mut self.vertex_attributes[location],
            attribute,
            transition,
            PipelineTransitionBits::VERTEX_INPUT,
        );
    }

    pub fn update_topology(&mut self, transition: &mut PipelineTransitionBits, topology: PrimitiveMode) {
        update(&mut self.topology, topology, transition, PipelineTransitionBits::INPUT_ASSEMBLY);
    }

    pub fn update_primitive_restart(&mut self, transition: &mut PipelineTransitionBits, enabled: bool) {
        update(
            &mut self.primitive_restart,
            enabled,
            transition,
            PipelineTransitionBits::INPUT_ASSEMBLY,
        );
    }

    pub fn update_cull_mode(&mut self, transition: &mut PipelineTransitionBits, cull_mode: CullMode) {
        update(&mut self.cull_mode, cull_mode, transition, PipelineTransitionBits::RASTERIZATION);
    }

    pub fn update_front_face(&mut self, transition: &mut PipelineTransitionBits, front_face: vk::FrontFace) {
        update(&mut self.front_face, front_face, transition, PipelineTransitionBits::RASTERIZATION);
    }

    pub fn update_rasterizer_discard(&mut self, transition: &mut PipelineTransitionBits, discard: bool) {
        update(
            &mut self.rasterizer_discard,
            discard,
            transition,
            PipelineTransitionBits::RASTERIZATION,
        );
    }

    pub fn update_polygon_offset(&mut self, transition: &mut PipelineTransitionBits, offset: Option<(f32, f32)>) {
        let offset = offset.map(|(factor, units)| PolygonOffset {
            factor: factor.into(),
            units: units.into(),
        });
        update(
            &mut self.polygon_offset,
            offset,
            transition,
            PipelineTransitionBits::RASTERIZATION,
        );
    }

    pub fn update_line_width(&mut self, transition: &mut PipelineTransitionBits, width: f32) {
        update(
            &mut self.line_width,
            OrderedFloat(width),
            transition,
            PipelineTransitionBits::RASTERIZATION,
        );
    }

    pub fn update_alpha_to_coverage(&mut self, transition: &mut PipelineTransitionBits, enabled: bool) {
        update(
            &mut self.alpha_to_coverage,
            enabled,
            transition,
            PipelineTransitionBits::MULTISAMPLE,
        );
    }

    /// Sets the blend equation of every color attachment (`None` disables blending).
    pub fn update_blend(&mut self, transition: &mut PipelineTransitionBits, blend: Option<ColorBlendEquation>) {
        update(
            &mut self.blend,
            [blend; MAX_DRAW_BUFFERS],
            transition,
            PipelineTransitionBits::BLEND,
        );
    }

    pub fn update_blend_constants(&mut self, transition: &mut PipelineTransitionBits, constants: [f32; 4]) {
        update(
            &mut self.blend_constants,
            constants.map(OrderedFloat),
            transition,
            PipelineTransitionBits::BLEND,
        );
    }

    pub fn update_color_write_mask(&mut self, transition: &mut PipelineTransitionBits, mask: ColorWriteMask) {
        update(
            &mut self.color_write_masks,
            [mask; MAX_DRAW_BUFFERS],
            transition,
            PipelineTransitionBits::BLEND,
        );
    }

    pub fn update_depth(&mut self, transition: &mut PipelineTransitionBits, test: bool, write: bool, compare: CompareOp) {
        let bit = PipelineTransitionBits::DEPTH_STENCIL;
        update(&mut self.depth_test, test, transition, bit);
        update(&mut self.depth_write, write, transition, bit);
        update(&mut self.depth_compare, compare, transition, bit);
    }

    pub fn update_stencil(
        &mut self,
        transition: &mut PipelineTransitionBits,
        test: bool,
        front: StencilOpState,
        back: StencilOpState,
    ) {
        let bit = PipelineTransitionBits::DEPTH_STENCIL;
        update(&mut self.stencil_test, test, transition, bit);
        update(&mut self.stencil_front, front, transition, bit);
        update(&mut self.stencil_back, back, transition, bit);
    }

    pub fn update_viewport(&mut self, transition: &mut PipelineTransitionBits, viewport: Viewport) {
        update(&mut self.viewport, viewport, transition, PipelineTransitionBits::VIEWPORT);
    }

    pub fn update_scissor(&mut self, transition: &mut PipelineTransitionBits, scissor: Rect) {
        update(&mut self.scissor, scissor, transition, PipelineTransitionBits::VIEWPORT);
    }

    pub fn update_render_pass(
        &mut self,
        transition: &mut PipelineTransitionBits,
        render_pass: vk::RenderPass,
        samples: u32,
        color_attachment_count: u32,
    ) {
        let bit = PipelineTransitionBits::RENDER_PASS;
        update(&mut self.render_pass, render_pass, transition, bit);
        update(&mut self.samples, samples, transition, PipelineTransitionBits::MULTISAMPLE);
        update(&mut self.color_attachment_count, color_attachment_count, transition, bit);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

slotmap::new_key_type! {
    /// Identifies a pipeline in a `GraphicsPipelineCache`.
    pub struct PipelineId;
}

/// A cached link to the pipeline reached by changing `bits` of the source pipeline's state.
#[derive(Debug)]
struct Transition {
    bits: PipelineTransitionBits,
    desc: GraphicsPipelineDesc,
    target: PipelineId,
}

#[derive(Debug)]
struct PipelineEntry {
    pipeline: vk::Pipeline,
    /// Serial of the last submission that used the pipeline.
    serial: Serial,
    transitions: Vec<Transition>,
}

/// Graph of the graphics pipelines created for one program.
#[derive(Debug, Default)]
pub struct GraphicsPipelineCache {
    entries: SlotMap<PipelineId, PipelineEntry>,
    by_desc: FxHashMap<GraphicsPipelineDesc, PipelineId>,
}

impl GraphicsPipelineCache {
    pub fn new() -> GraphicsPipelineCache {
        Default::default()
    }

    /// Looks up a pipeline matching `desc`, creating it if none exists.
    pub fn get_or_create(
        &mut self,
        device: &dyn Device,
        layout: vk::PipelineLayout,
        vertex_shader: vk::ShaderModule,
        fragment_shader: vk::ShaderModule,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId> {
        if let Some(&id) = self.by_desc.get(desc) {
            return Ok(id);
        }
        let pipeline = device
            .create_graphics_pipeline(&GraphicsPipelineCreateInfo {
                layout,
                vertex_shader,
                fragment_shader,
                desc,
            })
            .map_err(|result| match Error::from(result) {
                Error::Vulkan(result) => Error::PipelineCreation(result),
                other => other,
            })?;
        debug!(?pipeline, topology = ?desc.topology, "created graphics pipeline");
        let id = self.entries.insert(PipelineEntry {
            pipeline,
            serial: Serial::ZERO,
            transitions: vec![],
        });
        self.by_desc.insert(*desc, id);
        Ok(id)
    }

    /// Returns the target of a previously recorded transition from `from`, if any.
    pub fn find_transition(
        &self,
        from: PipelineId,
        bits: PipelineTransitionBits,
        desc: &GraphicsPipelineDesc,
    ) -> Option<PipelineId> {
        self.entries[from]
            .transitions
            .iter()
            .find(|t| t.bits == bits && t.desc == *desc)
            .map(|t| t.target)
    }

    pub fn add_transition(
        &mut self,
        from: PipelineId,
        bits: PipelineTransitionBits,
        desc: &GraphicsPipelineDesc,
        target: PipelineId,
    ) {
        self.entries[from].transitions.push(Transition {
            bits,
            desc: *desc,
            target,
        });
    }

    pub fn pipeline(&self, id: PipelineId) -> vk::Pipeline {
        self.entries[id].pipeline
    }

    /// Stamps the pipeline with the serial of a submission that used it. Released pipelines
    /// are ignored.
    pub fn update_serial(&mut self, id: PipelineId, serial: Serial) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.serial = serial;
        }
    }

    /// Serial of the last submission that used the pipeline.
    pub fn serial(&self, id: PipelineId) -> Option<Serial> {
        self.entries.get(id).map(|entry| entry.serial)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every pipeline of the cache to `garbage`.
    pub fn release(&mut self, garbage: &mut Vec<GarbageObject>) {
        for (_, entry) in self.entries.drain() {
            garbage.push(entry.pipeline.into());
        }
        self.by_desc.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_state_records_no_transition() {
        let mut desc = GraphicsPipelineDesc::default();
        let mut transition = PipelineTransitionBits::empty();
        desc.update_topology(&mut transition, PrimitiveMode::Triangles);
        desc.update_line_width(&mut transition, 1.0);
        desc.update_cull_mode(&mut transition, CullMode::NONE);
        assert!(transition.is_empty());
    }

    #[test]
    fn changes_record_their_group() {
        let mut desc = GraphicsPipelineDesc::default();
        let mut transition = PipelineTransitionBits::empty();
        desc.update_topology(&mut transition, PrimitiveMode::Lines);
        assert_eq!(transition, PipelineTransitionBits::INPUT_ASSEMBLY);
        desc.update_depth(&mut transition, true, true, CompareOp::LessOrEqual);
        assert_eq!(
            transition,
            PipelineTransitionBits::INPUT_ASSEMBLY | PipelineTransitionBits::DEPTH_STENCIL
        );
        assert_eq!(desc.topology, PrimitiveMode::Lines);
    }

    #[test]
    fn descs_with_same_state_are_equal() {
        let mut a = GraphicsPipelineDesc::default();
        let mut b = GraphicsPipelineDesc::default();
        let mut ta = PipelineTransitionBits::empty();
        let mut tb = PipelineTransitionBits::empty();
        a.update_viewport(&mut ta, Viewport::new(0.0, 0.0, 64.0, 64.0, 0.0, 1.0));
        b.update_viewport(&mut tb, Viewport::new(0.0, 0.0, 64.0, 64.0, 0.0, 1.0));
        assert_eq!(a, b);
        assert_eq!(ta, tb);
    }
}
