//! Translation of frontend state changes into pipeline description updates and dirty bits.
use super::{ComputeDirtyBits, ContextVk, GraphicsDirtyBits, VertexBinding};
use crate::{
    pipeline::{Viewport, MAX_VERTEX_ATTRIBS},
    state::{FrontendDirtyBits, State},
    types::{CullMode, Rect},
    vertex_array::{VertexSource, DEFAULT_ATTRIBUTE_DESC},
};
use std::rc::Rc;
use tracing::{trace, warn};

type SyncFn = fn(&mut ContextVk, &State);

/// Handlers of frontend dirty bits, in processing order.
const SYNC_HANDLERS: &[(FrontendDirtyBits, SyncFn)] = &[
    (FrontendDirtyBits::DRAW_FRAMEBUFFER, ContextVk::sync_draw_framebuffer),
    (FrontendDirtyBits::PROGRAM, ContextVk::sync_program),
    (FrontendDirtyBits::VIEWPORT, ContextVk::sync_viewport),
    (FrontendDirtyBits::DEPTH_RANGE, ContextVk::sync_viewport),
    (FrontendDirtyBits::SCISSOR_TEST, ContextVk::sync_scissor),
    (FrontendDirtyBits::SCISSOR, ContextVk::sync_scissor),
    (FrontendDirtyBits::BLEND, ContextVk::sync_blend),
    (FrontendDirtyBits::BLEND_COLOR, ContextVk::sync_blend_color),
    (FrontendDirtyBits::COLOR_MASK, ContextVk::sync_color_mask),
    (FrontendDirtyBits::DEPTH, ContextVk::sync_depth),
    (FrontendDirtyBits::STENCIL, ContextVk::sync_stencil),
    (FrontendDirtyBits::CULL_FACE, ContextVk::sync_cull_face),
    (FrontendDirtyBits::FRONT_FACE, ContextVk::sync_front_face),
    (FrontendDirtyBits::POLYGON_OFFSET, ContextVk::sync_polygon_offset),
    (FrontendDirtyBits::RASTERIZER_DISCARD, ContextVk::sync_rasterizer_discard),
    (FrontendDirtyBits::LINE_WIDTH, ContextVk::sync_line_width),
    (FrontendDirtyBits::PRIMITIVE_RESTART, ContextVk::sync_primitive_restart),
    (FrontendDirtyBits::SAMPLE_ALPHA_TO_COVERAGE, ContextVk::sync_sample_alpha_to_coverage),
    (FrontendDirtyBits::VERTEX_ARRAY, ContextVk::sync_vertex_array),
    (FrontendDirtyBits::TEXTURES, ContextVk::sync_textures),
    (FrontendDirtyBits::UNIFORM_BUFFERS, ContextVk::sync_shader_buffers),
    (FrontendDirtyBits::STORAGE_BUFFERS, ContextVk::sync_shader_buffers),
    (FrontendDirtyBits::ATOMIC_COUNTER_BUFFERS, ContextVk::sync_atomic_counter_buffers),
    (FrontendDirtyBits::TRANSFORM_FEEDBACK, ContextVk::sync_transform_feedback),
    (FrontendDirtyBits::CURRENT_VALUES, ContextVk::sync_current_values),
];

impl ContextVk {
    /// Consumes the frontend dirty bits: updates the graphics pipeline description and marks
    /// the affected categories of GPU state dirty. Nothing is recorded until the next draw or
    /// dispatch.
    pub fn sync_state(&mut self, state: &State, dirty_bits: FrontendDirtyBits) {
        trace!(?dirty_bits, "sync state");
        for &(bit, handler) in SYNC_HANDLERS {
            if dirty_bits.contains(bit) {
                handler(self, state);
            }
        }
        self.invalidate_pipeline_if_changed();
    }

    /// Picks up a program bound without a matching `PROGRAM` dirty bit.
    pub(super) fn sync_program_binding(&mut self, state: &State) {
        let same = match (&self.program, &state.program) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.sync_program(state);
            self.invalidate_pipeline_if_changed();
        }
    }

    fn is_viewport_flipped(&self, state: &State) -> bool {
        state.is_viewport_flipped(self.renderer.features().flip_viewport_y)
    }

    fn sync_viewport(&mut self, state: &State) {
        let framebuffer_height = state.draw_framebuffer.height as f32;
        let rect = state.viewport;
        let (y, height) = if self.is_viewport_flipped(state) {
            (framebuffer_height - rect.y as f32, -(rect.height as f32))
        } else {
            (rect.y as f32, rect.height as f32)
        };
        let (near, far) = state.depth_range;
        let viewport = Viewport::new(rect.x as f32, y, rect.width as f32, height, near, far);
        self.pipeline_desc.update_viewport(&mut self.pipeline_transition, viewport);
        self.graphics_dirty_bits |= GraphicsDirtyBits::DRIVER_UNIFORMS;
    }

    fn sync_scissor(&mut self, state: &State) {
        let framebuffer = &state.draw_framebuffer;
        let rect = if state.scissor_test {
            state.scissor.clamp_to_extent(framebuffer.width, framebuffer.height)
        } else {
            Rect::new(0, 0, framebuffer.width, framebuffer.height)
        };
        let rect = if self.is_viewport_flipped(state) {
            Rect {
                y: framebuffer.height as i32 - rect.y - rect.height as i32,
                ..rect
            }
        } else {
            rect
        };
        self.pipeline_desc.update_scissor(&mut self.pipeline_transition, rect);
    }

    fn sync_blend(&mut self, state: &State) {
        self.pipeline_desc.update_blend(&mut self.pipeline_transition, state.blend);
    }

    fn sync_blend_color(&mut self, state: &State) {
        self.pipeline_desc
            .update_blend_constants(&mut self.pipeline_transition, state.blend_color);
    }

    fn sync_color_mask(&mut self, state: &State) {
        self.pipeline_desc
            .update_color_write_mask(&mut self.pipeline_transition, state.color_write_mask);
    }

    fn sync_depth(&mut self, state: &State) {
        self.pipeline_desc.update_depth(
            &mut self.pipeline_transition,
            state.depth_test,
            state.depth_write,
            state.depth_func,
        );
    }

    fn sync_stencil(&mut self, state: &State) {
        self.pipeline_desc.update_stencil(
            &mut self.pipeline_transition,
            state.stencil_test,
            state.stencil_front,
            state.stencil_back,
        );
    }

    fn sync_cull_face(&mut self, state: &State) {
        let cull_mode = if state.cull_face { state.cull_mode } else { CullMode::NONE };
        self.pipeline_desc.update_cull_mode(&mut self.pipeline_transition, cull_mode);
    }

    fn sync_front_face(&mut self, state: &State) {
        let front_face = state.front_face.to_vk_front_face(self.is_viewport_flipped(state));
        self.pipeline_desc.update_front_face(&mut self.pipeline_transition, front_face);
    }

    fn sync_polygon_offset(&mut self, state: &State) {
        self.pipeline_desc
            .update_polygon_offset(&mut self.pipeline_transition, state.polygon_offset);
    }

    fn sync_rasterizer_discard(&mut self, state: &State) {
        self.pipeline_desc
            .update_rasterizer_discard(&mut self.pipeline_transition, state.rasterizer_discard);
    }

    fn sync_line_width(&mut self, state: &State) {
        self.pipeline_desc
            .update_line_width(&mut self.pipeline_transition, state.line_width);
    }

    fn sync_primitive_restart(&mut self, state: &State) {
        self.pipeline_desc
            .update_primitive_restart(&mut self.pipeline_transition, state.primitive_restart);
    }

    fn sync_sample_alpha_to_coverage(&mut self, state: &State) {
        self.pipeline_desc
            .update_alpha_to_coverage(&mut self.pipeline_transition, state.sample_alpha_to_coverage);
    }

    fn sync_draw_framebuffer(&mut self, state: &State) {
        let framebuffer = &state.draw_framebuffer;
        // draws to the new framebuffer go to a new render pass instance
        self.render_pass_commands = None;
        self.pipeline_desc.update_render_pass(
            &mut self.pipeline_transition,
            framebuffer.render_pass,
            framebuffer.samples,
            framebuffer.color_attachment_count,
        );
        // these depend on the framebuffer size and orientation
        self.sync_viewport(state);
        self.sync_scissor(state);
        self.sync_front_face(state);
    }

    /// Updates the vertex input description and buffer bindings of the attributes read by the
    /// current program.
    fn sync_vertex_array(&mut self, state: &State) {
        let active = self.program.as_ref().map_or(0, |p| p.active_attributes());
        let mut unsupported = 0u16;
        for location in 0..MAX_VERTEX_ATTRIBS {
            let desc = if active & (1 << location) == 0 {
                None
            } else {
                match state.vertex_array.attributes[location] {
                    Some(ref attribute) => {
                        if let VertexSource::Buffer { buffer, offset } = attribute.source {
                            self.vertex_bindings[location] = VertexBinding { buffer, offset };
                        }
                        match attribute.to_desc() {
                            Ok(desc) => Some(desc),
                            Err(err) => {
                                warn!(location, format = ?attribute.format, "{err}");
                                unsupported |= 1 << location;
                                None
                            }
                        }
                    }
                    None => Some(DEFAULT_ATTRIBUTE_DESC),
                }
            };
            self.pipeline_desc
                .update_vertex_attribute(&mut self.pipeline_transition, location, desc);
        }
        self.unsupported_vertex_attributes = unsupported;
        self.graphics_dirty_bits |= GraphicsDirtyBits::VERTEX_BUFFERS | GraphicsDirtyBits::DEFAULT_ATTRIBS;
    }

    fn sync_program(&mut self, state: &State) {
        self.program = state.program.clone();
        self.current_pipeline = None;
        self.default_uniforms_needs_upload = true;
        for set in self.descriptor_sets.iter_mut() {
            set.invalidate();
        }
        self.graphics_dirty_bits = GraphicsDirtyBits::all();
        self.compute_dirty_bits = ComputeDirtyBits::all();
        // the attributes read by the program changed
        self.sync_vertex_array(state);
    }

    fn sync_textures(&mut self, _state: &State) {
        self.descriptor_sets[super::TEXTURES_SET].invalidate();
        self.graphics_dirty_bits |= GraphicsDirtyBits::TEXTURES;
        self.compute_dirty_bits |= ComputeDirtyBits::TEXTURES;
        self.invalidate_descriptor_sets();
    }

    fn sync_shader_buffers(&mut self, _state: &State) {
        self.descriptor_sets[super::SHADER_RESOURCES_SET].invalidate();
        self.graphics_dirty_bits |= GraphicsDirtyBits::SHADER_RESOURCES;
        self.compute_dirty_bits |= ComputeDirtyBits::SHADER_RESOURCES;
        self.invalidate_descriptor_sets();
    }

    fn sync_atomic_counter_buffers(&mut self, state: &State) {
        self.sync_shader_buffers(state);
        // offset corrections are delivered through the driver uniforms
        self.graphics_dirty_bits |= GraphicsDirtyBits::DRIVER_UNIFORMS;
        self.compute_dirty_bits |= ComputeDirtyBits::DRIVER_UNIFORMS;
    }

    fn sync_transform_feedback(&mut self, state: &State) {
        let xfb = &state.transform_feedback;
        if xfb.active && !self.xfb_was_active {
            self.xfb_vertices_drawn = 0;
        }
        self.xfb_was_active = xfb.active;
        self.graphics_dirty_bits |=
            GraphicsDirtyBits::TRANSFORM_FEEDBACK_BUFFERS | GraphicsDirtyBits::DRIVER_UNIFORMS;
    }

    fn sync_current_values(&mut self, _state: &State) {
        self.graphics_dirty_bits |= GraphicsDirtyBits::DEFAULT_ATTRIBS;
    }
}
