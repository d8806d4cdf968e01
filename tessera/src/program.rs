//! Linked programs: shader modules, descriptor set layouts and pipeline caches.
use crate::{
    device::{DescriptorBinding, Device},
    error::{Error, Result},
    garbage::GarbageObject,
    pipeline::{GraphicsPipelineCache, MAX_VERTEX_ATTRIBS},
    serial::Serial,
    vk,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
};
use tracing::debug;

/// Maximum number of atomic counter buffers visible to a program.
pub const MAX_ATOMIC_COUNTER_BUFFERS: usize = 16;
/// Maximum number of transform feedback buffers.
pub const MAX_TRANSFORM_FEEDBACK_BUFFERS: usize = 4;

/// Descriptor set holding the default uniform block and the emulated transform feedback
/// buffers.
pub const UNIFORMS_SET_INDEX: u32 = 0;
/// Descriptor set holding the combined image samplers.
pub const TEXTURES_SET_INDEX: u32 = 1;
/// Descriptor set holding uniform, storage and atomic counter buffers.
pub const SHADER_RESOURCES_SET_INDEX: u32 = 2;
/// Descriptor set holding the driver uniforms.
pub const DRIVER_UNIFORMS_SET_INDEX: u32 = 3;

/// Binding of the default uniform block in the uniforms set.
pub const DEFAULT_UNIFORMS_BINDING: u32 = 0;
/// Binding of the first transform feedback buffer in the uniforms set.
pub const TRANSFORM_FEEDBACK_BINDING_BASE: u32 = 1;

/// SPIR-V of the stages of a program.
#[derive(Copy, Clone, Debug)]
pub enum ShaderStages<'a> {
    Graphics { vertex: &'a [u32], fragment: &'a [u32] },
    Compute { compute: &'a [u32] },
}

/// Interface of a program, as reflected by the frontend.
#[derive(Copy, Clone, Debug)]
pub struct ProgramDesc<'a> {
    pub shaders: ShaderStages<'a>,
    /// Bitmask of the vertex attribute locations read by the vertex shader.
    pub active_attributes: u16,
    /// Size in bytes of the default uniform block; 0 if there is none.
    pub default_uniform_block_size: u32,
    pub texture_count: u32,
    pub uniform_block_count: u32,
    pub storage_block_count: u32,
    pub atomic_counter_buffer_count: u32,
    /// Stride in bytes of each captured transform feedback buffer.
    pub transform_feedback_strides: &'a [u32],
}

impl<'a> ProgramDesc<'a> {
    /// A program with the given shaders and no resources.
    pub fn new(shaders: ShaderStages<'a>) -> ProgramDesc<'a> {
        ProgramDesc {
            shaders,
            active_attributes: 0,
            default_uniform_block_size: 0,
            texture_count: 0,
            uniform_block_count: 0,
            storage_block_count: 0,
            atomic_counter_buffer_count: 0,
            transform_feedback_strides: &[],
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum ShaderModules {
    Graphics {
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
    },
    Compute {
        compute: vk::ShaderModule,
    },
}

/// A program object.
///
/// Created by `ContextVk::create_program` and released with `ContextVk::destroy_program`.
pub struct ProgramVk {
    modules: ShaderModules,
    set_layouts: [vk::DescriptorSetLayout; 3],
    pipeline_layout: vk::PipelineLayout,
    active_attributes: u16,
    default_uniform_block_size: u32,
    texture_count: u32,
    uniform_block_count: u32,
    storage_block_count: u32,
    atomic_counter_buffer_count: u32,
    transform_feedback_strides: Vec<u32>,
    pipeline_cache: RefCell<GraphicsPipelineCache>,
    compute_pipeline: Cell<Option<vk::Pipeline>>,
    compute_pipeline_serial: Cell<Serial>,
    default_uniforms: RefCell<Vec<u8>>,
    default_uniforms_dirty: Cell<bool>,
    released: Cell<bool>,
}

impl fmt::Debug for ProgramVk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProgramVk")
            .field("modules", &self.modules)
            .field("pipeline_layout", &self.pipeline_layout)
            .field("active_attributes", &format_args!("{:#06x}", self.active_attributes))
            .finish_non_exhaustive()
    }
}

fn shader_module(device: &dyn Device, code: &[u32], modules: &mut Vec<vk::ShaderModule>) -> Result<vk::ShaderModule> {
    let module = device.create_shader_module(code)?;
    modules.push(module);
    Ok(module)
}

impl ProgramVk {
    /// Creates the shader modules and layouts of a program. `driver_uniforms_layout` is the
    /// layout of the driver uniforms set of the matching pipeline kind.
    pub(crate) fn new(
        device: &dyn Device,
        desc: &ProgramDesc,
        driver_uniforms_layout: vk::DescriptorSetLayout,
    ) -> Result<ProgramVk> {
        if desc.atomic_counter_buffer_count as usize > MAX_ATOMIC_COUNTER_BUFFERS {
            return Err(Error::InvalidOperation("too many atomic counter buffers"));
        }
        if desc.transform_feedback_strides.len() > MAX_TRANSFORM_FEEDBACK_BUFFERS {
            return Err(Error::InvalidOperation("too many transform feedback buffers"));
        }

        // Everything created so far is destroyed if a later step fails.
        let mut created_modules = vec![];
        let mut created_layouts = vec![];
        let result = Self::create_objects(
            device,
            desc,
            driver_uniforms_layout,
            &mut created_modules,
            &mut created_layouts,
        );
        let (modules, set_layouts, pipeline_layout) = match result {
            Ok(objects) => objects,
            Err(err) => {
                for module in created_modules {
                    device.destroy_shader_module(module);
                }
                for layout in created_layouts {
                    device.destroy_descriptor_set_layout(layout);
                }
                return Err(err);
            }
        };

        debug!(?pipeline_layout, ?modules, "created program");
        Ok(ProgramVk {
            modules,
            set_layouts,
            pipeline_layout,
            active_attributes: match modules {
                ShaderModules::Graphics { .. } => desc.active_attributes,
                ShaderModules::Compute { .. } => 0,
            },
            default_uniform_block_size: desc.default_uniform_block_size,
            texture_count: desc.texture_count,
            uniform_block_count: desc.uniform_block_count,
            storage_block_count: desc.storage_block_count,
            atomic_counter_buffer_count: desc.atomic_counter_buffer_count,
            transform_feedback_strides: desc.transform_feedback_strides.to_vec(),
            pipeline_cache: RefCell::new(GraphicsPipelineCache::new()),
            compute_pipeline: Cell::new(None),
            compute_pipeline_serial: Cell::new(Serial::ZERO),
            default_uniforms: RefCell::new(vec![0; desc.default_uniform_block_size as usize]),
            default_uniforms_dirty: Cell::new(desc.default_uniform_block_size > 0),
            released: Cell::new(false),
        })
    }

    fn create_objects(
        device: &dyn Device,
        desc: &ProgramDesc,
        driver_uniforms_layout: vk::DescriptorSetLayout,
        created_modules: &mut Vec<vk::ShaderModule>,
        created_layouts: &mut Vec<vk::DescriptorSetLayout>,
    ) -> Result<(ShaderModules, [vk::DescriptorSetLayout; 3], vk::PipelineLayout)> {
        let (modules, stages) = match desc.shaders {
            ShaderStages::Graphics { vertex, fragment } => (
                ShaderModules::Graphics {
                    vertex: shader_module(device, vertex, created_modules)?,
                    fragment: shader_module(device, fragment, created_modules)?,
                },
                vk::ShaderStageFlags::ALL_GRAPHICS,
            ),
            ShaderStages::Compute { compute } => (
                ShaderModules::Compute {
                    compute: shader_module(device, compute, created_modules)?,
                },
                vk::ShaderStageFlags::COMPUTE,
            ),
        };

        let mut create_layout = |bindings: &[DescriptorBinding]| -> Result<vk::DescriptorSetLayout> {
            let layout = device.create_descriptor_set_layout(bindings)?;
            created_layouts.push(layout);
            Ok(layout)
        };

        let binding = |binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags| {
            DescriptorBinding {
                binding,
                descriptor_type,
                count: 1,
                stages,
            }
        };

        // set 0: default uniforms, transform feedback buffers
        let mut uniform_bindings = vec![];
        if desc.default_uniform_block_size > 0 {
            uniform_bindings.push(binding(
                DEFAULT_UNIFORMS_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                stages,
            ));
        }
        for i in 0..desc.transform_feedback_strides.len() as u32 {
            uniform_bindings.push(binding(
                TRANSFORM_FEEDBACK_BINDING_BASE + i,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            ));
        }

        // set 1: textures
        let texture_bindings: Vec<_> = (0..desc.texture_count)
            .map(|i| binding(i, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stages))
            .collect();

        // set 2: uniform blocks, storage blocks, atomic counter buffers
        let mut resource_bindings = vec![];
        let mut next = 0;
        for _ in 0..desc.uniform_block_count {
            resource_bindings.push(binding(next, vk::DescriptorType::UNIFORM_BUFFER, stages));
            next += 1;
        }
        for _ in 0..(desc.storage_block_count + desc.atomic_counter_buffer_count) {
            resource_bindings.push(binding(next, vk::DescriptorType::STORAGE_BUFFER, stages));
            next += 1;
        }

        let set_layouts = [
            create_layout(&uniform_bindings)?,
            create_layout(&texture_bindings)?,
            create_layout(&resource_bindings)?,
        ];
        let pipeline_layout = device.create_pipeline_layout(&[
            set_layouts[0],
            set_layouts[1],
            set_layouts[2],
            driver_uniforms_layout,
        ])?;
        Ok((modules, set_layouts, pipeline_layout))
    }

    pub fn is_compute(&self) -> bool {
        matches!(self.modules, ShaderModules::Compute { .. })
    }

    /// Whether the vertex shader reads the attribute at `location`.
    pub fn is_attribute_active(&self, location: usize) -> bool {
        location < MAX_VERTEX_ATTRIBS && self.active_attributes & (1 << location) != 0
    }

    pub fn active_attributes(&self) -> u16 {
        self.active_attributes
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Layout of set `index` (0 to 2).
    pub fn set_layout(&self, index: u32) -> vk::DescriptorSetLayout {
        self.set_layouts[index as usize]
    }

    pub fn default_uniform_block_size(&self) -> u32 {
        self.default_uniform_block_size
    }

    pub fn texture_count(&self) -> u32 {
        self.texture_count
    }

    pub fn uniform_block_count(&self) -> u32 {
        self.uniform_block_count
    }

    pub fn storage_block_count(&self) -> u32 {
        self.storage_block_count
    }

    pub fn atomic_counter_buffer_count(&self) -> u32 {
        self.atomic_counter_buffer_count
    }

    pub fn transform_feedback_strides(&self) -> &[u32] {
        &self.transform_feedback_strides
    }

    pub(crate) fn graphics_shaders(&self) -> Option<(vk::ShaderModule, vk::ShaderModule)> {
        match self.modules {
            ShaderModules::Graphics { vertex, fragment } => Some((vertex, fragment)),
            ShaderModules::Compute { .. } => None,
        }
    }

    pub fn pipeline_cache(&self) -> &RefCell<GraphicsPipelineCache> {
        &self.pipeline_cache
    }

    /// Returns the compute pipeline, creating it on first use.
    pub(crate) fn get_or_create_compute_pipeline(&self, device: &dyn Device) -> Result<vk::Pipeline> {
        if let Some(pipeline) = self.compute_pipeline.get() {
            return Ok(pipeline);
        }
        let ShaderModules::Compute { compute } = self.modules else {
            return Err(Error::InvalidOperation("not a compute program"));
        };
        let pipeline = device
            .create_compute_pipeline(self.pipeline_layout, compute)
            .map_err(|result| match Error::from(result) {
                Error::Vulkan(result) => Error::PipelineCreation(result),
                other => other,
            })?;
        debug!(?pipeline, "created compute pipeline");
        self.compute_pipeline.set(Some(pipeline));
        Ok(pipeline)
    }

    pub(crate) fn update_compute_pipeline_serial(&self, serial: Serial) {
        self.compute_pipeline_serial.set(serial);
    }

    /// Serial of the last submission that used the compute pipeline.
    pub fn compute_pipeline_serial(&self) -> Serial {
        self.compute_pipeline_serial.get()
    }

    /// Writes `data` into the default uniform block at `offset`.
    pub fn set_uniform_data(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut uniforms = self.default_uniforms.borrow_mut();
        let dst = uniforms
            .get_mut(offset..offset + data.len())
            .ok_or(Error::InvalidOperation("uniform write out of bounds"))?;
        dst.copy_from_slice(data);
        self.default_uniforms_dirty.set(true);
        Ok(())
    }

    /// Whether the default uniform block changed since it was last uploaded.
    pub fn has_dirty_uniforms(&self) -> bool {
        self.default_uniforms_dirty.get()
    }

    /// Calls `f` with the default uniform block and marks it clean if `f` succeeds.
    pub(crate) fn upload_uniforms<R>(&self, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        let result = f(&self.default_uniforms.borrow())?;
        self.default_uniforms_dirty.set(false);
        Ok(result)
    }

    /// Moves every GPU object of the program to `garbage`. Does nothing after the first call.
    pub(crate) fn release(&self, garbage: &mut Vec<GarbageObject>) {
        if self.released.replace(true) {
            return;
        }
        self.pipeline_cache.borrow_mut().release(garbage);
        if let Some(pipeline) = self.compute_pipeline.take() {
            garbage.push(pipeline.into());
        }
        match self.modules {
            ShaderModules::Graphics { vertex, fragment } => {
                garbage.push(vertex.into());
                garbage.push(fragment.into());
            }
            ShaderModules::Compute { compute } => garbage.push(compute.into()),
        }
        garbage.push(self.pipeline_layout.into());
        garbage.extend(self.set_layouts.iter().map(|&layout| GarbageObject::from(layout)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    #[test]
    fn uniform_writes_mark_the_block_dirty() {
        let device = SoftDevice::default();
        let driver_layout = device.create_descriptor_set_layout(&[]).unwrap();
        let desc = ProgramDesc {
            default_uniform_block_size: 16,
            ..ProgramDesc::new(ShaderStages::Compute { compute: &[0x0723_0203] })
        };
        let program = ProgramVk::new(&device, &desc, driver_layout).unwrap();
        assert!(program.has_dirty_uniforms());
        program.upload_uniforms(|data| Ok(data.len())).unwrap();
        assert!(!program.has_dirty_uniforms());

        program.set_uniform_data(4, &[1, 2, 3, 4]).unwrap();
        assert!(program.has_dirty_uniforms());
        assert!(program.set_uniform_data(14, &[0; 4]).is_err());
    }

    #[test]
    fn release_moves_objects_only_once() {
        let device = SoftDevice::default();
        let driver_layout = device.create_descriptor_set_layout(&[]).unwrap();
        let desc = ProgramDesc::new(ShaderStages::Compute { compute: &[0x0723_0203] });
        let program = ProgramVk::new(&device, &desc, driver_layout).unwrap();
        program.get_or_create_compute_pipeline(&device).unwrap();

        let mut garbage = vec![];
        program.release(&mut garbage);
        // pipeline, module, pipeline layout and three set layouts
        assert_eq!(garbage.len(), 6);
        program.release(&mut garbage);
        assert_eq!(garbage.len(), 6);
    }
}
