//! Vertex array state and client-side vertex data streaming.
use crate::{
    error::{Error, Result},
    pipeline::{VertexAttributeDesc, MAX_VERTEX_ATTRIBS},
    types::{vertex_format_size, IndexType},
    vk,
};
use std::rc::Rc;

/// Where the data of a vertex attribute comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum VertexSource {
    /// A GPU buffer, starting at `offset`.
    Buffer { buffer: vk::Buffer, offset: u64 },
    /// Application memory, copied to GPU memory at each draw.
    Client(Rc<[u8]>),
}

/// An enabled vertex attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexAttribute {
    pub format: vk::Format,
    /// Distance between elements in bytes; 0 means tightly packed.
    pub stride: u32,
    /// 0 for per-vertex data, otherwise the number of instances sharing an element.
    pub divisor: u32,
    pub source: VertexSource,
}

impl VertexAttribute {
    pub fn buffer(format: vk::Format, buffer: vk::Buffer, offset: u64, stride: u32) -> VertexAttribute {
        VertexAttribute {
            format,
            stride,
            divisor: 0,
            source: VertexSource::Buffer { buffer, offset },
        }
    }

    pub fn client(format: vk::Format, data: impl Into<Rc<[u8]>>, stride: u32) -> VertexAttribute {
        VertexAttribute {
            format,
            stride,
            divisor: 0,
            source: VertexSource::Client(data.into()),
        }
    }

    pub fn with_divisor(mut self, divisor: u32) -> VertexAttribute {
        self.divisor = divisor;
        self
    }

    /// Size of one element. Fails if the format is not a vertex attribute format.
    pub fn element_size(&self) -> Result<u32> {
        vertex_format_size(self.format).ok_or(Error::InvalidOperation("unsupported vertex format"))
    }

    /// The stride actually used to fetch the attribute.
    pub fn effective_stride(&self) -> Result<u32> {
        match self.stride {
            0 => self.element_size(),
            stride => Ok(stride),
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self.source, VertexSource::Client(_))
    }

    pub fn to_desc(&self) -> Result<VertexAttributeDesc> {
        // a valid stride does not make the format fetchable
        self.element_size()?;
        Ok(VertexAttributeDesc {
            format: self.format,
            stride: self.effective_stride()?,
            divisor: self.divisor,
        })
    }
}

/// Vertex attribute bindings and the element array buffer.
///
/// A `None` attribute is disabled: shaders reading it get the current value of the attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexArrayState {
    pub attributes: [Option<VertexAttribute>; MAX_VERTEX_ATTRIBS],
    pub element_buffer: Option<vk::Buffer>,
}

impl VertexArrayState {
    /// Whether an enabled attribute read by the program sources client memory.
    pub fn has_active_client_attributes(&self, active: u16) -> bool {
        self.attributes
            .iter()
            .enumerate()
            .any(|(i, a)| active & (1 << i) != 0 && a.as_ref().map_or(false, |a| a.is_client()))
    }
}

/// Format of streamed default attribute values.
pub const DEFAULT_ATTRIBUTE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Pipeline description of an attribute sourced from its current value.
pub const DEFAULT_ATTRIBUTE_DESC: VertexAttributeDesc = VertexAttributeDesc {
    format: DEFAULT_ATTRIBUTE_FORMAT,
    stride: 0,
    divisor: 0,
};

/// Computes how many bytes of client data a draw reads.
///
/// Per-vertex data is streamed from element 0 to `first_vertex + vertex_count`, so that vertex
/// indices keep their meaning. Instanced data covers `ceil(instance_count / divisor)` elements.
/// The size is clamped to `data_len`.
pub fn client_stream_size(
    attribute: &VertexAttribute,
    data_len: usize,
    first_vertex: u32,
    vertex_count: u32,
    instance_count: u32,
) -> Result<usize> {
    let stride = attribute.effective_stride()? as usize;
    let element_size = attribute.element_size()? as usize;
    let elements = if attribute.divisor == 0 {
        first_vertex as usize + vertex_count as usize
    } else {
        let divisor = attribute.divisor as usize;
        (instance_count.max(1) as usize + divisor - 1) / divisor
    };
    let end = match elements {
        0 => 0,
        n => (n - 1) * stride + element_size,
    };
    Ok(end.min(data_len))
}

/// Returns the largest index in client index data, ignoring the primitive restart index if
/// `primitive_restart` is set.
pub fn max_client_index(indices: &[u8], index_type: IndexType, primitive_restart: bool) -> Option<u32> {
    match index_type {
        IndexType::U16 => indices
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]) as u32)
            .filter(|&i| !(primitive_restart && i == u16::MAX as u32))
            .max(),
        IndexType::U32 => indices
            .chunks_exact(4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .filter(|&i| !(primitive_restart && i == u32::MAX))
            .max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_vertex_range_covers_first_plus_count() {
        let attrib = VertexAttribute::client(vk::Format::R32G32_SFLOAT, vec![0u8; 1024], 12);
        // 5 elements, last one is not padded to the stride
        assert_eq!(client_stream_size(&attrib, 1024, 2, 3, 1).unwrap(), 4 * 12 + 8);
    }

    #[test]
    fn instanced_size_rounds_up() {
        let attrib = VertexAttribute::client(vk::Format::R32_SFLOAT, vec![0u8; 64], 0).with_divisor(2);
        assert_eq!(client_stream_size(&attrib, 64, 0, 100, 5).unwrap(), 3 * 4);
    }

    #[test]
    fn size_is_clamped_to_data() {
        let attrib = VertexAttribute::client(vk::Format::R32_SFLOAT, vec![0u8; 8], 0);
        assert_eq!(client_stream_size(&attrib, 8, 0, 10, 1).unwrap(), 8);
    }

    #[test]
    fn unsupported_formats_are_rejected_even_with_a_stride() {
        let attrib = VertexAttribute::client(vk::Format::D32_SFLOAT, vec![0u8; 64], 16);
        assert!(matches!(attrib.to_desc(), Err(Error::InvalidOperation(_))));
        assert!(client_stream_size(&attrib, 64, 0, 3, 1).is_err());

        let packed = VertexAttribute::client(vk::Format::A2B10G10R10_UNORM_PACK32, vec![0u8; 64], 0);
        assert_eq!(packed.to_desc().unwrap().stride, 4);;
    }

    #[test]
    fn max_index_skips_restart() {
        let indices: Vec<u8> = [0u16, 7, 0xffff, 3].iter().flat_map(|i| i.to_ne_bytes()).collect();
        assert_eq!(max_client_index(&indices, IndexType::U16, true), Some(7));
        assert_eq!(max_client_index(&indices, IndexType::U16, false), Some(0xffff));
    }
}
