use crate::buffer::DataWriter;
use crate::error::BufferError;

/// One draw, either over a vertex range or over an index range.
///
/// Commands are immutable; placing geometry at an arena offset produces a
/// rebiased copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawCommand {
    Arrays {
        vertex_count: u32,
        first_vertex: u32,
        instance_count: u32,
        base_instance: u32,
    },
    Elements {
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
        instance_count: u32,
        base_instance: u32,
    },
}

impl DrawCommand {
    /// Single-instance draw of `vertex_count` vertices.
    #[inline]
    pub const fn arrays(vertex_count: u32, first_vertex: u32) -> Self {
        DrawCommand::Arrays {
            vertex_count,
            first_vertex,
            instance_count: 1,
            base_instance: 0,
        }
    }

    /// Single-instance indexed draw.
    #[inline]
    pub const fn elements(index_count: u32, first_index: u32, base_vertex: i32) -> Self {
        DrawCommand::Elements {
            index_count,
            first_index,
            base_vertex,
            instance_count: 1,
            base_instance: 0,
        }
    }

    /// Bytes taken by the indirect form of an arrays command.
    pub const ARRAYS_SIZE: usize = 16;
    /// Bytes taken by the indirect form of an elements command.
    pub const ELEMENTS_SIZE: usize = 20;

    #[inline]
    pub fn is_indexed(&self) -> bool {
        matches!(self, DrawCommand::Elements { .. })
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        match *self {
            DrawCommand::Arrays { instance_count, .. } => instance_count,
            DrawCommand::Elements { instance_count, .. } => instance_count,
        }
    }

    #[inline]
    pub fn base_instance(&self) -> u32 {
        match *self {
            DrawCommand::Arrays { base_instance, .. } => base_instance,
            DrawCommand::Elements { base_instance, .. } => base_instance,
        }
    }

    /// Vertex count of an arrays command, index count of an elements command.
    #[inline]
    pub fn element_count(&self) -> u32 {
        match *self {
            DrawCommand::Arrays { vertex_count, .. } => vertex_count,
            DrawCommand::Elements { index_count, .. } => index_count,
        }
    }

    pub fn with_instances(self, count: u32) -> Self {
        match self {
            DrawCommand::Arrays { vertex_count, first_vertex, base_instance, .. } => {
                DrawCommand::Arrays { vertex_count, first_vertex, instance_count: count, base_instance }
            }
            DrawCommand::Elements { index_count, first_index, base_vertex, base_instance, .. } => {
                DrawCommand::Elements {
                    index_count,
                    first_index,
                    base_vertex,
                    instance_count: count,
                    base_instance,
                }
            }
        }
    }

    /// Shifts the vertex origin by `base` vertices.
    pub fn rebiased_vertices(self, base: u32) -> Self {
        match self {
            DrawCommand::Arrays { vertex_count, first_vertex, instance_count, base_instance } => {
                DrawCommand::Arrays {
                    vertex_count,
                    first_vertex: first_vertex + base,
                    instance_count,
                    base_instance,
                }
            }
            DrawCommand::Elements { index_count, first_index, base_vertex, instance_count, base_instance } => {
                DrawCommand::Elements {
                    index_count,
                    first_index,
                    base_vertex: base_vertex + base as i32,
                    instance_count,
                    base_instance,
                }
            }
        }
    }

    /// Shifts the index origin by `base` indices. Arrays commands are unchanged.
    pub fn rebiased_indices(self, base: u32) -> Self {
        match self {
            DrawCommand::Elements { index_count, first_index, base_vertex, instance_count, base_instance } => {
                DrawCommand::Elements {
                    index_count,
                    first_index: first_index + base,
                    base_vertex,
                    instance_count,
                    base_instance,
                }
            }
            arrays => arrays,
        }
    }

    /// Size of the indirect-argument form.
    #[inline]
    pub fn indirect_size(&self) -> usize {
        if self.is_indexed() {
            Self::ELEMENTS_SIZE
        } else {
            Self::ARRAYS_SIZE
        }
    }

    /// Writes the indirect-argument form, in the field order the driver reads
    /// (`DrawIndirectArgs` / `DrawIndexedIndirectArgs`).
    pub fn write_indirect<W: DataWriter + ?Sized>(&self, w: &mut W) -> Result<(), BufferError> {
        match *self {
            DrawCommand::Arrays { vertex_count, first_vertex, instance_count, base_instance } => {
                w.write_u32(vertex_count)?;
                w.write_u32(instance_count)?;
                w.write_u32(first_vertex)?;
                w.write_u32(base_instance)
            }
            DrawCommand::Elements { index_count, first_index, base_vertex, instance_count, base_instance } => {
                w.write_u32(index_count)?;
                w.write_u32(instance_count)?;
                w.write_u32(first_index)?;
                w.write_i32(base_vertex)?;
                w.write_u32(base_instance)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteBuffer;

    #[test]
    fn rebias_arrays_moves_first_vertex_only() {
        let cmd = DrawCommand::arrays(6, 2).rebiased_vertices(10).rebiased_indices(99);
        assert_eq!(cmd, DrawCommand::arrays(6, 12));
    }

    #[test]
    fn rebias_elements_moves_both_origins() {
        let cmd = DrawCommand::elements(12, 0, 0)
            .rebiased_indices(30)
            .rebiased_vertices(8);
        assert_eq!(cmd, DrawCommand::elements(12, 30, 8));
    }

    #[test]
    fn indirect_layout_matches_driver_order() {
        let mut buf = ByteBuffer::new();
        DrawCommand::arrays(3, 7).write_indirect(&mut buf).unwrap();
        DrawCommand::elements(6, 4, -2).write_indirect(&mut buf).unwrap();
        assert_eq!(buf.len(), DrawCommand::ARRAYS_SIZE + DrawCommand::ELEMENTS_SIZE);

        let words: &[u32] = bytemuck::cast_slice(buf.as_bytes());
        assert_eq!(&words[..4], &[3, 1, 7, 0]);
        assert_eq!(&words[4..], &[6, 1, 4, (-2i32) as u32, 0]);
    }

    #[test]
    fn with_instances_keeps_ranges() {
        let cmd = DrawCommand::elements(6, 0, 0).with_instances(5);
        assert_eq!(cmd.instance_count(), 5);
        assert_eq!(cmd.element_count(), 6);
        assert_eq!(cmd.base_instance(), 0);
    }
}
