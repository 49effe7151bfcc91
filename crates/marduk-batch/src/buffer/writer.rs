use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::buffer::ByteBuffer;
use crate::error::BufferError;
use crate::paint::Color;

/// Shape of a single value handed to a [`DataWriter`].
///
/// The wire size is fixed per kind; only the alignment applied before the
/// value differs between writer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
}

impl ValueKind {
    /// Bytes written for a value of this kind.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            ValueKind::Scalar => 4,
            ValueKind::Vec2 => 8,
            ValueKind::Vec3 => 12,
            ValueKind::Vec4 => 16,
        }
    }

    /// Base alignment under the std140/std430 rules.
    #[inline]
    pub const fn base_alignment(self) -> usize {
        match self {
            ValueKind::Scalar => 4,
            ValueKind::Vec2 => 8,
            ValueKind::Vec3 | ValueKind::Vec4 => 16,
        }
    }
}

/// Typed writes on top of a [`ByteBuffer`].
///
/// Implementors decide what happens before a value lands (nothing for packed
/// vertex data, alignment padding for shader blocks). Matrices are written
/// column by column; each column is one vector value.
pub trait DataWriter {
    /// Writes the raw bytes of one value of `kind`.
    fn write_value(&mut self, kind: ValueKind, bytes: &[u8]) -> Result<(), BufferError>;

    fn bytes(&self) -> &ByteBuffer;

    #[inline]
    fn write_f32(&mut self, v: f32) -> Result<(), BufferError> {
        self.write_value(ValueKind::Scalar, bytemuck::bytes_of(&v))
    }

    #[inline]
    fn write_i32(&mut self, v: i32) -> Result<(), BufferError> {
        self.write_value(ValueKind::Scalar, bytemuck::bytes_of(&v))
    }

    #[inline]
    fn write_u32(&mut self, v: u32) -> Result<(), BufferError> {
        self.write_value(ValueKind::Scalar, bytemuck::bytes_of(&v))
    }

    #[inline]
    fn write_vec2(&mut self, v: Vec2) -> Result<(), BufferError> {
        self.write_value(ValueKind::Vec2, bytemuck::bytes_of(&v))
    }

    #[inline]
    fn write_vec3(&mut self, v: Vec3) -> Result<(), BufferError> {
        self.write_value(ValueKind::Vec3, bytemuck::bytes_of(&v))
    }

    #[inline]
    fn write_vec4(&mut self, v: Vec4) -> Result<(), BufferError> {
        self.write_value(ValueKind::Vec4, bytemuck::bytes_of(&v))
    }

    fn write_mat3(&mut self, m: Mat3) -> Result<(), BufferError> {
        for col in [m.x_axis, m.y_axis, m.z_axis] {
            self.write_vec3(col)?;
        }
        Ok(())
    }

    fn write_mat4(&mut self, m: Mat4) -> Result<(), BufferError> {
        for col in m.to_cols_array_2d() {
            self.write_vec4(Vec4::from_array(col))?;
        }
        Ok(())
    }

    /// Premultiplied color as four floats.
    #[inline]
    fn write_color(&mut self, c: Color) -> Result<(), BufferError> {
        self.write_vec4(Vec4::from_array(c.to_array()))
    }

    /// Premultiplied color packed into one `u32` (red in the low byte).
    #[inline]
    fn write_color_rgba8(&mut self, c: Color) -> Result<(), BufferError> {
        self.write_u32(c.to_rgba8())
    }
}

/// Tightly packed writes: no padding between values.
impl DataWriter for ByteBuffer {
    #[inline]
    fn write_value(&mut self, _kind: ValueKind, bytes: &[u8]) -> Result<(), BufferError> {
        self.put_bytes(bytes)
    }

    #[inline]
    fn bytes(&self) -> &ByteBuffer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_vec3_is_twelve_bytes() {
        let mut buf = ByteBuffer::new();
        buf.write_vec3(Vec3::new(1.0, 2.0, 3.0)).unwrap();
        buf.write_f32(4.0).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.get_at::<f32>(12).unwrap(), 4.0);
    }

    #[test]
    fn matrices_are_column_major() {
        let mut buf = ByteBuffer::new();
        let m = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        ]);
        buf.write_mat4(m).unwrap();
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.get_at::<f32>(16).unwrap(), 5.0);

        let mut buf = ByteBuffer::new();
        buf.write_mat3(Mat3::IDENTITY).unwrap();
        assert_eq!(buf.len(), 36);
        assert_eq!(buf.get_at::<f32>(16).unwrap(), 1.0);
    }

    #[test]
    fn color_variants() {
        let mut buf = ByteBuffer::new();
        buf.write_color(Color::WHITE).unwrap();
        buf.write_color_rgba8(Color::from_premul(1.0, 0.0, 0.0, 1.0)).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(buf.get_at::<u32>(16).unwrap(), 0xFF00_00FF);
    }
}
