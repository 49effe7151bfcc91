use std::borrow::{Borrow, BorrowMut};

use glam::Mat3;

use crate::buffer::{ByteBuffer, DataWriter, ValueKind};
use crate::error::BufferError;

/// Shader block layout rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutStandard {
    /// Uniform blocks: array elements and structs round up to 16 bytes.
    Std140,
    /// Storage blocks: natural alignment everywhere.
    Std430,
}

impl LayoutStandard {
    /// Alignment of an aggregate (struct or array) whose largest member
    /// alignment is `member_align`.
    #[inline]
    fn aggregate_alignment(self, member_align: usize) -> usize {
        match self {
            LayoutStandard::Std140 => member_align.next_multiple_of(16),
            LayoutStandard::Std430 => member_align,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    in_array: bool,
    start: usize,
    declared_align: usize,
    computed_align: usize,
}

/// [`DataWriter`] that lays values out under std140 or std430.
///
/// Nesting is explicit: [`begin_struct`](Self::begin_struct) /
/// [`end_struct`](Self::end_struct) and [`begin_array`](Self::begin_array) /
/// [`end_array`](Self::end_array). Each open aggregate records the largest
/// member alignment it has seen; closing it panics if that differs from the
/// alignment the caller declared, since the shader would disagree with the
/// bytes.
///
/// The backing store is anything that hands out a [`ByteBuffer`], so pooled
/// leases can be written in place.
#[derive(Debug)]
pub struct StdWriter<B = ByteBuffer> {
    buf: B,
    standard: LayoutStandard,
    stack: Vec<Frame>,
}

impl<B: BorrowMut<ByteBuffer>> StdWriter<B> {
    pub fn new(standard: LayoutStandard, buf: B) -> Self {
        Self {
            buf,
            standard,
            stack: Vec::new(),
        }
    }

    #[inline]
    pub fn standard(&self) -> LayoutStandard {
        self.standard
    }

    /// Depth of currently open structs and arrays.
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Opens a struct whose largest member alignment is `declared_align`.
    ///
    /// The cursor is moved to the struct's alignment first.
    pub fn begin_struct(&mut self, declared_align: usize) -> Result<(), BufferError> {
        self.open(false, declared_align)
    }

    /// Closes the innermost struct and pads it to its alignment.
    ///
    /// # Panics
    /// If the innermost aggregate is not a struct, or if the members written
    /// did not match the declared alignment.
    pub fn end_struct(&mut self) -> Result<(), BufferError> {
        self.close(false)
    }

    /// Opens an array whose element alignment is `element_align`.
    ///
    /// Under std140, scalar and vector elements are each placed on a 16-byte
    /// boundary.
    pub fn begin_array(&mut self, element_align: usize) -> Result<(), BufferError> {
        self.open(true, element_align)
    }

    /// # Panics
    /// Same conditions as [`end_struct`](Self::end_struct), for arrays.
    pub fn end_array(&mut self) -> Result<(), BufferError> {
        self.close(true)
    }

    /// Returns the finished block.
    ///
    /// # Panics
    /// If a struct or array is still open.
    pub fn finish(self) -> B {
        assert!(
            self.stack.is_empty(),
            "StdWriter::finish with {} unclosed aggregate(s)",
            self.stack.len()
        );
        self.buf
    }

    /// Returns the backing store without checking for open aggregates.
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Rewinds the writer for reuse. Open aggregates are discarded.
    pub fn reset(&mut self) {
        self.buf_mut().reset();
        self.stack.clear();
    }

    fn open(&mut self, in_array: bool, declared_align: usize) -> Result<(), BufferError> {
        assert!(
            declared_align.is_power_of_two(),
            "aggregate alignment must be a power of two, got {declared_align}"
        );
        let align = self.standard.aggregate_alignment(declared_align);
        self.buf_mut().pad_to(align)?;
        let start = self.bytes().len();
        self.stack.push(Frame {
            in_array,
            start,
            declared_align,
            computed_align: 0,
        });
        Ok(())
    }

    fn close(&mut self, in_array: bool) -> Result<(), BufferError> {
        let what = if in_array { "array" } else { "struct" };
        let Some(frame) = self.stack.pop() else {
            panic!("StdWriter: end_{what} without a matching begin_{what}");
        };
        assert_eq!(
            frame.in_array, in_array,
            "StdWriter: end_{what} closes a different kind of aggregate"
        );
        assert_eq!(
            frame.declared_align, frame.computed_align,
            "StdWriter: {what} starting at byte {} declared alignment {} but its members require {}",
            frame.start, frame.declared_align, frame.computed_align
        );

        let align = self.standard.aggregate_alignment(frame.declared_align);
        self.buf_mut().pad_to(align)?;
        self.note_member(frame.declared_align);
        Ok(())
    }

    #[inline]
    fn buf_mut(&mut self) -> &mut ByteBuffer {
        self.buf.borrow_mut()
    }

    #[inline]
    fn note_member(&mut self, align: usize) {
        if let Some(top) = self.stack.last_mut() {
            top.computed_align = top.computed_align.max(align);
        }
    }
}

impl<B: BorrowMut<ByteBuffer>> DataWriter for StdWriter<B> {
    fn write_value(&mut self, kind: ValueKind, bytes: &[u8]) -> Result<(), BufferError> {
        let base = kind.base_alignment();
        let in_array = self.stack.last().is_some_and(|f| f.in_array);
        let align = if in_array {
            self.standard.aggregate_alignment(base)
        } else {
            base
        };

        let buf = self.buf_mut();
        buf.pad_to(align)?;
        buf.put_bytes(bytes)?;
        self.note_member(base);
        Ok(())
    }

    /// Three `vec3` columns on a 16-byte column stride, under both standards.
    fn write_mat3(&mut self, m: Mat3) -> Result<(), BufferError> {
        for col in [m.x_axis, m.y_axis, m.z_axis] {
            self.write_vec3(col)?;
            self.buf_mut().pad_to(16)?;
        }
        Ok(())
    }

    #[inline]
    fn bytes(&self) -> &ByteBuffer {
        self.buf.borrow()
    }
}
