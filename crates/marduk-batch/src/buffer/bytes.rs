use bytemuck::Pod;

use crate::error::BufferError;

/// Resizable byte block with independent write and read cursors.
///
/// Growth is geometric: a write that does not fit grows the block to
/// `max(needed, 2 * capacity)` rounded up to the growth alignment. The block
/// never shrinks implicitly; [`reset`](Self::reset) only rewinds the cursors.
///
/// A fixed buffer ([`ByteBuffer::fixed`]) never grows and reports
/// [`BufferError::Overflow`] instead.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    growth_alignment: usize,
    fixed: bool,
}

impl ByteBuffer {
    pub const DEFAULT_GROWTH_ALIGNMENT: usize = 256;

    #[inline]
    pub fn new() -> Self {
        Self::with_capacity(0, Self::DEFAULT_GROWTH_ALIGNMENT)
    }

    pub fn with_capacity(capacity: usize, growth_alignment: usize) -> Self {
        assert!(growth_alignment > 0, "growth alignment must be non-zero");
        Self {
            data: vec![0; capacity],
            write_pos: 0,
            read_pos: 0,
            growth_alignment,
            fixed: false,
        }
    }

    /// Creates a buffer that never grows past `capacity`.
    pub fn fixed(capacity: usize) -> Self {
        Self {
            fixed: true,
            ..Self::with_capacity(capacity, 1)
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Number of bytes written so far (the write cursor).
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Bytes between the read and write cursors.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// The written prefix of the block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    /// Rewinds both cursors. Capacity is kept for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }

    /// Makes room for `n` more bytes at the write cursor.
    pub fn ensure_can_write(&mut self, n: usize) -> Result<(), BufferError> {
        let needed = self.write_pos + n;
        if needed <= self.data.len() {
            return Ok(());
        }
        if self.fixed {
            return Err(BufferError::Overflow {
                needed,
                capacity: self.data.len(),
            });
        }

        let target = needed.max(self.data.len() * 2);
        let new_size = target.div_ceil(self.growth_alignment) * self.growth_alignment;
        log::trace!("ByteBuffer: growing {} -> {} bytes", self.data.len(), new_size);
        self.data.resize(new_size, 0);
        Ok(())
    }

    /// Checks that `n` bytes can be read without passing the write cursor.
    #[inline]
    pub fn ensure_can_read(&self, n: usize) -> Result<(), BufferError> {
        if self.read_pos + n > self.write_pos {
            return Err(BufferError::InsufficientData {
                needed: n,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_can_write(bytes.len())?;
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
        Ok(())
    }

    #[inline]
    pub fn put<T: Pod>(&mut self, value: T) -> Result<(), BufferError> {
        self.put_bytes(bytemuck::bytes_of(&value))
    }

    /// Writes zero bytes until the write cursor is a multiple of `align`.
    pub fn pad_to(&mut self, align: usize) -> Result<(), BufferError> {
        let pad = self.write_pos.next_multiple_of(align) - self.write_pos;
        if pad == 0 {
            return Ok(());
        }
        self.ensure_can_write(pad)?;
        self.data[self.write_pos..self.write_pos + pad].fill(0);
        self.write_pos += pad;
        Ok(())
    }

    /// Overwrites already-written bytes at `offset`. The cursors do not move.
    pub fn put_at<T: Pod>(&mut self, offset: usize, value: T) -> Result<(), BufferError> {
        let bytes = bytemuck::bytes_of(&value);
        let end = offset + bytes.len();
        if end > self.write_pos {
            return Err(BufferError::InsufficientData {
                needed: end,
                available: self.write_pos,
            });
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads a value at the read cursor and advances it.
    pub fn get<T: Pod>(&mut self) -> Result<T, BufferError> {
        let size = std::mem::size_of::<T>();
        self.ensure_can_read(size)?;
        let value = bytemuck::pod_read_unaligned(&self.data[self.read_pos..self.read_pos + size]);
        self.read_pos += size;
        Ok(value)
    }

    /// Reads a value at `offset` inside the written region. The cursors do not move.
    pub fn get_at<T: Pod>(&self, offset: usize) -> Result<T, BufferError> {
        let size = std::mem::size_of::<T>();
        let end = offset + size;
        if end > self.write_pos {
            return Err(BufferError::InsufficientData {
                needed: size,
                available: self.write_pos.saturating_sub(offset),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&self.data[offset..end]))
    }

    /// Advances the read cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), BufferError> {
        self.ensure_can_read(n)?;
        self.read_pos += n;
        Ok(())
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
