use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use glam::Mat4;

use crate::batch::{DrawCommand, ProgramId, Topology};
use crate::config::align_up;
use crate::error::{BatchError, Result};
use crate::gpu::{BufferDesc, BufferId, DrawSink, GpuDevice, ShaderDataKind, VertexArray};

/// Operation counters of a [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub created: u64,
    pub destroyed: u64,
    pub writes: u64,
    pub copies: u64,
}

#[derive(Debug)]
struct HeadlessBuffer {
    label: String,
    data: Vec<u8>,
}

/// CPU-memory [`GpuDevice`].
///
/// Applies the same size and alignment rules as the wgpu backend, so code that
/// runs here without errors issues valid wgpu calls.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    buffers: RefCell<HashMap<BufferId, HeadlessBuffer>>,
    next_id: Cell<u64>,
    stats: Cell<DeviceStats>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stats(&self) -> DeviceStats {
        self.stats.get()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.borrow().len()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.borrow().contains_key(&id)
    }

    pub fn label(&self, id: BufferId) -> Option<String> {
        self.buffers.borrow().get(&id).map(|b| b.label.clone())
    }

    /// Copy of `len` bytes at `offset`.
    ///
    /// # Panics
    /// If the buffer does not exist or the range is out of bounds.
    pub fn read(&self, id: BufferId, offset: u64, len: u64) -> Vec<u8> {
        let buffers = self.buffers.borrow();
        let Some(buf) = buffers.get(&id) else {
            panic!("HeadlessDevice::read: unknown buffer {id:?}");
        };
        buf.data[offset as usize..(offset + len) as usize].to_vec()
    }

    fn bump(&self, f: impl FnOnce(&mut DeviceStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

fn check_aligned(what: &str, value: u64) -> Result<()> {
    if value % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(BatchError::Device(format!(
            "{what} {value} is not a multiple of {}",
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }
    Ok(())
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        let id = BufferId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let size = align_up(desc.size, wgpu::COPY_BUFFER_ALIGNMENT);
        self.buffers.borrow_mut().insert(
            id,
            HeadlessBuffer {
                label: desc.label.to_owned(),
                data: vec![0; size as usize],
            },
        );
        self.bump(|s| s.created += 1);
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        if self.buffers.borrow_mut().remove(&id).is_none() {
            panic!("HeadlessDevice::destroy_buffer: unknown or already destroyed buffer {id:?}");
        }
        self.bump(|s| s.destroyed += 1);
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        check_aligned("write offset", offset)?;

        let mut buffers = self.buffers.borrow_mut();
        let buf = buffers
            .get_mut(&id)
            .ok_or_else(|| BatchError::Device(format!("write to unknown buffer {id:?}")))?;

        let padded = align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let end = offset + padded;
        if end > buf.data.len() as u64 {
            return Err(BatchError::Device(format!(
                "write of {padded} bytes at {offset} overruns '{}' ({} bytes)",
                buf.label,
                buf.data.len()
            )));
        }

        let start = offset as usize;
        buf.data[start..start + data.len()].copy_from_slice(data);
        buf.data[start + data.len()..end as usize].fill(0);
        drop(buffers);
        self.bump(|s| s.writes += 1);
        Ok(())
    }

    fn copy_buffer(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        check_aligned("copy source offset", src_offset)?;
        check_aligned("copy destination offset", dst_offset)?;
        check_aligned("copy size", size)?;

        let mut buffers = self.buffers.borrow_mut();
        let bytes = {
            let src_buf = buffers
                .get(&src)
                .ok_or_else(|| BatchError::Device(format!("copy from unknown buffer {src:?}")))?;
            let range = src_offset as usize..(src_offset + size) as usize;
            src_buf
                .data
                .get(range)
                .ok_or_else(|| BatchError::Device(format!("copy source range overruns {src:?}")))?
                .to_vec()
        };
        let dst_buf = buffers
            .get_mut(&dst)
            .ok_or_else(|| BatchError::Device(format!("copy to unknown buffer {dst:?}")))?;
        let Some(target) = dst_buf
            .data
            .get_mut(dst_offset as usize..(dst_offset + size) as usize)
        else {
            return Err(BatchError::Device(format!("copy destination range overruns {dst:?}")));
        };
        target.copy_from_slice(&bytes);
        drop(buffers);
        self.bump(|s| s.copies += 1);
        Ok(())
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.borrow().get(&id).map(|b| b.data.len() as u64)
    }
}

/// One call received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    BindProgram { program: ProgramId, topology: Topology },
    ModelMatrix(Mat4),
    BindVertexArray(VertexArray),
    BindShaderData { name: String, kind: ShaderDataKind, buffer: BufferId },
    BindStorage { binding: u32, buffer: BufferId },
    UnbindStorage { binding: u32 },
    Draw(DrawCommand),
    MultiDrawIndirect { commands: BufferId, count: u32, indexed: bool },
}

/// [`DrawSink`] that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub calls: Vec<RecordedCall>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs in the order they were bound.
    pub fn programs(&self) -> Vec<ProgramId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::BindProgram { program, .. } => Some(*program),
                _ => None,
            })
            .collect()
    }

    /// Direct draw commands, in order.
    pub fn draws(&self) -> Vec<DrawCommand> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Draw(cmd) => Some(*cmd),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl DrawSink for RecordingSink {
    fn bind_program(&mut self, program: ProgramId, topology: Topology) {
        self.calls.push(RecordedCall::BindProgram { program, topology });
    }

    fn set_model_matrix(&mut self, model: Mat4) {
        self.calls.push(RecordedCall::ModelMatrix(model));
    }

    fn bind_vertex_array(&mut self, vertex_array: &VertexArray) {
        self.calls.push(RecordedCall::BindVertexArray(vertex_array.clone()));
    }

    fn bind_shader_data(&mut self, name: &str, kind: ShaderDataKind, buffer: BufferId) {
        self.calls.push(RecordedCall::BindShaderData {
            name: name.to_owned(),
            kind,
            buffer,
        });
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: BufferId) {
        self.calls.push(RecordedCall::BindStorage { binding, buffer });
    }

    fn unbind_storage_buffer(&mut self, binding: u32) {
        self.calls.push(RecordedCall::UnbindStorage { binding });
    }

    fn draw(&mut self, command: &DrawCommand) {
        self.calls.push(RecordedCall::Draw(*command));
    }

    fn multi_draw_indirect(&mut self, commands: BufferId, count: u32, indexed: bool) {
        self.calls.push(RecordedCall::MultiDrawIndirect {
            commands,
            count,
            indexed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::grow_buffer;

    fn desc(size: u64) -> BufferDesc<'static> {
        BufferDesc {
            label: "test",
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        }
    }

    #[test]
    fn sizes_round_up_to_copy_alignment() {
        let dev = HeadlessDevice::new();
        let id = dev.create_buffer(&desc(6)).unwrap();
        assert_eq!(dev.buffer_size(id), Some(8));
    }

    #[test]
    fn write_pads_tail_and_rejects_overrun() {
        let dev = HeadlessDevice::new();
        let id = dev.create_buffer(&desc(8)).unwrap();
        dev.write_buffer(id, 0, &[0xAA; 8]).unwrap();
        dev.write_buffer(id, 0, &[1, 2, 3]).unwrap();
        assert_eq!(dev.read(id, 0, 8), vec![1, 2, 3, 0, 0xAA, 0xAA, 0xAA, 0xAA]);

        assert!(dev.write_buffer(id, 4, &[0; 5]).is_err());
        assert!(dev.write_buffer(id, 2, &[0; 2]).is_err());
    }

    #[test]
    fn grow_preserves_contents_and_destroys_old() {
        let dev = HeadlessDevice::new();
        let old = dev.create_buffer_with_data(&desc(8), &[9; 8]).unwrap();
        let new = grow_buffer(&dev, old, 32, wgpu::BufferUsages::VERTEX, "grow").unwrap();

        assert!(!dev.contains(old));
        assert_eq!(dev.buffer_size(new), Some(32));
        assert_eq!(dev.read(new, 0, 8), vec![9; 8]);
        assert_eq!(dev.read(new, 8, 4), vec![0; 4]);
        assert_eq!(dev.stats().copies, 1);
        assert_eq!(dev.live_buffers(), 1);
    }

    #[test]
    #[should_panic(expected = "already destroyed")]
    fn double_destroy_panics() {
        let dev = HeadlessDevice::new();
        let id = dev.create_buffer(&desc(4)).unwrap();
        dev.destroy_buffer(id);
        dev.destroy_buffer(id);
    }
}
