use glam::Mat4;

use crate::batch::{DrawCommand, ProgramId, Topology};
use crate::config::align_up;
use crate::error::Result;
use crate::gpu::VertexArray;

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Kind of a named shader data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderDataKind {
    /// std140 uniform block.
    Uniform,
    /// std430 storage block.
    Storage,
}

impl ShaderDataKind {
    pub fn usage(self) -> wgpu::BufferUsages {
        match self {
            ShaderDataKind::Uniform => wgpu::BufferUsages::UNIFORM,
            ShaderDataKind::Storage => wgpu::BufferUsages::STORAGE,
        }
    }
}

/// Buffer operations of the render device.
///
/// Sizes are rounded up to [`wgpu::COPY_BUFFER_ALIGNMENT`]; offsets passed to
/// writes and copies must be multiples of it. All methods take `&self`: the
/// device is only touched from the render thread.
pub trait GpuDevice {
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId>;

    fn create_buffer_with_data(&self, desc: &BufferDesc<'_>, data: &[u8]) -> Result<BufferId> {
        let size = align_up(desc.size.max(data.len() as u64), wgpu::COPY_BUFFER_ALIGNMENT);
        let id = self.create_buffer(&BufferDesc {
            size,
            usage: desc.usage | wgpu::BufferUsages::COPY_DST,
            ..*desc
        })?;
        if !data.is_empty() {
            self.write_buffer(id, 0, data)?;
        }
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId);

    /// Writes `data` at `offset`. The tail is zero-padded to the copy alignment.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    /// Copies `size` bytes between buffers, completing before the next use of `dst`.
    fn copy_buffer(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    fn buffer_size(&self, id: BufferId) -> Option<u64>;
}

/// Replaces `old` with a buffer of `new_size` bytes holding the same leading
/// `old` contents. The old buffer is destroyed.
pub fn grow_buffer(
    device: &dyn GpuDevice,
    old: BufferId,
    new_size: u64,
    usage: wgpu::BufferUsages,
    label: &str,
) -> Result<BufferId> {
    let old_size = device.buffer_size(old).unwrap_or(0);
    log::debug!("{label}: growing buffer {old_size} -> {new_size} bytes");

    let new = device.create_buffer(&BufferDesc {
        label,
        size: new_size,
        usage: usage | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
    })?;
    let preserved = old_size.min(new_size);
    if preserved > 0 {
        device.copy_buffer(old, 0, new, 0, preserved)?;
    }
    device.destroy_buffer(old);
    Ok(new)
}

/// Draw-side collaborator: program, uniforms and the actual draw calls.
///
/// Shader compilation and uniform upload live outside this crate; a sink binds
/// whatever the batch names and issues the calls.
pub trait DrawSink {
    fn bind_program(&mut self, program: ProgramId, topology: Topology);

    fn set_model_matrix(&mut self, model: Mat4);

    fn bind_vertex_array(&mut self, vertex_array: &VertexArray);

    fn bind_shader_data(&mut self, name: &str, kind: ShaderDataKind, buffer: BufferId);

    fn bind_storage_buffer(&mut self, binding: u32, buffer: BufferId);

    fn unbind_storage_buffer(&mut self, binding: u32);

    fn draw(&mut self, command: &DrawCommand);

    /// Executes `count` commands read from `commands`, starting at offset 0.
    fn multi_draw_indirect(&mut self, commands: BufferId, count: u32, indexed: bool);
}
