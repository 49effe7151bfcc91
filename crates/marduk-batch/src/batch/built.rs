use std::rc::Rc;

use glam::Mat4;

use crate::batch::{BatchRegistry, DrawBatchId, DrawCommand};
use crate::error::Result;
use crate::gpu::{BufferDesc, BufferId, DrawSink, GpuDevice, ShaderDataKind, VertexArray};
use crate::pool::{FramePools, GpuBuffer, Pooled};

/// A named uniform/storage block bound alongside a buffer's draws.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDataBinding {
    pub name: String,
    pub kind: ShaderDataKind,
    pub buffer: BufferId,
}

/// Where a built buffer's device buffers came from, and so how to release them.
pub(crate) enum Storage {
    /// Created for this buffer; destroyed on free.
    Owned(Vec<BufferId>),
    /// Leased from the frame pools; returned on free.
    Pooled {
        pools: Rc<FramePools>,
        leases: Vec<Pooled<GpuBuffer>>,
    },
}

impl Storage {
    pub(crate) fn create(
        &mut self,
        device: &dyn GpuDevice,
        data: &[u8],
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Result<BufferId> {
        match self {
            Storage::Owned(ids) => {
                let desc = BufferDesc {
                    label,
                    size: data.len() as u64,
                    usage: usage | wgpu::BufferUsages::COPY_SRC,
                };
                let id = device.create_buffer_with_data(&desc, data)?;
                ids.push(id);
                Ok(id)
            }
            Storage::Pooled { pools, leases } => {
                let lease = pools.borrow_gpu_buffer(
                    device,
                    data.len() as u64,
                    usage | wgpu::BufferUsages::COPY_SRC,
                    label,
                )?;
                let id = lease.id;
                leases.push(lease);
                if !data.is_empty() {
                    device.write_buffer(id, 0, data)?;
                }
                Ok(id)
            }
        }
    }

    pub(crate) fn release(self, device: &dyn GpuDevice) {
        match self {
            Storage::Owned(ids) => {
                for id in ids {
                    device.destroy_buffer(id);
                }
            }
            Storage::Pooled { pools, leases } => {
                for lease in leases {
                    pools.return_gpu_buffer(lease);
                }
            }
        }
    }
}

/// Render-ready package: vertex array, draw commands and shader data bindings.
///
/// Belongs to whoever built it until [`free`](Self::free) is called.
pub struct BuiltBuffer {
    pub(crate) batch: DrawBatchId,
    pub(crate) vertex_array: VertexArray,
    pub(crate) commands: Vec<DrawCommand>,
    pub(crate) shader_data: Vec<ShaderDataBinding>,
    /// Meaningful bytes at the start of the vertex buffer.
    pub(crate) vertex_bytes: u64,
    /// Meaningful bytes at the start of a non-shared index buffer.
    pub(crate) index_bytes: u64,
    pub(crate) storage: Storage,
}

impl BuiltBuffer {
    #[inline]
    pub fn batch(&self) -> DrawBatchId {
        self.batch
    }

    #[inline]
    pub fn vertex_array(&self) -> &VertexArray {
        &self.vertex_array
    }

    #[inline]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[inline]
    pub fn shader_data(&self) -> &[ShaderDataBinding] {
        &self.shader_data
    }

    #[inline]
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_bytes
    }

    #[inline]
    pub fn index_bytes(&self) -> u64 {
        self.index_bytes
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.vertex_array.index.is_some()
    }

    /// Draws every command with the batch's program and hooks.
    pub fn render(&self, sink: &mut dyn DrawSink, registry: &BatchRegistry, model: Mat4) {
        self.render_with(sink, registry, model, |sink, built| {
            for cmd in &built.commands {
                sink.draw(cmd);
            }
        });
    }

    /// Binds everything, runs `issue` for the draw calls, then the teardown hook.
    pub(crate) fn render_with(
        &self,
        sink: &mut dyn DrawSink,
        registry: &BatchRegistry,
        model: Mat4,
        issue: impl FnOnce(&mut dyn DrawSink, &BuiltBuffer),
    ) {
        let batch = registry.batch(self.batch);
        if let Some(setup) = batch.setup {
            setup(sink);
        }

        sink.bind_program(batch.program, batch.topology);
        sink.set_model_matrix(model);
        sink.bind_vertex_array(&self.vertex_array);
        for data in &self.shader_data {
            sink.bind_shader_data(&data.name, data.kind, data.buffer);
        }
        issue(sink, self);

        if let Some(teardown) = batch.teardown {
            teardown(sink);
        }
    }

    /// Releases the device buffers this package owns. Shared quad indices are
    /// left to the registry.
    pub fn free(self, device: &dyn GpuDevice) {
        self.storage.release(device);
    }
}
