use std::rc::Rc;

use crate::batch::built::Storage;
use crate::batch::{BatchRegistry, BuiltBuffer, DrawBatchId, DrawCommand, ShaderDataBinding};
use crate::error::Result;
use crate::gpu::{GpuDevice, ShaderDataKind, VertexArray};
use crate::pool::FramePools;

/// CPU-side, exact-size snapshot of a holder's data, ready to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBuffer {
    pub(crate) batch: DrawBatchId,
    pub(crate) vertex_stride: u64,
    pub(crate) instance_stride: Option<u64>,
    pub(crate) vertices: Vec<u8>,
    pub(crate) instances: Vec<u8>,
    /// `u32` indices; empty when drawing arrays or shared quad indices.
    pub(crate) indices: Vec<u8>,
    pub(crate) quads: bool,
    pub(crate) commands: Vec<DrawCommand>,
    pub(crate) shader_data: Vec<(String, ShaderDataKind, Vec<u8>)>,
}

impl PreparedBuffer {
    #[inline]
    pub fn batch(&self) -> DrawBatchId {
        self.batch
    }

    #[inline]
    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() as u64 / self.vertex_stride) as u32
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        (self.indices.len() / 4) as u32
    }

    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        &self.vertices
    }

    /// Appends `other`'s geometry after this buffer's, rebasing its commands.
    ///
    /// Shader data blocks of `other` are appended; names must not collide.
    ///
    /// # Panics
    /// If the buffers belong to different batches, either is instanced, or
    /// one is explicitly indexed and the other is not.
    pub fn merge(&mut self, other: PreparedBuffer) {
        assert_eq!(self.batch, other.batch, "PreparedBuffer::merge across batches");
        assert!(
            self.instances.is_empty() && other.instances.is_empty(),
            "PreparedBuffer::merge of instanced data"
        );
        assert_eq!(
            (self.quads, self.indices.is_empty()),
            (other.quads, other.indices.is_empty()),
            "PreparedBuffer::merge of indexed and non-indexed data"
        );
        for (name, ..) in &other.shader_data {
            assert!(
                !self.shader_data.iter().any(|(n, ..)| n == name),
                "PreparedBuffer::merge: shader data '{name}' present in both buffers"
            );
        }

        let vertex_base = self.vertex_count();
        let index_base = self.index_count();
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend_from_slice(&other.indices);
        self.shader_data.extend(other.shader_data);

        if self.quads {
            // Contiguous quads stay a single draw over the shared index buffer.
            self.commands = vec![DrawCommand::elements(self.vertex_count() / 4 * 6, 0, 0)];
        } else {
            self.commands.extend(
                other
                    .commands
                    .into_iter()
                    .map(|c| c.rebiased_vertices(vertex_base).rebiased_indices(index_base)),
            );
        }
    }

    /// Uploads into buffers owned by the returned [`BuiltBuffer`].
    pub fn upload(&self, device: &dyn GpuDevice, registry: &BatchRegistry) -> Result<BuiltBuffer> {
        self.upload_into(device, registry, Storage::Owned(Vec::new()))
    }

    /// Uploads into buffers leased from `pools`; freeing the result returns them.
    pub fn upload_pooled(
        &self,
        device: &dyn GpuDevice,
        registry: &BatchRegistry,
        pools: &Rc<FramePools>,
    ) -> Result<BuiltBuffer> {
        let storage = Storage::Pooled {
            pools: Rc::clone(pools),
            leases: Vec::new(),
        };
        self.upload_into(device, registry, storage)
    }

    fn upload_into(
        &self,
        device: &dyn GpuDevice,
        registry: &BatchRegistry,
        mut storage: Storage,
    ) -> Result<BuiltBuffer> {
        match self.create_buffers(device, registry, &mut storage) {
            Ok((vertex_array, shader_data)) => Ok(BuiltBuffer {
                batch: self.batch,
                vertex_array,
                commands: self.commands.clone(),
                shader_data,
                vertex_bytes: self.vertices.len() as u64,
                index_bytes: self.indices.len() as u64,
                storage,
            }),
            Err(err) => {
                storage.release(device);
                Err(err)
            }
        }
    }

    fn create_buffers(
        &self,
        device: &dyn GpuDevice,
        registry: &BatchRegistry,
        storage: &mut Storage,
    ) -> Result<(VertexArray, Vec<ShaderDataBinding>)> {
        let batch = registry.batch(self.batch);

        let vertex = storage.create(
            device,
            &self.vertices,
            wgpu::BufferUsages::VERTEX,
            batch.label,
        )?;
        let mut vertex_array =
            VertexArray::new().with_vertex_buffer(vertex, batch.layout.clone(), wgpu::VertexStepMode::Vertex);

        if !self.instances.is_empty() {
            if let Some(layout) = &batch.instance_layout {
                let instance = storage.create(
                    device,
                    &self.instances,
                    wgpu::BufferUsages::VERTEX,
                    batch.label,
                )?;
                vertex_array = vertex_array.with_vertex_buffer(instance, layout.clone(), wgpu::VertexStepMode::Instance);
            }
        }

        if !self.indices.is_empty() {
            let index = storage.create(device, &self.indices, wgpu::BufferUsages::INDEX, batch.label)?;
            vertex_array = vertex_array.with_index_buffer(index, wgpu::IndexFormat::Uint32, false);
        } else if self.quads {
            let index = registry.quad_index_buffer(device, self.vertex_count() / 4)?;
            vertex_array = vertex_array.with_index_buffer(index, wgpu::IndexFormat::Uint32, true);
        }

        let mut shader_data = Vec::with_capacity(self.shader_data.len());
        for (name, kind, bytes) in &self.shader_data {
            let buffer = storage.create(device, bytes, kind.usage(), name)?;
            shader_data.push(ShaderDataBinding {
                name: name.clone(),
                kind: *kind,
                buffer,
            });
        }

        Ok((vertex_array, shader_data))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::batch::{DrawBatch, DrawBatchDataHolder, HolderBacking, ProgramId, Topology, VertexDataLayout};
    use crate::buffer::DataWriter;
    use crate::gpu::HeadlessDevice;

    fn setup(topology: Topology) -> (BatchRegistry, DrawBatchId) {
        let mut reg = BatchRegistry::new();
        let id = reg.register(DrawBatch::new(
            "merge",
            ProgramId(0),
            topology,
            VertexDataLayout::new([("position", wgpu::VertexFormat::Float32x2)]),
        ));
        (reg, id)
    }

    fn prepared(reg: &BatchRegistry, id: DrawBatchId, vertices: u32, indices: &[u32]) -> PreparedBuffer {
        let mut holder = DrawBatchDataHolder::new(reg, id, HolderBacking::Fresh { growth_alignment: 16 });
        for i in 0..vertices {
            holder.vertices().write_vec2(Vec2::splat(i as f32)).unwrap();
        }
        for &i in indices {
            holder.indices().write_u32(i).unwrap();
        }
        holder.prepare()
    }

    #[test]
    fn merge_rebases_indexed_commands() {
        let (reg, id) = setup(Topology::Triangles);
        let mut a = prepared(&reg, id, 3, &[0, 1, 2]);
        let b = prepared(&reg, id, 4, &[0, 1, 2, 0, 2, 3]);
        a.merge(b);

        assert_eq!(a.vertex_count(), 7);
        assert_eq!(a.index_count(), 9);
        assert_eq!(
            a.commands(),
            &[DrawCommand::elements(3, 0, 0), DrawCommand::elements(6, 3, 3)]
        );
    }

    #[test]
    fn merged_quads_stay_one_draw() {
        let (reg, id) = setup(Topology::Quads);
        let mut a = prepared(&reg, id, 4, &[]);
        a.merge(prepared(&reg, id, 8, &[]));
        assert_eq!(a.commands(), &[DrawCommand::elements(18, 0, 0)]);
    }

    #[test]
    #[should_panic(expected = "indexed and non-indexed")]
    fn merge_rejects_mixed_indexing() {
        let (reg, id) = setup(Topology::Triangles);
        let mut a = prepared(&reg, id, 3, &[]);
        a.merge(prepared(&reg, id, 3, &[0, 1, 2]));
    }

    #[test]
    fn upload_copies_exact_bytes() {
        let dev = HeadlessDevice::new();
        let (reg, id) = setup(Topology::Triangles);
        let p = prepared(&reg, id, 3, &[2, 1, 0]);
        let built = p.upload(&dev, &reg).unwrap();

        assert_eq!(built.vertex_bytes(), 24);
        assert_eq!(built.index_bytes(), 12);
        let index = built.vertex_array().index.unwrap();
        assert!(!index.shared);
        assert_eq!(dev.read(index.buffer, 0, 12), bytemuck::cast_slice::<u32, u8>(&[2, 1, 0]).to_vec());

        built.free(&dev);
        assert_eq!(dev.live_buffers(), 0);
    }
}
