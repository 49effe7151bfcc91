use std::rc::Rc;

use crate::batch::{BatchRegistry, DrawBatchId, DrawCommand, PreparedBuffer, Topology};
use crate::buffer::{ByteBuffer, DataWriter, LayoutStandard, StdWriter};
use crate::gpu::ShaderDataKind;
use crate::pool::{FramePools, Pooled};

/// Where a holder's staging buffers come from.
#[derive(Clone)]
pub enum HolderBacking {
    /// Scratch buffers from the frame pools, returned on free.
    Pooled(Rc<FramePools>),
    /// Freshly allocated buffers.
    Fresh { growth_alignment: usize },
}

impl HolderBacking {
    fn acquire(&self) -> Pooled<ByteBuffer> {
        match self {
            HolderBacking::Pooled(pools) => pools.borrow_bytes(0),
            HolderBacking::Fresh { growth_alignment } => {
                Pooled::unpooled(ByteBuffer::with_capacity(0, *growth_alignment))
            }
        }
    }

    fn release(&self, buf: Pooled<ByteBuffer>) {
        if let HolderBacking::Pooled(pools) = self {
            if buf.is_pooled() {
                pools.return_bytes(buf);
            }
        }
    }
}

struct ShaderBlock {
    name: String,
    kind: ShaderDataKind,
    writer: StdWriter<Pooled<ByteBuffer>>,
}

/// Staging data for one unit of drawing work in one batch.
///
/// Writers are created on first use: one vertex, one instance, one index
/// writer, and any number of named uniform (std140) and storage (std430)
/// blocks.
pub struct DrawBatchDataHolder {
    batch: DrawBatchId,
    topology: Topology,
    vertex_stride: u64,
    instance_stride: Option<u64>,
    backing: HolderBacking,
    vertices: Option<Pooled<ByteBuffer>>,
    instances: Option<Pooled<ByteBuffer>>,
    indices: Option<Pooled<ByteBuffer>>,
    shader_data: Vec<ShaderBlock>,
}

impl DrawBatchDataHolder {
    pub fn new(registry: &BatchRegistry, batch: DrawBatchId, backing: HolderBacking) -> Self {
        let desc = registry.batch(batch);
        Self {
            batch,
            topology: desc.topology,
            vertex_stride: desc.layout.stride(),
            instance_stride: desc.instance_layout.as_ref().map(|l| l.stride()),
            backing,
            vertices: None,
            instances: None,
            indices: None,
            shader_data: Vec::new(),
        }
    }

    #[inline]
    pub fn batch(&self) -> DrawBatchId {
        self.batch
    }

    /// Packed per-vertex data in the batch's vertex layout.
    pub fn vertices(&mut self) -> &mut ByteBuffer {
        self.vertices.get_or_insert_with(|| self.backing.acquire())
    }

    /// Packed per-instance data.
    ///
    /// # Panics
    /// If the batch has no instance layout.
    pub fn instances(&mut self) -> &mut ByteBuffer {
        assert!(
            self.instance_stride.is_some(),
            "DrawBatchDataHolder: batch {:?} is not instanced",
            self.batch
        );
        self.instances.get_or_insert_with(|| self.backing.acquire())
    }

    /// `u32` indices relative to the holder's first vertex.
    pub fn indices(&mut self) -> &mut ByteBuffer {
        self.indices.get_or_insert_with(|| self.backing.acquire())
    }

    /// Named std140 uniform block.
    pub fn uniform(&mut self, name: &str) -> &mut StdWriter<Pooled<ByteBuffer>> {
        self.shader_block(name, ShaderDataKind::Uniform)
    }

    /// Named std430 storage block.
    pub fn storage(&mut self, name: &str) -> &mut StdWriter<Pooled<ByteBuffer>> {
        self.shader_block(name, ShaderDataKind::Storage)
    }

    fn shader_block(&mut self, name: &str, kind: ShaderDataKind) -> &mut StdWriter<Pooled<ByteBuffer>> {
        let idx = match self.shader_data.iter().position(|b| b.name == name) {
            Some(idx) => {
                assert_eq!(
                    self.shader_data[idx].kind, kind,
                    "DrawBatchDataHolder: shader data '{name}' already used as {:?}",
                    self.shader_data[idx].kind
                );
                idx
            }
            None => {
                let standard = match kind {
                    ShaderDataKind::Uniform => LayoutStandard::Std140,
                    ShaderDataKind::Storage => LayoutStandard::Std430,
                };
                self.shader_data.push(ShaderBlock {
                    name: name.to_owned(),
                    kind,
                    writer: StdWriter::new(standard, self.backing.acquire()),
                });
                self.shader_data.len() - 1
            }
        };
        &mut self.shader_data[idx].writer
    }

    pub fn vertex_count(&self) -> u32 {
        let bytes = self.vertices.as_ref().map_or(0, |b| b.len() as u64);
        (bytes / self.vertex_stride) as u32
    }

    /// Instances described by the instance data, or 1 without an instance writer.
    pub fn instance_count(&self) -> u32 {
        match (&self.instances, self.instance_stride) {
            (Some(buf), Some(stride)) => (buf.len() as u64 / stride) as u32,
            _ => 1,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |b| (b.len() / 4) as u32)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    /// The single draw covering everything written so far.
    pub fn command(&self) -> DrawCommand {
        let vertices = self.vertex_count();
        let cmd = if self.index_count() > 0 {
            DrawCommand::elements(self.index_count(), 0, 0)
        } else if self.topology == Topology::Quads {
            DrawCommand::elements(vertices / 4 * 6, 0, 0)
        } else {
            DrawCommand::arrays(vertices, 0)
        };
        cmd.with_instances(self.instance_count())
    }

    /// Snapshots the staged data. The holder keeps its contents.
    ///
    /// # Panics
    /// If the vertex or instance data is not a whole number of elements, or a
    /// shader block is still open.
    pub fn prepare(&self) -> PreparedBuffer {
        let bytes = |b: &Option<Pooled<ByteBuffer>>| b.as_ref().map_or_else(Vec::new, |b| b.as_bytes().to_vec());

        let vertices = bytes(&self.vertices);
        assert_eq!(
            vertices.len() as u64 % self.vertex_stride,
            0,
            "DrawBatchDataHolder: vertex data is not a multiple of the stride {}",
            self.vertex_stride
        );
        let instances = bytes(&self.instances);
        if let Some(stride) = self.instance_stride {
            assert_eq!(
                instances.len() as u64 % stride,
                0,
                "DrawBatchDataHolder: instance data is not a multiple of the stride {stride}"
            );
        }

        let shader_data = self
            .shader_data
            .iter()
            .map(|b| {
                assert_eq!(b.writer.depth(), 0, "shader data '{}' has an open aggregate", b.name);
                (b.name.clone(), b.kind, b.writer.bytes().as_bytes().to_vec())
            })
            .collect();

        PreparedBuffer {
            batch: self.batch,
            vertex_stride: self.vertex_stride,
            instance_stride: self.instance_stride,
            vertices,
            instances,
            indices: bytes(&self.indices),
            quads: self.index_count() == 0 && self.topology == Topology::Quads,
            commands: vec![self.command()],
            shader_data,
        }
    }

    /// Returns every staging buffer to its source and forgets the contents.
    pub fn free(&mut self) {
        for buf in [self.vertices.take(), self.instances.take(), self.indices.take()]
            .into_iter()
            .flatten()
        {
            self.backing.release(buf);
        }
        for block in self.shader_data.drain(..) {
            self.backing.release(block.writer.into_inner());
        }
    }
}

impl Drop for DrawBatchDataHolder {
    fn drop(&mut self) {
        self.free();
    }
}
