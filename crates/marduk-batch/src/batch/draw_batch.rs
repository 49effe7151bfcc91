use crate::batch::VertexDataLayout;
use crate::gpu::DrawSink;

/// Handle of a compiled shader program owned by the shader layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Handle of a registered [`DrawBatch`].
///
/// Batches are keyed by registration, not by contents: two registrations of
/// equal batches produce two ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawBatchId(pub(crate) u32);

impl DrawBatchId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Primitive assembly mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    /// Four vertices per quad, drawn as two triangles through the shared quad
    /// index buffer.
    Quads,
}

impl Topology {
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::Points => wgpu::PrimitiveTopology::PointList,
            Topology::Lines => wgpu::PrimitiveTopology::LineList,
            Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Topology::Triangles | Topology::Quads => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Callback run around a batch's draws (blend state, scissor, textures, ...).
pub type BatchHook = fn(&mut dyn DrawSink);

/// Identity of a drawing configuration.
#[derive(Debug, Clone)]
pub struct DrawBatch {
    pub label: &'static str,
    pub program: ProgramId,
    pub topology: Topology,
    pub layout: VertexDataLayout,
    /// Per-instance attributes, if the batch is instanced.
    pub instance_layout: Option<VertexDataLayout>,
    pub setup: Option<BatchHook>,
    pub teardown: Option<BatchHook>,
}

impl DrawBatch {
    pub fn new(
        label: &'static str,
        program: ProgramId,
        topology: Topology,
        layout: VertexDataLayout,
    ) -> Self {
        Self {
            label,
            program,
            topology,
            layout,
            instance_layout: None,
            setup: None,
            teardown: None,
        }
    }

    pub fn with_instance_layout(mut self, layout: VertexDataLayout) -> Self {
        self.instance_layout = Some(layout);
        self
    }

    pub fn with_setup(mut self, hook: BatchHook) -> Self {
        self.setup = Some(hook);
        self
    }

    pub fn with_teardown(mut self, hook: BatchHook) -> Self {
        self.teardown = Some(hook);
        self
    }
}
