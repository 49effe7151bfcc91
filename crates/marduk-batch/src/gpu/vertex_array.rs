use crate::batch::VertexDataLayout;
use crate::gpu::BufferId;

#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferBinding {
    pub buffer: BufferId,
    pub layout: VertexDataLayout,
    pub step_mode: wgpu::VertexStepMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: BufferId,
    pub format: wgpu::IndexFormat,
    /// The buffer belongs to the batch registry (shared quad indices) and must
    /// not be destroyed by whoever holds this binding.
    pub shared: bool,
}

impl IndexBinding {
    #[inline]
    pub fn index_size(&self) -> u64 {
        match self.format {
            wgpu::IndexFormat::Uint16 => 2,
            wgpu::IndexFormat::Uint32 => 4,
        }
    }
}

/// Vertex-array binding descriptor: which buffers feed the vertex stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexArray {
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index: Option<IndexBinding>,
}

impl VertexArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertex_buffer(
        mut self,
        buffer: BufferId,
        layout: VertexDataLayout,
        step_mode: wgpu::VertexStepMode,
    ) -> Self {
        self.vertex_buffers.push(VertexBufferBinding {
            buffer,
            layout,
            step_mode,
        });
        self
    }

    pub fn with_index_buffer(mut self, buffer: BufferId, format: wgpu::IndexFormat, shared: bool) -> Self {
        self.index = Some(IndexBinding {
            buffer,
            format,
            shared,
        });
        self
    }

    /// Points vertex slot `slot` at `buffer`.
    ///
    /// # Panics
    /// If the slot does not exist.
    pub fn rebind_vertex(&mut self, slot: usize, buffer: BufferId) {
        let Some(binding) = self.vertex_buffers.get_mut(slot) else {
            panic!("VertexArray::rebind_vertex: no vertex slot {slot}");
        };
        binding.buffer = buffer;
    }

    /// # Panics
    /// If no index buffer is bound.
    pub fn rebind_index(&mut self, buffer: BufferId) {
        let Some(index) = self.index.as_mut() else {
            panic!("VertexArray::rebind_index: no index binding");
        };
        index.buffer = buffer;
        index.shared = false;
    }

    /// Buffers this descriptor owns (everything except shared index data).
    pub fn owned_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.vertex_buffers
            .iter()
            .map(|b| b.buffer)
            .chain(self.index.iter().filter(|i| !i.shared).map(|i| i.buffer))
    }
}
