use std::cell::RefCell;

use crate::batch::quad_indices::QuadIndexBuffer;
use crate::batch::{DrawBatch, DrawBatchId};
use crate::error::Result;
use crate::gpu::{BufferId, GpuDevice};

/// Table of draw batches and the resources shared between them.
///
/// Constructed once when the renderer starts and passed by reference to
/// everything that draws. Draw ordering is declared here: batches marked
/// [`draw_first`](Self::draw_first) are drawn before all others, batches
/// marked [`draw_last`](Self::draw_last) after all others, each group in
/// declaration order.
#[derive(Default)]
pub struct BatchRegistry {
    batches: Vec<DrawBatch>,
    first: Vec<DrawBatchId>,
    last: Vec<DrawBatchId>,
    quad_indices: RefCell<QuadIndexBuffer>,
    owned: RefCell<Vec<BufferId>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch. Every call yields a new id, even for equal batches.
    pub fn register(&mut self, batch: DrawBatch) -> DrawBatchId {
        let id = DrawBatchId(self.batches.len() as u32);
        log::debug!("BatchRegistry: registered '{}' as {:?}", batch.label, id);
        self.batches.push(batch);
        id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    #[inline]
    pub fn get(&self, id: DrawBatchId) -> Option<&DrawBatch> {
        self.batches.get(id.index())
    }

    /// # Panics
    /// If `id` was not issued by this registry.
    pub fn batch(&self, id: DrawBatchId) -> &DrawBatch {
        let Some(batch) = self.batches.get(id.index()) else {
            panic!("BatchRegistry: unknown draw batch {id:?}");
        };
        batch
    }

    /// Declares that `id` is drawn before every unordered batch.
    ///
    /// # Panics
    /// If `id` is unknown or already ordered last.
    pub fn draw_first(&mut self, id: DrawBatchId) {
        self.batch(id);
        assert!(!self.last.contains(&id), "{id:?} is already ordered last");
        if !self.first.contains(&id) {
            self.first.push(id);
        }
    }

    /// Declares that `id` is drawn after every unordered batch.
    ///
    /// # Panics
    /// If `id` is unknown or already ordered first.
    pub fn draw_last(&mut self, id: DrawBatchId) {
        self.batch(id);
        assert!(!self.first.contains(&id), "{id:?} is already ordered first");
        if !self.last.contains(&id) {
            self.last.push(id);
        }
    }

    #[inline]
    pub fn first_ordered(&self) -> &[DrawBatchId] {
        &self.first
    }

    #[inline]
    pub fn last_ordered(&self) -> &[DrawBatchId] {
        &self.last
    }

    #[inline]
    pub fn is_ordered(&self, id: DrawBatchId) -> bool {
        self.first.contains(&id) || self.last.contains(&id)
    }

    /// The shared quad index buffer, grown to cover `quads` quads.
    pub fn quad_index_buffer(&self, device: &dyn GpuDevice, quads: u32) -> Result<BufferId> {
        self.quad_indices.borrow_mut().ensure(device, quads)
    }

    /// Hands ownership of a long-lived buffer to the registry.
    pub fn own_buffer(&self, id: BufferId) {
        self.owned.borrow_mut().push(id);
    }

    /// Releases every buffer the registry owns, including the quad indices.
    pub fn free_all(&self, device: &dyn GpuDevice) {
        let owned: Vec<_> = self.owned.borrow_mut().drain(..).collect();
        log::debug!("BatchRegistry: freeing {} owned buffer(s)", owned.len());
        for id in owned {
            device.destroy_buffer(id);
        }
        self.quad_indices.borrow_mut().release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ProgramId, Topology, VertexDataLayout};
    use crate::gpu::{BufferDesc, HeadlessDevice};

    fn batch() -> DrawBatch {
        DrawBatch::new(
            "plain",
            ProgramId(1),
            Topology::Triangles,
            VertexDataLayout::new([("position", wgpu::VertexFormat::Float32x2)]),
        )
    }

    #[test]
    fn equal_batches_get_distinct_ids() {
        let mut reg = BatchRegistry::new();
        let a = reg.register(batch());
        let b = reg.register(batch());
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn ordering_declarations_are_deduplicated() {
        let mut reg = BatchRegistry::new();
        let a = reg.register(batch());
        let b = reg.register(batch());
        let c = reg.register(batch());
        reg.draw_first(b);
        reg.draw_first(a);
        reg.draw_first(b);
        reg.draw_last(c);
        assert_eq!(reg.first_ordered(), &[b, a]);
        assert_eq!(reg.last_ordered(), &[c]);
    }

    #[test]
    #[should_panic(expected = "already ordered first")]
    fn first_and_last_conflict() {
        let mut reg = BatchRegistry::new();
        let a = reg.register(batch());
        reg.draw_first(a);
        reg.draw_last(a);
    }

    #[test]
    fn free_all_releases_owned_and_shared_buffers() {
        let dev = HeadlessDevice::new();
        let reg = BatchRegistry::new();
        let id = dev
            .create_buffer(&BufferDesc {
                label: "owned",
                size: 16,
                usage: wgpu::BufferUsages::UNIFORM,
            })
            .unwrap();
        reg.own_buffer(id);
        reg.quad_index_buffer(&dev, 4).unwrap();
        assert_eq!(dev.live_buffers(), 2);

        reg.free_all(&dev);
        assert_eq!(dev.live_buffers(), 0);
    }
}
