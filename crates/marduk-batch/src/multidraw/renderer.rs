use std::collections::HashMap;
use std::rc::Rc;

use glam::Mat4;

use crate::batch::{BuiltBuffer, DrawBatchId};
use crate::error::Result;
use crate::gpu::{BufferId, DrawSink, GpuDevice};
use crate::multi::{BatchHolders, BatchOrder, PersistentMultiBatchDataHolder};
use crate::multidraw::{ArenaMultiDrawBuilder, SubBufferId};
use crate::pool::FramePools;
use crate::render::RenderCtx;

/// Handle for everything one [`MultiDrawRenderer::upload_draw_batch_buffers`]
/// call uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId(u64);

/// Storage buffer bound around one draw; unbound on drop.
struct AuxBinding<'a> {
    sink: &'a mut dyn DrawSink,
    binding: Option<u32>,
}

impl<'a> AuxBinding<'a> {
    fn bind(sink: &'a mut dyn DrawSink, aux: Option<(u32, BufferId)>) -> Self {
        if let Some((binding, buffer)) = aux {
            sink.bind_storage_buffer(binding, buffer);
        }
        Self {
            sink,
            binding: aux.map(|(binding, _)| binding),
        }
    }
}

impl Drop for AuxBinding<'_> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding {
            self.sink.unbind_storage_buffer(binding);
        }
    }
}

/// Fans built buffers out across one [`ArenaMultiDrawBuilder`] per batch.
pub struct MultiDrawRenderer {
    pools: Rc<FramePools>,
    builders: BatchHolders<ArenaMultiDrawBuilder>,
    composites: HashMap<CompositeId, Vec<(DrawBatchId, SubBufferId)>>,
    next_id: u64,
}

impl MultiDrawRenderer {
    pub fn new(pools: Rc<FramePools>) -> Self {
        Self {
            pools,
            builders: BatchHolders::new(),
            composites: HashMap::new(),
            next_id: 0,
        }
    }

    /// Uploads every built buffer of `holder` and lists them for drawing.
    ///
    /// Nothing stays uploaded when any part fails.
    pub fn upload_draw_batch_buffers(
        &mut self,
        ctx: &RenderCtx<'_>,
        holder: &PersistentMultiBatchDataHolder,
    ) -> Result<CompositeId> {
        let mut parts = Vec::new();
        for (batch, built) in holder.built() {
            match self.upload_one(ctx, batch, built) {
                Ok(sub) => parts.push((batch, sub)),
                Err(err) => {
                    log::warn!("MultiDrawRenderer: upload failed, rolling back {} part(s): {err}", parts.len());
                    for (batch, sub) in parts {
                        if let Some(builder) = self.builders.get_mut(batch) {
                            builder.remove_buffer(sub);
                        }
                    }
                    return Err(err);
                }
            }
        }

        for &(batch, sub) in &parts {
            if let Some(builder) = self.builders.get_mut(batch) {
                builder.add_to_render_list(sub);
            }
        }

        let id = CompositeId(self.next_id);
        self.next_id += 1;
        log::debug!("MultiDrawRenderer: {id:?} spans {} batch(es)", parts.len());
        self.composites.insert(id, parts);
        Ok(id)
    }

    fn upload_one(&mut self, ctx: &RenderCtx<'_>, batch: DrawBatchId, built: &BuiltBuffer) -> Result<SubBufferId> {
        if !self.builders.contains(batch) {
            let builder = ArenaMultiDrawBuilder::new(ctx, self.pools.clone(), batch)?;
            self.builders.insert(batch, builder);
        }
        let Some(builder) = self.builders.get_mut(batch) else {
            unreachable!("builder for {batch:?} was just inserted");
        };
        builder.upload_buffer(ctx.device, built)
    }

    /// Removes everything a composite uploaded.
    ///
    /// Every part leaves its render list before any arena range is freed.
    ///
    /// # Panics
    /// If `id` is unknown or was already removed.
    pub fn remove_draw_batch_buffers(&mut self, id: CompositeId) {
        let Some(parts) = self.composites.remove(&id) else {
            panic!("MultiDrawRenderer::remove_draw_batch_buffers: unknown {id:?}");
        };

        for &(batch, sub) in &parts {
            if let Some(builder) = self.builders.get_mut(batch) {
                builder.remove_from_render_list(sub);
            }
        }
        for (batch, sub) in parts {
            if let Some(builder) = self.builders.get_mut(batch) {
                builder.remove_buffer(sub);
            }
        }
    }

    #[inline]
    pub fn contains(&self, id: CompositeId) -> bool {
        self.composites.contains_key(&id)
    }

    #[inline]
    pub fn composite_count(&self) -> usize {
        self.composites.len()
    }

    pub fn builder(&self, batch: DrawBatchId) -> Option<&ArenaMultiDrawBuilder> {
        self.builders.get(batch)
    }

    pub fn draw(&mut self, ctx: &RenderCtx<'_>, sink: &mut dyn DrawSink) -> Result<()> {
        self.draw_with(ctx, sink, Mat4::IDENTITY, None)
    }

    /// Draws every batch in first/middle/last order. `aux` is a storage
    /// buffer `(binding, buffer)` bound for the duration of this call only.
    pub fn draw_with(
        &mut self,
        ctx: &RenderCtx<'_>,
        sink: &mut dyn DrawSink,
        model: Mat4,
        aux: Option<(u32, BufferId)>,
    ) -> Result<()> {
        self.rebuild_dirty(ctx.device)?;

        let mut aux = AuxBinding::bind(sink, aux);
        for batch in BatchOrder::resolve(ctx.registry, self.builders.discovered()) {
            if let Some(builder) = self.builders.get(batch) {
                builder.draw(&mut *aux.sink, ctx.registry, model);
            }
        }
        Ok(())
    }

    /// Rebuilds every builder whose render list changed, whichever call
    /// changed it.
    fn rebuild_dirty(&mut self, device: &dyn GpuDevice) -> Result<()> {
        let batches = self.builders.discovered().to_vec();
        for batch in batches {
            if let Some(builder) = self.builders.get_mut(batch) {
                if builder.is_dirty() {
                    builder.rebuild_command_buffer(device)?;
                }
            }
        }
        Ok(())
    }

    /// Releases every builder and forgets all composites.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for (_, mut builder) in self.builders.drain() {
            builder.free(device);
            builder.destroy(device);
        }
        self.composites.clear();
    }
}
