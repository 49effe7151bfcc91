use std::rc::Rc;

use glam::Mat4;

use crate::batch::{DrawBatchDataHolder, DrawBatchId, HolderBacking};
use crate::error::Result;
use crate::gpu::DrawSink;
use crate::multi::{BatchHolders, BatchOrder};
use crate::pool::FramePools;
use crate::render::RenderCtx;

/// Per-frame staging: everything written is drawn once and discarded.
///
/// Staging and device buffers are leased from the frame pools and returned
/// as soon as a batch has been drawn.
pub struct ImmediateMultiBatchDataHolder {
    pools: Rc<FramePools>,
    holders: BatchHolders<DrawBatchDataHolder>,
}

impl ImmediateMultiBatchDataHolder {
    pub fn new(pools: Rc<FramePools>) -> Self {
        Self {
            pools,
            holders: BatchHolders::new(),
        }
    }

    /// The holder for `batch`, created on first access.
    pub fn holder(&mut self, ctx: &RenderCtx<'_>, batch: DrawBatchId) -> &mut DrawBatchDataHolder {
        let pools = &self.pools;
        self.holders.get_or_insert_with(batch, || {
            DrawBatchDataHolder::new(ctx.registry, batch, HolderBacking::Pooled(Rc::clone(pools)))
        })
    }

    #[inline]
    pub fn holders(&self) -> &BatchHolders<DrawBatchDataHolder> {
        &self.holders
    }

    /// Draws every batch in [`BatchOrder`], then discards all staged data.
    pub fn draw(&mut self, ctx: &RenderCtx<'_>, sink: &mut dyn DrawSink, model: Mat4) -> Result<()> {
        let order = BatchOrder::resolve(ctx.registry, self.holders.discovered());
        for batch in order {
            if let Err(err) = self.draw_batch(ctx, sink, batch, model) {
                self.free();
                return Err(err);
            }
        }
        self.free();
        Ok(())
    }

    /// Draws and discards one batch's staged data. Unknown batches are ignored.
    pub fn draw_batch(
        &mut self,
        ctx: &RenderCtx<'_>,
        sink: &mut dyn DrawSink,
        batch: DrawBatchId,
        model: Mat4,
    ) -> Result<()> {
        let Some(holder) = self.holders.get_mut(batch) else {
            return Ok(());
        };
        if holder.is_empty() {
            holder.free();
            return Ok(());
        }

        let built = holder
            .prepare()
            .upload_pooled(ctx.device, ctx.registry, &self.pools)?;
        built.render(sink, ctx.registry, model);
        built.free(ctx.device);
        holder.free();
        Ok(())
    }

    /// Returns every staging buffer and forgets all batches.
    pub fn free(&mut self) {
        for (_, mut holder) in self.holders.drain() {
            holder.free();
        }
    }
}
