use std::collections::HashMap;

use glam::Mat4;

use crate::batch::{BuiltBuffer, DrawBatchDataHolder, DrawBatchId, HolderBacking, PreparedBuffer};
use crate::config::BatchConfig;
use crate::error::Result;
use crate::gpu::{DrawSink, GpuDevice};
use crate::multi::{BatchHolders, BatchOrder};
use crate::render::RenderCtx;

/// Staging that compiles into durable device buffers.
///
/// Write through [`holder`](Self::holder), optionally [`optimize`](Self::optimize),
/// then [`build`](Self::build). After a build, [`draw`](Self::draw) replays the
/// built set; new writes start a fresh staging pass whose batches replace
/// their built counterparts on the next build.
pub struct PersistentMultiBatchDataHolder {
    growth_alignment: usize,
    staging: BatchHolders<DrawBatchDataHolder>,
    prepared: HashMap<DrawBatchId, PreparedBuffer>,
    built: BatchHolders<BuiltBuffer>,
}

impl PersistentMultiBatchDataHolder {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            growth_alignment: config.byte_buffer_growth_alignment,
            staging: BatchHolders::new(),
            prepared: HashMap::new(),
            built: BatchHolders::new(),
        }
    }

    /// The staging holder for `batch`. Invalidates an optimized snapshot of it.
    pub fn holder(&mut self, ctx: &RenderCtx<'_>, batch: DrawBatchId) -> &mut DrawBatchDataHolder {
        self.prepared.remove(&batch);
        let backing = HolderBacking::Fresh {
            growth_alignment: self.growth_alignment,
        };
        self.staging
            .get_or_insert_with(batch, || DrawBatchDataHolder::new(ctx.registry, batch, backing))
    }

    /// Snapshots every staged batch that has no snapshot yet. Staging is kept.
    pub fn optimize(&mut self) {
        for (batch, holder) in self.staging.iter() {
            self.prepared.entry(batch).or_insert_with(|| holder.prepare());
        }
    }

    #[inline]
    pub fn is_optimized(&self, batch: DrawBatchId) -> bool {
        self.prepared.contains_key(&batch)
    }

    /// Uploads all staged batches and clears staging.
    ///
    /// A batch built before is replaced and its old buffers freed. Empty
    /// staged batches are skipped. On error, staging is still cleared.
    pub fn build(&mut self, ctx: &RenderCtx<'_>) -> Result<()> {
        let staged: Vec<_> = self.staging.drain().collect();
        let mut prepared = std::mem::take(&mut self.prepared);

        for (batch, mut holder) in staged {
            let snapshot = prepared.remove(&batch).unwrap_or_else(|| holder.prepare());
            holder.free();
            if snapshot.vertex_count() == 0 {
                continue;
            }

            let built = snapshot.upload(ctx.device, ctx.registry)?;
            if let Some(old) = self.built.insert(batch, built) {
                old.free(ctx.device);
            }
        }
        log::debug!("PersistentMultiBatchDataHolder: {} batch(es) built", self.built.len());
        Ok(())
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        !self.built.is_empty()
    }

    /// Built buffers in discovery order.
    pub fn built(&self) -> impl Iterator<Item = (DrawBatchId, &BuiltBuffer)> {
        self.built.iter()
    }

    /// Draws the built set in [`BatchOrder`].
    pub fn draw(&self, ctx: &RenderCtx<'_>, sink: &mut dyn DrawSink, model: Mat4) {
        for batch in BatchOrder::resolve(ctx.registry, self.built.discovered()) {
            if let Some(built) = self.built.get(batch) {
                built.render(sink, ctx.registry, model);
            }
        }
    }

    /// Frees staging, snapshots and every built buffer.
    pub fn free(&mut self, device: &dyn GpuDevice) {
        for (_, mut holder) in self.staging.drain() {
            holder.free();
        }
        self.prepared.clear();
        for (_, built) in self.built.drain() {
            built.free(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::batch::{BatchRegistry, DrawBatch, DrawCommand, ProgramId, Topology, VertexDataLayout};
    use crate::buffer::DataWriter;
    use crate::gpu::{HeadlessDevice, RecordingSink};

    fn setup() -> (HeadlessDevice, BatchRegistry, BatchConfig, Vec<DrawBatchId>) {
        let mut reg = BatchRegistry::new();
        let batches = (0..3)
            .map(|i| {
                reg.register(DrawBatch::new(
                    "persistent",
                    ProgramId(i),
                    Topology::Triangles,
                    VertexDataLayout::new([("p", wgpu::VertexFormat::Float32x2)]),
                ))
            })
            .collect();
        (HeadlessDevice::new(), reg, BatchConfig::default(), batches)
    }

    fn write(holder: &mut DrawBatchDataHolder, n: u32) {
        for i in 0..n {
            holder.vertices().write_vec2(Vec2::splat(i as f32)).unwrap();
        }
    }

    #[test]
    fn build_clears_staging_and_draw_replays() {
        let (dev, mut reg, config, b) = setup();
        reg.draw_last(b[0]);
        let ctx = RenderCtx::new(&dev, &reg, &config);

        let mut p = PersistentMultiBatchDataHolder::new(&config);
        write(p.holder(&ctx, b[0]), 3);
        write(p.holder(&ctx, b[1]), 6);
        assert!(!p.is_built());
        p.build(&ctx).unwrap();
        assert!(p.is_built());

        let mut sink = RecordingSink::new();
        p.draw(&ctx, &mut sink, Mat4::IDENTITY);
        p.draw(&ctx, &mut sink, Mat4::IDENTITY);
        assert_eq!(
            sink.programs(),
            vec![ProgramId(1), ProgramId(0), ProgramId(1), ProgramId(0)]
        );
        assert_eq!(sink.draws()[0], DrawCommand::arrays(6, 0));

        p.free(&dev);
        assert_eq!(dev.live_buffers(), 0);
    }

    #[test]
    fn optimize_snapshot_is_reused_until_holder_is_touched() {
        let (dev, reg, config, b) = setup();
        let ctx = RenderCtx::new(&dev, &reg, &config);
        let mut p = PersistentMultiBatchDataHolder::new(&config);

        write(p.holder(&ctx, b[0]), 3);
        write(p.holder(&ctx, b[1]), 3);
        p.optimize();
        assert!(p.is_optimized(b[0]));
        assert!(p.is_optimized(b[1]));

        write(p.holder(&ctx, b[1]), 3);
        assert!(p.is_optimized(b[0]));
        assert!(!p.is_optimized(b[1]));

        p.build(&ctx).unwrap();
        let counts: Vec<_> = p.built().map(|(_, built)| built.commands()[0]).collect();
        assert_eq!(counts, vec![DrawCommand::arrays(3, 0), DrawCommand::arrays(6, 0)]);
        p.free(&dev);
    }

    #[test]
    fn rebuild_replaces_and_frees_previous_buffers() {
        let (dev, reg, config, b) = setup();
        let ctx = RenderCtx::new(&dev, &reg, &config);
        let mut p = PersistentMultiBatchDataHolder::new(&config);

        write(p.holder(&ctx, b[2]), 3);
        p.build(&ctx).unwrap();
        assert_eq!(dev.live_buffers(), 1);

        write(p.holder(&ctx, b[2]), 9);
        p.build(&ctx).unwrap();
        assert_eq!(dev.live_buffers(), 1);
        assert_eq!(dev.stats().destroyed, 1);
        assert_eq!(p.built().count(), 1);
        assert_eq!(p.built().next().map(|(_, bb)| bb.vertex_bytes()), Some(72));
    }
}
