use std::collections::HashMap;
use std::rc::Rc;

use glam::Mat4;

use crate::arena::ArenaAllocator;
use crate::batch::built::Storage;
use crate::batch::{BatchRegistry, BuiltBuffer, DrawBatchId, DrawCommand, Topology};
use crate::config::{align_up, lcm};
use crate::error::{BatchError, Result};
use crate::gpu::{BufferDesc, BufferId, DrawSink, GpuDevice, ShaderDataKind, VertexArray, grow_buffer};
use crate::multidraw::RenderList;
use crate::pool::FramePools;
use crate::render::RenderCtx;

/// Builder-local handle of an uploaded sub-buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubBufferId(u64);

/// Arena addresses held by one sub-buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    pub vertex_address: u64,
    pub index_address: Option<u64>,
}

#[derive(Debug)]
struct Entry {
    allocation: SubAllocation,
    commands: Vec<DrawCommand>,
}

/// One allocator and the device buffer it addresses.
#[derive(Debug)]
struct Arena {
    allocator: ArenaAllocator,
    buffer: BufferId,
    size: u64,
    quantum: u64,
    usage: wgpu::BufferUsages,
    label: &'static str,
}

impl Arena {
    fn new(
        device: &dyn GpuDevice,
        label: &'static str,
        capacity: u64,
        alignment: u64,
        quantum: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<Self> {
        let usage = usage | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let size = align_up(quantum.min(capacity), wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = device.create_buffer(&BufferDesc { label, size, usage })?;
        Ok(Self {
            allocator: ArenaAllocator::new(capacity, alignment),
            buffer,
            size,
            quantum,
            usage,
            label,
        })
    }

    /// Reserves `size` bytes, growing the device buffer to
    /// `align(end, quantum)` when the allocation ends past it.
    fn alloc(&mut self, device: &dyn GpuDevice, size: u64) -> Result<u64> {
        let address = self
            .allocator
            .alloc(size)
            .map_err(|err| BatchError::out_of_arena(self.label, err))?;

        let end = address + self.allocator.size_of(address).unwrap_or(size);
        if end > self.size {
            let target = align_up(end, self.quantum).min(self.allocator.capacity());
            match grow_buffer(device, self.buffer, target, self.usage, self.label) {
                Ok(buffer) => {
                    self.buffer = buffer;
                    self.size = device.buffer_size(buffer).unwrap_or(target);
                }
                Err(err) => {
                    self.allocator.free(address);
                    return Err(err);
                }
            }
        }
        Ok(address)
    }
}

/// Points the cached draw package at the current arena buffers after a growth.
fn sync_cached(cached: &mut Option<BuiltBuffer>, vertex_array: &VertexArray) {
    if let Some(built) = cached {
        built.vertex_array = vertex_array.clone();
    }
}

/// Packs many built buffers of one batch into shared vertex/index buffers and
/// draws the listed ones with a single indirect call.
///
/// Sub-buffers are uploaded with [`upload_buffer`](Self::upload_buffer) and
/// become visible once added to the render list. Any render-list change must
/// be followed by [`rebuild_command_buffer`](Self::rebuild_command_buffer)
/// before the next [`draw`](Self::draw).
///
/// Only single-vertex-buffer, non-instanced geometry without storage
/// bindings is accepted. Quads batches are indexed from the start; other
/// batches become indexed or not with their first successful upload, and
/// mixing the two is rejected.
pub struct ArenaMultiDrawBuilder {
    batch: DrawBatchId,
    vertex_stride: u64,
    vertices: Arena,
    indices: Option<Arena>,
    indexed: Option<bool>,
    index_capacity: u64,
    index_quantum: u64,
    command_buffer: BufferId,
    command_buffer_size: u64,
    command_quantum: u64,
    vertex_array: VertexArray,
    next_id: u64,
    entries: HashMap<SubBufferId, Entry>,
    render_list: RenderList<SubBufferId>,
    dirty: bool,
    built: Option<BuiltBuffer>,
    pools: Rc<FramePools>,
}

impl ArenaMultiDrawBuilder {
    pub fn new(ctx: &RenderCtx<'_>, pools: Rc<FramePools>, batch: DrawBatchId) -> Result<Self> {
        let desc = ctx.registry.batch(batch);
        let config = ctx.config;
        let vertex_stride = desc.layout.stride();
        assert!(vertex_stride > 0, "batch '{}' has an empty vertex layout", desc.label);

        let vertices = Arena::new(
            ctx.device,
            desc.label,
            config.arena_capacity,
            lcm(vertex_stride, wgpu::COPY_BUFFER_ALIGNMENT),
            config.vertex_growth_quantum,
            wgpu::BufferUsages::VERTEX,
        )?;
        let vertex_array = VertexArray::new().with_vertex_buffer(
            vertices.buffer,
            desc.layout.clone(),
            wgpu::VertexStepMode::Vertex,
        );

        let command_buffer_size = align_up(config.command_growth_quantum, wgpu::COPY_BUFFER_ALIGNMENT);
        let command_buffer = ctx.device.create_buffer(&BufferDesc {
            label: desc.label,
            size: command_buffer_size,
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
        })?;

        log::debug!("ArenaMultiDrawBuilder: created for '{}' (stride {vertex_stride})", desc.label);

        let mut builder = Self {
            batch,
            vertex_stride,
            vertices,
            indices: None,
            indexed: None,
            index_capacity: config.arena_capacity,
            index_quantum: config.index_growth_quantum,
            command_buffer,
            command_buffer_size,
            command_quantum: config.command_growth_quantum,
            vertex_array,
            next_id: 0,
            entries: HashMap::new(),
            render_list: RenderList::new(),
            dirty: false,
            built: None,
            pools,
        };
        if desc.topology == Topology::Quads {
            builder.ensure_index_arena(ctx.device)?;
            builder.indexed = Some(true);
        }
        builder.rebuild_command_buffer(ctx.device)?;
        Ok(builder)
    }

    fn ensure_index_arena(&mut self, device: &dyn GpuDevice) -> Result<()> {
        if self.indices.is_some() {
            return Ok(());
        }
        // u32 indices
        let arena = Arena::new(
            device,
            "marduk-batch multi-draw indices",
            self.index_capacity,
            lcm(4, wgpu::COPY_BUFFER_ALIGNMENT),
            self.index_quantum,
            wgpu::BufferUsages::INDEX,
        )?;
        self.vertex_array = self
            .vertex_array
            .clone()
            .with_index_buffer(arena.buffer, wgpu::IndexFormat::Uint32, false);
        sync_cached(&mut self.built, &self.vertex_array);
        self.indices = Some(arena);
        Ok(())
    }

    #[inline]
    pub fn batch(&self) -> DrawBatchId {
        self.batch
    }

    /// Copies `built` into the arenas and returns the id of the new sub-buffer.
    ///
    /// The sub-buffer is not drawn until it is added to the render list.
    ///
    /// # Panics
    /// If `built` belongs to another batch, has more than one vertex buffer,
    /// carries storage bindings, is instanced, or does not match the builder's
    /// indexed/non-indexed mode.
    pub fn upload_buffer(&mut self, device: &dyn GpuDevice, built: &BuiltBuffer) -> Result<SubBufferId> {
        let indexed = self.check_uploadable(built);

        let mut commands = built.commands().to_vec();
        let index_address = match &built.vertex_array().index {
            Some(binding) => {
                self.ensure_index_arena(device)?;
                let index_size = binding.index_size();
                assert_eq!(
                    binding.format,
                    wgpu::IndexFormat::Uint32,
                    "ArenaMultiDrawBuilder: only u32 indices are supported"
                );

                // Shared quad indices are far larger than one buffer needs.
                let payload = if binding.shared {
                    commands.first().map_or(0, |c| c.element_count() as u64) * index_size
                } else {
                    built.index_bytes()
                };

                let Some(arena) = self.indices.as_mut() else {
                    unreachable!("index arena exists after ensure_index_arena");
                };
                let address = arena.alloc(device, payload)?;
                self.vertex_array.rebind_index(arena.buffer);
                sync_cached(&mut self.built, &self.vertex_array);

                let copy = align_up(payload, wgpu::COPY_BUFFER_ALIGNMENT);
                if copy > 0 {
                    if let Err(err) = device.copy_buffer(binding.buffer, 0, arena.buffer, address, copy) {
                        arena.allocator.free(address);
                        return Err(err);
                    }
                }

                let base = (address / index_size) as u32;
                for cmd in &mut commands {
                    *cmd = cmd.rebiased_indices(base);
                }
                Some(address)
            }
            None => None,
        };

        let vertex_address = match self.upload_vertices(device, built) {
            Ok(address) => address,
            Err(err) => {
                if let (Some(address), Some(arena)) = (index_address, self.indices.as_mut()) {
                    arena.allocator.free(address);
                }
                return Err(err);
            }
        };
        let base = (vertex_address / self.vertex_stride) as u32;
        for cmd in &mut commands {
            *cmd = cmd.rebiased_vertices(base);
        }

        let id = SubBufferId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                allocation: SubAllocation {
                    vertex_address,
                    index_address,
                },
                commands,
            },
        );
        self.indexed = Some(indexed);
        Ok(id)
    }

    fn upload_vertices(&mut self, device: &dyn GpuDevice, built: &BuiltBuffer) -> Result<u64> {
        let source = built.vertex_array().vertex_buffers[0].buffer;
        let payload = built.vertex_bytes();

        let address = self.vertices.alloc(device, payload)?;
        self.vertex_array.rebind_vertex(0, self.vertices.buffer);
        sync_cached(&mut self.built, &self.vertex_array);

        let copy = align_up(payload, wgpu::COPY_BUFFER_ALIGNMENT);
        if copy > 0 {
            if let Err(err) = device.copy_buffer(source, 0, self.vertices.buffer, address, copy) {
                self.vertices.allocator.free(address);
                return Err(err);
            }
        }
        Ok(address)
    }

    /// Returns whether `built` is indexed.
    fn check_uploadable(&self, built: &BuiltBuffer) -> bool {
        assert_eq!(
            built.batch(),
            self.batch,
            "ArenaMultiDrawBuilder: buffer of {:?} uploaded to the builder of {:?}",
            built.batch(),
            self.batch
        );
        assert_eq!(
            built.vertex_array().vertex_buffers.len(),
            1,
            "ArenaMultiDrawBuilder: exactly one vertex buffer is supported"
        );
        assert!(
            !built.shader_data().iter().any(|d| d.kind == ShaderDataKind::Storage),
            "ArenaMultiDrawBuilder: storage buffer bindings are not supported"
        );
        for cmd in built.commands() {
            assert!(
                cmd.instance_count() == 1 && cmd.base_instance() == 0,
                "ArenaMultiDrawBuilder: instanced draws are not supported ({cmd:?})"
            );
        }

        let indexed = built.is_indexed();
        if let Some(mode) = self.indexed {
            assert_eq!(
                mode, indexed,
                "ArenaMultiDrawBuilder: indexed and non-indexed buffers cannot share a builder"
            );
        }
        indexed
    }

    /// Drops a sub-buffer, taking it off the render list first.
    ///
    /// # Panics
    /// If `id` is unknown.
    pub fn remove_buffer(&mut self, id: SubBufferId) {
        assert!(
            self.entries.contains_key(&id),
            "ArenaMultiDrawBuilder::remove_buffer: unknown sub-buffer {id:?}"
        );
        self.remove_from_render_list(id);

        let Some(entry) = self.entries.remove(&id) else { return };
        self.vertices.allocator.free(entry.allocation.vertex_address);
        if let (Some(address), Some(arena)) = (entry.allocation.index_address, self.indices.as_mut()) {
            arena.allocator.free(address);
        }
    }

    /// # Panics
    /// If `id` is unknown.
    pub fn add_to_render_list(&mut self, id: SubBufferId) {
        assert!(
            self.entries.contains_key(&id),
            "ArenaMultiDrawBuilder::add_to_render_list: unknown sub-buffer {id:?}"
        );
        if self.render_list.insert(id) {
            self.dirty = true;
        }
    }

    /// Returns whether `id` was listed.
    pub fn remove_from_render_list(&mut self, id: SubBufferId) -> bool {
        let removed = self.render_list.remove(id);
        self.dirty |= removed;
        removed
    }

    pub fn clear_render_list(&mut self) {
        if !self.render_list.is_empty() {
            self.render_list.clear();
            self.dirty = true;
        }
    }

    #[inline]
    pub fn is_listed(&self, id: SubBufferId) -> bool {
        self.render_list.contains(id)
    }

    #[inline]
    pub fn render_list(&self) -> &RenderList<SubBufferId> {
        &self.render_list
    }

    /// The render list changed since the last command-buffer rebuild.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebiased draw commands of a sub-buffer.
    pub fn commands(&self, id: SubBufferId) -> Option<&[DrawCommand]> {
        self.entries.get(&id).map(|e| e.commands.as_slice())
    }

    pub fn allocation(&self, id: SubBufferId) -> Option<SubAllocation> {
        self.entries.get(&id).map(|e| e.allocation)
    }

    #[inline]
    pub fn vertex_buffer(&self) -> BufferId {
        self.vertices.buffer
    }

    #[inline]
    pub fn vertex_buffer_size(&self) -> u64 {
        self.vertices.size
    }

    pub fn index_buffer(&self) -> Option<BufferId> {
        self.indices.as_ref().map(|a| a.buffer)
    }

    pub fn index_buffer_size(&self) -> Option<u64> {
        self.indices.as_ref().map(|a| a.size)
    }

    #[inline]
    pub fn command_buffer(&self) -> BufferId {
        self.command_buffer
    }

    #[inline]
    pub fn vertex_array(&self) -> &VertexArray {
        &self.vertex_array
    }

    /// The cached package drawn by [`draw`](Self::draw).
    #[inline]
    pub fn built(&self) -> Option<&BuiltBuffer> {
        self.built.as_ref()
    }

    /// Serializes the listed sub-buffers' commands into the indirect buffer.
    pub fn rebuild_command_buffer(&mut self, device: &dyn GpuDevice) -> Result<()> {
        let commands: Vec<DrawCommand> = self
            .render_list
            .iter()
            .filter_map(|id| self.entries.get(&id))
            .flat_map(|e| e.commands.iter().copied())
            .collect();

        let size: usize = commands.iter().map(|c| c.indirect_size()).sum();
        let mut scratch = self.pools.borrow_bytes(size);
        let written = self.write_commands(device, &commands, &mut scratch);
        self.pools.return_bytes(scratch);
        written?;

        log::trace!(
            "ArenaMultiDrawBuilder: {} command(s) from {} sub-buffer(s)",
            commands.len(),
            self.render_list.len()
        );

        let vertex_bytes = self.vertices.allocator.high_water_mark();
        let index_bytes = self
            .indices
            .as_ref()
            .map_or(0, |a| a.allocator.high_water_mark());
        if let Some(stale) = self.built.take() {
            stale.free(device);
        }
        self.built = Some(BuiltBuffer {
            batch: self.batch,
            vertex_array: self.vertex_array.clone(),
            commands,
            shader_data: Vec::new(),
            vertex_bytes,
            index_bytes,
            storage: Storage::Owned(Vec::new()),
        });
        self.dirty = false;
        Ok(())
    }

    fn write_commands(
        &mut self,
        device: &dyn GpuDevice,
        commands: &[DrawCommand],
        scratch: &mut crate::buffer::ByteBuffer,
    ) -> Result<()> {
        for cmd in commands {
            cmd.write_indirect(scratch)?;
        }

        let needed = scratch.len() as u64;
        if needed > self.command_buffer_size {
            let size = align_up(needed, self.command_quantum);
            log::debug!(
                "ArenaMultiDrawBuilder: command buffer {} -> {size} bytes",
                self.command_buffer_size
            );
            let buffer = device.create_buffer(&BufferDesc {
                label: "marduk-batch indirect commands",
                size,
                usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
            })?;
            device.destroy_buffer(self.command_buffer);
            self.command_buffer = buffer;
            self.command_buffer_size = size;
        }
        if needed > 0 {
            device.write_buffer(self.command_buffer, 0, scratch.as_bytes())?;
        }
        Ok(())
    }

    /// Issues one indirect multi-draw over the listed sub-buffers.
    ///
    /// # Panics
    /// If the render list changed since the last rebuild.
    pub fn draw(&self, sink: &mut dyn DrawSink, registry: &BatchRegistry, model: Mat4) {
        assert!(
            !self.dirty,
            "ArenaMultiDrawBuilder::draw: render list changed without rebuild_command_buffer"
        );
        let Some(built) = &self.built else { return };
        if built.commands().is_empty() {
            return;
        }

        let count = built.commands().len() as u32;
        let indexed = self.indexed.unwrap_or(false);
        let commands = self.command_buffer;
        built.render_with(sink, registry, model, |sink, _| {
            sink.multi_draw_indirect(commands, count, indexed);
        });
    }

    /// Drops the cached package. Arenas and device buffers stay.
    pub fn free(&mut self, device: &dyn GpuDevice) {
        if let Some(built) = self.built.take() {
            built.free(device);
        }
    }

    /// Releases the device buffers at the end of the builder's life.
    pub fn destroy(self, device: &dyn GpuDevice) {
        device.destroy_buffer(self.vertices.buffer);
        if let Some(indices) = &self.indices {
            device.destroy_buffer(indices.buffer);
        }
        device.destroy_buffer(self.command_buffer);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::batch::{DrawBatch, DrawBatchDataHolder, HolderBacking, ProgramId, VertexDataLayout};
    use crate::buffer::DataWriter;
    use crate::config::BatchConfig;
    use crate::gpu::{HeadlessDevice, RecordedCall, RecordingSink};

    struct Fixture {
        dev: HeadlessDevice,
        reg: BatchRegistry,
        config: BatchConfig,
        pools: Rc<FramePools>,
    }

    impl Fixture {
        fn new() -> Self {
            let config = BatchConfig {
                arena_capacity: 1024,
                vertex_growth_quantum: 256,
                index_growth_quantum: 256,
                command_growth_quantum: 64,
                ..BatchConfig::default()
            };
            Self {
                dev: HeadlessDevice::new(),
                reg: BatchRegistry::new(),
                pools: Rc::new(FramePools::new(&config)),
                config,
            }
        }

        fn register(&mut self, topology: Topology) -> DrawBatchId {
            // 16-byte vertices
            self.reg.register(DrawBatch::new(
                "arena",
                ProgramId(self.reg.len() as u32),
                topology,
                VertexDataLayout::new([("p", wgpu::VertexFormat::Float32x4)]),
            ))
        }

        fn ctx(&self) -> RenderCtx<'_> {
            RenderCtx::new(&self.dev, &self.reg, &self.config)
        }

        fn builder(&self, batch: DrawBatchId) -> ArenaMultiDrawBuilder {
            ArenaMultiDrawBuilder::new(&self.ctx(), self.pools.clone(), batch).unwrap()
        }

        fn holder(&self, batch: DrawBatchId) -> DrawBatchDataHolder {
            DrawBatchDataHolder::new(&self.reg, batch, HolderBacking::Fresh { growth_alignment: 16 })
        }

        fn built(&self, batch: DrawBatchId, vertices: u32) -> BuiltBuffer {
            let mut holder = self.holder(batch);
            for i in 0..vertices {
                holder.vertices().write_vec4(Vec4::splat(i as f32)).unwrap();
            }
            holder.prepare().upload(&self.dev, &self.reg).unwrap()
        }

        fn indexed(&self, batch: DrawBatchId, vertices: u32, indices: &[u32]) -> BuiltBuffer {
            let mut holder = self.holder(batch);
            for i in 0..vertices {
                holder.vertices().write_vec4(Vec4::splat(i as f32)).unwrap();
            }
            for &i in indices {
                holder.indices().write_u32(i).unwrap();
            }
            holder.prepare().upload(&self.dev, &self.reg).unwrap()
        }
    }

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    fn source_bytes(dev: &HeadlessDevice, built: &BuiltBuffer) -> Vec<u8> {
        dev.read(built.vertex_array().vertex_buffers[0].buffer, 0, built.vertex_bytes())
    }

    // ── allocation ──

    #[test]
    fn freed_range_is_reused_and_commands_rebased() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let a = fx.built(batch, 4);
        let b = fx.built(batch, 4);
        let c = fx.built(batch, 2);

        let id_a = builder.upload_buffer(&fx.dev, &a).unwrap();
        let id_b = builder.upload_buffer(&fx.dev, &b).unwrap();
        assert_eq!(builder.allocation(id_a).unwrap().vertex_address, 0);
        assert_eq!(builder.allocation(id_b).unwrap().vertex_address, 64);
        assert_eq!(builder.commands(id_b).unwrap(), &[DrawCommand::arrays(4, 4)]);

        builder.remove_buffer(id_a);
        let id_c = builder.upload_buffer(&fx.dev, &c).unwrap();
        assert_eq!(builder.allocation(id_c).unwrap().vertex_address, 0);
        assert_eq!(builder.commands(id_c).unwrap(), &[DrawCommand::arrays(2, 0)]);
        assert_eq!(builder.vertex_buffer_size(), 256);
        assert_eq!(builder.len(), 2);

        assert_eq!(fx.dev.read(builder.vertex_buffer(), 64, 64), source_bytes(&fx.dev, &b));

        for built in [a, b, c] {
            built.free(&fx.dev);
        }
        builder.destroy(&fx.dev);
        assert_eq!(fx.dev.live_buffers(), 0);
    }

    #[test]
    fn growth_happens_once_and_preserves_bytes() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let small = fx.built(batch, 4);
        let large = fx.built(batch, 20);
        builder.upload_buffer(&fx.dev, &small).unwrap();
        let before = fx.dev.read(builder.vertex_buffer(), 0, 64);
        let created = fx.dev.stats().created;

        // 64 + 320 bytes ends past the initial 256-byte quantum.
        let id = builder.upload_buffer(&fx.dev, &large).unwrap();
        assert_eq!(builder.allocation(id).unwrap().vertex_address, 64);
        assert_eq!(builder.vertex_buffer_size(), 512);
        assert_eq!(fx.dev.stats().created, created + 1);
        assert_eq!(fx.dev.read(builder.vertex_buffer(), 0, 64), before);
        assert_eq!(
            fx.dev.read(builder.vertex_buffer(), 64, 320),
            source_bytes(&fx.dev, &large)
        );

        small.free(&fx.dev);
        large.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    #[test]
    fn exhausted_arena_reports_out_of_memory() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let too_big = fx.built(batch, 70);
        let err = builder.upload_buffer(&fx.dev, &too_big).unwrap_err();
        assert!(matches!(err, BatchError::OutOfMemory { limit: 1024, .. }), "{err:?}");
        assert!(builder.is_empty());

        too_big.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    #[test]
    fn quads_get_private_index_ranges() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Quads);
        let mut builder = fx.builder(batch);
        assert!(builder.index_buffer().is_some());

        let a = fx.built(batch, 8);
        let b = fx.built(batch, 8);
        builder.upload_buffer(&fx.dev, &a).unwrap();
        let id = builder.upload_buffer(&fx.dev, &b).unwrap();

        assert_eq!(
            builder.allocation(id).unwrap(),
            SubAllocation {
                vertex_address: 128,
                index_address: Some(48),
            }
        );
        assert_eq!(builder.commands(id).unwrap(), &[DrawCommand::elements(12, 12, 8)]);
        assert_eq!(
            words(&fx.dev.read(builder.index_buffer().unwrap(), 48, 24)),
            vec![0, 1, 2, 0, 2, 3]
        );

        a.free(&fx.dev);
        b.free(&fx.dev);
        builder.destroy(&fx.dev);
        fx.reg.free_all(&fx.dev);
        assert_eq!(fx.dev.live_buffers(), 0);
    }

    #[test]
    fn explicit_indices_are_copied_rebased_and_grown() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);
        assert!(builder.index_buffer().is_none());

        let a = fx.indexed(batch, 3, &[0, 1, 2]);
        let b_indices: Vec<u32> = (0..66).map(|i| i % 3).collect();
        let b = fx.indexed(batch, 3, &b_indices);

        let id_a = builder.upload_buffer(&fx.dev, &a).unwrap();
        assert_eq!(builder.index_buffer_size(), Some(256));
        // 12 + 264 bytes ends past the index quantum.
        let id_b = builder.upload_buffer(&fx.dev, &b).unwrap();

        assert_eq!(builder.allocation(id_a).unwrap().index_address, Some(0));
        assert_eq!(
            builder.allocation(id_b).unwrap(),
            SubAllocation {
                vertex_address: 48,
                index_address: Some(12),
            }
        );
        assert_eq!(builder.commands(id_b).unwrap(), &[DrawCommand::elements(66, 3, 3)]);
        assert_eq!(builder.index_buffer_size(), Some(512));

        let index = builder.index_buffer().unwrap();
        assert_eq!(words(&fx.dev.read(index, 0, 12)), vec![0, 1, 2]);
        assert_eq!(words(&fx.dev.read(index, 12, 264)), b_indices);

        a.free(&fx.dev);
        b.free(&fx.dev);
        builder.destroy(&fx.dev);
        assert_eq!(fx.dev.live_buffers(), 0);
    }

    #[test]
    fn failed_first_upload_does_not_fix_the_index_mode() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        // 1200 bytes of indices exceed the 1 KiB arena.
        let indices: Vec<u32> = (0..300).map(|i| i % 3).collect();
        let too_big = fx.indexed(batch, 3, &indices);
        let err = builder.upload_buffer(&fx.dev, &too_big).unwrap_err();
        assert!(matches!(err, BatchError::OutOfMemory { .. }), "{err:?}");

        let plain = fx.built(batch, 3);
        let id = builder.upload_buffer(&fx.dev, &plain).unwrap();
        builder.add_to_render_list(id);
        builder.rebuild_command_buffer(&fx.dev).unwrap();

        let mut sink = RecordingSink::new();
        builder.draw(&mut sink, &fx.reg, Mat4::IDENTITY);
        assert!(sink.calls.contains(&RecordedCall::MultiDrawIndirect {
            commands: builder.command_buffer(),
            count: 1,
            indexed: false,
        }));

        too_big.free(&fx.dev);
        plain.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    #[test]
    fn growth_after_rebuild_rebinds_the_cached_package() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let small = fx.built(batch, 3);
        let id = builder.upload_buffer(&fx.dev, &small).unwrap();
        builder.add_to_render_list(id);
        builder.rebuild_command_buffer(&fx.dev).unwrap();

        // Unlisted, but 48 + 320 bytes grows the vertex arena.
        let large = fx.built(batch, 20);
        builder.upload_buffer(&fx.dev, &large).unwrap();
        assert!(!builder.is_dirty());

        let mut sink = RecordingSink::new();
        builder.draw(&mut sink, &fx.reg, Mat4::IDENTITY);
        let bound: Vec<_> = sink
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::BindVertexArray(va) => Some(va.vertex_buffers[0].buffer),
                _ => None,
            })
            .collect();
        assert_eq!(bound, vec![builder.vertex_buffer()]);
        assert!(fx.dev.contains(bound[0]));

        small.free(&fx.dev);
        large.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    // ── render list ──

    #[test]
    fn rebuild_serializes_listed_commands_in_order() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let a = fx.built(batch, 4);
        let b = fx.built(batch, 3);
        let id_a = builder.upload_buffer(&fx.dev, &a).unwrap();
        let id_b = builder.upload_buffer(&fx.dev, &b).unwrap();

        builder.add_to_render_list(id_b);
        builder.add_to_render_list(id_a);
        assert!(builder.is_dirty());
        builder.rebuild_command_buffer(&fx.dev).unwrap();
        assert!(!builder.is_dirty());

        assert_eq!(
            words(&fx.dev.read(builder.command_buffer(), 0, 32)),
            vec![3, 1, 4, 0, 4, 1, 0, 0]
        );

        let mut sink = RecordingSink::new();
        builder.draw(&mut sink, &fx.reg, Mat4::IDENTITY);
        assert!(sink.calls.contains(&RecordedCall::MultiDrawIndirect {
            commands: builder.command_buffer(),
            count: 2,
            indexed: false,
        }));

        a.free(&fx.dev);
        b.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    #[test]
    fn command_buffer_grows_past_its_quantum() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let parts: Vec<_> = (0..5).map(|_| fx.built(batch, 3)).collect();
        for part in &parts {
            let id = builder.upload_buffer(&fx.dev, part).unwrap();
            builder.add_to_render_list(id);
        }
        // 5 * 16 bytes > 64
        builder.rebuild_command_buffer(&fx.dev).unwrap();
        assert_eq!(fx.dev.buffer_size(builder.command_buffer()), Some(128));
        assert_eq!(builder.built().unwrap().commands().len(), 5);

        for part in parts {
            part.free(&fx.dev);
        }
        builder.destroy(&fx.dev);
        assert_eq!(fx.dev.live_buffers(), 0);
    }

    #[test]
    fn removing_a_listed_buffer_delists_it() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let a = fx.built(batch, 3);
        let id = builder.upload_buffer(&fx.dev, &a).unwrap();
        builder.add_to_render_list(id);
        builder.rebuild_command_buffer(&fx.dev).unwrap();

        builder.remove_buffer(id);
        assert!(!builder.is_listed(id));
        assert!(builder.is_dirty());
        builder.rebuild_command_buffer(&fx.dev).unwrap();

        let mut sink = RecordingSink::new();
        builder.draw(&mut sink, &fx.reg, Mat4::IDENTITY);
        assert!(sink.calls.is_empty());

        a.free(&fx.dev);
        builder.destroy(&fx.dev);
    }

    #[test]
    #[should_panic(expected = "without rebuild_command_buffer")]
    fn drawing_a_dirty_builder_panics() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);
        let a = fx.built(batch, 3);
        let id = builder.upload_buffer(&fx.dev, &a).unwrap();
        builder.add_to_render_list(id);
        builder.draw(&mut RecordingSink::new(), &fx.reg, Mat4::IDENTITY);
    }

    // ── rejected input ──

    #[test]
    #[should_panic(expected = "uploaded to the builder of")]
    fn foreign_batch_is_rejected() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let other = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);
        let foreign = fx.built(other, 3);
        let _ = builder.upload_buffer(&fx.dev, &foreign);
    }

    #[test]
    #[should_panic(expected = "storage buffer bindings")]
    fn storage_bindings_are_rejected() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let mut holder = fx.holder(batch);
        holder.vertices().write_vec4(Vec4::ONE).unwrap();
        holder.storage("lights").write_f32(1.0).unwrap();
        let built = holder.prepare().upload(&fx.dev, &fx.reg).unwrap();
        let _ = builder.upload_buffer(&fx.dev, &built);
    }

    #[test]
    #[should_panic(expected = "instanced draws")]
    fn instanced_command_is_rejected() {
        let mut fx = Fixture::new();
        let batch = fx.register(Topology::Triangles);
        let mut builder = fx.builder(batch);

        let mut built = fx.built(batch, 3);
        built.commands = vec![DrawCommand::arrays(3, 0).with_instances(2)];
        let _ = builder.upload_buffer(&fx.dev, &built);
    }

    #[test]
    #[should_panic(expected = "exactly one vertex buffer")]
    fn instance_stream_is_rejected() {
        let mut fx = Fixture::new();
        let batch = fx.reg.register(
            DrawBatch::new(
                "instanced",
                ProgramId(0),
                Topology::Triangles,
                VertexDataLayout::new([("p", wgpu::VertexFormat::Float32x4)]),
            )
            .with_instance_layout(VertexDataLayout::new([("o", wgpu::VertexFormat::Float32x4)])),
        );
        let mut builder = fx.builder(batch);

        let mut holder = fx.holder(batch);
        holder.vertices().write_vec4(Vec4::ONE).unwrap();
        holder.instances().write_vec4(Vec4::ONE).unwrap();
        holder.instances().write_vec4(Vec4::ZERO).unwrap();
        let built = holder.prepare().upload(&fx.dev, &fx.reg).unwrap();
        let _ = builder.upload_buffer(&fx.dev, &built);
    }
}
