use std::cell::RefCell;
use std::convert::Infallible;
use std::time::Instant;

use crate::buffer::ByteBuffer;
use crate::config::BatchConfig;
use crate::error::Result;
use crate::gpu::{BufferDesc, BufferId, GpuDevice};
use crate::pool::{PoolStats, Poolable, Pooled, ResourcePool};

/// A device buffer tracked by the GPU buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub id: BufferId,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

impl Poolable for GpuBuffer {
    type Token = GpuBuffer;

    fn token(&self) -> GpuBuffer {
        *self
    }

    fn reclaim(token: GpuBuffer) -> Self {
        token
    }
}

/// The per-frame pools of the render thread: scratch byte buffers and
/// temporary device buffers.
///
/// Shared by reference (`Rc<FramePools>`) between holders and builders;
/// [`frame_finished`](Self::frame_finished) must be registered as the
/// frame-end hook.
pub struct FramePools {
    bytes: RefCell<ResourcePool<ByteBuffer>>,
    gpu: RefCell<ResourcePool<GpuBuffer>>,
    growth_alignment: usize,
}

impl FramePools {
    pub fn new(config: &BatchConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    pub fn starting_at(config: &BatchConfig, now: Instant) -> Self {
        Self {
            bytes: RefCell::new(ResourcePool::starting_at(
                "byte buffer pool",
                config.pool_idle_timeout,
                now,
            )),
            gpu: RefCell::new(ResourcePool::starting_at(
                "gpu buffer pool",
                config.pool_idle_timeout,
                now,
            )),
            growth_alignment: config.byte_buffer_growth_alignment,
        }
    }

    /// Scratch byte buffer with at least `min_capacity` bytes reserved.
    pub fn borrow_bytes(&self, min_capacity: usize) -> Pooled<ByteBuffer> {
        let growth_alignment = self.growth_alignment;
        let result = self.bytes.borrow_mut().borrow(
            |b| b.capacity() >= min_capacity,
            || Ok::<_, Infallible>(ByteBuffer::with_capacity(min_capacity, growth_alignment)),
        );
        match result {
            Ok(buf) => buf,
            Err(never) => match never {},
        }
    }

    pub fn return_bytes(&self, buf: Pooled<ByteBuffer>) {
        self.bytes.borrow_mut().give_back(buf);
    }

    /// Device buffer of at least `size` bytes supporting `usage`.
    pub fn borrow_gpu_buffer(
        &self,
        device: &dyn GpuDevice,
        size: u64,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Result<Pooled<GpuBuffer>> {
        let usage = usage | wgpu::BufferUsages::COPY_DST;
        self.gpu.borrow_mut().borrow(
            |b| b.size >= size && b.usage.contains(usage),
            || {
                let desc = BufferDesc { label, size, usage };
                let id = device.create_buffer(&desc)?;
                let size = device.buffer_size(id).unwrap_or(size);
                Ok(GpuBuffer { id, size, usage })
            },
        )
    }

    pub fn return_gpu_buffer(&self, buf: Pooled<GpuBuffer>) {
        self.gpu.borrow_mut().give_back(buf);
    }

    /// Frame-end hook. Evicted device buffers are destroyed.
    pub fn frame_finished(&self, device: &dyn GpuDevice, now: Instant) {
        drop(self.bytes.borrow_mut().frame_finished(now));
        for buf in self.gpu.borrow_mut().frame_finished(now) {
            device.destroy_buffer(buf.id);
        }
    }

    /// Destroys every idle device buffer. Outstanding leases are unaffected.
    pub fn release_all(&self, device: &dyn GpuDevice) {
        self.bytes.borrow_mut().drain_free();
        for buf in self.gpu.borrow_mut().drain_free() {
            device.destroy_buffer(buf.id);
        }
    }

    pub fn byte_stats(&self) -> PoolStats {
        self.bytes.borrow().stats()
    }

    pub fn gpu_stats(&self) -> PoolStats {
        self.gpu.borrow().stats()
    }

    pub fn idle_gpu_buffers(&self) -> usize {
        self.gpu.borrow().free_len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn gpu_buffers_are_reused_by_size_and_usage() {
        let dev = HeadlessDevice::new();
        let pools = FramePools::new(&BatchConfig::default());

        let a = pools
            .borrow_gpu_buffer(&dev, 100, wgpu::BufferUsages::VERTEX, "a")
            .unwrap();
        let id = a.id;
        pools.return_gpu_buffer(a);

        let b = pools
            .borrow_gpu_buffer(&dev, 64, wgpu::BufferUsages::VERTEX, "b")
            .unwrap();
        assert_eq!(b.id, id);
        pools.return_gpu_buffer(b);

        let c = pools
            .borrow_gpu_buffer(&dev, 64, wgpu::BufferUsages::INDEX, "c")
            .unwrap();
        assert_ne!(c.id, id);
        pools.return_gpu_buffer(c);
        assert_eq!(dev.stats().created, 2);
    }

    #[test]
    fn leaked_gpu_buffer_returns_to_free_list() {
        let dev = HeadlessDevice::new();
        let t0 = Instant::now();
        let pools = FramePools::starting_at(&BatchConfig::default(), t0);

        let leaked = pools
            .borrow_gpu_buffer(&dev, 16, wgpu::BufferUsages::STORAGE, "leak")
            .unwrap();
        pools.frame_finished(&dev, t0 + Duration::from_millis(16));

        assert_eq!(pools.gpu_stats().leaks_reclaimed, 1);
        assert_eq!(pools.idle_gpu_buffers(), 1);
        assert!(dev.contains(leaked.id));
    }

    #[test]
    fn evicted_gpu_buffers_are_destroyed() {
        let dev = HeadlessDevice::new();
        let t0 = Instant::now();
        let pools = FramePools::starting_at(&BatchConfig::default(), t0);

        let a = pools
            .borrow_gpu_buffer(&dev, 16, wgpu::BufferUsages::VERTEX, "a")
            .unwrap();
        pools.return_gpu_buffer(a);
        pools.frame_finished(&dev, t0 + Duration::from_secs(120));

        assert_eq!(pools.idle_gpu_buffers(), 0);
        assert_eq!(dev.live_buffers(), 0);
    }
}
