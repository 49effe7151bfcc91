use crate::error::Result;
use crate::gpu::{BufferDesc, BufferId, GpuDevice};

/// Indices drawing `quads` quads as triangle pairs: `0,1,2, 0,2,3` per quad.
pub fn quad_indices(quads: u32) -> Vec<u32> {
    (0..quads)
        .flat_map(|q| {
            let v = q * 4;
            [v, v + 1, v + 2, v, v + 2, v + 3]
        })
        .collect()
}

/// Shared index buffer for [`Topology::Quads`](crate::batch::Topology::Quads).
///
/// Grows on demand in powers of two. Superseded buffers stay alive (built
/// buffers may still reference them) until [`release`](Self::release).
#[derive(Debug, Default)]
pub(crate) struct QuadIndexBuffer {
    current: Option<BufferId>,
    quads: u32,
    retired: Vec<BufferId>,
}

impl QuadIndexBuffer {
    const MIN_QUADS: u32 = 256;

    /// A buffer holding indices for at least `quads` quads.
    pub(crate) fn ensure(&mut self, device: &dyn GpuDevice, quads: u32) -> Result<BufferId> {
        if let Some(id) = self.current {
            if quads <= self.quads {
                return Ok(id);
            }
        }

        let capacity = quads.max(Self::MIN_QUADS).next_power_of_two();
        log::debug!("QuadIndexBuffer: {} -> {} quads", self.quads, capacity);

        let data = quad_indices(capacity);
        let id = device.create_buffer_with_data(
            &BufferDesc {
                label: "marduk-batch quad indices",
                size: 0,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_SRC,
            },
            bytemuck::cast_slice(&data),
        )?;

        if let Some(old) = self.current.replace(id) {
            self.retired.push(old);
        }
        self.quads = capacity;
        Ok(id)
    }

    pub(crate) fn release(&mut self, device: &dyn GpuDevice) {
        for id in self.retired.drain(..).chain(self.current.take()) {
            device.destroy_buffer(id);
        }
        self.quads = 0;
    }
}
