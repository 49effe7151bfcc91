use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use anyhow::Context;
use glam::Mat4;

use crate::batch::{DrawCommand, ProgramId, Topology};
use crate::config::align_up;
use crate::error::Result;
use crate::gpu::{BufferDesc, BufferId, DrawSink, GpuDevice, ShaderDataKind, VertexArray};

/// [`GpuDevice`] over a wgpu device/queue pair.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: RefCell<HashMap<BufferId, wgpu::Buffer>>,
    next_id: Cell<u64>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            buffers: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Creates a device without a surface, for offscreen work and tools.
    pub fn new_headless() -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .context("failed to find a suitable GPU adapter")?;

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("marduk-batch device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .context("failed to create wgpu device/queue")?;

            Ok(Self::new(device, queue))
        })
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The wgpu buffer behind `id`, if it is alive.
    pub fn buffer(&self, id: BufferId) -> Option<wgpu::Buffer> {
        self.buffers.borrow().get(&id).cloned()
    }

    fn get(&self, id: BufferId) -> Result<wgpu::Buffer> {
        self.buffer(id)
            .ok_or_else(|| crate::error::BatchError::Device(format!("unknown buffer {id:?}")))
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: align_up(desc.size, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: desc.usage,
            mapped_at_creation: false,
        });

        let id = BufferId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.buffers.borrow_mut().insert(id, buffer);
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        match self.buffers.borrow_mut().remove(&id) {
            Some(buffer) => buffer.destroy(),
            None => log::warn!("WgpuDevice: destroy of unknown buffer {id:?}"),
        }
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.get(id)?;
        let padded_len = align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
        if padded_len == data.len() {
            self.queue.write_buffer(&buffer, offset, data);
        } else {
            let mut padded = Vec::with_capacity(padded_len);
            padded.extend_from_slice(data);
            padded.resize(padded_len, 0);
            self.queue.write_buffer(&buffer, offset, &padded);
        }
        Ok(())
    }

    fn copy_buffer(
        &self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let src = self.get(src)?;
        let dst = self.get(dst)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("marduk-batch buffer copy"),
            });
        encoder.copy_buffer_to_buffer(&src, src_offset, &dst, dst_offset, size);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.buffers.borrow().get(&id).map(|b| b.size())
    }
}

/// Shader-layer half of a [`WgpuPassSink`]: pipelines and bind groups.
pub trait ProgramBinder {
    fn bind_program(&mut self, pass: &mut wgpu::RenderPass<'_>, program: ProgramId, topology: Topology);

    fn set_model_matrix(&mut self, pass: &mut wgpu::RenderPass<'_>, model: Mat4);

    fn bind_shader_data(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        name: &str,
        kind: ShaderDataKind,
        buffer: &wgpu::Buffer,
    );

    fn bind_storage_buffer(&mut self, pass: &mut wgpu::RenderPass<'_>, binding: u32, buffer: &wgpu::Buffer);

    fn unbind_storage_buffer(&mut self, pass: &mut wgpu::RenderPass<'_>, binding: u32);
}

/// [`DrawSink`] recording into a wgpu render pass.
///
/// Buffers are resolved through the [`WgpuDevice`]; ids that are no longer
/// alive are skipped with an error log.
pub struct WgpuPassSink<'a, 'pass> {
    device: &'a WgpuDevice,
    pass: &'a mut wgpu::RenderPass<'pass>,
    binder: &'a mut dyn ProgramBinder,
}

impl<'a, 'pass> WgpuPassSink<'a, 'pass> {
    pub fn new(
        device: &'a WgpuDevice,
        pass: &'a mut wgpu::RenderPass<'pass>,
        binder: &'a mut dyn ProgramBinder,
    ) -> Self {
        Self { device, pass, binder }
    }

    fn resolve(&self, id: BufferId) -> Option<wgpu::Buffer> {
        let buffer = self.device.buffer(id);
        if buffer.is_none() {
            log::error!("WgpuPassSink: buffer {id:?} is not alive; call skipped");
        }
        buffer
    }
}

impl DrawSink for WgpuPassSink<'_, '_> {
    fn bind_program(&mut self, program: ProgramId, topology: Topology) {
        self.binder.bind_program(&mut *self.pass, program, topology);
    }

    fn set_model_matrix(&mut self, model: Mat4) {
        self.binder.set_model_matrix(&mut *self.pass, model);
    }

    fn bind_vertex_array(&mut self, vertex_array: &VertexArray) {
        for (slot, binding) in (0u32..).zip(&vertex_array.vertex_buffers) {
            let Some(buffer) = self.resolve(binding.buffer) else { continue };
            self.pass.set_vertex_buffer(slot, buffer.slice(..));
        }
        if let Some(index) = &vertex_array.index {
            let Some(buffer) = self.resolve(index.buffer) else { return };
            self.pass.set_index_buffer(buffer.slice(..), index.format);
        }
    }

    fn bind_shader_data(&mut self, name: &str, kind: ShaderDataKind, buffer: BufferId) {
        let Some(buffer) = self.resolve(buffer) else { return };
        self.binder.bind_shader_data(&mut *self.pass, name, kind, &buffer);
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: BufferId) {
        let Some(buffer) = self.resolve(buffer) else { return };
        self.binder.bind_storage_buffer(&mut *self.pass, binding, &buffer);
    }

    fn unbind_storage_buffer(&mut self, binding: u32) {
        self.binder.unbind_storage_buffer(&mut *self.pass, binding);
    }

    fn draw(&mut self, command: &DrawCommand) {
        match *command {
            DrawCommand::Arrays { vertex_count, first_vertex, instance_count, base_instance } => {
                self.pass.draw(
                    first_vertex..first_vertex + vertex_count,
                    base_instance..base_instance + instance_count,
                );
            }
            DrawCommand::Elements { index_count, first_index, base_vertex, instance_count, base_instance } => {
                self.pass.draw_indexed(
                    first_index..first_index + index_count,
                    base_vertex,
                    base_instance..base_instance + instance_count,
                );
            }
        }
    }

    fn multi_draw_indirect(&mut self, commands: BufferId, count: u32, indexed: bool) {
        let Some(buffer) = self.resolve(commands) else { return };
        if indexed {
            self.pass.multi_draw_indexed_indirect(&buffer, 0, count);
        } else {
            self.pass.multi_draw_indirect(&buffer, 0, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_roundtrip_on_real_device() {
        let dev = match WgpuDevice::new_headless() {
            Ok(dev) => dev,
            Err(err) => {
                eprintln!("skipping: {err:#}");
                return;
            }
        };

        let id = dev
            .create_buffer(&BufferDesc {
                label: "probe",
                size: 6,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            })
            .unwrap();
        assert_eq!(dev.buffer_size(id), Some(8));
        dev.write_buffer(id, 0, &[1, 2, 3]).unwrap();
        dev.destroy_buffer(id);
        assert!(dev.buffer(id).is_none());
    }
}
