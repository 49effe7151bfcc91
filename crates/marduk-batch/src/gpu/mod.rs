//! GPU seam: buffer management and draw submission.
//!
//! Everything above this module talks to a [`GpuDevice`] and a [`DrawSink`];
//! [`WgpuDevice`] / [`WgpuPassSink`] drive a real device, [`HeadlessDevice`] /
//! [`RecordingSink`] keep everything on the CPU for tests and tools.

mod device;
mod headless;
mod vertex_array;
mod wgpu_device;

pub use device::{grow_buffer, BufferDesc, BufferId, DrawSink, GpuDevice, ShaderDataKind};
pub use headless::{DeviceStats, HeadlessDevice, RecordedCall, RecordingSink};
pub use vertex_array::{IndexBinding, VertexArray, VertexBufferBinding};
pub use wgpu_device::{ProgramBinder, WgpuDevice, WgpuPassSink};
