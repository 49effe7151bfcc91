use crate::batch::BatchRegistry;
use crate::config::BatchConfig;
use crate::gpu::GpuDevice;

/// Renderer-facing context (device + batch registry + tuning).
///
/// Cheap to copy; build one per frame or per draw pass.
#[derive(Clone, Copy)]
pub struct RenderCtx<'a> {
    pub device: &'a dyn GpuDevice,
    pub registry: &'a BatchRegistry,
    pub config: &'a BatchConfig,
}

impl<'a> RenderCtx<'a> {
    #[inline]
    pub fn new(device: &'a dyn GpuDevice, registry: &'a BatchRegistry, config: &'a BatchConfig) -> Self {
        Self {
            device,
            registry,
            config,
        }
    }
}
