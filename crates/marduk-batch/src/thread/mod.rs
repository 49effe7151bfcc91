//! Render-thread affinity: job posting and the one blocking cross-thread wait.

mod render_thread;

pub use render_thread::{block_on_render_thread, RenderJob, RenderThreadHost, RenderThreadQueue};
