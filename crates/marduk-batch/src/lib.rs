//! Marduk batch crate.
//!
//! CPU-side buffering of draw data per draw batch, upload into device
//! buffers, and arena-backed multi-draw rendering on top of `wgpu`.

pub mod arena;
pub mod batch;
pub mod buffer;
pub mod gpu;
pub mod multi;
pub mod multidraw;
pub mod pool;
pub mod thread;

pub mod config;
pub mod error;
pub mod logging;
pub mod paint;
pub mod render;

pub use config::BatchConfig;
pub use error::{BatchError, Result};
