//! Borrow/return pools for per-frame scratch resources.
//!
//! Pools are driven by the frame-end hook ([`FramePools::frame_finished`]):
//! leases still outstanding at that point are reclaimed with a warning, and
//! entries idle past the configured window are evicted.

mod frame_pools;
mod resource_pool;

pub use frame_pools::{FramePools, GpuBuffer};
pub use resource_pool::{PoolStats, Poolable, Pooled, ResourcePool};
