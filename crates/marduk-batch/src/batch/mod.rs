//! Draw batch identity and the per-batch data path.
//!
//! Data flows holder → [`PreparedBuffer`] (CPU snapshot) → [`BuiltBuffer`]
//! (device buffers + draw commands), which is either drawn directly or handed
//! to a multi-draw builder.

pub(crate) mod built;
mod command;
mod draw_batch;
mod holder;
mod layout;
mod prepared;
mod quad_indices;
mod registry;

pub use built::{BuiltBuffer, ShaderDataBinding};
pub use command::DrawCommand;
pub use draw_batch::{BatchHook, DrawBatch, DrawBatchId, ProgramId, Topology};
pub use holder::{DrawBatchDataHolder, HolderBacking};
pub use layout::{VertexAttribute, VertexDataLayout};
pub use prepared::PreparedBuffer;
pub use quad_indices::quad_indices;
pub use registry::BatchRegistry;
