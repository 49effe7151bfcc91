//! Arena-backed multi-draw: many independently uploaded sub-buffers per
//! batch, drawn with one indirect call per batch.

mod builder;
mod render_list;
mod renderer;

pub use builder::{ArenaMultiDrawBuilder, SubAllocation, SubBufferId};
pub use render_list::RenderList;
pub use renderer::{CompositeId, MultiDrawRenderer};
