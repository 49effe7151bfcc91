//! Many batches' data holders for one draw call tree.
//!
//! - [`ImmediateMultiBatchDataHolder`]: fill, draw, discard, every frame
//! - [`PersistentMultiBatchDataHolder`]: fill once, build durable buffers,
//!   redraw cheaply
//!
//! Both draw in [`BatchOrder`]: first-ordered batches, then the rest in
//! discovery order, then last-ordered batches.

mod holders;
mod immediate;
mod order;
mod persistent;

pub use holders::BatchHolders;
pub use immediate::ImmediateMultiBatchDataHolder;
pub use order::BatchOrder;
pub use persistent::PersistentMultiBatchDataHolder;
