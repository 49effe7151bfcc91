//! CPU-side staging bytes and the typed writers layered on them.
//!
//! - [`ByteBuffer`]: growable, position-tracked read/write cursor
//! - [`DataWriter`]: scalar/vector/matrix/color writes; `ByteBuffer` itself is
//!   the tightly packed variant used for vertex, index and command data
//! - [`StdWriter`]: aligns every write to std140/std430 rules for shader-visible
//!   uniform and storage blocks

mod bytes;
mod std_layout;
mod writer;

pub use bytes::ByteBuffer;
pub use std_layout::{LayoutStandard, StdWriter};
pub use writer::{DataWriter, ValueKind};
