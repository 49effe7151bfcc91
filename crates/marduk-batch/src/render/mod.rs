//! Context shared by everything that uploads or draws batch data.

mod ctx;

pub use ctx::RenderCtx;
