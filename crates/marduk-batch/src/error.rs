use std::time::Duration;

use thiserror::Error;

/// Failure of a byte-buffer cursor operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum BufferError {
    /// A read would move the read cursor past the write cursor.
    #[error("insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },

    /// A write does not fit into a fixed-size (non-resizable) buffer.
    #[error("buffer overflow: {needed} bytes needed, fixed capacity is {capacity}")]
    Overflow { needed: usize, capacity: usize },
}

/// Allocation failure inside an [`ArenaAllocator`](crate::arena::ArenaAllocator).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum ArenaError {
    #[error("arena has no space for {requested} bytes (capacity {capacity})")]
    NoSpace { requested: u64, capacity: u64 },
}

/// Crate-level error for recoverable failures.
///
/// Caller bugs (wrong batch, unknown ids, layout mismatches, ...) are not
/// represented here; they panic at the call site.
#[derive(Debug, Error)]
pub enum BatchError {
    /// An arena or GPU buffer would exceed its configured capacity.
    #[error("out of memory in {what}: {requested} bytes requested, limit {limit}")]
    OutOfMemory {
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// The device rejected a resource operation.
    #[error("device error: {0}")]
    Device(String),

    /// A job posted to the render thread did not complete within the configured bound.
    #[error("render thread did not complete the job within {0:?}")]
    RenderThreadStalled(Duration),

    /// The render thread dropped the job queue before running the job.
    #[error("render thread is gone")]
    RenderThreadGone,
}

impl BatchError {
    /// Maps an arena failure onto the out-of-memory condition of `what`.
    pub(crate) fn out_of_arena(what: &'static str, err: ArenaError) -> Self {
        match err {
            ArenaError::NoSpace { requested, capacity } => BatchError::OutOfMemory {
                what,
                requested,
                limit: capacity,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
