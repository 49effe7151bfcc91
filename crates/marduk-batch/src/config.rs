use std::time::Duration;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Tuning values for builders, pools, and holders.
///
/// These are per-builder constants, not protocol. Keep defaults conservative;
/// callers with very large scenes raise `arena_capacity`.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Virtual capacity of every arena, independent of committed GPU memory.
    pub arena_capacity: u64,

    /// Backing vertex buffers grow to `align(needed_end, vertex_growth_quantum)`.
    pub vertex_growth_quantum: u64,

    /// Backing index buffers grow to `align(needed_end, index_growth_quantum)`.
    pub index_growth_quantum: u64,

    /// Indirect command buffers grow in multiples of this quantum.
    pub command_growth_quantum: u64,

    /// Byte buffers grow to `max(needed, 2 * current)` rounded up to this alignment.
    pub byte_buffer_growth_alignment: usize,

    /// Pooled resources unused for this long are evicted at frame end.
    pub pool_idle_timeout: Duration,

    /// Upper bound on a blocking wait for the render thread.
    ///
    /// `None` waits indefinitely.
    pub render_thread_wait: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            arena_capacity: GIB,
            vertex_growth_quantum: 10 * MIB,
            index_growth_quantum: 10 * MIB,
            command_growth_quantum: 64 * KIB,
            byte_buffer_growth_alignment: 256,
            pool_idle_timeout: Duration::from_secs(60),
            render_thread_wait: None,
        }
    }
}

/// Rounds `value` up to a multiple of `align` (any non-zero alignment).
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    value.div_ceil(align) * align
}

/// Least common multiple, used to combine a stride with the copy granularity.
#[inline]
pub(crate) fn lcm(a: u64, b: u64) -> u64 {
    fn gcd(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }
    a / gcd(a, b) * b
}
