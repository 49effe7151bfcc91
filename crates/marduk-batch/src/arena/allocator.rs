use std::collections::{BTreeMap, HashMap};

use crate::config::align_up;
use crate::error::ArenaError;

/// First-fit allocator over `[0, capacity)`.
///
/// The address space is virtual: the allocator knows nothing about the GPU
/// buffer behind it. Owners compare [`high_water_mark`](Self::high_water_mark)
/// or an allocation's end against the committed buffer size and grow it
/// themselves.
///
/// Every allocation starts on, and is sized to, a multiple of the allocator's
/// alignment. Address 0 is a valid allocation; exhaustion is reported as
/// [`ArenaError::NoSpace`]. Freed ranges coalesce with free neighbors.
#[derive(Debug)]
pub struct ArenaAllocator {
    capacity: u64,
    alignment: u64,
    /// start -> length, never adjacent (coalesced)
    free: BTreeMap<u64, u64>,
    /// address -> length
    live: HashMap<u64, u64>,
    used: u64,
    high_water_mark: u64,
}

impl ArenaAllocator {
    pub fn new(capacity: u64, alignment: u64) -> Self {
        assert!(alignment > 0, "arena alignment must be non-zero");
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            capacity,
            alignment,
            free,
            live: HashMap::new(),
            used: 0,
            high_water_mark: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes held by live allocations, alignment padding included.
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    #[inline]
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Highest allocation end ever handed out.
    #[inline]
    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn largest_free_block(&self) -> u64 {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Size of the live allocation at `address`.
    #[inline]
    pub fn size_of(&self, address: u64) -> Option<u64> {
        self.live.get(&address).copied()
    }

    /// Reserves `size` bytes (rounded up to the alignment, at least one unit).
    pub fn alloc(&mut self, size: u64) -> Result<u64, ArenaError> {
        let size = align_up(size.max(1), self.alignment);

        let mut hit = None;
        for (&start, &len) in &self.free {
            let aligned = align_up(start, self.alignment);
            if aligned + size <= start + len {
                hit = Some((start, len, aligned));
                break;
            }
        }
        let Some((start, len, address)) = hit else {
            return Err(ArenaError::NoSpace {
                requested: size,
                capacity: self.capacity,
            });
        };

        self.free.remove(&start);
        if address > start {
            self.free.insert(start, address - start);
        }
        let end = address + size;
        if end < start + len {
            self.free.insert(end, start + len - end);
        }

        self.live.insert(address, size);
        self.used += size;
        self.high_water_mark = self.high_water_mark.max(end);
        Ok(address)
    }

    /// Returns the allocation at `address` to the free list and yields its size.
    ///
    /// # Panics
    /// If `address` is not a live allocation.
    pub fn free(&mut self, address: u64) -> u64 {
        let Some(size) = self.live.remove(&address) else {
            panic!("ArenaAllocator::free: no live allocation at address {address}");
        };
        self.used -= size;

        let mut start = address;
        let mut len = size;

        let prev = self.free.range(..address).next_back().map(|(&s, &l)| (s, l));
        if let Some((prev_start, prev_len)) = prev {
            if prev_start + prev_len == address {
                self.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(address + size)) {
            len += next_len;
        }

        self.free.insert(start, len);
        size
    }

    /// Live allocations as `(address, size)`, in address order.
    pub fn allocations(&self) -> Vec<(u64, u64)> {
        let mut out: Vec<_> = self.live.iter().map(|(&a, &s)| (a, s)).collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(arena: &ArenaAllocator) {
        let allocs = arena.allocations();
        for pair in allocs.windows(2) {
            let (a, a_len) = pair[0];
            let (b, _) = pair[1];
            assert!(a + a_len <= b, "overlap: [{a}, {}) and {b}", a + a_len);
        }
    }

    #[test]
    fn first_allocation_is_at_zero() {
        let mut arena = ArenaAllocator::new(1024, 16);
        assert_eq!(arena.alloc(64), Ok(0));
        assert_eq!(arena.alloc(64), Ok(64));
        assert_eq!(arena.high_water_mark(), 128);
    }

    #[test]
    fn freed_range_is_reused_first_fit() {
        let mut arena = ArenaAllocator::new(1024, 16);
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        assert_eq!((a, b), (0, 64));

        assert_eq!(arena.free(a), 64);
        let c = arena.alloc(32).unwrap();
        assert_eq!(c, 0);
        assert_eq!(arena.high_water_mark(), 128);
        assert_disjoint(&arena);
    }

    #[test]
    fn sizes_round_up_to_alignment() {
        let mut arena = ArenaAllocator::new(1024, 12);
        assert_eq!(arena.alloc(5), Ok(0));
        assert_eq!(arena.alloc(13), Ok(12));
        assert_eq!(arena.size_of(12), Some(24));
        assert_eq!(arena.used(), 36);
    }

    #[test]
    fn exhaustion_is_reported_not_truncated() {
        let mut arena = ArenaAllocator::new(128, 16);
        arena.alloc(100).unwrap();
        assert_eq!(
            arena.alloc(32),
            Err(ArenaError::NoSpace { requested: 32, capacity: 128 })
        );
        assert_eq!(arena.alloc(16), Ok(112));
    }

    #[test]
    fn free_coalesces_neighbors() {
        let mut arena = ArenaAllocator::new(256, 16);
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        let c = arena.alloc(64).unwrap();
        arena.free(a);
        arena.free(c);
        arena.free(b);
        assert_eq!(arena.largest_free_block(), 256);
        assert_eq!(arena.live_allocations(), 0);
        assert_eq!(arena.alloc(256), Ok(0));
    }

    #[test]
    #[should_panic(expected = "no live allocation at address 48")]
    fn free_of_unknown_address_panics() {
        let mut arena = ArenaAllocator::new(256, 16);
        arena.alloc(16).unwrap();
        arena.free(48);
    }

    #[test]
    fn random_sequences_never_overlap() {
        let mut arena = ArenaAllocator::new(64 * 1024, 8);
        let mut live = Vec::new();
        let mut seed = 0x2545_F491_4F6C_DD1Du64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2000 {
            let r = next();
            if r % 3 == 0 && !live.is_empty() {
                let idx = (r as usize / 3) % live.len();
                let addr = live.swap_remove(idx);
                arena.free(addr);
            } else if let Ok(addr) = arena.alloc(1 + r % 700) {
                live.push(addr);
            }
            assert_disjoint(&arena);
        }
        assert_eq!(arena.live_allocations(), live.len());
    }
}
