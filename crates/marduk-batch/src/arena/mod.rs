//! Free-list allocation of byte ranges inside a bounded virtual address space.

mod allocator;

pub use allocator::ArenaAllocator;
