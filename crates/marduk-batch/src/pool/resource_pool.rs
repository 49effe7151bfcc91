use std::borrow::{Borrow, BorrowMut};
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::buffer::ByteBuffer;

/// A resource that can live in a [`ResourcePool`].
///
/// The pool never sees a leased resource again unless it is returned, so each
/// lease records a token from which an equivalent resource can be rebuilt if
/// the lease leaks.
pub trait Poolable {
    type Token;

    fn token(&self) -> Self::Token;

    fn reclaim(token: Self::Token) -> Self;

    /// Clears per-use state before the resource is handed out again.
    fn reset(&mut self) {}
}

impl Poolable for ByteBuffer {
    type Token = usize;

    fn token(&self) -> usize {
        self.capacity()
    }

    fn reclaim(capacity: usize) -> Self {
        ByteBuffer::with_capacity(capacity, ByteBuffer::DEFAULT_GROWTH_ALIGNMENT)
    }

    fn reset(&mut self) {
        ByteBuffer::reset(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Ticket(u64);

/// A resource on loan from a pool, or a fresh one that belongs to no pool.
#[derive(Debug)]
pub struct Pooled<R> {
    ticket: Option<Ticket>,
    resource: R,
}

impl<R> Pooled<R> {
    /// Wraps a resource that was not borrowed from any pool.
    pub fn unpooled(resource: R) -> Self {
        Self {
            ticket: None,
            resource,
        }
    }

    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.ticket.is_some()
    }

    pub fn into_inner(self) -> R {
        self.resource
    }
}

impl<R> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

impl<R> Borrow<R> for Pooled<R> {
    fn borrow(&self) -> &R {
        &self.resource
    }
}

impl<R> BorrowMut<R> for Pooled<R> {
    fn borrow_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub returned: u64,
    /// Leases still outstanding at frame end.
    pub leaks_reclaimed: u64,
    pub evicted: u64,
}

#[derive(Debug)]
struct Idle<R> {
    resource: R,
    since: Instant,
}

/// Free list plus lease table, owned by one thread.
///
/// Borrow and return assert that they run on the thread that created the
/// pool. Time only advances through [`frame_finished`](Self::frame_finished).
pub struct ResourcePool<R: Poolable> {
    name: &'static str,
    owner: ThreadId,
    idle_timeout: Duration,
    now: Instant,
    free: Vec<Idle<R>>,
    leased: HashMap<Ticket, R::Token>,
    reclaimed: HashSet<Ticket>,
    next_ticket: u64,
    stats: PoolStats,
}

impl<R: Poolable> ResourcePool<R> {
    pub fn new(name: &'static str, idle_timeout: Duration) -> Self {
        Self::starting_at(name, idle_timeout, Instant::now())
    }

    pub fn starting_at(name: &'static str, idle_timeout: Duration, now: Instant) -> Self {
        Self {
            name,
            owner: thread::current().id(),
            idle_timeout,
            now,
            free: Vec::new(),
            leased: HashMap::new(),
            reclaimed: HashSet::new(),
            next_ticket: 0,
            stats: PoolStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn leased_len(&self) -> usize {
        self.leased.len()
    }

    /// Iterates the idle resources.
    pub fn free_resources(&self) -> impl Iterator<Item = &R> {
        self.free.iter().map(|i| &i.resource)
    }

    /// Lends the first idle resource accepted by `fits`, or one made by `create`.
    pub fn borrow<E>(
        &mut self,
        fits: impl Fn(&R) -> bool,
        create: impl FnOnce() -> Result<R, E>,
    ) -> Result<Pooled<R>, E> {
        self.assert_owner("borrow");

        let mut resource = match self.free.iter().position(|i| fits(&i.resource)) {
            Some(idx) => {
                self.stats.reused += 1;
                self.free.swap_remove(idx).resource
            }
            None => {
                self.stats.created += 1;
                create()?
            }
        };
        resource.reset();

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.leased.insert(ticket, resource.token());
        Ok(Pooled {
            ticket: Some(ticket),
            resource,
        })
    }

    /// Takes a lease back into the free list.
    ///
    /// A lease already reclaimed at frame end is dropped with a debug message.
    ///
    /// # Panics
    /// If `pooled` was never borrowed from this pool.
    pub fn give_back(&mut self, pooled: Pooled<R>) {
        self.assert_owner("give_back");

        let Some(ticket) = pooled.ticket else {
            panic!("{}: returned a resource that was never borrowed", self.name);
        };
        if self.leased.remove(&ticket).is_some() {
            self.stats.returned += 1;
            self.free.push(Idle {
                resource: pooled.resource,
                since: self.now,
            });
        } else if self.reclaimed.remove(&ticket) {
            log::debug!("{}: late return of reclaimed lease {}; dropped", self.name, ticket.0);
        } else {
            panic!("{}: returned a resource that was never borrowed", self.name);
        }
    }

    /// Frame-end hook: reclaims leaked leases, then evicts idle entries.
    ///
    /// Returns the evicted resources so the caller can release them.
    pub fn frame_finished(&mut self, now: Instant) -> Vec<R> {
        self.now = now;

        if !self.leased.is_empty() {
            log::warn!(
                "{}: {} resource(s) not returned by frame end; reclaimed",
                self.name,
                self.leased.len()
            );
        }
        for (ticket, token) in self.leased.drain() {
            self.stats.leaks_reclaimed += 1;
            self.reclaimed.insert(ticket);
            self.free.push(Idle {
                resource: R::reclaim(token),
                since: now,
            });
        }

        let timeout = self.idle_timeout;
        let (keep, evict): (Vec<_>, Vec<_>) = self
            .free
            .drain(..)
            .partition(|i| now.saturating_duration_since(i.since) <= timeout);
        self.free = keep;

        if !evict.is_empty() {
            log::debug!("{}: evicted {} idle resource(s)", self.name, evict.len());
            self.stats.evicted += evict.len() as u64;
        }
        evict.into_iter().map(|i| i.resource).collect()
    }

    /// Empties the free list, e.g. at shutdown.
    pub fn drain_free(&mut self) -> Vec<R> {
        self.free.drain(..).map(|i| i.resource).collect()
    }

    fn assert_owner(&self, op: &str) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "{}: {op} called off the owning (render) thread",
            self.name
        );
    }
}
