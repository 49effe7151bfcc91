use std::cell::Cell;
use std::collections::HashMap;

use crate::batch::DrawBatchId;

/// Batch-keyed values in discovery order, with a one-slot cache for the most
/// recently accessed batch.
#[derive(Debug)]
pub struct BatchHolders<T> {
    order: Vec<DrawBatchId>,
    values: Vec<T>,
    index: HashMap<DrawBatchId, usize>,
    last: Cell<Option<(DrawBatchId, usize)>>,
    cache_hits: Cell<u64>,
}

impl<T> Default for BatchHolders<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            values: Vec::new(),
            index: HashMap::new(),
            last: Cell::new(None),
            cache_hits: Cell::new(0),
        }
    }
}

impl<T> BatchHolders<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, batch: DrawBatchId) -> Option<usize> {
        if let Some((cached, idx)) = self.last.get() {
            if cached == batch {
                self.cache_hits.set(self.cache_hits.get() + 1);
                return Some(idx);
            }
        }
        let idx = *self.index.get(&batch)?;
        self.last.set(Some((batch, idx)));
        Some(idx)
    }

    pub fn get(&self, batch: DrawBatchId) -> Option<&T> {
        self.slot(batch).map(|idx| &self.values[idx])
    }

    pub fn get_mut(&mut self, batch: DrawBatchId) -> Option<&mut T> {
        self.slot(batch).map(|idx| &mut self.values[idx])
    }

    /// The value for `batch`, created with `create` on first access.
    pub fn get_or_insert_with(&mut self, batch: DrawBatchId, create: impl FnOnce() -> T) -> &mut T {
        let idx = match self.slot(batch) {
            Some(idx) => idx,
            None => {
                let idx = self.values.len();
                self.order.push(batch);
                self.values.push(create());
                self.index.insert(batch, idx);
                self.last.set(Some((batch, idx)));
                idx
            }
        };
        &mut self.values[idx]
    }

    /// Stores `value` for `batch`, returning the value it replaces.
    pub fn insert(&mut self, batch: DrawBatchId, value: T) -> Option<T> {
        match self.slot(batch) {
            Some(idx) => Some(std::mem::replace(&mut self.values[idx], value)),
            None => {
                self.get_or_insert_with(batch, || value);
                None
            }
        }
    }

    #[inline]
    pub fn contains(&self, batch: DrawBatchId) -> bool {
        self.index.contains_key(&batch)
    }

    /// Batches in the order they were first accessed.
    #[inline]
    pub fn discovered(&self) -> &[DrawBatchId] {
        &self.order
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Lookups answered by the last-accessed slot.
    #[inline]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.get()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DrawBatchId, &T)> {
        self.order.iter().copied().zip(self.values.iter())
    }

    /// Removes everything, yielding values in discovery order.
    pub fn drain(&mut self) -> impl Iterator<Item = (DrawBatchId, T)> + '_ {
        self.index.clear();
        self.last.set(None);
        self.order.drain(..).zip(self.values.drain(..))
    }
}
