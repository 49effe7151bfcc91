use std::collections::HashSet;
use std::hash::Hash;

/// Insertion-ordered set.
///
/// Re-inserting an element keeps its original position.
#[derive(Debug, Clone)]
pub struct RenderList<T> {
    items: Vec<T>,
    members: HashSet<T>,
}

impl<T> Default for RenderList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            members: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> RenderList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` unless present. Returns whether it was added.
    pub fn insert(&mut self, item: T) -> bool {
        if !self.members.insert(item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Returns whether `item` was present.
    pub fn remove(&mut self, item: T) -> bool {
        if !self.members.remove(&item) {
            return false;
        }
        self.items.retain(|i| *i != item);
        true
    }

    #[inline]
    pub fn contains(&self, item: T) -> bool {
        self.members.contains(&item)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.members.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.items.iter().copied()
    }
}
