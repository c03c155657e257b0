//! Append-only node storage addressed by typed handles.
//!
//! Every node of one kernel build lives in an [`Arena`]. A node can only
//! refer to nodes appended before it, so the reference graph is a DAG by
//! construction, and dropping the arena releases the whole build at once.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Index;

/// A typed index into an [`Arena`].
///
/// Handles are `Copy`; two handles compare equal exactly when they name the
/// same node, which is how "same subexpression" is told apart from
/// "structurally equal but built twice".
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An append-only arena with typed [`Handle`]-based access.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the arena holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the handle the next appended node will receive.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::new(self.checked_len())
    }

    /// Appends a node and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let index = self.checked_len();
        self.data.push(value);
        Handle::new(index)
    }

    /// Returns the node if the handle belongs to this arena.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Iterates over `(handle, &node)` pairs in append order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // append() keeps the length within u32
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (Handle::new(i as u32), v))
    }

    fn checked_len(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or_else(|_| {
            panic!("arena overflow: {} nodes exceeds u32::MAX", self.data.len())
        })
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_index() {
        let mut arena = Arena::new();
        let a = arena.append("sin");
        let b = arena.append("cos");
        assert_eq!(arena[a], "sin");
        assert_eq!(arena[b], "cos");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn next_handle_predicts_append() {
        let mut arena = Arena::<i32>::new();
        let predicted = arena.next_handle();
        let actual = arena.append(7);
        assert_eq!(predicted, actual);
        assert_eq!(arena.next_handle().index(), 1);
    }

    #[test]
    fn handles_order_by_creation() {
        let mut arena = Arena::new();
        let first = arena.append(1.0f32);
        let second = arena.append(1.0f32);
        assert!(first < second);
        assert_ne!(first, second);
    }

    #[test]
    fn try_get_out_of_range() {
        let mut arena = Arena::new();
        let h = arena.append(42);
        assert_eq!(arena.try_get(h), Some(&42));
        assert_eq!(arena.try_get(Handle::new(9)), None);
    }

    #[test]
    fn iter_in_append_order() {
        let mut arena = Arena::new();
        arena.append(10);
        arena.append(20);
        let items: Vec<_> = arena.iter().map(|(h, &v)| (h.index(), v)).collect();
        assert_eq!(items, vec![(0, 10), (1, 20)]);
    }
}
