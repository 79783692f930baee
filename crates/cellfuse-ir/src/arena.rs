//! Append-only arena storage with typed handles.
//!
//! Both the operator graph and the fused-kernel plans live in arenas, so
//! node identity is an index rather than an allocation address. Sharing
//! between plan nodes is therefore reproducible across runs.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Index of a value stored in an [`Arena<T>`].
///
/// A handle is only meaningful for the arena that issued it. Handles of
/// one arena compare in insertion order.
pub struct Handle<T> {
    slot: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(slot: u32) -> Self {
        Self {
            slot,
            marker: PhantomData,
        }
    }

    fn from_usize(slot: usize) -> Self {
        match u32::try_from(slot) {
            Ok(slot) => Self::new(slot),
            Err(_) => panic!("arena slot {slot} does not fit in a handle"),
        }
    }

    /// Zero-based slot of this handle.
    pub fn index(self) -> usize {
        self.slot as usize
    }
}

// Manual impls: deriving would require the same traits on `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
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
        self.slot.cmp(&other.slot)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.slot);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.slot)
    }
}

/// Append-only storage addressed by [`Handle`]s. Values are never removed,
/// so every issued handle stays valid.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    slots: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stores `value` and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = Handle::from_usize(self.slots.len());
        self.slots.push(value);
        handle
    }

    /// The value behind `handle`, or `None` if this arena did not issue it.
    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        handle.index() < self.slots.len()
    }

    /// `(handle, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot, value)| (Handle::from_usize(slot), value))
    }

    /// All handles in insertion order. The iterator does not borrow the
    /// arena, so slots may be rewritten while walking it.
    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + use<T> {
        (0..self.slots.len()).map(Handle::from_usize)
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.slots[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.slots[handle.index()]
    }
}
