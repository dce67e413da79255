//! Generational slab holding the wheel's intrusive timer lists.

use core::fmt;
use core::marker::PhantomData;
use core::num::NonZeroUsize;

/// Index into a [`Slab`]; typed by payload so indices of different wheels don't mix.
pub struct SlabIndex<T>(u32, PhantomData<fn() -> T>);

impl<T> SlabIndex<T> {
    const fn new(idx: u32) -> Self {
        Self(idx, PhantomData)
    }

    const fn get(self) -> usize {
        self.0 as usize
    }
}

// Manual impls: derive would require the bounds on T.
impl<T> Copy for SlabIndex<T> {}
impl<T> Clone for SlabIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> PartialEq for SlabIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for SlabIndex<T> {}
impl<T> fmt::Debug for SlabIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlabIndex({})", self.0)
    }
}

/// Occupied timer node.
pub struct Node<T> {
    pub payload: T,
    pub generation: u32,
    /// Absolute deadline in wheel ticks.
    pub deadline: u64,
    pub next: Option<SlabIndex<T>>,
    pub prev: Option<SlabIndex<T>>,
}

enum Entry<T> {
    Occupied(Node<T>),
    Free {
        next: Option<SlabIndex<T>>,
        generation: u32,
    },
}

/// Fixed-capacity slab with an intrusive free list.
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<SlabIndex<T>>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a slab with `cap` free slots, capped at `u32::MAX` entries.
    #[must_use]
    pub fn with_capacity(cap: NonZeroUsize) -> Self {
        let capacity = cap.get().min(u32::MAX as usize);
        let entries = (0..capacity)
            .map(|i| Entry::Free {
                next: (i + 1 < capacity).then(|| SlabIndex::new((i + 1) as u32)),
                generation: 0,
            })
            .collect();
        Self {
            entries,
            free_head: Some(SlabIndex::new(0)),
            len: 0,
        }
    }

    /// Number of occupied entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Stores `payload`; returns its index and generation, or `None` when full.
    pub fn alloc(&mut self, payload: T, deadline: u64) -> Option<(SlabIndex<T>, u32)> {
        let idx = self.free_head?;
        let Entry::Free { next, generation } = self.entries[idx.get()] else {
            unreachable!("free list points at an occupied entry");
        };
        self.free_head = next;
        self.entries[idx.get()] = Entry::Occupied(Node {
            payload,
            generation,
            deadline,
            next: None,
            prev: None,
        });
        self.len += 1;
        Some((idx, generation))
    }

    /// Frees an entry, bumping its generation so outstanding handles go stale.
    pub fn free(&mut self, idx: SlabIndex<T>) -> Option<Node<T>> {
        let generation = match &self.entries[idx.get()] {
            Entry::Occupied(node) => node.generation,
            Entry::Free { .. } => return None,
        };
        let entry = core::mem::replace(
            &mut self.entries[idx.get()],
            Entry::Free {
                next: self.free_head,
                generation: generation.wrapping_add(1),
            },
        );
        self.free_head = Some(idx);
        self.len -= 1;
        match entry {
            Entry::Occupied(node) => Some(node),
            Entry::Free { .. } => None,
        }
    }

    #[must_use]
    pub fn get(&self, idx: SlabIndex<T>) -> Option<&Node<T>> {
        match &self.entries[idx.get()] {
            Entry::Occupied(node) => Some(node),
            Entry::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, idx: SlabIndex<T>) -> Option<&mut Node<T>> {
        match &mut self.entries[idx.get()] {
            Entry::Occupied(node) => Some(node),
            Entry::Free { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_bumps_generation_and_recycles() {
        let mut slab = Slab::with_capacity(NonZeroUsize::new(1).unwrap());
        let (idx, generation) = slab.alloc("a", 10).unwrap();
        assert!(slab.alloc("b", 11).is_none(), "slab should be full");

        let node = slab.free(idx).unwrap();
        assert_eq!(node.payload, "a");
        assert_eq!(node.deadline, 10);
        assert!(slab.free(idx).is_none(), "double free is rejected");

        let (again, next_generation) = slab.alloc("c", 12).unwrap();
        assert_eq!(again, idx);
        assert_eq!(next_generation, generation + 1);
        assert_eq!(slab.len(), 1);
    }
}
