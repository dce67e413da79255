//! Hashed timing wheel with O(1) schedule/cancel and bounded per-tick work.
//!
//! Single level, `SLOTS` buckets, one wheel per thread. Handles are branded
//! with the wheel's `generativity` lifetime so a handle can only ever be
//! cancelled on the wheel that issued it.

use core::fmt;
use core::marker::PhantomData;
use core::num::NonZeroUsize;

use generativity::{Guard, Id};

use crate::runtime::timing::slab::{Slab, SlabIndex};
use crate::runtime::timing::time::{Duration, MonoInstant, NonZeroDuration, Now, TimeUnit};

/// Errors returned when scheduling a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WheelError {
    /// Every timer slot is in use.
    #[error("timer capacity exhausted")]
    Capacity,
    /// The delay does not fit in one rotation of the wheel.
    #[error("delay of {delay} ticks exceeds wheel horizon of {max} ticks")]
    DelayTooLong { delay: u64, max: u64 },
}

/// Handle to a scheduled timer. Stale once the timer fires or is cancelled.
pub struct TimerHandle<'id, T, U: TimeUnit> {
    idx: SlabIndex<T>,
    generation: u32,
    _brand: Id<'id>,
    _unit: PhantomData<fn() -> U>,
}

impl<T, U: TimeUnit> PartialEq for TimerHandle<'_, T, U> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx && self.generation == other.generation
    }
}

impl<T, U: TimeUnit> Eq for TimerHandle<'_, T, U> {}

impl<T, U: TimeUnit> fmt::Debug for TimerHandle<'_, T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("idx", &self.idx)
            .field("generation", &self.generation)
            .finish()
    }
}

/// A point on the wheel's tick lattice: `floor(instant / tick)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Tick(u64);

pub(crate) struct Wheel<'id, T, U: TimeUnit, const SLOTS: usize> {
    slots: Box<[Option<SlabIndex<T>>]>,
    slab: Slab<T>,
    tick: NonZeroDuration<U>,
    cursor: u64,
    brand: Id<'id>,
}

impl<'id, T, U: TimeUnit + Now, const SLOTS: usize> Wheel<'id, T, U, SLOTS> {
    pub(crate) fn new(guard: Guard<'id>, tick: NonZeroDuration<U>, capacity: NonZeroUsize) -> Self {
        const { assert!(SLOTS > 1, "wheel needs at least two slots") };
        Self {
            slots: vec![None; SLOTS].into_boxed_slice(),
            slab: Slab::with_capacity(capacity),
            tick,
            cursor: 0,
            brand: guard.into(),
        }
    }

    /// Current time on the tick lattice (never behind the cursor).
    #[cfg(test)]
    pub(crate) fn now(&self) -> Tick {
        self.tick_from_instant(U::now())
    }

    /// Converts an instant to a tick, clamped so it is never behind the cursor.
    pub(crate) fn tick_from_instant(&self, instant: MonoInstant<U>) -> Tick {
        Tick((instant.as_u64() / self.tick.get()).max(self.cursor))
    }

    /// Number of pending timers.
    pub(crate) const fn len(&self) -> usize {
        self.slab.len()
    }

    /// Schedules `payload` `delay` after `now` (rounded up to whole ticks).
    ///
    /// A zero delay fires on the next tick, never the current one.
    pub(crate) fn schedule_after(
        &mut self,
        now: &Tick,
        delay: Duration<U>,
        payload: T,
    ) -> Result<TimerHandle<'id, T, U>, WheelError> {
        let delay_ticks = delay.as_u64().div_ceil(self.tick.get());
        let max = (SLOTS as u64) - 1;
        if delay_ticks > max {
            return Err(WheelError::DelayTooLong {
                delay: delay_ticks,
                max,
            });
        }

        let deadline = (now.0 + delay_ticks).max(self.cursor + 1);
        let slot = (deadline % SLOTS as u64) as usize;
        let head = self.slots[slot];

        let (idx, generation) = self
            .slab
            .alloc(payload, deadline)
            .ok_or(WheelError::Capacity)?;
        if let Some(node) = self.slab.get_mut(idx) {
            node.next = head;
        }
        if let Some(head_node) = head.and_then(|h| self.slab.get_mut(h)) {
            head_node.prev = Some(idx);
        }
        self.slots[slot] = Some(idx);

        Ok(TimerHandle {
            idx,
            generation,
            _brand: self.brand,
            _unit: PhantomData,
        })
    }

    /// Cancels a pending timer. Returns `false` for stale handles.
    pub(crate) fn cancel(&mut self, handle: &TimerHandle<'id, T, U>) -> bool {
        let Some(node) = self.slab.get(handle.idx) else {
            return false;
        };
        if node.generation != handle.generation {
            return false;
        }
        let (prev, next, deadline) = (node.prev, node.next, node.deadline);
        self.unlink(prev, next, (deadline % SLOTS as u64) as usize);
        self.slab.free(handle.idx).is_some()
    }

    fn unlink(&mut self, prev: Option<SlabIndex<T>>, next: Option<SlabIndex<T>>, slot: usize) {
        match prev.and_then(|p| self.slab.get_mut(p)) {
            Some(prev_node) => prev_node.next = next,
            None => self.slots[slot] = next,
        }
        if let Some(next_node) = next.and_then(|n| self.slab.get_mut(n)) {
            next_node.prev = prev;
        }
    }

    /// Advances the wheel to `now`, handing every due timer to `on_fire`.
    ///
    /// A jump longer than one rotation visits every slot once, so no due timer
    /// is skipped.
    pub(crate) fn tick_at(&mut self, now: &Tick, mut on_fire: impl FnMut(TimerHandle<'id, T, U>, T)) {
        if now.0 <= self.cursor {
            return;
        }
        let steps = (now.0 - self.cursor).min(SLOTS as u64);
        for step in 1..=steps {
            let slot = ((self.cursor + step) % SLOTS as u64) as usize;
            let mut cursor = self.slots[slot];
            while let Some(idx) = cursor {
                let Some(node) = self.slab.get(idx) else {
                    break;
                };
                cursor = node.next;
                if node.deadline > now.0 {
                    continue;
                }
                let (prev, next) = (node.prev, node.next);
                self.unlink(prev, next, slot);
                if let Some(node) = self.slab.free(idx) {
                    on_fire(
                        TimerHandle {
                            idx,
                            generation: node.generation,
                            _brand: self.brand,
                            _unit: PhantomData,
                        },
                        node.payload,
                    );
                }
            }
        }
        self.cursor = now.0;
    }
}
