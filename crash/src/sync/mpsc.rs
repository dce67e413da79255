//! Bounded lock-free MPSC queue used as the game thread's command inbox.
//!
//! Every session thread holds a clone of the [`Producer`]; the game thread owns
//! the single [`Consumer`].
//!
//! # Algorithm
//!
//! Dmitry Vyukov's bounded queue, reduced to one consumer:
//!
//! - Each slot carries a sequence number, initially its index
//! - A producer reserves position `pos` by CAS on `head` when `slot.seq == pos`
//! - After writing it publishes with `slot.seq = pos + 1`
//! - The consumer reads when `slot.seq == tail + 1` and releases the slot with
//!   `slot.seq = tail + N`

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CapacityCheck, Padded};

#[repr(align(64))]
struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Ring<T, const N: usize> {
    head: Padded<AtomicUsize>,
    tail: Padded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
}

// SAFETY: a slot's value is written only by the producer that won the CAS for
// its position and read only by the consumer after observing the published
// sequence number (Release/Acquire on `seq`).
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T, const N: usize> Ring<T, N> {
    fn new() -> Self {
        Self {
            head: Padded(AtomicUsize::new(0)),
            tail: Padded(AtomicUsize::new(0)),
            slots: (0..N)
                .map(|i| Slot {
                    seq: AtomicUsize::new(i),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
                .collect(),
        }
    }

    fn push(&self, item: T) -> Result<(), T> {
        loop {
            let pos = self.head.0.load(Ordering::Relaxed);
            let slot = &self.slots[pos % N];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                if self
                    .head
                    .0
                    .compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: the CAS made this producer the only writer of the
                    // slot, and seq == pos means the consumer released it.
                    unsafe { (*slot.value.get()).write(item) };
                    slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
            } else if diff < 0 {
                return Err(item);
            }
            // diff > 0: another producer took this position, reload head.
        }
    }

    /// # Safety
    ///
    /// Only one thread may act as consumer at a time.
    unsafe fn pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let slot = &self.slots[tail % N];
        if slot.seq.load(Ordering::Acquire) != tail.wrapping_add(1) {
            return None;
        }

        // SAFETY: the producer published this slot (seq == tail + 1) and no one
        // writes it again until we release it below.
        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.seq.store(tail.wrapping_add(N), Ordering::Release);
        self.tail.0.store(tail.wrapping_add(1), Ordering::Relaxed);
        Some(item)
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no producer or consumer is left.
        while unsafe { self.pop() }.is_some() {}
    }
}

/// Write end of the MPSC queue. Clone it for every producing thread.
pub struct Producer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Send, const N: usize> Clone for Producer<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Read end of the MPSC queue. `Send` but not `Sync`, and not `Clone`.
pub struct Consumer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    _unsync: PhantomData<Cell<&'static ()>>,
}

/// Creates a new MPSC channel with capacity `N`, which must be at least 2.
#[must_use]
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let () = CapacityCheck::<N>::SEQUENCED;

    let ring = Arc::new(Ring::new());
    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer {
            ring,
            _unsync: PhantomData,
        },
    )
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Attempts to push an item onto the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    /// Retries [`push`](Self::push) until it succeeds or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    pub fn push_blocking(&self, mut item: T, timeout: Duration) -> Result<(), T> {
        let deadline = minstant::Instant::now() + timeout;
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if minstant::Instant::now() > deadline {
                        return Err(item);
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Attempts to pop an item from the queue.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: `Consumer` is !Sync and not Clone, so it is the only consumer.
        unsafe { self.ring.pop() }
    }
}
