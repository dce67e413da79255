//! Lock-free SPSC queue used as a subscriber outbox.
//!
//! - [`Producer`] - held by the game thread inside the subscriber registry
//! - [`Consumer`] - held by the session thread that owns the socket
//!
//! The queue is bounded: a full outbox is reported back to the producer
//! instead of growing, which is what lets the registry evict slow clients.
//! Dropping the producer is how the game thread tells a session it has been
//! evicted; the consumer observes it through [`Consumer::is_disconnected`].
//!
//! # Example
//!
//! ```
//! use crash::sync::spsc;
//!
//! let (tx, rx) = spsc::channel::<String, 16>();
//!
//! tx.push("hello".to_string()).unwrap();
//! assert_eq!(rx.pop(), Some("hello".to_string()));
//! ```

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CapacityCheck, Padded};

/// One side of the ring: its published index plus a private cache of the peer's.
struct Side {
    index: AtomicUsize,
    /// Last observed index of the opposite side. Touched only by the owner.
    peer: UnsafeCell<usize>,
}

impl Side {
    const fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
            peer: UnsafeCell::new(0),
        }
    }
}

struct Ring<T, const N: usize> {
    producer: Padded<Side>,
    consumer: Padded<Side>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: each slot is written only by the producer before `head` is published
// and read only by the consumer before `tail` is published; the Release/Acquire
// pair on the indices orders the slot accesses. The `peer` caches are owned by
// their side alone.
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T, const N: usize> Ring<T, N> {
    fn new() -> Self {
        Self {
            producer: Padded(Side::new()),
            consumer: Padded(Side::new()),
            slots: (0..N)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
        }
    }

    /// # Safety
    ///
    /// Only one thread may act as producer at a time.
    unsafe fn push(&self, item: T) -> Result<(), T> {
        let head = self.producer.0.index.load(Ordering::Relaxed);
        // SAFETY: the producer exclusively owns its peer cache.
        let cached_tail = unsafe { &mut *self.producer.0.peer.get() };

        if head.wrapping_sub(*cached_tail) >= N {
            *cached_tail = self.consumer.0.index.load(Ordering::Acquire);
            if head.wrapping_sub(*cached_tail) >= N {
                return Err(item);
            }
        }

        // SAFETY: head - tail < N, so the consumer is not reading this slot and
        // will not until the store below publishes it.
        unsafe { (*self.slots[head % N].get()).write(item) };
        self.producer
            .0
            .index
            .store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    ///
    /// Only one thread may act as consumer at a time.
    unsafe fn pop(&self) -> Option<T> {
        let tail = self.consumer.0.index.load(Ordering::Relaxed);
        // SAFETY: the consumer exclusively owns its peer cache.
        let cached_head = unsafe { &mut *self.consumer.0.peer.get() };

        if *cached_head == tail {
            *cached_head = self.producer.0.index.load(Ordering::Acquire);
            if *cached_head == tail {
                return None;
            }
        }

        // SAFETY: head != tail, so the slot was initialized by the producer and
        // is not rewritten until the store below releases it.
        let item = unsafe { (*self.slots[tail % N].get()).assume_init_read() };
        self.consumer
            .0
            .index
            .store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no producer or consumer is left.
        while unsafe { self.pop() }.is_some() {}
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// `Producer` is [`Send`] but not [`Sync`]: it can move to another thread but
/// cannot be shared, so two concurrent `push` calls are impossible.
pub struct Producer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue. Same thread-safety rules as [`Producer`].
pub struct Consumer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC channel with capacity `N`.
///
/// Fails to compile if `N == 0`.
#[must_use]
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(Ring::new());
    (
        Producer {
            ring: Arc::clone(&ring),
            _unsync: PhantomData,
        },
        Consumer {
            ring,
            _unsync: PhantomData,
        },
    )
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Attempts to push an item onto the queue (wait-free).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: `Producer` is !Sync and not Clone, so it is the only producer.
        unsafe { self.ring.push(item) }
    }

    /// Returns `true` once the consumer has been dropped.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.ring) == 1
    }
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Attempts to pop an item from the queue (wait-free).
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: `Consumer` is !Sync and not Clone, so it is the only consumer.
        unsafe { self.ring.pop() }
    }

    /// Returns `true` once the producer has been dropped.
    ///
    /// Items pushed before the drop are still available through [`pop`](Self::pop).
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.ring) == 1
    }
}
