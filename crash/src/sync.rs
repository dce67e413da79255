//! Bounded in-process queues.
//!
//! The game thread is the only consumer of the command inbox ([`mpsc`]) and
//! the only producer of every subscriber outbox ([`spsc`]). Neither queue
//! takes a lock or makes a syscall on the hot path.

pub mod mpsc;
pub mod spsc;

/// Cache-line aligned wrapper keeping producer and consumer indices apart.
#[repr(align(64))]
pub(crate) struct Padded<T>(pub(crate) T);

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion that queue capacity is non-zero.
    const OK: () = assert!(N > 0, "Queue capacity must be greater than 0");

    /// Sequence-numbered rings cannot tell a published slot from the next
    /// free one when `N == 1`.
    const SEQUENCED: () = assert!(N >= 2, "MPSC capacity must be at least 2");
}
