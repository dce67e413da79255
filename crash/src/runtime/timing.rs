//! Timing primitives for the game thread.
//!
//! Use the scoped wheel API ([`with_wheel`]); the branded wheel underneath is
//! crate-internal.

mod scoped;
mod slab;
mod time;
pub(crate) mod wheel;

pub use scoped::{WheelScope, with_wheel};
pub use time::{Duration, Millis, MonoInstant, NonZeroDuration, Now, TimeUnit};
pub use wheel::{TimerHandle, WheelError};
