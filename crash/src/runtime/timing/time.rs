//! Minimal time units and strongly-typed durations/instants.
use core::fmt;
use core::marker::PhantomData;
use core::num::NonZeroU64;
use std::sync::OnceLock;

/// Marker trait for a time unit.
pub trait TimeUnit {
    /// Human-readable name for logs.
    const NAME: &'static str;
}

/// Source of monotonic instants in a given unit.
pub trait Now: TimeUnit + Sized {
    /// Returns the current monotonic instant.
    fn now() -> MonoInstant<Self>;
}

#[derive(Debug)]
pub enum Millis {}
impl TimeUnit for Millis {
    const NAME: &'static str = "ms";
}

/// Process-wide anchor so that millisecond instants start near zero.
fn anchor() -> minstant::Instant {
    static ANCHOR: OnceLock<minstant::Instant> = OnceLock::new();
    *ANCHOR.get_or_init(minstant::Instant::now)
}

impl Now for Millis {
    fn now() -> MonoInstant<Self> {
        MonoInstant::new(anchor().elapsed().as_millis() as u64)
    }
}

/// Implements the value-type traits without requiring them on the unit marker.
macro_rules! unit_value {
    ($name:ident) => {
        impl<U: TimeUnit> Clone for $name<U> {
            fn clone(&self) -> Self {
                *self
            }
        }
        impl<U: TimeUnit> Copy for $name<U> {}
        impl<U: TimeUnit> PartialEq for $name<U> {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }
        impl<U: TimeUnit> Eq for $name<U> {}
        impl<U: TimeUnit> PartialOrd for $name<U> {
            fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl<U: TimeUnit> Ord for $name<U> {
            fn cmp(&self, other: &Self) -> core::cmp::Ordering {
                self.0.cmp(&other.0)
            }
        }
        impl<U: TimeUnit> fmt::Debug for $name<U> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.0, U::NAME)
            }
        }
    };
}

/// Strongly-typed duration in a given unit.
#[repr(transparent)]
pub struct Duration<U: TimeUnit>(u64, PhantomData<fn() -> U>);
unit_value!(Duration);

impl<U: TimeUnit> Duration<U> {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Duration<Millis> {
    /// Converts a std duration, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn from_std(d: std::time::Duration) -> Self {
        Self::new(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A duration that is statically known to be non-zero (e.g. a wheel tick).
#[repr(transparent)]
pub struct NonZeroDuration<U: TimeUnit>(NonZeroU64, PhantomData<fn() -> U>);

impl<U: TimeUnit> Clone for NonZeroDuration<U> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<U: TimeUnit> Copy for NonZeroDuration<U> {}

impl<U: TimeUnit> NonZeroDuration<U> {
    #[inline]
    #[must_use]
    pub const fn new(value: NonZeroU64) -> Self {
        Self(value, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// A monotonic point in time, in units since an arbitrary process anchor.
#[repr(transparent)]
pub struct MonoInstant<U: TimeUnit>(u64, PhantomData<fn() -> U>);
unit_value!(MonoInstant);

impl<U: TimeUnit> MonoInstant<U> {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub const fn saturating_since(self, earlier: Self) -> Duration<U> {
        Duration::new(self.0.saturating_sub(earlier.0))
    }
}

impl<U: TimeUnit> core::ops::Add<Duration<U>> for MonoInstant<U> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Duration<U>) -> Self::Output {
        Self::new(self.0 + rhs.0)
    }
}
