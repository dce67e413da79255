//! Scoped timing wheel: hides the `generativity` guard from callers.

use core::num::NonZeroUsize;

use crate::runtime::timing::time::{Duration, MonoInstant, NonZeroDuration, Now, TimeUnit};
use crate::runtime::timing::wheel::{TimerHandle, Wheel, WheelError};

/// Runs `f` with a fresh wheel; branded handles cannot escape the closure.
///
/// A handle is only accepted by the wheel that issued it:
///
/// ```compile_fail
/// use std::num::{NonZeroU64, NonZeroUsize};
/// use crash::runtime::timing::{Duration, Millis, MonoInstant, NonZeroDuration, with_wheel};
///
/// let tick = NonZeroDuration::<Millis>::new(NonZeroU64::MIN);
/// with_wheel::<u32, Millis, 8, _>(tick, NonZeroUsize::MIN, |a| {
///     let handle = a.schedule_after_at(MonoInstant::new(0), Duration::new(1), 1).unwrap();
///     with_wheel::<u32, Millis, 8, _>(tick, NonZeroUsize::MIN, |b| {
///         b.cancel(&handle);
///     });
/// });
/// ```
pub fn with_wheel<T, U, const SLOTS: usize, R>(
    tick_duration: NonZeroDuration<U>,
    capacity: NonZeroUsize,
    f: impl for<'id> FnOnce(&mut WheelScope<'id, T, U, SLOTS>) -> R,
) -> R
where
    U: TimeUnit + Now,
{
    generativity::make_guard!(guard);
    let mut scope = WheelScope {
        inner: Wheel::new(guard, tick_duration, capacity),
    };
    f(&mut scope)
}

/// A borrowed wheel, valid for the duration of [`with_wheel`].
pub struct WheelScope<'id, T, U: TimeUnit + Now, const SLOTS: usize> {
    inner: Wheel<'id, T, U, SLOTS>,
}

impl<'id, T, U, const SLOTS: usize> WheelScope<'id, T, U, SLOTS>
where
    U: TimeUnit + Now,
{
    /// Schedules `payload` to fire `delay` after the current time.
    #[cfg(test)]
    fn schedule_after(
        &mut self,
        delay: Duration<U>,
        payload: T,
    ) -> Result<TimerHandle<'id, T, U>, WheelError> {
        let now = self.inner.now();
        self.inner.schedule_after(&now, delay, payload)
    }

    /// Schedules `payload` to fire `delay` after an explicit instant.
    ///
    /// An instant behind the wheel's cursor is treated as the cursor.
    ///
    /// # Errors
    ///
    /// See [`WheelError`].
    pub fn schedule_after_at(
        &mut self,
        now: MonoInstant<U>,
        delay: Duration<U>,
        payload: T,
    ) -> Result<TimerHandle<'id, T, U>, WheelError> {
        let now = self.inner.tick_from_instant(now);
        self.inner.schedule_after(&now, delay, payload)
    }

    /// Cancels a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: &TimerHandle<'id, T, U>) -> bool {
        self.inner.cancel(handle)
    }

    /// Advances the wheel to `now` and fires any due timers.
    pub fn tick_at(&mut self, now: MonoInstant<U>, on_fire: impl FnMut(TimerHandle<'id, T, U>, T)) {
        let now = self.inner.tick_from_instant(now);
        self.inner.tick_at(&now, on_fire);
    }

    /// Advances the wheel to the current time and fires any due timers.
    #[cfg(test)]
    fn tick_now(&mut self, on_fire: impl FnMut(TimerHandle<'id, T, U>, T)) {
        let now = self.inner.now();
        self.inner.tick_at(&now, on_fire);
    }

    /// Number of timers still pending.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::num::NonZeroU64;

    /// Deterministic unit for tests.
    #[derive(Debug)]
    enum TestUnit {}

    impl TimeUnit for TestUnit {
        const NAME: &'static str = "test";
    }

    thread_local! {
        static NOW: Cell<u64> = const { Cell::new(0) };
    }

    impl Now for TestUnit {
        fn now() -> MonoInstant<Self> {
            MonoInstant::new(NOW.with(Cell::get))
        }
    }

    fn set_now(v: u64) {
        NOW.with(|t| t.set(v));
    }

    fn with_test_wheel<T, const SLOTS: usize, R>(
        capacity: usize,
        f: impl for<'id> FnOnce(&mut WheelScope<'id, T, TestUnit, SLOTS>) -> R,
    ) -> R {
        with_wheel::<T, TestUnit, SLOTS, R>(
            NonZeroDuration::new(NonZeroU64::new(1).unwrap()),
            NonZeroUsize::new(capacity).unwrap(),
            f,
        )
    }

    #[test]
    fn zero_delay_fires_on_next_tick_once() {
        set_now(0);
        with_test_wheel::<&str, 4, _>(4, |wheel| {
            let handle = wheel.schedule_after(Duration::new(0), "countdown").unwrap();
            let mut fired = Vec::new();

            wheel.tick_now(|_, payload| fired.push(payload));
            assert!(fired.is_empty(), "delay=0 must not fire on the current tick");

            set_now(1);
            wheel.tick_now(|h, payload| {
                assert_eq!(h, handle);
                fired.push(payload);
            });
            set_now(2);
            wheel.tick_now(|_, payload| fired.push(payload));

            assert_eq!(fired, vec!["countdown"]);
            assert!(!wheel.cancel(&handle), "handle is stale after firing");
            assert_eq!(wheel.pending(), 0);
        });
    }

    #[test]
    fn rearming_after_cancel_fires_only_the_new_timer() {
        set_now(0);
        with_test_wheel::<&str, 8, _>(2, |wheel| {
            let old = wheel.schedule_after(Duration::new(3), "old").unwrap();
            assert!(wheel.cancel(&old));
            assert!(!wheel.cancel(&old), "cancel is not idempotent");
            let _new = wheel.schedule_after(Duration::new(3), "new").unwrap();

            set_now(5);
            let mut fired = Vec::new();
            wheel.tick_now(|_, payload| fired.push(payload));
            assert_eq!(fired, vec!["new"]);
        });
    }

    #[test]
    fn capacity_exhaustion_returns_error() {
        set_now(0);
        with_test_wheel::<u32, 4, _>(1, |wheel| {
            let _held = wheel.schedule_after(Duration::new(1), 1).unwrap();
            let err = wheel.schedule_after(Duration::new(1), 2).unwrap_err();
            assert_eq!(err, WheelError::Capacity);
        });
    }

    #[test]
    fn delay_beyond_one_rotation_is_rejected() {
        set_now(0);
        with_test_wheel::<u32, 4, _>(2, |wheel| {
            let err = wheel.schedule_after(Duration::new(4), 1).unwrap_err();
            assert_eq!(err, WheelError::DelayTooLong { delay: 4, max: 3 });
            assert!(wheel.schedule_after(Duration::new(3), 1).is_ok());
        });
    }

    #[test]
    fn explicit_instants_behind_cursor_use_cursor() {
        set_now(0);
        with_test_wheel::<u32, 8, _>(4, |wheel| {
            wheel.tick_at(MonoInstant::new(5), |_, _| {});

            let handle = wheel
                .schedule_after_at(MonoInstant::new(3), Duration::new(1), 9)
                .unwrap();
            let mut fired = Vec::new();

            wheel.tick_at(MonoInstant::new(5), |h, payload| fired.push((h, payload)));
            assert!(fired.is_empty());

            wheel.tick_at(MonoInstant::new(6), |h, payload| fired.push((h, payload)));
            assert_eq!(fired, vec![(handle, 9)]);
        });
    }
}
