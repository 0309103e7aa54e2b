//! Timeout: add a deadline to an effect.
//!
//! A timeout races the effect against a timer with
//! [`race_first`](crate::Effect::race_first). If the timer wins, the effect is
//! interrupted and drained before the timeout is reported.
//!
//! # Algebraic Law: Timeout Composition
//!
//! ```text
//! timeout(d1, timeout(d2, f)) ≃ timeout(min(d1, d2), f)
//! ```

use crate::effect::Effect;
use crate::error::TimeoutError;
use crate::types::Value;
use std::time::Duration;

impl<A: Value, E: Value> Effect<A, E> {
    /// Fails with [`TimeoutError`] if this effect does not finish within
    /// `duration`.
    pub fn timeout(self, duration: Duration) -> Self
    where
        E: From<TimeoutError>,
    {
        self.timeout_fail(duration, move || TimeoutError { duration }.into())
    }

    /// Returns `None` if this effect does not finish within `duration`.
    pub fn timeout_option(self, duration: Duration) -> Effect<Option<A>, E> {
        self.timeout_to(duration, None, Some)
    }

    /// Fails with `make()` if this effect does not finish within `duration`.
    pub fn timeout_fail(self, duration: Duration, make: impl Fn() -> E + Send + Sync + 'static) -> Self {
        let timer = Effect::<(), E>::sleep(duration).flat_map(move |()| Self::fail(make()));
        self.race_first(timer)
    }

    /// Maps the value with `on_time`, or produces `on_timeout` if the effect
    /// does not finish within `duration`.
    pub fn timeout_to<B: Value>(
        self,
        duration: Duration,
        on_timeout: B,
        on_time: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> Effect<B, E> {
        let timer = Effect::<(), E>::sleep(duration).as_value(on_timeout);
        self.map(on_time).race_first(timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Ref;
    use crate::test_utils::test_runtime;
    use crate::types::{Exit, Never};
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum FetchError {
        Timeout(Duration),
    }

    impl From<TimeoutError> for FetchError {
        fn from(err: TimeoutError) -> Self {
            Self::Timeout(err.duration)
        }
    }

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn slow_effect_times_out_and_is_interrupted() {
        init_test("slow_effect_times_out_and_is_interrupted");
        let runtime = test_runtime();
        let interrupted = Ref::new(false);
        let slow = Effect::<u32, FetchError>::succeed(1)
            .delay(Duration::from_millis(500))
            .on_interrupt(interrupted.set(true));
        let started = Instant::now();
        let exit = runtime.run_sync_exit(slow.timeout(Duration::from_millis(20)));
        assert_eq!(exit, Exit::fail(FetchError::Timeout(Duration::from_millis(20))));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(interrupted.get_now());
        crate::test_complete!("slow_effect_times_out_and_is_interrupted");
    }

    #[test]
    fn fast_effect_keeps_its_value() {
        init_test("fast_effect_keeps_its_value");
        let runtime = test_runtime();
        let fast = Effect::<u32, TimeoutError>::succeed(7);
        assert_eq!(runtime.run_sync(fast.timeout(Duration::from_secs(5))).ok(), Some(7));
        crate::test_complete!("fast_effect_keeps_its_value");
    }

    #[test]
    fn option_fail_and_to_variants() {
        init_test("option_fail_and_to_variants");
        let runtime = test_runtime();
        let slow = || Effect::<u32, String>::never();
        assert_eq!(
            runtime.run_sync(slow().timeout_option(Duration::from_millis(5))).ok(),
            Some(None)
        );
        assert_eq!(
            runtime.run_sync_exit(slow().timeout_fail(Duration::from_millis(5), || "late".into())),
            Exit::fail("late".to_string())
        );
        let mapped = Effect::<u32, Never>::succeed(2).timeout_to(Duration::from_secs(1), 0, |n| n * 10);
        assert_eq!(runtime.run_sync(mapped).ok(), Some(20));
        crate::test_complete!("option_fail_and_to_variants");
    }

    #[test]
    fn uninterruptible_work_delays_the_timeout() {
        init_test("uninterruptible_work_delays_the_timeout");
        let runtime = test_runtime();
        let finished = Ref::new(false);
        let work = Effect::<(), FetchError>::sleep(Duration::from_millis(150))
            .zip_right(finished.set(true))
            .as_value(1u32)
            .uninterruptible();
        let started = Instant::now();
        let exit = runtime.run_sync_exit(work.timeout(Duration::from_millis(10)));
        assert_eq!(exit, Exit::fail(FetchError::Timeout(Duration::from_millis(10))));
        assert!(
            started.elapsed() >= Duration::from_millis(150),
            "returned after {:?}",
            started.elapsed()
        );
        assert!(finished.get_now(), "the work ran to completion before the timeout returned");
        crate::test_complete!("uninterruptible_work_delays_the_timeout");
    }

    #[test]
    fn disconnected_work_times_out_promptly_and_finishes_in_background() {
        init_test("disconnected_work_times_out_promptly_and_finishes_in_background");
        let runtime = test_runtime();
        let finished = Ref::new(false);
        let work = Effect::<(), FetchError>::sleep(Duration::from_millis(300))
            .zip_right(finished.set(true))
            .as_value(1u32)
            .uninterruptible();
        let started = Instant::now();
        let exit = runtime.run_sync_exit(work.disconnect().timeout(Duration::from_millis(10)));
        assert_eq!(exit, Exit::fail(FetchError::Timeout(Duration::from_millis(10))));
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "returned after {:?}",
            started.elapsed()
        );
        assert!(!finished.get_now(), "the work is still running");

        let deadline = Instant::now() + Duration::from_secs(2);
        while !finished.get_now() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(finished.get_now(), "the detached work finished on its own");
        crate::test_complete!("disconnected_work_times_out_promptly_and_finishes_in_background");
    }
}
