//! Retry and repeat policies.
//!
//! A [`Schedule`] is a pure function from the number of recurrences already
//! performed to the delay before the next one. `None` means stop. Schedules
//! hold no state, so one value can drive any number of concurrent retries.
//!
//! ```ignore
//! // Up to five retries, doubling from 10ms, never waiting more than 200ms.
//! let policy = Schedule::exponential(Duration::from_millis(10))
//!     .capped(Duration::from_millis(200))
//!     .compose(Schedule::recurs(5));
//! ```
//!
//! # Composition
//!
//! - [`compose`](Schedule::compose) / [`intersect`](Schedule::intersect):
//!   continue while both continue, using the larger delay
//! - [`union`](Schedule::union): continue while either continues, using the
//!   smaller delay
//! - [`and_then`](Schedule::and_then): run one schedule to exhaustion, then
//!   the other from its start

use crate::util::{mix_seed, DetRng};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Step = Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>;

/// A stateless recurrence policy.
#[derive(Clone)]
pub struct Schedule {
    step: Step,
    description: Arc<str>,
}

impl Schedule {
    fn from_fn(
        description: impl Into<Arc<str>>,
        step: impl Fn(u32) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        Self {
            step: Arc::new(step),
            description: description.into(),
        }
    }

    /// Recurs forever, waiting `interval` each time.
    pub fn fixed(interval: Duration) -> Self {
        Self::from_fn(format!("fixed({interval:?})"), move |_| Some(interval))
    }

    /// Recurs forever with `interval` between the end of one run and the
    /// start of the next. Without run-time state this waits the same as
    /// [`fixed`](Self::fixed).
    pub fn spaced(interval: Duration) -> Self {
        Self::from_fn(format!("spaced({interval:?})"), move |_| Some(interval))
    }

    /// Recurs forever, doubling the delay from `base`.
    pub fn exponential(base: Duration) -> Self {
        Self::exponential_with(base, 2.0)
    }

    /// Recurs forever, multiplying the delay by `factor` from `base`.
    pub fn exponential_with(base: Duration, factor: f64) -> Self {
        Self::from_fn(format!("exponential({base:?}, {factor})"), move |n| {
            let exponent = i32::try_from(n).unwrap_or(i32::MAX);
            Some(scale(base, factor.powi(exponent)))
        })
    }

    /// Recurs forever with delays following the Fibonacci sequence from
    /// `base`: `base, base, 2*base, 3*base, 5*base, ...`.
    pub fn fibonacci(base: Duration) -> Self {
        Self::from_fn(format!("fibonacci({base:?})"), move |n| {
            let (mut a, mut b) = (1u32, 1u32);
            for _ in 0..n {
                let next = a.saturating_add(b);
                a = b;
                b = next;
            }
            Some(base.saturating_mul(a))
        })
    }

    /// Recurs `times` times without delay.
    pub fn recurs(times: u32) -> Self {
        Self::from_fn(format!("recurs({times})"), move |n| {
            (n < times).then_some(Duration::ZERO)
        })
    }

    /// Recurs once without delay.
    pub fn once() -> Self {
        Self::recurs(1)
    }

    /// Recurs forever without delay.
    pub fn forever() -> Self {
        Self::from_fn("forever", |_| Some(Duration::ZERO))
    }

    /// Never recurs.
    pub fn stop() -> Self {
        Self::from_fn("stop", |_| None)
    }

    /// Scales each delay by a random factor in `[0.8, 1.2)`.
    pub fn jittered(self) -> Self {
        self.jittered_with(0.8, 1.2)
    }

    /// Scales each delay by a random factor in `[min, max)`.
    pub fn jittered_with(self, min: f64, max: f64) -> Self {
        let seed = DetRng::from_entropy().next_u64();
        self.jitter(seed, min, max)
    }

    /// Like [`jittered`](Self::jittered) with a fixed seed: the same seed
    /// always yields the same delays.
    pub fn jittered_seeded(self, seed: u64) -> Self {
        self.jitter(seed, 0.8, 1.2)
    }

    fn jitter(self, seed: u64, min: f64, max: f64) -> Self {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        let description = format!("{}.jittered({low}, {high})", self.description);
        let inner = self.step;
        Self::from_fn(description, move |n| {
            inner(n).map(|delay| {
                let mut rng = DetRng::new(mix_seed(seed, u64::from(n)));
                scale(delay, low + (high - low) * rng.next_f64())
            })
        })
    }

    /// Limits every delay to at most `max`.
    pub fn capped(self, max: Duration) -> Self {
        let description = format!("{}.capped({max:?})", self.description);
        let inner = self.step;
        Self::from_fn(description, move |n| inner(n).map(|delay| delay.min(max)))
    }

    /// Stops once the total delay so far would exceed `total`.
    pub fn up_to(self, total: Duration) -> Self {
        let description = format!("{}.up_to({total:?})", self.description);
        let inner = self.step;
        Self::from_fn(description, move |n| {
            let mut elapsed = Duration::ZERO;
            for attempt in 0..=n {
                elapsed = elapsed.saturating_add(inner(attempt)?);
            }
            (elapsed <= total).then(|| inner(n)).flatten()
        })
    }

    /// Continues while both schedules continue, waiting the larger delay.
    pub fn compose(self, other: Self) -> Self {
        let description = format!("{}.compose({})", self.description, other.description);
        let (left, right) = (self.step, other.step);
        Self::from_fn(description, move |n| Some(left(n)?.max(right(n)?)))
    }

    /// Same as [`compose`](Self::compose).
    pub fn intersect(self, other: Self) -> Self {
        self.compose(other)
    }

    /// Continues while either schedule continues, waiting the smaller delay.
    pub fn union(self, other: Self) -> Self {
        let description = format!("{}.union({})", self.description, other.description);
        let (left, right) = (self.step, other.step);
        Self::from_fn(description, move |n| match (left(n), right(n)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    /// Runs this schedule until it stops, then `next` from its first step.
    pub fn and_then(self, next: Self) -> Self {
        let description = format!("{}.and_then({})", self.description, next.description);
        let (first, second) = (self.step, next.step);
        Self::from_fn(description, move |n| {
            match (0..=n).find(|&attempt| first(attempt).is_none()) {
                None => first(n),
                Some(switch) => second(n - switch),
            }
        })
    }

    /// The delay before recurrence number `attempt + 1`, or `None` to stop.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        (self.step)(attempt)
    }

    /// The first `count` delays, ending early if the schedule stops.
    pub fn delays(&self, count: u32) -> Vec<Duration> {
        (0..count).map_while(|n| self.delay(n)).collect()
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale(delay: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let nanos = (delay.as_nanos() as f64 * factor).round();
    if nanos >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schedule").field(&&*self.description).finish()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
