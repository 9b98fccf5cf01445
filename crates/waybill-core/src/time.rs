//! Clock abstraction shared by services, stores and workers.
//!
//! Every "now" in waybill (initial status decisions, claim due checks, the
//! redispatch cutoff, tick sleeps) comes from an injected [`Clock`], so the
//! whole pipeline can be driven deterministically in tests.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of time for waybill components.
///
/// Production code uses [`RealClock`]; tests inject a [`TestClock`].
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Returns the current wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Sleeps for the specified duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks advance
    /// virtual time instead.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Clones share the same underlying time, so a clock handed to a service and
/// kept by the test observe the same advances.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Monotonic time in nanoseconds since creation
    monotonic_ns: Arc<AtomicU64>,
    /// Wall-clock time as nanoseconds since UNIX_EPOCH
    system_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX)
}

impl TestClock {
    /// Creates a test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific system time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            base_instant: Instant::now(),
        }
    }

    /// Creates a test clock starting at a UTC timestamp.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::with_start_time(SystemTime::from(start))
    }

    /// Advances both clocks by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = saturating_nanos(duration);
        self.monotonic_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.system_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Jumps the wall clock to a specific UTC timestamp.
    ///
    /// Wall-clock time may move backwards; monotonic time never does.
    pub fn jump_to(&self, time: DateTime<Utc>) {
        let target = SystemTime::from(time);
        let target_ns = saturating_nanos(target.duration_since(UNIX_EPOCH).unwrap_or_default());
        let current_ns = self.system_ns.load(Ordering::Acquire);

        if target_ns > current_ns {
            self.advance(Duration::from_nanos(target_ns - current_ns));
        } else {
            self.system_ns.store(target_ns, Ordering::Release);
        }
    }

    /// Returns elapsed monotonic time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let elapsed_ns = self.monotonic_ns.load(Ordering::Acquire);
        self.base_instant + Duration::from_nanos(elapsed_ns)
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};

    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().unwrap_or_default();
        let clock = TestClock::at(start);
        let instant = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(instant), Duration::from_secs(90));
        assert_eq!(clock.now_utc(), start + chrono::TimeDelta::seconds(90));
    }

    #[test]
    fn jump_to_can_rewind_wall_clock() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).single().unwrap_or_default();
        let clock = TestClock::at(start);

        let earlier = start - chrono::TimeDelta::hours(13);
        clock.jump_to(earlier);

        assert_eq!(clock.now_utc().hour(), 10);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(5));
    }
}
