//! Time sources.
//!
//! Every timestamp the cache records comes from a [`Clock`], so TTL behaviour
//! can be driven deterministically in tests with a [`ManualClock`].

use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::Duration;
use time::OffsetDateTime;

/// Source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> OffsetDateTime;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for earlier times.
pub(crate) fn unix_millis(at: OffsetDateTime) -> u64 {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    u64::try_from(millis).unwrap_or(0)
}

/// Nanoseconds since the Unix epoch, clamped to the `i64` range.
pub(crate) fn unix_nanos(at: OffsetDateTime) -> i64 {
    let nanos = at.unix_timestamp_nanos();
    nanos.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Inverse of [`unix_nanos`].
pub(crate) fn from_unix_nanos(nanos: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(nanos as i128).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// `start + ttl`, or `None` when that lies beyond the representable range.
pub(crate) fn deadline(start: OffsetDateTime, ttl: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| start.checked_add(ttl))
}

/// Non-negative span between two instants, as fractional seconds.
pub(crate) fn seconds_between(earlier: OffsetDateTime, later: OffsetDateTime) -> f64 {
    (later - earlier).as_seconds_f64().max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(clock.now(), OffsetDateTime::UNIX_EPOCH);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(unix_millis(clock.now()), 1500);
    }

    #[test]
    fn test_nanos_round_trip() {
        let clock = ManualClock::starting_now();
        let now = clock.now();
        assert_eq!(from_unix_nanos(unix_nanos(now)), now);
    }

    #[test]
    fn test_millis_saturate_before_epoch() {
        let before = OffsetDateTime::UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(unix_millis(before), 0);
    }

    #[test]
    fn test_seconds_between_is_non_negative() {
        let a = OffsetDateTime::UNIX_EPOCH;
        let b = a + Duration::from_secs(90);
        assert_eq!(seconds_between(a, b), 90.0);
        assert_eq!(seconds_between(b, a), 0.0);
    }
}
