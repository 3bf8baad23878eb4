//! Absolute wall-clock time and the [`Clock`] abstraction the rest of the
//! crate reads time through.
//!
//! The wire format and the lease journal both speak in absolute seconds
//! since the Unix epoch, so [`AbsTime`] is that and nothing more. Arithmetic
//! on it never panics: an overflow saturates to [`AbsTime::MAX`], matching
//! the "clamp to max on overflow" invariant in the data model.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Absolute wall-clock time, whole seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbsTime(u64);

impl AbsTime {
    /// The largest representable instant; overflowing arithmetic clamps here.
    pub const MAX: AbsTime = AbsTime(u64::MAX);

    /// The epoch itself.
    pub const ZERO: AbsTime = AbsTime(0);

    /// Build from a raw seconds-since-epoch value.
    pub const fn from_secs(secs: u64) -> Self {
        AbsTime(secs)
    }

    /// Raw seconds-since-epoch value.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// `self + dur`, saturating at [`AbsTime::MAX`].
    pub fn saturating_add(self, dur: Duration) -> Self {
        AbsTime(self.0.saturating_add(dur.as_secs()))
    }

    /// `self - dur`, clamped to [`AbsTime::ZERO`].
    pub fn saturating_sub(self, dur: Duration) -> Self {
        AbsTime(self.0.saturating_sub(dur.as_secs()))
    }

    /// `self + secs`, saturating at [`AbsTime::MAX`]; `secs` may be negative,
    /// in which case negative results clamp to [`AbsTime::ZERO`] per the
    /// "negative offsets clamp to zero" rule used when converting relative
    /// lease offsets to absolute time.
    pub fn offset_by(self, secs: i64) -> Self {
        if secs >= 0 {
            self.saturating_add(Duration::from_secs(secs as u64))
        } else {
            AbsTime(self.0.saturating_sub(secs.unsigned_abs()))
        }
    }

    /// Seconds remaining until `self`, or `Duration::ZERO` if already past.
    pub fn saturating_duration_since(self, earlier: AbsTime) -> Duration {
        Duration::from_secs(self.0.saturating_sub(earlier.0))
    }

    /// Whether `self` is strictly in the past relative to `now`.
    pub fn has_passed(self, now: AbsTime) -> bool {
        self <= now
    }
}

/// Source of wall-clock time, so the state machine and journal never call
/// [`SystemTime::now`] directly and can be driven deterministically in
/// tests.
pub trait Clock {
    /// Current wall-clock time.
    fn now(&self) -> AbsTime;

    /// A pseudo-random, sub-second jitter in `[0, max)`, used to avoid
    /// retransmit lockstep between clock-synchronized peers.
    fn jitter(&self, max: Duration) -> Duration;

    /// A pseudo-random value in `[0, bound)`, used for backoff and lease-time
    /// randomization.
    fn rand_below(&self, bound: u32) -> u32;

    /// A full-range pseudo-random value, used to pick a fresh `xid`.
    fn random_u32(&self) -> u32;
}

/// The real clock: [`SystemTime::now`] plus [`rand`] for jitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> AbsTime {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        AbsTime::from_secs(secs)
    }

    fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let micros = max.as_micros().min(u128::from(u32::MAX)) as u32;
        Duration::from_micros(u64::from(rand::random::<u32>() % micros.max(1)))
    }

    fn rand_below(&self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            rand::random::<u32>() % bound
        }
    }

    fn random_u32(&self) -> u32 {
        rand::random()
    }
}

/// A manually-advanced clock for deterministic tests. Not used by the
/// binary; kept `pub` so integration tests outside this crate can drive
/// the state machine without real time passing.
#[derive(Debug)]
pub struct FakeClock {
    now: std::cell::Cell<AbsTime>,
    next_rand: std::cell::Cell<u32>,
}

impl FakeClock {
    /// A fake clock starting at `start`, with jitter/randomness fixed at
    /// zero unless overridden with [`FakeClock::set_rand`].
    pub fn new(start: AbsTime) -> Self {
        FakeClock {
            now: std::cell::Cell::new(start),
            next_rand: std::cell::Cell::new(0),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get().saturating_add(Duration::from_secs(secs)));
    }

    /// Jump straight to `t`.
    pub fn set(&self, t: AbsTime) {
        self.now.set(t);
    }

    /// Fix the value every `rand_below`/`jitter` call returns next.
    pub fn set_rand(&self, value: u32) {
        self.next_rand.set(value);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> AbsTime {
        self.now.get()
    }

    fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            return Duration::ZERO;
        }
        let micros = max.as_micros().max(1) as u32;
        Duration::from_micros(u64::from(self.next_rand.get() % micros))
    }

    fn rand_below(&self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.next_rand.get() % bound
        }
    }

    fn random_u32(&self) -> u32 {
        self.next_rand.get()
    }
}
