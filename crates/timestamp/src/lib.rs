//! A microsecond-precision UTC timestamp for knowledge item lifecycles.

#[allow(missing_docs)]
mod error;

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub use crate::error::{TimestampError, TimestampResult};

/// One million
pub const MM: i64 = 1_000_000;

/// A microsecond-precision UTC timestamp.
///
/// Timestamps arrive from remote agents and are untrusted: the full `i64` range
/// is representable and every arithmetic operation is overflow-checked rather
/// than panicking.
///
/// Serializes as the raw microsecond count so the value survives any wire
/// encoding unchanged.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct Timestamp(
    i64, // microseconds from UNIX Epoch, positive or negative
);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(feature = "now")]
        {
            let (secs, nsecs) = self.as_seconds_and_nanos();
            if let Some(ts) = chrono::DateTime::from_timestamp(secs, nsecs) {
                return write!(
                    f,
                    "{}",
                    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
                );
            }
        }
        write!(f, "({}μs)", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self)
    }
}

#[cfg(feature = "now")]
impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(t: chrono::DateTime<chrono::Utc>) -> Self {
        Timestamp(t.timestamp() * MM + t.timestamp_subsec_micros() as i64)
    }
}

#[cfg(feature = "now")]
impl std::str::FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(t: &str) -> Result<Self, Self::Err> {
        let t = chrono::DateTime::parse_from_rfc3339(t)
            .map_err(|e| TimestampError::Parse(e.to_string()))?;
        Ok(t.with_timezone(&chrono::Utc).into())
    }
}

/// Anything convertible into a `Duration` can be used as an overflow-checked,
/// forward-only offset.
impl<D: Into<Duration>> Add<D> for Timestamp {
    type Output = TimestampResult<Timestamp>;

    fn add(self, rhs: D) -> Self::Output {
        self.checked_add(&rhs.into())
            .ok_or(TimestampError::Overflow)
    }
}

impl<D: Into<Duration>> Sub<D> for Timestamp {
    type Output = TimestampResult<Timestamp>;

    fn sub(self, rhs: D) -> Self::Output {
        self.checked_sub(&rhs.into())
            .ok_or(TimestampError::Overflow)
    }
}

impl Timestamp {
    /// The smallest possible Timestamp
    pub const MIN: Timestamp = Timestamp(i64::MIN);
    /// The largest possible Timestamp
    pub const MAX: Timestamp = Timestamp(i64::MAX);
    /// The UNIX epoch
    pub const ZERO: Timestamp = Timestamp(0);

    /// The current wall-clock time.
    #[cfg(feature = "now")]
    pub fn now() -> Self {
        chrono::Utc::now().into()
    }

    /// Construct from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Construct from milliseconds, saturating at the representable range.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1000))
    }

    /// Access time as microseconds since UNIX epoch
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// Access time as whole milliseconds since UNIX epoch
    pub fn as_millis(&self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Access seconds since UNIX epoch plus nanosecond offset
    pub fn as_seconds_and_nanos(&self) -> (i64, u32) {
        let secs = self.0.div_euclid(MM);
        let nsecs = self.0.rem_euclid(MM) * 1000;
        (secs, nsecs as u32)
    }

    /// Add an unsigned duration, `None` on overflow.
    pub fn checked_add(&self, rhs: &Duration) -> Option<Timestamp> {
        let micros = i64::try_from(rhs.as_micros()).ok()?;
        Some(Self(self.0.checked_add(micros)?))
    }

    /// Subtract an unsigned duration, `None` on overflow.
    pub fn checked_sub(&self, rhs: &Duration) -> Option<Timestamp> {
        let micros = i64::try_from(rhs.as_micros()).ok()?;
        Some(Self(self.0.checked_sub(micros)?))
    }

    /// Add a duration, clamping to MAX if overflow
    pub fn saturating_add(&self, rhs: &Duration) -> Timestamp {
        self.checked_add(rhs).unwrap_or(Self::MAX)
    }

    /// Subtract a duration, clamping to MIN if overflow
    pub fn saturating_sub(&self, rhs: &Duration) -> Timestamp {
        self.checked_sub(rhs).unwrap_or(Self::MIN)
    }

    /// Unsigned distance from `earlier` to `self`, or `None` if `earlier` is
    /// actually later.
    pub fn duration_since(&self, earlier: &Timestamp) -> Option<Duration> {
        let micros = self.0.checked_sub(earlier.0)?;
        u64::try_from(micros).ok().map(Duration::from_micros)
    }
}
