//! Timestamp handling.
//!
//! Internal times are milliseconds since the Unix epoch; JWT claims carry
//! seconds. [`UnixMillis`] is the only internal representation, with explicit
//! conversions at the claim boundary so the two precisions never mix silently.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;
use time::OffsetDateTime;

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UnixMillis(pub i64);

impl UnixMillis {
    /// Current time.
    #[must_use]
    pub fn now() -> Self {
        Self((OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64)
    }

    /// Constructs from raw milliseconds.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Constructs from whole seconds (e.g. a JWT claim).
    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Raw milliseconds.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Whole seconds, truncating — the representation used in JWT claims.
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns `true` if this instant is in the past.
    #[must_use]
    pub fn is_past(&self) -> bool {
        self.is_before(Self::now())
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub fn millis_since(&self, earlier: Self) -> i64 {
        (self.0 - earlier.0).max(0)
    }

    /// Converts to an [`OffsetDateTime`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is outside the representable range.
    pub fn to_datetime(&self) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * 1_000_000)
            .map_err(|e| CoreError::invalid_timestamp(format!("{} ms: {e}", self.0)))
    }
}

impl Add<Duration> for UnixMillis {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_millis() as i64)
    }
}

impl Sub<Duration> for UnixMillis {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - rhs.as_millis() as i64)
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(dt) => match dt.format(&time::format_description::well_known::Rfc3339) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "{}ms", self.0),
            },
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_reasonable() {
        let now = UnixMillis::now();
        // After 2020-01-01 and before 2100-01-01.
        assert!(now.0 > 1_577_836_800_000);
        assert!(now.0 < 4_102_444_800_000);
    }

    #[test]
    fn test_seconds_conversion_truncates() {
        let t = UnixMillis::from_millis(1_700_000_000_999);
        assert_eq!(t.as_secs(), 1_700_000_000);
        assert_eq!(UnixMillis::from_secs(1_700_000_000).as_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_duration_arithmetic() {
        let t = UnixMillis::from_millis(1000);
        assert_eq!((t + Duration::from_secs(2)).as_millis(), 3000);
        assert_eq!((t - Duration::from_millis(400)).as_millis(), 600);
    }

    #[test]
    fn test_ordering_and_elapsed() {
        let a = UnixMillis::from_millis(1000);
        let b = UnixMillis::from_millis(2500);
        assert!(a.is_before(b));
        assert_eq!(b.millis_since(a), 1500);
        assert_eq!(a.millis_since(b), 0);
    }

    #[test]
    fn test_display_rfc3339() {
        let t = UnixMillis::from_secs(1_700_000_000);
        assert!(t.to_string().starts_with("2023-11-14T"));
    }

    #[test]
    fn test_serde_transparent() {
        let t = UnixMillis::from_millis(42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "42");
        let back: UnixMillis = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
