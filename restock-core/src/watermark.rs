//! Watermark value type.
//!
//! A watermark marks the point in source time through which the cache is
//! known to be complete. Incremental loads ask the source for everything
//! that changed after the committed watermark.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in source time the cache is known to be complete through.
///
/// Watermarks are totally ordered and only ever move forward: the tracker
/// keeps the maximum of every proposal it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    at: DateTime<Utc>,
}

impl Watermark {
    /// Create a watermark at the given source timestamp.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    /// Create a watermark at the current wall-clock time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Create a watermark from milliseconds since the Unix epoch.
    ///
    /// Out-of-range values clamp to the zero watermark.
    pub fn from_millis(millis: i64) -> Self {
        DateTime::from_timestamp_millis(millis)
            .map(Self::new)
            .unwrap_or_else(Self::zero)
    }

    /// Create a zero watermark (beginning of time).
    pub fn zero() -> Self {
        Self {
            at: DateTime::UNIX_EPOCH,
        }
    }

    /// The source timestamp.
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Returns true if nothing has been committed yet.
    pub fn is_zero(&self) -> bool {
        self.at == DateTime::UNIX_EPOCH
    }

    /// Check if this watermark is newer than another.
    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.at > other.at
    }

    /// Check if this watermark is at least as fresh as another.
    pub fn is_at_least(&self, other: &Watermark) -> bool {
        self.at >= other.at
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(at: DateTime<Utc>) -> Self {
        Self::new(at)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_ordering() {
        let w1 = Watermark::from_millis(1_000);
        let w2 = Watermark::from_millis(2_000);
        let w3 = Watermark::from_millis(2_000);

        assert!(w2.is_newer_than(&w1));
        assert!(!w1.is_newer_than(&w2));
        assert!(!w2.is_newer_than(&w3));

        assert!(w2.is_at_least(&w1));
        assert!(w2.is_at_least(&w3));
        assert!(!w1.is_at_least(&w2));
        assert_eq!(w1.max(w2), w2);
    }

    #[test]
    fn test_watermark_zero() {
        let zero = Watermark::zero();
        assert!(zero.is_zero());
        assert_eq!(zero, Watermark::default());
        assert!(!Watermark::now().is_zero());
    }

    #[test]
    fn test_from_millis_out_of_range_is_zero() {
        assert!(Watermark::from_millis(i64::MAX).is_zero());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: watermark order matches source-time order.
        #[test]
        fn prop_order_matches_millis(a in 0i64..4_000_000_000_000, b in 0i64..4_000_000_000_000) {
            let wa = Watermark::from_millis(a);
            let wb = Watermark::from_millis(b);
            prop_assert_eq!(wa.cmp(&wb), a.cmp(&b));
            prop_assert_eq!(wa.is_newer_than(&wb), a > b);
        }
    }
}
