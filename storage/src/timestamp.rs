use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, StorageError};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Fixed-point (seconds, nanoseconds) stamp carried alongside stored data.
///
/// Ordering is lexicographic on `(seconds, nanoseconds)`; the field order of the
/// derive is what makes that hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Result<Self> {
        if nanoseconds >= NANOS_PER_SEC {
            return Err(StorageError::InvalidTimestamp(format!(
                "nanoseconds out of range: {}",
                nanoseconds
            )));
        }
        Ok(Self { seconds, nanoseconds })
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self {
            seconds: time.timestamp(),
            nanoseconds: time.timestamp_subsec_nanos().min(NANOS_PER_SEC - 1),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_out_of_range_nanoseconds() {
        assert!(Timestamp::new(1, 999_999_999).is_ok());
        assert!(matches!(
            Timestamp::new(1, 1_000_000_000),
            Err(StorageError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn display_pads_nanoseconds() {
        let ts = Timestamp::new(123, 456789).unwrap();
        assert_eq!(ts.to_string(), "123.000456789");
    }

    #[test]
    fn now_is_after_epoch() {
        let ts = Timestamp::now();
        assert!(ts.seconds() > 0);
        assert!(ts.nanoseconds() < NANOS_PER_SEC);
    }

    proptest! {
        #[test]
        fn order_follows_seconds_then_nanoseconds(
            s1 in -1_000_000i64..1_000_000, n1 in 0u32..NANOS_PER_SEC,
            s2 in -1_000_000i64..1_000_000, n2 in 0u32..NANOS_PER_SEC,
        ) {
            let a = Timestamp::new(s1, n1).unwrap();
            let b = Timestamp::new(s2, n2).unwrap();
            prop_assert_eq!(a.cmp(&b), (s1, n1).cmp(&(s2, n2)));
        }
    }
}
