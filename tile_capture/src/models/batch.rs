//! Batch stamps identify one capture cycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `strftime` pattern of a rendered [`BatchStamp`].
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Length in bytes of a rendered stamp, e.g. `20240314-093000`.
pub const STAMP_LEN: usize = 15;

/// The stamp text did not match `YYYYMMDD-HHMMSS`.
#[derive(Debug, Error, PartialEq)]
#[error("invalid batch stamp {0:?}, expected YYYYMMDD-HHMMSS")]
pub struct StampParseError(pub String);

/// UTC capture time at second precision.
///
/// Rendered stamps sort lexicographically in time order, which is what makes
/// tile keys usable as a replication cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchStamp(NaiveDateTime);

impl BatchStamp {
    /// Stamp for the current instant.
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    /// Stamp for `at`, truncated to whole seconds.
    pub fn from_utc(at: DateTime<Utc>) -> Self {
        Self(at.naive_utc().trunc_subsecs(0))
    }

    /// The stamp as a naive UTC timestamp.
    pub fn naive_utc(&self) -> NaiveDateTime {
        self.0
    }
}

impl From<NaiveDateTime> for BatchStamp {
    fn from(value: NaiveDateTime) -> Self {
        Self(value.trunc_subsecs(0))
    }
}

impl fmt::Display for BatchStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(STAMP_FORMAT))
    }
}

impl FromStr for BatchStamp {
    type Err = StampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != STAMP_LEN {
            return Err(StampParseError(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, STAMP_FORMAT)
            .map(Self)
            .map_err(|_| StampParseError(s.to_string()))
    }
}
