//! Unix-millisecond helpers.
//!
//! Fixed windows are aligned to the Unix epoch, so components convert
//! `SystemTime` to whole milliseconds before doing arithmetic.

use serde::Serializer;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Times before the epoch read as 0.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().try_into().unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Inverse of [`unix_millis`].
pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Whole seconds from `now_ms` until `until_ms`, rounded up.
pub fn secs_until_ceil(now_ms: u64, until_ms: u64) -> u64 {
    until_ms.saturating_sub(now_ms).div_ceil(1000)
}

pub(crate) fn serialize_unix_millis<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(unix_millis(*time))
}

pub(crate) fn serialize_opt_unix_millis<S>(
    time: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(t) => serializer.serialize_some(&unix_millis(*t)),
        None => serializer.serialize_none(),
    }
}
