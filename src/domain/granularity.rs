use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of distinct traces below which trace-level aggregation is
/// used instead of time-bucket aggregation. The Time-Series Assembler caps
/// its raw result at the same constant, so the probe and the point list can
/// never disagree.
pub const RAW_THRESHOLD: i64 = 50;

/// Time-series resolution: per-trace points, or one of the time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Trace,
    Minute,
    Hour,
    Day,
    Week,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Trace => write!(f, "trace"),
            Granularity::Minute => write!(f, "minute"),
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
            Granularity::Week => write!(f, "week"),
        }
    }
}

/// Selects time-series granularity based on both the window duration and the
/// actual number of data points.
///
/// If `count <= RAW_THRESHOLD`, returns [`Granularity::Trace`] (per-trace
/// points regardless of duration, ideal for monitors that are just starting
/// out). Otherwise picks a time bucket from the duration:
///
/// ```text
/// <= 6 hours → minute
/// <= 7 days  → hour
/// <= 28 days → day
/// > 28 days  → week
/// ```
pub fn calculate_adaptive_granularity(duration: Duration, count: i64) -> Granularity {
    if count <= RAW_THRESHOLD {
        return Granularity::Trace;
    }

    if duration <= Duration::hours(6) {
        Granularity::Minute
    } else if duration <= Duration::days(7) {
        Granularity::Hour
    } else if duration <= Duration::days(28) {
        Granularity::Day
    } else {
        Granularity::Week
    }
}
