//! Small formatting helpers shared across snapshot code.

use std::time::{SystemTime, UNIX_EPOCH};

/// Formats a wall-clock instant as `HH:MM:SS` (UTC).
pub(crate) fn fmt_clock_time(t: SystemTime) -> String {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let day = secs % 86_400;
    format!("{:02}:{:02}:{:02}", day / 3600, (day % 3600) / 60, day % 60)
}
