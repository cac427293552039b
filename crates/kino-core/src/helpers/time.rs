// crates/kino-core/src/helpers/time.rs
//
// Human-readable timestamps for the window title and seek log lines.

/// Format a duration in seconds as `H:MM:SS` (hours unpadded, like the
/// seek-percentage log line).
///
/// ```
/// use kino_core::helpers::time::format_hms;
/// assert_eq!(format_hms(0.0),    "0:00:00");
/// assert_eq!(format_hms(61.0),   "0:01:01");
/// assert_eq!(format_hms(3875.0), "1:04:35");
/// ```
pub fn format_hms(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Format a duration in seconds as a compact human-readable string for the
/// window title: `M:SS` below an hour, `H:MM:SS` above.
///
/// ```
/// use kino_core::helpers::time::format_duration;
/// assert_eq!(format_duration(187.0),  "3:07");
/// assert_eq!(format_duration(3875.0), "1:04:35");
/// ```
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    if total >= 3600 {
        format_hms(secs)
    } else {
        format!("{}:{:02}", total / 60, total % 60)
    }
}
