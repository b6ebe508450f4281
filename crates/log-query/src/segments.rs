//! Time range partitioning for sharded queries

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

/// Split `[start, end]` into `count` contiguous segments.
///
/// Returns `count + 1` non-decreasing boundaries; the first is `start` and
/// the last is exactly `end`, so integer rounding of the step never drops the
/// tail of the range. A zero-length range yields identical boundaries.
pub fn divide_time_segments(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let count = count.max(1);
    let divisor = i32::try_from(count).unwrap_or(i32::MAX);
    let step = (end - start) / divisor;

    let mut boundaries: Vec<DateTime<Utc>> = (0..divisor).map(|i| start + step * i).collect();
    boundaries.push(end);
    boundaries
}

/// Base filter narrowed to one segment.
///
/// Segments are half-open except the last, which includes `end`.
pub fn segment_filter(
    base: &str,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    is_last: bool,
) -> String {
    let upper = if is_last { "<=" } else { "<" };
    let bounds = format!(
        "timestamp >= \"{}\"\ntimestamp {upper} \"{}\"",
        begin.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        end.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    );
    let base = base.trim();
    if base.is_empty() {
        bounds
    } else {
        format!("{base}\n{bounds}")
    }
}

/// How far through its segment a shard is, given the latest entry timestamp.
///
/// Clamped to `[0, 1]`; a zero-width segment is always complete.
pub fn segment_progress(
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    timestamp: DateTime<Utc>,
) -> f64 {
    let width = nanos(end - begin);
    if width <= 0.0 {
        return 1.0;
    }
    (nanos(timestamp - begin) / width).clamp(0.0, 1.0)
}

/// Nanoseconds in `delta`, falling back to millisecond precision when the
/// span overflows an `i64` of nanoseconds (about 292 years).
fn nanos(delta: TimeDelta) -> f64 {
    delta
        .num_nanoseconds()
        .map(|n| n as f64)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 * 1e6)
}
