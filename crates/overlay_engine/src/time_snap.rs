//! Snapping instants onto the sample grids of each data source.
//!
//! Realtime prices arrive every 5 minutes, flows are hourly and the
//! forecast raster model emits a sample at every UTC hour divisible by 3.
//! All functions here are total, pure and idempotent; sub-second precision
//! is discarded.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

const FIVE_MINUTES_SECS: i64 = 5 * 60;
const HOUR_SECS: i64 = 60 * 60;
const THREE_HOURS_SECS: i64 = 3 * HOUR_SECS;

fn from_secs(secs: i64) -> DateTime<Utc> {
    // Every input came from a valid DateTime, and flooring or rounding by at
    // most three hours stays inside chrono's range except at its very edges.
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn floor_to(instant: DateTime<Utc>, step_secs: i64) -> DateTime<Utc> {
    let secs = instant.timestamp();
    from_secs(secs - secs.rem_euclid(step_secs))
}

/// Start of the 5-minute interval containing `instant`.
pub fn snap_to_five_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(instant, FIVE_MINUTES_SECS)
}

/// Start of the hour containing `instant`.
pub fn snap_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    floor_to(instant, HOUR_SECS)
}

/// Nearest UTC hour divisible by 3; exact midpoints round forward.
pub fn snap_to_three_hour_utc(instant: DateTime<Utc>) -> DateTime<Utc> {
    let secs = instant.timestamp();
    let offset = secs.rem_euclid(THREE_HOURS_SECS);
    let floor = secs - offset;
    if offset * 2 >= THREE_HOURS_SECS {
        from_secs(floor + THREE_HOURS_SECS)
    } else {
        from_secs(floor)
    }
}

/// Every 3-hour step within `window_hours` of `center`, ordered closest first.
///
/// Ties (equal distance before and after) put the earlier step first.
pub fn three_hour_steps(center: DateTime<Utc>, window_hours: i64) -> Vec<DateTime<Utc>> {
    let window = Duration::hours(window_hours.max(0));
    let anchor = snap_to_three_hour_utc(center);
    let first = snap_to_three_hour_utc(center - window);
    let last = snap_to_three_hour_utc(center + window);

    let mut steps = Vec::new();
    let mut step = first;
    while step <= last {
        steps.push(step);
        step += Duration::hours(3);
    }
    steps.sort_by_key(|s| ((*s - anchor).num_seconds().abs(), *s));
    steps
}

/// Canonical ISO form used in cache keys and logs, e.g. `2026-03-01T15:00:00Z`.
pub fn iso_step(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
