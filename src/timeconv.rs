//! Epoch timestamp conversion for session rows
//!
//! Session records carry `created_at` as epoch milliseconds. Two distinct
//! derivations are exposed and must stay distinct:
//!
//! - [`epoch_ms_to_naive`] truncates to whole seconds and reads the result
//!   as a UTC-naive calendar date/time. This reproduces the derivation the
//!   rest of the platform has always used for the plain `created_at_date` /
//!   `created_at_time` columns, so day bucketing stays consistent with
//!   historical reports.
//! - [`epoch_ms_to_central`] converts through the America/Chicago timezone
//!   with full DST handling for the user-facing `_central` columns.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// Reference timezone for the user-facing `_central` columns.
pub const REFERENCE_TZ: Tz = chrono_tz::America::Chicago;

fn instant_from_millis(epoch_ms: i64) -> DateTime<Utc> {
    // Out-of-range values clamp to the epoch rather than failing; any
    // representable instant converts.
    DateTime::from_timestamp_millis(epoch_ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// UTC-naive calendar date and time-of-day from epoch milliseconds.
///
/// Sub-second precision is discarded by integer division, matching the
/// historical derivation of the plain date/time columns.
pub fn epoch_ms_to_naive(epoch_ms: i64) -> (NaiveDate, NaiveTime) {
    let instant = DateTime::from_timestamp(epoch_ms.div_euclid(1000), 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .naive_utc();
    (instant.date(), instant.time())
}

/// Calendar date and time-of-day in the reference timezone (America/Chicago).
pub fn epoch_ms_to_central(epoch_ms: i64) -> (NaiveDate, NaiveTime) {
    let central = instant_from_millis(epoch_ms).with_timezone(&REFERENCE_TZ);
    (central.date_naive(), central.time())
}
