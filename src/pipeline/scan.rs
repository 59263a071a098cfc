//! Corpus scanning
//!
//! Enumerates candidate records under a partition prefix, keeps those whose
//! last-modified instant falls inside the report window, then fetches and
//! parses each candidate. One malformed body never loses the rest of the
//! window: parse failures are logged and skipped. Fetches run concurrently
//! up to a worker bound, with results kept in discovery order.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::obs;
use crate::storage::{with_retry, ObjectMeta, StorageReader};
use crate::{Error, Result};

/// User-facing inclusive date window, widened to `[start, end + 1 day)` on
/// the storage last-modified axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ScanWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidArgument(format!(
                "end date {} is before start date {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Half-open bounds: start-of-day at `start`, exclusive upper bound at
    /// midnight after `end`.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let lower = self.start.and_time(NaiveTime::MIN);
        let upper = self
            .end
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN);
        (lower, upper)
    }

    /// Whether a last-modified instant falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let (lower, upper) = self.bounds();
        let naive = instant.naive_utc();
        lower <= naive && naive < upper
    }

    /// Number of calendar days covered (inclusive of both endpoints).
    pub fn days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days() + 1
    }
}

async fn fetch_one(
    store: &dyn StorageReader,
    retry: &RetryPolicy,
    meta: ObjectMeta,
) -> Result<Option<(String, Value)>> {
    let body = with_retry(retry, "get", || store.get(&meta.key)).await?;

    match serde_json::from_slice::<Value>(&body) {
        Ok(doc) => Ok(Some((meta.key, doc))),
        Err(parse_err) => {
            let err = Error::RecordParse {
                key: meta.key,
                reason: parse_err.to_string(),
            };
            warn!("Skipping record: {}", err);
            obs::record_skipped("parse");
            Ok(None)
        }
    }
}

/// Scan one partition: list, window-filter, fetch and parse.
///
/// Returns parsed documents with their storage keys, in discovery order.
/// Storage failures that survive the retry policy abort the scan; parse
/// failures only drop the affected record.
pub async fn scan_partition(
    store: &dyn StorageReader,
    prefix: &str,
    window: &ScanWindow,
    retry: &RetryPolicy,
    workers: usize,
) -> Result<Vec<(String, Value)>> {
    let listed = with_retry(retry, "list", || store.list(prefix)).await?;
    let total = listed.len();

    let candidates: Vec<ObjectMeta> = listed
        .into_iter()
        .filter(|meta| window.contains(meta.last_modified))
        .collect();
    debug!(
        prefix,
        total,
        in_window = candidates.len(),
        "Listed partition"
    );

    let fetched: Vec<Option<(String, Value)>> = stream::iter(candidates)
        .map(|meta| fetch_one(store, retry, meta))
        .buffered(workers.max(1))
        .try_collect()
        .await?;

    Ok(fetched.into_iter().flatten().collect())
}
