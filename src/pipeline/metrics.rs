//! Aggregate metrics over the session table
//!
//! Every indicator is a pure function of the assembled rows and tolerates
//! an empty table: counts come back zero, means come back NaN and the
//! caller decides how to present the undefined case. Day buckets use the
//! plain (UTC-naive) date columns; hour buckets use the central time
//! column, matching what the report charts have always shown.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Timelike};
use serde::Serialize;

use crate::pipeline::normalize::SessionRow;
use crate::pipeline::table::SessionTable;

/// Derived indicators, recomputed fresh from a table each run.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_sessions: usize,
    pub total_turns: u64,
    /// Mean of per-session summed turns; NaN for an empty table.
    pub average_session_length: f64,
    pub total_failures: u64,
    pub total_reports: usize,
    pub total_email_triggers: usize,
    pub average_max_consecutive_fails: f64,
    pub mean_confidence_threshold: f64,
    pub mean_auto_add_threshold_lower: f64,
    pub mean_auto_add_threshold_upper: f64,
    pub turns_per_day: BTreeMap<NaiveDate, u64>,
    pub sessions_per_day: BTreeMap<NaiveDate, usize>,
    pub mean_turns_per_day: BTreeMap<NaiveDate, f64>,
    pub turn_count_frequencies: BTreeMap<usize, usize>,
    pub day_turns_crosstab: BTreeMap<NaiveDate, BTreeMap<usize, usize>>,
    pub sessions_per_hour_central: BTreeMap<u32, usize>,
    pub component_name_frequencies: BTreeMap<String, usize>,
}

impl MetricsSnapshot {
    pub fn compute(table: &SessionTable) -> Self {
        let rows = table.rows();
        Self {
            total_sessions: total_sessions(rows),
            total_turns: total_turns(rows),
            average_session_length: average_session_length(rows),
            total_failures: total_failures(rows),
            total_reports: rows.iter().filter(|r| r.has_report()).count(),
            total_email_triggers: rows.iter().filter(|r| r.has_email_trigger()).count(),
            average_max_consecutive_fails: mean(rows, |r| r.max_consecutive_fails as f64),
            mean_confidence_threshold: mean(rows, |r| r.confidence_threshold),
            mean_auto_add_threshold_lower: mean(rows, |r| r.auto_add_threshold_lower),
            mean_auto_add_threshold_upper: mean(rows, |r| r.auto_add_threshold_upper),
            turns_per_day: turns_per_day(rows),
            sessions_per_day: sessions_per_day(rows),
            mean_turns_per_day: mean_turns_per_day(rows),
            turn_count_frequencies: turn_count_frequencies(rows),
            day_turns_crosstab: day_turns_crosstab(rows),
            sessions_per_hour_central: sessions_per_hour_central(rows),
            component_name_frequencies: component_name_frequencies(rows),
        }
    }
}

/// Cardinality of distinct session ids.
pub fn total_sessions(rows: &[SessionRow]) -> usize {
    rows.iter()
        .map(|r| r.session_id.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

/// Sum of turns over all rows.
pub fn total_turns(rows: &[SessionRow]) -> u64 {
    rows.iter().map(|r| r.turns as u64).sum()
}

/// Sum of fail counters over all rows.
pub fn total_failures(rows: &[SessionRow]) -> u64 {
    rows.iter().map(|r| r.fail_counter).sum()
}

/// Mean of per-session summed turns, grouped by session id.
pub fn average_session_length(rows: &[SessionRow]) -> f64 {
    let mut per_session: HashMap<&str, u64> = HashMap::new();
    for row in rows {
        *per_session.entry(row.session_id.as_str()).or_default() += row.turns as u64;
    }
    let groups = per_session.len();
    per_session.values().sum::<u64>() as f64 / groups as f64
}

fn mean<F: Fn(&SessionRow) -> f64>(rows: &[SessionRow], value: F) -> f64 {
    rows.iter().map(&value).sum::<f64>() / rows.len() as f64
}

fn turns_per_day(rows: &[SessionRow]) -> BTreeMap<NaiveDate, u64> {
    let mut buckets = BTreeMap::new();
    for row in rows {
        *buckets.entry(row.created_at_date).or_default() += row.turns as u64;
    }
    buckets
}

fn sessions_per_day(rows: &[SessionRow]) -> BTreeMap<NaiveDate, usize> {
    let mut per_day: BTreeMap<NaiveDate, std::collections::HashSet<&str>> = BTreeMap::new();
    for row in rows {
        per_day
            .entry(row.created_at_date)
            .or_default()
            .insert(row.session_id.as_str());
    }
    per_day
        .into_iter()
        .map(|(day, ids)| (day, ids.len()))
        .collect()
}

fn mean_turns_per_day(rows: &[SessionRow]) -> BTreeMap<NaiveDate, f64> {
    let mut sums: BTreeMap<NaiveDate, (u64, usize)> = BTreeMap::new();
    for row in rows {
        let entry = sums.entry(row.created_at_date).or_default();
        entry.0 += row.turns as u64;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(day, (sum, count))| (day, sum as f64 / count as f64))
        .collect()
}

fn turn_count_frequencies(rows: &[SessionRow]) -> BTreeMap<usize, usize> {
    let mut frequencies = BTreeMap::new();
    for row in rows {
        *frequencies.entry(row.turns).or_default() += 1;
    }
    frequencies
}

fn day_turns_crosstab(rows: &[SessionRow]) -> BTreeMap<NaiveDate, BTreeMap<usize, usize>> {
    let mut crosstab: BTreeMap<NaiveDate, BTreeMap<usize, usize>> = BTreeMap::new();
    for row in rows {
        *crosstab
            .entry(row.created_at_date)
            .or_default()
            .entry(row.turns)
            .or_default() += 1;
    }
    crosstab
}

fn sessions_per_hour_central(rows: &[SessionRow]) -> BTreeMap<u32, usize> {
    let mut buckets = BTreeMap::new();
    for row in rows {
        *buckets.entry(row.created_at_time_central.hour()).or_default() += 1;
    }
    buckets
}

/// Frequency of component names across all rows. Placeholder entries carry
/// no name and are not counted.
fn component_name_frequencies(rows: &[SessionRow]) -> BTreeMap<String, usize> {
    let mut frequencies = BTreeMap::new();
    for row in rows {
        for entry in &row.component_info {
            if let Some(name) = &entry.component_name {
                *frequencies.entry(name.clone()).or_default() += 1;
            }
        }
    }
    frequencies
}
