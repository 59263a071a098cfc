//! Table assembly and export
//!
//! Concatenates normalized rows from all partitions into the canonical
//! session table. The column layout is fixed and identical regardless of
//! how many partitions were scanned or in what order keys were listed; row
//! order is partition scan order, then discovery order within a partition.
//! No filtering or deduplication happens here.

use serde_json::Value;

use crate::pipeline::normalize::SessionRow;
use crate::{Error, Result};

/// Canonical column order of the session table.
pub const COLUMNS: [&str; 23] = [
    "session_id",
    "account_id",
    "referrer",
    "bot_name",
    "bot_id",
    "turns",
    "created_at",
    "is_billable",
    "is_test",
    "confidence_threshold",
    "auto_add_threshold_lower",
    "auto_add_threshold_upper",
    "created_at_date",
    "created_at_time",
    "fail_counter",
    "fail_turn_indices",
    "report_indices",
    "email_triggers",
    "max_consecutive_fails",
    "user_conversation",
    "component_info",
    "created_at_date_central",
    "created_at_time_central",
];

/// Columns of the spreadsheet-style conversation export.
pub const EXPORT_COLUMNS: [&str; 9] = [
    "session_id",
    "bot_name",
    "turns",
    "created_at_date_central",
    "created_at_time_central",
    "fail_counter",
    "report_indices",
    "user_conversation",
    "component_info",
];

/// The assembled dataset: the sole input to metrics and rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionTable {
    rows: Vec<SessionRow>,
}

impl SessionTable {
    /// Concatenate per-partition row batches in partition order.
    pub fn assemble(partitions: Vec<Vec<SessionRow>>) -> Self {
        Self {
            rows: partitions.into_iter().flatten().collect(),
        }
    }

    pub fn rows(&self) -> &[SessionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Full table as CSV bytes, nested sequences JSON-encoded per cell.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for row in &self.rows {
            writer.write_record(full_record(row)?)?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::CsvError(e.to_string()))
    }

    /// Conversation-report subset as CSV bytes.
    pub fn to_export_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(EXPORT_COLUMNS)?;
        for row in &self.rows {
            writer.write_record(export_record(row)?)?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::CsvError(e.to_string()))
    }
}

fn json_cell<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn full_record(row: &SessionRow) -> Result<Vec<String>> {
    Ok(vec![
        row.session_id.clone(),
        row.account_id.clone(),
        row.referrer.clone().unwrap_or_default(),
        row.bot_name.clone(),
        row.bot_id.clone(),
        row.turns.to_string(),
        row.created_at.to_string(),
        row.is_billable.to_string(),
        row.is_test.to_string(),
        row.confidence_threshold.to_string(),
        row.auto_add_threshold_lower.to_string(),
        row.auto_add_threshold_upper.to_string(),
        row.created_at_date.to_string(),
        row.created_at_time.to_string(),
        row.fail_counter.to_string(),
        json_cell(&row.fail_turn_indices)?,
        json_cell(&row.report_indices)?,
        json_cell::<Vec<Value>>(&row.email_triggers)?,
        row.max_consecutive_fails.to_string(),
        json_cell(&row.user_conversation)?,
        json_cell(&row.component_info)?,
        row.created_at_date_central.to_string(),
        row.created_at_time_central.to_string(),
    ])
}

fn export_record(row: &SessionRow) -> Result<Vec<String>> {
    Ok(vec![
        row.session_id.clone(),
        row.bot_name.clone(),
        row.turns.to_string(),
        row.created_at_date_central.to_string(),
        row.created_at_time_central.to_string(),
        row.fail_counter.to_string(),
        json_cell(&row.report_indices)?,
        json_cell(&row.user_conversation)?,
        json_cell(&row.component_info)?,
    ])
}
