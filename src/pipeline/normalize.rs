//! Record normalization
//!
//! Converts one parsed session record (arbitrary nested JSON) into a flat
//! [`SessionRow`], or reports why the record is unusable. Records for other
//! bots are filtered out silently; a record missing a required subtree is a
//! per-record schema error that the caller logs and skips.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::timeconv;
use crate::{Error, Result};

/// One speaker/utterance pair from a session's conversation history.
///
/// A row with no extractable pairs carries a single empty placeholder so the
/// conversation column is never an empty sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeakerUtterance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utterance: Option<String>,
}

impl SpeakerUtterance {
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.speaker.is_none() && self.utterance.is_none()
    }
}

/// One component lookup result from the session's component state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
}

impl ComponentEntry {
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.component_id.is_none() && self.component_name.is_none()
    }
}

/// The normalized unit of work: one session record flattened to the fixed
/// column schema. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRow {
    pub session_id: String,
    pub account_id: String,
    pub referrer: Option<String>,
    pub bot_name: String,
    pub bot_id: String,
    pub turns: usize,
    /// Creation instant, epoch milliseconds.
    pub created_at: i64,
    pub is_billable: bool,
    pub is_test: bool,
    pub confidence_threshold: f64,
    pub auto_add_threshold_lower: f64,
    pub auto_add_threshold_upper: f64,
    pub created_at_date: NaiveDate,
    pub created_at_time: NaiveTime,
    pub fail_counter: u64,
    pub fail_turn_indices: Vec<i64>,
    pub report_indices: Vec<i64>,
    pub email_triggers: Vec<Value>,
    pub max_consecutive_fails: u64,
    pub user_conversation: Vec<SpeakerUtterance>,
    pub component_info: Vec<ComponentEntry>,
    pub created_at_date_central: NaiveDate,
    pub created_at_time_central: NaiveTime,
}

impl SessionRow {
    /// Whether the session produced at least one report.
    pub fn has_report(&self) -> bool {
        !self.report_indices.is_empty()
    }

    /// Whether the session triggered at least one notification email.
    pub fn has_email_trigger(&self) -> bool {
        !self.email_triggers.is_empty()
    }
}

/// Safe nested lookup by path segments.
pub fn lookup<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

fn schema_error(key: &str, path: &[&str]) -> Error {
    Error::RecordSchema {
        key: key.to_string(),
        path: path.join("."),
    }
}

fn require<'a>(key: &str, doc: &'a Value, path: &[&str]) -> Result<&'a Value> {
    lookup(doc, path).ok_or_else(|| schema_error(key, path))
}

fn require_f64(key: &str, doc: &Value, path: &[&str]) -> Result<f64> {
    require(key, doc, path)?
        .as_f64()
        .ok_or_else(|| schema_error(key, path))
}

fn require_u64(key: &str, doc: &Value, path: &[&str]) -> Result<u64> {
    require(key, doc, path)?
        .as_u64()
        .ok_or_else(|| schema_error(key, path))
}

fn string_field(doc: &Value, name: &str) -> String {
    doc.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(doc: &Value, name: &str) -> bool {
    doc.get(name).and_then(Value::as_bool).unwrap_or_default()
}

fn i64_sequence(value: &Value) -> Vec<i64> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Extract speaker/utterance pairs from the history turns, preserving turn
/// order then utterance order. Empty result becomes a single placeholder.
fn extract_user_conversation(turns: &[Value]) -> Vec<SpeakerUtterance> {
    let mut pairs = Vec::new();

    for turn in turns {
        let speaker = turn.get("speaker").and_then(Value::as_str);
        let utterances = turn.get("utterance").and_then(Value::as_array);
        let (Some(speaker), Some(utterances)) = (speaker, utterances) else {
            continue;
        };

        for utterance in utterances {
            if let Some(text) = utterance.as_str() {
                pairs.push(SpeakerUtterance {
                    speaker: Some(speaker.to_string()),
                    utterance: Some(text.to_string()),
                });
            }
        }
    }

    if pairs.is_empty() {
        vec![SpeakerUtterance::placeholder()]
    } else {
        pairs
    }
}

/// Extract component entries from `state.component_state.query_results`.
/// Missing component state is routine, not an error.
fn extract_component_info(doc: &Value) -> Vec<ComponentEntry> {
    let mut entries = Vec::new();

    if let Some(results) =
        lookup(doc, &["state", "component_state", "query_results"]).and_then(Value::as_array)
    {
        for result in results {
            let source = result.get("_source");
            let component_id = source
                .and_then(|s| s.get("component_id"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(String::from);
            let component_name = Some(
                source
                    .and_then(|s| s.get("component_name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            );
            entries.push(ComponentEntry {
                component_id,
                component_name,
            });
        }
    }

    if entries.is_empty() {
        vec![ComponentEntry::placeholder()]
    } else {
        entries
    }
}

/// Normalize one parsed record into a row.
///
/// Returns `Ok(None)` when the record belongs to a different bot (routine
/// filtering), `Err` when a required field is missing or has the wrong
/// shape. The storage key is only used for error context.
pub fn normalize_record(key: &str, doc: &Value, bot_id_filter: &str) -> Result<Option<SessionRow>> {
    let bot_id = match doc.get("bot_id").and_then(Value::as_str) {
        Some(id) if id == bot_id_filter => id.to_string(),
        _ => return Ok(None),
    };

    let turns_value = require(key, doc, &["history", "turns"])?;
    let turns_array = turns_value
        .as_array()
        .ok_or_else(|| schema_error(key, &["history", "turns"]))?;

    let created_at = require(key, doc, &["created_at"])?
        .as_i64()
        .ok_or_else(|| schema_error(key, &["created_at"]))?;

    let confidence_threshold = require_f64(
        key,
        doc,
        &["config", "semantic_search", "confidence_threshold"],
    )?;
    let auto_add_threshold_lower = require_f64(
        key,
        doc,
        &["config", "online_learning", "utterance_auto_add_threshold_lower"],
    )?;
    let auto_add_threshold_upper = require_f64(
        key,
        doc,
        &["config", "online_learning", "utterance_auto_add_threshold_upper"],
    )?;
    let max_consecutive_fails = require_u64(
        key,
        doc,
        &["config", "fail_mechanism", "max_consecutive_fails"],
    )?;

    let fail_counter = require_u64(key, doc, &["state", "fail_counter"])?;
    let fail_turn_indices = i64_sequence(require(key, doc, &["state", "fail_turn_indices"])?);
    let report_indices = i64_sequence(require(key, doc, &["state", "report_indices"])?);
    let email_triggers = require(key, doc, &["state", "email_triggers"])?
        .as_array()
        .cloned()
        .unwrap_or_default();

    let (created_at_date, created_at_time) = timeconv::epoch_ms_to_naive(created_at);
    let (created_at_date_central, created_at_time_central) =
        timeconv::epoch_ms_to_central(created_at);

    Ok(Some(SessionRow {
        session_id: string_field(doc, "session_id"),
        account_id: string_field(doc, "account_id"),
        referrer: doc
            .get("referrer")
            .and_then(Value::as_str)
            .map(String::from),
        bot_name: string_field(doc, "bot_name"),
        bot_id,
        turns: turns_array.len(),
        created_at,
        is_billable: bool_field(doc, "is_billable"),
        is_test: bool_field(doc, "is_test"),
        confidence_threshold,
        auto_add_threshold_lower,
        auto_add_threshold_upper,
        created_at_date,
        created_at_time,
        fail_counter,
        fail_turn_indices,
        report_indices,
        email_triggers,
        max_consecutive_fails,
        user_conversation: extract_user_conversation(turns_array),
        component_info: extract_component_info(doc),
        created_at_date_central,
        created_at_time_central,
    }))
}

/// Normalize every document of a partition, skipping unusable records.
///
/// Schema failures are logged per record and never abort the batch.
pub fn rows_from_documents(documents: &[(String, Value)], bot_id_filter: &str) -> Vec<SessionRow> {
    let mut rows = Vec::new();

    for (key, doc) in documents {
        match normalize_record(key, doc, bot_id_filter) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => {}
            Err(err) => {
                warn!(key = %key, "Skipping record: {}", err);
                crate::obs::record_skipped("schema");
            }
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record(bot_id: &str) -> Value {
        json!({
            "session_id": "s-1",
            "account_id": "a-1",
            "referrer": "https://example.com/help",
            "bot_name": "Ask Alden",
            "bot_id": bot_id,
            "is_billable": true,
            "is_test": false,
            "created_at": 1_704_103_200_000i64,
            "history": {
                "turns": [
                    { "speaker": "user", "utterance": ["hello"] },
                    { "speaker": "bot", "utterance": ["hi there", "how can I help?"] }
                ]
            },
            "config": {
                "semantic_search": { "confidence_threshold": 70.0 },
                "online_learning": {
                    "utterance_auto_add_threshold_lower": 60.0,
                    "utterance_auto_add_threshold_upper": 90.0
                },
                "fail_mechanism": { "max_consecutive_fails": 3 }
            },
            "state": {
                "fail_counter": 1,
                "fail_turn_indices": [2],
                "report_indices": [],
                "email_triggers": [],
                "component_state": {
                    "query_results": [
                        { "_source": { "component_id": "c-9", "component_name": "faq" } }
                    ]
                }
            }
        })
    }

    #[test]
    fn normalizes_matching_record() {
        let doc = sample_record("bot-1");
        let row = normalize_record("expired/s-1.json", &doc, "bot-1")
            .unwrap()
            .unwrap();

        assert_eq!(row.session_id, "s-1");
        assert_eq!(row.bot_id, "bot-1");
        assert_eq!(row.turns, 2);
        assert_eq!(row.fail_counter, 1);
        assert_eq!(row.fail_turn_indices, vec![2]);
        assert_eq!(row.max_consecutive_fails, 3);
        assert_eq!(row.confidence_threshold, 70.0);
        assert_eq!(row.referrer.as_deref(), Some("https://example.com/help"));
        assert!(row.is_billable);
        assert!(!row.is_test);
    }

    #[test]
    fn other_bot_id_contributes_nothing() {
        let doc = sample_record("bot-2");
        let result = normalize_record("expired/s-1.json", &doc, "bot-1").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn missing_bot_id_contributes_nothing() {
        let result = normalize_record("k", &json!({ "session_id": "s" }), "bot-1").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn missing_history_is_schema_error() {
        let mut doc = sample_record("bot-1");
        doc.as_object_mut().unwrap().remove("history");

        let err = normalize_record("expired/s-1.json", &doc, "bot-1").unwrap_err();
        assert!(matches!(err, Error::RecordSchema { .. }));
        assert!(err.to_string().contains("history.turns"));
    }

    #[test]
    fn missing_config_subtree_is_schema_error() {
        let mut doc = sample_record("bot-1");
        doc["config"]
            .as_object_mut()
            .unwrap()
            .remove("online_learning");

        let err = normalize_record("k", &doc, "bot-1").unwrap_err();
        assert!(err
            .to_string()
            .contains("config.online_learning.utterance_auto_add_threshold_lower"));
    }

    #[test]
    fn empty_turns_yield_zero_turns_not_error() {
        let mut doc = sample_record("bot-1");
        doc["history"]["turns"] = json!([]);

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert_eq!(row.turns, 0);
        assert_eq!(row.user_conversation, vec![SpeakerUtterance::placeholder()]);
    }

    #[test]
    fn conversation_round_trip_single_pair() {
        let mut doc = sample_record("bot-1");
        doc["history"]["turns"] = json!([{ "speaker": "bot", "utterance": ["hi"] }]);

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert_eq!(
            row.user_conversation,
            vec![SpeakerUtterance {
                speaker: Some("bot".to_string()),
                utterance: Some("hi".to_string()),
            }]
        );
    }

    #[test]
    fn conversation_preserves_turn_then_utterance_order() {
        let doc = sample_record("bot-1");
        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();

        let utterances: Vec<_> = row
            .user_conversation
            .iter()
            .map(|p| p.utterance.clone().unwrap())
            .collect();
        assert_eq!(utterances, vec!["hello", "hi there", "how can I help?"]);
        assert_eq!(row.user_conversation[0].speaker.as_deref(), Some("user"));
        assert_eq!(row.user_conversation[1].speaker.as_deref(), Some("bot"));
    }

    #[test]
    fn turn_without_speaker_or_utterance_is_skipped() {
        let mut doc = sample_record("bot-1");
        doc["history"]["turns"] = json!([
            { "speaker": "user" },
            { "utterance": ["orphan"] },
            { "speaker": "bot", "utterance": ["kept"] }
        ]);

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert_eq!(row.user_conversation.len(), 1);
        assert_eq!(row.user_conversation[0].utterance.as_deref(), Some("kept"));
    }

    #[test]
    fn missing_component_state_yields_placeholder() {
        let mut doc = sample_record("bot-1");
        doc["state"]
            .as_object_mut()
            .unwrap()
            .remove("component_state");

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert_eq!(row.component_info, vec![ComponentEntry::placeholder()]);
        assert!(row.component_info[0].is_placeholder());
    }

    #[test]
    fn component_entry_defaults_missing_fields() {
        let mut doc = sample_record("bot-1");
        doc["state"]["component_state"]["query_results"] = json!([
            { "_source": { "component_name": "greeting" } },
            { "_source": {} }
        ]);

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert_eq!(row.component_info.len(), 2);
        assert_eq!(row.component_info[0].component_id, None);
        assert_eq!(
            row.component_info[0].component_name.as_deref(),
            Some("greeting")
        );
        assert_eq!(row.component_info[1].component_name.as_deref(), Some(""));
    }

    #[test]
    fn placeholder_serializes_as_empty_object() {
        let placeholder = SpeakerUtterance::placeholder();
        assert_eq!(serde_json::to_string(&placeholder).unwrap(), "{}");

        let entry = ComponentEntry::placeholder();
        assert_eq!(serde_json::to_string(&entry).unwrap(), "{}");
    }

    #[test]
    fn timestamp_columns_use_both_derivations() {
        // 2024-01-01 10:00:00 UTC is 04:00 CST.
        let doc = sample_record("bot-1");
        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();

        assert_eq!(
            row.created_at_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            row.created_at_time,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
        assert_eq!(
            row.created_at_date_central,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            row.created_at_time_central,
            NaiveTime::from_hms_opt(4, 0, 0).unwrap()
        );
    }

    #[test]
    fn lookup_walks_nested_paths() {
        let doc = json!({ "a": { "b": { "c": 7 } } });
        assert_eq!(lookup(&doc, &["a", "b", "c"]).and_then(Value::as_i64), Some(7));
        assert!(lookup(&doc, &["a", "x"]).is_none());
    }

    #[test]
    fn rows_from_documents_skips_bad_records() {
        let good = sample_record("bot-1");
        let mut broken = sample_record("bot-1");
        broken.as_object_mut().unwrap().remove("state");
        let other_bot = sample_record("bot-2");

        let documents = vec![
            ("expired/good.json".to_string(), good),
            ("expired/broken.json".to_string(), broken),
            ("expired/other.json".to_string(), other_bot),
        ];

        let rows = rows_from_documents(&documents, "bot-1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, "s-1");
    }

    #[test]
    fn row_report_and_trigger_flags() {
        let mut doc = sample_record("bot-1");
        doc["state"]["report_indices"] = json!([1, 3]);
        doc["state"]["email_triggers"] = json!(["fail_threshold"]);

        let row = normalize_record("k", &doc, "bot-1").unwrap().unwrap();
        assert!(row.has_report());
        assert!(row.has_email_trigger());

        let plain = normalize_record("k", &sample_record("bot-1"), "bot-1")
            .unwrap()
            .unwrap();
        assert!(!plain.has_report());
        assert!(!plain.has_email_trigger());
    }
}
