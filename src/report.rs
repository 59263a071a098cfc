//! Report orchestration.
//!
//! One run: validate the request, scan every configured partition, assemble
//! the session table, compute metrics, export and upload artifacts, then
//! notify recipients with presigned links. Upload failures fail the run;
//! notification failures are logged and do not, because the artifacts are
//! already durable at that point.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ReporterConfig, DOWNLOAD_LINK_TTL};
use crate::notify::{build_report_email, Notifier};
use crate::pipeline::{
    rows_from_documents, scan_partition, MetricsSnapshot, ScanWindow, SessionTable,
};
use crate::storage::{with_retry, ArtifactStore, StorageReader};
use crate::{Error, Result};

/// Parameters of one report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bot_id: String,
    pub bot_display_name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl ReportRequest {
    /// Check the request and derive the scan window.
    pub fn validate(&self) -> Result<ScanWindow> {
        if self.bot_id.trim().is_empty() {
            return Err(Error::InvalidArgument("bot_id must not be empty".to_string()));
        }
        if self.bot_display_name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "bot_display_name must not be empty".to_string(),
            ));
        }
        ScanWindow::new(self.start_date, self.end_date)
    }
}

/// An extra artifact produced by a renderer, ready for upload.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub file_name: String,
    pub body: Vec<u8>,
}

/// Optional visual rendering stage (charts, workbooks) over the finished
/// table and metrics.
pub trait Renderer: Send + Sync {
    fn render(&self, table: &SessionTable, metrics: &MetricsSnapshot)
        -> Result<Vec<RenderedArtifact>>;
}

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub rows: usize,
    pub metrics: MetricsSnapshot,
    pub artifact_keys: Vec<String>,
}

/// The full report pipeline with its collaborators.
pub struct ReportPipeline {
    config: ReporterConfig,
    session_store: Arc<dyn StorageReader>,
    reports_store: Arc<dyn ArtifactStore>,
    renderer: Option<Arc<dyn Renderer>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ReportPipeline {
    pub fn new(
        config: ReporterConfig,
        session_store: Arc<dyn StorageReader>,
        reports_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            session_store,
            reports_store,
            renderer: None,
            notifier: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Scan all configured partitions and assemble the session table.
    pub async fn extract(&self, window: &ScanWindow, bot_id: &str) -> Result<SessionTable> {
        let mut batches = Vec::new();
        for prefix in &self.config.partitions {
            let documents = scan_partition(
                self.session_store.as_ref(),
                prefix,
                window,
                &self.config.retry,
                self.config.fetch_workers,
            )
            .await?;
            let rows = rows_from_documents(&documents, bot_id);
            info!(
                prefix = prefix.as_str(),
                fetched = documents.len(),
                rows = rows.len(),
                "Partition extracted"
            );
            batches.push(rows);
        }
        Ok(SessionTable::assemble(batches))
    }

    /// Execute one full report run.
    pub async fn run(&self, request: &ReportRequest) -> Result<ReportOutcome> {
        let window = request.validate()?;
        info!(
            bot_id = %request.bot_id,
            start = %window.start,
            end = %window.end,
            days = window.days(),
            "Starting report run"
        );

        let table = self.extract(&window, &request.bot_id).await?;
        if table.is_empty() {
            return Err(Error::EmptyResult);
        }

        let metrics = MetricsSnapshot::compute(&table);
        let artifact_keys = self.upload_artifacts(&table, &metrics, &window).await?;

        self.notify(request, &window, &artifact_keys).await;

        info!(
            rows = table.len(),
            artifacts = artifact_keys.len(),
            "Report run finished"
        );
        Ok(ReportOutcome {
            rows: table.len(),
            metrics,
            artifact_keys,
        })
    }

    async fn upload_artifacts(
        &self,
        table: &SessionTable,
        metrics: &MetricsSnapshot,
        window: &ScanWindow,
    ) -> Result<Vec<String>> {
        let stem = format!("analytics_report_{}_{}", window.start, window.end);
        let mut artifacts = vec![
            (format!("{}.csv", stem), table.to_csv()?),
            (format!("{}_conversations.csv", stem), table.to_export_csv()?),
        ];

        if let Some(renderer) = &self.renderer {
            for rendered in renderer.render(table, metrics)? {
                artifacts.push((rendered.file_name, rendered.body));
            }
        }

        let mut keys = Vec::with_capacity(artifacts.len());
        for (key, body) in artifacts {
            with_retry(&self.config.retry, "put", || {
                self.reports_store.put(&key, body.clone())
            })
            .await?;
            info!(key = key.as_str(), bytes = body.len(), "Artifact uploaded");
            keys.push(key);
        }
        Ok(keys)
    }

    /// Best-effort email with presigned links. Failures here leave the
    /// uploaded artifacts in place and do not fail the run.
    async fn notify(&self, request: &ReportRequest, window: &ScanWindow, keys: &[String]) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if request.recipients.is_empty() {
            return;
        }

        let mut links = Vec::with_capacity(keys.len());
        for key in keys {
            match self.reports_store.presign(key, DOWNLOAD_LINK_TTL).await {
                Ok(url) => links.push(url),
                Err(err) => {
                    warn!(key = key.as_str(), "Failed to presign artifact: {}", err);
                    return;
                }
            }
        }

        let message = build_report_email(
            &self.config.sender_email,
            &request.recipients,
            &request.bot_display_name,
            window,
            &links,
        );
        if let Err(err) = notifier.send(&message).await {
            warn!("Failed to deliver report email: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EmailMessage;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn config() -> ReporterConfig {
        ReporterConfig {
            session_store_url: "http://unused".to_string(),
            reports_store_url: "http://unused".to_string(),
            store_token: None,
            mail_api_url: None,
            sender_email: "reports@example.com".to_string(),
            partitions: vec!["expired/".to_string(), "interim/".to_string()],
            fetch_workers: 4,
            retry: Default::default(),
        }
    }

    fn request() -> ReportRequest {
        ReportRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
            bot_id: "bot-1".to_string(),
            bot_display_name: "Ask Alden".to_string(),
            recipients: vec!["ops@example.com".to_string()],
        }
    }

    fn session_doc(session_id: &str, bot_id: &str) -> String {
        serde_json::json!({
            "session_id": session_id,
            "account_id": "a-1",
            "bot_name": "Ask Alden",
            "bot_id": bot_id,
            "created_at": 1_704_103_200_000i64,
            "history": { "turns": [ { "speaker": "user", "utterance": ["hi"] } ] },
            "config": {
                "semantic_search": { "confidence_threshold": 70.0 },
                "online_learning": {
                    "utterance_auto_add_threshold_lower": 60.0,
                    "utterance_auto_add_threshold_upper": 90.0
                },
                "fail_mechanism": { "max_consecutive_fails": 3 }
            },
            "state": {
                "fail_counter": 0,
                "fail_turn_indices": [],
                "report_indices": [],
                "email_triggers": []
            }
        })
        .to_string()
    }

    fn seeded_session_store() -> MemoryStore {
        let store = MemoryStore::new();
        let in_window = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        store.insert("expired/s1.json", in_window, session_doc("s-1", "bot-1"));
        store.insert("interim/s2.json", in_window, session_doc("s-2", "bot-1"));
        store.insert("interim/s3.json", in_window, session_doc("s-3", "bot-other"));
        store
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _message: &EmailMessage) -> Result<()> {
            Err(Error::Delivery("gateway down".to_string()))
        }
    }

    #[test]
    fn validate_rejects_blank_bot_id() {
        let mut bad = request();
        bad.bot_id = "  ".to_string();
        assert!(matches!(
            bad.validate().unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let mut bad = request();
        bad.end_date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn run_uploads_both_csv_artifacts() {
        let reports = Arc::new(MemoryStore::new());
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            reports.clone(),
        );

        let outcome = pipeline.run(&request()).await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert_eq!(
            outcome.artifact_keys,
            vec![
                "analytics_report_2024-01-01_2024-01-07.csv",
                "analytics_report_2024-01-01_2024-01-07_conversations.csv",
            ]
        );
        let full = reports
            .body("analytics_report_2024-01-01_2024-01-07.csv")
            .unwrap();
        let text = String::from_utf8(full).unwrap();
        assert!(text.contains("s-1"));
        assert!(text.contains("s-2"));
        assert!(!text.contains("s-3"));
    }

    #[tokio::test]
    async fn run_fails_with_empty_result_when_nothing_matches() {
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            Arc::new(MemoryStore::new()),
        );

        let mut no_match = request();
        no_match.bot_id = "bot-unknown".to_string();
        let err = pipeline.run(&no_match).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResult));
    }

    #[tokio::test]
    async fn run_sends_email_with_one_link_per_artifact() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            Arc::new(MemoryStore::new()),
        )
        .with_notifier(notifier.clone());

        pipeline.run(&request()).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let message = &sent[0];
        assert_eq!(message.sender, "reports@example.com");
        assert_eq!(message.recipients, vec!["ops@example.com"]);
        assert!(message.body_html.contains("Download File 1"));
        assert!(message.body_html.contains("Download File 2"));
        assert!(!message.body_html.contains("Download File 3"));
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_run() {
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            Arc::new(MemoryStore::new()),
        )
        .with_notifier(Arc::new(FailingNotifier));

        let outcome = pipeline.run(&request()).await.unwrap();
        assert_eq!(outcome.rows, 2);
    }

    #[tokio::test]
    async fn no_recipients_skips_notification() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            Arc::new(MemoryStore::new()),
        )
        .with_notifier(notifier.clone());

        let mut quiet = request();
        quiet.recipients.clear();
        pipeline.run(&quiet).await.unwrap();

        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn renderer_artifacts_are_uploaded_after_the_tables() {
        struct StubRenderer;
        impl Renderer for StubRenderer {
            fn render(
                &self,
                _table: &SessionTable,
                _metrics: &MetricsSnapshot,
            ) -> Result<Vec<RenderedArtifact>> {
                Ok(vec![RenderedArtifact {
                    file_name: "analytics_report_charts.pdf".to_string(),
                    body: vec![1, 2, 3],
                }])
            }
        }

        let reports = Arc::new(MemoryStore::new());
        let pipeline = ReportPipeline::new(
            config(),
            Arc::new(seeded_session_store()),
            reports.clone(),
        )
        .with_renderer(Arc::new(StubRenderer));

        let outcome = pipeline.run(&request()).await.unwrap();
        assert_eq!(outcome.artifact_keys.len(), 3);
        assert_eq!(outcome.artifact_keys[2], "analytics_report_charts.pdf");
        assert_eq!(reports.body("analytics_report_charts.pdf").unwrap(), vec![1, 2, 3]);
    }
}
