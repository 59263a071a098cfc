//! Email delivery of finished reports.
//!
//! Composes the report notification from presigned download links and hands
//! it to a mail gateway. Delivery is a collaborator behind a trait so the
//! pipeline can run without a gateway configured and tests can capture the
//! outgoing message.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::pipeline::ScanWindow;
use crate::{Error, Result};

/// A composed, ready-to-send notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmailMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body_html: String,
}

/// Delivery backend for report notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Compose the standard report email around a set of presigned links.
///
/// Link order follows the artifact order and is reflected in the numbered
/// download anchors.
pub fn build_report_email(
    sender: &str,
    recipients: &[String],
    bot_display_name: &str,
    window: &ScanWindow,
    links: &[String],
) -> EmailMessage {
    let subject = format!("Analytics report for {}", bot_display_name);
    let mut body_html = format!(
        "Hello! Here are the reports of your {} for the requested timeline {} to {}.\
         <p>Please download the files from the following links for your analytics \
         report and the session conversation report. Kindly note that the links \
         will expire in 24 hours:</p>",
        bot_display_name, window.start, window.end
    );
    for (i, url) in links.iter().enumerate() {
        body_html.push_str(&format!("<p><a href='{}'>Download File {}</a></p>", url, i + 1));
    }

    EmailMessage {
        sender: sender.to_string(),
        recipients: recipients.to_vec(),
        subject,
        body_html,
    }
}

/// Mail gateway client speaking a small JSON send API.
pub struct HttpNotifier {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("session_reporter/0.1.0")
            .build()
            .map_err(|e| Error::Delivery(format!("failed to build mail client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            http,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let url = format!("{}/send", self.base_url);
        debug!(%url, subject = %message.subject, "Sending report email");

        let mut request = self.http.post(&url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("mail gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "mail gateway returned {}: {}",
                status, body
            )));
        }

        info!(
            recipients = message.recipients.len(),
            subject = %message.subject,
            "Report email sent"
        );
        Ok(())
    }
}
