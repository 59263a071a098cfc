//! Configuration for the report pipeline
//!
//! All settings come from environment variables; binaries load a `.env`
//! file via dotenvy before constructing the config. The struct is passed
//! explicitly into the storage, notification and pipeline components, so
//! nothing reads process-global state after startup.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

/// Default partition prefixes scanned per report run.
pub const DEFAULT_PARTITIONS: [&str; 2] = ["expired/", "interim/"];

/// Default bound on concurrent record fetches per partition.
pub const DEFAULT_FETCH_WORKERS: usize = 8;

/// Presigned download links expire after 24 hours.
pub const DOWNLOAD_LINK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounded retry policy for transient storage failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Main configuration struct.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Base URL of the session store gateway (read side).
    pub session_store_url: String,
    /// Base URL of the reports store gateway (artifact upload side).
    pub reports_store_url: String,
    /// Optional bearer token for both store gateways.
    pub store_token: Option<String>,
    /// Base URL of the mail API, if notifications are enabled.
    pub mail_api_url: Option<String>,
    /// Sender address for report emails.
    pub sender_email: String,
    /// Partition prefixes scanned per run, in order.
    pub partitions: Vec<String>,
    /// Bound on concurrent record fetches per partition.
    pub fetch_workers: usize,
    /// Retry policy for transient storage errors.
    pub retry: RetryPolicy,
}

impl ReporterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let session_store_url = env::var("SESSION_STORE_URL")
            .map_err(|_| Error::InvalidArgument("SESSION_STORE_URL not set".to_string()))?;
        let reports_store_url = env::var("REPORTS_STORE_URL")
            .map_err(|_| Error::InvalidArgument("REPORTS_STORE_URL not set".to_string()))?;

        let partitions = env::var("REPORT_PARTITIONS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|_| DEFAULT_PARTITIONS.iter().map(|p| p.to_string()).collect());

        if partitions.is_empty() {
            return Err(Error::InvalidArgument(
                "REPORT_PARTITIONS must name at least one prefix".to_string(),
            ));
        }

        Ok(Self {
            session_store_url,
            reports_store_url,
            store_token: env::var("STORE_TOKEN").ok(),
            mail_api_url: env::var("MAIL_API_URL").ok(),
            sender_email: env::var("REPORT_SENDER")
                .unwrap_or_else(|_| "reports@example.com".to_string()),
            partitions,
            fetch_workers: env::var("FETCH_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FETCH_WORKERS),
            retry: RetryPolicy {
                max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
                base_delay: Duration::from_millis(
                    env::var("RETRY_BASE_DELAY_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(250),
                ),
            },
        })
    }
}
