//! One-shot report generation CLI.
//!
//! Usage:
//!   cargo run --bin generate_report -- \
//!     --start-date 2024-01-01 --end-date 2024-01-07 \
//!     --bot-id bot-1 --bot-name "Ask Alden" \
//!     --recipients ops@example.com,analytics@example.com

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use dotenvy::dotenv;
use session_reporter::notify::HttpNotifier;
use session_reporter::{HttpStore, ReportPipeline, ReportRequest, ReporterConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "generate_report")]
#[command(about = "Generate one analytics report and exit")]
struct Args {
    /// First day of the report window (YYYY-MM-DD)
    #[arg(long)]
    start_date: NaiveDate,

    /// Last day of the report window, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end_date: NaiveDate,

    /// Bot whose sessions the report covers
    #[arg(long)]
    bot_id: String,

    /// Display name used in the email subject and body
    #[arg(long)]
    bot_name: String,

    /// Comma-separated email recipients
    #[arg(long, value_delimiter = ',')]
    recipients: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("session_reporter=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = ReporterConfig::from_env()?;

    let session_store = Arc::new(HttpStore::new(
        &config.session_store_url,
        config.store_token.clone(),
    )?);
    let reports_store = Arc::new(HttpStore::new(
        &config.reports_store_url,
        config.store_token.clone(),
    )?);

    let mut pipeline = ReportPipeline::new(config.clone(), session_store, reports_store);
    if let Some(mail_api_url) = &config.mail_api_url {
        let notifier = HttpNotifier::new(mail_api_url, config.store_token.as_deref())?;
        pipeline = pipeline.with_notifier(Arc::new(notifier));
    }

    let request = ReportRequest {
        start_date: args.start_date,
        end_date: args.end_date,
        bot_id: args.bot_id,
        bot_display_name: args.bot_name,
        recipients: args.recipients,
    };

    let outcome = pipeline.run(&request).await?;

    println!("Report generated for {} rows", outcome.rows);
    println!("  sessions:        {}", outcome.metrics.total_sessions);
    println!("  turns:           {}", outcome.metrics.total_turns);
    println!("  failures:        {}", outcome.metrics.total_failures);
    println!("  reports flagged: {}", outcome.metrics.total_reports);
    for key in &outcome.artifact_keys {
        println!("  artifact: {}", key);
    }

    Ok(())
}
