//! Report service daemon.
//!
//! Usage:
//!   cargo run --bin reportd -- --addr 0.0.0.0:8000
//!
//! Serves the report API and Prometheus metrics, running report jobs on a
//! background worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use session_reporter::notify::HttpNotifier;
use session_reporter::{server, HttpStore, ReportPipeline, ReportWorker, ReporterConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reportd")]
#[command(about = "Session analytics report service")]
struct Args {
    /// Listen address for the HTTP API
    #[arg(long, env = "REPORTD_ADDR", default_value = "0.0.0.0:8000")]
    addr: SocketAddr,

    /// Bound on queued report jobs
    #[arg(long, default_value = "16")]
    queue_capacity: usize,
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

    let worker = ReportWorker::spawn(Arc::new(pipeline), args.queue_capacity);

    tokio::select! {
        result = server::serve(args.addr, worker) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Report service stopped by user");
        }
    }

    Ok(())
}
