//! Session Analytics Report Library
//!
//! This library provides tools to:
//! - Scan conversational session records from object storage partitions
//! - Filter sessions by report window and bot id
//! - Normalize nested session documents into a flat table
//! - Compute aggregate analytics metrics over the table
//! - Export CSV artifacts and upload them to a reports store
//! - Email presigned download links to report recipients
//! - Run report jobs in the background behind an HTTP API

pub mod config;
pub mod error;
pub mod notify;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod storage;
pub mod timeconv;
pub mod worker;

// Re-export common types
pub use config::{ReporterConfig, RetryPolicy};
pub use error::{Error, Result};
pub use pipeline::{MetricsSnapshot, ScanWindow, SessionTable};
pub use report::{ReportOutcome, ReportPipeline, ReportRequest};
pub use storage::{ArtifactStore, HttpStore, MemoryStore, StorageReader};
pub use worker::{JobStatus, ReportWorker};
