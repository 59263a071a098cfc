//! Data extraction and aggregation pipeline
//!
//! Provides:
//! - Corpus scanning over storage partitions with window filtering
//! - Normalization of raw session records into flat rows
//! - Table assembly with a fixed column schema and CSV export
//! - Aggregate metrics over the assembled table

pub mod metrics;
pub mod normalize;
pub mod scan;
pub mod table;

pub use metrics::MetricsSnapshot;
pub use normalize::{normalize_record, rows_from_documents, SessionRow};
pub use scan::{scan_partition, ScanWindow};
pub use table::SessionTable;
