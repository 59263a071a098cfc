//! Background execution of report runs.
//!
//! A single worker task drains a bounded queue so concurrent API calls
//! never run overlapping pipelines. Each accepted job gets an id that
//! can be polled for its status until completion or failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::obs;
use crate::report::{ReportOutcome, ReportPipeline, ReportRequest};
use crate::{Error, Result};

/// Lifecycle of a submitted report job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed(ReportOutcome),
    Failed { error: String },
}

struct Job {
    id: u64,
    request: ReportRequest,
}

/// Handle for submitting report jobs and polling their status.
pub struct ReportWorker {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<u64, JobStatus>>>,
    next_id: AtomicU64,
}

impl ReportWorker {
    /// Spawn the worker task and return the submission handle.
    pub fn spawn(pipeline: Arc<ReportPipeline>, queue_capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let statuses: Arc<Mutex<HashMap<u64, JobStatus>>> = Arc::new(Mutex::new(HashMap::new()));

        let task_statuses = statuses.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                set_status(&task_statuses, job.id, JobStatus::Running);
                obs::record_run_start();
                let started = Instant::now();

                let result = pipeline.run(&job.request).await;
                obs::record_run_result(started.elapsed(), result.is_ok());

                match result {
                    Ok(outcome) => {
                        info!(job_id = job.id, rows = outcome.rows, "Report job completed");
                        set_status(&task_statuses, job.id, JobStatus::Completed(outcome));
                    }
                    Err(err) => {
                        error!(job_id = job.id, "Report job failed: {}", err);
                        set_status(
                            &task_statuses,
                            job.id,
                            JobStatus::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
        });

        Arc::new(Self {
            tx,
            statuses,
            next_id: AtomicU64::new(1),
        })
    }

    /// Enqueue a report run. Requests are validated up front so a caller
    /// gets an immediate error instead of a job that can only fail.
    pub async fn submit(&self, request: ReportRequest) -> Result<u64> {
        request.validate()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        set_status(&self.statuses, id, JobStatus::Queued);

        if self.tx.send(Job { id, request }).await.is_err() {
            if let Ok(mut statuses) = self.statuses.lock() {
                statuses.remove(&id);
            }
            return Err(Error::InvalidArgument(
                "report worker is not running".to_string(),
            ));
        }

        info!(job_id = id, "Report job enqueued");
        Ok(id)
    }

    /// Current status of a job, if the id is known.
    pub fn status(&self, id: u64) -> Option<JobStatus> {
        self.statuses.lock().ok().and_then(|s| s.get(&id).cloned())
    }
}

fn set_status(statuses: &Arc<Mutex<HashMap<u64, JobStatus>>>, id: u64, status: JobStatus) {
    if let Ok(mut map) = statuses.lock() {
        map.insert(id, status);
    }
}
