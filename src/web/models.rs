//! Contains the data models for API responses.

use crate::job::{FeederStatus, JobStatus};
use crate::orchestrator::JobSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Represents the response for the /info endpoint.
#[derive(Serialize, Debug)]
pub struct InfoResponse {
    pub printer_name: String,
    pub office_name: String,
    /// Job details (None if no job is active).
    pub job: Option<JobInfo>,
    /// Wire status, e.g. "Waiting for job".
    pub status: JobStatus,
    /// The status string last reported to the remote queue.
    pub status_text: String,
    pub armed_since: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

/// Represents job status details.
#[derive(Serialize, Debug)]
pub struct JobInfo {
    pub id: u64,
    pub file: String,
    pub owner: String,
    pub progress: f64,
    pub feeder_status: FeederStatus,
    pub fetched: Option<DateTime<Utc>>,
    pub scheduled: Option<DateTime<Utc>>,
}

impl InfoResponse {
    pub fn from_snapshot(snapshot: &JobSnapshot, printer_name: &str, office_name: &str) -> Self {
        let job = &snapshot.job;
        Self {
            printer_name: printer_name.to_string(),
            office_name: office_name.to_string(),
            job: job.is_active().then(|| JobInfo {
                id: job.id,
                file: job.filename.clone(),
                owner: job.owner.clone(),
                progress: job.progress,
                feeder_status: job.feeder_status,
                fetched: job.fetched,
                scheduled: job.scheduled,
            }),
            status: job.status,
            status_text: snapshot.status_text.clone(),
            armed_since: snapshot.armed_since,
            updated: snapshot.updated,
        }
    }
}
