// src/job.rs - The single active print job and its status axes
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Orchestrator-side job status. The wire representation is the
/// human-readable string the remote queue stores and displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "Waiting for job")]
    WaitingJob,
    #[serde(rename = "Waiting for a button")]
    WaitingButton,
    #[serde(rename = "Sending to printer")]
    Sending,
    #[serde(rename = "Printing")]
    Printing,
    #[serde(rename = "Cancelling")]
    Cancelling,
    #[serde(rename = "Finished")]
    Finished,
    /// Report-only; never stored as the resting state of a job.
    #[serde(rename = "Button timeout")]
    ButtonTimeout,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::WaitingJob,
        JobStatus::WaitingButton,
        JobStatus::Sending,
        JobStatus::Printing,
        JobStatus::Cancelling,
        JobStatus::Finished,
        JobStatus::ButtonTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::WaitingJob => "Waiting for job",
            JobStatus::WaitingButton => "Waiting for a button",
            JobStatus::Sending => "Sending to printer",
            JobStatus::Printing => "Printing",
            JobStatus::Cancelling => "Cancelling",
            JobStatus::Finished => "Finished",
            JobStatus::ButtonTimeout => "Button timeout",
        }
    }

    /// Parse a status string as reported by the remote queue.
    pub fn from_wire(s: &str) -> Option<JobStatus> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last status observed from the feeder. Only meaningful while the job is `Printing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeederStatus {
    #[default]
    Idle,
    Printing,
    MMUBusy,
    FSensorBusy,
    Finished,
    Error,
}

/// The unit of work. `id == 0` means no job is being tracked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: u64,
    pub filename: String,
    #[serde(skip)]
    pub file_content: String,
    pub owner: String,
    pub status: JobStatus,
    pub progress: f64,
    pub feeder_status: FeederStatus,
    pub fetched: Option<DateTime<Utc>>,
    pub scheduled: Option<DateTime<Utc>>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: 0,
            filename: String::new(),
            file_content: String::new(),
            owner: String::new(),
            status: JobStatus::WaitingJob,
            progress: 0.0,
            feeder_status: FeederStatus::Idle,
            fetched: None,
            scheduled: None,
        }
    }
}

impl Job {
    pub fn is_active(&self) -> bool {
        self.id != 0
    }

    /// Back to the empty "nothing to print" job.
    pub fn reset(&mut self) {
        *self = Job::default();
    }

    /// Status string pushed to the remote queue. While printing it carries
    /// the feeder's progress or the reason the feeder is paused.
    pub fn status_with_progress(&self) -> String {
        if self.status != JobStatus::Printing {
            return self.status.as_str().to_string();
        }
        match self.feeder_status {
            FeederStatus::Printing => format!("Printing... ({:.1}%)", self.progress),
            FeederStatus::MMUBusy => "Printing paused: MMU paused printing".to_string(),
            FeederStatus::FSensorBusy => {
                "Printing paused: Filament sensor paused printing".to_string()
            }
            _ => self.status.as_str().to_string(),
        }
    }
}

/// Job fields as the remote queue returns them inside `Content`.
/// Field names may arrive in either case.
/// Missing and `null` fields both decode to the zero value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteJob {
    #[serde(rename = "Id", alias = "id", default, deserialize_with = "null_as_default")]
    pub id: u64,
    #[serde(rename = "file_name", default, deserialize_with = "null_as_default")]
    pub filename: String,
    #[serde(rename = "file_content", default, deserialize_with = "null_as_default")]
    pub file_content: String,
    #[serde(rename = "Owner", alias = "owner", default, deserialize_with = "null_as_default")]
    pub owner: String,
    #[serde(rename = "Status", alias = "status", default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(rename = "Progress", alias = "progress", default, deserialize_with = "null_as_default")]
    pub progress: f64,
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RemoteJob {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_wire(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printing(progress: f64, feeder_status: FeederStatus) -> Job {
        Job {
            id: 7,
            status: JobStatus::Printing,
            progress,
            feeder_status,
            ..Default::default()
        }
    }

    #[test]
    fn test_progress_string_while_printing() {
        let job = printing(42.5, FeederStatus::Printing);
        assert_eq!(job.status_with_progress(), "Printing... (42.5%)");
    }

    #[test]
    fn test_paused_strings() {
        assert_eq!(
            printing(10.0, FeederStatus::MMUBusy).status_with_progress(),
            "Printing paused: MMU paused printing"
        );
        assert_eq!(
            printing(10.0, FeederStatus::FSensorBusy).status_with_progress(),
            "Printing paused: Filament sensor paused printing"
        );
    }

    #[test]
    fn test_feeder_status_ignored_outside_printing() {
        let mut job = printing(99.0, FeederStatus::Printing);
        job.status = JobStatus::Cancelling;
        assert_eq!(job.status_with_progress(), "Cancelling");
        job.feeder_status = FeederStatus::Idle;
        job.status = JobStatus::Printing;
        assert_eq!(job.status_with_progress(), "Printing");
    }

    #[test]
    fn test_wire_names_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_wire(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_wire("Exploded"), None);
    }

    #[test]
    fn test_remote_job_decoding() {
        let json = r#"{"Id": 12, "file_name": "benchy.gcode", "file_content": "G28\n",
                       "Owner": "alice", "Status": "Cancelling", "Progress": 0}"#;
        let job: RemoteJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, 12);
        assert_eq!(job.filename, "benchy.gcode");
        assert_eq!(job.status(), Some(JobStatus::Cancelling));
    }

    #[test]
    fn test_remote_job_null_fields_decode_as_empty() {
        let json = r#"{"Id":3,"file_name":null,"file_content":null,"Owner":null,
                       "Status":"Cancelling","Progress":null}"#;
        let job: RemoteJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, 3);
        assert!(job.filename.is_empty());
        assert!(job.file_content.is_empty());
        assert!(job.owner.is_empty());
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.status(), Some(JobStatus::Cancelling));

        let job: RemoteJob = serde_json::from_str(r#"{"Id":null,"Status":null}"#).unwrap();
        assert_eq!(job.id, 0);
        assert_eq!(job.status(), None);
    }

    #[test]
    fn test_reset_clears_job() {
        let mut job = printing(50.0, FeederStatus::Printing);
        job.reset();
        assert!(!job.is_active());
        assert_eq!(job.status, JobStatus::WaitingJob);
    }
}
