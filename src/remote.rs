//! Client for the remote job-queue ("intern") service.
//!
//! Every call is an independent form-encoded POST against either
//! `{uri}/job/` or `{uri}/printer/`, authenticated with the app id and token
//! and scoped to this printer and office.

use crate::config::InternConfig;
use crate::job::{null_as_default, Job, JobStatus, RemoteJob};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Remote returned HTTP {0}")]
    Status(StatusCode),
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("job {id} action '{action}' unsuccessful: {message}")]
    Rejected {
        action: &'static str,
        id: u64,
        message: String,
    },
    #[error("Nothing to print")]
    NoJobAvailable,
}

/// Operations the orchestrator needs from the remote queue.
#[async_trait]
pub trait RemoteQueue: Send + Sync {
    /// Best-effort liveness ping.
    async fn heartbeat(&self) -> Result<(), RemoteError>;
    /// `id == 0` asks for the next queued job; otherwise the job's remote state.
    async fn fetch_job(&self, id: u64) -> Result<RemoteJob, RemoteError>;
    async fn report_status_change(&self, job: &Job) -> Result<(), RemoteError>;
    /// Safe to call for a job that is already gone.
    async fn delete_job(&self, job: &Job) -> Result<(), RemoteError>;
    /// Announce that this printer is alive and accepting jobs.
    async fn reschedule_printer(&self) -> Result<(), RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Success", alias = "success", default)]
    success: bool,
    #[serde(rename = "Content", alias = "content", default)]
    content: Option<RemoteJob>,
    #[serde(rename = "Error", alias = "error", default, deserialize_with = "null_as_default")]
    error: String,
}

#[derive(Debug, Clone)]
pub struct InternClient {
    http: Client,
    base_uri: String,
    app: String,
    token: String,
    printer_name: String,
    office_name: String,
}

impl InternClient {
    pub fn new(config: &InternConfig, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: &InternConfig) -> Self {
        Self {
            http,
            base_uri: config.api_uri.trim_end_matches('/').to_string(),
            app: config.api_app.clone(),
            token: config.api_key.clone(),
            printer_name: config.printer_name.clone(),
            office_name: config.office_name.clone(),
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        action: &'static str,
        extra: &[(&'static str, String)],
    ) -> Result<reqwest::Response, RemoteError> {
        let mut form: Vec<(&str, String)> = vec![
            ("app", self.app.clone()),
            ("token", self.token.clone()),
            ("action", action.to_string()),
            ("printer_name", self.printer_name.clone()),
            ("office_name", self.office_name.clone()),
        ];
        form.extend(extra.iter().cloned());

        let url = format!("{}/{}/", self.base_uri, endpoint);
        tracing::debug!(%url, action, "Remote request");
        Ok(self.http.post(&url).form(&form).send().await?)
    }

    /// For calls whose body the daemon does not read.
    async fn post_unit(
        &self,
        endpoint: &str,
        action: &'static str,
        extra: &[(&'static str, String)],
    ) -> Result<(), RemoteError> {
        let response = self.post(endpoint, action, extra).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteQueue for InternClient {
    async fn heartbeat(&self) -> Result<(), RemoteError> {
        self.post_unit("printer", "heartbeat", &[]).await
    }

    async fn fetch_job(&self, id: u64) -> Result<RemoteJob, RemoteError> {
        let extra = if id != 0 { vec![("id", id.to_string())] } else { Vec::new() };
        let body = self.post("job", "get", &extra).await?.text().await?;
        let envelope: Envelope = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(RemoteError::Rejected {
                action: "get",
                id,
                message: envelope.error,
            });
        }
        match envelope.content {
            Some(job) if job.id != 0 => Ok(job),
            _ => Err(RemoteError::NoJobAvailable),
        }
    }

    async fn report_status_change(&self, job: &Job) -> Result<(), RemoteError> {
        let status = job.status_with_progress();
        tracing::debug!(job_id = job.id, %status, "Reporting status");
        self.post_unit(
            "job",
            "update",
            &[("status", status), ("id", job.id.to_string())],
        )
        .await
    }

    async fn delete_job(&self, job: &Job) -> Result<(), RemoteError> {
        self.post_unit("job", "delete", &[("id", job.id.to_string())]).await
    }

    async fn reschedule_printer(&self) -> Result<(), RemoteError> {
        self.post_unit("printer", "reschedule", &[]).await
    }
}

/// True when the remote reports that the job is being cancelled.
pub fn remote_cancelled(job: &RemoteJob) -> bool {
    job.status() == Some(JobStatus::Cancelling)
}
