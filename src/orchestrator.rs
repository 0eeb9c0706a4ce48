//! The job orchestration state machine.
//!
//! A [`JobOrchestrator`] exclusively owns the single active [`Job`]. Every
//! polling interval it sends a heartbeat and runs the handler for the job's
//! current status. Handlers perform at most one transition; the only
//! exception is a freshly fetched job, which is handed straight to the
//! confirmation handler within the same tick.
//!
//! Control requests from the HTTP surface are processed between ticks, so
//! the orchestrator stays the sole writer of the job.

use crate::clock::TimeInterface;
use crate::config::Config;
use crate::device_signal::DeviceSignal;
use crate::feeder::{FeedSession, FeederLauncher};
use crate::job::{FeederStatus, Job, JobStatus};
use crate::remote::{remote_cancelled, RemoteError, RemoteQueue};
use crate::web::printer_channel::PrinterRequest;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("No active job")]
    NoActiveJob,
    #[error("Not possible while job is '{0}'")]
    InvalidState(JobStatus),
    #[error("Remote queue error: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Device channel the feeder binds to.
    pub device: String,
    /// Where the payload is staged for the feeder.
    pub job_file: PathBuf,
    /// How long a fetched job waits for confirmation.
    pub button_wait: chrono::Duration,
    /// How long cleanup waits for a cancelled feeder before abandoning it.
    pub feeder_stop_wait: chrono::Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.feeder.device.clone(),
            job_file: config.paths.job_file.clone(),
            button_wait: chrono::Duration::from_std(config.timing.button_wait())
                .unwrap_or(chrono::Duration::MAX),
            feeder_stop_wait: chrono::Duration::from_std(Duration::from_millis(
                config.feeder.response_timeout_ms,
            ))
            .unwrap_or(chrono::Duration::MAX),
        }
    }
}

/// Read-only view of the orchestrator published after every tick and action.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub status_text: String,
    pub armed_since: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

/// Whether the dispatcher should run the handler for the new status right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Done,
    Continue,
}

pub struct JobOrchestrator {
    job: Job,
    remote: Arc<dyn RemoteQueue>,
    launcher: Arc<dyn FeederLauncher>,
    signal: DeviceSignal,
    clock: Arc<dyn TimeInterface>,
    settings: OrchestratorSettings,
    feeder: Option<Box<dyn FeedSession>>,
    /// When cleanup first found the feeder still running.
    stop_requested: Option<DateTime<Utc>>,
    snapshot: watch::Sender<JobSnapshot>,
}

impl JobOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteQueue>,
        launcher: Arc<dyn FeederLauncher>,
        signal: DeviceSignal,
        clock: Arc<dyn TimeInterface>,
        settings: OrchestratorSettings,
    ) -> Self {
        let job = Job::default();
        let (snapshot, _) = watch::channel(JobSnapshot {
            status_text: job.status_with_progress(),
            job: job.clone(),
            armed_since: None,
            updated: clock.now(),
        });
        Self {
            job,
            remote,
            launcher,
            signal,
            clock,
            settings,
            feeder: None,
            stop_requested: None,
            snapshot,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn has_feeder(&self) -> bool {
        self.feeder.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.snapshot.subscribe()
    }

    /// One polling step. Returns the statuses whose handlers ran, in order.
    pub async fn tick(&mut self) -> Vec<JobStatus> {
        if let Err(e) = self.remote.heartbeat().await {
            error!("Heartbeat failed: {}", e);
        }
        info!(job_id = self.job.id, "My status is: {}", self.job.status);

        let mut handled = Vec::with_capacity(2);
        loop {
            let status = self.job.status;
            handled.push(status);
            let flow = match status {
                JobStatus::WaitingJob => self.handle_waiting_job().await,
                JobStatus::WaitingButton => self.handle_waiting_button().await,
                JobStatus::Sending => self.handle_sending().await,
                JobStatus::Printing => self.handle_printing().await,
                JobStatus::Cancelling | JobStatus::Finished => self.handle_cleanup().await,
                JobStatus::ButtonTimeout => {
                    error!("Job {:?} is in a weird state", self.job);
                    Flow::Done
                }
            };
            if flow == Flow::Done {
                break;
            }
        }

        self.publish().await;
        handled
    }

    async fn handle_waiting_job(&mut self) -> Flow {
        let fetched = match self.remote.fetch_job(0).await {
            Ok(job) => job,
            Err(RemoteError::NoJobAvailable) => {
                debug!("Nothing to print");
                return Flow::Done;
            }
            Err(e) => {
                error!("Failed to fetch next job: {}", e);
                return Flow::Done;
            }
        };

        let now = self.clock.now();
        self.job = Job {
            id: fetched.id,
            filename: fetched.filename,
            file_content: fetched.file_content,
            owner: fetched.owner,
            progress: fetched.progress,
            status: JobStatus::WaitingButton,
            feeder_status: FeederStatus::Idle,
            fetched: Some(now),
            scheduled: Some(
                now.checked_add_signed(self.settings.button_wait)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        };

        if let Err(e) = self.signal.disarm().await {
            error!("Unable to clear stale device signal: {}", e);
        }
        if let Err(e) = self.signal.arm().await {
            error!("Unable to arm device signal: {}", e);
        }
        self.report().await;
        info!(
            job_id = self.job.id,
            owner = %self.job.owner,
            file = %self.job.filename,
            "The job successfully marked as {}",
            self.job.status
        );
        Flow::Continue
    }

    async fn handle_waiting_button(&mut self) -> Flow {
        info!(job_id = self.job.id, "Job is waiting for confirmation");
        match self.remote.fetch_job(self.job.id).await {
            Ok(remote) => {
                info!(job_id = self.job.id, "Job status on intern: {}", remote.status);
                if remote_cancelled(&remote) {
                    info!(job_id = self.job.id, "The job is cancelling");
                    self.job.status = JobStatus::Cancelling;
                    self.report().await;
                    return Flow::Done;
                }
            }
            Err(e) => error!("Can't get job status from intern: {}", e),
        }

        if !self.signal.is_armed().await {
            info!(job_id = self.job.id, "Job was cancelled through device, cancelling");
            self.job.status = JobStatus::Cancelling;
            self.report().await;
            return Flow::Done;
        }

        let now = self.clock.now();
        let deadline = self.job.scheduled.unwrap_or(now);
        if now < deadline {
            if self.signal.is_confirmed().await {
                self.job.status = JobStatus::Sending;
                self.report().await;
            } else {
                debug!(armed_since = ?self.signal.armed_since().await, "Device signal armed");
                info!(
                    "Waiting {} more seconds for somebody to press the button",
                    (deadline - now).num_seconds()
                );
            }
            return Flow::Done;
        }

        warn!(job_id = self.job.id, "Nobody pressed the button on time");
        self.job.status = JobStatus::ButtonTimeout;
        self.report().await;
        self.job.reset();
        if let Err(e) = self.signal.disarm().await {
            error!("Unable to disarm device signal: {}", e);
        }
        warn!("Timeout while waiting for a button. Switching back to {}", self.job.status);
        Flow::Done
    }

    async fn handle_sending(&mut self) -> Flow {
        info!(job_id = self.job.id, bytes = self.job.file_content.len(), "Sending to printer");
        if let Err(e) = tokio::fs::write(&self.settings.job_file, self.job.file_content.as_bytes()).await {
            error!("Failed to stage job at {}: {}", self.settings.job_file.display(), e);
            return Flow::Done;
        }

        let mut feeder = match self.launcher.start(&self.settings.device, &self.settings.job_file).await {
            Ok(feeder) => feeder,
            Err(e) => {
                error!("Failed to create feeder: {}", e);
                return Flow::Done;
            }
        };

        info!(job_id = self.job.id, "Mark as Printing on intern");
        self.job.status = JobStatus::Printing;
        self.report().await;
        if let Err(e) = feeder.feed() {
            error!("Failed to start feeding: {}", e);
        }
        self.feeder = Some(feeder);
        Flow::Done
    }

    async fn handle_printing(&mut self) -> Flow {
        info!(job_id = self.job.id, "Job is currently in progress");
        if !self.signal.is_armed().await {
            warn!(job_id = self.job.id, "Was cancelled through device. Cancelling");
            self.cancel_feed();
            self.job.status = JobStatus::Cancelling;
            self.report().await;
            return Flow::Done;
        }

        match self.remote.fetch_job(self.job.id).await {
            Ok(remote) if remote_cancelled(&remote) => {
                info!(job_id = self.job.id, "Cancelling the job");
                self.cancel_feed();
                self.job.status = JobStatus::Cancelling;
                self.report().await;
                return Flow::Done;
            }
            Ok(_) => {}
            Err(e) => error!("Can't get job status from intern: {}", e),
        }

        let Some(feeder) = self.feeder.as_ref() else {
            error!(job_id = self.job.id, "Printing without a feeder, cancelling");
            self.job.status = JobStatus::Cancelling;
            self.report().await;
            return Flow::Done;
        };
        self.job.progress = feeder.progress();
        self.job.feeder_status = feeder.status();
        match self.job.feeder_status {
            FeederStatus::Finished => self.job.status = JobStatus::Finished,
            FeederStatus::Error => {
                error!(job_id = self.job.id, "Feeder reported an error");
                self.job.status = JobStatus::Cancelling;
            }
            _ => {}
        }
        self.report().await;
        Flow::Done
    }

    async fn handle_cleanup(&mut self) -> Flow {
        if let Some(feeder) = self.feeder.as_ref() {
            if feeder.is_running() {
                let now = self.clock.now();
                let since = *self.stop_requested.get_or_insert(now);
                if now - since < self.settings.feeder_stop_wait {
                    info!(job_id = self.job.id, "Waiting for the feeder to stop");
                    feeder.cancel();
                    return Flow::Done;
                }
                error!(
                    job_id = self.job.id,
                    "Feeder still running after {}s, abandoning it",
                    (now - since).num_seconds()
                );
            }
        }
        self.feeder = None;
        self.stop_requested = None;

        info!(job_id = self.job.id, "Deleting from intern");
        if let Err(e) = self.remote.delete_job(&self.job).await {
            error!("Failed to delete job {}: {}", self.job.id, e);
        }
        self.job.reset();
        if let Err(e) = self.signal.disarm().await {
            error!("Unable to mark device as free: {}", e);
        }
        Flow::Done
    }

    fn cancel_feed(&self) {
        if let Some(feeder) = self.feeder.as_ref() {
            feeder.cancel();
        }
    }

    async fn report(&self) {
        if let Err(e) = self.remote.report_status_change(&self.job).await {
            error!("Can't report it to intern: {}", e);
        }
    }

    async fn publish(&self) {
        self.snapshot.send_replace(JobSnapshot {
            job: self.job.clone(),
            status_text: self.job.status_with_progress(),
            armed_since: self.signal.armed_since().await,
            updated: self.clock.now(),
        });
    }

    /// Confirm the waiting job as if the device had signalled it.
    pub async fn force_start(&mut self) -> Result<(), ControlError> {
        if self.job.status != JobStatus::WaitingButton {
            return Err(ControlError::InvalidState(self.job.status));
        }
        info!(job_id = self.job.id, "Job confirmed through control API");
        self.job.status = JobStatus::Sending;
        self.report().await;
        self.publish().await;
        Ok(())
    }

    pub async fn reschedule(&self) -> Result<(), ControlError> {
        self.remote.reschedule_printer().await?;
        info!("Printer rescheduled on intern");
        Ok(())
    }

    /// Cancel the active job locally. Cleanup happens on the next tick.
    pub async fn cancel(&mut self) -> Result<(), ControlError> {
        match self.job.status {
            _ if !self.job.is_active() => return Err(ControlError::NoActiveJob),
            JobStatus::Cancelling => return Ok(()),
            JobStatus::Finished | JobStatus::ButtonTimeout | JobStatus::WaitingJob => {
                return Err(ControlError::InvalidState(self.job.status));
            }
            JobStatus::WaitingButton | JobStatus::Sending | JobStatus::Printing => {}
        }
        info!(job_id = self.job.id, "Job cancelled through control API");
        self.cancel_feed();
        self.job.status = JobStatus::Cancelling;
        self.report().await;
        self.publish().await;
        Ok(())
    }

    pub async fn handle_request(&mut self, request: PrinterRequest) {
        match request {
            PrinterRequest::Start { respond_to } => {
                let _ = respond_to.send(self.force_start().await);
            }
            PrinterRequest::Reschedule { respond_to } => {
                let _ = respond_to.send(self.reschedule().await);
            }
            PrinterRequest::Cancel { respond_to } => {
                let _ = respond_to.send(self.cancel().await);
            }
        }
    }

    /// Drive the orchestrator until `shutdown` fires. The first tick runs
    /// immediately; ticks never overlap.
    pub async fn run(
        mut self,
        polling_interval: Duration,
        mut requests: mpsc::Receiver<PrinterRequest>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(polling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Orchestrator cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(request) = requests.recv() => {
                    self.handle_request(request).await;
                }
            }
        }
        self.cancel_feed();
        info!("Orchestrator stopped.");
    }
}
