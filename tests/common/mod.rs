// Shared fakes for orchestrator and web API tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use juggler_rs::clock::ManualClock;
use juggler_rs::device_signal::DeviceSignal;
use juggler_rs::feeder::{FeedSession, FeederError, FeederLauncher};
use juggler_rs::job::{FeederStatus, Job, RemoteJob};
use juggler_rs::orchestrator::{JobOrchestrator, OrchestratorSettings};
use juggler_rs::remote::{RemoteError, RemoteQueue};
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// Scripted remote queue that records every call.
#[derive(Default)]
pub struct FakeRemote {
    pub queued: Mutex<VecDeque<RemoteJob>>,
    pub remote_status: Mutex<HashMap<u64, String>>,
    pub reported: Mutex<Vec<(u64, String)>>,
    pub deleted: Mutex<Vec<u64>>,
    pub heartbeats: AtomicUsize,
    pub reschedules: AtomicUsize,
    pub fail_heartbeat: AtomicBool,
    pub fail_fetch_by_id: AtomicBool,
}

impl FakeRemote {
    pub fn enqueue(&self, job: RemoteJob) {
        self.queued.lock().unwrap().push_back(job);
    }

    pub fn set_remote_status(&self, id: u64, status: &str) {
        self.remote_status.lock().unwrap().insert(id, status.to_string());
    }

    pub fn reported_statuses(&self) -> Vec<String> {
        self.reported.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteQueue for FakeRemote {
    async fn heartbeat(&self) -> Result<(), RemoteError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(RemoteError::Status(StatusCode::SERVICE_UNAVAILABLE));
        }
        Ok(())
    }

    async fn fetch_job(&self, id: u64) -> Result<RemoteJob, RemoteError> {
        if id == 0 {
            return self.queued.lock().unwrap().pop_front().ok_or(RemoteError::NoJobAvailable);
        }
        if self.fail_fetch_by_id.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected {
                action: "get",
                id,
                message: "intern is down".to_string(),
            });
        }
        let status = self
            .remote_status
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| "Waiting for a button".to_string());
        Ok(RemoteJob { id, status, ..Default::default() })
    }

    async fn report_status_change(&self, job: &Job) -> Result<(), RemoteError> {
        self.reported.lock().unwrap().push((job.id, job.status_with_progress()));
        Ok(())
    }

    async fn delete_job(&self, job: &Job) -> Result<(), RemoteError> {
        let mut deleted = self.deleted.lock().unwrap();
        let already = deleted.contains(&job.id);
        deleted.push(job.id);
        if already {
            return Err(RemoteError::Status(StatusCode::NOT_FOUND));
        }
        Ok(())
    }

    async fn reschedule_printer(&self) -> Result<(), RemoteError> {
        self.reschedules.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// State shared between a test and the fake feed sessions it launches.
#[derive(Debug)]
pub struct FeedControl {
    pub progress: f64,
    pub status: FeederStatus,
    pub fed: bool,
    pub cancelled: bool,
    /// When set, `cancel` immediately moves the feed to `Idle`.
    pub stop_on_cancel: bool,
}

impl Default for FeedControl {
    fn default() -> Self {
        Self {
            progress: 0.0,
            status: FeederStatus::Idle,
            fed: false,
            cancelled: false,
            stop_on_cancel: true,
        }
    }
}

pub struct FakeSession {
    control: Arc<Mutex<FeedControl>>,
}

impl FeedSession for FakeSession {
    fn feed(&mut self) -> Result<(), FeederError> {
        let mut control = self.control.lock().unwrap();
        control.fed = true;
        control.status = FeederStatus::Printing;
        Ok(())
    }

    fn progress(&self) -> f64 {
        self.control.lock().unwrap().progress
    }

    fn status(&self) -> FeederStatus {
        self.control.lock().unwrap().status
    }

    fn cancel(&self) {
        let mut control = self.control.lock().unwrap();
        control.cancelled = true;
        if control.stop_on_cancel {
            control.status = FeederStatus::Idle;
        }
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub control: Arc<Mutex<FeedControl>>,
    pub fail: AtomicBool,
    pub payloads: Mutex<Vec<String>>,
}

impl FakeLauncher {
    pub fn set(&self, progress: f64, status: FeederStatus) {
        let mut control = self.control.lock().unwrap();
        control.progress = progress;
        control.status = status;
    }
}

#[async_trait]
impl FeederLauncher for FakeLauncher {
    async fn start(&self, device: &str, payload: &Path) -> Result<Box<dyn FeedSession>, FeederError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FeederError::Open {
                device: device.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
            });
        }
        let content = std::fs::read_to_string(payload).map_err(|source| FeederError::Stage {
            path: payload.display().to_string(),
            source,
        })?;
        self.payloads.lock().unwrap().push(content);
        Ok(Box::new(FakeSession { control: self.control.clone() }))
    }
}

pub fn remote_job(id: u64) -> RemoteJob {
    RemoteJob {
        id,
        filename: "benchy.gcode".to_string(),
        file_content: "G28\nG1 X10 Y10\n".to_string(),
        owner: "alice".to_string(),
        status: "Queued".to_string(),
        progress: 0.0,
    }
}

pub const BUTTON_WAIT_MINUTES: i64 = 10;
pub const FEEDER_STOP_WAIT_SECS: i64 = 120;

pub struct Harness {
    pub dir: TempDir,
    pub remote: Arc<FakeRemote>,
    pub launcher: Arc<FakeLauncher>,
    pub clock: Arc<ManualClock>,
    pub signal: DeviceSignal,
    pub orchestrator: JobOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempdir().unwrap();
        let job_file = dir.path().join("job");
        Self::with_job_file(dir, job_file)
    }

    pub fn with_job_file(dir: TempDir, job_file: PathBuf) -> Self {
        let remote = Arc::new(FakeRemote::default());
        let launcher = Arc::new(FakeLauncher::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let signal = DeviceSignal::new(dir.path().join("gizmostatusfile"), dir.path().join("buttonpress"));
        let orchestrator = JobOrchestrator::new(
            remote.clone(),
            launcher.clone(),
            signal.clone(),
            clock.clone(),
            OrchestratorSettings {
                device: "/dev/ttyACM0".to_string(),
                job_file,
                button_wait: Duration::minutes(BUTTON_WAIT_MINUTES),
                feeder_stop_wait: Duration::seconds(FEEDER_STOP_WAIT_SECS),
            },
        );
        Self { dir, remote, launcher, clock, signal, orchestrator }
    }

    pub fn marker(&self) -> PathBuf {
        self.dir.path().join("gizmostatusfile")
    }

    /// The device-side agent confirms the waiting job.
    pub fn press_button(&self) {
        std::fs::write(self.dir.path().join("buttonpress"), b"").unwrap();
    }

    /// The device-side agent cancels by removing the marker.
    pub fn remove_marker(&self) {
        std::fs::remove_file(self.marker()).unwrap();
    }

    /// Fetch, confirm and start printing job `id`.
    pub async fn drive_to_printing(&mut self, id: u64) {
        self.remote.enqueue(remote_job(id));
        self.orchestrator.tick().await;
        self.press_button();
        self.orchestrator.tick().await;
        self.orchestrator.tick().await;
        assert_eq!(self.orchestrator.job().status, juggler_rs::JobStatus::Printing);
    }
}
