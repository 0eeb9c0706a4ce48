// src/feeder/mod.rs
// Hardware feed sessions: one per job, never reused.
pub mod gcode_feeder;

pub use gcode_feeder::{FeedOptions, GcodeFeeder};

use crate::config::FeederConfig;
use crate::job::FeederStatus;
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeederError {
    #[error("Failed to open device channel '{device}': {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to stage payload '{path}': {source}")]
    Stage {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Feed already started")]
    AlreadyStarted,
}

/// A started feed. Streaming runs in its own task once `feed` is called;
/// the owner only queries it or asks it to stop.
pub trait FeedSession: Send + Sync {
    /// Launch the streaming task and return immediately.
    fn feed(&mut self) -> Result<(), FeederError>;
    /// Percentage of the payload acknowledged by the device, 0 to 100.
    fn progress(&self) -> f64;
    fn status(&self) -> FeederStatus;
    /// Request the streaming task to stop. Observed later through `status`.
    fn cancel(&self);

    /// Whether the streaming task may still be talking to the device.
    fn is_running(&self) -> bool {
        matches!(
            self.status(),
            FeederStatus::Printing | FeederStatus::MMUBusy | FeederStatus::FSensorBusy
        )
    }
}

/// Creates feed sessions bound to a device channel and a staged payload.
#[async_trait]
pub trait FeederLauncher: Send + Sync {
    async fn start(&self, device: &str, payload: &Path) -> Result<Box<dyn FeedSession>, FeederError>;
}

/// Launches feeds over a real serial port.
#[derive(Debug, Clone)]
pub struct SerialFeederLauncher {
    baud: u32,
    options: FeedOptions,
}

impl SerialFeederLauncher {
    pub fn new(config: &FeederConfig) -> Self {
        Self {
            baud: config.baud,
            options: FeedOptions {
                response_timeout: Duration::from_millis(config.response_timeout_ms),
                ..FeedOptions::default()
            },
        }
    }
}

#[async_trait]
impl FeederLauncher for SerialFeederLauncher {
    async fn start(&self, device: &str, payload: &Path) -> Result<Box<dyn FeedSession>, FeederError> {
        let lines = gcode_feeder::load_payload(payload).await?;
        tracing::info!("Connecting to printer: {} at {} baud", device, self.baud);
        let port = SerialPort::open(device, self.baud).map_err(|source| FeederError::Open {
            device: device.to_string(),
            source,
        })?;
        Ok(Box::new(GcodeFeeder::with_port(port, lines, self.options.clone())))
    }
}
