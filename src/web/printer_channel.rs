//! Defines the communication channel messages between the web server and the orchestrator task.

use crate::orchestrator::ControlError;
use tokio::sync::oneshot;

/// Represents a request sent from a web handler to the orchestrator task.
#[derive(Debug)]
pub enum PrinterRequest {
    /// Confirm the job waiting for the device signal.
    Start {
        /// The channel to send the response back on.
        respond_to: oneshot::Sender<Result<(), ControlError>>,
    },
    /// Announce the printer to the remote queue again.
    Reschedule {
        respond_to: oneshot::Sender<Result<(), ControlError>>,
    },
    /// Cancel the active job.
    Cancel {
        respond_to: oneshot::Sender<Result<(), ControlError>>,
    },
}
