pub mod clock;
pub mod config;
pub mod device_signal;
pub mod feeder;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod remote;
pub mod web;

pub use job::{FeederStatus, Job, JobStatus};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings};
