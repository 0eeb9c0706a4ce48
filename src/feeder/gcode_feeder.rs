// src/feeder/gcode_feeder.rs - Line-by-line G-code streaming with ok-acknowledgement
use super::{FeedSession, FeederError};
use crate::job::FeederStatus;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Sent best-effort after a cancelled feed: heaters off, fan off, motors off.
const CANCEL_SEQUENCE: &[&str] = &["M104 S0", "M140 S0", "M107", "M84"];

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Maximum silence from the device while waiting for `ok`.
    pub response_timeout: Duration,
    /// Time to let the controller boot and announce `start` after the port opens.
    pub startup_grace: Duration,
    /// Upper bound for pushing the cancel sequence to a device that may have stopped reading.
    pub cancel_timeout: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(120),
            startup_grace: Duration::from_secs(2),
            cancel_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FeedState {
    status: FeederStatus,
    acked: usize,
    total: usize,
}

impl FeedState {
    fn progress(&self) -> f64 {
        if self.total == 0 {
            return if self.status == FeederStatus::Finished { 100.0 } else { 0.0 };
        }
        self.acked as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<FeedState>>);

impl SharedState {
    fn get(&self) -> FeedState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut FeedState)) {
        f(&mut self.0.lock().unwrap_or_else(|e| e.into_inner()));
    }

    fn set_status(&self, status: FeederStatus) {
        self.update(|s| s.status = status);
    }
}

/// What a line from the device means for the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    MmuBusy,
    FilamentSensorBusy,
    Failure,
    Other,
}

fn classify(line: &str) -> Reply {
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("ok") {
        Reply::Ack
    } else if lower.starts_with("error") || lower.starts_with("!!") {
        Reply::Failure
    } else if lower.trim_start_matches("echo:").starts_with("busy:") {
        if lower.contains("mmu") || lower.contains("paused for user") {
            Reply::MmuBusy
        } else if lower.contains("fsensor") || lower.contains("filament") {
            Reply::FilamentSensorBusy
        } else {
            Reply::Other
        }
    } else {
        Reply::Other
    }
}

/// Read a staged payload and keep only lines worth sending.
pub async fn load_payload(path: &Path) -> Result<Vec<String>, FeederError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|source| FeederError::Stage {
        path: path.display().to_string(),
        source,
    })?;
    let lines = payload_lines(&content);
    tracing::info!("Processed {} G-code lines from {}", lines.len(), path.display());
    Ok(lines)
}

/// Strip comments and blank lines.
pub fn payload_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split(';').next().unwrap_or("").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Streams G-code to any async byte channel, one acknowledged line at a time.
pub struct GcodeFeeder<T> {
    port: Mutex<Option<T>>,
    lines: Vec<String>,
    options: FeedOptions,
    state: SharedState,
    cancel: CancellationToken,
}

impl<T> GcodeFeeder<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn with_port(port: T, lines: Vec<String>, options: FeedOptions) -> Self {
        let total = lines.len();
        Self {
            port: Mutex::new(Some(port)),
            lines,
            options,
            state: SharedState(Arc::new(Mutex::new(FeedState {
                status: FeederStatus::Idle,
                acked: 0,
                total,
            }))),
            cancel: CancellationToken::new(),
        }
    }
}

impl<T> FeedSession for GcodeFeeder<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn feed(&mut self) -> Result<(), FeederError> {
        let port = self
            .port
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(FeederError::AlreadyStarted)?;
        let lines = std::mem::take(&mut self.lines);
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let options = self.options.clone();
        state.set_status(FeederStatus::Printing);
        tokio::spawn(async move {
            stream(port, lines, options, state.clone(), cancel).await;
            tracing::info!("Feeder task finished with status {:?}", state.get().status);
        });
        Ok(())
    }

    fn progress(&self) -> f64 {
        self.state.get().progress()
    }

    fn status(&self) -> FeederStatus {
        self.state.get().status
    }

    fn cancel(&self) {
        tracing::info!("Feed cancellation requested");
        self.cancel.cancel();
    }
}

impl<T> Drop for GcodeFeeder<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn stream<T>(
    port: T,
    lines: Vec<String>,
    options: FeedOptions,
    state: SharedState,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(port);
    let mut replies = BufReader::new(reader).lines();

    if !options.startup_grace.is_zero() {
        // Opening the port resets most controllers; wait for the boot banner.
        let _ = timeout(options.startup_grace, async {
            while let Ok(Some(line)) = replies.next_line().await {
                tracing::debug!("Printer -> {}", line);
                if line.trim() == "start" {
                    break;
                }
            }
        })
        .await;
    }

    for (index, line) in lines.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        tracing::trace!("Printer <- {}", line);
        match send_line(&mut writer, line, options.response_timeout, &cancel).await {
            Sent::Done => {}
            Sent::Cancelled => break,
            Sent::Failed => {
                state.set_status(FeederStatus::Error);
                return;
            }
        }

        loop {
            let reply = tokio::select! {
                _ = cancel.cancelled() => break,
                reply = timeout(options.response_timeout, replies.next_line()) => reply,
            };
            let line = match reply {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    tracing::error!("Serial connection closed by printer");
                    state.set_status(FeederStatus::Error);
                    return;
                }
                Ok(Err(e)) => {
                    tracing::error!("Serial read error: {}", e);
                    state.set_status(FeederStatus::Error);
                    return;
                }
                Err(_) => {
                    tracing::error!("Timeout after {:?} waiting for printer", options.response_timeout);
                    state.set_status(FeederStatus::Error);
                    return;
                }
            };
            tracing::trace!("Printer -> {}", line);
            match classify(&line) {
                Reply::Ack => {
                    state.update(|s| {
                        s.acked = index + 1;
                        s.status = FeederStatus::Printing;
                    });
                    break;
                }
                Reply::MmuBusy => state.set_status(FeederStatus::MMUBusy),
                Reply::FilamentSensorBusy => state.set_status(FeederStatus::FSensorBusy),
                Reply::Failure => {
                    tracing::error!("Printer reported failure: {}", line);
                    state.set_status(FeederStatus::Error);
                    return;
                }
                Reply::Other => {}
            }
        }
    }

    if cancel.is_cancelled() {
        let shutdown = async {
            for command in CANCEL_SEQUENCE {
                writer.write_all(format!("{}\n", command).as_bytes()).await?;
            }
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        match timeout(options.cancel_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to send cancel sequence: {}", e),
            Err(_) => tracing::warn!("Printer stopped reading, cancel sequence dropped"),
        }
        state.set_status(FeederStatus::Idle);
        return;
    }
    state.set_status(FeederStatus::Finished);
}

/// Outcome of pushing one line to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sent {
    Done,
    Cancelled,
    Failed,
}

/// Write and flush one line. A device that stops draining the channel can
/// block the write, so it is bounded by `limit` and by the cancel token.
async fn send_line<W>(writer: &mut W, line: &str, limit: Duration, cancel: &CancellationToken) -> Sent
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(format!("{}\n", line).as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Sent::Cancelled,
        result = timeout(limit, write) => match result {
            Ok(Ok(())) => Sent::Done,
            Ok(Err(e)) => {
                tracing::error!("Serial write error: {}", e);
                Sent::Failed
            }
            Err(_) => {
                tracing::error!("Timeout after {:?} writing to printer", limit);
                Sent::Failed
            }
        },
    }
}
