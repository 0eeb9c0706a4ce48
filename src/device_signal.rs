// src/device_signal.rs - Filesystem handshake with the device-side agent
//
// The marker file exists while a job waits for, or is being printed after,
// human confirmation. The agent deletes it to cancel and creates the
// button file to confirm.
use chrono::{DateTime, Utc};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct DeviceSignal {
    marker: PathBuf,
    button: PathBuf,
}

impl DeviceSignal {
    pub fn new(marker: impl Into<PathBuf>, button: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            button: button.into(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Replace any stale marker with a fresh, world-writable one and drop a
    /// leftover confirmation from a previous job.
    pub async fn arm(&self) -> io::Result<()> {
        remove_if_present(&self.button).await?;
        remove_if_present(&self.marker).await?;
        fs::File::create(&self.marker).await?;
        fs::set_permissions(&self.marker, std::fs::Permissions::from_mode(0o666)).await?;
        tracing::debug!("Armed device signal at {}", self.marker.display());
        Ok(())
    }

    pub async fn is_armed(&self) -> bool {
        fs::metadata(&self.marker).await.is_ok()
    }

    /// Last modification time of the marker, `None` when not armed.
    pub async fn armed_since(&self) -> Option<DateTime<Utc>> {
        let metadata = fs::metadata(&self.marker).await.ok()?;
        match metadata.modified() {
            Ok(modified) => Some(DateTime::<Utc>::from(modified)),
            Err(e) => {
                tracing::warn!("No modification time for '{}': {}", self.marker.display(), e);
                None
            }
        }
    }

    /// Whether the agent has confirmed the waiting job.
    pub async fn is_confirmed(&self) -> bool {
        fs::metadata(&self.button).await.is_ok()
    }

    /// Mark the device as free. Missing files are not an error.
    pub async fn disarm(&self) -> io::Result<()> {
        remove_if_present(&self.marker).await?;
        remove_if_present(&self.button).await
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn signal_in(dir: &Path) -> DeviceSignal {
        DeviceSignal::new(dir.join("gizmostatusfile"), dir.join("buttonpress"))
    }

    #[tokio::test]
    async fn test_arm_creates_world_writable_marker() {
        let dir = tempdir().unwrap();
        let signal = signal_in(dir.path());
        assert!(!signal.is_armed().await);
        assert!(signal.armed_since().await.is_none());

        signal.arm().await.unwrap();
        assert!(signal.is_armed().await);
        assert!(signal.armed_since().await.is_some());
        let mode = std::fs::metadata(signal.marker_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
    }

    #[tokio::test]
    async fn test_arm_clears_stale_confirmation() {
        let dir = tempdir().unwrap();
        let signal = signal_in(dir.path());
        std::fs::write(dir.path().join("buttonpress"), b"").unwrap();
        assert!(signal.is_confirmed().await);

        signal.arm().await.unwrap();
        assert!(!signal.is_confirmed().await);
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let dir = tempdir().unwrap();
        let signal = signal_in(dir.path());
        signal.arm().await.unwrap();
        signal.disarm().await.unwrap();
        assert!(!signal.is_armed().await);
        signal.disarm().await.unwrap();
    }

    #[tokio::test]
    async fn test_arm_fails_for_missing_directory() {
        let dir = tempdir().unwrap();
        let signal = signal_in(&dir.path().join("missing"));
        assert!(signal.arm().await.is_err());
    }
}
