//! Temp directory holding generated audio files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use genie_tts_core::error::Result;

/// Process-local directory of transient `tts_<hex>.wav` files.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// A fresh, globally unique WAV path inside the directory.
    pub fn new_wav_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.root.join(format!("tts_{id}.wav"))
    }

    /// Delete `path` after `delay` in a detached task. A file that is already
    /// gone is not an error.
    pub fn schedule_removal(&self, path: PathBuf, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            remove_file(&path).await;
        })
    }

    /// Delete `path` now.
    pub async fn remove_now(&self, path: &Path) {
        remove_file(path).await;
    }

    /// Remove every file in the directory. Returns how many were deleted.
    pub async fn sweep(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path().display(), %e, "Failed to remove temp file"),
            }
        }
        info!(dir = %self.root.display(), removed, "Temp audio directory swept");
        Ok(removed)
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Temp audio file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Temp audio file already gone")
        }
        Err(e) => warn!(path = %path.display(), %e, "Failed to remove temp audio file"),
    }
}
