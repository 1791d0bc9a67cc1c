//! File-based handshake with the PixInsight scripts.
//!
//! Before each run the caller writes two JSON documents into a fixed
//! directory: the ordered list of absolute input paths and a flat parameter
//! map. The script signals completion by creating a sentinel file, which
//! [`wait_for_sentinel`] polls for and then deletes.
//!
//! The locations are shared by every run, so only one run may be in flight
//! per handshake directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::PixInsightError;

/// File holding the JSON array of input paths.
pub const INPUT_FILES_NAME: &str = "input_files.json";

/// File holding the JSON parameter map.
pub const PARAMS_NAME: &str = "params.json";

/// Completion markers written by the scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Launch,
    Stack,
    Calibration,
}

impl Sentinel {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Launch => "launch_done.tmp",
            Self::Stack => "basic_stack_complete.tmp",
            Self::Calibration => "calibration_complete.tmp",
        }
    }
}

/// The shared handshake directory.
#[derive(Debug, Clone)]
pub struct Handshake {
    dir: PathBuf,
}

impl Handshake {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_files_path(&self) -> PathBuf {
        self.dir.join(INPUT_FILES_NAME)
    }

    pub fn params_path(&self) -> PathBuf {
        self.dir.join(PARAMS_NAME)
    }

    pub fn sentinel_path(&self, sentinel: Sentinel) -> PathBuf {
        self.dir.join(sentinel.file_name())
    }

    /// Write the ordered input list, making every path absolute.
    pub async fn write_input_list(&self, files: &[PathBuf]) -> Result<(), PixInsightError> {
        let absolute: Vec<PathBuf> = files.iter().map(|f| absolute(f)).collect();
        write_json(&self.input_files_path(), &absolute).await
    }

    /// Write the parameter document.
    pub async fn write_params<T: Serialize>(&self, params: &T) -> Result<(), PixInsightError> {
        write_json(&self.params_path(), params).await
    }

    /// Delete a sentinel left behind by an earlier, interrupted run.
    pub async fn clear_stale(&self, sentinel: Sentinel) -> Result<(), PixInsightError> {
        let path = self.sentinel_path(sentinel);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::warn!(path = %path.display(), "Removed stale sentinel");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PixInsightError::io(path, e)),
        }
    }

    /// Wait for `sentinel` to appear. See [`wait_for_sentinel`].
    pub async fn wait(
        &self,
        sentinel: Sentinel,
        poll_interval: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Duration, PixInsightError> {
        wait_for_sentinel(&self.sentinel_path(sentinel), poll_interval, timeout, cancel).await
    }
}

/// Resolve `path` against the working directory without touching the
/// filesystem.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PixInsightError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PixInsightError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|source| PixInsightError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| PixInsightError::io(path, e))
}

/// Poll for `path` every `poll_interval` until it exists, then delete it.
///
/// Returns how long the wait took. Fails with
/// [`PixInsightError::Timeout`] once `timeout` has elapsed and with
/// [`PixInsightError::Cancelled`] as soon as `cancel` fires.
pub async fn wait_for_sentinel(
    path: &Path,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Duration, PixInsightError> {
    let start = Instant::now();

    let appeared = async {
        loop {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(path = %path.display(), "Sentinel wait cancelled");
            Err(PixInsightError::Cancelled)
        }
        result = tokio::time::timeout(timeout, appeared) => match result {
            Ok(()) => {
                remove_sentinel(path).await;
                Ok(start.elapsed())
            }
            Err(_elapsed) => Err(PixInsightError::Timeout {
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        },
    }
}

/// The script may still hold the sentinel open for a moment after creating
/// it, so removal is retried a few times before giving up.
async fn remove_sentinel(path: &Path) {
    const ATTEMPTS: u32 = 5;

    for attempt in 1..=ATTEMPTS {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) if attempt == ATTEMPTS => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove sentinel");
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
