//! Running PixInsight scripts.
//!
//! [`ExternalRunner`] is the seam the pipeline drives; [`PixInsightCli`] is
//! the production implementation. Each call writes the handshake documents,
//! asks a running PixInsight instance to execute a script, and waits for the
//! script's sentinel. The whole call is bounded by
//! [`RunnerConfig::timeout`] and ends early when the cancellation token
//! fires.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use skystack_core::naming::calibrated_prefix;
use skystack_core::types::ObservationDate;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::PixInsightError;
use crate::handshake::{absolute, Handshake, Sentinel};
use crate::params::{CalibrationParams, StackParams};

/// Maximum stdout or stderr captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where PixInsight and its scripts live, and how long to wait for them.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub executable: PathBuf,
    /// Must match the directory hard-coded in the scripts.
    pub handshake_dir: PathBuf,
    /// Instance slot to target; `None` uses the default instance.
    pub instance: Option<u32>,
    pub launch_script: PathBuf,
    pub stack_script: PathBuf,
    pub calibration_script: PathBuf,
    pub poll_interval: Duration,
    /// Upper bound for one run, process plus sentinel wait.
    pub timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(r"C:\Program Files\PixInsight\bin\PixInsight.exe"),
            handshake_dir: PathBuf::from("C:/Temp/PixStack"),
            instance: None,
            launch_script: PathBuf::from("pixscripts/launch_pix_helper.js"),
            stack_script: PathBuf::from("pixscripts/basic_stack_script.js"),
            calibration_script: PathBuf::from("pixscripts/calibration_script.js"),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl RunnerConfig {
    /// Arguments that run `script` inside an already running instance.
    pub fn execute_args(&self, script: &std::path::Path) -> Vec<String> {
        let target = match self.instance {
            Some(instance) => format!("-x={instance}:{}", script.display()),
            None => format!("-x={}", script.display()),
        };
        vec!["--automation-mode".to_string(), target]
    }

    /// Arguments that start a new instance running the launch helper.
    pub fn launch_args(&self) -> Vec<String> {
        let slot = match self.instance {
            Some(instance) => format!("-n={instance}"),
            None => "-n".to_string(),
        };
        vec![
            slot,
            "--automation-mode".to_string(),
            format!("--run={}", self.launch_script.display()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Jobs and results
// ---------------------------------------------------------------------------

/// Calibrate a batch of lights against one flat and one dark.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationJob {
    pub lights: Vec<PathBuf>,
    pub master_flat: PathBuf,
    pub master_dark: PathBuf,
    pub output_dir: PathBuf,
    /// Observation date shared by the batch; names the outputs.
    pub date: ObservationDate,
}

impl CalibrationJob {
    pub fn params(&self) -> CalibrationParams {
        CalibrationParams {
            master_flat: absolute(&self.master_flat),
            master_dark: absolute(&self.master_dark),
            output_dir: absolute(&self.output_dir),
            prefix: calibrated_prefix(self.date),
        }
    }
}

/// Integrate raw calibration frames into one master.
#[derive(Debug, Clone, PartialEq)]
pub struct StackJob {
    pub frames: Vec<PathBuf>,
    pub output_path: PathBuf,
}

impl StackJob {
    pub fn params(&self) -> StackParams {
        StackParams {
            output_path: absolute(&self.output_path),
        }
    }
}

/// Outcome of a run that reached its sentinel.
///
/// Completion says nothing about the outputs; callers verify those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// The external application as seen by the pipeline.
pub trait ExternalRunner: Send + Sync {
    fn calibrate(
        &self,
        job: &CalibrationJob,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<RunReport, PixInsightError>> + Send;

    fn stack(
        &self,
        job: &StackJob,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<RunReport, PixInsightError>> + Send;
}

// ---------------------------------------------------------------------------
// PixInsight command line
// ---------------------------------------------------------------------------

/// Drives PixInsight through its command line and the handshake directory.
#[derive(Debug, Clone)]
pub struct PixInsightCli {
    config: RunnerConfig,
    handshake: Handshake,
}

impl PixInsightCli {
    pub fn new(config: RunnerConfig) -> Self {
        let handshake = Handshake::new(&config.handshake_dir);
        Self { config, handshake }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start a new automation-mode instance and wait until it reports ready.
    ///
    /// The process is left running; later runs attach to it through
    /// `-x=<instance>:<script>`.
    pub async fn launch(&self, cancel: &CancellationToken) -> Result<(), PixInsightError> {
        self.handshake.clear_stale(Sentinel::Launch).await?;

        let child = Command::new(&self.config.executable)
            .args(self.config.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PixInsightError::Launch {
                program: self.config.executable.clone(),
                source,
            })?;
        tracing::info!(pid = child.id(), "Launched PixInsight in automation mode");

        self.handshake
            .wait(
                Sentinel::Launch,
                self.config.poll_interval,
                self.config.timeout,
                cancel,
            )
            .await?;
        tracing::info!("PixInsight is ready");
        Ok(())
    }

    /// Write the handshake, execute `script`, then wait for `sentinel`.
    async fn run_script<P: Serialize>(
        &self,
        script: &std::path::Path,
        inputs: &[PathBuf],
        params: &P,
        sentinel: Sentinel,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PixInsightError> {
        let start = Instant::now();

        self.handshake.clear_stale(sentinel).await?;
        self.handshake.write_input_list(inputs).await?;
        self.handshake.write_params(params).await?;

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(self.config.execute_args(script));
        let exit_code = run_command(&mut cmd, self.config.timeout, cancel).await?;

        let remaining = self.config.timeout.saturating_sub(start.elapsed());
        self.handshake
            .wait(sentinel, self.config.poll_interval, remaining, cancel)
            .await
            .map_err(|e| match e {
                PixInsightError::Timeout { .. } => PixInsightError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                },
                other => other,
            })?;

        Ok(RunReport {
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

impl ExternalRunner for PixInsightCli {
    async fn calibrate(
        &self,
        job: &CalibrationJob,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PixInsightError> {
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|e| PixInsightError::io(&job.output_dir, e))?;
        self.run_script(
            &self.config.calibration_script,
            &job.lights,
            &job.params(),
            Sentinel::Calibration,
            cancel,
        )
        .await
    }

    async fn stack(
        &self,
        job: &StackJob,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PixInsightError> {
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PixInsightError::io(parent, e))?;
        }
        self.run_script(
            &self.config.stack_script,
            &job.frames,
            &job.params(),
            Sentinel::Stack,
            cancel,
        )
        .await
    }
}

/// Spawn `cmd`, capture its output and wait for it to exit.
///
/// A non-zero exit code is logged and returned, not treated as an error:
/// PixInsight reports script problems through the sentinel and outputs.
async fn run_command(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<i32>, PixInsightError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = PathBuf::from(cmd.as_std().get_program());
    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|source| PixInsightError::Launch { program, source })?;

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    // Dropping `child` on timeout or cancellation kills the process.
    let status = tokio::select! {
        _ = cancel.cancelled() => return Err(PixInsightError::Cancelled),
        result = tokio::time::timeout(timeout, child.wait()) => match result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(PixInsightError::io("<pixinsight process>", e)),
            Err(_elapsed) => {
                return Err(PixInsightError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        },
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
    let exit_code = status.code();

    if status.success() {
        tracing::info!(stdout = %stdout.trim(), "PixInsight command finished");
    } else {
        tracing::error!(
            exit_code,
            stderr = %stderr.trim(),
            "PixInsight command exited with failure",
        );
    }
    Ok(exit_code)
}

/// Read an entire output stream, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn execute_args_target_instance() {
        let mut config = RunnerConfig::default();
        let script = PathBuf::from("pixscripts/calibration_script.js");
        assert_eq!(
            config.execute_args(&script),
            vec!["--automation-mode", "-x=pixscripts/calibration_script.js"]
        );
        config.instance = Some(2);
        assert_eq!(
            config.execute_args(&script),
            vec!["--automation-mode", "-x=2:pixscripts/calibration_script.js"]
        );
    }

    #[test]
    fn launch_args_pick_slot() {
        let mut config = RunnerConfig::default();
        assert_eq!(config.launch_args()[0], "-n");
        config.instance = Some(3);
        assert_eq!(config.launch_args()[0], "-n=3");
        assert_eq!(
            config.launch_args()[2],
            "--run=pixscripts/launch_pix_helper.js"
        );
    }

    #[test]
    fn calibration_params_carry_dated_prefix() {
        let job = CalibrationJob {
            lights: vec![PathBuf::from("/LIGHT/M31/2025-01-12/L_0001.fits")],
            master_flat: "/M/flat.fits".into(),
            master_dark: "/M/dark.fits".into(),
            output_dir: "/CAL/M31".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(),
        };
        let params = job.params();
        assert_eq!(params.prefix, "__12012025_c");
        assert_eq!(params.output_dir, PathBuf::from("/CAL/M31"));
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PixInsightCli::new(RunnerConfig {
            executable: dir.path().join("no-such-pixinsight"),
            handshake_dir: dir.path().join("handshake"),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
            ..Default::default()
        });
        let job = StackJob {
            frames: vec![dir.path().join("F_0001.fits")],
            output_path: dir.path().join("masters").join("m.fits"),
        };

        let result = runner.stack(&job, &CancellationToken::new()).await;
        assert_matches!(result, Err(PixInsightError::Launch { .. }));
        // The handshake was still written before the spawn attempt.
        assert!(dir.path().join("handshake").join("params.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_without_sentinel_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PixInsightCli::new(RunnerConfig {
            executable: PathBuf::from("false"),
            handshake_dir: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(300),
            ..Default::default()
        });
        let job = StackJob {
            frames: vec![],
            output_path: dir.path().join("m.fits"),
        };

        let result = runner.stack(&job, &CancellationToken::new()).await;
        assert_matches!(result, Err(PixInsightError::Timeout { .. }));
    }
}
