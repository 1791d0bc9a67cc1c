//! Calibration orchestrator.
//!
//! Scans the light tree, plans batches, and runs the external application
//! once per batch, strictly one batch at a time. After each run every light
//! in the batch is verified by looking for its calibrated output and the
//! target's ledger is updated once for the whole batch.
//!
//! Terminal state per light:
//!
//! | Outcome           | Cause                                            |
//! |-------------------|--------------------------------------------------|
//! | `Calibrated`      | one of the two output variants exists            |
//! | `Failed`          | run failed, no output found, or ledger unusable  |
//! | `SkippedNoMaster` | no flat or no dark master matched                |

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use skystack_core::config::MatchingConfig;
use skystack_core::ledger::{ledger_path, CalibrationLedger};
use skystack_core::metadata::{FitsHeaderReader, HeaderReader, MetadataExtractor};
use skystack_core::naming::calibrated_output_paths;
use skystack_pixinsight::{ExternalRunner, PixInsightError};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::planner::{CalibrationBatch, CalibrationPlan, CalibrationPlanner};
use crate::scan::{collect_fits, load_master_pool, require_dir};

/// Input and output locations of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationDirs {
    pub light_dir: PathBuf,
    pub flat_master_dir: PathBuf,
    pub dark_master_dir: PathBuf,
    /// Each target gets a subdirectory here.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Holds the output file that was found.
    Calibrated(PathBuf),
    Failed,
    SkippedNoMaster,
}

/// What happened to every light a run looked at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationReport {
    pub outcomes: Vec<(PathBuf, FrameOutcome)>,
    /// Output target directories whose ledger exists after the run.
    pub targets: Vec<PathBuf>,
}

impl CalibrationReport {
    pub fn calibrated_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FrameOutcome::Calibrated(_)))
            .count()
    }

    pub fn failed_paths(&self) -> Vec<&Path> {
        self.paths_with(&FrameOutcome::Failed)
    }

    pub fn skipped_paths(&self) -> Vec<&Path> {
        self.paths_with(&FrameOutcome::SkippedNoMaster)
    }

    fn paths_with(&self, outcome: &FrameOutcome) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o == outcome)
            .map(|(p, _)| p.as_path())
            .collect()
    }
}

pub struct CalibrationOrchestrator<X, R = FitsHeaderReader> {
    runner: X,
    extractor: MetadataExtractor<R>,
    matching: MatchingConfig,
}

impl<X: ExternalRunner, R: HeaderReader> CalibrationOrchestrator<X, R> {
    pub fn new(runner: X, extractor: MetadataExtractor<R>, matching: MatchingConfig) -> Self {
        Self {
            runner,
            extractor,
            matching,
        }
    }

    /// Calibrate every light under `dirs.light_dir`.
    ///
    /// Only missing input directories and cancellation end the run with an
    /// error. A target whose ledger cannot be read or written has its lights
    /// reported `Failed`; other targets carry on.
    pub async fn run(
        &self,
        dirs: &CalibrationDirs,
        cancel: &CancellationToken,
    ) -> Result<CalibrationReport, PipelineError> {
        require_dir(&dirs.flat_master_dir)?;
        require_dir(&dirs.dark_master_dir)?;

        let lights = collect_fits(&dirs.light_dir, true)?;
        tracing::info!(count = lights.len(), dir = %dirs.light_dir.display(), "Found light frames");

        let flats = load_master_pool(&dirs.flat_master_dir, &self.extractor)?;
        let darks = load_master_pool(&dirs.dark_master_dir, &self.extractor)?;

        let plan = CalibrationPlanner::new(&self.extractor, &self.matching).plan(
            &lights,
            &flats,
            &darks,
            &dirs.output_dir,
        );
        self.execute(plan, cancel).await
    }

    /// Run an already built plan.
    pub async fn execute(
        &self,
        plan: CalibrationPlan,
        cancel: &CancellationToken,
    ) -> Result<CalibrationReport, PipelineError> {
        let mut report = CalibrationReport::default();
        // Targets whose ledger is unusable; their batches are not run.
        let mut broken: HashSet<PathBuf> = HashSet::new();

        for target_dir in plan.output_dirs() {
            match prepare_target(target_dir) {
                Ok(()) => report.targets.push(target_dir.to_path_buf()),
                Err(e) => {
                    tracing::error!(target_dir = %target_dir.display(), error = %e, "Ledger unusable, skipping target");
                    broken.insert(target_dir.to_path_buf());
                }
            }
        }

        let total = plan.batches.len();
        for (index, batch) in plan.batches.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            tracing::info!(
                batch = index + 1,
                total,
                lights = batch.lights.len(),
                exposure = batch.key.exposure_seconds,
                filter = batch.key.filter.as_deref().unwrap_or("None"),
                flat = %batch.key.flat_master.display(),
                dark = %batch.key.dark_master.display(),
                "Calibrating batch",
            );
            if broken.contains(&batch.key.output_dir) {
                tracing::error!(
                    target_dir = %batch.key.output_dir.display(),
                    lights = batch.lights.len(),
                    "Batch not run, target ledger unusable",
                );
                report.outcomes.extend(all_failed(batch));
                continue;
            }

            let outcomes = self.run_batch(batch, cancel).await?;
            match record_in_ledger(batch, &outcomes) {
                Ok(()) => report.outcomes.extend(outcomes),
                Err(e) => {
                    tracing::error!(
                        target_dir = %batch.key.output_dir.display(),
                        error = %e,
                        "Failed to record batch in ledger",
                    );
                    broken.insert(batch.key.output_dir.clone());
                    report.outcomes.extend(all_failed(batch));
                }
            }
        }

        report.outcomes.extend(
            plan.skipped
                .into_iter()
                .map(|(path, _)| (path, FrameOutcome::SkippedNoMaster)),
        );

        tracing::info!(
            calibrated = report.calibrated_count(),
            failed = report.failed_paths().len(),
            skipped = report.skipped_paths().len(),
            "Calibration finished",
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: &CalibrationBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PathBuf, FrameOutcome)>, PipelineError> {
        match self.runner.calibrate(&batch.job(), cancel).await {
            Ok(run) => {
                tracing::debug!(exit_code = run.exit_code, duration_ms = run.duration_ms, "Batch run completed");
                Ok(verify_outputs(batch))
            }
            Err(PixInsightError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, lights = batch.lights.len(), "Calibration run failed");
                Ok(all_failed(batch))
            }
        }
    }
}

/// Create the target directory and make sure its ledger loads.
fn prepare_target(target_dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(target_dir).map_err(|e| PipelineError::io(target_dir, e))?;
    let name = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    CalibrationLedger::load_or_create(target_dir, &name)?;
    Ok(())
}

fn all_failed(batch: &CalibrationBatch) -> Vec<(PathBuf, FrameOutcome)> {
    batch
        .lights
        .iter()
        .map(|light| (light.clone(), FrameOutcome::Failed))
        .collect()
}

/// Classify each light of `batch` by whether its output exists.
pub fn verify_outputs(batch: &CalibrationBatch) -> Vec<(PathBuf, FrameOutcome)> {
    batch
        .lights
        .iter()
        .map(|light| {
            let found = calibrated_output_paths(&batch.key.output_dir, light, batch.key.date)
                .into_iter()
                .find(|candidate| candidate.exists());
            let outcome = match found {
                Some(output) => {
                    tracing::debug!(light = %light.display(), output = %output.display(), "Calibrated");
                    FrameOutcome::Calibrated(output)
                }
                None => {
                    tracing::error!(light = %light.display(), "Calibration failed, no output found");
                    FrameOutcome::Failed
                }
            };
            (light.clone(), outcome)
        })
        .collect()
}

/// Read-modify-write the batch's ledger entry.
fn record_in_ledger(
    batch: &CalibrationBatch,
    outcomes: &[(PathBuf, FrameOutcome)],
) -> Result<(), PipelineError> {
    let key = &batch.key;
    let path = ledger_path(&key.output_dir);
    let mut ledger = CalibrationLedger::load(&path)?;

    let calibrated = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, FrameOutcome::Calibrated(_)))
        .count();
    let failed: Vec<PathBuf> = outcomes
        .iter()
        .filter(|(_, o)| *o == FrameOutcome::Failed)
        .map(|(p, _)| p.clone())
        .collect();

    ledger
        .entry_mut(
            key.date,
            key.filter.as_deref(),
            key.exposure_seconds,
            &key.flat_master,
            &key.dark_master,
        )
        .record_batch(batch.lights.len(), calibrated, &failed);
    ledger.save(&path)?;
    Ok(())
}
