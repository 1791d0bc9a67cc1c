//! Master stacking: integrate raw flats or darks into dated masters.
//!
//! Raw frames are grouped by instrument setup and date proximity, each
//! group is stacked through the external application, and the master's
//! header is stamped with the group's attributes. Consumed frames move to
//! a `USED` directory next to them so the next run skips them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use skystack_core::config::StackingConfig;
use skystack_core::frame::FrameRecord;
use skystack_core::grouping::{group_frames, DARK_GROUP_ATTRIBUTES, FLAT_GROUP_ATTRIBUTES};
use skystack_core::metadata::{write_frame_header, FitsHeaderReader, HeaderReader, MetadataExtractor};
use skystack_core::naming::{is_used, master_file_name, MasterKind, USED_DIR};
use skystack_pixinsight::{ExternalRunner, PixInsightError, StackJob};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::scan::collect_fits;

/// Masters produced and groups that could not be stacked.
///
/// A group is listed in `failed` under its master path. Its raw frames stay
/// where they are, apart from any moved before a retirement error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackingReport {
    pub created: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Raw frames moved to `USED`.
    pub consumed: usize,
}

pub struct MasterStacker<X, R = FitsHeaderReader> {
    runner: X,
    extractor: MetadataExtractor<R>,
    config: StackingConfig,
}

impl<X: ExternalRunner, R: HeaderReader> MasterStacker<X, R> {
    pub fn new(runner: X, extractor: MetadataExtractor<R>, config: StackingConfig) -> Self {
        Self {
            runner,
            extractor,
            config,
        }
    }

    /// Stack every unused raw frame of `kind` under `raw_dir` into masters
    /// written to `master_dir`.
    pub async fn run(
        &self,
        kind: MasterKind,
        raw_dir: &Path,
        master_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<StackingReport, PipelineError> {
        let (attributes, day_window) = match kind {
            MasterKind::Flat => (FLAT_GROUP_ATTRIBUTES, self.config.flat_group_days),
            MasterKind::Dark => (DARK_GROUP_ATTRIBUTES, self.config.dark_group_days),
        };

        let frames: Vec<FrameRecord> = collect_fits(raw_dir, true)?
            .iter()
            .filter_map(|path| match self.extractor.try_extract(path) {
                Ok(record) if record.observation_date.is_some() => Some(record),
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "Skipping undated frame");
                    None
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Skipping unreadable frame");
                    None
                }
            })
            .collect();

        let groups = group_frames(frames, attributes, day_window);
        tracing::info!(kind = kind.label(), groups = groups.len(), "Grouped raw calibration frames");

        std::fs::create_dir_all(master_dir).map_err(|e| PipelineError::io(master_dir, e))?;

        let mut report = StackingReport::default();
        let mut claimed = HashSet::new();
        let total = groups.len();
        for (index, (key, members)) in groups.into_iter().enumerate() {
            let (Some(first), Some(date)) = (members.first(), key.dates.first) else {
                continue;
            };
            let output_path = master_dir.join(master_file_name(kind, first, date));
            tracing::info!(
                group = index + 1,
                total,
                frames = members.len(),
                key = %key,
                master = %output_path.display(),
                "Stacking group",
            );

            if !claimed.insert(output_path.clone()) {
                tracing::error!(
                    master = %output_path.display(),
                    key = %key,
                    "Master path already used by another group in this run",
                );
                report.failed.push(output_path);
                continue;
            }
            if let Err(e) = remove_stale_master(&output_path) {
                tracing::error!(error = %e, "Failed to remove existing master");
                report.failed.push(output_path);
                continue;
            }

            let job = StackJob {
                frames: members.iter().map(|m| m.path.clone()).collect(),
                output_path: output_path.clone(),
            };
            match self.runner.stack(&job, cancel).await {
                Ok(_) => {}
                Err(PixInsightError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    tracing::error!(master = %output_path.display(), error = %e, "Stacking run failed");
                    report.failed.push(output_path);
                    continue;
                }
            }

            if !output_path.exists() {
                tracing::error!(master = %output_path.display(), "Failed to create master");
                report.failed.push(output_path);
                continue;
            }

            if let Err(e) =
                write_frame_header(&output_path, first, self.extractor.keys(), Some(kind.image_type()))
            {
                tracing::error!(master = %output_path.display(), error = %e, "Failed to stamp master header");
                report.failed.push(output_path);
                continue;
            }

            let mut moved_all = true;
            for member in members.iter().filter(|m| !is_used(&m.path)) {
                match move_to_used(&member.path) {
                    Ok(_) => report.consumed += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to retire raw frame");
                        moved_all = false;
                    }
                }
            }
            if !moved_all {
                report.failed.push(output_path);
                continue;
            }
            tracing::info!(master = %output_path.display(), "Created master");
            report.created.push(output_path);
        }

        Ok(report)
    }
}

/// Remove a master left at `path` by an earlier run, so only the coming
/// run's output can satisfy the existence check.
fn remove_stale_master(path: &Path) -> Result<(), PipelineError> {
    if path.exists() {
        tracing::warn!(master = %path.display(), "Replacing existing master");
        std::fs::remove_file(path).map_err(|e| PipelineError::io(path, e))?;
    }
    Ok(())
}

/// Move `file` into a `USED` directory beside it.
pub fn move_to_used(file: &Path) -> Result<PathBuf, PipelineError> {
    let parent = file.parent().unwrap_or_else(|| Path::new("."));
    let used_dir = parent.join(USED_DIR);
    std::fs::create_dir_all(&used_dir).map_err(|e| PipelineError::io(&used_dir, e))?;

    let Some(name) = file.file_name() else {
        return Err(PipelineError::io(
            file,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        ));
    };
    let dest = used_dir.join(name);
    if std::fs::rename(file, &dest).is_err() {
        // Renames fail across devices; fall back to copy + delete.
        std::fs::copy(file, &dest).map_err(|e| PipelineError::io(file, e))?;
        std::fs::remove_file(file).map_err(|e| PipelineError::io(file, e))?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_master_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("masterDark_600s_-20C_100gain_8offset__12112024.fits");
        std::fs::write(&master, "old").unwrap();

        remove_stale_master(&master).unwrap();
        assert!(!master.exists());
        // Nothing to remove is fine.
        remove_stale_master(&master).unwrap();
    }

    #[test]
    fn move_to_used_creates_sibling_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("2025-01-10").join("F_0001.fits");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "data").unwrap();

        let dest = move_to_used(&file).unwrap();
        assert_eq!(dest, dir.path().join("2025-01-10/USED/F_0001.fits"));
        assert!(!file.exists());
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "data");
    }
}
