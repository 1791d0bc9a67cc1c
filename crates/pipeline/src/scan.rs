//! Frame discovery on disk.

use std::path::{Path, PathBuf};

use skystack_core::frame::MasterCandidate;
use skystack_core::metadata::{HeaderReader, MetadataExtractor};
use skystack_core::naming::USED_DIR;

use crate::error::PipelineError;

/// Fail unless `dir` is an existing directory.
pub fn require_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::MissingDirectory(dir.to_path_buf()))
    }
}

/// All `*.fits` files in `dir`, sorted by path.
///
/// With `recursive`, subdirectories are descended except those named
/// `USED`. An unreadable subdirectory is logged and skipped; an unreadable
/// `dir` is an error.
pub fn collect_fits(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, PipelineError> {
    require_dir(dir)?;
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    let mut root = true;

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if root => return Err(PipelineError::io(&current, e)),
            Err(e) => {
                tracing::warn!(path = %current.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        root = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if recursive && entry.file_name() != USED_DIR {
                    pending.push(path);
                }
            } else if is_fits(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

fn is_fits(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("fits"))
}

/// Load every master in `dir` (non-recursive), ordered by file name.
///
/// The order is the scan order of master selection, where the last
/// eligible candidate wins. Masters whose header cannot be read are
/// logged and left out.
pub fn load_master_pool<R: HeaderReader>(
    dir: &Path,
    extractor: &MetadataExtractor<R>,
) -> Result<Vec<MasterCandidate>, PipelineError> {
    let mut paths = collect_fits(dir, false)?;
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let pool: Vec<MasterCandidate> = paths
        .iter()
        .filter_map(|path| match extractor.try_extract_master(path) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable master");
                None
            }
        })
        .collect();

    tracing::info!(dir = %dir.display(), count = pool.len(), "Loaded master pool");
    Ok(pool)
}
