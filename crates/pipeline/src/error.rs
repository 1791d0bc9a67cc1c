use std::path::PathBuf;

use skystack_core::error::CoreError;
use skystack_pixinsight::PixInsightError;

/// Errors that abort a pipeline run.
///
/// Per-frame and per-batch problems are not errors; they end up in the
/// run's report and in the calibration ledger.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    PixInsight(#[from] PixInsightError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
