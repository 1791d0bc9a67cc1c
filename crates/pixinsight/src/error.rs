use std::path::PathBuf;

/// Errors from driving the external PixInsight process.
#[derive(Debug, thiserror::Error)]
pub enum PixInsightError {
    #[error("Failed to start {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PixInsight did not complete within {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("PixInsight run cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write handshake document {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PixInsightError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
