use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NdtsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("corruption in {path} at offset {offset} (len {len}): {reason}")]
    Corruption {
        path: PathBuf,
        offset: u64,
        len: u64,
        reason: String,
    },
    #[error("range error: {0}")]
    Range(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl NdtsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NdtsError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corruption(
        path: impl Into<PathBuf>,
        offset: u64,
        len: u64,
        reason: impl Into<String>,
    ) -> Self {
        NdtsError::Corruption {
            path: path.into(),
            offset,
            len,
            reason: reason.into(),
        }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        NdtsError::Schema(reason.into())
    }

    pub fn range(reason: impl Into<String>) -> Self {
        NdtsError::Range(reason.into())
    }

    pub fn state(reason: impl Into<String>) -> Self {
        NdtsError::State(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, NdtsError>;
