//! Failure Taxonomy
//!
//! Every absorbed error in the pipeline is classified against one of these
//! variants before it is logged or recorded. Only `Fatal` terminates the
//! process; everything else is handled at a documented point.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LabError>;

#[derive(Debug, Error)]
pub enum LabError {
    /// Read/write race on a shared file. Skipped, retried next cycle.
    #[error("transient I/O on {path}: {detail}")]
    TransientIo { path: PathBuf, detail: String },

    /// Target not accessible. The scan or connection handler skips it.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// A remediation action did not succeed. Recorded with outcome=false.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Unreadable or malformed stored record collection. The collection is
    /// treated as empty (documented silent-data-loss fallback).
    #[error("corrupt record store {path}: {detail}")]
    Corruption { path: PathBuf, detail: String },

    /// Record encode/decode failure outside a stored collection.
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    /// Baseline database failure.
    #[error("baseline storage: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Forensics archive packaging failure.
    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Unrecoverable startup condition. The only variant that exits.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl LabError {
    /// Classify an `io::Error` for a given target path.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => LabError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => LabError::TransientIo {
                path: path.to_path_buf(),
                detail: err.to_string(),
            },
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification() {
        let path = Path::new("/etc/shadow");

        let denied = LabError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, LabError::PermissionDenied { .. }));

        let racy = LabError::from_io(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(racy, LabError::TransientIo { .. }));
    }
}
