//! Error types for stager-sync.
//!
//! Three tiers:
//! - recoverable subsystem/installation failures never surface here; they are
//!   recorded on the [`StorageItem`](stager_core::StorageItem) and the
//!   object's aggregate error;
//! - [`SyncError`] covers store I/O and decoding problems;
//! - [`InvariantViolation`] is fatal: the caller must stop the process.

use std::path::PathBuf;

use thiserror::Error;

use stager_core::{CoreError, SafeName};

/// Conditions that indicate a configuration or pipeline bug.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    /// The pipeline reported the artifact as staged but the file is absent.
    #[error("staged artifact for {safename} missing at {path}")]
    MissingStagedArtifact { safename: SafeName, path: PathBuf },

    /// A status record or dispatch request named an object kind we do not manage.
    #[error("unsupported object kind '{0}' in dispatch")]
    UnsupportedKind(String),
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the store, registry or configuration.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// Fatal invariant violation.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl SyncError {
    /// True when the process must stop rather than continue reconciling.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Invariant(_))
    }
}

/// Recoverable installation failure, recorded on the storage item.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("final install directory not set for {0}")]
    FinalDirNotSet(SafeName),

    #[error("installed size mismatch at {path}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    Core(#[from] CoreError),
}

/// Convenience constructor for [`InstallError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> InstallError {
    InstallError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invariant_violations_are_fatal() {
        let fatal = SyncError::from(InvariantViolation::UnsupportedKind("appImg".into()));
        assert!(fatal.is_fatal());
        let store = SyncError::from(CoreError::HomeNotFound);
        assert!(!store.is_fatal());
    }
}
