//! Error types for stager-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store, registry and naming operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A published record could not be decoded.
    #[error("failed to decode record at {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (publish path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.stager/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No object config is registered under this kind/uuid.
    #[error("object not found at {path}")]
    ObjectNotFound { path: PathBuf },

    /// An object kind string that no dispatch table knows about.
    #[error("unsupported object kind '{0}'")]
    UnsupportedKind(String),

    /// A safe name without the trailing `.digest` component.
    #[error("malformed safename '{0}': no digest suffix")]
    MalformedSafename(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
