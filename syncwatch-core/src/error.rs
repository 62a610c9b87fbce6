//! Error types for syncwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value that parses but cannot drive the coordinator.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.syncwatch/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Failures reported by a [`crate::ChangeSource`] collaborator.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The collaborator could not be reached or spawned.
    #[error("collaborator I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external command ran but exited unsuccessfully.
    #[error("command `{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The collaborator answered with something that is not a change count.
    #[error("invalid change count {0:?}")]
    InvalidCount(String),

    /// No command is configured for the requested operation.
    #[error("no command configured for {0}")]
    NotConfigured(&'static str),

    /// Any other collaborator-specific failure.
    #[error("{0}")]
    Other(String),
}
