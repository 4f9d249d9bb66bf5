//! Error kinds for configuration loading and shell commands.
//!
//! Authentication and forwarding outcomes are verdicts, not errors; see
//! [`crate::auth::AuthOutcome`] and [`crate::forwarding::Verdict`].

use std::path::PathBuf;

/// Fatal startup errors. Nothing is listening yet when one of these surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} not found")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Per-command failures. Reported to the user as text; the session carries on.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("permission denied: {0}")]
    PathViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    Refused(String),

    #[error("{0}")]
    Filesystem(#[from] std::io::Error),
}
