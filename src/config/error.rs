use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration fault.
///
/// Unlike dispatch faults these are never routed to the failsafe responder: an
/// unusable configuration aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("hardening default needs to be `hardened` or `compatible`, got `{0}`")]
    UnknownProfile(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported config file format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),
    #[error("framework settings have already been finalized")]
    AlreadyFinalized,
}
