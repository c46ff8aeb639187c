//! Error types.
//!
//! Test failures reported by PHPUnit are not errors here: they are ordinary
//! run outcomes. These types cover the conditions that stop work from
//! happening at all.

use std::path::PathBuf;
use thiserror::Error;

/// A single test file could not be read or parsed.
///
/// Recovered per file: discovery logs it and leaves the file node childless.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid or incomplete configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Docker container name is not configured. Please configure it in settings.")]
    MissingContainerName,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported settings format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),

    #[error("invalid debug configuration: {0}")]
    Interpolation(String),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The debugger session bracketing a debug run could not be managed.
#[derive(Debug, Error)]
pub enum DebugSessionError {
    #[error("failed to start debug session: {0}")]
    Start(String),

    #[error("failed to stop debug session: {0}")]
    Stop(String),
}

/// The workspace file search failed as a whole.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid file pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("failed to search {root}: {message}")]
    Search { root: PathBuf, message: String },
}

/// A run that was aborted before any test started.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    DebugSession(#[from] DebugSessionError),
}
