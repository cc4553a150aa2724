//! Error types
//!
//! Nothing in here ever reaches a caller of the coordinator's public
//! operations. Errors are logged where they happen and the affected view
//! degrades to "no visible effect".

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by host-provided ports.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("render surface could not be created: {0}")]
    SurfaceUnavailable(String),
    #[error("renderer could not be created: {0}")]
    RendererCreate(String),
}

/// Failures while building or driving an overlay.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("surface for view {view} never reported bounds after {attempts} attempts")]
    AttachTimedOut { view: String, attempts: u32 },
}

/// Errors that can occur while loading coordinator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}
