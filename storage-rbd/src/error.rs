// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error kinds raised by the cluster client library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("cluster unreachable: {0}")]
    Unreachable(String),

    #[error("pool {0} does not exist")]
    PoolNotFound(String),

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("image {0} already exists")]
    ImageExists(String),

    #[error("image {0} is busy")]
    ImageBusy(String),

    #[error("image {0} has snapshots")]
    ImageHasSnapshots(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Error types for driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("unacceptable image location {location}: {reason}")]
    Format { location: String, reason: String },

    #[error("cluster connection failed: {0}")]
    Connection(ClusterError),

    #[error("volume {0} not found")]
    VolumeNotFound(String),

    #[error("volume {0} has snapshots")]
    VolumeHasSnapshots(String),

    #[error("volume {0} is busy")]
    VolumeBusy(String),

    #[error("volume operation failed: {0}")]
    Volume(ClusterError),

    #[error("command failed: {command} (exit code {code:?}); stderr: {stderr}")]
    ExternalProcess {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration{}: {reason}", config_location(.path))]
    Config {
        path: Option<PathBuf>,
        reason: String,
    },
}

fn config_location(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| format!(" in {}", path.display()))
        .unwrap_or_default()
}

impl DriverError {
    pub(crate) fn format(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            path: None,
            reason: reason.into(),
        }
    }

    /// Busy and has-snapshots failures are the only kinds worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VolumeBusy(_) | Self::VolumeHasSnapshots(_))
    }
}

/// Image-level failures; acquisition failures map to [`DriverError::Connection`] explicitly
impl From<ClusterError> for DriverError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::ImageNotFound(name) => Self::VolumeNotFound(name),
            ClusterError::ImageHasSnapshots(name) => Self::VolumeHasSnapshots(name),
            ClusterError::ImageBusy(name) => Self::VolumeBusy(name),
            other => Self::Volume(other),
        }
    }
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
