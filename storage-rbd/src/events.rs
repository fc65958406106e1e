// SPDX-License-Identifier: GPL-3.0-only

//! Structured driver events
//!
//! Components report what they do through an injected [`EventSink`]
//! instead of a process-wide logger. [`TracingSink`] forwards every event
//! to `tracing` at the level the event declares.

use std::fmt;

use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    ImageMissing {
        name: String,
    },
    ImageOpenFailed {
        name: String,
        error: String,
    },
    NotCloneable {
        location: String,
        reason: String,
    },
    Cloning {
        pool: String,
        image: String,
        snapshot: String,
        dest: String,
    },
    Resizing {
        name: String,
        size: u64,
    },
    RemoveNotFound {
        pool: String,
        name: String,
    },
    RemoveHasSnapshots {
        pool: String,
        name: String,
    },
    CleanupRetry {
        pool: String,
        name: String,
        error: String,
        remaining: u32,
    },
    CleanupFailed {
        pool: String,
        name: String,
        error: String,
    },
    CommandStarted {
        command: String,
    },
    ExportStarted {
        image: String,
        snapshot: String,
    },
    ExportFailed {
        error: String,
    },
    ExportSourceMissing {
        image: String,
        snapshot: String,
    },
}

impl DriverEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            Self::ImageMissing { .. }
            | Self::NotCloneable { .. }
            | Self::Cloning { .. }
            | Self::Resizing { .. }
            | Self::CommandStarted { .. } => EventLevel::Debug,
            Self::ExportStarted { .. } => EventLevel::Info,
            Self::RemoveNotFound { .. }
            | Self::CleanupRetry { .. }
            | Self::ExportSourceMissing { .. } => EventLevel::Warn,
            Self::ImageOpenFailed { .. }
            | Self::RemoveHasSnapshots { .. }
            | Self::CleanupFailed { .. }
            | Self::ExportFailed { .. } => EventLevel::Error,
        }
    }

    /// Stable machine-readable event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ImageMissing { .. } => "image_missing",
            Self::ImageOpenFailed { .. } => "image_open_failed",
            Self::NotCloneable { .. } => "not_cloneable",
            Self::Cloning { .. } => "cloning",
            Self::Resizing { .. } => "resizing",
            Self::RemoveNotFound { .. } => "remove_not_found",
            Self::RemoveHasSnapshots { .. } => "remove_has_snapshots",
            Self::CleanupRetry { .. } => "cleanup_retry",
            Self::CleanupFailed { .. } => "cleanup_failed",
            Self::CommandStarted { .. } => "command_started",
            Self::ExportStarted { .. } => "export_started",
            Self::ExportFailed { .. } => "export_failed",
            Self::ExportSourceMissing { .. } => "export_source_missing",
        }
    }
}

impl fmt::Display for DriverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageMissing { name } => write!(f, "rbd image {name} does not exist"),
            Self::ImageOpenFailed { name, error } => {
                write!(f, "error opening rbd image {name}: {error}")
            }
            Self::NotCloneable { location, reason } => {
                write!(f, "{location} is not cloneable: {reason}")
            }
            Self::Cloning {
                pool,
                image,
                snapshot,
                dest,
            } => write!(f, "cloning {pool}/{image}@{snapshot} to {dest}"),
            Self::Resizing { name, size } => write!(f, "resizing rbd image {name} to {size}"),
            Self::RemoveNotFound { pool, name } => write!(
                f,
                "image {name} in pool {pool} can not be found, failed to remove"
            ),
            Self::RemoveHasSnapshots { pool, name } => write!(
                f,
                "image {name} in pool {pool} has snapshots, failed to remove"
            ),
            Self::CleanupRetry {
                pool,
                name,
                error,
                remaining,
            } => write!(
                f,
                "rbd remove {name} in pool {pool} failed ({error}), {remaining} attempts left"
            ),
            Self::CleanupFailed { pool, name, error } => {
                write!(f, "giving up on rbd remove {name} in pool {pool}: {error}")
            }
            Self::CommandStarted { command } => write!(f, "running {command}"),
            Self::ExportStarted { image, snapshot } => {
                write!(f, "directly downloading image {image}@{snapshot} using rbd export")
            }
            Self::ExportFailed { error } => write!(f, "rbd image export failed: {error}"),
            Self::ExportSourceMissing { image, snapshot } => {
                write!(f, "rbd image {image}@{snapshot} not found")
            }
        }
    }
}

/// Receiver for driver events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DriverEvent);
}

/// Forwards events to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DriverEvent) {
        let name = event.name();
        match event.level() {
            EventLevel::Debug => debug!(event = name, "{event}"),
            EventLevel::Info => info!(event = name, "{event}"),
            EventLevel::Warn => warn!(event = name, "{event}"),
            EventLevel::Error => error!(event = name, "{event}"),
        }
    }
}
