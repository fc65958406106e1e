// SPDX-License-Identifier: GPL-3.0-only

//! Removal of volumes left behind by a decommissioned owner
//!
//! Each matching volume gets its own attempt budget. Busy and
//! has-snapshots failures are absorbed and retried on a fixed interval
//! until the budget runs out; a volume whose budget is exhausted gets one
//! last synchronous removal whose failure is reported to the caller.
//!
//! The scheduled phase is bounded by the attempt counter only, not by a
//! wall-clock deadline. This departs from the "wait one interval, then
//! fall back to one synchronous removal" reading of the retry contract:
//! here the fallback fires only once the whole budget is spent, so it
//! needs review if that reading is the intended one.

use std::thread;

use crate::config::CleanupPolicy;
use crate::connection::ClusterConnection;
use crate::error::{ClusterError, DriverError, Result};
use crate::events::{DriverEvent, EventSink};

/// Per-volume attempts-remaining counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub remaining: u32,
}

impl RetryContext {
    pub fn new(attempts: u32) -> Self {
        Self {
            remaining: attempts,
        }
    }
}

/// Result of one scheduled attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Removed,
    Retry,
    Exhausted,
}

/// A volume that was removed, and how many removal calls it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedVolume {
    pub name: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<RemovedVolume>,
}

/// Bounded-retry deletion over one connection
pub struct CleanupRetryLoop<'a> {
    connection: &'a ClusterConnection,
    policy: CleanupPolicy,
    events: &'a dyn EventSink,
}

impl<'a> CleanupRetryLoop<'a> {
    pub fn new(
        connection: &'a ClusterConnection,
        policy: CleanupPolicy,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            connection,
            policy,
            events,
        }
    }

    /// Remove every volume in the connection's pool whose name starts with
    /// `owner`, one at a time.
    ///
    /// All matching volumes are processed even when some fail; the first
    /// surfaced failure is returned after the pass completes.
    pub fn run(&self, owner: &str) -> Result<CleanupReport> {
        let volumes = self.connection.io_ctx().list_images()?;

        let mut report = CleanupReport::default();
        let mut first_failure = None;

        for name in volumes.into_iter().filter(|name| name.starts_with(owner)) {
            match self.remove_volume(&name) {
                Ok(attempts) => report.removed.push(RemovedVolume { name, attempts }),
                Err(err) => {
                    self.events.emit(DriverEvent::CleanupFailed {
                        pool: self.connection.pool().to_string(),
                        name,
                        error: err.to_string(),
                    });
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Drive one volume through its attempt sequence, returning the number
    /// of removal calls made when it ends up removed.
    pub fn remove_volume(&self, name: &str) -> Result<u32> {
        let mut retry = RetryContext::new(self.policy.attempts);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(name, &mut retry)? {
                Tick::Removed => return Ok(attempts),
                Tick::Exhausted => break,
                Tick::Retry => thread::sleep(self.policy.interval),
            }
        }

        attempts += 1;
        self.connection.io_ctx().remove_image(name)?;
        Ok(attempts)
    }

    fn attempt(&self, name: &str, retry: &mut RetryContext) -> Result<Tick> {
        match self.connection.io_ctx().remove_image(name) {
            Ok(()) => return Ok(Tick::Removed),
            Err(err @ (ClusterError::ImageBusy(_) | ClusterError::ImageHasSnapshots(_))) => {
                retry.remaining = retry.remaining.saturating_sub(1);
                self.events.emit(DriverEvent::CleanupRetry {
                    pool: self.connection.pool().to_string(),
                    name: name.to_string(),
                    error: err.to_string(),
                    remaining: retry.remaining,
                });
            }
            Err(err) => return Err(DriverError::from(err)),
        }

        if retry.remaining == 0 {
            Ok(Tick::Exhausted)
        } else {
            Ok(Tick::Retry)
        }
    }
}
