// SPDX-License-Identifier: GPL-3.0-only

//! Cluster client library contract
//!
//! These traits describe the librados/librbd primitives the driver relies
//! on. The driver never keeps any of these objects beyond one call; the
//! scoped wrappers in [`crate::connection`] own their lifetimes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Layering feature bit, required for cloning
pub const RBD_FEATURE_LAYERING: u64 = 1;

/// Cluster configuration key holding the default image feature bitmask
pub const DEFAULT_FEATURES_KEY: &str = "rbd_default_features";

/// Raw cluster capacity counters, in kibibytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub kb: u64,
    pub kb_used: u64,
    pub kb_avail: u64,
    pub num_objects: u64,
}

/// Entry point of the client library
pub trait ClusterClient: Send + Sync {
    /// Create an unconnected session handle
    fn create_session(
        &self,
        identity: Option<&str>,
        conf: Option<&Path>,
    ) -> Result<Box<dyn ClusterSession>, ClusterError>;
}

pub trait ClusterSession: Send {
    fn connect(&mut self) -> Result<(), ClusterError>;

    fn open_io_context(&self, pool: &str) -> Result<Box<dyn IoContext>, ClusterError>;

    fn conf_get(&self, key: &str) -> Option<String>;

    fn fsid(&self) -> Result<String, ClusterError>;

    fn cluster_stats(&self) -> Result<ClusterStats, ClusterError>;

    /// Tear the session down. Never fails and tolerates an unconnected session.
    fn shutdown(&mut self);
}

/// I/O context bound to a single pool
pub trait IoContext: Send {
    fn pool(&self) -> &str;

    fn open_image(
        &self,
        name: &str,
        snapshot: Option<&str>,
        read_only: bool,
    ) -> Result<Box<dyn Volume>, ClusterError>;

    fn remove_image(&self, name: &str) -> Result<(), ClusterError>;

    fn list_images(&self) -> Result<Vec<String>, ClusterError>;

    /// Clone `parent@snapshot` from this pool into `dest_name` in `dest`'s pool
    fn clone_image(
        &self,
        parent: &str,
        snapshot: &str,
        dest: &dyn IoContext,
        dest_name: &str,
        features: u64,
    ) -> Result<(), ClusterError>;

    /// Release the context. Never fails.
    fn close(&mut self);
}

/// Operations the driver needs from an open image
pub trait Volume: Send {
    fn size(&self) -> Result<u64, ClusterError>;

    fn resize(&mut self, size: u64) -> Result<(), ClusterError>;

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, ClusterError>;

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, ClusterError>;

    fn close(&mut self) -> Result<(), ClusterError>;
}
