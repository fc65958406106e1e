// SPDX-License-Identifier: GPL-3.0-only

//! Ceph RBD volume driver
//!
//! This crate mediates between a virtualization host and an RBD cluster:
//! - Scoped cluster connections and volume handles that never leak a
//!   session, including when acquisition fails halfway
//! - Volume lifecycle operations (clone, resize, existence, removal)
//! - Import/export and monitor discovery through the ceph/rbd CLI tools
//! - Bounded-retry removal of volumes left behind by a deleted owner
//!
//! The cluster client library is consumed through the traits in
//! [`cluster`]; commands and log events go through injected
//! [`CommandRunner`] and [`EventSink`] implementations.

pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod location;
pub mod tools;

pub use cleanup::{CleanupReport, CleanupRetryLoop, RemovedVolume, RetryContext};
pub use cluster::{
    ClusterClient, ClusterSession, ClusterStats, DEFAULT_FEATURES_KEY, IoContext,
    RBD_FEATURE_LAYERING, Volume,
};
pub use config::{CleanupPolicy, DriverConfig};
pub use connection::{ClusterConnection, Connector, VolumeHandle, VolumeOptions};
pub use driver::{PoolInfo, RbdDriver, RemoveOutcome};
pub use error::{ClusterError, DriverError, Result};
pub use events::{DriverEvent, EventLevel, EventSink, TracingSink};
pub use location::{
    ImageLocation, ImageMeta, SnapshotLocation, VolumeIdentity, parse_export_path,
    parse_location_url,
};
pub use tools::{
    CephTools, CommandOutput, CommandRunner, MonitorAddresses, SystemRunner, parse_mon_dump,
};
