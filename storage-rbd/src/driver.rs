// SPDX-License-Identifier: GPL-3.0-only

//! RBD volume driver
//!
//! Every operation opens its own connection (and volume handle where the
//! operation targets a single image), performs one cluster action and
//! releases everything before returning. Nothing but the configuration is
//! kept between calls.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::cleanup::{CleanupReport, CleanupRetryLoop};
use crate::cluster::ClusterClient;
use crate::config::DriverConfig;
use crate::connection::{ClusterConnection, Connector, VolumeHandle, VolumeOptions};
use crate::error::{ClusterError, DriverError, Result};
use crate::events::{DriverEvent, EventSink, TracingSink};
use crate::location::{
    ImageLocation, ImageMeta, SnapshotLocation, parse_export_path, parse_location_url,
};
use crate::tools::{CephTools, CommandRunner, MonitorAddresses, SystemRunner};

const KIB: u64 = 1024;

fn kib_to_bytes(kib: u64) -> Result<u64> {
    kib.checked_mul(KIB).ok_or_else(|| {
        DriverError::Volume(ClusterError::InvalidArgument(format!(
            "cluster reported {kib} KiB, which overflows a byte count"
        )))
    })
}

/// Pool capacity, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

/// What a best-effort removal actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    HasSnapshots,
}

pub struct RbdDriver {
    connector: Connector,
    tools: CephTools,
    events: Arc<dyn EventSink>,
}

impl RbdDriver {
    /// Driver running host commands and logging through `tracing`
    pub fn new(config: DriverConfig, client: Arc<dyn ClusterClient>) -> Self {
        Self::with_collaborators(config, client, Arc::new(SystemRunner), Arc::new(TracingSink))
    }

    pub fn with_collaborators(
        config: DriverConfig,
        client: Arc<dyn ClusterClient>,
        runner: Arc<dyn CommandRunner>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            connector: Connector::new(client, config.clone(), events.clone()),
            tools: CephTools::new(runner, config, events.clone()),
            events,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        self.connector.config()
    }

    pub fn tools(&self) -> &CephTools {
        &self.tools
    }

    fn pool(&self) -> &str {
        self.config().pool()
    }

    fn with_connection<T>(
        &self,
        pool: Option<&str>,
        op: impl FnOnce(&ClusterConnection) -> Result<T>,
    ) -> Result<T> {
        let connection = self.connector.connect(pool)?;
        let value = op(&connection)?;
        connection.close();
        Ok(value)
    }

    fn with_volume<T>(
        &self,
        name: &str,
        options: VolumeOptions<'_>,
        op: impl FnOnce(&mut VolumeHandle) -> Result<T>,
    ) -> Result<T> {
        let mut volume = VolumeHandle::open(&self.connector, name, options)?;
        let value = op(&mut volume)?;
        volume.close()?;
        Ok(value)
    }

    pub fn parse_url(&self, url: &str) -> Result<SnapshotLocation> {
        parse_location_url(url)
    }

    /// Identifier of the cluster this driver talks to
    pub fn fsid(&self) -> Result<String> {
        self.with_connection(None, |connection| {
            connection.session().fsid().map_err(DriverError::Volume)
        })
    }

    /// Whether the image at `location` can be cloned directly. Never fails.
    pub fn is_cloneable(&self, location: &ImageLocation, meta: &ImageMeta) -> bool {
        let url = location.url.as_str();
        let reject = |reason: String| {
            self.events.emit(DriverEvent::NotCloneable {
                location: url.to_string(),
                reason,
            });
            false
        };

        let source = match parse_location_url(url) {
            Ok(source) => source,
            Err(err) => return reject(err.to_string()),
        };

        match self.fsid() {
            Ok(fsid) if fsid == source.cluster_id => {}
            Ok(_) => return reject(format!("{url} is in a different ceph cluster")),
            Err(err) => return reject(format!("unable to read cluster id: {err}")),
        }

        if meta.disk_format != "raw" {
            return reject(format!(
                "rbd image clone requires image format to be 'raw' but image {url} is '{}'",
                meta.disk_format
            ));
        }

        match self.exists(&source.image, Some(&source.pool), Some(&source.snapshot)) {
            Ok(true) => true,
            Ok(false) => reject("image does not exist".to_string()),
            Err(err) => reject(format!("unable to open image {url}: {err}")),
        }
    }

    /// Clone the snapshot at `location` into `dest_name` in the configured pool
    pub fn clone(&self, location: &ImageLocation, dest_name: &str) -> Result<()> {
        let source = parse_location_url(&location.url)?;
        self.events.emit(DriverEvent::Cloning {
            pool: source.pool.clone(),
            image: source.image.clone(),
            snapshot: source.snapshot.clone(),
            dest: dest_name.to_string(),
        });

        self.with_connection(Some(&source.pool), |src| {
            self.with_connection(None, |dest| {
                src.io_ctx()
                    .clone_image(
                        &source.image,
                        &source.snapshot,
                        dest.io_ctx(),
                        dest_name,
                        dest.features(),
                    )
                    .map_err(DriverError::from)
            })
        })
    }

    pub fn size(&self, name: &str) -> Result<u64> {
        self.with_volume(name, VolumeOptions::read_only(), |volume| volume.size())
    }

    /// Resize `name` to `size` bytes
    pub fn resize(&self, name: &str, size: u64) -> Result<()> {
        self.events.emit(DriverEvent::Resizing {
            name: name.to_string(),
            size,
        });
        self.with_volume(name, VolumeOptions::read_write(), |volume| {
            volume.resize(size)
        })
    }

    /// `Ok(false)` only when the image (or snapshot) does not exist
    pub fn exists(&self, name: &str, pool: Option<&str>, snapshot: Option<&str>) -> Result<bool> {
        let options = VolumeOptions::read_only()
            .in_pool(pool)
            .at_snapshot(snapshot);

        match self.with_volume(name, options, |_| Ok(())) {
            Ok(()) => Ok(true),
            Err(DriverError::VolumeNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Best-effort removal from the configured pool.
    ///
    /// Missing and snapshotted images are logged and reported through the
    /// outcome rather than as errors.
    pub fn remove_image(&self, name: &str) -> Result<RemoveOutcome> {
        self.with_connection(Some(self.pool()), |connection| {
            let pool = connection.pool().to_string();
            match connection.io_ctx().remove_image(name) {
                Ok(()) => Ok(RemoveOutcome::Removed),
                Err(ClusterError::ImageNotFound(_)) => {
                    self.events.emit(DriverEvent::RemoveNotFound {
                        pool,
                        name: name.to_string(),
                    });
                    Ok(RemoveOutcome::NotFound)
                }
                Err(ClusterError::ImageHasSnapshots(_)) => {
                    self.events.emit(DriverEvent::RemoveHasSnapshots {
                        pool,
                        name: name.to_string(),
                    });
                    Ok(RemoveOutcome::HasSnapshots)
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Import a local image file as a clone-capable (format 2) volume
    pub fn import_image(&self, base: &Path, name: &str) -> Result<()> {
        self.tools.import(base, name)
    }

    /// Export the `/pool/image/snapshot` named by `url` into `dst`
    pub fn export_image(&self, url: &Url, dst: &Path) -> Result<()> {
        let source = parse_export_path(url)?;
        let snapshot = source.snapshot.as_deref().unwrap_or_default();

        if !self.exists(&source.name, Some(&source.pool), Some(snapshot))? {
            self.events.emit(DriverEvent::ExportSourceMissing {
                image: source.name.clone(),
                snapshot: snapshot.to_string(),
            });
            return Err(DriverError::VolumeNotFound(format!(
                "{}@{}",
                source.name, snapshot
            )));
        }

        self.events.emit(DriverEvent::ExportStarted {
            image: source.name.clone(),
            snapshot: snapshot.to_string(),
        });
        self.tools
            .export(&source.pool, &source.name, snapshot, dst)
            .inspect_err(|err| {
                self.events.emit(DriverEvent::ExportFailed {
                    error: err.to_string(),
                })
            })
    }

    /// Remove every volume of the configured pool owned by `owner`
    pub fn cleanup_volumes(&self, owner: &str) -> Result<CleanupReport> {
        let policy = self.config().cleanup();
        self.with_connection(Some(self.pool()), |connection| {
            CleanupRetryLoop::new(connection, policy, self.events.as_ref()).run(owner)
        })
    }

    pub fn pool_info(&self) -> Result<PoolInfo> {
        self.with_connection(None, |connection| {
            let stats = connection
                .session()
                .cluster_stats()
                .map_err(DriverError::Volume)?;
            Ok(PoolInfo {
                total: kib_to_bytes(stats.kb)?,
                free: kib_to_bytes(stats.kb_avail)?,
                used: kib_to_bytes(stats.kb_used)?,
            })
        })
    }

    pub fn mon_addrs(&self) -> Result<MonitorAddresses> {
        self.tools.mon_addrs()
    }
}

impl std::fmt::Debug for RbdDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RbdDriver")
            .field("connector", &self.connector)
            .field("tools", &self.tools)
            .finish()
    }
}
