// SPDX-License-Identifier: GPL-3.0-only

//! Scoped cluster sessions and open volumes
//!
//! [`ClusterConnection`] owns a session and a pool I/O context as one unit
//! and [`VolumeHandle`] owns an open image plus the connection it was
//! opened through. Both release everything they acquired exactly once,
//! either through an explicit `close` or on drop, and both clean up
//! partially acquired resources before reporting an acquisition failure.

use std::sync::Arc;

use crate::cluster::{
    ClusterClient, ClusterSession, DEFAULT_FEATURES_KEY, IoContext, RBD_FEATURE_LAYERING, Volume,
};
use crate::config::DriverConfig;
use crate::error::{ClusterError, DriverError, Result};
use crate::events::{DriverEvent, EventSink};

/// Creates connections from the shared driver configuration
#[derive(Clone)]
pub struct Connector {
    client: Arc<dyn ClusterClient>,
    config: Arc<DriverConfig>,
    events: Arc<dyn EventSink>,
}

impl Connector {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        config: Arc<DriverConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            config,
            events,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// Connect and open an I/O context on `pool`, or on the configured pool
    pub fn connect(&self, pool: Option<&str>) -> Result<ClusterConnection> {
        ClusterConnection::open(self.client.as_ref(), &self.config, pool)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .finish()
    }
}

/// A connected session together with an I/O context on one pool
pub struct ClusterConnection {
    session: Box<dyn ClusterSession>,
    io_ctx: Box<dyn IoContext>,
    released: bool,
}

impl ClusterConnection {
    /// Create a session, connect, then open the I/O context.
    ///
    /// If anything after session creation fails, the session is shut down
    /// before the error is returned.
    pub fn open(
        client: &dyn ClusterClient,
        config: &DriverConfig,
        pool: Option<&str>,
    ) -> Result<Self> {
        let mut session = client
            .create_session(config.rbd_user(), config.ceph_conf())
            .map_err(DriverError::Connection)?;

        let pool = pool.unwrap_or(config.pool());
        let io_ctx = match session
            .connect()
            .and_then(|()| session.open_io_context(pool))
        {
            Ok(io_ctx) => io_ctx,
            Err(err) => {
                session.shutdown();
                return Err(DriverError::Connection(err));
            }
        };

        Ok(Self {
            session,
            io_ctx,
            released: false,
        })
    }

    pub fn session(&self) -> &dyn ClusterSession {
        self.session.as_ref()
    }

    pub fn io_ctx(&self) -> &dyn IoContext {
        self.io_ctx.as_ref()
    }

    pub fn pool(&self) -> &str {
        self.io_ctx.pool()
    }

    /// Default feature bitmask for new images, falling back to layering
    /// when the cluster leaves it unset or zero.
    pub fn features(&self) -> u64 {
        match self
            .session
            .conf_get(DEFAULT_FEATURES_KEY)
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            Some(features) if features != 0 => features,
            _ => RBD_FEATURE_LAYERING,
        }
    }

    /// Release the I/O context, then the session
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.io_ctx.close();
        self.session.shutdown();
    }
}

impl Drop for ClusterConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("pool", &self.pool())
            .field("released", &self.released)
            .finish()
    }
}

/// How a volume should be opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeOptions<'a> {
    pub pool: Option<&'a str>,
    pub snapshot: Option<&'a str>,
    pub read_only: bool,
}

impl<'a> VolumeOptions<'a> {
    pub fn read_write() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn in_pool(mut self, pool: Option<&'a str>) -> Self {
        self.pool = pool;
        self
    }

    pub fn at_snapshot(mut self, snapshot: Option<&'a str>) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// An open image plus the connection it was opened through
pub struct VolumeHandle {
    name: String,
    volume: Box<dyn Volume>,
    connection: ClusterConnection,
    closed: bool,
}

impl VolumeHandle {
    /// Connect, then open `name` within that connection.
    ///
    /// A failed image open closes the fresh connection before the error
    /// is returned.
    pub fn open(connector: &Connector, name: &str, options: VolumeOptions<'_>) -> Result<Self> {
        let connection = connector.connect(options.pool)?;

        let opened = connection
            .io_ctx()
            .open_image(name, options.snapshot, options.read_only);

        match opened {
            Ok(volume) => Ok(Self {
                name: name.to_string(),
                volume,
                connection,
                closed: false,
            }),
            Err(err) => {
                let event = match &err {
                    ClusterError::ImageNotFound(_) => DriverEvent::ImageMissing {
                        name: name.to_string(),
                    },
                    other => DriverEvent::ImageOpenFailed {
                        name: name.to_string(),
                        error: other.to_string(),
                    },
                };
                connector.events().emit(event);
                connection.close();
                Err(err.into())
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &ClusterConnection {
        &self.connection
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.volume.size()?)
    }

    pub fn resize(&mut self, size: u64) -> Result<()> {
        Ok(self.volume.resize(size)?)
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        Ok(self.volume.read(offset, len)?)
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        Ok(self.volume.write(offset, data)?)
    }

    /// Close the image, then release the connection even if closing the
    /// image failed.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let closed = self.volume.close();
        self.connection.release();
        closed.map_err(DriverError::from)
    }
}

impl Drop for VolumeHandle {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

impl std::fmt::Debug for VolumeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeHandle")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("closed", &self.closed)
            .finish()
    }
}
