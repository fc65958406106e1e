// SPDX-License-Identifier: GPL-3.0-only

//! Low-level ceph/rbd CLI operations
//!
//! Import and export go through the `rbd` command line tool rather than
//! the client library, since `rbd import` detects zeroes and keeps the
//! image sparse. Monitor addresses come from `ceph mon dump`.

pub mod monmap;
pub mod runner;

use std::path::Path;
use std::sync::Arc;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::events::{DriverEvent, EventSink};

pub use monmap::{MonitorAddresses, parse_mon_dump};
pub use runner::{CommandOutput, CommandRunner, SystemRunner, render};

/// Image format 2 is the one supporting clones; older releases default to 1
const IMAGE_FORMAT_ARG: &str = "--image-format=2";

/// ceph/rbd CLI wrapper bound to the driver configuration
#[derive(Clone)]
pub struct CephTools {
    runner: Arc<dyn CommandRunner>,
    config: Arc<DriverConfig>,
    events: Arc<dyn EventSink>,
}

impl CephTools {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<DriverConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            runner,
            config,
            events,
        }
    }

    fn run(&self, program: &str, args: Vec<String>) -> Result<CommandOutput> {
        self.events.emit(DriverEvent::CommandStarted {
            command: render(program, &args),
        });
        self.runner.run(program, &args)
    }

    /// Query monitor hosts and ports from `ceph mon dump`
    pub fn mon_addrs(&self) -> Result<MonitorAddresses> {
        let mut args = vec![
            "mon".to_string(),
            "dump".to_string(),
            "--format=json".to_string(),
        ];
        args.extend(self.config.ceph_args());

        let output = self.run("ceph", args)?;
        parse_mon_dump(&output.stdout)
    }

    /// `rbd import` a local file as `name` in the configured pool
    pub fn import(&self, base: &Path, name: &str) -> Result<()> {
        let mut args = vec![
            "import".to_string(),
            "--pool".to_string(),
            self.config.pool().to_string(),
            base.to_string_lossy().into_owned(),
            name.to_string(),
            IMAGE_FORMAT_ARG.to_string(),
        ];
        args.extend(self.config.ceph_args());

        self.run("rbd", args)?;
        Ok(())
    }

    /// `rbd export` `pool/image@snapshot` into a local file
    pub fn export(&self, pool: &str, image: &str, snapshot: &str, dst: &Path) -> Result<()> {
        let mut args = vec!["export".to_string()];
        args.extend(self.config.ceph_args());
        args.extend([
            "--pool".to_string(),
            pool.to_string(),
            "--snap".to_string(),
            snapshot.to_string(),
            image.to_string(),
            dst.to_string_lossy().into_owned(),
        ]);

        self.run("rbd", args)?;
        Ok(())
    }
}

impl std::fmt::Debug for CephTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CephTools")
            .field("config", &self.config)
            .finish()
    }
}
