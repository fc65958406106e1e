#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use storage_rbd::{CleanupPolicy, DriverConfig, RbdDriver};
use storage_rbd_testing::{MemoryCluster, RecordingSink, ScriptedRunner};

pub const FSID: &str = "b8b9a3c2-5f0e-4c36-9d0a-0d2a1f6c2e11";
pub const POOL: &str = "vms";
pub const IMAGES_POOL: &str = "images";

pub struct Fixture {
    pub cluster: MemoryCluster,
    pub runner: Arc<ScriptedRunner>,
    pub events: Arc<RecordingSink>,
    pub driver: RbdDriver,
}

/// Default config with a zero retry interval so cleanup tests run instantly
pub fn config() -> DriverConfig {
    DriverConfig::new(POOL)
        .unwrap()
        .with_cleanup(CleanupPolicy {
            attempts: 10,
            interval: Duration::ZERO,
        })
        .unwrap()
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        let cluster = MemoryCluster::new(FSID);
        cluster.add_pool(POOL).add_pool(IMAGES_POOL);

        let runner = Arc::new(ScriptedRunner::new());
        let events = Arc::new(RecordingSink::new());
        let driver = RbdDriver::with_collaborators(
            config,
            Arc::new(cluster.clone()),
            runner.clone(),
            events.clone(),
        );

        Self {
            cluster,
            runner,
            events,
            driver,
        }
    }

    pub fn assert_balanced(&self) {
        let accounting = self.cluster.accounting();
        assert!(accounting.is_balanced(), "leaked resources: {accounting:?}");
    }
}
