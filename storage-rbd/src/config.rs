// SPDX-License-Identifier: GPL-3.0-only

//! Driver identity and tuning
//!
//! A [`DriverConfig`] is built once, either in code or from a TOML file,
//! and then shared read-only behind an `Arc` by every component.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Attempts granted to each volume during an orphan cleanup pass
pub const DEFAULT_CLEANUP_ATTEMPTS: u32 = 10;

/// Pause between two scheduled removal attempts
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Pacing of the orphan cleanup retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    pub attempts: u32,
    #[serde(rename = "interval_secs", with = "seconds")]
    pub interval: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CLEANUP_ATTEMPTS,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Pool, cluster config and client identity used for every cluster call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ceph_conf: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rbd_user: Option<String>,
    #[serde(default)]
    cleanup: CleanupPolicy,
}

impl DriverConfig {
    /// Create a config for `pool` using the library's default config
    /// lookup and the default client identity.
    pub fn new(pool: impl Into<String>) -> Result<Self> {
        let config = Self {
            pool: pool.into(),
            ceph_conf: None,
            rbd_user: None,
            cleanup: CleanupPolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Point at an explicit ceph.conf; an empty path keeps the default lookup
    pub fn with_ceph_conf(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.ceph_conf = (!path.as_os_str().is_empty()).then_some(path);
        self
    }

    /// Authenticate as `user`; an empty name keeps the default identity
    pub fn with_rbd_user(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        self.rbd_user = (!user.is_empty()).then_some(user);
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Result<Self> {
        self.cleanup = cleanup;
        self.validate()?;
        Ok(self)
    }

    /// Parse a TOML document such as:
    ///
    /// ```toml
    /// pool = "vms"
    /// ceph_conf = "/etc/ceph/ceph.conf"
    /// rbd_user = "nova"
    ///
    /// [cleanup]
    /// attempts = 10
    /// interval_secs = 1
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| DriverError::config(e.to_string()))?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let with_path = |reason: String| DriverError::Config {
            path: Some(path.to_path_buf()),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| with_path(e.to_string()))?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            DriverError::Config { reason, .. } => with_path(reason),
            other => other,
        })
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn ceph_conf(&self) -> Option<&Path> {
        self.ceph_conf.as_deref()
    }

    pub fn rbd_user(&self) -> Option<&str> {
        self.rbd_user.as_deref()
    }

    pub fn cleanup(&self) -> CleanupPolicy {
        self.cleanup
    }

    /// Command line parameters for the ceph/rbd tools reflecting the
    /// configured user name and ceph.conf location
    pub fn ceph_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(user) = &self.rbd_user {
            args.extend(["--id".to_string(), user.clone()]);
        }
        if let Some(conf) = &self.ceph_conf {
            args.extend(["--conf".to_string(), conf.to_string_lossy().into_owned()]);
        }
        args
    }

    fn normalized(mut self) -> Self {
        self.ceph_conf = self.ceph_conf.filter(|path| !path.as_os_str().is_empty());
        self.rbd_user = self.rbd_user.filter(|user| !user.is_empty());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.pool.trim().is_empty() {
            return Err(DriverError::config("pool must not be empty"));
        }
        if self.cleanup.attempts == 0 {
            return Err(DriverError::config("cleanup attempts must be at least 1"));
        }
        Ok(())
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
