// SPDX-License-Identifier: GPL-3.0-only

//! In-process cluster implementing the driver's client library contract
//!
//! Every session, I/O context and image open/close is counted so tests can
//! assert that nothing leaks, and faults can be injected at each
//! acquisition step.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use storage_rbd::{ClusterClient, ClusterError, ClusterSession, ClusterStats, IoContext, Volume};

/// Acquisition/release counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accounting {
    pub sessions_created: u32,
    pub sessions_connected: u32,
    pub sessions_shutdown: u32,
    pub contexts_opened: u32,
    pub contexts_closed: u32,
    pub images_opened: u32,
    pub images_closed: u32,
}

impl Accounting {
    /// Every session, context and image acquired was released exactly once
    pub fn is_balanced(&self) -> bool {
        self.sessions_created == self.sessions_shutdown
            && self.contexts_opened == self.contexts_closed
            && self.images_opened == self.images_closed
    }
}

/// Failure injected at a given step; stays active until cleared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    CreateSession(ClusterError),
    Connect(ClusterError),
    OpenIoContext(ClusterError),
    OpenImage(ClusterError),
    CloseImage(ClusterError),
}

#[derive(Debug, Clone, Default)]
struct MemoryImage {
    size: u64,
    bytes: BTreeMap<u64, u8>,
    snapshots: BTreeSet<String>,
    busy: bool,
    features: u64,
    parent: Option<(String, String, String)>,
}

#[derive(Debug, Default)]
struct State {
    fsid: String,
    conf: HashMap<String, String>,
    stats: ClusterStats,
    pools: BTreeMap<String, BTreeMap<String, MemoryImage>>,
    faults: Vec<Fault>,
    pending_removal_failures: HashMap<String, VecDeque<ClusterError>>,
    removal_calls: HashMap<String, u32>,
    accounting: Accounting,
    last_identity: Option<String>,
    last_conf: Option<PathBuf>,
}

impl State {
    fn fault(&self, matches: impl Fn(&Fault) -> Option<&ClusterError>) -> Option<ClusterError> {
        self.faults.iter().find_map(matches).cloned()
    }

    fn image(&self, pool: &str, name: &str) -> Result<&MemoryImage, ClusterError> {
        self.pools
            .get(pool)
            .and_then(|images| images.get(name))
            .ok_or_else(|| ClusterError::ImageNotFound(name.to_string()))
    }

    fn image_mut(&mut self, pool: &str, name: &str) -> Result<&mut MemoryImage, ClusterError> {
        self.pools
            .get_mut(pool)
            .and_then(|images| images.get_mut(name))
            .ok_or_else(|| ClusterError::ImageNotFound(name.to_string()))
    }
}

type Shared = Arc<Mutex<State>>;

/// Lock, recovering the guard from a poisoned mutex
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Shared,
}

impl MemoryCluster {
    pub fn new(fsid: impl Into<String>) -> Self {
        let cluster = Self::default();
        lock(&cluster.state).fsid = fsid.into();
        cluster
    }

    pub fn add_pool(&self, pool: &str) -> &Self {
        lock(&self.state).pools.entry(pool.to_string()).or_default();
        self
    }

    pub fn add_image(&self, pool: &str, name: &str, size: u64) -> &Self {
        lock(&self.state)
            .pools
            .entry(pool.to_string())
            .or_default()
            .insert(
                name.to_string(),
                MemoryImage {
                    size,
                    ..MemoryImage::default()
                },
            );
        self
    }

    pub fn add_snapshot(&self, pool: &str, name: &str, snapshot: &str) -> &Self {
        if let Ok(image) = lock(&self.state).image_mut(pool, name) {
            image.snapshots.insert(snapshot.to_string());
        }
        self
    }

    pub fn set_busy(&self, pool: &str, name: &str, busy: bool) -> &Self {
        if let Ok(image) = lock(&self.state).image_mut(pool, name) {
            image.busy = busy;
        }
        self
    }

    pub fn set_conf(&self, key: &str, value: &str) -> &Self {
        lock(&self.state)
            .conf
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_stats(&self, stats: ClusterStats) -> &Self {
        lock(&self.state).stats = stats;
        self
    }

    pub fn inject(&self, fault: Fault) -> &Self {
        lock(&self.state).faults.push(fault);
        self
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Make the next removals of `name` fail with `errors`, in order
    pub fn fail_removals(&self, name: &str, errors: impl IntoIterator<Item = ClusterError>) {
        lock(&self.state)
            .pending_removal_failures
            .entry(name.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn accounting(&self) -> Accounting {
        lock(&self.state).accounting
    }

    pub fn removal_calls(&self, name: &str) -> u32 {
        lock(&self.state)
            .removal_calls
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn image_names(&self, pool: &str) -> Vec<String> {
        lock(&self.state)
            .pools
            .get(pool)
            .map(|images| images.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn image_size(&self, pool: &str, name: &str) -> Option<u64> {
        lock(&self.state).image(pool, name).ok().map(|image| image.size)
    }

    pub fn image_features(&self, pool: &str, name: &str) -> Option<u64> {
        lock(&self.state)
            .image(pool, name)
            .ok()
            .map(|image| image.features)
    }

    /// `(pool, image, snapshot)` a clone was created from
    pub fn image_parent(&self, pool: &str, name: &str) -> Option<(String, String, String)> {
        lock(&self.state)
            .image(pool, name)
            .ok()
            .and_then(|image| image.parent.clone())
    }

    pub fn last_identity(&self) -> Option<String> {
        lock(&self.state).last_identity.clone()
    }

    pub fn last_conf(&self) -> Option<PathBuf> {
        lock(&self.state).last_conf.clone()
    }
}

impl ClusterClient for MemoryCluster {
    fn create_session(
        &self,
        identity: Option<&str>,
        conf: Option<&Path>,
    ) -> Result<Box<dyn ClusterSession>, ClusterError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fault(|fault| match fault {
            Fault::CreateSession(err) => Some(err),
            _ => None,
        }) {
            return Err(err);
        }

        state.accounting.sessions_created += 1;
        state.last_identity = identity.map(str::to_string);
        state.last_conf = conf.map(Path::to_path_buf);

        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            connected: false,
        }))
    }
}

struct MemorySession {
    state: Shared,
    connected: bool,
}

impl MemorySession {
    fn ensure_connected(&self) -> Result<(), ClusterError> {
        if self.connected {
            Ok(())
        } else {
            Err(ClusterError::InvalidArgument("session is not connected".into()))
        }
    }
}

impl ClusterSession for MemorySession {
    fn connect(&mut self) -> Result<(), ClusterError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fault(|fault| match fault {
            Fault::Connect(err) => Some(err),
            _ => None,
        }) {
            return Err(err);
        }
        state.accounting.sessions_connected += 1;
        self.connected = true;
        Ok(())
    }

    fn open_io_context(&self, pool: &str) -> Result<Box<dyn IoContext>, ClusterError> {
        self.ensure_connected()?;
        let mut state = lock(&self.state);
        if let Some(err) = state.fault(|fault| match fault {
            Fault::OpenIoContext(err) => Some(err),
            _ => None,
        }) {
            return Err(err);
        }
        if !state.pools.contains_key(pool) {
            return Err(ClusterError::PoolNotFound(pool.to_string()));
        }

        state.accounting.contexts_opened += 1;
        Ok(Box::new(MemoryIoContext {
            state: self.state.clone(),
            pool: pool.to_string(),
        }))
    }

    fn conf_get(&self, key: &str) -> Option<String> {
        lock(&self.state).conf.get(key).cloned()
    }

    fn fsid(&self) -> Result<String, ClusterError> {
        self.ensure_connected()?;
        Ok(lock(&self.state).fsid.clone())
    }

    fn cluster_stats(&self) -> Result<ClusterStats, ClusterError> {
        self.ensure_connected()?;
        Ok(lock(&self.state).stats)
    }

    fn shutdown(&mut self) {
        lock(&self.state).accounting.sessions_shutdown += 1;
        self.connected = false;
    }
}

struct MemoryIoContext {
    state: Shared,
    pool: String,
}

impl IoContext for MemoryIoContext {
    fn pool(&self) -> &str {
        &self.pool
    }

    fn open_image(
        &self,
        name: &str,
        snapshot: Option<&str>,
        read_only: bool,
    ) -> Result<Box<dyn Volume>, ClusterError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.fault(|fault| match fault {
            Fault::OpenImage(err) => Some(err),
            _ => None,
        }) {
            return Err(err);
        }

        let image = state.image(&self.pool, name)?;
        if let Some(snapshot) = snapshot
            && !image.snapshots.contains(snapshot)
        {
            return Err(ClusterError::ImageNotFound(format!("{name}@{snapshot}")));
        }

        state.accounting.images_opened += 1;
        Ok(Box::new(MemoryVolume {
            state: self.state.clone(),
            pool: self.pool.clone(),
            name: name.to_string(),
            writable: !read_only && snapshot.is_none(),
        }))
    }

    fn remove_image(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = lock(&self.state);
        *state.removal_calls.entry(name.to_string()).or_default() += 1;

        if let Some(err) = state
            .pending_removal_failures
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let image = state.image(&self.pool, name)?;
        if image.busy {
            return Err(ClusterError::ImageBusy(name.to_string()));
        }
        if !image.snapshots.is_empty() {
            return Err(ClusterError::ImageHasSnapshots(name.to_string()));
        }

        if let Some(images) = state.pools.get_mut(&self.pool) {
            images.remove(name);
        }
        Ok(())
    }

    fn list_images(&self) -> Result<Vec<String>, ClusterError> {
        let state = lock(&self.state);
        Ok(state
            .pools
            .get(&self.pool)
            .map(|images| images.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clone_image(
        &self,
        parent: &str,
        snapshot: &str,
        dest: &dyn IoContext,
        dest_name: &str,
        features: u64,
    ) -> Result<(), ClusterError> {
        let mut state = lock(&self.state);

        let source = state.image(&self.pool, parent)?;
        if !source.snapshots.contains(snapshot) {
            return Err(ClusterError::ImageNotFound(format!("{parent}@{snapshot}")));
        }
        let size = source.size;

        let dest_pool = state
            .pools
            .get_mut(dest.pool())
            .ok_or_else(|| ClusterError::PoolNotFound(dest.pool().to_string()))?;
        if dest_pool.contains_key(dest_name) {
            return Err(ClusterError::ImageExists(dest_name.to_string()));
        }

        dest_pool.insert(
            dest_name.to_string(),
            MemoryImage {
                size,
                features,
                parent: Some((self.pool.clone(), parent.to_string(), snapshot.to_string())),
                ..MemoryImage::default()
            },
        );
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).accounting.contexts_closed += 1;
    }
}

struct MemoryVolume {
    state: Shared,
    pool: String,
    name: String,
    writable: bool,
}

impl MemoryVolume {
    fn ensure_writable(&self) -> Result<(), ClusterError> {
        if self.writable {
            Ok(())
        } else {
            Err(ClusterError::InvalidArgument(format!(
                "image {} is opened read-only",
                self.name
            )))
        }
    }
}

impl Volume for MemoryVolume {
    fn size(&self) -> Result<u64, ClusterError> {
        Ok(lock(&self.state).image(&self.pool, &self.name)?.size)
    }

    fn resize(&mut self, size: u64) -> Result<(), ClusterError> {
        self.ensure_writable()?;
        let mut state = lock(&self.state);
        let image = state.image_mut(&self.pool, &self.name)?;
        image.size = size;
        image.bytes.retain(|offset, _| *offset < size);
        Ok(())
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, ClusterError> {
        let state = lock(&self.state);
        let image = state.image(&self.pool, &self.name)?;
        let end = offset.saturating_add(len as u64).min(image.size);
        Ok((offset..end)
            .map(|at| image.bytes.get(&at).copied().unwrap_or(0))
            .collect())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, ClusterError> {
        self.ensure_writable()?;
        let mut state = lock(&self.state);
        let image = state.image_mut(&self.pool, &self.name)?;
        if offset.saturating_add(data.len() as u64) > image.size {
            return Err(ClusterError::InvalidArgument(format!(
                "write past the end of image {}",
                self.name
            )));
        }
        for (at, byte) in (offset..).zip(data) {
            image.bytes.insert(at, *byte);
        }
        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), ClusterError> {
        let mut state = lock(&self.state);
        state.accounting.images_closed += 1;
        match state.fault(|fault| match fault {
            Fault::CloseImage(err) => Some(err),
            _ => None,
        }) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
