// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Mutex;

use storage_rbd::{DriverEvent, EventSink};

use crate::memory::lock;

/// Keeps every emitted event, and forwards it to `tracing` at debug level
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DriverEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        lock(&self.events).clone()
    }

    /// Events with the given machine name
    pub fn named(&self, name: &str) -> Vec<DriverEvent> {
        lock(&self.events)
            .iter()
            .filter(|event| event.name() == name)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DriverEvent) {
        tracing::debug!(event = event.name(), "{event}");
        lock(&self.events).push(event);
    }
}
