// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for exercising the RBD driver without a cluster
//!
//! - [`MemoryCluster`]: an in-process cluster with fault injection and
//!   session/context/image accounting
//! - [`ScriptedRunner`]: a command runner that records invocations and
//!   replays scripted results
//! - [`RecordingSink`]: an event sink that keeps every event

pub mod memory;
pub mod runner;
pub mod sink;

pub use memory::{Accounting, Fault, MemoryCluster};
pub use runner::{Invocation, ScriptedRunner};
pub use sink::RecordingSink;
