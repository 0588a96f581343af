// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The profile emitted once per report window.

use std::{
    sync::{
        atomic::{self, AtomicU64},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::calltree::CallSite;

/// What a profile measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// CPU time.
    Cpu,
    /// Memory.
    Memory,
    /// Wall time spent waiting.
    Time,
}

/// The kind of profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileType {
    /// CPU usage per call path.
    CpuUsage,
    /// Live heap allocations per call path.
    MemoryAllocations,
    /// Time blocked on synchronization per call path.
    BlockingCalls,
}

/// The unit of [`CallSite`] measurements.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    /// Dimensionless.
    #[serde(rename = "")]
    None,
    #[serde(rename = "millisecond")]
    Millisecond,
    #[serde(rename = "microsecond")]
    Microsecond,
    #[serde(rename = "nanosecond")]
    Nanosecond,
    #[serde(rename = "byte")]
    Byte,
    #[serde(rename = "kilobyte")]
    Kilobyte,
    #[serde(rename = "percent")]
    Percent,
}

/// One report window's worth of samples, as a forest of call sites.
///
/// Serializes to `{id, pid, runtime, category, type, unit, roots, duration,
/// timespan, timestamp}` where `duration` and `timespan` are milliseconds
/// and `timestamp` is milliseconds since the epoch.
#[derive(Debug, Serialize)]
pub struct Profile {
    id: String,
    #[serde(rename = "pid")]
    process_id: String,
    runtime: &'static str,
    category: Category,
    #[serde(rename = "type")]
    profile_type: ProfileType,
    unit: Unit,
    roots: Vec<Arc<CallSite>>,
    #[serde(serialize_with = "as_millis")]
    duration: Duration,
    #[serde(serialize_with = "as_millis")]
    timespan: Duration,
    timestamp: u64,
}

impl Profile {
    /// Creates a profile for the current process, stamped with the current time.
    pub fn new(
        category: Category,
        profile_type: ProfileType,
        unit: Unit,
        roots: Vec<Arc<CallSite>>,
        duration: Duration,
        timespan: Duration,
    ) -> Self {
        Profile {
            id: generate_id(),
            process_id: crate::metadata::process_id(),
            runtime: "rust",
            category,
            profile_type,
            unit,
            roots,
            duration,
            timespan,
            timestamp: epoch_millis(SystemTime::now()),
        }
    }

    /// Replaces the process id, e.g. with the pid seen from outside a container.
    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = process_id.into();
        self
    }

    /// Unique id of this profile.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The reporting process.
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// See [`Category`].
    pub fn category(&self) -> Category {
        self.category
    }

    /// See [`ProfileType`].
    pub fn profile_type(&self) -> ProfileType {
        self.profile_type
    }

    /// See [`Unit`].
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// The top-level call sites.
    pub fn roots(&self) -> &[Arc<CallSite>] {
        &self.roots
    }

    /// Time spent actively sampling.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Wall-clock window covered.
    pub fn timespan(&self) -> Duration {
        self.timespan
    }

    /// Creation time, milliseconds since the epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Renders the wire representation handed to the recorder.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let random: u64 = rand::random();
    let counter = ID_COUNTER.fetch_add(1, atomic::Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&random.to_le_bytes());
    hasher.update(&counter.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}
