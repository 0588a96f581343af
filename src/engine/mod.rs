// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The raw profiling facilities the samplers drive.
//!
//! Each engine writes pprof protobuf bytes (plain or gzip-compressed) to a
//! byte sink; the samplers decode and aggregate them. The CPU facility has a
//! built-in implementation on unix, [`PprofCpuEngine`], backed by
//! [pprof-rs]. Heap and contention facilities depend on the allocator and
//! synchronization primitives the application uses, so they are supplied by
//! the embedding application.
//!
//! All of these are process-wide resources: the scheduler guarantees only
//! one of them is capturing at any time.
//!
//! [pprof-rs]: https://github.com/tikv/pprof-rs

use std::{io, sync::Arc};

use thiserror::Error;

#[cfg(unix)]
mod pprof_cpu;
#[cfg(unix)]
pub use pprof_cpu::PprofCpuEngine;

/// Failure of a raw profiling facility.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Writing the profile to the sink failed.
    #[error("profiling engine i/o error: {0}")]
    Io(#[from] io::Error),
    /// pprof-rs failed to start or to build its report.
    #[cfg(unix)]
    #[error("pprof error: {0}")]
    Pprof(#[from] pprof::Error),
    /// A capture was started while one is already running.
    #[error("profiling engine is already running")]
    AlreadyRunning,
    /// A capture was stopped while none is running.
    #[error("profiling engine is not running")]
    NotRunning,
    /// Any other engine-specific failure.
    #[error("profiling engine error: {0}")]
    Other(String),
}

/// Start/stop CPU profiling into a byte sink.
pub trait CpuProfilerEngine: Send + 'static {
    /// Begins capturing CPU samples.
    fn start_cpu_profile(&mut self) -> Result<(), EngineError>;
    /// Ends the capture and writes the pprof profile of everything sampled
    /// since [`start_cpu_profile`](Self::start_cpu_profile) to `sink`.
    ///
    /// The profile must carry `samples` and `cpu` (nanoseconds) value columns.
    fn stop_cpu_profile(&mut self, sink: &mut dyn io::Write) -> Result<(), EngineError>;
}

/// Snapshot of the live heap.
pub trait HeapProfilerEngine: Send + Sync + 'static {
    /// Writes a pprof profile of the currently live allocations to `sink`.
    ///
    /// The profile must carry `inuse_space` and `inuse_objects` value columns.
    fn write_heap_profile(&self, sink: &mut dyn io::Write) -> Result<(), EngineError>;
}

/// A profile that can be written out on demand.
pub trait ProfileHandle: Send + Sync {
    /// Writes the pprof profile to `sink`.
    fn write_to(&self, sink: &mut dyn io::Write) -> Result<(), EngineError>;
}

/// Cumulative contention (blocking) profiling.
pub trait BlockProfilerEngine: Send + Sync + 'static {
    /// Sets the sampling rate: 1 records every blocking event, 0 disables capture.
    fn set_block_profile_rate(&self, rate: i64);
    /// Looks up the active block profile, if the facility has one.
    ///
    /// The profile is cumulative since capture was first enabled and must
    /// carry `contentions` and `delay` (nanoseconds) value columns.
    fn lookup_block_profile(&self) -> Option<Arc<dyn ProfileHandle>>;
}
