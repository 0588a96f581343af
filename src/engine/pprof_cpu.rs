// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io;

use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};

use super::{CpuProfilerEngine, EngineError};

const DEFAULT_FREQUENCY: i32 = 100;
const BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso"];

/// CPU profiling through pprof-rs' `SIGPROF` sampler.
///
/// pprof-rs keeps a single global profiler, so at most one engine can be
/// capturing at a time; starting a second one fails.
pub struct PprofCpuEngine {
    frequency: i32,
    guard: Option<ProfilerGuard<'static>>,
}

impl PprofCpuEngine {
    /// Sample at `frequency` Hz.
    pub fn new(frequency: i32) -> Self {
        PprofCpuEngine {
            frequency,
            guard: None,
        }
    }
}

impl Default for PprofCpuEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY)
    }
}

impl std::fmt::Debug for PprofCpuEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PprofCpuEngine")
            .field("frequency", &self.frequency)
            .field("running", &self.guard.is_some())
            .finish()
    }
}

impl CpuProfilerEngine for PprofCpuEngine {
    fn start_cpu_profile(&mut self) -> Result<(), EngineError> {
        if self.guard.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let guard = ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(BLOCKLIST)
            .build()?;
        self.guard = Some(guard);
        tracing::debug!(frequency = self.frequency, "pprof cpu profiler started");
        Ok(())
    }

    fn stop_cpu_profile(&mut self, sink: &mut dyn io::Write) -> Result<(), EngineError> {
        let guard = self.guard.take().ok_or(EngineError::NotRunning)?;
        let report = guard.report().build()?;
        // stop sampling before the (slow) encoding
        drop(guard);
        let profile = report.pprof()?;
        sink.write_all(&profile.encode_to_vec())?;
        tracing::debug!("pprof cpu profiler stopped");
        Ok(())
    }
}
