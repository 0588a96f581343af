// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    calltree::CallSite,
    engine::CpuProfilerEngine,
    pprof::RawProfile,
    profile::{Category, Profile, ProfileType, Unit},
};

use super::{FrameFilter, Sampler, SamplerError};

/// Aggregates CPU time per call path, in milliseconds.
pub struct CpuSampler {
    engine: Box<dyn CpuProfilerEngine>,
    filter: FrameFilter,
    top: CallSite,
    started_at: Option<SystemTime>,
}

impl CpuSampler {
    /// A sampler driving `engine`.
    pub fn new(engine: Box<dyn CpuProfilerEngine>, filter: FrameFilter) -> Self {
        CpuSampler {
            engine,
            filter,
            top: CallSite::root(),
            started_at: None,
        }
    }

    fn update_cpu_profile(&self, profile: &RawProfile) -> Result<(), SamplerError> {
        let samples_index = profile
            .value_index("samples")
            .ok_or(SamplerError::MissingSampleType("samples"))?;
        let cpu_index = profile
            .value_index("cpu")
            .ok_or(SamplerError::MissingSampleType("cpu"))?;

        for sample in &profile.samples {
            let cpu_millis = sample.value(cpu_index) as f64 / 1e6;
            self.filter
                .fold_sample(&self.top, sample, cpu_millis, sample.value(samples_index));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuSampler")
            .field("filter", &self.filter)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Sampler for CpuSampler {
    fn reset(&mut self) {
        self.top = CallSite::root();
    }

    fn start(&mut self) -> Result<(), SamplerError> {
        self.engine.start_cpu_profile()?;
        self.started_at = Some(SystemTime::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SamplerError> {
        let started_at = self.started_at.take().ok_or(SamplerError::NotStarted)?;
        let mut buf = Vec::new();
        self.engine.stop_cpu_profile(&mut buf)?;

        let mut profile = RawProfile::decode(&buf)?;
        if profile.time_nanos == 0 {
            profile.time_nanos = started_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
        }
        if profile.duration_nanos == 0 {
            profile.duration_nanos = started_at
                .elapsed()
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
        }
        tracing::trace!(
            samples = profile.samples.len(),
            duration_nanos = profile.duration_nanos,
            "parsed cpu profile"
        );
        self.update_cpu_profile(&profile)
    }

    fn build_profile(&mut self, duration: Duration, timespan: Duration) -> Result<Profile, SamplerError> {
        Ok(Profile::new(
            Category::Cpu,
            ProfileType::CpuUsage,
            Unit::Millisecond,
            self.top.children(),
            duration,
            timespan,
        ))
    }
}
