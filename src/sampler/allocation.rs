// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::Arc, time::Duration};

use crate::{
    calltree::CallSite,
    engine::HeapProfilerEngine,
    pprof::RawProfile,
    profile::{Category, Profile, ProfileType, Unit},
};

use super::{FrameFilter, Sampler, SamplerError};

/// Reports live heap bytes per allocating call path.
///
/// Heap snapshots are absolute, so there is nothing to accumulate between
/// reports: `reset`, `start` and `stop` do nothing and every
/// [`build_profile`](Sampler::build_profile) takes a fresh snapshot.
pub struct AllocationSampler {
    engine: Arc<dyn HeapProfilerEngine>,
    filter: FrameFilter,
}

impl AllocationSampler {
    /// A sampler reading snapshots from `engine`.
    pub fn new(engine: Arc<dyn HeapProfilerEngine>, filter: FrameFilter) -> Self {
        AllocationSampler { engine, filter }
    }

    fn read_heap_profile(&self) -> Result<RawProfile, SamplerError> {
        let mut buf = Vec::new();
        self.engine.write_heap_profile(&mut buf)?;
        Ok(RawProfile::decode(&buf)?)
    }

    fn create_allocation_call_graph(&self, profile: &RawProfile) -> Result<CallSite, SamplerError> {
        let space_index = profile
            .value_index("inuse_space")
            .ok_or(SamplerError::MissingSampleType("inuse_space"))?;
        let objects_index = profile
            .value_index("inuse_objects")
            .ok_or(SamplerError::MissingSampleType("inuse_objects"))?;

        let top = CallSite::root();
        for sample in &profile.samples {
            let space = sample.value(space_index);
            if space == 0 {
                continue;
            }
            self.filter
                .fold_sample(&top, sample, space as f64, sample.value(objects_index));
        }
        Ok(top)
    }
}

impl std::fmt::Debug for AllocationSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationSampler")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl Sampler for AllocationSampler {
    fn reset(&mut self) {}

    fn start(&mut self) -> Result<(), SamplerError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SamplerError> {
        Ok(())
    }

    fn build_profile(&mut self, duration: Duration, timespan: Duration) -> Result<Profile, SamplerError> {
        let heap = self.read_heap_profile()?;
        let top = self.create_allocation_call_graph(&heap)?;
        Ok(Profile::new(
            Category::Memory,
            ProfileType::MemoryAllocations,
            Unit::Byte,
            top.children(),
            duration,
            timespan,
        ))
    }
}
