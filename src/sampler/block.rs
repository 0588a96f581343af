// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    calltree::CallSite,
    engine::{BlockProfilerEngine, ProfileHandle},
    pprof::RawProfile,
    profile::{Category, Profile, ProfileType, Unit},
};

use super::{FrameFilter, Sampler, SamplerError};

/// Record every blocking event while a burst is running.
const BLOCK_PROFILE_RATE: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BlockValues {
    delay: f64,
    contentions: f64,
}

/// Aggregates time spent blocked per call path, in milliseconds.
///
/// The block profile is cumulative since capture was first enabled, so each
/// burst folds in only the change since the previous observation of a stack.
/// Baselines are kept for the stacks present in the latest snapshot; a stack
/// that disappears from the engine's profile loses its baseline.
pub struct BlockSampler {
    engine: Arc<dyn BlockProfilerEngine>,
    filter: FrameFilter,
    top: CallSite,
    profile: Option<Arc<dyn ProfileHandle>>,
    prev_values: HashMap<String, BlockValues>,
}

impl BlockSampler {
    /// A sampler driving `engine`.
    pub fn new(engine: Arc<dyn BlockProfilerEngine>, filter: FrameFilter) -> Self {
        BlockSampler {
            engine,
            filter,
            top: CallSite::root(),
            profile: None,
            prev_values: HashMap::new(),
        }
    }

    fn update_block_profile(&mut self, profile: &RawProfile) -> Result<(), SamplerError> {
        let contentions_index = profile
            .value_index("contentions")
            .ok_or(SamplerError::MissingSampleType("contentions"))?;
        let delay_index = profile
            .value_index("delay")
            .ok_or(SamplerError::MissingSampleType("delay"))?;

        let mut baselines = HashMap::with_capacity(profile.samples.len());
        for sample in &profile.samples {
            let current = BlockValues {
                delay: sample.value(delay_index) as f64,
                contentions: sample.value(contentions_index) as f64,
            };
            let key = sample.stack_key();
            let change = value_change(self.prev_values.get(&key), current);
            baselines.insert(key, current);

            if change.contentions <= 0.0 || change.delay <= 0.0 {
                continue;
            }
            // nanoseconds to milliseconds
            let delay_millis = change.delay / 1e6;
            self.filter
                .fold_sample(&self.top, sample, delay_millis, change.contentions as i64);
        }
        self.prev_values = baselines;
        Ok(())
    }
}

/// The change of cumulative values since `prev`; a new stack contributes all of it.
fn value_change(prev: Option<&BlockValues>, current: BlockValues) -> BlockValues {
    match prev {
        None => current,
        Some(prev) => BlockValues {
            delay: current.delay - prev.delay,
            contentions: current.contentions - prev.contentions,
        },
    }
}

impl std::fmt::Debug for BlockSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSampler")
            .field("filter", &self.filter)
            .field("running", &self.profile.is_some())
            .field("tracked_stacks", &self.prev_values.len())
            .finish_non_exhaustive()
    }
}

impl Sampler for BlockSampler {
    fn reset(&mut self) {
        self.top = CallSite::root();
    }

    fn start(&mut self) -> Result<(), SamplerError> {
        let profile = self
            .engine
            .lookup_block_profile()
            .ok_or(SamplerError::BlockProfileUnavailable)?;
        self.profile = Some(profile);
        self.engine.set_block_profile_rate(BLOCK_PROFILE_RATE);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SamplerError> {
        self.engine.set_block_profile_rate(0);
        let handle = self.profile.take().ok_or(SamplerError::NotStarted)?;

        let mut buf = Vec::new();
        handle.write_to(&mut buf)?;
        let profile = RawProfile::decode(&buf)?;
        self.update_block_profile(&profile)
    }

    fn build_profile(&mut self, duration: Duration, timespan: Duration) -> Result<Profile, SamplerError> {
        Ok(Profile::new(
            Category::Time,
            ProfileType::BlockingCalls,
            Unit::Millisecond,
            self.top.children(),
            duration,
            timespan,
        ))
    }
}
