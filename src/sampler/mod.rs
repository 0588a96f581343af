// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Samplers turn raw engine output into call trees and profiles.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    calltree::CallSite,
    engine::EngineError,
    pprof::{Frame, ParseError, RawSample},
    profile::Profile,
};

pub mod allocation;
pub mod block;
pub mod cpu;

pub use allocation::AllocationSampler;
pub use block::BlockSampler;
pub use cpu::CpuSampler;

/// Functions of the profiler itself. A sample taken while one of them was
/// running measures the profiler, not the application.
const PROFILER_FRAME_PREFIX: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

/// Functions of the sampling engine. They sit on top of every stack the
/// engine's signal handler captures.
const ENGINE_FRAME_PREFIXES: &[&str] = &["pprof::", "backtrace::"];

/// Thread entry trampolines that sit at the root of every stack.
const SYNTHETIC_FRAMES: &[&str] = &[
    "start_thread",
    "clone",
    "clone3",
    "__clone",
    "__clone3",
    "_start",
    "__libc_start_main",
    "__libc_start_call_main",
];

/// A failed sampler operation. Fatal for that call only.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SamplerError {
    /// The raw profiling facility failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The engine's output could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The profile lacks a value column the sampler needs.
    #[error("unrecognized profile data: no {0:?} sample type")]
    MissingSampleType(&'static str),
    /// The block profile handle could not be looked up.
    #[error("block profile is not available")]
    BlockProfileUnavailable,
    /// `stop` was called without a successful `start`.
    #[error("sampler was not started")]
    NotStarted,
}

/// The contract every sampler implements.
///
/// The scheduler calls `reset` at the start of each report window, brackets
/// every sampling burst with `start`/`stop`, and calls `build_profile` once per
/// report window.
pub trait Sampler: Send {
    /// Discards the accumulated call tree.
    fn reset(&mut self);
    /// Begins capturing raw profile data.
    fn start(&mut self) -> Result<(), SamplerError>;
    /// Ends the capture and folds it into the call tree.
    fn stop(&mut self) -> Result<(), SamplerError>;
    /// Wraps the current call tree into a [`Profile`].
    fn build_profile(&mut self, duration: Duration, timespan: Duration) -> Result<Profile, SamplerError>;
}

/// Decides which samples and frames are left out of the call tree.
///
/// Unless profiler frames are included, a sample with a frame of this crate
/// is dropped whole and the sampling engine's frames are cut from the rest.
/// Thread entry frames are always cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFilter {
    include_profiler_frames: bool,
}

impl FrameFilter {
    /// When `include_profiler_frames` is set, the profiler's own frames are kept.
    pub fn new(include_profiler_frames: bool) -> Self {
        FrameFilter {
            include_profiler_frames,
        }
    }

    /// Whether `frame` is cut from the stack it appears in.
    pub fn skips(&self, frame: &Frame) -> bool {
        is_synthetic_frame(frame) || (!self.include_profiler_frames && is_engine_frame(frame))
    }

    /// Whether the whole sample is left out because the profiler was running.
    pub fn skips_sample(&self, sample: &RawSample) -> bool {
        !self.include_profiler_frames
            && sample
                .locations
                .iter()
                .filter_map(|l| l.frame())
                .any(is_profiler_frame)
    }

    /// Adds `value`/`count` to every node on the call path of `sample`, root
    /// first, so each node carries the inclusive totals of its subtree.
    ///
    /// Returns `false` if the sample was skipped or no frame survived the
    /// filter, in which case nothing was recorded.
    pub(crate) fn fold_sample(&self, root: &CallSite, sample: &RawSample, value: f64, count: i64) -> bool {
        if self.skips_sample(sample) {
            return false;
        }
        let mut current: Option<Arc<CallSite>> = None;
        for frame in sample.locations.iter().rev().filter_map(|l| l.frame()) {
            if self.skips(frame) {
                continue;
            }
            let parent = current.as_deref().unwrap_or(root);
            let child = parent.find_or_add_child(&frame.function_name, &frame.file_name, frame.line);
            child.increment(value, count);
            current = Some(child);
        }
        current.is_some()
    }
}

fn function_path(frame: &Frame) -> &str {
    frame.function_name.trim_start_matches('<')
}

fn is_profiler_frame(frame: &Frame) -> bool {
    function_path(frame).starts_with(PROFILER_FRAME_PREFIX)
}

fn is_engine_frame(frame: &Frame) -> bool {
    let name = function_path(frame);
    ENGINE_FRAME_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn is_synthetic_frame(frame: &Frame) -> bool {
    SYNTHETIC_FRAMES.contains(&frame.function_name.as_str())
}
