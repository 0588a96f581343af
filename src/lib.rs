// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## autoprofile
//! A continuous in-process profiler: it samples CPU time, live heap allocations and
//! time spent blocked, aggregates the samples into call trees and periodically hands
//! the resulting profiles to a reporter.
//!
//! ### How it works
//!
//! Each kind of profile is produced by a [`Sampler`] driven by its own
//! [`SamplerScheduler`]:
//!
//! - once per sampling interval (8 seconds for CPU), after a random delay, the scheduler
//!   runs a short sampling burst (2 seconds for CPU);
//! - once per report interval (2 minutes), the bursts of the window are turned into a
//!   [`Profile`], serialized to JSON and queued in the [`ProfileRecorder`];
//! - the recorder sends the queued profiles to the [`Reporter`] every few seconds,
//!   backing off when the reporter fails.
//!
//! Only one sampler of the process runs a burst at any time, so CPU and blocking
//! measurements never skew each other.
//!
//! Allocation profiles are snapshots of the live heap and are taken at report time only.
//!
//! ### Usage
//!
//! The profiler runs on the tokio runtime it is enabled from:
//!
//! ```no_run
//! # use autoprofile::profiler::{AutoProfiler, SpawnError};
//! # use autoprofile::reporter::local::LocalReporter;
//! # #[tokio::main]
//! # async fn main() -> Result<(), SpawnError> {
//! let profiler = AutoProfiler::builder()
//!     .with_reporter(LocalReporter::new("/tmp/profiles"))
//!     .build()?;
//! profiler.enable()?;
//!
//! // ... run the application ...
//!
//! profiler.disable();
//! profiler.recorder().flush().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Engines
//!
//! The raw samples come from [engines](engine). CPU profiling is built in on unix, using
//! [pprof-rs]. Heap and contention data depend on the allocator and the synchronization
//! primitives of the application, so those engines are supplied through
//! [`AutoProfilerBuilder::with_heap_engine`] and
//! [`AutoProfilerBuilder::with_block_engine`]. Engines produce pprof protobuf profiles.
//!
//! [pprof-rs]: https://github.com/tikv/pprof-rs
//!
//! ### Reporters
//!
//! This crate includes [`LocalReporter`] that writes to a directory, [`HttpReporter`] that
//! POSTs to a collector (feature `http`, enabled by default), and a [`MultiReporter`] that
//! allows combining reporters. You can also write your own reporter (via the [`Reporter`]
//! trait) to send the profiles to your favorite profiler backend.
//!
//! [`LocalReporter`]: reporter::local::LocalReporter
//! [`HttpReporter`]: reporter::http::HttpReporter
//! [`MultiReporter`]: reporter::multi::MultiReporter
//! [`Reporter`]: reporter::Reporter
//! [`Sampler`]: sampler::Sampler
//! [`SamplerScheduler`]: scheduler::SamplerScheduler
//! [`Profile`]: profile::Profile
//! [`ProfileRecorder`]: recorder::ProfileRecorder
//! [`AutoProfilerBuilder::with_heap_engine`]: profiler::AutoProfilerBuilder::with_heap_engine
//! [`AutoProfilerBuilder::with_block_engine`]: profiler::AutoProfilerBuilder::with_block_engine
//!
//! #### Sample program
//!
//! You can try the profiler with the sample program, for example:
//!
//! ```notrust
//! cargo run --release --example simple -- --output-dir /tmp/profiles --duration 5m
//! ```

pub mod calltree;
pub mod engine;
pub mod flag;
pub mod metadata;
pub mod pprof;
pub mod profile;
pub mod profiler;
pub mod recorder;
pub mod reporter;
pub mod sampler;
pub mod scheduler;
pub mod timer;
