// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [`AutoProfiler`] orchestrator and its builder.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    engine::{BlockProfilerEngine, CpuProfilerEngine, HeapProfilerEngine},
    flag::Flag,
    metadata::PidProvider,
    recorder::ProfileRecorder,
    reporter::{NoopReporter, Reporter},
    sampler::{AllocationSampler, BlockSampler, CpuSampler, FrameFilter, Sampler},
    scheduler::{ConfigError, SamplerConfig, SamplerScheduler},
};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables shared by all samplers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProfilerOptions {
    /// Keep frames of the profiler itself and of its sampling engine in the
    /// call trees.
    pub include_profiler_frames: bool,
    /// Maximum number of profiles waiting to be sent; older ones are dropped.
    pub max_buffered_profiles: usize,
}

impl Default for AutoProfilerOptions {
    fn default() -> Self {
        AutoProfilerOptions {
            include_profiler_frames: false,
            max_buffered_profiles: 100,
        }
    }
}

/// Failure to build or enable an [`AutoProfiler`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnError {
    /// [`AutoProfiler::enable`] was called outside a tokio runtime.
    #[error("the profiler must be enabled from within a tokio runtime")]
    NoRuntime,
    /// A sampler configuration is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Builds an [`AutoProfiler`].
///
/// Every setting is optional. Without a reporter, profiles are dropped with a
/// warning. CPU profiling uses the built-in [`PprofCpuEngine`] on unix unless
/// another engine is supplied; allocation and blocking-call profiling only run
/// when their engine is supplied.
///
/// [`PprofCpuEngine`]: crate::engine::PprofCpuEngine
#[derive(Default)]
pub struct AutoProfilerBuilder {
    reporter: Option<Box<dyn Reporter + Send + Sync>>,
    pid_provider: Option<Arc<dyn PidProvider>>,
    options: AutoProfilerOptions,
    flush_interval: Option<Duration>,
    cpu_engine: Option<Box<dyn CpuProfilerEngine>>,
    no_cpu: bool,
    heap_engine: Option<Arc<dyn HeapProfilerEngine>>,
    block_engine: Option<Arc<dyn BlockProfilerEngine>>,
    cpu_config: Option<SamplerConfig>,
    allocation_config: Option<SamplerConfig>,
    block_config: Option<SamplerConfig>,
}

impl AutoProfilerBuilder {
    /// Sets the reporter.
    pub fn with_reporter(mut self, r: impl Reporter + Send + Sync + 'static) -> AutoProfilerBuilder {
        self.reporter = Some(Box::new(r));
        self
    }

    /// Reports this pid instead of the process' own when the provider has one.
    pub fn with_external_pid(mut self, p: impl PidProvider + 'static) -> AutoProfilerBuilder {
        self.pid_provider = Some(Arc::new(p));
        self
    }

    /// Sets the [`AutoProfilerOptions`].
    pub fn with_options(mut self, o: AutoProfilerOptions) -> AutoProfilerBuilder {
        self.options = o;
        self
    }

    /// Sets how often buffered profiles are sent. Defaults to 5 seconds.
    pub fn with_flush_interval(mut self, i: Duration) -> AutoProfilerBuilder {
        self.flush_interval = Some(i);
        self
    }

    /// Sets the CPU profiling facility.
    pub fn with_cpu_engine(mut self, e: impl CpuProfilerEngine) -> AutoProfilerBuilder {
        self.cpu_engine = Some(Box::new(e));
        self.no_cpu = false;
        self
    }

    /// Turns CPU profiling off.
    pub fn without_cpu_profiling(mut self) -> AutoProfilerBuilder {
        self.cpu_engine = None;
        self.no_cpu = true;
        self
    }

    /// Enables allocation profiling using this heap facility.
    pub fn with_heap_engine(mut self, e: impl HeapProfilerEngine) -> AutoProfilerBuilder {
        self.heap_engine = Some(Arc::new(e));
        self
    }

    /// Enables blocking-call profiling using this contention facility.
    pub fn with_block_engine(mut self, e: impl BlockProfilerEngine) -> AutoProfilerBuilder {
        self.block_engine = Some(Arc::new(e));
        self
    }

    /// Overrides [`SamplerConfig::cpu`].
    pub fn with_cpu_config(mut self, c: SamplerConfig) -> AutoProfilerBuilder {
        self.cpu_config = Some(c);
        self
    }

    /// Overrides [`SamplerConfig::allocation`].
    pub fn with_allocation_config(mut self, c: SamplerConfig) -> AutoProfilerBuilder {
        self.allocation_config = Some(c);
        self
    }

    /// Overrides [`SamplerConfig::block`].
    pub fn with_block_config(mut self, c: SamplerConfig) -> AutoProfilerBuilder {
        self.block_config = Some(c);
        self
    }

    /// Turn this builder into a profiler! Fails if a sampler configuration
    /// is inconsistent.
    pub fn build(self) -> Result<AutoProfiler, SpawnError> {
        let reporter = self
            .reporter
            .unwrap_or_else(|| Box::new(NoopReporter));
        let recorder = ProfileRecorder::from_boxed(
            reporter,
            self.options.max_buffered_profiles,
            self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
        );
        let filter = FrameFilter::new(self.options.include_profiler_frames);
        // shared by every scheduler: one sampler captures at a time
        let sampler_active = Arc::new(Flag::new());
        let make_scheduler = |sampler: Box<dyn Sampler>, config: SamplerConfig| -> Result<SamplerScheduler, SpawnError> {
            config.validate()?;
            Ok(SamplerScheduler::new(
                sampler,
                config,
                recorder.clone(),
                sampler_active.clone(),
                self.pid_provider.clone(),
            ))
        };

        let mut schedulers = Vec::new();
        let cpu_engine = if self.no_cpu {
            None
        } else {
            self.cpu_engine.or_else(default_cpu_engine)
        };
        if let Some(engine) = cpu_engine {
            schedulers.push(make_scheduler(
                Box::new(CpuSampler::new(engine, filter)),
                self.cpu_config.unwrap_or_else(SamplerConfig::cpu),
            )?);
        }
        if let Some(engine) = self.heap_engine {
            schedulers.push(make_scheduler(
                Box::new(AllocationSampler::new(engine, filter)),
                self.allocation_config
                    .unwrap_or_else(SamplerConfig::allocation),
            )?);
        }
        if let Some(engine) = self.block_engine {
            schedulers.push(make_scheduler(
                Box::new(BlockSampler::new(engine, filter)),
                self.block_config.unwrap_or_else(SamplerConfig::block),
            )?);
        }

        Ok(AutoProfiler {
            recorder,
            schedulers,
            enabled: Flag::new(),
        })
    }
}

impl std::fmt::Debug for AutoProfilerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoProfilerBuilder")
            .field("reporter", &self.reporter)
            .field("options", &self.options)
            .field("flush_interval", &self.flush_interval)
            .field("cpu", &(!self.no_cpu))
            .field("heap", &self.heap_engine.is_some())
            .field("block", &self.block_engine.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn default_cpu_engine() -> Option<Box<dyn CpuProfilerEngine>> {
    Some(Box::new(crate::engine::PprofCpuEngine::default()))
}

#[cfg(not(unix))]
fn default_cpu_engine() -> Option<Box<dyn CpuProfilerEngine>> {
    None
}

/// Continuous profiler: one [`SamplerScheduler`] per enabled sampler, all
/// feeding one [`ProfileRecorder`].
///
/// Nothing runs until [`enable`](Self::enable). Dropping the profiler
/// disables it.
pub struct AutoProfiler {
    recorder: ProfileRecorder,
    schedulers: Vec<SamplerScheduler>,
    enabled: Flag,
}

impl AutoProfiler {
    /// Start building a profiler.
    pub fn builder() -> AutoProfilerBuilder {
        AutoProfilerBuilder::default()
    }

    /// Starts the samplers and the periodic flush. Does nothing if already
    /// enabled.
    pub fn enable(&self) -> Result<(), SpawnError> {
        tokio::runtime::Handle::try_current().map_err(|_| SpawnError::NoRuntime)?;
        if !self.enabled.set_if_unset() {
            return Ok(());
        }
        self.recorder.start();
        for scheduler in &self.schedulers {
            scheduler.start();
        }
        tracing::info!(
            samplers = ?self.schedulers.iter().map(|s| s.config().name).collect::<Vec<_>>(),
            "profiler enabled"
        );
        Ok(())
    }

    /// Stops the samplers and the periodic flush. Profiles not yet sent stay
    /// in the [`recorder`](Self::recorder). Does nothing if not enabled.
    pub fn disable(&self) {
        if !self.enabled.unset_if_set() {
            return;
        }
        for scheduler in &self.schedulers {
            scheduler.stop();
        }
        self.recorder.stop();
        tracing::info!("profiler disabled");
    }

    /// Whether the profiler is running.
    pub fn is_enabled(&self) -> bool {
        self.enabled.is_set()
    }

    /// The queue of profiles waiting to be sent, e.g. for a final
    /// [`flush`](ProfileRecorder::flush) before shutdown.
    pub fn recorder(&self) -> &ProfileRecorder {
        &self.recorder
    }

    /// The running schedulers, one per enabled sampler.
    pub fn schedulers(&self) -> &[SamplerScheduler] {
        &self.schedulers
    }
}

impl std::fmt::Debug for AutoProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoProfiler")
            .field("recorder", &self.recorder)
            .field("schedulers", &self.schedulers)
            .field("enabled", &self.enabled.is_set())
            .finish()
    }
}

impl Drop for AutoProfiler {
    fn drop(&mut self) {
        self.disable();
    }
}
