// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Drives a [`Sampler`] through sampling bursts and report windows.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    flag::Flag,
    metadata::PidProvider,
    profile::Profile,
    recorder::ProfileRecorder,
    sampler::Sampler,
    timer::Timer,
};

/// An unusable [`SamplerConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Jitter is drawn from `[0, sampling_interval - max_span_duration)`,
    /// which must not be empty.
    #[error("{sampler}: sampling interval {sampling_interval:?} must exceed the span duration {max_span_duration:?}")]
    SamplingIntervalTooShort {
        /// The offending sampler.
        sampler: &'static str,
        /// Configured sampling interval.
        sampling_interval: Duration,
        /// Configured span duration.
        max_span_duration: Duration,
    },
    /// A zero report interval would report continuously.
    #[error("{sampler}: report interval must be non-zero")]
    ZeroReportInterval {
        /// The offending sampler.
        sampler: &'static str,
    },
}

/// Timing parameters of one [`SamplerScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Label used in logs.
    pub name: &'static str,
    /// The sampler measures absolute snapshots and never runs bursts.
    pub report_only: bool,
    /// Once this much time has been sampled in a window, further bursts are
    /// skipped until the next report.
    pub max_profile_duration: Duration,
    /// Length of one sampling burst.
    pub max_span_duration: Duration,
    /// At most this many bursts per report window.
    pub max_span_count: u32,
    /// A burst is attempted once per sampling interval, at a random offset.
    pub sampling_interval: Duration,
    /// How often a profile is built and recorded.
    pub report_interval: Duration,
}

impl SamplerConfig {
    /// Defaults for CPU sampling.
    pub fn cpu() -> Self {
        SamplerConfig {
            name: "cpu",
            report_only: false,
            max_profile_duration: Duration::from_secs(20),
            max_span_duration: Duration::from_secs(2),
            max_span_count: 30,
            sampling_interval: Duration::from_secs(8),
            report_interval: Duration::from_secs(120),
        }
    }

    /// Defaults for heap snapshots.
    pub fn allocation() -> Self {
        SamplerConfig {
            name: "allocation",
            report_only: true,
            max_profile_duration: Duration::ZERO,
            max_span_duration: Duration::ZERO,
            max_span_count: 0,
            sampling_interval: Duration::ZERO,
            report_interval: Duration::from_secs(120),
        }
    }

    /// Defaults for blocking-call sampling.
    pub fn block() -> Self {
        SamplerConfig {
            name: "block",
            report_only: false,
            max_profile_duration: Duration::from_secs(20),
            max_span_duration: Duration::from_secs(4),
            max_span_count: 30,
            sampling_interval: Duration::from_secs(16),
            report_interval: Duration::from_secs(120),
        }
    }

    /// Checks the intervals are consistent with each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval { sampler: self.name });
        }
        if !self.report_only && self.sampling_interval <= self.max_span_duration {
            return Err(ConfigError::SamplingIntervalTooShort {
                sampler: self.name,
                sampling_interval: self.sampling_interval,
                max_span_duration: self.max_span_duration,
            });
        }
        Ok(())
    }

    /// A random delay before the next burst, so bursts of different
    /// processes do not line up.
    fn jitter(&self) -> Duration {
        let range = self.sampling_interval.saturating_sub(self.max_span_duration);
        if range.is_zero() {
            return Duration::ZERO;
        }
        rand::rng().random_range(Duration::ZERO..range)
    }
}

struct Window {
    sampler: Box<dyn Sampler>,
    profile_start: Instant,
    sampling_duration: Duration,
    sampler_start: Option<Instant>,
    span_count: u32,
}

impl Window {
    fn reset(&mut self) {
        self.sampler.reset();
        self.profile_start = Instant::now();
        self.sampling_duration = Duration::ZERO;
        self.span_count = 0;
    }
}

struct SchedulerInner {
    config: SamplerConfig,
    recorder: ProfileRecorder,
    sampler_active: Arc<Flag>,
    pid_provider: Option<Arc<dyn PidProvider>>,
    started: Flag,
    // burst start/stop and report are serialized by this lock
    window: Mutex<Window>,
    timers: Mutex<Vec<Timer>>,
    span_timer: Mutex<Option<Timer>>,
}

/// Runs one sampler: short randomized bursts every sampling interval, and a
/// profile every report interval.
///
/// All schedulers of a process share one `sampler_active` flag; a burst only
/// runs while its scheduler holds that flag, so at most one sampler of any
/// kind is capturing at a time. Bursts that cannot get the flag are skipped.
///
/// [`stop`](Self::stop) stops issuing new work. A burst that is already
/// running still ends on its own timer and releases the flag.
pub struct SamplerScheduler {
    inner: Arc<SchedulerInner>,
}

impl SamplerScheduler {
    /// Creates a stopped scheduler.
    pub fn new(
        sampler: Box<dyn Sampler>,
        config: SamplerConfig,
        recorder: ProfileRecorder,
        sampler_active: Arc<Flag>,
        pid_provider: Option<Arc<dyn PidProvider>>,
    ) -> Self {
        SamplerScheduler {
            inner: Arc::new(SchedulerInner {
                config,
                recorder,
                sampler_active,
                pid_provider,
                started: Flag::new(),
                window: Mutex::new(Window {
                    sampler,
                    profile_start: Instant::now(),
                    sampling_duration: Duration::ZERO,
                    sampler_start: None,
                    span_count: 0,
                }),
                timers: Mutex::new(Vec::new()),
                span_timer: Mutex::new(None),
            }),
        }
    }

    /// The timing parameters.
    pub fn config(&self) -> &SamplerConfig {
        &self.inner.config
    }

    /// Whether the timers are running.
    pub fn is_started(&self) -> bool {
        self.inner.started.is_set()
    }

    /// Resets the window and starts the sampling and report timers. Does
    /// nothing if already started. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.inner.started.set_if_unset() {
            return;
        }
        self.inner.window().reset();

        let mut timers = lock(&self.inner.timers);
        if !self.inner.config.report_only {
            let inner = self.inner.clone();
            timers.push(Timer::every(self.inner.config.sampling_interval, move || {
                sampling_tick(inner.clone())
            }));
        }
        let inner = self.inner.clone();
        timers.push(Timer::every(self.inner.config.report_interval, move || {
            report_tick(inner.clone())
        }));
        tracing::info!(sampler = self.inner.config.name, "sampler scheduler started");
    }

    /// Cancels the timers. Does nothing if not started.
    pub fn stop(&self) {
        if !self.inner.started.unset_if_set() {
            return;
        }
        for timer in lock(&self.inner.timers).drain(..) {
            timer.stop();
        }
        tracing::info!(sampler = self.inner.config.name, "sampler scheduler stopped");
    }

    /// Tries to begin a sampling burst. Returns whether the sampler is now
    /// capturing; the caller is then responsible for
    /// [`stop_profiling`](Self::stop_profiling).
    pub fn start_profiling(&self) -> bool {
        self.inner.start_profiling()
    }

    /// Ends the current burst, if any, and releases the shared flag.
    pub fn stop_profiling(&self) {
        self.inner.stop_profiling()
    }

    /// Builds and records the window's profile, then starts a new window.
    pub fn report(&self) {
        self.inner.report()
    }
}

impl std::fmt::Debug for SamplerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerScheduler")
            .field("config", &self.inner.config)
            .field("started", &self.inner.started.is_set())
            .finish_non_exhaustive()
    }
}

impl Drop for SamplerScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SchedulerInner {
    fn window(&self) -> MutexGuard<'_, Window> {
        lock(&self.window)
    }

    fn start_profiling(&self) -> bool {
        let mut window = self.window();
        if !self.sampler_active.set_if_unset() {
            tracing::debug!(sampler = self.config.name, "another sampler is active, skipping burst");
            return false;
        }
        if window.sampling_duration > self.config.max_profile_duration
            || window.span_count >= self.config.max_span_count
        {
            tracing::debug!(
                sampler = self.config.name,
                sampling_duration = ?window.sampling_duration,
                span_count = window.span_count,
                "sampling budget for this window used up, skipping burst"
            );
            self.sampler_active.unset_if_set();
            return false;
        }
        if let Err(err) = window.sampler.start() {
            tracing::error!(sampler = self.config.name, error = %err, "failed to start sampler");
            self.sampler_active.unset_if_set();
            return false;
        }
        window.sampler_start = Some(Instant::now());
        window.span_count += 1;
        tracing::debug!(sampler = self.config.name, "sampling burst started");
        true
    }

    fn stop_profiling(&self) {
        let mut window = self.window();
        let Some(sampler_start) = window.sampler_start.take() else {
            return;
        };
        if let Err(err) = window.sampler.stop() {
            tracing::error!(sampler = self.config.name, error = %err, "failed to stop sampler");
        }
        window.sampling_duration += sampler_start.elapsed();
        self.sampler_active.unset_if_set();
        tracing::debug!(
            sampler = self.config.name,
            sampling_duration = ?window.sampling_duration,
            "sampling burst stopped"
        );
    }

    fn report(&self) {
        let mut window = self.window();
        let timespan = window.profile_start.elapsed();
        if self.config.report_only || !window.sampling_duration.is_zero() {
            let duration = window.sampling_duration;
            match window.sampler.build_profile(duration, timespan) {
                Ok(profile) => self.record(profile),
                Err(err) => {
                    tracing::error!(sampler = self.config.name, error = %err, "failed to build profile");
                }
            }
        } else {
            tracing::debug!(sampler = self.config.name, "nothing sampled in this window");
        }
        window.reset();
    }

    fn record(&self, mut profile: Profile) {
        if profile.roots().is_empty() {
            tracing::debug!(sampler = self.config.name, "discarding empty profile");
            return;
        }
        if let Some(pid) = self.pid_provider.as_ref().and_then(|p| p.external_pid()) {
            profile = profile.with_process_id(pid);
        }
        match profile.to_value() {
            Ok(value) => {
                self.recorder.record(value);
                tracing::debug!(sampler = self.config.name, id = profile.id(), "recorded profile");
            }
            Err(err) => {
                tracing::error!(sampler = self.config.name, error = %err, "failed to serialize profile");
            }
        }
    }
}

async fn sampling_tick(inner: Arc<SchedulerInner>) {
    tokio::time::sleep(inner.config.jitter()).await;
    if !inner.started.is_set() {
        return;
    }

    let burst = inner.clone();
    match tokio::task::spawn_blocking(move || burst.start_profiling()).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(err) => {
            tracing::error!(sampler = inner.config.name, error = %err, "sampling burst task failed");
            return;
        }
    }

    let stopper = inner.clone();
    let span_timer = Timer::once(inner.config.max_span_duration, move || {
        let stopper = stopper.clone();
        async move {
            let name = stopper.config.name;
            if let Err(err) = tokio::task::spawn_blocking(move || stopper.stop_profiling()).await {
                tracing::error!(sampler = name, error = %err, "sampling burst task failed");
            }
        }
    });
    *lock(&inner.span_timer) = Some(span_timer);
}

async fn report_tick(inner: Arc<SchedulerInner>) {
    let name = inner.config.name;
    if let Err(err) = tokio::task::spawn_blocking(move || inner.report()).await {
        tracing::error!(sampler = name, error = %err, "report task failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{self, AtomicI32, AtomicU32};
    use std::sync::Arc;
    use std::time::Duration;

    use test_case::test_case;

    use crate::calltree::CallSite;
    use crate::flag::Flag;
    use crate::profile::{Category, Profile, ProfileType, Unit};
    use crate::recorder::ProfileRecorder;
    use crate::reporter::NoopReporter;
    use crate::sampler::{Sampler, SamplerError};

    use super::*;

    #[derive(Default)]
    struct Calls {
        resets: AtomicU32,
        starts: AtomicU32,
        stops: AtomicU32,
        builds: AtomicU32,
        active: AtomicI32,
        max_active: AtomicI32,
    }

    impl Calls {
        fn get(counter: &AtomicU32) -> u32 {
            counter.load(atomic::Ordering::SeqCst)
        }
    }

    struct MockSampler {
        calls: Arc<Calls>,
        top: CallSite,
        fail_start: bool,
        fail_build: bool,
    }

    impl MockSampler {
        fn new(calls: &Arc<Calls>) -> Self {
            MockSampler {
                calls: calls.clone(),
                top: CallSite::root(),
                fail_start: false,
                fail_build: false,
            }
        }
    }

    impl Sampler for MockSampler {
        fn reset(&mut self) {
            self.calls.resets.fetch_add(1, atomic::Ordering::SeqCst);
            self.top = CallSite::root();
        }

        fn start(&mut self) -> Result<(), SamplerError> {
            if self.fail_start {
                return Err(SamplerError::BlockProfileUnavailable);
            }
            self.calls.starts.fetch_add(1, atomic::Ordering::SeqCst);
            let active = self.calls.active.fetch_add(1, atomic::Ordering::SeqCst) + 1;
            self.calls.max_active.fetch_max(active, atomic::Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SamplerError> {
            self.calls.active.fetch_sub(1, atomic::Ordering::SeqCst);
            self.calls.stops.fetch_add(1, atomic::Ordering::SeqCst);
            self.top
                .find_or_add_child("app::work", "work.rs", 7)
                .increment(10.0, 1);
            Ok(())
        }

        fn build_profile(&mut self, duration: Duration, timespan: Duration) -> Result<Profile, SamplerError> {
            self.calls.builds.fetch_add(1, atomic::Ordering::SeqCst);
            if self.fail_build {
                return Err(SamplerError::MissingSampleType("cpu"));
            }
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

    fn unlimited() -> SamplerConfig {
        SamplerConfig {
            max_profile_duration: Duration::from_secs(3600),
            max_span_count: u32::MAX,
            ..SamplerConfig::cpu()
        }
    }

    fn make_scheduler(
        sampler: MockSampler,
        config: SamplerConfig,
        flag: &Arc<Flag>,
    ) -> (SamplerScheduler, ProfileRecorder) {
        let recorder = ProfileRecorder::new(NoopReporter, 10, Duration::from_secs(5));
        let scheduler = SamplerScheduler::new(Box::new(sampler), config, recorder.clone(), flag.clone(), None);
        (scheduler, recorder)
    }

    #[test_case(SamplerConfig::cpu(), true; "cpu preset")]
    #[test_case(SamplerConfig::allocation(), true; "allocation preset")]
    #[test_case(SamplerConfig::block(), true; "block preset")]
    #[test_case(SamplerConfig { sampling_interval: Duration::from_secs(2), ..SamplerConfig::cpu() }, false; "no room for jitter")]
    #[test_case(SamplerConfig { report_interval: Duration::ZERO, ..SamplerConfig::allocation() }, false; "zero report interval")]
    fn test_config_validate(config: SamplerConfig, valid: bool) {
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_jitter_leaves_room_for_the_burst() {
        let config = SamplerConfig::cpu();
        for _ in 0..1000 {
            assert!(config.jitter() < Duration::from_secs(6));
        }
        assert_eq!(SamplerConfig::allocation().jitter(), Duration::ZERO);
    }

    #[test]
    fn test_one_active_sampler() {
        let flag = Arc::new(Flag::new());
        let cpu_calls = Arc::new(Calls::default());
        let block_calls = Arc::new(Calls::default());
        let (cpu, _) = make_scheduler(MockSampler::new(&cpu_calls), unlimited(), &flag);
        let (block, _) = make_scheduler(MockSampler::new(&block_calls), unlimited(), &flag);

        assert!(cpu.start_profiling());
        assert!(!block.start_profiling());
        assert!(!cpu.start_profiling());
        assert_eq!(Calls::get(&block_calls.starts), 0);

        cpu.stop_profiling();
        assert!(!flag.is_set());
        assert!(block.start_profiling());
        block.stop_profiling();
        assert_eq!(Calls::get(&cpu_calls.stops), 1);
        assert_eq!(Calls::get(&block_calls.stops), 1);
    }

    #[test]
    fn test_one_active_sampler_across_threads() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let bursts = AtomicU32::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let (scheduler, _) = make_scheduler(MockSampler::new(&calls), unlimited(), &flag);
                    for _ in 0..1000 {
                        if scheduler.start_profiling() {
                            bursts.fetch_add(1, atomic::Ordering::SeqCst);
                            scheduler.stop_profiling();
                        }
                    }
                });
            }
        });

        assert!(bursts.load(atomic::Ordering::SeqCst) > 0);
        assert_eq!(calls.max_active.load(atomic::Ordering::SeqCst), 1);
        assert!(!flag.is_set());
    }

    #[test]
    fn test_start_failure_releases_flag() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let mut sampler = MockSampler::new(&calls);
        sampler.fail_start = true;
        let (scheduler, _) = make_scheduler(sampler, unlimited(), &flag);

        assert!(!scheduler.start_profiling());
        assert!(!flag.is_set());
        // nothing to stop
        scheduler.stop_profiling();
        assert_eq!(Calls::get(&calls.stops), 0);
    }

    #[test]
    fn test_span_count_limit() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let config = SamplerConfig {
            max_span_count: 2,
            ..unlimited()
        };
        let (scheduler, _) = make_scheduler(MockSampler::new(&calls), config, &flag);

        for _ in 0..2 {
            assert!(scheduler.start_profiling());
            scheduler.stop_profiling();
        }
        assert!(!scheduler.start_profiling());
        assert!(!flag.is_set());

        // a new window gets a fresh budget
        scheduler.report();
        assert!(scheduler.start_profiling());
        scheduler.stop_profiling();
        assert_eq!(Calls::get(&calls.starts), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_duration_limit() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let (scheduler, recorder) = make_scheduler(MockSampler::new(&calls), SamplerConfig::cpu(), &flag);

        // 11 bursts of 2s: the 11th starts at exactly 20s, which is not over the limit
        for _ in 0..11 {
            assert!(scheduler.start_profiling());
            tokio::time::advance(Duration::from_secs(2)).await;
            scheduler.stop_profiling();
        }
        assert!(!scheduler.start_profiling());
        assert!(!flag.is_set());

        scheduler.report();
        let profiles = recorder.pending();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["duration"], 22_000);
        assert_eq!(profiles[0]["roots"][0]["num_samples"], 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_records_and_resets() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let (scheduler, recorder) = make_scheduler(MockSampler::new(&calls), unlimited(), &flag);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(scheduler.start_profiling());
        tokio::time::advance(Duration::from_secs(2)).await;
        scheduler.stop_profiling();
        scheduler.report();

        let profiles = recorder.pending();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["duration"], 2_000);
        assert_eq!(profiles[0]["timespan"], 32_000);
        assert_eq!(profiles[0]["pid"], std::process::id().to_string());
        assert_eq!(profiles[0]["roots"][0]["method_name"], "app::work");
        assert_eq!(Calls::get(&calls.resets), 1);

        // nothing sampled since: no profile is built, the window still resets
        scheduler.report();
        assert_eq!(Calls::get(&calls.builds), 1);
        assert_eq!(Calls::get(&calls.resets), 2);
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_report_only_sampler_always_builds() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let (scheduler, recorder) = make_scheduler(MockSampler::new(&calls), SamplerConfig::allocation(), &flag);

        // empty call tree: built, then discarded
        scheduler.report();
        assert_eq!(Calls::get(&calls.builds), 1);
        assert_eq!(Calls::get(&calls.resets), 1);
        assert_eq!(recorder.len(), 0);
    }

    #[test]
    fn test_failed_build_resets_window() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let mut sampler = MockSampler::new(&calls);
        sampler.fail_build = true;
        let (scheduler, recorder) = make_scheduler(sampler, unlimited(), &flag);

        assert!(scheduler.start_profiling());
        scheduler.stop_profiling();
        scheduler.report();
        assert_eq!(Calls::get(&calls.builds), 1);
        assert_eq!(Calls::get(&calls.resets), 1);
        assert_eq!(recorder.len(), 0);
    }

    #[test]
    fn test_external_pid() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let recorder = ProfileRecorder::new(NoopReporter, 10, Duration::from_secs(5));
        let pid: Arc<dyn PidProvider> = Arc::new(|| Some("container-1234".to_string()));
        let scheduler = SamplerScheduler::new(
            Box::new(MockSampler::new(&calls)),
            unlimited(),
            recorder.clone(),
            flag,
            Some(pid),
        );

        assert!(scheduler.start_profiling());
        scheduler.stop_profiling();
        scheduler.report();
        assert_eq!(recorder.pending()[0]["pid"], "container-1234");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_timers() {
        let flag = Arc::new(Flag::new());
        let calls = Arc::new(Calls::default());
        let (scheduler, recorder) = make_scheduler(MockSampler::new(&calls), SamplerConfig::cpu(), &flag);

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_started());
        tokio::time::sleep(Duration::from_secs(121)).await;

        let profiles = recorder.pending();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["roots"][0]["method_name"], "app::work");
        let duration = profiles[0]["duration"].as_u64().unwrap();
        assert!((2_000..=30_000).contains(&duration), "duration {duration}");
        assert!(Calls::get(&calls.starts) >= 1);
        assert_eq!(calls.max_active.load(atomic::Ordering::SeqCst), 1);

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_started());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(recorder.len(), 1);
        // the last burst has ended and given the flag back
        assert!(!flag.is_set());
        assert_eq!(Calls::get(&calls.starts), Calls::get(&calls.stops));
    }

    #[cfg(unix)]
    #[inline(never)]
    fn scheduler_test_spin_cpu_d41c7(until: std::time::Instant) -> u64 {
        let mut acc = 0u64;
        while std::time::Instant::now() < until {
            acc = scheduler_test_mix_d41c7(acc);
        }
        acc
    }

    #[cfg(unix)]
    #[inline(never)]
    fn scheduler_test_mix_d41c7(mut acc: u64) -> u64 {
        for i in 0..10_000u64 {
            acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
        acc
    }

    #[cfg(unix)]
    #[test]
    fn test_cpu_profile_end_to_end() {
        use crate::engine::PprofCpuEngine;
        use crate::sampler::{CpuSampler, FrameFilter};

        const NAME: &str = "scheduler_test_spin_cpu_d41c7";

        let flag = Arc::new(Flag::new());
        let recorder = ProfileRecorder::new(NoopReporter, 10, Duration::from_secs(5));
        // the test function lives in this crate, so keep the crate's own frames
        let sampler = CpuSampler::new(Box::new(PprofCpuEngine::default()), FrameFilter::new(true));
        let config = SamplerConfig {
            max_profile_duration: Duration::from_secs(20),
            max_span_duration: Duration::from_secs(2),
            sampling_interval: Duration::from_secs(8),
            report_interval: Duration::from_secs(120),
            ..SamplerConfig::cpu()
        };
        let scheduler = SamplerScheduler::new(Box::new(sampler), config, recorder.clone(), flag, None);

        assert!(scheduler.start_profiling());
        let until = std::time::Instant::now() + Duration::from_secs(1);
        std::thread::spawn(move || scheduler_test_spin_cpu_d41c7(until))
            .join()
            .unwrap();
        scheduler.stop_profiling();
        scheduler.report();

        let profiles = recorder.pending();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["type"], "cpu-usage");

        fn find<'a>(node: &'a serde_json::Value, name: &str) -> Option<&'a serde_json::Value> {
            if node["method_name"].as_str().is_some_and(|m| m.contains(name)) {
                return Some(node);
            }
            node["children"]
                .as_array()?
                .iter()
                .find_map(|child| find(child, name))
        }

        // most samples land in the callee, the caller still carries them
        let node = profiles[0]["roots"]
            .as_array()
            .unwrap()
            .iter()
            .find_map(|root| find(root, NAME))
            .unwrap_or_else(|| panic!("no {NAME} frame in {}", profiles[0]));
        assert!(node["num_samples"].as_i64().unwrap() > 0);
        assert!(node["measurement"].as_f64().unwrap() > 0.0);
    }
}
