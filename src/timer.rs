// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A restartable delay-then-repeat timer running on the tokio runtime.

use std::{any::Any, future::Future, sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

/// Fires a job once after `delay` (when non-zero), then every `interval`
/// (when non-zero) until stopped or dropped.
///
/// Every tick runs the job in its own task and waits for it, so ticks of a
/// single timer never overlap. A panicking job is logged and the timer keeps
/// going. Stopping the timer stops future ticks; a job that is already
/// running is left to finish.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Starts a timer. Must be called from within a tokio runtime.
    pub fn start<F, Fut>(delay: Duration, interval: Duration, job: F) -> Timer
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Arc::new(job);
        let handle = tokio::spawn(async move {
            let mut ticker = None;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if !interval.is_zero() {
                    ticker = Some(make_ticker(interval));
                }
                run_job(&job).await;
            }
            if interval.is_zero() {
                return;
            }
            let mut ticker = ticker.unwrap_or_else(|| make_ticker(interval));
            loop {
                ticker.tick().await;
                run_job(&job).await;
            }
        });
        Timer { handle }
    }

    /// Fires `job` once after `delay`.
    pub fn once<F, Fut>(delay: Duration, job: F) -> Timer
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::start(delay, Duration::ZERO, job)
    }

    /// Fires `job` every `interval`, the first time one interval from now.
    pub fn every<F, Fut>(interval: Duration, job: F) -> Timer
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::start(Duration::ZERO, interval, job)
    }

    /// Stops issuing ticks. Safe to call repeatedly.
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Whether the timer will not fire again.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn make_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_job<F, Fut>(job: &Arc<F>)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // called inside the task, so a panic before the first await is caught as well
    let job = job.clone();
    if let Err(err) = tokio::spawn(async move { (*job)().await }).await {
        if err.is_panic() {
            let panic = err.into_panic();
            tracing::error!(
                panic = panic_message(&*panic),
                "recovered from panic in timer job"
            );
        } else {
            tracing::debug!(error = %err, "timer job cancelled");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
