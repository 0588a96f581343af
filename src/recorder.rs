// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Buffers recorded profiles and hands them to a [`Reporter`].

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

use crate::{flag::Flag, reporter::Reporter, timer::Timer};

const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Backoff {
    last_flush: Option<Instant>,
    delay: Duration,
}

impl Backoff {
    fn next(&self) -> Duration {
        if self.delay.is_zero() {
            INITIAL_BACKOFF
        } else {
            (self.delay * 2).min(MAX_BACKOFF)
        }
    }
}

struct RecorderInner {
    reporter: Box<dyn Reporter + Send + Sync>,
    max_buffered: usize,
    flush_interval: Duration,
    queue: Mutex<VecDeque<serde_json::Value>>,
    backoff: Mutex<Backoff>,
    // one flush at a time
    flushing: tokio::sync::Mutex<()>,
    started: Flag,
    flush_timer: Mutex<Option<Timer>>,
}

/// A bounded FIFO of serialized profiles, flushed to a [`Reporter`]
/// periodically.
///
/// When full, recording drops the oldest profile. A failed send puts the
/// batch back in front of anything recorded meanwhile and pauses flushing
/// for a backoff that starts at 10 seconds and doubles up to a minute.
/// A successful send clears the backoff.
#[derive(Clone)]
pub struct ProfileRecorder {
    inner: Arc<RecorderInner>,
}

impl ProfileRecorder {
    /// A stopped recorder holding at most `max_buffered` profiles. With a
    /// capacity of 0 every profile is dropped.
    pub fn new(
        reporter: impl Reporter + Send + Sync + 'static,
        max_buffered: usize,
        flush_interval: Duration,
    ) -> Self {
        Self::from_boxed(Box::new(reporter), max_buffered, flush_interval)
    }

    pub(crate) fn from_boxed(
        reporter: Box<dyn Reporter + Send + Sync>,
        max_buffered: usize,
        flush_interval: Duration,
    ) -> Self {
        ProfileRecorder {
            inner: Arc::new(RecorderInner {
                reporter,
                max_buffered,
                flush_interval,
                queue: Mutex::new(VecDeque::new()),
                backoff: Mutex::new(Backoff::default()),
                flushing: tokio::sync::Mutex::new(()),
                started: Flag::new(),
                flush_timer: Mutex::new(None),
            }),
        }
    }

    /// Queues a profile, evicting the oldest one if the queue is full.
    pub fn record(&self, profile: serde_json::Value) {
        if self.inner.max_buffered < 1 {
            return;
        }
        let mut queue = lock(&self.inner.queue);
        queue.push_back(profile);
        let evicted = truncate_front(&mut queue, self.inner.max_buffered);
        if evicted > 0 {
            tracing::debug!(count = evicted, "recorder full, dropped oldest profiles");
        }
    }

    /// Sends everything queued, unless the queue is empty or a previous
    /// failure's backoff has not yet elapsed.
    pub async fn flush(&self) {
        let _flushing = self.inner.flushing.lock().await;

        let now = Instant::now();
        {
            let backoff = lock(&self.inner.backoff);
            if let Some(last_flush) = backoff.last_flush {
                if last_flush + backoff.delay > now {
                    tracing::debug!(backoff = ?backoff.delay, "in backoff, skipping flush");
                    return;
                }
            }
        }

        let batch: Vec<_> = lock(&self.inner.queue).drain(..).collect();
        if batch.is_empty() {
            return;
        }
        lock(&self.inner.backoff).last_flush = Some(now);

        match self.inner.reporter.report(&batch).await {
            Ok(()) => {
                lock(&self.inner.backoff).delay = Duration::ZERO;
                tracing::debug!(count = batch.len(), "flushed profiles");
            }
            Err(err) => {
                let delay = {
                    let mut backoff = lock(&self.inner.backoff);
                    backoff.delay = backoff.next();
                    backoff.delay
                };
                let count = batch.len();
                let evicted = {
                    let mut queue = lock(&self.inner.queue);
                    for profile in batch.into_iter().rev() {
                        queue.push_front(profile);
                    }
                    truncate_front(&mut queue, self.inner.max_buffered)
                };
                tracing::warn!(
                    error = %err,
                    count,
                    evicted,
                    backoff = ?delay,
                    "failed to send profiles, will retry"
                );
            }
        }
    }

    /// Starts flushing every flush interval. Does nothing if already
    /// started. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.inner.started.set_if_unset() {
            return;
        }
        let recorder = self.clone();
        let timer = Timer::every(self.inner.flush_interval, move || {
            let recorder = recorder.clone();
            async move { recorder.flush().await }
        });
        *lock(&self.inner.flush_timer) = Some(timer);
    }

    /// Stops the flush timer. Queued profiles stay queued. Does nothing if
    /// not started.
    pub fn stop(&self) {
        if !self.inner.started.unset_if_set() {
            return;
        }
        if let Some(timer) = lock(&self.inner.flush_timer).take() {
            timer.stop();
        }
    }

    /// Number of queued profiles.
    pub fn len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current backoff; zero after a successful send.
    pub fn backoff(&self) -> Duration {
        lock(&self.inner.backoff).delay
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Vec<serde_json::Value> {
        lock(&self.inner.queue).iter().cloned().collect()
    }
}

impl std::fmt::Debug for ProfileRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRecorder")
            .field("reporter", &self.inner.reporter)
            .field("max_buffered", &self.inner.max_buffered)
            .field("flush_interval", &self.inner.flush_interval)
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

/// Drops entries from the front until at most `max` remain. Returns how many
/// were dropped.
fn truncate_front<T>(queue: &mut VecDeque<T>, max: usize) -> usize {
    let excess = queue.len().saturating_sub(max);
    queue.drain(..excess);
    excess
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{self, AtomicBool},
        Arc, Mutex,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use test_case::test_case;

    use crate::reporter::Reporter;

    use super::ProfileRecorder;

    #[derive(Debug, thiserror::Error)]
    #[error("collector unavailable")]
    struct Unavailable;

    #[derive(Debug, Default)]
    struct MockReporter {
        failing: AtomicBool,
        slow: AtomicBool,
        sent: Mutex<Vec<Vec<serde_json::Value>>>,
    }

    #[derive(Debug)]
    struct Shared(Arc<MockReporter>);

    #[async_trait]
    impl Reporter for Shared {
        async fn report(
            &self,
            profiles: &[serde_json::Value],
        ) -> Result<(), Box<dyn std::error::Error + Send>> {
            if self.0.slow.load(atomic::Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if self.0.failing.load(atomic::Ordering::SeqCst) {
                return Err(Box::new(Unavailable));
            }
            self.0.sent.lock().unwrap().push(profiles.to_vec());
            Ok(())
        }
    }

    fn make_recorder(max_buffered: usize) -> (ProfileRecorder, Arc<MockReporter>) {
        let reporter = Arc::new(MockReporter::default());
        let recorder = ProfileRecorder::new(Shared(reporter.clone()), max_buffered, Duration::from_secs(5));
        (recorder, reporter)
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let (recorder, _) = make_recorder(100);
        for i in 0..103 {
            recorder.record(json!({ "id": i }));
        }
        let pending = recorder.pending();
        assert_eq!(pending.len(), 100);
        assert_eq!(pending[0]["id"], 3);
        assert_eq!(pending[99]["id"], 102);
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let (recorder, _) = make_recorder(0);
        recorder.record(json!({}));
        assert!(recorder.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_in_order() {
        let (recorder, reporter) = make_recorder(10);
        // nothing queued, nothing sent
        recorder.flush().await;
        assert!(reporter.sent.lock().unwrap().is_empty());

        recorder.record(json!({"id": 1}));
        recorder.record(json!({"id": 2}));
        recorder.flush().await;
        assert!(recorder.is_empty());
        assert_eq!(
            *reporter.sent.lock().unwrap(),
            vec![vec![json!({"id": 1}), json!({"id": 2})]]
        );
    }

    #[tokio::test(start_paused = true)]
    #[test_case(1, 10; "first failure")]
    #[test_case(2, 20; "second failure")]
    #[test_case(3, 40; "third failure")]
    #[test_case(4, 60; "capped")]
    #[test_case(6, 60; "stays capped")]
    async fn test_backoff(failures: u32, expected_secs: u64) {
        let (recorder, reporter) = make_recorder(10);
        reporter.failing.store(true, atomic::Ordering::SeqCst);
        recorder.record(json!({"id": 1}));

        for _ in 0..failures {
            tokio::time::advance(recorder.backoff() + Duration::from_secs(1)).await;
            recorder.flush().await;
        }
        assert_eq!(recorder.backoff(), Duration::from_secs(expected_secs));
        assert_eq!(recorder.len(), 1);

        // within the backoff window nothing is attempted, even once the
        // collector is back
        reporter.failing.store(false, atomic::Ordering::SeqCst);
        tokio::time::advance(recorder.backoff() - Duration::from_secs(1)).await;
        recorder.flush().await;
        assert_eq!(recorder.len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        recorder.flush().await;
        assert_eq!(recorder.backoff(), Duration::ZERO);
        assert!(recorder.is_empty());
        assert_eq!(reporter.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_requeued_first() {
        let (recorder, reporter) = make_recorder(3);
        reporter.failing.store(true, atomic::Ordering::SeqCst);
        recorder.record(json!({"id": 1}));
        recorder.record(json!({"id": 2}));
        recorder.flush().await;

        recorder.record(json!({"id": 3}));
        recorder.record(json!({"id": 4}));
        let ids: Vec<_> = recorder.pending().iter().map(|p| p["id"].clone()).collect();
        assert_eq!(ids, [json!(2), json!(3), json!(4)]);

        reporter.failing.store(false, atomic::Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(11)).await;
        recorder.flush().await;
        assert_eq!(
            *reporter.sent.lock().unwrap(),
            vec![vec![json!({"id": 2}), json!({"id": 3}), json!({"id": 4})]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_respects_capacity() {
        let (recorder, reporter) = make_recorder(2);
        reporter.failing.store(true, atomic::Ordering::SeqCst);
        reporter.slow.store(true, atomic::Ordering::SeqCst);
        recorder.record(json!({"id": 1}));
        recorder.record(json!({"id": 2}));

        let flush = tokio::spawn({
            let recorder = recorder.clone();
            async move { recorder.flush().await }
        });
        // recorded while the failing send is in flight
        tokio::time::sleep(Duration::from_millis(500)).await;
        recorder.record(json!({"id": 3}));
        flush.await.unwrap();

        let ids: Vec<_> = recorder.pending().iter().map(|p| p["id"].clone()).collect();
        assert_eq!(ids, [json!(2), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let (recorder, reporter) = make_recorder(10);
        recorder.start();
        recorder.start();
        recorder.record(json!({"id": 1}));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(reporter.sent.lock().unwrap().len(), 1);

        recorder.stop();
        recorder.stop();
        recorder.record(json!({"id": 2}));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(reporter.sent.lock().unwrap().len(), 1);
        assert_eq!(recorder.len(), 1);
    }
}
