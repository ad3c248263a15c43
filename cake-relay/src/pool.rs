//! Elastic publisher pool
//!
//! Jobs go into a bounded buffer of `capacity * BUFFER_MULTIPLIER` entries.
//! After each enqueue the pool starts a worker if a slot is free; otherwise
//! the job waits for a worker that is already draining. Workers read the
//! buffer without waiting and exit once it is empty, so the number of live
//! workers moves between zero and `capacity` with the traffic.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::broker::Publisher;
use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::slots::{SlotGuard, SlotPool};

/// Buffer slots per worker slot
pub const BUFFER_MULTIPLIER: usize = 2;

/// Bounded pool of publisher workers sharing one job buffer
#[derive(Clone)]
pub struct PublisherPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    jobs_tx: mpsc::Sender<String>,
    jobs_rx: Mutex<mpsc::Receiver<String>>,
    slots: Arc<SlotPool>,
    publisher: Arc<dyn Publisher>,
    metrics: RelayMetrics,
    cancel: CancellationToken,
    workers: TaskTracker,
}

impl PublisherPool {
    /// Create a pool of `capacity` workers publishing through `publisher`.
    ///
    /// The pool closes when `cancel` (or [`PublisherPool::shutdown`]) fires.
    pub fn new(
        capacity: usize,
        publisher: Arc<dyn Publisher>,
        metrics: RelayMetrics,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let slots = SlotPool::new(capacity)?;
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity * BUFFER_MULTIPLIER);

        info!(
            capacity = capacity,
            buffer = capacity * BUFFER_MULTIPLIER,
            "Publisher pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                jobs_tx,
                jobs_rx: Mutex::new(jobs_rx),
                slots,
                publisher,
                metrics,
                cancel: cancel.child_token(),
                workers: TaskTracker::new(),
            }),
        })
    }

    /// Queue one job for publishing.
    ///
    /// Waits only while the buffer is full. Fails with
    /// [`RelayError::PoolClosed`] once the pool has been shut down.
    pub async fn submit(&self, job: String) -> Result<()> {
        let inner = &self.inner;
        // Counts as a tracked task, so `shutdown` cannot finish between the
        // cancellation checks below and the worker spawn.
        let _admission = inner.workers.token();
        if inner.cancel.is_cancelled() {
            return Err(RelayError::PoolClosed);
        }

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Err(RelayError::PoolClosed),
            sent = inner.jobs_tx.send(job) => sent.map_err(|_| RelayError::PoolClosed)?,
        }
        inner.metrics.jobs_submitted.inc();

        if inner.cancel.is_cancelled() {
            return Ok(());
        }
        if let Some(slot) = inner.slots.try_acquire() {
            debug!(slot = slot.id(), "Starting publisher worker");
            inner
                .workers
                .spawn(publisher_worker(Arc::clone(inner), slot));
        }

        Ok(())
    }

    /// Stop admitting jobs and wait for every running worker to finish its drain.
    ///
    /// Jobs still buffered when the last worker exits are dropped.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.workers.close();
        self.inner.workers.wait().await;

        let dropped = self.buffered();
        if dropped > 0 {
            info!(dropped = dropped, "Publisher pool stopped with jobs left in buffer");
        } else {
            info!("Publisher pool stopped");
        }
    }

    /// Workers currently draining the buffer
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.slots.outstanding()
    }

    /// Jobs waiting in the buffer
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.buffered()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slots.capacity()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl PoolInner {
    /// Jobs actually sitting in the channel. Reserved capacity held by a
    /// pending `send` is not counted.
    fn buffered(&self) -> usize {
        self.jobs_rx.lock().len()
    }

    fn next_job(&self) -> Option<String> {
        self.jobs_rx.lock().try_recv().ok()
    }

    async fn publish(&self, slot: usize, job: &str) {
        match self.publisher.publish(job).await {
            Ok(()) => {
                self.metrics.jobs_published.inc();
                debug!(slot = slot, "Audit line published");
            }
            Err(e) => {
                self.metrics.publish_errors.inc();
                error!(slot = slot, error = %e, "Failed to publish audit line, dropping it");
            }
        }
    }
}

async fn publisher_worker(inner: Arc<PoolInner>, first_slot: SlotGuard) {
    inner.metrics.publishers_active.inc();
    let mut slot = first_slot;

    loop {
        while let Some(job) = inner.next_job() {
            inner.publish(slot.id(), &job).await;
        }

        let id = slot.id();
        slot.release();

        // A submit that enqueued after our last read but saw no free slot is
        // relying on us; take the work back if a slot is still available.
        if inner.buffered() == 0 {
            debug!(slot = id, "Publisher worker idle, exiting");
            break;
        }
        tokio::task::yield_now().await;
        match inner.slots.try_acquire() {
            Some(next) => slot = next,
            None => break,
        }
    }

    inner.metrics.publishers_active.dec();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockPublisher;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Records what was published and how many publishes overlapped
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl RecordingPublisher {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn count(&self) -> usize {
            self.published.lock().len()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, payload: &str) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            } else {
                tokio::task::yield_now().await;
            }

            self.published.lock().push(payload.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn pool_with(
        capacity: usize,
        publisher: Arc<dyn Publisher>,
    ) -> (PublisherPool, RelayMetrics, CancellationToken) {
        let metrics = RelayMetrics::new();
        let cancel = CancellationToken::new();
        let pool = PublisherPool::new(capacity, publisher, metrics.clone(), &cancel).unwrap();
        (pool, metrics, cancel)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let publisher: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let result = PublisherPool::new(
            0,
            publisher,
            RelayMetrics::new(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(RelayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_twenty_five_jobs_with_ten_workers() {
        let gate = Arc::new(Semaphore::new(0));
        let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
        let (pool, metrics, _cancel) = pool_with(10, publisher.clone());
        assert_eq!(pool.capacity(), 10);

        let submitter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    pool.submit(format!("job-{i}")).await.unwrap();
                }
            })
        };

        // Everything is parked on the gate; nothing beyond the pool size runs.
        wait_until(|| publisher.in_flight.load(Ordering::SeqCst) == 10).await;
        assert!(pool.active_workers() <= 10);
        assert!(pool.buffered() <= 20);

        gate.add_permits(100);
        submitter.await.unwrap();
        wait_until(|| publisher.count() == 25).await;
        wait_until(|| pool.active_workers() == 0).await;

        assert!(publisher.max_in_flight.load(Ordering::SeqCst) <= 10);
        let published: BTreeSet<String> = publisher.published.lock().iter().cloned().collect();
        let expected: BTreeSet<String> = (0..25).map(|i| format!("job-{i}")).collect();
        assert_eq!(published, expected);
        assert_eq!(metrics.jobs_submitted.get(), 25);
        assert_eq!(metrics.jobs_published.get(), 25);
        assert_eq!(metrics.publishers_active.get(), 0);
    }

    #[tokio::test]
    async fn test_submit_waits_while_buffer_is_full() {
        let gate = Arc::new(Semaphore::new(0));
        let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
        let (pool, _metrics, _cancel) = pool_with(1, publisher.clone());

        pool.submit("a".to_string()).await.unwrap();
        wait_until(|| publisher.in_flight.load(Ordering::SeqCst) == 1).await;

        // One worker parked on "a", buffer of two filled by "b" and "c".
        pool.submit("b".to_string()).await.unwrap();
        pool.submit("c".to_string()).await.unwrap();
        assert_eq!(pool.buffered(), 2);

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.submit("d".to_string())).await;
        assert!(blocked.is_err(), "submit should wait for buffer space");

        gate.add_permits(100);
        tokio::time::timeout(Duration::from_secs(1), pool.submit("d".to_string()))
            .await
            .unwrap()
            .unwrap();

        wait_until(|| publisher.count() == 4).await;
        assert_eq!(publisher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parked_submit_completes_after_buffer_drains() {
        let gate = Arc::new(Semaphore::new(0));
        let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
        let (pool, _metrics, _cancel) = pool_with(1, publisher.clone());

        pool.submit("a".to_string()).await.unwrap();
        wait_until(|| publisher.in_flight.load(Ordering::SeqCst) == 1).await;
        pool.submit("b".to_string()).await.unwrap();
        pool.submit("c".to_string()).await.unwrap();

        let parked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit("d".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!parked.is_finished());

        gate.add_permits(100);
        tokio::time::timeout(Duration::from_secs(5), parked)
            .await
            .expect("parked submit never completed")
            .unwrap()
            .unwrap();

        wait_until(|| publisher.count() == 4).await;
        wait_until(|| pool.active_workers() == 0).await;
        assert_eq!(pool.buffered(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_worker_outlives_concurrent_shutdown() {
        for round in 0..50 {
            let publisher = Arc::new(RecordingPublisher::default());
            let (pool, _metrics, _cancel) = pool_with(2, publisher.clone());

            let submitter = {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let _ = pool.submit(format!("job-{round}")).await;
                })
            };
            pool.shutdown().await;

            assert_eq!(pool.active_workers(), 0, "worker still running in round {round}");
            let published = publisher.count();
            submitter.await.unwrap();
            tokio::task::yield_now().await;
            assert_eq!(publisher.count(), published, "publish after shutdown in round {round}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_drain_everything_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (pool, _metrics, _cancel) = pool_with(4, publisher.clone());

        let mut submitters = Vec::new();
        for task in 0..8 {
            let pool = pool.clone();
            submitters.push(tokio::spawn(async move {
                for i in 0..50 {
                    pool.submit(format!("{task}-{i}")).await.unwrap();
                }
            }));
        }
        for submitter in submitters {
            submitter.await.unwrap();
        }

        wait_until(|| publisher.count() == 400).await;
        wait_until(|| pool.active_workers() == 0).await;

        let published = publisher.published.lock().clone();
        let unique: BTreeSet<&String> = published.iter().collect();
        assert_eq!(unique.len(), 400, "a job was published twice");
        assert!(publisher.max_in_flight.load(Ordering::SeqCst) <= 4);
        assert_eq!(pool.buffered(), 0);
    }

    #[tokio::test]
    async fn test_publish_error_is_dropped_without_retry() {
        let mut mock = MockPublisher::new();
        mock.expect_publish().times(2).returning(|payload| {
            if payload == "bad" {
                Err(RelayError::Publish("channel closed".to_string()))
            } else {
                Ok(())
            }
        });

        let (pool, metrics, _cancel) = pool_with(2, Arc::new(mock));
        pool.submit("bad".to_string()).await.unwrap();
        pool.submit("good".to_string()).await.unwrap();

        wait_until(|| metrics.jobs_published.get() + metrics.publish_errors.get() == 2).await;
        pool.shutdown().await;

        assert_eq!(metrics.jobs_published.get(), 1);
        assert_eq!(metrics.publish_errors.get(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_workers() {
        let gate = Arc::new(Semaphore::new(0));
        let publisher = Arc::new(RecordingPublisher::gated(gate.clone()));
        let (pool, _metrics, _cancel) = pool_with(2, publisher.clone());

        pool.submit("in-flight".to_string()).await.unwrap();
        wait_until(|| publisher.in_flight.load(Ordering::SeqCst) == 1).await;

        let shutdown = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!shutdown.is_finished());
        assert!(matches!(
            pool.submit("late".to_string()).await,
            Err(RelayError::PoolClosed)
        ));

        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(1), shutdown)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(publisher.published.lock().as_slice(), ["in-flight"]);
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes_pool() {
        let publisher: Arc<dyn Publisher> = Arc::new(RecordingPublisher::default());
        let (pool, _metrics, cancel) = pool_with(1, publisher);

        cancel.cancel();
        assert!(matches!(
            pool.submit("x".to_string()).await,
            Err(RelayError::PoolClosed)
        ));
    }
}
