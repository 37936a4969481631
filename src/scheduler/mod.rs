//! Dynamic request batching.
//!
//! Submissions accumulate in a FIFO queue; a single worker task wakes on
//! new submissions or a bounded timeout and flushes when the queue reaches
//! `min_batch_size` or the oldest item has waited `max_wait_ms`. Batches
//! are detached under the lock (at most `max_batch_size` items) and
//! processed outside it, grouped by model in first-seen order with
//! per-model arrival order preserved.
//!
//! Batched execution currently runs each request individually through the
//! registry; true tensor-concatenation batching would replace
//! `process_batch` without touching the submission contract.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BatchingConfig;
use crate::metrics::MetricsCollector;
use crate::registry::ModelRegistry;
use crate::types::{InferenceRequest, InferenceResponse};

/// A queued submission and its single-use completion slot.
struct PendingRequest {
    request: InferenceRequest,
    responder: oneshot::Sender<InferenceResponse>,
    enqueue_time: Instant,
}

pub struct BatchScheduler {
    registry: Arc<ModelRegistry>,
    metrics: Arc<MetricsCollector>,
    config: BatchingConfig,
    queue: Mutex<VecDeque<PendingRequest>>,
    notify: Notify,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    pub fn new(
        registry: Arc<ModelRegistry>,
        metrics: Arc<MetricsCollector>,
        config: BatchingConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker task. A no-op when batching is disabled.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Batching disabled, requests will be processed individually");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.worker_loop().await });
        *self.worker.lock().unwrap() = Some(handle);

        info!(
            max_batch_size = self.config.max_batch_size,
            min_batch_size = self.config.min_batch_size,
            max_wait_ms = self.config.max_wait_ms,
            "Batch scheduler started"
        );
    }

    /// Cooperative shutdown: the worker drains every queued item through
    /// the normal processing path before it exits, so no submission is
    /// ever left unanswered.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Anything that slipped in while the worker was winding down.
        self.drain_remaining().await;
        info!("Batch scheduler stopped");
    }

    /// Submit one request and wait for its response. Completed exactly
    /// once whether the scheduler is running, draining, or disabled; with
    /// batching off the call goes straight to the registry and
    /// `queue_time_ms` is 0.
    pub async fn submit(&self, request: InferenceRequest) -> InferenceResponse {
        if !self.config.enabled || !self.running.load(Ordering::SeqCst) {
            let mut response = self.registry.run_inference(&request).await;
            response.queue_time_ms = 0.0;
            return response;
        }

        let (responder, receiver) = oneshot::channel();
        let enqueue_time = request.enqueue_time;
        {
            let mut queue = self.queue.lock().unwrap();
            queue.push_back(PendingRequest { request, responder, enqueue_time });
        }
        self.notify.notify_one();

        match receiver.await {
            Ok(response) => response,
            // The worker completes every slot before exiting; reaching
            // this arm means the process is tearing down around us.
            Err(_) => InferenceResponse::failure("scheduler shut down before completion"),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn worker_loop(self: Arc<Self>) {
        let max_wait = Duration::from_millis(self.config.max_wait_ms);

        while self.running.load(Ordering::SeqCst) {
            let batch = self.collect_batch(max_wait);
            if !batch.is_empty() {
                self.process_batch(batch).await;
                // Re-check right away: the flush may have left items
                // behind when the queue exceeded max_batch_size.
                continue;
            }

            // Nothing to flush yet. Sleep until a new submission arrives
            // or the oldest item hits its flush deadline, whichever is
            // first; with an empty queue the full max_wait applies.
            let wait = {
                let queue = self.queue.lock().unwrap();
                match queue.front() {
                    Some(front) => max_wait.saturating_sub(front.enqueue_time.elapsed()),
                    None => max_wait,
                }
            };
            let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        }

        self.drain_remaining().await;
    }

    /// Detach up to `max_batch_size` items when the flush policy says so:
    /// the queue has reached `min_batch_size`, or the front item has aged
    /// past `max_wait_ms`.
    fn collect_batch(&self, max_wait: Duration) -> Vec<PendingRequest> {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            return Vec::new();
        }

        let oldest_expired = queue
            .front()
            .map(|front| front.enqueue_time.elapsed() >= max_wait)
            .unwrap_or(false);
        if queue.len() < self.config.min_batch_size && !oldest_expired {
            return Vec::new();
        }

        let size = queue.len().min(self.config.max_batch_size);
        queue.drain(..size).collect()
    }

    /// Execute one detached batch: group by model preserving first-seen
    /// order, run each group's requests in arrival order, and complete
    /// every slot with either the inference result or the backend error.
    async fn process_batch(&self, batch: Vec<PendingRequest>) {
        let batch_size = batch.len();
        debug!(batch_size, "Processing batch");
        let batch_start = Instant::now();

        let mut groups: Vec<(String, Vec<PendingRequest>)> = Vec::new();
        for pending in batch {
            match groups
                .iter_mut()
                .find(|(name, _)| *name == pending.request.model_name)
            {
                Some((_, group)) => group.push(pending),
                None => groups.push((pending.request.model_name.clone(), vec![pending])),
            }
        }

        for (_, group) in groups {
            for pending in group {
                let queue_time_ms = pending.enqueue_time.elapsed().as_secs_f64() * 1000.0;
                let mut response = self.registry.run_inference(&pending.request).await;
                response.queue_time_ms = queue_time_ms;
                let _ = pending.responder.send(response);
            }
        }

        self.metrics
            .record_batch(batch_size, batch_start.elapsed().as_secs_f64());
        debug!(batch_size, elapsed_ms = batch_start.elapsed().as_millis() as u64, "Batch completed");
    }

    async fn drain_remaining(&self) {
        loop {
            let remaining: Vec<PendingRequest> = {
                let mut queue = self.queue.lock().unwrap();
                if queue.is_empty() {
                    break;
                }
                let size = queue.len().min(self.config.max_batch_size);
                queue.drain(..size).collect()
            };
            info!(count = remaining.len(), "Draining remaining requests");
            self.process_batch(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::config::{MetricsConfig, ModelsConfig};
    use crate::session::SessionManager;
    use crate::types::{TensorBuffer, TensorData};
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct Fixture {
        scheduler: Arc<BatchScheduler>,
        metrics: Arc<MetricsCollector>,
        backend_runs: Arc<std::sync::atomic::AtomicU64>,
        run_log: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(models: &[&str], config: BatchingConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for model in models {
            std::fs::write(dir.path().join(format!("{model}.onnx")), b"model").unwrap();
        }

        let backend = MockBackend::default();
        let backend_runs = Arc::clone(&backend.runs);
        let run_log = Arc::clone(&backend.run_log);

        let metrics = Arc::new(MetricsCollector::new(&MetricsConfig::default()));
        let registry = Arc::new(ModelRegistry::new(
            SessionManager::new(Arc::new(backend)),
            ModelsConfig {
                directory: dir.path().display().to_string(),
                hot_reload: false,
                ..Default::default()
            },
            Arc::clone(&metrics),
        ));
        registry.initialize().await;

        let scheduler = Arc::new(BatchScheduler::new(registry, Arc::clone(&metrics), config));
        scheduler.start();

        Fixture { scheduler, metrics, backend_runs, run_log, _dir: dir }
    }

    fn request(model: &str, tag: &str) -> InferenceRequest {
        InferenceRequest::new(
            model,
            tag,
            vec![TensorData::new(tag, vec![1, 4], TensorBuffer::F32(vec![1.0; 4]))],
        )
    }

    #[tokio::test]
    async fn load_burst_aggregates_into_one_batch() {
        let fx = fixture(
            &["m"],
            BatchingConfig { enabled: true, min_batch_size: 4, max_batch_size: 8, max_wait_ms: 50 },
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let scheduler = Arc::clone(&fx.scheduler);
            handles.push(tokio::spawn(async move {
                scheduler.submit(request("m", &format!("r{i}"))).await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap();
            assert!(response.success, "{}", response.error);
        }

        assert_eq!(fx.metrics.batches_total(), 1);
        assert_eq!(fx.backend_runs.load(AtomicOrdering::SeqCst), 8);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn lone_request_flushes_on_timeout() {
        let fx = fixture(
            &["m"],
            BatchingConfig { enabled: true, min_batch_size: 4, max_batch_size: 8, max_wait_ms: 50 },
        )
        .await;

        let started = Instant::now();
        let response = fx.scheduler.submit(request("m", "solo")).await;
        let elapsed = started.elapsed();

        assert!(response.success, "{}", response.error);
        assert!(response.queue_time_ms >= 50.0, "queue_time_ms = {}", response.queue_time_ms);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(fx.metrics.batches_total(), 1);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn disabled_batching_is_synchronous_passthrough() {
        let fx = fixture(
            &["m"],
            BatchingConfig { enabled: false, ..Default::default() },
        )
        .await;

        assert!(!fx.scheduler.is_running());
        let response = fx.scheduler.submit(request("m", "direct")).await;
        assert!(response.success);
        assert_eq!(response.queue_time_ms, 0.0);
        assert_eq!(fx.scheduler.queue_size(), 0);
        assert_eq!(fx.metrics.batches_total(), 0);
    }

    #[tokio::test]
    async fn batches_never_exceed_max_batch_size() {
        let fx = fixture(
            &["m"],
            BatchingConfig {
                enabled: true,
                min_batch_size: 10,
                max_batch_size: 4,
                max_wait_ms: 100,
            },
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let scheduler = Arc::clone(&fx.scheduler);
            handles.push(tokio::spawn(async move {
                scheduler.submit(request("m", &format!("r{i}"))).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        // 10 requests through a bound of 4 means at least three batches.
        assert_eq!(fx.backend_runs.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(fx.metrics.batches_total(), 3);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn groups_preserve_first_seen_and_arrival_order() {
        let fx = fixture(
            &["a", "b"],
            BatchingConfig { enabled: true, min_batch_size: 4, max_batch_size: 8, max_wait_ms: 50 },
        )
        .await;

        let mut handles = Vec::new();
        for (model, tag) in [("a", "a1"), ("a", "a2"), ("b", "b1"), ("a", "a3")] {
            let scheduler = Arc::clone(&fx.scheduler);
            handles.push(tokio::spawn(async move { scheduler.submit(request(model, tag)).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        let log = fx.run_log.lock().unwrap().clone();
        assert_eq!(log, vec!["a1", "a2", "a3", "b1"]);
        fx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_every_pending_request() {
        let fx = fixture(
            &["m"],
            BatchingConfig {
                enabled: true,
                min_batch_size: 100,
                max_batch_size: 8,
                max_wait_ms: 10_000,
            },
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let scheduler = Arc::clone(&fx.scheduler);
            handles.push(tokio::spawn(async move {
                scheduler.submit(request("m", &format!("r{i}"))).await
            }));
        }
        // Let the submissions enqueue before stopping.
        tokio::task::yield_now().await;
        assert_eq!(fx.scheduler.queue_size(), 3);

        fx.scheduler.stop().await;

        for handle in handles {
            let response = handle.await.unwrap();
            assert!(response.success, "{}", response.error);
        }
        assert_eq!(fx.scheduler.queue_size(), 0);
        assert!(!fx.scheduler.is_running());

        // Submissions after shutdown fall back to the synchronous path.
        let late = fx.scheduler.submit(request("m", "late")).await;
        assert!(late.success);
        assert_eq!(late.queue_time_ms, 0.0);
    }

    #[tokio::test]
    async fn backend_errors_complete_the_future_as_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.onnx"), b"model").unwrap();

        let backend = MockBackend { fail_inference: true, ..Default::default() };
        let metrics = Arc::new(MetricsCollector::new(&MetricsConfig::default()));
        let registry = Arc::new(ModelRegistry::new(
            SessionManager::new(Arc::new(backend)),
            ModelsConfig {
                directory: dir.path().display().to_string(),
                hot_reload: false,
                ..Default::default()
            },
            Arc::clone(&metrics),
        ));
        registry.initialize().await;

        let scheduler = Arc::new(BatchScheduler::new(
            registry,
            metrics,
            BatchingConfig { enabled: true, min_batch_size: 1, max_batch_size: 8, max_wait_ms: 10 },
        ));
        scheduler.start();

        let response = scheduler.submit(request("m", "doomed")).await;
        assert!(!response.success);
        assert!(response.error.contains("mock failure"));
        scheduler.stop().await;
    }
}
