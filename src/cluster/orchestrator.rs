//! Cluster Orchestrator - drives Target reconciliation
//!
//! The orchestrator runs as a background task on the control plane and:
//! - Turns cluster events into work queue keys
//! - Runs reconcile passes on a bounded worker pool, one pass per key at a time
//! - Re-queues keys that asked for it, and backs off keys that failed
//! - Periodically reaps workload sets that no node can run

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::{ClusterController, ClusterEvent};
use super::target::TargetKey;
use crate::reconcile::{reap_orphaned_workload_sets, EventFilter, TargetReconciler};

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent reconcile passes
    pub workers: usize,
    /// Delay before a pass that asked for a requeue runs again
    pub requeue_after: Duration,
    /// First retry delay after a failed pass
    pub base_backoff: Duration,
    /// Upper bound of the retry delay
    pub max_backoff: Duration,
    /// A pass running longer than this is abandoned and retried
    pub pass_timeout: Duration,
    /// How often the workload set reaper runs
    pub reap_interval: Duration,
    /// Minimum age of a workload set before it can be reaped
    pub reap_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            requeue_after: Duration::from_secs(10),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(300),
            pass_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(30),
            reap_grace: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    /// Delay before retry number `failures` (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

#[derive(Default)]
struct QueueState {
    /// Waiting in the channel
    queued: HashSet<TargetKey>,
    /// A pass is running
    running: HashSet<TargetKey>,
    /// Enqueued while running; run again when the pass ends
    dirty: HashSet<TargetKey>,
    /// Consecutive failed passes
    failures: HashMap<TargetKey, u32>,
}

/// Deduplicating work queue of Target keys
#[derive(Clone)]
pub struct WorkQueue {
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<TargetKey>,
}

impl WorkQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TargetKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            tx,
        };
        (queue, rx)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // The state stays consistent across a panicking holder
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `key` unless it is already waiting. A key whose pass is running
    /// is remembered and re-added when the pass ends.
    pub fn enqueue(&self, key: TargetKey) {
        let mut state = self.state();
        if state.queued.contains(&key) {
            return;
        }
        if state.running.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        state.queued.insert(key.clone());
        if self.tx.send(key.clone()).is_err() {
            state.queued.remove(&key);
        }
    }

    /// Mark `key` as taken off the queue and running
    pub fn start(&self, key: &TargetKey) {
        let mut state = self.state();
        state.queued.remove(key);
        state.running.insert(key.clone());
    }

    /// Mark the pass for `key` finished, re-adding it if it went dirty
    pub fn finish(&self, key: &TargetKey) {
        let dirty = {
            let mut state = self.state();
            state.running.remove(key);
            state.dirty.remove(key)
        };
        if dirty {
            self.enqueue(key.clone());
        }
    }

    /// Count a failed pass; returns the consecutive failure count
    pub fn record_failure(&self, key: &TargetKey) -> u32 {
        let mut state = self.state();
        let failures = state.failures.entry(key.clone()).or_default();
        *failures += 1;
        *failures
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &TargetKey) {
        self.state().failures.remove(key);
    }

    /// Add `key` after `delay`, unless shutdown comes first
    pub fn enqueue_after(&self, key: TargetKey, delay: Duration, shutdown: CancellationToken) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.enqueue(key),
                _ = shutdown.cancelled() => {}
            }
        });
    }
}

/// Spawn the orchestrator as a background task.
/// Cancel the returned token to shut it down.
pub fn spawn_orchestrator(
    controller: ClusterController,
    reconciler: TargetReconciler,
    filter: EventFilter,
    config: OrchestratorConfig,
) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let (queue, mut rx) = WorkQueue::new();

    // Subscribe before the initial listing so no change falls in between
    let events = controller.subscribe();
    for target in controller.list_all_targets() {
        queue.enqueue(target.key());
    }

    tokio::spawn(watch_events(
        controller.clone(),
        filter,
        queue.clone(),
        events,
        shutdown.clone(),
    ));
    tokio::spawn(run_reaper(controller, config.clone(), shutdown.clone()));

    let token = shutdown.clone();
    tokio::spawn(async move {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        let reconciler = Arc::new(reconciler);

        info!(workers = config.workers, "Orchestrator started");

        loop {
            let key = tokio::select! {
                key = rx.recv() => match key {
                    Some(key) => key,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let permit = tokio::select! {
                permit = workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            queue.start(&key);
            let reconciler = reconciler.clone();
            let queue = queue.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_pass(&reconciler, &queue, &key, &config, &shutdown).await;
                queue.finish(&key);
                drop(permit);
            });
        }

        info!("Orchestrator shutting down");
    });

    token
}

/// One reconcile pass for `key`, followed by its requeue decision
async fn run_pass(
    reconciler: &TargetReconciler,
    queue: &WorkQueue,
    key: &TargetKey,
    config: &OrchestratorConfig,
    shutdown: &CancellationToken,
) {
    let result = tokio::select! {
        result = tokio::time::timeout(config.pass_timeout, reconciler.reconcile(key)) => result,
        _ = shutdown.cancelled() => return,
    };

    let retry = match result {
        Ok(Ok(outcome)) if outcome.needs_backoff() => {
            debug!(
                target_key = %key,
                errors = outcome.kernel_errors.len(),
                "Pass had retryable kernel errors"
            );
            true
        }
        Ok(Ok(outcome)) => {
            queue.forget(key);
            if outcome.requeue {
                queue.enqueue_after(key.clone(), config.requeue_after, shutdown.clone());
            }
            false
        }
        Ok(Err(e)) => {
            error!(target_key = %key, error = %e, "Reconcile failed");
            true
        }
        Err(_) => {
            warn!(target_key = %key, timeout = ?config.pass_timeout, "Reconcile timed out");
            true
        }
    };

    if retry {
        let failures = queue.record_failure(key);
        let delay = config.backoff(failures);
        debug!(target_key = %key, failures, delay = ?delay, "Retrying with backoff");
        queue.enqueue_after(key.clone(), delay, shutdown.clone());
    }
}

/// Feed cluster events through the predicates into the queue
async fn watch_events(
    controller: ClusterController,
    filter: EventFilter,
    queue: WorkQueue,
    mut events: broadcast::Receiver<ClusterEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = shutdown.cancelled() => break,
        };

        match event {
            Ok(event) => {
                for key in filter.keys_for(&event, &controller) {
                    queue.enqueue(key);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event stream lagged, resyncing all targets");
                for target in controller.list_all_targets() {
                    queue.enqueue(target.key());
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_reaper(
    controller: ClusterController,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
) {
    let grace = chrono::Duration::from_std(config.reap_grace)
        .unwrap_or_else(|_| chrono::Duration::seconds(60));
    let mut ticker = interval(config.reap_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = reap_orphaned_workload_sets(&controller, grace, chrono::Utc::now());
                if !reaped.is_empty() {
                    info!(count = reaped.len(), "Reaped workload sets");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Build, KernelMapping, LabelSelector, Node, Target};
    use crate::pipeline::PipelineSettings;
    use crate::registry::MockRegistryProbe;

    fn key(name: &str) -> TargetKey {
        TargetKey::new("default", name)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = OrchestratorConfig {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
        assert_eq!(config.backoff(5), Duration::from_secs(1));
        assert_eq!(config.backoff(100), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_queue_deduplicates() {
        let (queue, mut rx) = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));

        assert_eq!(rx.recv().await, Some(key("a")));
        assert_eq!(rx.recv().await, Some(key("b")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_key_enqueued_while_running_runs_again() {
        let (queue, mut rx) = WorkQueue::new();
        queue.enqueue(key("a"));
        let taken = rx.recv().await.unwrap();
        queue.start(&taken);

        queue.enqueue(key("a"));
        queue.enqueue(key("a"));
        assert!(rx.try_recv().is_err());

        queue.finish(&taken);
        assert_eq!(rx.recv().await, Some(key("a")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failure_counts_reset() {
        let (queue, _rx) = WorkQueue::new();
        assert_eq!(queue.record_failure(&key("a")), 1);
        assert_eq!(queue.record_failure(&key("a")), 2);
        queue.forget(&key("a"));
        assert_eq!(queue.record_failure(&key("a")), 1);
    }

    #[tokio::test]
    async fn test_orchestrator_reacts_to_events() {
        let controller = ClusterController::new();
        let mut registry = MockRegistryProbe::new();
        registry
            .expect_image_exists()
            .returning(|_, _, _| Ok(false));
        let reconciler = TargetReconciler::for_cluster(
            &controller,
            Arc::new(registry),
            &PipelineSettings::default(),
            "kernel",
        );

        let shutdown = spawn_orchestrator(
            controller.clone(),
            reconciler,
            EventFilter::new("kernel"),
            OrchestratorConfig::default(),
        );

        controller
            .apply_target(
                Target::new("default", "mod-a")
                    .with_selector("feature", "x")
                    .with_build(Build::new("FROM scratch"))
                    .with_mapping(KernelMapping::regexp(".*").with_image("registry/mod-a:latest")),
            )
            .unwrap();
        controller
            .apply_node(
                Node::new("n1")
                    .with_label("feature", "x")
                    .with_label("kernel", "5.14.0"),
            )
            .unwrap();

        let mut jobs = Vec::new();
        for _ in 0..100 {
            jobs = controller.list_jobs("default", &LabelSelector::default());
            if !jobs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();

        assert_eq!(jobs.len(), 1);
    }
}
