//! Controller: a pool of workers pulling keys from the work queue and running reconcile passes.
//!
//! Every pass gets its own [`PassContext`] and runs in its own task, so a panicking pass only
//! costs that key a backoff. Shutdown is a `watch` signal: it stops the queue, aborts in-flight
//! adapter calls, and `run` returns once every worker has drained.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jenkins_provider_core::{ResourceKey, ResourceKind};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::context::{PassContext, wait_for_shutdown};
use crate::engine::{PassOutcome, Reconciler, Requeue};
use crate::error::StoreError;
use crate::queue::WorkQueue;
use crate::store::ResourceStore;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent reconcile passes
    pub workers: usize,
    /// Deadline of one pass
    pub pass_timeout: Duration,
    /// Requeue delay after a converged pass
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            pass_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconcilers: HashMap<ResourceKind, Arc<Reconciler>>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(store: Arc<dyn ResourceStore>, config: ControllerConfig) -> Self {
        Self {
            store,
            reconcilers: HashMap::new(),
            queue: Arc::new(WorkQueue::new(config.backoff)),
            config,
        }
    }

    /// Serve the kind of `reconciler`. A later registration for the same kind replaces it.
    pub fn register(&mut self, reconciler: Reconciler) {
        let kind = reconciler.kind();
        if self
            .reconcilers
            .insert(kind, Arc::new(reconciler))
            .is_some()
        {
            warn!(kind = %kind, "Reconciler registered twice");
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.reconcilers.keys().copied()
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        let controller = Arc::new(self);
        let changes = controller.store.watch();
        controller.enqueue_all().await?;

        let workers = controller.config.workers.max(1);
        info!(
            workers,
            kinds = ?controller.reconcilers.keys().collect::<Vec<_>>(),
            "Controller started"
        );

        let watcher = tokio::spawn(Arc::clone(&controller).watch_changes(changes, shutdown.clone()));
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| tokio::spawn(Arc::clone(&controller).worker(id, shutdown.clone())))
            .collect();

        wait_for_shutdown(&mut shutdown).await;
        info!("Controller shutting down");
        controller.queue.shutdown();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        if let Err(e) = watcher.await {
            error!(error = %e, "Change watcher task failed");
        }
        info!("Controller stopped");
        Ok(())
    }

    async fn enqueue_all(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for key in self.store.list_keys().await? {
            if self.reconcilers.contains_key(&key.kind) {
                self.queue.add(key);
                count += 1;
            } else {
                warn!(key = %key, "No reconciler for resource kind");
            }
        }
        debug!(count, "Enqueued stored resources");
        Ok(count)
    }

    async fn watch_changes(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<ResourceKey>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                received = changes.recv() => match received {
                    Ok(key) => self.queue.add(key),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Change feed lagged, resyncing");
                        if let Err(e) = self.enqueue_all().await {
                            error!(error = %e, "Resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Change watcher stopped");
    }

    async fn worker(self: Arc<Self>, id: usize, shutdown: watch::Receiver<bool>) {
        debug!(worker = id, "Worker started");
        while let Some(key) = self.queue.next().await {
            self.process(&key, &shutdown).await;
            self.queue.done(&key);
        }
        debug!(worker = id, "Worker stopped");
    }

    async fn process(&self, key: &ResourceKey, shutdown: &watch::Receiver<bool>) {
        let Some(reconciler) = self.reconcilers.get(&key.kind).cloned() else {
            warn!(key = %key, "No reconciler for resource kind");
            self.queue.forget(key);
            return;
        };

        let resource = match self.store.get(key).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                debug!(key = %key, "Resource no longer exists");
                self.queue.forget(key);
                return;
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(key = %key, error = %e, delay_ms = delay.as_millis() as u64, "Cannot load resource");
                return;
            }
        };

        let ctx = PassContext::new(self.config.pass_timeout, shutdown.clone());
        let pass =
            tokio::spawn(async move { reconciler.reconcile(&ctx, resource.as_ref()).await });

        match pass.await {
            Ok(outcome) => {
                let delay = apply_requeue(&self.queue, key, &outcome, self.config.poll_interval);
                match &outcome.error {
                    Some(e) => debug!(
                        key = %key,
                        error = %e,
                        retries = self.queue.retries(key),
                        delay_ms = delay.map(|d| d.as_millis() as u64),
                        "Pass failed"
                    ),
                    None => debug!(
                        key = %key,
                        state = ?outcome.state,
                        delay_ms = delay.map(|d| d.as_millis() as u64),
                        "Pass finished"
                    ),
                }
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(key.clone());
                error!(
                    key = %key,
                    panicked = e.is_panic(),
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Reconcile pass crashed"
                );
            }
        }
    }
}

/// Requeue `key` as the outcome asks. Returns the delay, or `None` if the key was not requeued.
pub fn apply_requeue(
    queue: &WorkQueue,
    key: &ResourceKey,
    outcome: &PassOutcome,
    poll_interval: Duration,
) -> Option<Duration> {
    match outcome.requeue {
        Requeue::Converged => {
            queue.forget(key);
            queue.add_after(key.clone(), poll_interval);
            Some(poll_interval)
        }
        Requeue::Progress => {
            queue.forget(key);
            let delay = queue.backoff().base;
            queue.add_after(key.clone(), delay);
            Some(delay)
        }
        Requeue::Backoff => Some(queue.add_rate_limited(key.clone())),
        Requeue::Capped => Some(queue.add_capped(key.clone())),
        Requeue::Done | Requeue::Drop => {
            queue.forget(key);
            None
        }
        Requeue::Abort => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Connector;
    use crate::engine::ResourceState;
    use crate::error::{ExternalError, ReconcileError, ResolveError};
    use crate::events::TracingRecorder;
    use crate::external::{Creation, ExternalClient, MemoryTarget, Observation};
    use crate::publisher::DiscardPublisher;
    use crate::store::MemoryResourceStore;
    use async_trait::async_trait;
    use jenkins_provider_core::{ExternalRef, Job, JobParameters, ManagedResource};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Job, "build-1")
    }

    fn outcome(requeue: Requeue) -> PassOutcome {
        PassOutcome {
            state: ResourceState::Unobserved,
            requeue,
            error: None,
        }
    }

    #[test]
    fn test_requeue_mapping() {
        let queue = WorkQueue::new(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(5),
        ));
        let poll = Duration::from_secs(30);

        assert_eq!(
            apply_requeue(&queue, &key(), &outcome(Requeue::Converged), poll),
            Some(poll)
        );
        assert_eq!(
            apply_requeue(&queue, &key(), &outcome(Requeue::Progress), poll),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            apply_requeue(&queue, &key(), &outcome(Requeue::Capped), poll),
            Some(Duration::from_secs(5))
        );
        assert_eq!(apply_requeue(&queue, &key(), &outcome(Requeue::Abort), poll), None);
        assert_eq!(apply_requeue(&queue, &key(), &outcome(Requeue::Drop), poll), None);
    }

    /// Observe hangs until `healthy` is set
    struct HangingClient {
        inner: Arc<dyn ExternalClient>,
        healthy: AtomicBool,
    }

    #[async_trait]
    impl ExternalClient for HangingClient {
        async fn observe(
            &self,
            ctx: &PassContext,
            target: &ExternalRef,
        ) -> Result<Observation, ExternalError> {
            if !self.healthy.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.observe(ctx, target).await
        }

        async fn create(
            &self,
            ctx: &PassContext,
            target: &ExternalRef,
            config: &Value,
        ) -> Result<Creation, ExternalError> {
            self.inner.create(ctx, target, config).await
        }

        async fn update(
            &self,
            ctx: &PassContext,
            target: &ExternalRef,
            config: &Value,
        ) -> Result<(), ExternalError> {
            self.inner.update(ctx, target, config).await
        }

        async fn delete(&self, ctx: &PassContext, target: &ExternalRef) -> Result<(), ExternalError> {
            self.inner.delete(ctx, target).await
        }
    }

    struct FixedConnector(Arc<dyn ExternalClient>);

    #[async_trait]
    impl Connector for FixedConnector {
        async fn connect(
            &self,
            _resource: &dyn ManagedResource,
        ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
            Ok(Arc::clone(&self.0))
        }

        fn release(&self, _key: &ResourceKey) {}
    }

    async fn run_pass(store: &MemoryResourceStore, reconciler: &Reconciler) -> PassOutcome {
        let resource = store.get(&key()).await.unwrap().unwrap();
        let ctx = PassContext::with_timeout(Duration::from_secs(1));
        reconciler.reconcile(&ctx, resource.as_ref()).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_back_off_and_success_resets() {
        let base = Duration::from_millis(100);
        let queue = WorkQueue::new(BackoffPolicy::new(base, Duration::from_secs(10)));
        let client = Arc::new(HangingClient {
            inner: MemoryTarget::new().client(ResourceKind::Job),
            healthy: AtomicBool::new(false),
        });
        let store = Arc::new(MemoryResourceStore::new());
        let reconciler = Reconciler::new(
            ResourceKind::Job,
            Arc::new(FixedConnector(client.clone())),
            store.clone(),
            Arc::new(TracingRecorder),
            Arc::new(DiscardPublisher),
        );
        store
            .apply(Box::new(Job::new(
                "build-1",
                JobParameters {
                    name: "build-1".into(),
                    parent: None,
                    config: "X".into(),
                },
            )))
            .await
            .unwrap();

        let poll = Duration::from_secs(60);

        let first = run_pass(&store, &reconciler).await;
        assert!(matches!(first.error, Some(ReconcileError::Transient(_))));
        assert_eq!(apply_requeue(&queue, &key(), &first, poll), Some(base));

        let second = run_pass(&store, &reconciler).await;
        assert_eq!(apply_requeue(&queue, &key(), &second, poll), Some(base * 2));

        client.healthy.store(true, Ordering::SeqCst);
        let third = run_pass(&store, &reconciler).await;
        assert!(third.is_success());
        assert_eq!(apply_requeue(&queue, &key(), &third, poll), Some(poll));
        assert_eq!(queue.retries(&key()), 0);

        client.healthy.store(false, Ordering::SeqCst);
        let fourth = run_pass(&store, &reconciler).await;
        assert_eq!(apply_requeue(&queue, &key(), &fourth, poll), Some(base));
    }
}
