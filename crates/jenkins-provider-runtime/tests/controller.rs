//! End-to-end controller runs against the in-memory target.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jenkins_provider_core::{
    CredentialsSource, ExternalRef, Folder, FolderParameters, Job, JobParameters, ManagedResource,
    ProviderConfig, ResourceKey, ResourceKind, SecretBytes, SecretKeySelector,
};
use jenkins_provider_runtime::{
    BackoffPolicy, ClientFactory, Controller, ControllerConfig, Creation, CredentialResolver,
    ExternalClient, ExternalError, MemoryClientFactory, MemoryProviderConfigStore,
    MemoryResourceStore, MemorySecretStore, MemoryTarget, Observation, PassContext, Reconciler,
    ResolveError, ResourceStore, TracingRecorder, UsageTracker, Verb,
};
use serde_json::{Value, json};
use tokio::sync::watch;

const CREDENTIALS: &str = r#"{"url": "http://jenkins.local", "username": "admin", "token": "t"}"#;

/// Wraps a client: fails the first `failures` creates and tracks in-flight calls per item.
struct FlakyClient {
    inner: Arc<dyn ExternalClient>,
    failures: AtomicUsize,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
}

impl FlakyClient {
    fn enter(&self, target: &ExternalRef) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(target.to_string()).or_default();
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, target: &ExternalRef) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&target.to_string()) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl ExternalClient for FlakyClient {
    async fn observe(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
    ) -> Result<Observation, ExternalError> {
        self.enter(target);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.inner.observe(ctx, target).await;
        self.leave(target);
        result
    }

    async fn create(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<Creation, ExternalError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ExternalError::transient("Jenkins returned 502 Bad Gateway"));
        }
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

struct FlakyFactory {
    clients: HashMap<ResourceKind, Arc<FlakyClient>>,
}

impl ClientFactory for FlakyFactory {
    fn build(
        &self,
        kind: ResourceKind,
        _credentials: &jenkins_provider_core::Credentials,
    ) -> Result<Arc<dyn ExternalClient>, ResolveError> {
        self.clients
            .get(&kind)
            .map(|c| Arc::clone(c) as Arc<dyn ExternalClient>)
            .ok_or_else(|| ResolveError::credential(format!("no client for {kind}")))
    }
}

struct Setup {
    store: Arc<MemoryResourceStore>,
    usage: Arc<UsageTracker>,
    controller: Controller,
}

async fn setup(factory: Arc<dyn ClientFactory>) -> Setup {
    let usage = Arc::new(UsageTracker::new());
    let configs = Arc::new(MemoryProviderConfigStore::new(Arc::clone(&usage)));
    let secrets = Arc::new(MemorySecretStore::new());
    configs
        .insert(ProviderConfig {
            name: "default".into(),
            credentials: CredentialsSource::Secret {
                secret_ref: SecretKeySelector {
                    namespace: "default".into(),
                    name: "jenkins".into(),
                    key: "credentials".into(),
                },
            },
        })
        .await;
    secrets
        .insert(
            "default",
            "jenkins",
            BTreeMap::from([("credentials".to_string(), SecretBytes::from(CREDENTIALS))]),
        )
        .await;

    let resolver = Arc::new(CredentialResolver::new(
        configs,
        secrets.clone(),
        Arc::clone(&usage),
        factory,
    ));
    let store = Arc::new(MemoryResourceStore::new());
    let mut controller = Controller::new(
        store.clone(),
        ControllerConfig {
            workers: 4,
            pass_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(300),
            backoff: BackoffPolicy::new(Duration::from_millis(20), Duration::from_secs(2)),
        },
    );
    for kind in ResourceKind::ALL {
        controller.register(Reconciler::new(
            kind,
            resolver.clone(),
            store.clone(),
            Arc::new(TracingRecorder),
            secrets.clone(),
        ));
    }
    Setup {
        store,
        usage,
        controller,
    }
}

fn job(name: &str, parent: Option<&str>, config: &str) -> Box<dyn ManagedResource> {
    Box::new(Job::new(
        name,
        JobParameters {
            name: name.into(),
            parent: parent.map(str::to_string),
            config: config.into(),
        },
    ))
}

async fn converged(store: &MemoryResourceStore, keys: &[ResourceKey]) -> bool {
    for key in keys {
        match store.get(key).await.unwrap() {
            Some(resource) if resource.status().is_converged() => {}
            _ => return false,
        }
    }
    true
}

/// Converged at the latest generation
async fn settled(store: &MemoryResourceStore, key: &ResourceKey) -> bool {
    match store.get(key).await.unwrap() {
        Some(resource) => {
            resource.status().is_converged()
                && resource.status().observed_generation == resource.metadata().generation
        }
        None => false,
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_converges_with_eventually_succeeding_target() {
    let target = MemoryTarget::new();
    let flaky = Arc::new(FlakyClient {
        inner: target.client(ResourceKind::Job),
        failures: AtomicUsize::new(3),
        in_flight: Mutex::new(HashMap::new()),
        max_in_flight: AtomicUsize::new(0),
    });
    let factory = FlakyFactory {
        clients: HashMap::from([(ResourceKind::Job, Arc::clone(&flaky))]),
    };
    let Setup {
        store, controller, ..
    } = setup(Arc::new(factory)).await;

    let keys: Vec<_> = (0..5)
        .map(|i| ResourceKey::new(ResourceKind::Job, format!("build-{i}")))
        .collect();
    for key in &keys {
        store.apply(job(&key.name, None, "<project/>")).await.unwrap();
    }

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(controller.run(rx));

    wait_until(|| converged(&store, &keys)).await;
    assert_eq!(target.object_count(), 5);
    assert_eq!(target.calls(ResourceKind::Job, Verb::Create), 5);
    assert_eq!(target.calls(ResourceKind::Job, Verb::Update), 0);

    tx.send(true).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_per_key_under_change_bursts() {
    let target = MemoryTarget::new();
    let flaky = Arc::new(FlakyClient {
        inner: target.client(ResourceKind::Job),
        failures: AtomicUsize::new(0),
        in_flight: Mutex::new(HashMap::new()),
        max_in_flight: AtomicUsize::new(0),
    });
    let factory = FlakyFactory {
        clients: HashMap::from([(ResourceKind::Job, Arc::clone(&flaky))]),
    };
    let Setup {
        store, controller, ..
    } = setup(Arc::new(factory)).await;
    let queue = controller.queue();

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(controller.run(rx));

    for round in 0..20 {
        store
            .apply(job("build-1", None, &format!("<project><n>{round}</n></project>")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let key = ResourceKey::new(ResourceKind::Job, "build-1");
    let (store_ref, queue_ref, key_ref) = (&store, &queue, &key);
    wait_until(move || async move {
        settled(store_ref, key_ref).await && !queue_ref.is_processing(key_ref)
    })
    .await;

    assert_eq!(flaky.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        target.get(ResourceKind::Job, &ExternalRef::new("build-1", None)),
        Some(json!("<project><n>19</n></project>"))
    );

    tx.send(true).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deletion_finalizes_and_releases_usage() {
    let target = MemoryTarget::new();
    let Setup {
        store,
        usage,
        controller,
    } = setup(Arc::new(MemoryClientFactory::new(Arc::clone(&target)))).await;

    store
        .apply(Box::new(Folder::new(
            "team",
            FolderParameters {
                name: "team".into(),
                parent: None,
                config: None,
            },
        )))
        .await
        .unwrap();
    store
        .apply(job("build-1", Some("team"), "<project/>"))
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(controller.run(rx));

    let job_key = ResourceKey::new(ResourceKind::Job, "build-1");
    let folder_key = ResourceKey::new(ResourceKind::Folder, "team");
    let keys = [job_key.clone(), folder_key];
    wait_until(|| converged(&store, &keys)).await;
    assert_eq!(usage.users("default"), 2);

    store.request_deletion(&job_key).await.unwrap();
    let (store_ref, key_ref) = (&store, &job_key);
    wait_until(move || async move { store_ref.get(key_ref).await.unwrap().is_none() }).await;

    assert!(
        target
            .get(ResourceKind::Job, &ExternalRef::new("build-1", Some("team".into())))
            .is_none()
    );
    assert_eq!(usage.users("default"), 1);

    tx.send(true).unwrap();
    running.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_idle_workers_returns() {
    let target = MemoryTarget::new();
    let Setup { controller, .. } =
        setup(Arc::new(MemoryClientFactory::new(Arc::clone(&target)))).await;

    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(controller.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("controller did not stop")
        .unwrap()
        .unwrap();
}
