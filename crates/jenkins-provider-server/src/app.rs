//! Wires stores, credential resolution and reconcilers into a runnable controller.

use std::path::Path;
use std::sync::Arc;

use jenkins_provider_core::KindRegistry;
use jenkins_provider_runtime::{
    BroadcastRecorder, ClientFactory, Controller, CredentialResolver, EventRecorder,
    JenkinsClientFactory, MemoryClientFactory, MemoryProviderConfigStore, MemoryResourceStore,
    MemorySecretStore, MemoryTarget, ReconcileEvent, Reconciler, StoreError, TracingRecorder,
    UsageTracker,
};
use tokio::sync::watch;
use tracing::info;

use crate::bootstrap::{self, BootstrapError, BootstrapStats, BootstrapTargets};
use crate::config::{AppConfig, TargetKind};

/// Logs every event and forwards it to broadcast subscribers
struct AppRecorder {
    events: BroadcastRecorder,
}

impl EventRecorder for AppRecorder {
    fn record(&self, event: ReconcileEvent) {
        TracingRecorder.record(event.clone());
        self.events.record(event);
    }
}

pub struct App {
    registry: KindRegistry,
    store: Arc<MemoryResourceStore>,
    configs: Arc<MemoryProviderConfigStore>,
    secrets: Arc<MemorySecretStore>,
    usage: Arc<UsageTracker>,
    events: BroadcastRecorder,
    memory_target: Option<Arc<MemoryTarget>>,
    controller: Controller,
}

impl App {
    pub fn new(cfg: &AppConfig) -> Self {
        let registry = KindRegistry::with_builtin_kinds();
        let usage = Arc::new(UsageTracker::new());
        let configs = Arc::new(MemoryProviderConfigStore::new(Arc::clone(&usage)));
        let secrets = Arc::new(MemorySecretStore::new());
        let store = Arc::new(MemoryResourceStore::new());
        let events = BroadcastRecorder::new();
        let recorder: Arc<dyn EventRecorder> = Arc::new(AppRecorder {
            events: events.clone(),
        });

        let memory_target = match cfg.target.kind {
            TargetKind::Jenkins => None,
            TargetKind::Memory => Some(MemoryTarget::new()),
        };
        let factory: Arc<dyn ClientFactory> = match &memory_target {
            Some(target) => Arc::new(MemoryClientFactory::new(Arc::clone(target))),
            None => Arc::new(JenkinsClientFactory::new(cfg.request_timeout())),
        };
        let resolver = Arc::new(CredentialResolver::new(
            configs.clone(),
            secrets.clone(),
            Arc::clone(&usage),
            factory,
        ));

        let mut controller = Controller::new(store.clone(), cfg.controller_config());
        for kind in registry.kinds() {
            controller.register(
                Reconciler::new(
                    kind,
                    resolver.clone(),
                    store.clone(),
                    Arc::clone(&recorder),
                    secrets.clone(),
                )
                .with_failure_threshold(cfg.backoff.failure_threshold),
            );
        }

        info!(
            target_kind = ?cfg.target.kind,
            workers = cfg.controller.workers,
            "Provider initialized"
        );

        Self {
            registry,
            store,
            configs,
            secrets,
            usage,
            events,
            memory_target,
            controller,
        }
    }

    pub async fn load_manifest(&self, path: &Path) -> Result<BootstrapStats, BootstrapError> {
        let manifest = bootstrap::read_manifest(path).await?;
        bootstrap::apply_manifest(
            manifest,
            &BootstrapTargets {
                registry: &self.registry,
                secrets: &self.secrets,
                configs: &self.configs,
                resources: &self.store,
            },
        )
        .await
    }

    pub fn store(&self) -> &Arc<MemoryResourceStore> {
        &self.store
    }

    pub fn provider_configs(&self) -> &Arc<MemoryProviderConfigStore> {
        &self.configs
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Reconcile events recorded from now on
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    /// The in-process target, when configured with `target.kind = "memory"`
    pub fn memory_target(&self) -> Option<&Arc<MemoryTarget>> {
        self.memory_target.as_ref()
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        self.controller.run(shutdown).await
    }
}
