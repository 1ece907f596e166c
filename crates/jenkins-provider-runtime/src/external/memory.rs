//! Process-local stand-in for a Jenkins instance.
//!
//! Used for dry runs and tests. Jobs and folders share one item namespace, agents live in a
//! separate one, matching Jenkins. Creating an item inside a folder that does not exist fails
//! with `NotFound`, as `createItem` does.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jenkins_provider_core::{ConnectionDetails, ExternalRef, ResourceKind, SecretBytes};
use serde_json::Value;

use super::{Creation, ExternalClient, Observation};
use crate::context::PassContext;
use crate::error::ExternalError;

/// Adapter verb, used for call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Observe,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Namespace {
    Items,
    Computers,
}

impl From<ResourceKind> for Namespace {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Job | ResourceKind::Folder => Namespace::Items,
            ResourceKind::Node => Namespace::Computers,
        }
    }
}

#[derive(Debug, Default)]
struct TargetState {
    objects: BTreeMap<(Namespace, ExternalRef), Value>,
    calls: HashMap<(ResourceKind, Verb), usize>,
}

#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
}

impl MemoryTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adapter for one kind backed by this target
    pub fn client(self: &Arc<Self>, kind: ResourceKind) -> Arc<dyn ExternalClient> {
        Arc::new(MemoryClient {
            target: Arc::clone(self),
            kind,
        })
    }

    /// Put an object in place without going through an adapter
    pub fn seed(&self, kind: ResourceKind, target: ExternalRef, config: Value) {
        self.lock().objects.insert((kind.into(), target), config);
    }

    pub fn get(&self, kind: ResourceKind, target: &ExternalRef) -> Option<Value> {
        self.lock()
            .objects
            .get(&(kind.into(), target.clone()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn calls(&self, kind: ResourceKind, verb: Verb) -> usize {
        self.lock().calls.get(&(kind, verb)).copied().unwrap_or(0)
    }

    /// Create, Update and Delete calls across all kinds
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|((_, verb), _)| *verb != Verb::Observe)
            .map(|(_, count)| count)
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TargetState> {
        // A poisoned lock only means a test thread panicked mid-call; the map is still usable.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct MemoryClient {
    target: Arc<MemoryTarget>,
    kind: ResourceKind,
}

impl MemoryClient {
    fn record(&self, state: &mut TargetState, verb: Verb) {
        *state.calls.entry((self.kind, verb)).or_default() += 1;
    }

    fn parent_exists(state: &TargetState, target: &ExternalRef) -> bool {
        let segments = target.parent_segments();
        let Some((name, rest)) = segments.split_last() else {
            return true;
        };
        let parent = if rest.is_empty() {
            None
        } else {
            Some(rest.join("/"))
        };
        state
            .objects
            .contains_key(&(Namespace::Items, ExternalRef::new(*name, parent)))
    }
}

#[async_trait]
impl ExternalClient for MemoryClient {
    async fn observe(
        &self,
        _ctx: &PassContext,
        target: &ExternalRef,
    ) -> Result<Observation, ExternalError> {
        let mut state = self.target.lock();
        self.record(&mut state, Verb::Observe);
        Ok(match state.objects.get(&(self.kind.into(), target.clone())) {
            Some(config) => Observation::Found(config.clone()),
            None => Observation::NotFound,
        })
    }

    async fn create(
        &self,
        _ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<Creation, ExternalError> {
        let mut state = self.target.lock();
        self.record(&mut state, Verb::Create);
        let key = (Namespace::from(self.kind), target.clone());
        if state.objects.contains_key(&key) {
            return Err(ExternalError::already_exists(target.to_string()));
        }
        if !Self::parent_exists(&state, target) {
            return Err(ExternalError::NotFound);
        }
        state.objects.insert(key, config.clone());

        Ok(Creation {
            external_identity: target.to_string(),
            connection_details: self.connection_details(target)?,
        })
    }

    async fn update(
        &self,
        _ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<(), ExternalError> {
        let mut state = self.target.lock();
        self.record(&mut state, Verb::Update);
        match state.objects.get_mut(&(self.kind.into(), target.clone())) {
            Some(existing) => {
                *existing = config.clone();
                Ok(())
            }
            None => Err(ExternalError::NotFound),
        }
    }

    async fn delete(&self, _ctx: &PassContext, target: &ExternalRef) -> Result<(), ExternalError> {
        let mut state = self.target.lock();
        self.record(&mut state, Verb::Delete);
        state.objects.remove(&(self.kind.into(), target.clone()));
        Ok(())
    }

    fn connection_details(&self, target: &ExternalRef) -> Result<ConnectionDetails, ExternalError> {
        let mut details = ConnectionDetails::new();
        details.insert(
            "url".into(),
            SecretBytes::from(format!("memory://{}/{}", self.kind, target)),
        );
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> PassContext {
        PassContext::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let target = MemoryTarget::new();
        let jobs = target.client(ResourceKind::Job);
        let r = ExternalRef::new("build-1", None);

        jobs.create(&ctx(), &r, &json!("X")).await.unwrap();
        let err = jobs.create(&ctx(), &r, &json!("X")).await.unwrap_err();
        assert!(matches!(err, ExternalError::AlreadyExists(_)));
        assert_eq!(target.object_count(), 1);
    }

    #[tokio::test]
    async fn test_items_need_their_folder() {
        let target = MemoryTarget::new();
        let jobs = target.client(ResourceKind::Job);
        let folders = target.client(ResourceKind::Folder);
        let nested = ExternalRef::new("build", Some("team/ci".into()));

        assert_eq!(
            jobs.create(&ctx(), &nested, &json!("X")).await.unwrap_err(),
            ExternalError::NotFound
        );

        folders
            .create(&ctx(), &ExternalRef::new("team", None), &json!("F"))
            .await
            .unwrap();
        folders
            .create(&ctx(), &ExternalRef::new("ci", Some("team".into())), &json!("F"))
            .await
            .unwrap();
        jobs.create(&ctx(), &nested, &json!("X")).await.unwrap();
        assert_eq!(target.get(ResourceKind::Job, &nested), Some(json!("X")));
    }

    #[tokio::test]
    async fn test_same_name_different_parent_are_distinct() {
        let target = MemoryTarget::new();
        target.seed(ResourceKind::Folder, ExternalRef::new("a", None), json!("F"));
        target.seed(ResourceKind::Folder, ExternalRef::new("b", None), json!("F"));
        let jobs = target.client(ResourceKind::Job);

        jobs.create(&ctx(), &ExternalRef::new("build", Some("a".into())), &json!("1"))
            .await
            .unwrap();
        jobs.create(&ctx(), &ExternalRef::new("build", Some("b".into())), &json!("2"))
            .await
            .unwrap();
        assert_eq!(target.object_count(), 4);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok_and_update_absent_is_not_found() {
        let target = MemoryTarget::new();
        let nodes = target.client(ResourceKind::Node);
        let r = ExternalRef::new("agent", None);

        nodes.delete(&ctx(), &r).await.unwrap();
        assert_eq!(
            nodes.update(&ctx(), &r, &json!({})).await.unwrap_err(),
            ExternalError::NotFound
        );
        assert_eq!(target.calls(ResourceKind::Node, Verb::Delete), 1);
        assert_eq!(target.mutating_calls(), 2);
    }
}
