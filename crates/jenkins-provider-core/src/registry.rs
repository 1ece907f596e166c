//! Kind registration table.
//!
//! Built once at startup and passed by reference to whatever needs to turn manifests into
//! managed resources or to check which kinds a controller serves.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::kinds::{FolderParameters, JobParameters, NodeParameters};
use crate::resource::{ForProvider, Managed, ManagedResource, ResourceKind};

type DecodeFn = fn(Value) -> Result<Box<dyn ManagedResource>, CoreError>;

fn decode<P: ForProvider>(value: Value) -> Result<Box<dyn ManagedResource>, CoreError> {
    Ok(Box::new(Managed::<P>::from_json(value)?))
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    decoders: BTreeMap<ResourceKind, DecodeFn>,
}

impl KindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with Job, Folder and Node registered
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.register::<JobParameters>();
        registry.register::<FolderParameters>();
        registry.register::<NodeParameters>();
        registry
    }

    pub fn register<P: ForProvider>(&mut self) {
        if self.decoders.insert(P::KIND, decode::<P>).is_some() {
            tracing::warn!(kind = %P::KIND, "Resource kind registered twice");
        }
    }

    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.decoders.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.decoders.keys().copied()
    }

    /// Decode a manifest entry, dispatching on its `kind` field
    pub fn decode(&self, value: Value) -> Result<Box<dyn ManagedResource>, CoreError> {
        let kind_str = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid_resource("manifest entry has no kind"))?;
        let kind: ResourceKind = kind_str.parse()?;
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or_else(|| CoreError::KindNotRegistered(kind.to_string()))?;
        decoder(value)
    }
}
