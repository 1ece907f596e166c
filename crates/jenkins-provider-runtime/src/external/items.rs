//! Adapter for Jenkins items (jobs and folders).
//!
//! Items are addressed by their folder path: `a/b/name` lives at `/job/a/job/b/job/name`.

use async_trait::async_trait;
use jenkins_provider_core::{ConnectionDetails, ExternalRef, ResourceKind, SecretBytes};
use serde_json::Value;
use url::Url;

use super::jenkins::{JenkinsClient, PostBody};
use super::{Creation, ExternalClient, Observation};
use crate::context::PassContext;
use crate::error::ExternalError;

pub struct ItemClient {
    jenkins: JenkinsClient,
    kind: ResourceKind,
}

impl ItemClient {
    pub fn new(jenkins: JenkinsClient, kind: ResourceKind) -> Self {
        Self { jenkins, kind }
    }

    fn container_segments(target: &ExternalRef) -> Vec<&str> {
        let mut segments = Vec::new();
        for parent in target.parent_segments() {
            segments.push("job");
            segments.push(parent);
        }
        segments
    }

    fn item_url(&self, target: &ExternalRef, suffix: Option<&str>) -> Result<Url, ExternalError> {
        let mut segments = Self::container_segments(target);
        segments.push("job");
        segments.push(&target.name);
        if let Some(suffix) = suffix {
            segments.push(suffix);
        }
        self.jenkins.url(&segments)
    }

    fn xml_config(&self, config: &Value) -> Result<String, ExternalError> {
        config.as_str().map(str::to_string).ok_or_else(|| {
            ExternalError::permanent(format!(
                "{} configuration must be an XML document",
                self.kind
            ))
        })
    }
}

#[async_trait]
impl ExternalClient for ItemClient {
    async fn observe(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
    ) -> Result<Observation, ExternalError> {
        let url = self.item_url(target, Some("config.xml"))?;
        match self.jenkins.get_text(ctx, url).await {
            Ok(xml) => Ok(Observation::Found(Value::String(xml))),
            Err(ExternalError::NotFound) => Ok(Observation::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn create(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<Creation, ExternalError> {
        let xml = self.xml_config(config)?;
        let mut segments = Self::container_segments(target);
        segments.push("createItem");
        let url = self.jenkins.url(&segments)?;

        self.jenkins
            .post(ctx, url, &[("name", target.name.as_str())], PostBody::Xml(xml))
            .await?;

        let connection_details = self.connection_details(target)?;

        tracing::debug!(kind = %self.kind, item = %target, "Jenkins item created");
        Ok(Creation {
            external_identity: target.to_string(),
            connection_details,
        })
    }

    async fn update(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<(), ExternalError> {
        let xml = self.xml_config(config)?;
        let url = self.item_url(target, Some("config.xml"))?;
        self.jenkins.post(ctx, url, &[], PostBody::Xml(xml)).await
    }

    async fn delete(&self, ctx: &PassContext, target: &ExternalRef) -> Result<(), ExternalError> {
        let url = self.item_url(target, Some("doDelete"))?;
        match self.jenkins.post(ctx, url, &[], PostBody::Empty).await {
            Ok(()) | Err(ExternalError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn connection_details(&self, target: &ExternalRef) -> Result<ConnectionDetails, ExternalError> {
        let item_url = self.item_url(target, None)?;
        let mut details = ConnectionDetails::new();
        details.insert("url".into(), SecretBytes::from(item_url.to_string()));
        Ok(details)
    }
}
