//! Adapter for Jenkins build agents (`/computer/<name>`).

use async_trait::async_trait;
use jenkins_provider_core::{
    ConnectionDetails, ExternalRef, NodeParameters, SecretBytes, normalize_labels,
};
use serde_json::{Value, json};
use url::Url;

use super::jenkins::{JenkinsClient, PostBody};
use super::{Creation, ExternalClient, Observation};
use crate::context::PassContext;
use crate::error::ExternalError;

const AGENT_TYPE: &str = "hudson.slaves.DumbSlave";

pub struct NodeClient {
    jenkins: JenkinsClient,
}

impl NodeClient {
    pub fn new(jenkins: JenkinsClient) -> Self {
        Self { jenkins }
    }

    fn node_url(&self, name: &str, suffix: &[&str]) -> Result<Url, ExternalError> {
        let mut segments = vec!["computer", name];
        segments.extend_from_slice(suffix);
        self.jenkins.url(&segments)
    }

    fn parameters(config: &Value) -> Result<NodeParameters, ExternalError> {
        serde_json::from_value(config.clone())
            .map_err(|e| ExternalError::permanent(format!("invalid node configuration: {e}")))
    }
}

/// Reduce the `api/json` view of an agent to the fields a Node spec controls
pub fn observed_node_config(name: &str, api: &Value) -> Value {
    let labels = api
        .get("assignedLabels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.get("name").and_then(Value::as_str))
                .filter(|l| *l != name)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    json!({
        "description": api.get("description").and_then(Value::as_str).unwrap_or_default(),
        "numExecutors": api.get("numExecutors").and_then(Value::as_u64).unwrap_or_default(),
        "labels": normalize_labels(&labels),
    })
}

/// Form payload `doCreateItem` expects for a permanent agent
fn create_payload(params: &NodeParameters) -> Value {
    json!({
        "name": params.name,
        "nodeDescription": params.description,
        "numExecutors": params.num_executors,
        "remoteFS": params.remote_fs,
        "labelString": params.label,
        "mode": "NORMAL",
        "type": AGENT_TYPE,
        "retentionStrategy": {"stapler-class": "hudson.slaves.RetentionStrategy$Always"},
        "nodeProperties": {"stapler-class-bag": "true"},
        "launcher": {"stapler-class": "hudson.slaves.JNLPLauncher"},
    })
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// `config.xml` for a permanent agent
pub fn render_agent_xml(params: &NodeParameters) -> String {
    format!(
        "<slave>\
<name>{name}</name>\
<description>{description}</description>\
<remoteFS>{remote_fs}</remoteFS>\
<numExecutors>{executors}</numExecutors>\
<mode>NORMAL</mode>\
<retentionStrategy class=\"hudson.slaves.RetentionStrategy$Always\"/>\
<launcher class=\"hudson.slaves.JNLPLauncher\"/>\
<label>{label}</label>\
<nodeProperties/>\
</slave>",
        name = escape_xml(&params.name),
        description = escape_xml(&params.description),
        remote_fs = escape_xml(&params.remote_fs),
        executors = params.num_executors,
        label = escape_xml(&params.label),
    )
}

#[async_trait]
impl ExternalClient for NodeClient {
    async fn observe(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
    ) -> Result<Observation, ExternalError> {
        let url = self.node_url(&target.name, &["api", "json"])?;
        match self.jenkins.get_json(ctx, url).await {
            Ok(api) => Ok(Observation::Found(observed_node_config(&target.name, &api))),
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
        let params = Self::parameters(config)?;
        let payload = serde_json::to_string(&create_payload(&params))
            .map_err(|e| ExternalError::permanent(e.to_string()))?;
        let url = self.jenkins.url(&["computer", "doCreateItem"])?;

        self.jenkins
            .post(
                ctx,
                url,
                &[],
                PostBody::Form(vec![
                    ("name".into(), target.name.clone()),
                    ("type".into(), AGENT_TYPE.into()),
                    ("json".into(), payload),
                ]),
            )
            .await?;

        let connection_details = self.connection_details(target)?;

        Ok(Creation {
            external_identity: target.name.clone(),
            connection_details,
        })
    }

    async fn update(
        &self,
        ctx: &PassContext,
        target: &ExternalRef,
        config: &Value,
    ) -> Result<(), ExternalError> {
        let params = Self::parameters(config)?;
        let url = self.node_url(&target.name, &["config.xml"])?;
        self.jenkins
            .post(ctx, url, &[], PostBody::Xml(render_agent_xml(&params)))
            .await
    }

    async fn delete(&self, ctx: &PassContext, target: &ExternalRef) -> Result<(), ExternalError> {
        let url = self.node_url(&target.name, &["doDelete"])?;
        match self.jenkins.post(ctx, url, &[], PostBody::Empty).await {
            Ok(()) | Err(ExternalError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn connection_details(&self, target: &ExternalRef) -> Result<ConnectionDetails, ExternalError> {
        let node_url = self.node_url(&target.name, &[])?;
        let mut details = ConnectionDetails::new();
        details.insert("url".into(), SecretBytes::from(node_url.to_string()));
        details.insert("name".into(), SecretBytes::from(target.name.as_str()));
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenkins_provider_core::ForProvider;

    fn params() -> NodeParameters {
        NodeParameters {
            name: "agent-1".into(),
            num_executors: 2,
            description: "a <fast> agent".into(),
            remote_fs: "/var/jenkins".into(),
            label: "linux docker".into(),
        }
    }

    #[test]
    fn test_observed_config_matches_desired() {
        let api = json!({
            "displayName": "agent-1",
            "description": "a <fast> agent",
            "numExecutors": 2,
            "assignedLabels": [{"name": "agent-1"}, {"name": "linux"}, {"name": "docker"}],
            "offline": true
        });
        let observed = observed_node_config("agent-1", &api);
        assert_eq!(observed["labels"], "docker linux");
        assert!(params().is_up_to_date(&observed));
    }

    #[test]
    fn test_render_agent_xml_escapes_text() {
        let xml = render_agent_xml(&params());
        assert!(xml.contains("<description>a &lt;fast&gt; agent</description>"));
        assert!(xml.contains("<numExecutors>2</numExecutors>"));
        assert!(xml.contains("<label>linux docker</label>"));
    }

    #[test]
    fn test_create_payload_shape() {
        let payload = create_payload(&params());
        assert_eq!(payload["type"], AGENT_TYPE);
        assert_eq!(payload["labelString"], "linux docker");
        assert_eq!(payload["remoteFS"], "/var/jenkins");
    }
}
