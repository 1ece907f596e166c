use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize_xml;
use crate::resource::{ForProvider, Managed, ResourceKind};

/// A Jenkins job
pub type Job = Managed<JobParameters>;

/// Configurable fields of a Job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
    /// Job name
    pub name: String,

    /// Folder path the job lives in (`team/builds`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Job definition (`config.xml`)
    pub config: String,
}

impl ForProvider for JobParameters {
    const KIND: ResourceKind = ResourceKind::Job;

    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn configuration(&self) -> Value {
        Value::String(self.config.clone())
    }

    fn is_up_to_date(&self, observed: &Value) -> bool {
        observed
            .as_str()
            .is_some_and(|current| normalize_xml(current) == normalize_xml(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ManagedResource;
    use serde_json::json;

    fn job(config: &str) -> Job {
        Job::new(
            "build-1",
            JobParameters {
                name: "build-1".into(),
                parent: Some("team".into()),
                config: config.into(),
            },
        )
    }

    #[test]
    fn test_desired_state_projection() {
        let job = job("<project/>");
        let desired = job.desired_state();
        assert_eq!(desired.name, "build-1");
        assert_eq!(desired.parent_ref.as_deref(), Some("team"));
        assert_eq!(desired.configuration, json!("<project/>"));
        assert_eq!(desired.credential_ref.name, "default");
    }

    #[test]
    fn test_up_to_date_ignores_jenkins_formatting() {
        let job = job("<project><disabled>false</disabled></project>");
        let observed = json!("<?xml version='1.1' encoding='UTF-8'?>\n<project>\n  <disabled>false</disabled>\n</project>");
        assert!(job.is_up_to_date(&observed));
        assert!(!job.is_up_to_date(&json!("<project><disabled>true</disabled></project>")));
        assert!(!job.is_up_to_date(&json!({"config": "x"})));
    }

    #[test]
    fn test_from_json_requires_names() {
        let err = Job::from_json(json!({
            "kind": "Job",
            "metadata": {"name": ""},
            "spec": {"forProvider": {"name": "x", "config": "<project/>"}}
        }));
        assert!(err.is_err());

        let job = Job::from_json(json!({
            "kind": "Job",
            "metadata": {"name": "x"},
            "spec": {
                "providerConfigRef": {"name": "jenkins-prod"},
                "forProvider": {"name": "x", "config": "<project/>"}
            }
        }))
        .unwrap();
        assert_eq!(job.spec.provider_config_ref.name, "jenkins-prod");
        assert_eq!(job.external_identity(), "");
    }
}
