use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::normalize_xml;
use crate::resource::{ForProvider, Managed, ResourceKind};

/// Definition used when a Folder does not carry its own config
pub const DEFAULT_FOLDER_CONFIG: &str =
    "<com.cloudbees.hudson.plugins.folder.Folder plugin=\"cloudbees-folder\"/>";

/// A Jenkins folder
pub type Folder = Managed<FolderParameters>;

/// Configurable fields of a Folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderParameters {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl ForProvider for FolderParameters {
    const KIND: ResourceKind = ResourceKind::Folder;

    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn configuration(&self) -> Value {
        Value::String(
            self.config
                .clone()
                .unwrap_or_else(|| DEFAULT_FOLDER_CONFIG.to_string()),
        )
    }

    /// A folder without an explicit config only has to exist; Jenkins fills in views and
    /// properties on its own.
    fn is_up_to_date(&self, observed: &Value) -> bool {
        match (&self.config, observed.as_str()) {
            (None, _) => true,
            (Some(desired), Some(current)) => normalize_xml(desired) == normalize_xml(current),
            (Some(_), None) => false,
        }
    }
}
