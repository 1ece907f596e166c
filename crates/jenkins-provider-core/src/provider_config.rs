//! ProviderConfig: a named credential set that managed resources point at.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// ProviderConfig resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: String,
    pub credentials: CredentialsSource,
}

/// Selects one key of a secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretKeySelector {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub key: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Where the credential blob of a ProviderConfig comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "PascalCase")]
pub enum CredentialsSource {
    /// A key of a stored secret
    #[serde(rename_all = "camelCase")]
    Secret { secret_ref: SecretKeySelector },
    /// An environment variable holding the blob
    Environment { env: String },
    /// A file holding the blob
    Filesystem { path: PathBuf },
}

/// Parsed credential blob: `{"url": ..., "username": ..., "token": ...}`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    #[serde(alias = "password")]
    pub token: String,
}

impl Credentials {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let creds: Credentials = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::invalid_credentials(format!("cannot parse credentials: {e}")))?;
        if creds.url.trim().is_empty() {
            return Err(CoreError::invalid_credentials("credentials url is empty"));
        }
        if creds.username.is_empty() {
            return Err(CoreError::invalid_credentials("credentials username is empty"));
        }
        Ok(creds)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_credentials() {
        let creds = Credentials::from_slice(
            br#"{"url": "https://ci.example.com", "username": "admin", "token": "abc"}"#,
        )
        .unwrap();
        assert_eq!(creds.url, "https://ci.example.com");
        assert_eq!(creds.token, "abc");
    }

    #[test]
    fn test_password_alias() {
        let creds = Credentials::from_slice(
            br#"{"url": "http://localhost:8080", "username": "admin", "password": "pw"}"#,
        )
        .unwrap();
        assert_eq!(creds.token, "pw");
    }

    #[test]
    fn test_invalid_credentials() {
        assert!(Credentials::from_slice(b"not json").is_err());
        assert!(
            Credentials::from_slice(br#"{"url": "", "username": "a", "token": "b"}"#).is_err()
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let creds = Credentials {
            url: "u".into(),
            username: "a".into(),
            token: "secret-token".into(),
        };
        assert!(!format!("{creds:?}").contains("secret-token"));
    }

    #[test]
    fn test_credentials_source_tagging() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "default",
            "credentials": {
                "source": "Secret",
                "secretRef": {"name": "jenkins-creds", "key": "credentials"}
            }
        }))
        .unwrap();
        match config.credentials {
            CredentialsSource::Secret { secret_ref } => {
                assert_eq!(secret_ref.namespace, "default");
                assert_eq!(secret_ref.key, "credentials");
            }
            other => panic!("unexpected source {other:?}"),
        }

        let env: CredentialsSource =
            serde_json::from_value(json!({"source": "Environment", "env": "JENKINS_CREDS"}))
                .unwrap();
        assert_eq!(
            env,
            CredentialsSource::Environment {
                env: "JENKINS_CREDS".into()
            }
        );
    }
}
