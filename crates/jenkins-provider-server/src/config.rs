use std::path::PathBuf;
use std::time::Duration;

use jenkins_provider_runtime::{BackoffPolicy, ControllerConfig, DEFAULT_FAILURE_THRESHOLD};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub backoff: BackoffSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Which system the adapters talk to
    #[serde(default)]
    pub target: TargetConfig,
    /// Objects loaded into the stores at startup
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Controller validations
        if self.controller.workers == 0 {
            return Err("controller.workers must be > 0".into());
        }
        if self.controller.pass_timeout_ms == 0 {
            return Err("controller.pass_timeout_ms must be > 0".into());
        }
        if self.controller.poll_interval_secs == 0 {
            return Err("controller.poll_interval_secs must be > 0".into());
        }
        // Backoff validations
        if self.backoff.base_ms == 0 || self.backoff.max_ms == 0 {
            return Err("backoff delays must be > 0".into());
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err("backoff.base_ms must be <= backoff.max_ms".into());
        }
        if self.backoff.failure_threshold == 0 {
            return Err("backoff.failure_threshold must be > 0".into());
        }
        // Target validation
        if self.target.request_timeout_ms == 0 {
            return Err("target.request_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.pass_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.controller.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.target.request_timeout_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_millis(self.backoff.max_ms),
        )
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.controller.workers,
            pass_timeout: self.pass_timeout(),
            poll_interval: self.poll_interval(),
            backoff: self.backoff_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Concurrent reconcile passes across all keys
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_pass_timeout_ms")]
    pub pass_timeout_ms: u64,
    /// Requeue interval for converged objects
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}
fn default_pass_timeout_ms() -> u64 {
    60_000
}
fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            pass_timeout_ms: default_pass_timeout_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    /// Consecutive transient failures before an object is reported unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    300_000
}
fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Jenkins remote API over HTTP
    #[default]
    Jenkins,
    /// In-process fake, for local runs without a Jenkins instance
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub kind: TargetKind,
    /// HTTP request timeout for Jenkins calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: TargetKind::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    /// JSON manifest with providerConfigs, secrets and resources
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_PATH: &str = "jenkins-provider.toml";

    pub fn load_config(path: Option<&Path>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., JENKINS_PROVIDER__CONTROLLER__WORKERS=8
        builder = builder.add_source(
            Environment::with_prefix("JENKINS_PROVIDER")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.target.kind, TargetKind::Jenkins);
        assert_eq!(cfg.backoff.failure_threshold, DEFAULT_FAILURE_THRESHOLD);

        let controller = cfg.controller_config();
        assert_eq!(controller.workers, 4);
        assert_eq!(controller.pass_timeout, Duration::from_secs(60));
        assert_eq!(controller.backoff.base, Duration::from_secs(1));
        assert_eq!(controller.backoff.max, Duration::from_secs(300));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.controller.workers = 0;
        assert!(cfg.validate().unwrap_err().contains("workers"));

        let mut cfg = AppConfig::default();
        cfg.backoff.base_ms = 10_000;
        cfg.backoff.max_ms = 1_000;
        assert!(cfg.validate().unwrap_err().contains("base_ms must be <="));

        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));

        let mut cfg = AppConfig::default();
        cfg.target.request_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_target_kind_parses_lowercase() {
        let target: TargetConfig = serde_json::from_str(r#"{"kind": "memory"}"#).unwrap();
        assert_eq!(target.kind, TargetKind::Memory);
        assert_eq!(target.request_timeout_ms, 30_000);
    }
}
