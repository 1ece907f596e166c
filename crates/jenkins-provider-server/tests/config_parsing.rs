use std::{env, fs};

use jenkins_provider_server::config::TargetKind;
use jenkins_provider_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("jenkins-provider.toml");

    let toml_content = r#"
[controller]
workers = 8
pass_timeout_ms = 15000
poll_interval_secs = 120

[backoff]
base_ms = 500
max_ms = 60000
failure_threshold = 5

[logging]
level = "debug"

[target]
kind = "memory"
request_timeout_ms = 2000

[bootstrap]
manifest = "manifests/dev.json"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(Some(path.as_path())).expect("should parse config");
    assert_eq!(cfg.controller.workers, 8);
    assert_eq!(cfg.backoff.failure_threshold, 5);
    assert_eq!(cfg.target.kind, TargetKind::Memory);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(
        cfg.bootstrap.manifest.as_deref(),
        Some(std::path::Path::new("manifests/dev.json"))
    );
    let controller = cfg.controller_config();
    assert_eq!(controller.pass_timeout.as_millis(), 15_000);
    assert_eq!(controller.poll_interval.as_secs(), 120);
    assert_eq!(controller.backoff.base.as_millis(), 500);

    // 2) Env override should win over file
    unsafe {
        env::set_var("JENKINS_PROVIDER__CONTROLLER__WORKERS", "2");
    }
    let cfg_env = load_config(Some(path.as_path())).expect("should parse config with env overrides");
    assert_eq!(cfg_env.controller.workers, 2);
    unsafe {
        env::remove_var("JENKINS_PROVIDER__CONTROLLER__WORKERS");
    }

    // 3) Invalid config (base > max) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[backoff]
base_ms = 5000
max_ms = 1000
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(Some(invalid_path.as_path())).expect_err("expected validation error");
    assert!(err.contains("base_ms must be <="));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let cfg = load_config(Some(dir.path().join("absent.toml").as_path())).expect("defaults");
    assert_eq!(cfg.target.kind, TargetKind::Jenkins);
    assert_eq!(cfg.backoff.base_ms, 1_000);
    assert!(cfg.bootstrap.manifest.is_none());
}
