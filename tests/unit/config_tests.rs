//! Unit tests for configuration parsing and validation.

use std::time::Duration;

use session_runner::config::{GlobalConfig, RunnerSettings, DEFAULT_ALLOWED_ENV_VARS};
use session_runner::AppError;

fn workspace() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

fn toml_with_root(root: &std::path::Path, extra: &str) -> String {
    format!(
        "agent_cli = \"claude\"\ndefault_workspace_root = '{}'\n{extra}",
        root.display()
    )
}

#[test]
fn minimal_config_fills_defaults() {
    let dir = workspace();
    let config = GlobalConfig::from_toml_str(&toml_with_root(dir.path(), "")).expect("valid");

    assert_eq!(config.agent_cli, "claude");
    assert!(config.agent_cli_args.contains(&"stream-json".to_owned()));
    assert_eq!(config.resume_flag, "--resume");
    assert_eq!(config.permission_mode_flag, "--permission-mode");
    assert_eq!(config.runner, RunnerSettings::default());
    assert_eq!(config.container.runtime, "podman");
    assert!(config.container.verify_image);
    assert_eq!(
        config.allowed_env_vars.len(),
        DEFAULT_ALLOWED_ENV_VARS.len()
    );
    assert_eq!(
        config.default_workspace_root,
        dir.path().canonicalize().unwrap(),
        "workspace root must be canonicalized"
    );
}

#[test]
fn runner_section_overrides_timeouts() {
    let dir = workspace();
    let raw = toml_with_root(
        dir.path(),
        "[runner]\ncontrol_timeout_ms = 1500\nstop_grace_ms = 250\nend_input_on_result = false\n",
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid");

    assert_eq!(config.runner.control_timeout(), Duration::from_millis(1500));
    assert_eq!(config.runner.stop_grace(), Duration::from_millis(250));
    assert_eq!(config.runner.exit_drain(), Duration::from_millis(500));
    assert!(!config.runner.end_input_on_result);
}

#[test]
fn zero_control_timeout_is_rejected() {
    let dir = workspace();
    let raw = toml_with_root(dir.path(), "[runner]\ncontrol_timeout_ms = 0\n");
    let err = GlobalConfig::from_toml_str(&raw).expect_err("must reject");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("control_timeout_ms")));
}

#[test]
fn zero_max_line_bytes_is_rejected() {
    let dir = workspace();
    let raw = toml_with_root(dir.path(), "[runner]\nmax_line_bytes = 0\n");
    assert!(matches!(
        GlobalConfig::from_toml_str(&raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn empty_agent_cli_is_rejected() {
    let err = GlobalConfig::from_toml_str("agent_cli = \"  \"\n").expect_err("must reject");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("agent_cli")));
}

#[test]
fn missing_agent_cli_is_a_config_error() {
    assert!(matches!(
        GlobalConfig::from_toml_str("[runner]\n"),
        Err(AppError::Config(_))
    ));
}

#[test]
fn missing_workspace_root_is_rejected() {
    let raw = "agent_cli = \"claude\"\ndefault_workspace_root = '/definitely/not/here/xyz'\n";
    let err = GlobalConfig::from_toml_str(raw).expect_err("must reject");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("default_workspace_root")));
}

#[test]
fn container_section_is_parsed() {
    let dir = workspace();
    let raw = toml_with_root(
        dir.path(),
        "[container]\nruntime = \"docker\"\nimage = \"agent:dev\"\nverify_image = false\n",
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("valid");
    assert_eq!(config.container.runtime, "docker");
    assert_eq!(config.container.image.as_deref(), Some("agent:dev"));
    assert!(!config.container.verify_image);
}

#[test]
fn load_from_path_reads_the_file() {
    let dir = workspace();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, toml_with_root(dir.path(), "")).unwrap();

    let config = GlobalConfig::load_from_path(&path).expect("valid");
    assert_eq!(config.agent_cli, "claude");

    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("failed to read config")));
}

#[test]
fn for_agent_uses_defaults_without_touching_the_filesystem() {
    let config = GlobalConfig::for_agent("my-agent");
    assert_eq!(config.agent_cli, "my-agent");
    assert_eq!(config.default_workspace_root, std::path::PathBuf::from("."));
    assert!(config.allowed_env_vars.iter().any(|v| v == "PATH"));
}
