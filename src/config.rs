//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variables inherited by a natively launched agent by default.
///
/// Every other variable from the host environment is stripped before the
/// child is spawned, so host secrets never reach the agent process.
pub const DEFAULT_ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    "XDG_RUNTIME_DIR",
    "ANTHROPIC_API_KEY",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "APPDATA",
    "LOCALAPPDATA",
];

fn default_agent_cli_args() -> Vec<String> {
    [
        "-p",
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
        "--verbose",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_resume_flag() -> String {
    "--resume".into()
}

fn default_permission_mode_flag() -> String {
    "--permission-mode".into()
}

fn default_allowed_env_vars() -> Vec<String> {
    DEFAULT_ALLOWED_ENV_VARS
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_control_timeout_ms() -> u64 {
    30_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_exit_drain_ms() -> u64 {
    500
}

fn default_max_line_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_container_runtime() -> String {
    "podman".into()
}

/// Per-runner tuning knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RunnerSettings {
    /// Deadline for an unanswered control request, in milliseconds.
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    /// Grace period between the polite and the forced kill on stop.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// How long to keep reading output after the process has exited.
    #[serde(default = "default_exit_drain_ms")]
    pub exit_drain_ms: u64,
    /// Longest accepted inbound line; longer lines desynchronize the stream.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Close the agent's stdin after a `result` so it exits on its own.
    #[serde(default = "default_true")]
    pub end_input_on_result: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            control_timeout_ms: default_control_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            exit_drain_ms: default_exit_drain_ms(),
            max_line_bytes: default_max_line_bytes(),
            end_input_on_result: true,
        }
    }
}

impl RunnerSettings {
    /// Control request deadline.
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    /// Stop grace period.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Post-exit output drain window.
    #[must_use]
    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.control_timeout_ms == 0 {
            return Err(AppError::Config(
                "runner.control_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "runner.max_line_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults for sandboxed launches.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContainerDefaults {
    /// Container runtime binary.
    #[serde(default = "default_container_runtime")]
    pub runtime: String,
    /// Image used when a launch does not name one.
    #[serde(default)]
    pub image: Option<String>,
    /// Check that the image exists locally before launching.
    #[serde(default = "default_true")]
    pub verify_image: bool,
}

impl Default for ContainerDefaults {
    fn default() -> Self {
        Self {
            runtime: default_container_runtime(),
            image: None,
            verify_image: true,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent executable (e.g. `claude`).
    pub agent_cli: String,
    /// Arguments always passed to the agent.
    #[serde(default = "default_agent_cli_args")]
    pub agent_cli_args: Vec<String>,
    /// Flag that introduces a resumable session id.
    #[serde(default = "default_resume_flag")]
    pub resume_flag: String,
    /// Flag that sets the initial permission mode.
    #[serde(default = "default_permission_mode_flag")]
    pub permission_mode_flag: String,
    /// Working directory used when a start request names none.
    #[serde(default = "default_workspace_root")]
    pub default_workspace_root: PathBuf,
    /// Host environment variables passed through to the agent.
    #[serde(default = "default_allowed_env_vars")]
    pub allowed_env_vars: Vec<String>,
    /// Runner tuning.
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Sandbox defaults.
    #[serde(default)]
    pub container: ContainerDefaults,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for `agent_cli` with every other field defaulted.
    ///
    /// The workspace root is left as given; it is not canonicalized.
    #[must_use]
    pub fn for_agent(agent_cli: impl Into<String>) -> Self {
        Self {
            agent_cli: agent_cli.into(),
            agent_cli_args: default_agent_cli_args(),
            resume_flag: default_resume_flag(),
            permission_mode_flag: default_permission_mode_flag(),
            default_workspace_root: default_workspace_root(),
            allowed_env_vars: default_allowed_env_vars(),
            runner: RunnerSettings::default(),
            container: ContainerDefaults::default(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent_cli.trim().is_empty() {
            return Err(AppError::Config("agent_cli must not be empty".into()));
        }

        if self.container.runtime.trim().is_empty() {
            return Err(AppError::Config(
                "container.runtime must not be empty".into(),
            ));
        }

        self.runner.validate()?;

        let canonical_root = self
            .default_workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_workspace_root invalid: {err}")))?;
        self.default_workspace_root = canonical_root;

        Ok(())
    }
}
