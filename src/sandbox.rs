//! Container sandboxer.
//!
//! Turns a [`ContainerConfig`] into the ordered argument list for a rootless
//! container runtime (`podman run …`). The function is pure: it reads its
//! inputs, never mutates them, and produces the same list for the same
//! inputs so callers can assert on argument positions.
//!
//! Argument order is fixed:
//!
//! 1. `run --rm` and mode flags (`--interactive`, `--userns=keep-id`,
//!    `--workdir`)
//! 2. default mounts (workspace, then agent state), then `extra_mounts` in
//!    the order given
//! 3. environment flags, sorted by key
//! 4. the image reference
//!
//! The in-container command is appended by the caller after the image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Working directory inside the container when none is configured.
pub const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";

/// Home directory of the in-container user.
pub const CONTAINER_HOME: &str = "/home/agent";

/// Agent state directory, relative to a home directory.
pub const AGENT_STATE_DIR: &str = ".claude";

/// One bind mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    /// Host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: String,
    /// Mount options (`ro`, `z`, …), joined with commas.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Mount {
    /// Mount without options.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            options: Vec::new(),
        }
    }

    /// Builder-style option append.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// `source:target[:options]` as passed to `--volume`.
    #[must_use]
    pub fn to_volume_spec(&self) -> String {
        let base = format!("{}:{}", self.source.display(), self.target);
        if self.options.is_empty() {
            base
        } else {
            format!("{base}:{}", self.options.join(","))
        }
    }
}

/// Sandbox configuration for one launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Image reference.
    pub image: String,
    /// Runtime binary; falls back to the configured default.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Omit the standard workspace and agent-state mounts.
    #[serde(default)]
    pub skip_default_mounts: bool,
    /// Mounts appended after the defaults, never reordered.
    #[serde(default)]
    pub extra_mounts: Vec<Mount>,
    /// Extra environment for the container; wins over inherited values.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Keep stdin attached (`--interactive`).
    #[serde(default)]
    pub interactive: bool,
    /// Map the in-container user to the invoking host user.
    #[serde(default, alias = "rootless")]
    pub keep_id: bool,
    /// Working directory inside the container.
    #[serde(default)]
    pub workdir: Option<String>,
}

impl ContainerConfig {
    /// Config for `image` with every option off.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Effective in-container working directory.
    #[must_use]
    pub fn container_workdir(&self) -> &str {
        self.workdir.as_deref().unwrap_or(DEFAULT_CONTAINER_WORKDIR)
    }
}

/// Build the ordered runtime argument list ending with the image reference.
///
/// `env` is the environment handed to the container. Its `HOME` entry is
/// only used to locate the host agent-state directory; inside the container
/// `HOME` is always [`CONTAINER_HOME`] unless `config.env` overrides it.
#[must_use]
pub fn container_args(
    config: &ContainerConfig,
    working_dir: &Path,
    env: &BTreeMap<String, String>,
) -> Vec<String> {
    let workdir = config.container_workdir();
    let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

    if config.interactive {
        args.push("--interactive".into());
    }
    if config.keep_id {
        args.push("--userns=keep-id".into());
    }
    args.push("--workdir".into());
    args.push(workdir.to_owned());

    for mount in default_mounts(config, working_dir, env)
        .iter()
        .chain(config.extra_mounts.iter())
    {
        args.push("--volume".into());
        args.push(mount.to_volume_spec());
    }

    let mut merged: BTreeMap<&str, &str> = env
        .iter()
        .filter(|(key, _)| key.as_str() != "HOME")
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    merged.insert("HOME", CONTAINER_HOME);
    for (key, value) in &config.env {
        merged.insert(key, value);
    }
    for (key, value) in merged {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }

    args.push(config.image.clone());
    args
}

fn default_mounts(
    config: &ContainerConfig,
    working_dir: &Path,
    env: &BTreeMap<String, String>,
) -> Vec<Mount> {
    if config.skip_default_mounts {
        return Vec::new();
    }

    let mut mounts =
        vec![Mount::new(working_dir, config.container_workdir()).with_option("z")];

    if let Some(home) = env.get("HOME") {
        mounts.push(
            Mount::new(
                Path::new(home).join(AGENT_STATE_DIR),
                format!("{CONTAINER_HOME}/{AGENT_STATE_DIR}"),
            )
            .with_option("z"),
        );
    }

    mounts
}
