//! Agent process launcher for native and sandboxed launches.
//!
//! Spawns agent processes with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a configurable allowlist so host secrets do not leak
//!   into the child's environment.
//! - stdin/stdout piped for the line protocol; stderr piped and logged at
//!   `DEBUG`.
//! - an exit monitor that owns the child, reports its exit status once, and
//!   performs graceful termination (SIGTERM, then kill after a grace period)
//!   when the [`ProcessTerminator`] fires.
//!
//! Sandboxed launches run the same agent command through the container
//! runtime with arguments from [`crate::sandbox::container_args`]. The
//! container always gets `--interactive` so the initial message reaches the
//! agent over an attached stdin.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{LaunchRequest, LaunchedProcess, ProcessLauncher, ProcessTerminator};
use crate::config::GlobalConfig;
use crate::models::event::ExitInfo;
use crate::sandbox::{container_args, ContainerConfig};
use crate::{AppError, Result};

/// Environment variable carrying the session id into the agent.
pub const SESSION_ID_ENV: &str = "SESSION_RUNNER_SESSION_ID";

/// Host variables never forwarded into a container.
const CONTAINER_EXCLUDED_ENV: &[&str] = &["PATH", "TMPDIR", "USER"];

/// Launcher backed by real processes.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    config: Arc<GlobalConfig>,
}

impl AgentLauncher {
    /// Create a launcher for `config`.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self { config }
    }

    /// Agent command line (program + arguments) for `request`.
    #[must_use]
    pub fn agent_command_line(&self, request: &LaunchRequest) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.config.agent_cli_args.len() + 5);
        argv.push(self.config.agent_cli.clone());
        argv.extend(self.config.agent_cli_args.iter().cloned());
        if let Some(mode) = request.options.permission_mode {
            argv.push(self.config.permission_mode_flag.clone());
            argv.push(mode.as_str().to_owned());
        }
        if let Some(resume_id) = &request.options.resume_id {
            argv.push(self.config.resume_flag.clone());
            argv.push(resume_id.clone());
        }
        argv
    }

    /// Resolved working directory for `request`.
    #[must_use]
    pub fn working_dir(&self, request: &LaunchRequest) -> PathBuf {
        request
            .options
            .working_dir
            .clone()
            .unwrap_or_else(|| self.config.default_workspace_root.clone())
    }

    /// Allowlisted host environment.
    fn host_env(&self) -> BTreeMap<String, String> {
        self.config
            .allowed_env_vars
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|val| (key.clone(), val)))
            .collect()
    }

    /// Build the runtime argument list for a sandboxed launch.
    #[must_use]
    pub fn sandbox_command_line(
        &self,
        request: &LaunchRequest,
        container: &ContainerConfig,
        working_dir: &Path,
    ) -> Vec<String> {
        let mut sandbox = container.clone();
        sandbox.interactive = true;

        let mut env: BTreeMap<String, String> = self
            .host_env()
            .into_iter()
            .filter(|(key, _)| !CONTAINER_EXCLUDED_ENV.contains(&key.as_str()))
            .collect();
        env.insert(SESSION_ID_ENV.to_owned(), request.session_id.clone());

        let mut args = container_args(&sandbox, working_dir, &env);
        args.extend(self.agent_command_line(request));
        args
    }

    async fn build_command(&self, request: &LaunchRequest) -> Result<Command> {
        let working_dir = self.working_dir(request);
        ensure_directory(&working_dir).await?;
        for attachment in &request.options.attachments {
            if tokio::fs::metadata(attachment).await.is_err() {
                return Err(AppError::Launch(format!(
                    "attachment not accessible: {}",
                    attachment.display()
                )));
            }
        }

        let mut cmd = if let Some(container) = &request.options.container_config {
            let runtime = container
                .runtime
                .clone()
                .unwrap_or_else(|| self.config.container.runtime.clone());
            if self.config.container.verify_image {
                verify_image(&runtime, &container.image).await?;
            }
            let mut cmd = Command::new(&runtime);
            cmd.args(self.sandbox_command_line(request, container, &working_dir));
            cmd
        } else {
            let argv = self.agent_command_line(request);
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        };

        // Strip inherited environment, then inject only the allowlist.
        cmd.env_clear();
        cmd.envs(self.host_env());
        cmd.env(SESSION_ID_ENV, &request.session_id);

        cmd.current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl ProcessLauncher for AgentLauncher {
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedProcess>> + Send + 'a>> {
        let span = info_span!(
            "launch_agent",
            session_id = request.session_id.as_str(),
            sandboxed = request.options.container_config.is_some()
        );
        Box::pin(
            async move {
                let mut cmd = self.build_command(request).await?;

                let mut child = cmd.spawn().map_err(|err| {
                    let program = if request.options.container_config.is_some() {
                        "container runtime"
                    } else {
                        "agent executable"
                    };
                    AppError::Launch(format!("failed to spawn {program}: {err}"))
                })?;

                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| AppError::Launch("failed to capture agent stdin".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| AppError::Launch("failed to capture agent stdout".into()))?;
                if let Some(stderr) = child.stderr.take() {
                    drop(log_stderr(request.session_id.clone(), stderr));
                }

                let pid = child.id();
                info!(pid, "agent process spawned");

                let (terminator, token) = ProcessTerminator::new();
                let (exit_tx, exit_rx) = oneshot::channel();
                drop(monitor_exit(
                    request.session_id.clone(),
                    child,
                    token,
                    self.config.runner.stop_grace(),
                    exit_tx,
                ));

                Ok(LaunchedProcess {
                    pid,
                    stdin: Box::new(stdin),
                    stdout: Box::new(stdout),
                    exit: exit_rx,
                    terminator,
                })
            }
            .instrument(span),
        )
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Spawn a task that owns `child`, reports its exit through `exit_tx`, and
/// terminates it gracefully once `terminate` fires.
///
/// Termination sends SIGTERM (unix) and force-kills after `grace` if the
/// process is still alive.
#[must_use]
pub fn monitor_exit(
    session_id: String,
    mut child: Child,
    terminate: CancellationToken,
    grace: Duration,
    exit_tx: oneshot::Sender<ExitInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            () = terminate.cancelled() => {
                info!(session_id, "terminating agent process");
                request_graceful_exit(&session_id, &child);
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(
                            session_id,
                            "agent process did not exit within grace period, forcing kill"
                        );
                        if let Err(err) = child.kill().await {
                            warn!(session_id, %err, "failed to force-kill agent process");
                        }
                        child.wait().await
                    }
                }
            }
        };

        let info = match status {
            Ok(status) => ExitInfo::from_status(status),
            Err(err) => {
                warn!(session_id, %err, "error waiting for agent process");
                ExitInfo::default()
            }
        };

        debug!(session_id, code = ?info.code, signal = ?info.signal, "agent process exited");
        if exit_tx.send(info).is_err() {
            debug!(session_id, "exit receiver dropped before exit was delivered");
        }
    })
}

#[cfg(unix)]
fn request_graceful_exit(session_id: &str, child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(session_id, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(_session_id: &str, _child: &Child) {}

// ── Private helpers ───────────────────────────────────────────────────────────

fn log_stderr(session_id: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(session_id, line, "agent stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(session_id, %err, "agent stderr read failed");
                    break;
                }
            }
        }
    })
}

async fn ensure_directory(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(AppError::Launch(format!(
            "working directory is not a directory: {}",
            path.display()
        ))),
        Err(err) => Err(AppError::Launch(format!(
            "working directory inaccessible: {}: {err}",
            path.display()
        ))),
    }
}

async fn verify_image(runtime: &str, image: &str) -> Result<()> {
    let status = Command::new(runtime)
        .args(["image", "inspect", image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| {
            AppError::Launch(format!("sandbox runtime unavailable: {runtime}: {err}"))
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(AppError::Launch(format!("container image not found: {image}")))
    }
}
