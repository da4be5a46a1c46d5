//! Process launcher abstraction.
//!
//! A [`ProcessLauncher`] turns a [`LaunchRequest`] into a started
//! [`LaunchedProcess`]: a writable stdin, a readable stdout, a one-shot exit
//! signal, and a [`ProcessTerminator`]. The runner is agnostic to which
//! implementation it holds:
//!
//! - [`AgentLauncher`](native::AgentLauncher) spawns the agent natively or
//!   inside a rootless container built by [`crate::sandbox`].
//! - [`ScriptedLauncher`](scripted::ScriptedLauncher) replays a fixed event
//!   script over in-memory pipes for deterministic tests.

pub mod native;
pub mod scripted;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::models::event::ExitInfo;
use crate::models::permission::PermissionMode;
use crate::sandbox::ContainerConfig;
use crate::Result;

pub use native::AgentLauncher;
pub use scripted::ScriptedLauncher;

/// Caller-facing options of a session start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Working directory; the launcher's default when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// External session id to resume.
    #[serde(default)]
    pub resume_id: Option<String>,
    /// Files referenced by the initial message.
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    /// Run inside a container when present.
    #[serde(default)]
    pub container_config: Option<ContainerConfig>,
    /// Initial permission mode passed on the command line.
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
}

/// Everything a launcher needs to start one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Session the process is launched for.
    pub session_id: String,
    /// Start options.
    pub options: LaunchOptions,
}

/// Handle used to ask a launched process to terminate.
///
/// Cloneable and idempotent. It only exists once the process does, so a
/// termination can never target a process that was not started.
#[derive(Debug, Clone, Default)]
pub struct ProcessTerminator {
    token: CancellationToken,
}

impl ProcessTerminator {
    /// New terminator plus the token the process monitor listens on.
    #[must_use]
    pub fn new() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        (
            Self {
                token: token.clone(),
            },
            token,
        )
    }

    /// Request termination. Repeated calls are no-ops.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Whether termination has been requested.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A started agent process.
pub struct LaunchedProcess {
    /// OS process id, when there is one.
    pub pid: Option<u32>,
    /// Agent stdin.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Agent stdout.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Fires once with the exit status.
    pub exit: oneshot::Receiver<ExitInfo>,
    /// Terminates the process.
    pub terminator: ProcessTerminator,
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.pid)
            .field("terminator", &self.terminator)
            .finish_non_exhaustive()
    }
}

/// Capability to start agent processes.
pub trait ProcessLauncher: Send + Sync {
    /// Start a process for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`](crate::AppError::Launch) when the
    /// executable or image is missing, the sandbox runtime is unavailable,
    /// or the working directory is inaccessible.
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedProcess>> + Send + 'a>>;
}
