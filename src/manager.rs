//! Runner Manager: the registry of live runners.
//!
//! Maps session id → at most one live [`Runner`]. Every runner's events are
//! re-tagged with their session id and forwarded to one caller-supplied sink.
//! When a runner exits, its registry entry is removed before the final
//! [`AgentEvent::Exit`] reaches the sink, so a consumer reacting to the exit
//! already sees the session as gone.
//!
//! The manager is an explicit instance owned by the host; there is no global
//! registry. Tear it down with [`RunnerManager::stop_all`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::RunnerSettings;
use crate::launcher::{LaunchOptions, ProcessLauncher};
use crate::models::control::ControlOutcome;
use crate::models::event::{AgentEvent, SessionEvent};
use crate::models::permission::{PermissionDecision, PermissionMode};
use crate::runner::{start_outcome, Runner};
use crate::{AppError, Result};

/// Shared registry type alias.
type Registry = Arc<Mutex<HashMap<String, Runner>>>;

/// Registry of live runners with a single tagged event sink.
#[derive(Clone)]
pub struct RunnerManager {
    launcher: Arc<dyn ProcessLauncher>,
    settings: RunnerSettings,
    runners: Registry,
    sink: mpsc::UnboundedSender<SessionEvent>,
}

impl std::fmt::Debug for RunnerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RunnerManager {
    /// Create a manager launching through `launcher` and forwarding every
    /// event to `sink`.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        settings: RunnerSettings,
        sink: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            launcher,
            settings,
            runners: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Start a runner for `session_id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::AlreadyRunning`] when a live runner exists for
    ///   `session_id`. Nothing else happens in that case.
    /// - [`AppError::Launch`] when the agent could not be started; the
    ///   session is not registered afterwards.
    pub async fn start_session(
        &self,
        session_id: &str,
        message: impl Into<String>,
        options: LaunchOptions,
    ) -> Result<()> {
        let span = info_span!("start_session", session_id);

        async move {
            let (runner, started) = {
                let mut runners = self.runners.lock().await;
                if runners.contains_key(session_id) {
                    return Err(AppError::AlreadyRunning(session_id.to_owned()));
                }
                let (runner, events) =
                    Runner::new(session_id, Arc::clone(&self.launcher), self.settings.clone());
                runners.insert(session_id.to_owned(), runner.clone());
                tokio::spawn(forward_events(
                    session_id.to_owned(),
                    runner.instance_id(),
                    events,
                    Arc::clone(&self.runners),
                    self.sink.clone(),
                ));
                // Queued under the lock so a concurrent stop lands after it.
                let started = runner.queue_start(message.into(), options);
                (runner, started)
            };

            if let Err(err) = start_outcome(started).await {
                remove_instance(&self.runners, session_id, runner.instance_id()).await;
                return Err(err);
            }
            info!("session started");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop the runner for `session_id`. Unknown ids are a no-op.
    pub async fn stop_session(&self, session_id: &str) {
        match self.get_runner(session_id).await {
            Some(runner) => runner.stop().await,
            None => debug!(session_id, "stop for unknown session ignored"),
        }
    }

    /// Forward a user turn. `false` for unknown sessions or when the runner
    /// does not accept input right now.
    pub async fn send_user_message(&self, session_id: &str, text: impl Into<String>) -> bool {
        match self.get_runner(session_id).await {
            Some(runner) => runner.send_user_message(text).await,
            None => false,
        }
    }

    /// Answer a permission prompt.
    pub async fn respond_permission(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> bool {
        match self.get_runner(session_id).await {
            Some(runner) => runner.respond_permission(request_id, decision).await,
            None => false,
        }
    }

    /// Answer a question prompt.
    pub async fn respond_question(
        &self,
        session_id: &str,
        request_id: &str,
        answers: HashMap<String, String>,
    ) -> bool {
        match self.get_runner(session_id).await {
            Some(runner) => runner.respond_question(request_id, answers).await,
            None => false,
        }
    }

    /// Issue a permission mode change.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for unknown sessions, otherwise as
    /// [`Runner::request_permission_mode_change`].
    pub async fn request_permission_mode_change(
        &self,
        session_id: &str,
        mode: PermissionMode,
    ) -> Result<oneshot::Receiver<ControlOutcome>> {
        let runner = self
            .get_runner(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} is not running")))?;
        runner.request_permission_mode_change(mode).await
    }

    /// Interrupt the current generation of `session_id`.
    pub async fn interrupt(&self, session_id: &str) -> bool {
        match self.get_runner(session_id).await {
            Some(runner) => runner.interrupt().await,
            None => false,
        }
    }

    /// Live runner for `session_id`.
    pub async fn get_runner(&self, session_id: &str) -> Option<Runner> {
        self.runners.lock().await.get(session_id).cloned()
    }

    /// Whether a live runner exists for `session_id`.
    pub async fn has_running_session(&self, session_id: &str) -> bool {
        self.runners.lock().await.contains_key(session_id)
    }

    /// Number of live runners.
    pub async fn running_count(&self) -> usize {
        self.runners.lock().await.len()
    }

    /// Stop every live runner and wait for all of them to exit.
    pub async fn stop_all(&self) {
        let runners: Vec<Runner> = self.runners.lock().await.values().cloned().collect();
        if runners.is_empty() {
            return;
        }
        info!(count = runners.len(), "stopping all runners");
        for runner in &runners {
            runner.stop().await;
        }
        for runner in &runners {
            runner.wait_exited().await;
        }
    }
}

async fn forward_events(
    session_id: String,
    instance_id: Uuid,
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
    runners: Registry,
    sink: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let is_exit = event.is_exit();
        if is_exit {
            remove_instance(&runners, &session_id, instance_id).await;
        }
        let tagged = SessionEvent {
            session_id: session_id.clone(),
            event,
        };
        if sink.send(tagged).is_err() {
            debug!(session_id, "event sink closed, dropping event");
        }
        if is_exit {
            return;
        }
    }
    // Launch failures end the stream without an exit event.
    remove_instance(&runners, &session_id, instance_id).await;
}

/// Remove `session_id` only while it still maps to `instance_id`, so a
/// finished runner never evicts its successor.
async fn remove_instance(runners: &Registry, session_id: &str, instance_id: Uuid) {
    let mut runners = runners.lock().await;
    if runners
        .get(session_id)
        .is_some_and(|r| r.instance_id() == instance_id)
    {
        runners.remove(session_id);
        debug!(session_id, "runner removed from registry");
    }
}
