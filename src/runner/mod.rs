//! Runner: one agent process, its line protocol, and its control requests.
//!
//! A [`Runner`] is a cheap cloneable handle to an actor task that exclusively
//! owns the process, the codec, and the [`ControlCorrelator`]. Operations are
//! sent to the actor as commands, so runner state has a single writer and
//! needs no locking. Events flow out over the channel returned by
//! [`Runner::new`], in the order the agent produced them, ending with exactly
//! one [`AgentEvent::Exit`] once started or stopped.
//!
//! Dropping every handle stops the process.

mod actor;
pub mod correlator;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::config::RunnerSettings;
use crate::launcher::{LaunchOptions, ProcessLauncher};
use crate::models::control::ControlOutcome;
use crate::models::event::AgentEvent;
use crate::models::permission::{PermissionDecision, PermissionMode};
use crate::{AppError, Result};

use actor::{Command, RunnerActor};
pub use correlator::ControlCorrelator;
pub use state::{RunnerPhase, RunnerSnapshot};

/// Handle to a runner actor.
#[derive(Debug, Clone)]
pub struct Runner {
    session_id: String,
    instance_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<RunnerSnapshot>,
}

impl Runner {
    /// Create an idle runner for `session_id` and spawn its actor.
    ///
    /// Must be called within a Tokio runtime. The returned receiver yields
    /// every event of the session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        launcher: Arc<dyn ProcessLauncher>,
        settings: RunnerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let session_id = session_id.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RunnerSnapshot::default());

        let actor = RunnerActor::new(
            session_id.clone(),
            launcher,
            settings,
            events_tx,
            snapshot_tx,
        );
        tokio::spawn(actor.run(commands_rx));

        (
            Self {
                session_id,
                instance_id: Uuid::new_v4(),
                commands: commands_tx,
                snapshot: snapshot_rx,
            },
            events_rx,
        )
    }

    /// Session this runner serves.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Identity of this runner instance, distinct across restarts of a session.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Launch the agent and deliver `message` as the first user turn.
    ///
    /// Resolves once the process exists (or failed to start).
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless the runner is idle.
    /// - [`AppError::Launch`] when the process could not be started. The
    ///   runner is then exited; its only events are the failed responses of
    ///   control requests issued before the launch, and no `exit` follows.
    pub async fn start(&self, message: impl Into<String>, options: LaunchOptions) -> Result<()> {
        let reply = self.queue_start(message.into(), options);
        start_outcome(reply).await
    }

    /// Enqueue the start command without waiting for the launch.
    ///
    /// Commands are handled in send order, so anything sent after this call
    /// observes the start.
    pub(crate) fn queue_start(
        &self,
        message: String,
        options: LaunchOptions,
    ) -> oneshot::Receiver<Result<()>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            message,
            options,
            reply,
        });
        rx
    }

    /// Send a follow-up user turn.
    ///
    /// Returns `false` unless the runner is streaming or waiting on a
    /// question, or when the agent's input is closed.
    pub async fn send_user_message(&self, text: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendUserMessage {
            text: text.into(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Answer the outstanding permission prompt `request_id`.
    pub async fn respond_permission(
        &self,
        request_id: impl Into<String>,
        decision: PermissionDecision,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RespondPermission {
            request_id: request_id.into(),
            decision,
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Answer the outstanding question prompt `request_id`.
    ///
    /// Returns `false` unless every sub-question has a non-blank answer.
    pub async fn respond_question(
        &self,
        request_id: impl Into<String>,
        answers: HashMap<String, String>,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RespondQuestion {
            request_id: request_id.into(),
            answers,
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Ask the agent to switch permission mode.
    ///
    /// The request is issued without waiting for the agent; the returned
    /// receiver yields its single outcome. The mode in [`Runner::snapshot`]
    /// changes only once the agent confirms. Requests issued before the
    /// process exists are written right after the first user message.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidState`] once the runner has exited.
    pub async fn request_permission_mode_change(
        &self,
        mode: PermissionMode,
    ) -> Result<oneshot::Receiver<ControlOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetPermissionMode { mode, reply });
        rx.await
            .unwrap_or_else(|_| Err(AppError::InvalidState("runner has exited".into())))
    }

    /// Best-effort interrupt of the current generation. Only accepted while
    /// streaming.
    pub async fn interrupt(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Interrupt { reply });
        rx.await.unwrap_or(false)
    }

    /// Stop the runner. Idempotent and accepted in every phase.
    ///
    /// During launch the termination is deferred until the process exists.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply });
        let _ = rx.await;
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> RunnerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunnerPhase {
        self.snapshot.borrow().phase
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunnerSnapshot> {
        self.snapshot.clone()
    }

    /// Resolve once the runner has exited.
    pub async fn wait_exited(&self) {
        let mut rx = self.snapshot.clone();
        let _ = rx.wait_for(|s| s.phase.is_terminal()).await;
    }

    fn send(&self, cmd: Command) {
        // A closed channel drops the reply sender; callers observe that.
        let _ = self.commands.send(cmd);
    }
}

/// Outcome of a start queued with [`Runner::queue_start`].
pub(crate) async fn start_outcome(reply: oneshot::Receiver<Result<()>>) -> Result<()> {
    reply
        .await
        .unwrap_or_else(|_| Err(AppError::InvalidState("runner has exited".into())))
}
