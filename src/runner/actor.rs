//! The task that owns a runner's state.
//!
//! Every mutation happens here, in response to a command, an inbound line,
//! the process exit, or a deadline. Handles talk to the actor through an
//! unbounded command channel and receive answers over one-shot replies.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use super::correlator::ControlCorrelator;
use super::state::{RunnerPhase, RunnerSnapshot};
use crate::config::RunnerSettings;
use crate::launcher::{
    LaunchOptions, LaunchRequest, LaunchedProcess, ProcessLauncher, ProcessTerminator,
};
use crate::models::control::{ControlKind, ControlOutcome, ControlRequest, ControlResponse};
use crate::models::event::{AgentEvent, ExitInfo};
use crate::models::permission::{PermissionDecision, PermissionMode};
use crate::models::prompt::{PendingPrompt, PromptKind};
use crate::protocol::codec::LineCodec;
use crate::protocol::inbound::{self, ContentBlock, InboundMessage};
use crate::protocol::outbound;
use crate::protocol::writer::{spawn_writer, WriterHandle};
use crate::{AppError, Result};

/// Requests sent from a [`Runner`](super::Runner) handle to its actor.
#[derive(Debug)]
pub(super) enum Command {
    Start {
        message: String,
        options: LaunchOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    SendUserMessage {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    RespondPermission {
        request_id: String,
        decision: PermissionDecision,
        reply: oneshot::Sender<bool>,
    },
    RespondQuestion {
        request_id: String,
        answers: HashMap<String, String>,
        reply: oneshot::Sender<bool>,
    },
    SetPermissionMode {
        mode: PermissionMode,
        reply: oneshot::Sender<Result<oneshot::Receiver<ControlOutcome>>>,
    },
    Interrupt {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

type StartRequest = (String, LaunchOptions, oneshot::Sender<Result<()>>);

pub(super) struct RunnerActor {
    session_id: String,
    launcher: Arc<dyn ProcessLauncher>,
    settings: RunnerSettings,
    events: mpsc::UnboundedSender<AgentEvent>,
    snapshot_tx: watch::Sender<RunnerSnapshot>,
    phase: RunnerPhase,
    permission_mode: Option<PermissionMode>,
    requested_mode: Option<PermissionMode>,
    prompts: Vec<PendingPrompt>,
    correlator: ControlCorrelator,
    external_session_id: Option<String>,
    writer: Option<WriterHandle>,
    /// Control lines issued before the process existed.
    queued: Vec<Value>,
    launched: bool,
    terminator: Option<ProcessTerminator>,
    stop_requested: bool,
    saw_result: bool,
    commands_open: bool,
}

impl RunnerActor {
    pub(super) fn new(
        session_id: String,
        launcher: Arc<dyn ProcessLauncher>,
        settings: RunnerSettings,
        events: mpsc::UnboundedSender<AgentEvent>,
        snapshot_tx: watch::Sender<RunnerSnapshot>,
    ) -> Self {
        let correlator = ControlCorrelator::new(settings.control_timeout());
        Self {
            session_id,
            launcher,
            settings,
            events,
            snapshot_tx,
            phase: RunnerPhase::Idle,
            permission_mode: None,
            requested_mode: None,
            prompts: Vec::new(),
            correlator,
            external_session_id: None,
            writer: None,
            queued: Vec::new(),
            launched: false,
            terminator: None,
            stop_requested: false,
            saw_result: false,
            commands_open: true,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some((message, options, reply)) = self.idle(&mut commands).await else {
            return;
        };

        self.set_phase(RunnerPhase::Starting);
        // A mode passed on the command line stays provisional until announced.
        // A change requested while idle is written later, so it wins.
        if self.requested_mode.is_none() {
            self.requested_mode = options.permission_mode;
        }
        self.publish();

        let request = LaunchRequest {
            session_id: self.session_id.clone(),
            options,
        };
        let process = match self.launch(&request, &mut commands).await {
            Ok(process) => process,
            Err(err) => {
                warn!(session_id = self.session_id, error = %err, "agent launch failed");
                for response in self.correlator.fail_all("launch failed") {
                    self.emit_control_response(response);
                }
                self.set_phase(RunnerPhase::Errored);
                self.set_phase(RunnerPhase::Exited);
                self.publish();
                let _ = reply.send(Err(err));
                return;
            }
        };

        self.publish();
        let _ = reply.send(Ok(()));
        self.stream(process, &message, &request.options.attachments, &mut commands)
            .await;
    }

    // ── Lifecycle stages ─────────────────────────────────────────────────────

    async fn idle(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Option<StartRequest> {
        while let Some(cmd) = commands.recv().await {
            match cmd {
                Command::Start {
                    message,
                    options,
                    reply,
                } => return Some((message, options, reply)),
                Command::Stop { reply } => {
                    debug!(session_id = self.session_id, "stopped before start");
                    self.stop_requested = true;
                    for response in self.correlator.fail_all("runner stopped") {
                        self.emit_control_response(response);
                    }
                    self.set_phase(RunnerPhase::Exited);
                    self.emit(AgentEvent::Exit(ExitInfo::default()));
                    self.publish();
                    let _ = reply.send(());
                    return None;
                }
                other => self.handle_command(other),
            }
        }
        debug!(session_id = self.session_id, "all runner handles dropped before start");
        for response in self.correlator.fail_all("runner dropped") {
            self.emit_control_response(response);
        }
        None
    }

    async fn launch(
        &mut self,
        request: &LaunchRequest,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<LaunchedProcess> {
        let launcher = Arc::clone(&self.launcher);
        let mut launch = launcher.launch(request);
        loop {
            tokio::select! {
                result = &mut launch => return result,
                cmd = commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.commands_closed(),
                },
            }
        }
    }

    async fn stream(
        &mut self,
        process: LaunchedProcess,
        message: &str,
        attachments: &[PathBuf],
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        let LaunchedProcess {
            pid,
            stdin,
            stdout,
            mut exit,
            terminator,
        } = process;
        info!(session_id = self.session_id, ?pid, "agent process started");

        self.launched = true;
        self.terminator = Some(terminator.clone());
        let (writer, _writer_task) = spawn_writer(self.session_id.clone(), stdin);

        if self.stop_requested {
            // Deferred stop: the process exists now, so it can be terminated.
            info!(session_id = self.session_id, "applying stop requested during launch");
            terminator.terminate();
            drop(writer);
        } else {
            self.writer = Some(writer);
            self.write(outbound::user_message(message, attachments));
            for line in std::mem::take(&mut self.queued) {
                self.write(line);
            }
        }

        let codec = LineCodec::with_max_line_bytes(self.settings.max_line_bytes);
        let mut lines = FramedRead::new(stdout, codec);
        let mut stdout_open = true;
        let mut exit_info: Option<ExitInfo> = None;
        // Bounds reading stdout once the exit is known.
        let mut drain_deadline: Option<Instant> = None;
        // Bounds waiting for the exit once stdout is gone.
        let mut exit_deadline: Option<Instant> = None;
        let mut abandoning = false;

        while stdout_open || exit_info.is_none() {
            let control_deadline = self.correlator.next_deadline();
            tokio::select! {
                frame = lines.next(), if stdout_open => match frame {
                    Some(Ok(line)) => self.handle_line(&line),
                    Some(Err(err)) => {
                        self.fail(&err.to_string());
                        stdout_open = false;
                        terminator.terminate();
                        abandoning = true;
                        exit_deadline = Some(Instant::now() + self.exit_wait());
                    }
                    None => {
                        debug!(session_id = self.session_id, "agent stdout closed");
                        stdout_open = false;
                        if exit_info.is_none() && exit_deadline.is_none() {
                            exit_deadline = Some(Instant::now() + self.settings.exit_drain());
                        }
                    }
                },
                status = &mut exit, if exit_info.is_none() => {
                    let info = status.unwrap_or_default();
                    debug!(session_id = self.session_id, code = ?info.code, signal = ?info.signal, "agent process exit observed");
                    exit_info = Some(info);
                    drain_deadline = Some(Instant::now() + self.settings.exit_drain());
                },
                cmd = commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.commands_closed(),
                },
                () = sleep_until(control_deadline.unwrap_or_else(Instant::now)), if control_deadline.is_some() => {
                    for response in self.correlator.expire(Instant::now()) {
                        self.emit_control_response(response);
                    }
                },
                () = sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if stdout_open && drain_deadline.is_some() => {
                    debug!(session_id = self.session_id, "exit drain window elapsed, abandoning agent stdout");
                    stdout_open = false;
                },
                () = sleep_until(exit_deadline.unwrap_or_else(Instant::now)), if exit_info.is_none() && exit_deadline.is_some() => {
                    if abandoning {
                        warn!(session_id = self.session_id, "agent process did not exit after termination, abandoning it");
                        exit_info = Some(ExitInfo::default());
                    } else {
                        self.output_closed(&terminator);
                        abandoning = true;
                        exit_deadline = Some(Instant::now() + self.exit_wait());
                    }
                },
            }
            self.publish();
        }

        self.finish(exit_info.unwrap_or_default());
    }

    /// Stdout reached EOF and the process is still running.
    fn output_closed(&mut self, terminator: &ProcessTerminator) {
        if self.phase != RunnerPhase::Errored && !self.saw_result && !self.stop_requested {
            self.fail("agent output closed unexpectedly");
        } else {
            debug!(session_id = self.session_id, "agent output closed, terminating the process");
        }
        terminator.terminate();
    }

    /// How long a terminated process gets to report its exit.
    fn exit_wait(&self) -> Duration {
        self.settings.stop_grace() + self.settings.exit_drain()
    }

    fn finish(&mut self, info: ExitInfo) {
        self.writer = None;
        for response in self.correlator.fail_all("process exited") {
            self.emit_control_response(response);
        }
        self.prompts.clear();

        if self.phase != RunnerPhase::Errored && !self.saw_result && !self.stop_requested {
            let err = AppError::UnexpectedExit(unexpected_exit_message(info));
            warn!(session_id = self.session_id, error = %err, "agent process exited without a result");
            self.emit(AgentEvent::Error {
                message: err.to_string(),
            });
            self.set_phase(RunnerPhase::Errored);
        }

        self.set_phase(RunnerPhase::Exited);
        self.emit(AgentEvent::Exit(info));
        self.publish();
        info!(session_id = self.session_id, "runner exited");
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply, .. } => {
                let err = AppError::InvalidState(format!(
                    "runner already started (phase: {})",
                    self.phase
                ));
                let _ = reply.send(Err(err));
            }
            Command::SendUserMessage { text, reply } => {
                let accepted = self.send_user_message(&text);
                self.publish();
                let _ = reply.send(accepted);
            }
            Command::RespondPermission {
                request_id,
                decision,
                reply,
            } => {
                let accepted = self.respond_permission(&request_id, &decision);
                self.publish();
                let _ = reply.send(accepted);
            }
            Command::RespondQuestion {
                request_id,
                answers,
                reply,
            } => {
                let accepted = self.respond_question(&request_id, &answers);
                self.publish();
                let _ = reply.send(accepted);
            }
            Command::SetPermissionMode { mode, reply } => {
                let result = self.request_mode_change(mode);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Interrupt { reply } => {
                let accepted = self.interrupt();
                self.publish();
                let _ = reply.send(accepted);
            }
            Command::Stop { reply } => {
                self.stop();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn commands_closed(&mut self) {
        debug!(session_id = self.session_id, "all runner handles dropped, stopping");
        self.commands_open = false;
        self.stop();
    }

    fn send_user_message(&mut self, text: &str) -> bool {
        if !matches!(
            self.phase,
            RunnerPhase::Streaming | RunnerPhase::WaitingQuestion
        ) {
            debug!(session_id = self.session_id, phase = %self.phase, "user message rejected");
            return false;
        }
        self.write(outbound::user_message(text, &[]))
    }

    fn respond_permission(&mut self, request_id: &str, decision: &PermissionDecision) -> bool {
        let Some(index) = self
            .prompts
            .iter()
            .position(|p| p.request_id == request_id && p.is_permission())
        else {
            debug!(session_id = self.session_id, request_id, "no such permission prompt");
            return false;
        };
        if !self.write(outbound::permission_response(request_id, decision)) {
            return false;
        }
        self.prompts.remove(index);
        self.settle_phase();
        true
    }

    fn respond_question(&mut self, request_id: &str, answers: &HashMap<String, String>) -> bool {
        let Some(index) = self
            .prompts
            .iter()
            .position(|p| p.request_id == request_id && !p.is_permission())
        else {
            debug!(session_id = self.session_id, request_id, "no such question prompt");
            return false;
        };
        if !self.prompts[index].answered_by(answers) {
            debug!(session_id = self.session_id, request_id, "question answers incomplete");
            return false;
        }
        if !self.write(outbound::question_answers(request_id, answers)) {
            return false;
        }
        self.prompts.remove(index);
        self.settle_phase();
        true
    }

    fn request_mode_change(
        &mut self,
        mode: PermissionMode,
    ) -> Result<oneshot::Receiver<ControlOutcome>> {
        if self.phase.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "cannot change permission mode while {}",
                self.phase
            )));
        }
        let (request, outcome) = self
            .correlator
            .issue(ControlKind::SetPermissionMode { mode }, Instant::now());
        self.requested_mode = Some(mode);
        self.send_control(&request);
        Ok(outcome)
    }

    fn interrupt(&mut self) -> bool {
        if self.phase != RunnerPhase::Streaming {
            debug!(session_id = self.session_id, phase = %self.phase, "interrupt rejected");
            return false;
        }
        let (request, _) = self
            .correlator
            .issue(ControlKind::Interrupt, Instant::now());
        self.send_control(&request)
    }

    fn stop(&mut self) {
        if !self.stop_requested {
            info!(session_id = self.session_id, phase = %self.phase, "stop requested");
        }
        self.stop_requested = true;
        match &self.terminator {
            Some(terminator) => terminator.terminate(),
            None => debug!(session_id = self.session_id, "process not launched yet, deferring stop"),
        }
    }

    fn send_control(&mut self, request: &ControlRequest) -> bool {
        let line = outbound::control_request(&request.id, request.kind);
        if !self.launched {
            self.queued.push(line);
            return true;
        }
        if self.write(line) {
            return true;
        }
        warn!(
            session_id = self.session_id,
            request_id = request.id.as_str(),
            "control request could not be delivered"
        );
        let failed = ControlOutcome::Failed {
            error: "agent input closed".into(),
        };
        if let Some(response) = self.correlator.resolve(&request.id, failed) {
            self.emit_control_response(response);
        }
        false
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    fn handle_line(&mut self, line: &str) {
        let message = match inbound::parse_line(&self.session_id, line) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                debug!(session_id = self.session_id, error = %err, "skipping undecodable line");
                return;
            }
        };

        match message {
            InboundMessage::System {
                subtype,
                session_id,
                permission_mode,
                raw,
            } => {
                if session_id.is_some() {
                    self.external_session_id.clone_from(&session_id);
                }
                if let Some(mode) = permission_mode {
                    self.confirm_mode(mode);
                }
                self.settle_phase();
                self.emit(AgentEvent::System {
                    subtype,
                    external_session_id: session_id,
                    permission_mode,
                    raw,
                });
            }
            InboundMessage::Assistant(blocks) | InboundMessage::User(blocks) => {
                for block in blocks {
                    if let ContentBlock::Question { id, questions } = &block {
                        self.prompts.push(PendingPrompt {
                            request_id: id.clone(),
                            kind: PromptKind::Question {
                                questions: questions.clone(),
                            },
                        });
                    }
                    self.emit(block.into_event());
                }
                self.settle_phase();
            }
            InboundMessage::PermissionRequest {
                request_id,
                tool_name,
                input,
            } => {
                self.prompts.push(PendingPrompt {
                    request_id: request_id.clone(),
                    kind: PromptKind::Permission {
                        tool_name: tool_name.clone(),
                        input: input.clone(),
                    },
                });
                self.settle_phase();
                self.emit(AgentEvent::PermissionRequest {
                    request_id,
                    tool_name,
                    input,
                });
            }
            InboundMessage::ControlResponse { request_id, error } => {
                let outcome = match error {
                    None => ControlOutcome::Success,
                    Some(error) => ControlOutcome::Failed { error },
                };
                if let Some(response) = self.correlator.resolve(&request_id, outcome) {
                    if let (ControlKind::SetPermissionMode { mode }, true) =
                        (response.kind, response.outcome.is_success())
                    {
                        self.confirm_mode(mode);
                    }
                    self.emit_control_response(response);
                }
                self.settle_phase();
            }
            InboundMessage::Result {
                subtype,
                result,
                is_error,
                raw,
            } => {
                self.saw_result = true;
                self.prompts.clear();
                self.set_phase(RunnerPhase::Result);
                self.emit(AgentEvent::Result {
                    subtype,
                    result,
                    is_error,
                    raw,
                });
                if self.settings.end_input_on_result {
                    debug!(session_id = self.session_id, "closing agent stdin after result");
                    self.writer = None;
                }
            }
        }
    }

    fn fail(&mut self, message: &str) {
        warn!(session_id = self.session_id, error = message, "agent stream failed");
        self.emit(AgentEvent::Error {
            message: message.to_owned(),
        });
        self.set_phase(RunnerPhase::Errored);
    }

    // ── State helpers ────────────────────────────────────────────────────────

    /// Recompute the phase from outstanding prompts while the agent is active.
    fn settle_phase(&mut self) {
        if !matches!(
            self.phase,
            RunnerPhase::Starting
                | RunnerPhase::Streaming
                | RunnerPhase::WaitingPermission
                | RunnerPhase::WaitingQuestion
        ) {
            return;
        }
        let next = if self.prompts.iter().any(PendingPrompt::is_permission) {
            RunnerPhase::WaitingPermission
        } else if self.prompts.is_empty() {
            RunnerPhase::Streaming
        } else {
            RunnerPhase::WaitingQuestion
        };
        self.set_phase(next);
    }

    fn set_phase(&mut self, next: RunnerPhase) {
        if self.phase != next {
            debug!(session_id = self.session_id, from = %self.phase, to = %next, "phase transition");
            self.phase = next;
        }
    }

    fn confirm_mode(&mut self, mode: PermissionMode) {
        self.permission_mode = Some(mode);
        if self.requested_mode == Some(mode) {
            self.requested_mode = None;
        }
    }

    fn write(&self, msg: Value) -> bool {
        let sent = self.writer.as_ref().is_some_and(|writer| writer.send(msg));
        if !sent {
            debug!(session_id = self.session_id, "agent input closed, message dropped");
        }
        sent
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            debug!(session_id = self.session_id, "event receiver dropped");
        }
    }

    fn emit_control_response(&self, response: ControlResponse) {
        debug!(
            session_id = self.session_id,
            request_id = response.id.as_str(),
            outcome = ?response.outcome,
            "control request resolved"
        );
        self.emit(AgentEvent::ControlResponse {
            request_id: response.id,
            request: response.kind,
            outcome: response.outcome,
        });
    }

    fn publish(&self) {
        let snapshot = RunnerSnapshot {
            phase: self.phase,
            permission_mode: self.permission_mode,
            requested_mode: self.requested_mode,
            pending_prompts: self.prompts.clone(),
            pending_controls: self.correlator.pending_count(),
            external_session_id: self.external_session_id.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn unexpected_exit_message(info: ExitInfo) -> String {
    match (info.code, info.signal) {
        (Some(code), _) => format!("agent process exited with code {code}"),
        (None, Some(signal)) => format!("agent process killed by signal {signal}"),
        (None, None) => "agent process ended".to_owned(),
    }
}
