//! Scripted launcher that replays a fixed event script.
//!
//! [`ScriptedLauncher`] implements [`ProcessLauncher`] without spawning
//! anything: each launch wires in-memory pipes to a task that plays back a
//! list of [`ScriptStep`]s, records every line the runner writes, and
//! optionally answers control requests after configurable delays. Runner
//! logic cannot tell it apart from a real agent.
//!
//! ```rust,ignore
//! let launcher = ScriptedLauncher::new(vec![
//!     ScriptStep::line(json!({"type": "assistant", "content": [{"type": "text", "text": "hi"}]})),
//!     ScriptStep::line(json!({"type": "result", "result": "done"})),
//!     ScriptStep::Exit(0),
//! ]);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LaunchRequest, LaunchedProcess, ProcessLauncher, ProcessTerminator};
use crate::models::event::ExitInfo;
use crate::protocol::codec::LineCodec;
use crate::{AppError, Result};

/// Signal number reported when a scripted process is terminated.
pub const TERMINATED_SIGNAL: i32 = 15;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Input the script can wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMatch {
    /// A `control_response` answering inbound request `request_id`.
    ControlResponseFor(String),
    /// A user turn carrying the tool result for `tool_use_id`.
    ToolResultFor(String),
    /// A user turn whose text contains the given fragment.
    UserTextContaining(String),
}

impl InputMatch {
    fn matches(&self, line: &Value) -> bool {
        let kind = line.get("type").and_then(Value::as_str).unwrap_or_default();
        match self {
            Self::ControlResponseFor(id) => {
                kind == "control_response"
                    && line
                        .pointer("/response/request_id")
                        .and_then(Value::as_str)
                        == Some(id.as_str())
            }
            Self::ToolResultFor(id) => {
                kind == "user"
                    && user_blocks(line).any(|b| {
                        b.get("type").and_then(Value::as_str) == Some("tool_result")
                            && b.get("tool_use_id").and_then(Value::as_str) == Some(id.as_str())
                    })
            }
            Self::UserTextContaining(fragment) => {
                kind == "user"
                    && user_blocks(line).any(|b| {
                        b.get("text")
                            .and_then(Value::as_str)
                            .is_some_and(|t| t.contains(fragment.as_str()))
                    })
            }
        }
    }
}

fn user_blocks(line: &Value) -> impl Iterator<Item = &Value> {
    line.pointer("/message/content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// One step of a script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Write raw bytes to stdout exactly as given (no newline added).
    Raw(Vec<u8>),
    /// Pause.
    Sleep(Duration),
    /// Block until the runner writes a matching line.
    AwaitInput(InputMatch),
    /// Close stdout while the process keeps running.
    CloseStdout,
    /// Exit with the given code.
    Exit(i32),
    /// Never finish on its own; only termination ends the process.
    Hang,
}

impl ScriptStep {
    /// One JSON line.
    #[must_use]
    pub fn line(value: Value) -> Self {
        let mut bytes = value.to_string().into_bytes();
        bytes.push(b'\n');
        Self::Raw(bytes)
    }

    /// Raw text chunk.
    #[must_use]
    pub fn raw(text: &str) -> Self {
        Self::Raw(text.as_bytes().to_vec())
    }
}

/// How the scripted agent answers `control_request`s written by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlResponder {
    /// Per-request delays, cycled in request order. Empty answers at once.
    pub delays: Vec<Duration>,
    /// Leave every n-th request (1-based) unanswered.
    pub ignore_every: Option<usize>,
    /// Answer with an error instead of success.
    pub error: Option<String>,
}

/// Shared observations of one scripted launcher.
#[derive(Debug, Default)]
struct Recorder {
    requests: Mutex<Vec<LaunchRequest>>,
    received: Mutex<Vec<Value>>,
    lifecycle: Mutex<Vec<&'static str>>,
    terminations: AtomicUsize,
}

impl Recorder {
    fn push_lifecycle(&self, entry: &'static str) {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// [`ProcessLauncher`] replaying a script instead of spawning a process.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    script: Vec<ScriptStep>,
    responder: Option<ControlResponder>,
    launch_delay: Option<Duration>,
    launch_error: Option<String>,
    recorder: Arc<Recorder>,
}

impl ScriptedLauncher {
    /// Launcher replaying `script` on every launch.
    #[must_use]
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            responder: None,
            launch_delay: None,
            launch_error: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// Answer control requests as described by `responder`.
    #[must_use]
    pub fn with_control_responder(mut self, responder: ControlResponder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Delay every launch by `delay` before the process exists.
    #[must_use]
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Fail every launch with [`AppError::Launch`].
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.launch_error = Some(message.into());
        self
    }

    /// Launch requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.recorder
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every line written to the scripted agent's stdin, across launches.
    #[must_use]
    pub fn received(&self) -> Vec<Value> {
        self.recorder
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ordered lifecycle log: `launched`, `terminated`, `exited`.
    #[must_use]
    pub fn lifecycle(&self) -> Vec<&'static str> {
        self.recorder
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of termination requests observed by running processes.
    #[must_use]
    pub fn terminations(&self) -> usize {
        self.recorder.terminations.load(Ordering::SeqCst)
    }
}

impl ProcessLauncher for ScriptedLauncher {
    fn launch<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedProcess>> + Send + 'a>> {
        Box::pin(async move {
            self.recorder
                .requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            if let Some(delay) = self.launch_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.launch_error {
                return Err(AppError::Launch(message.clone()));
            }

            let (runner_stdin, agent_stdin) = tokio::io::duplex(PIPE_CAPACITY);
            let (agent_stdout, runner_stdout) = tokio::io::duplex(PIPE_CAPACITY);
            let (terminator, token) = ProcessTerminator::new();
            let (exit_tx, exit_rx) = oneshot::channel();

            self.recorder.push_lifecycle("launched");
            tokio::spawn(run_process(
                request.session_id.clone(),
                self.script.clone(),
                self.responder.clone(),
                Arc::clone(&self.recorder),
                agent_stdin,
                agent_stdout,
                token,
                exit_tx,
            ));

            Ok(LaunchedProcess {
                pid: None,
                stdin: Box::new(runner_stdin),
                stdout: Box::new(runner_stdout),
                exit: exit_rx,
                terminator,
            })
        })
    }
}

// ── Scripted process ─────────────────────────────────────────────────────────

enum PumpMsg {
    Bytes(Vec<u8>),
    Close,
}

#[allow(clippy::too_many_arguments)]
async fn run_process(
    session_id: String,
    script: Vec<ScriptStep>,
    responder: Option<ControlResponder>,
    recorder: Arc<Recorder>,
    stdin: DuplexStream,
    stdout: DuplexStream,
    terminate: CancellationToken,
    exit_tx: oneshot::Sender<ExitInfo>,
) {
    let (pump_tx, pump_rx) = mpsc::unbounded_channel();
    let pump = tokio::spawn(run_pump(stdout, pump_rx));

    let (seen_tx, seen_rx) = watch::channel(0_usize);
    let input_done = CancellationToken::new();
    let input = tokio::spawn(run_input(
        session_id.clone(),
        stdin,
        responder,
        Arc::clone(&recorder),
        pump_tx.clone(),
        seen_tx,
        input_done.clone(),
    ));

    let info = tokio::select! {
        code = run_steps(script, &recorder, &pump_tx, seen_rx) => ExitInfo::code(code),
        () = terminate.cancelled() => {
            recorder.terminations.fetch_add(1, Ordering::SeqCst);
            recorder.push_lifecycle("terminated");
            ExitInfo::signal(TERMINATED_SIGNAL)
        }
    };

    // Lines queued before the exit are still delivered; later ones are not.
    let _ = pump_tx.send(PumpMsg::Close);
    let _ = pump.await;
    input_done.cancel();
    let _ = input.await;

    recorder.push_lifecycle("exited");
    debug!(session_id, code = ?info.code, signal = ?info.signal, "scripted process exited");
    let _ = exit_tx.send(info);
}

async fn run_steps(
    script: Vec<ScriptStep>,
    recorder: &Recorder,
    pump_tx: &mpsc::UnboundedSender<PumpMsg>,
    mut seen_rx: watch::Receiver<usize>,
) -> i32 {
    for step in script {
        match step {
            ScriptStep::Raw(bytes) => {
                let _ = pump_tx.send(PumpMsg::Bytes(bytes));
            }
            ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
            ScriptStep::AwaitInput(matcher) => loop {
                let found = recorder
                    .received
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .any(|line| matcher.matches(line));
                if found {
                    break;
                }
                if seen_rx.changed().await.is_err() {
                    // Stdin closed without the awaited input.
                    std::future::pending::<()>().await;
                }
            },
            ScriptStep::CloseStdout => {
                let _ = pump_tx.send(PumpMsg::Close);
            }
            ScriptStep::Exit(code) => return code,
            ScriptStep::Hang => std::future::pending::<()>().await,
        }
    }
    0
}

async fn run_pump(mut stdout: DuplexStream, mut rx: mpsc::UnboundedReceiver<PumpMsg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            PumpMsg::Bytes(bytes) => {
                if stdout.write_all(&bytes).await.is_err() {
                    return;
                }
                let _ = stdout.flush().await;
            }
            PumpMsg::Close => break,
        }
    }
    let _ = stdout.shutdown().await;
}

async fn run_input(
    session_id: String,
    stdin: DuplexStream,
    responder: Option<ControlResponder>,
    recorder: Arc<Recorder>,
    pump_tx: mpsc::UnboundedSender<PumpMsg>,
    seen_tx: watch::Sender<usize>,
    done: CancellationToken,
) {
    let mut framed = FramedRead::new(stdin, LineCodec::new());
    let mut control_seq = 0_usize;

    loop {
        let line = tokio::select! {
            () = done.cancelled() => break,
            item = framed.next() => match item {
                Some(Ok(line)) => line,
                Some(Err(_)) | None => break,
            },
        };

        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            debug!(session_id, line, "scripted process: ignoring non-JSON input");
            continue;
        };

        if value.get("type").and_then(Value::as_str) == Some("control_request") {
            control_seq += 1;
            if let Some(responder) = &responder {
                schedule_control_reply(responder, control_seq, &value, &pump_tx);
            }
        }

        let count = {
            let mut received = recorder
                .received
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            received.push(value);
            received.len()
        };
        let _ = seen_tx.send(count);
    }
}

fn schedule_control_reply(
    responder: &ControlResponder,
    seq: usize,
    request: &Value,
    pump_tx: &mpsc::UnboundedSender<PumpMsg>,
) {
    if responder.ignore_every.is_some_and(|n| n > 0 && seq % n == 0) {
        return;
    }
    let Some(request_id) = request.get("request_id").and_then(Value::as_str) else {
        return;
    };

    let response = match &responder.error {
        None => json!({
            "type": "control_response",
            "response": { "subtype": "success", "request_id": request_id }
        }),
        Some(error) => json!({
            "type": "control_response",
            "response": { "subtype": "error", "request_id": request_id, "error": error }
        }),
    };
    let mut bytes = response.to_string().into_bytes();
    bytes.push(b'\n');

    let delay = if responder.delays.is_empty() {
        Duration::ZERO
    } else {
        responder.delays[(seq - 1) % responder.delays.len()]
    };

    let pump_tx = pump_tx.clone();
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _ = pump_tx.send(PumpMsg::Bytes(bytes));
    });
}
