#![forbid(unsafe_code)]

//! `session-runner`: runs one agent session from the terminal.
//!
//! Starts a session with the positional message, prints every tagged event
//! as a JSON line on stdout, and forwards stdin lines as follow-up user
//! messages. Lines starting with `/` are commands:
//!
//! | Command                | Effect                                      |
//! |------------------------|---------------------------------------------|
//! | `/allow <request_id>`  | allow a pending permission request          |
//! | `/deny <request_id>`   | deny a pending permission request           |
//! | `/mode <mode>`         | request a permission mode change            |
//! | `/interrupt`           | interrupt the current generation            |
//! | `/stop`                | stop the session                            |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use session_runner::config::GlobalConfig;
use session_runner::launcher::{AgentLauncher, LaunchOptions};
use session_runner::manager::RunnerManager;
use session_runner::models::event::SessionEvent;
use session_runner::models::permission::{PermissionDecision, PermissionMode};
use session_runner::models::session::Session;
use session_runner::persistence::db;
use session_runner::persistence::session_repo::SessionRepo;
use session_runner::projector::spawn_status_recorder;
use session_runner::sandbox::ContainerConfig;
use session_runner::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-runner", about = "Run an interactive agent session", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults target the `claude` CLI.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Session identifier; a random one when omitted.
    #[arg(long)]
    session_id: Option<String>,

    /// Working directory of the agent.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// External session id to resume.
    #[arg(long)]
    resume: Option<String>,

    /// Run the agent inside this container image.
    #[arg(long)]
    image: Option<String>,

    /// Run the agent inside the configured default container image.
    #[arg(long)]
    sandbox: bool,

    /// Initial permission mode (default, acceptEdits, bypassPermissions, plan).
    #[arg(long)]
    permission_mode: Option<PermissionMode>,

    /// File referenced by the initial message; repeatable.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,

    /// `SQLite` file recording the projected session status.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Initial user message.
    message: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::for_agent("claude"),
    };
    let config = Arc::new(config);
    info!(agent_cli = config.agent_cli.as_str(), "configuration loaded");

    let session_id = args
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let image = match (&args.image, args.sandbox) {
        (Some(image), _) => Some(image.clone()),
        (None, true) => Some(config.container.image.clone().ok_or_else(|| {
            AppError::Config("--sandbox requires --image or container.image".into())
        })?),
        (None, false) => None,
    };
    let container_config = image.map(ContainerConfig::new);
    let options = LaunchOptions {
        working_dir: args.workdir.clone(),
        resume_id: args.resume.clone(),
        attachments: args.attachments.clone(),
        container_config,
        permission_mode: args.permission_mode,
    };

    let repo = match &args.db {
        Some(path) => {
            let repo = SessionRepo::new(Arc::new(db::connect(path).await?));
            let reset = repo.reset_stale().await?;
            if reset > 0 {
                info!(count = reset, "reset sessions left over from a previous run");
            }
            let working_dir = options
                .working_dir
                .clone()
                .unwrap_or_else(|| config.default_workspace_root.clone());
            repo.create(&Session::new(
                session_id.clone(),
                working_dir.display().to_string(),
                args.resume.clone(),
            ))
            .await?;
            Some(repo)
        }
        None => None,
    };

    let launcher = Arc::new(AgentLauncher::new(Arc::clone(&config)));
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    let manager = RunnerManager::new(launcher, config.runner.clone(), sink_tx);

    manager
        .start_session(&session_id, args.message, options)
        .await?;

    if let (Some(repo), Some(runner)) = (repo, manager.get_runner(&session_id).await) {
        drop(spawn_status_recorder(
            repo,
            session_id.clone(),
            runner.subscribe(),
        ));
    }

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let mut shutting_down = false;
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = sink_rx.recv() => {
                let Some(event) = event else { break };
                let is_exit = event.event.is_exit();
                print_event(&mut stdout, &event).await?;
                if is_exit {
                    break;
                }
            }
            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) => handle_input(&manager, &session_id, line.trim()).await,
                Ok(None) => {
                    debug!("stdin closed");
                    input_open = false;
                }
                Err(err) => {
                    warn!(%err, "failed to read stdin");
                    input_open = false;
                }
            },
            () = &mut shutdown, if !shutting_down => {
                shutting_down = true;
                info!("shutdown signal received, stopping all runners");
                manager.stop_all().await;
            }
        }
    }

    manager.stop_all().await;
    info!("session-runner shutdown complete");
    Ok(())
}

async fn handle_input(manager: &RunnerManager, session_id: &str, line: &str) {
    if line.is_empty() {
        return;
    }
    let (command, argument) = line
        .split_once(' ')
        .map_or((line, ""), |(c, a)| (c, a.trim()));

    let accepted = match command {
        "/allow" => {
            manager
                .respond_permission(session_id, argument, PermissionDecision::allow())
                .await
        }
        "/deny" => {
            manager
                .respond_permission(session_id, argument, PermissionDecision::deny("denied by user"))
                .await
        }
        "/mode" => match argument.parse::<PermissionMode>() {
            Ok(mode) => manager
                .request_permission_mode_change(session_id, mode)
                .await
                .is_ok(),
            Err(err) => {
                warn!(%err, "unknown permission mode");
                false
            }
        },
        "/interrupt" => manager.interrupt(session_id).await,
        "/stop" => {
            manager.stop_session(session_id).await;
            true
        }
        _ => manager.send_user_message(session_id, line).await,
    };

    if !accepted {
        warn!(session_id, input = line, "input not accepted in the current session state");
    }
}

async fn print_event(stdout: &mut tokio::io::Stdout, event: &SessionEvent) -> Result<()> {
    let mut line = serde_json::to_string(event)
        .map_err(|err| AppError::Protocol(format!("failed to encode event: {err}")))?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
