//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every session-runner failure mode.
///
/// Only [`AppError::Launch`] and [`AppError::AlreadyRunning`] are ever
/// returned synchronously from a session start. The remaining runtime
/// failures surface as asynchronous events on the session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Agent process or sandbox failed to start.
    Launch(String),
    /// A single line from the agent could not be decoded.
    Protocol(String),
    /// A message or control request could not be delivered to the agent.
    Write(String),
    /// A control request went unanswered past its deadline.
    ControlTimeout(String),
    /// The agent process terminated without a terminal result.
    UnexpectedExit(String),
    /// A live runner already exists for the session.
    AlreadyRunning(String),
    /// The operation is not accepted in the runner's current phase.
    InvalidState(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::ControlTimeout(msg) => write!(f, "control timeout: {msg}"),
            Self::UnexpectedExit(msg) => write!(f, "unexpected exit: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
