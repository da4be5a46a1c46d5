#![forbid(unsafe_code)]

//! `session-runner`: lifecycle, line protocol, and control correlation for
//! interactive agent processes.
//!
//! A [`RunnerManager`](manager::RunnerManager) owns at most one
//! [`Runner`](runner::Runner) per session. Each runner launches the agent
//! through a [`ProcessLauncher`](launcher::ProcessLauncher) (natively, inside
//! a rootless container, or from a script), speaks the newline-delimited JSON
//! protocol over its stdio, and emits ordered [`AgentEvent`](models::event::AgentEvent)s.

pub mod config;
pub mod errors;
pub mod launcher;
pub mod manager;
pub mod models;
pub mod persistence;
pub mod projector;
pub mod protocol;
pub mod runner;
pub mod sandbox;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
