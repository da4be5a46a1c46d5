//! Domain model module declarations.

pub mod control;
pub mod event;
pub mod permission;
pub mod prompt;
pub mod session;
