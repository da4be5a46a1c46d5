//! Persistence layer modules.
//!
//! Stores the projected session view in `SQLite` so a reconnecting client
//! can be shown the current status and any unanswered prompt.

pub mod db;
pub mod schema;
pub mod session_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
