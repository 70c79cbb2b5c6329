// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for muster.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer model via
//! `tokio-rusqlite`. Holds the durable task queue and every durable layer
//! of the result cache: memberships, invite and link resolutions, link
//! statuses, channel flood backoffs, the negative invite cache, and
//! persisted account holds.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod task_queue;

pub use database::Database;
pub use models::*;
pub use task_queue::{RetryPolicy, TaskQueue};

/// Current wall-clock time as unix seconds, the unit of every stored timestamp.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
