// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for muster.

use thiserror::Error;

/// The primary error type used across muster crates.
///
/// Platform-side refusals (flood waits, expired invites, bans) are not errors
/// at this level; they arrive as [`crate::RemoteError`] and are classified
/// into an [`crate::Outcome`] by the orchestrator.
#[derive(Debug, Error)]
pub enum MusterError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote service failures that could not be mapped to an outcome.
    #[error("remote error: {message}")]
    Remote {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A queue row referenced by id does not exist.
    #[error("queue item {id} not found")]
    QueueItemNotFound { id: i64 },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
