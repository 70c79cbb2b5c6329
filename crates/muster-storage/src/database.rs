// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;
use std::time::Duration;

use muster_config::model::StorageConfig;
use muster_core::MusterError;
use rusqlite::ErrorCode;
use tracing::{debug, info, warn};

/// Attempts made by [`Database::call`] when SQLite reports contention.
const CONTENTION_ATTEMPTS: u32 = 5;

/// First sleep between contention retries; doubles each attempt.
const CONTENTION_BASE_DELAY: Duration = Duration::from_millis(50);

/// Convert a tokio-rusqlite error into `MusterError::Storage`.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> MusterError {
    MusterError::Storage {
        source: Box::new(e),
    }
}

fn map_sql_err(e: rusqlite::Error) -> MusterError {
    MusterError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the muster SQLite database.
///
/// Cloning is cheap; every clone shares the same background writer thread.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) a database at `path` with default storage settings.
    pub async fn open(path: &str) -> Result<Self, MusterError> {
        let config = StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        };
        Self::open_with_config(&config).await
    }

    /// Open the database described by `config`, applying PRAGMAs and migrations.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self, MusterError> {
        let path = config.database_path.clone();
        if let Some(parent) = Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| MusterError::Storage {
                source: Box::new(e),
            })?;
        }

        // Schema setup runs on a short-lived blocking connection so migration
        // errors surface as MusterError before the writer thread starts.
        let wal_mode = config.wal_mode;
        let setup_path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), MusterError> {
            let mut conn = rusqlite::Connection::open(&setup_path).map_err(map_sql_err)?;
            if wal_mode {
                let mode: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                    .map_err(map_sql_err)?;
                debug!(journal_mode = %mode, "journal mode set");
            }
            crate::migrations::run_migrations(&mut conn)
        })
        .await
        .map_err(|e| MusterError::Internal(format!("database setup task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(map_sql_err)?;

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        info!(path = %path, wal = wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The underlying connection, for ad-hoc queries in tests and tools.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Run `f` on the writer thread, retrying on `SQLITE_BUSY`/`SQLITE_LOCKED`
    /// with exponential backoff. Callers never see transient contention unless
    /// it outlasts every attempt.
    pub async fn call<F, R>(&self, f: F) -> Result<R, MusterError>
    where
        F: FnMut(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |conn| retry_on_contention(conn, f))
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), MusterError> {
        self.conn
            .call(|conn| conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())))
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn retry_on_contention<R>(
    conn: &mut rusqlite::Connection,
    mut f: impl FnMut(&mut rusqlite::Connection) -> rusqlite::Result<R>,
) -> rusqlite::Result<R> {
    let mut delay = CONTENTION_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match f(conn) {
            Err(e) if is_contention(&e) && attempt < CONTENTION_ATTEMPTS => {
                warn!(attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}
