// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted account holds (flood waits and channel quota), restored into
//! the pool at start-up.

use muster_core::MusterError;
use rusqlite::params;

use crate::database::Database;
use crate::models::AccountHold;

/// Record a hold for `account`. A later existing hold wins.
pub async fn extend(
    db: &Database,
    account: &str,
    until_ts: i64,
    reason: &str,
) -> Result<(), MusterError> {
    let account = account.to_string();
    let reason = reason.to_string();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO account_hold (account, until_ts, reason) VALUES (?1, ?2, ?3)
             ON CONFLICT (account) DO UPDATE SET
                 reason = CASE WHEN excluded.until_ts > until_ts THEN excluded.reason ELSE reason END,
                 until_ts = MAX(until_ts, excluded.until_ts)",
            params![account, until_ts, reason],
        )?;
        Ok(())
    })
    .await
}

/// Holds that have not yet expired.
pub async fn active(db: &Database, now: i64) -> Result<Vec<AccountHold>, MusterError> {
    db.call(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT account, until_ts, reason FROM account_hold WHERE until_ts > ?1 ORDER BY account",
        )?;
        let rows = stmt.query_map(params![now], |row| {
            Ok(AccountHold {
                account: row.get(0)?,
                until_ts: row.get(1)?,
                reason: row.get(2)?,
            })
        })?;
        rows.collect()
    })
    .await
}
