// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-(account, channel) membership facts. Written once a real
//! classification exists; never expires.

use muster_core::{ChannelId, MembershipStatus, MusterError};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::parse_status;

/// Record the final status of `account` for `channel`.
pub async fn upsert(
    db: &Database,
    account: &str,
    channel: ChannelId,
    status: MembershipStatus,
    now: i64,
) -> Result<(), MusterError> {
    let account = account.to_string();
    let status = status.to_string();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO membership (account, channel_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account, channel_id)
             DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            params![account, channel.0, status, now],
        )?;
        Ok(())
    })
    .await
}

/// The stored status of one account for one channel.
pub async fn status(
    db: &Database,
    account: &str,
    channel: ChannelId,
) -> Result<Option<MembershipStatus>, MusterError> {
    let account = account.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT status FROM membership WHERE account = ?1 AND channel_id = ?2",
            params![account, channel.0],
            |row| parse_status(row.get(0)?, 0),
        )
        .optional()
    })
    .await
}

/// Any status recorded for `channel` that settles it for every account.
///
/// Prefers the most recent entry when several accounts have one.
pub async fn channel_final(
    db: &Database,
    channel: ChannelId,
) -> Result<Option<MembershipStatus>, MusterError> {
    let statuses: Vec<MembershipStatus> = db
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status FROM membership WHERE channel_id = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![channel.0], |row| parse_status(row.get(0)?, 0))?;
            rows.collect()
        })
        .await?;
    Ok(statuses.into_iter().find(|s| s.is_channel_final()))
}

/// Accounts that already hold any final status for `channel`.
pub async fn settled_accounts(db: &Database, channel: ChannelId) -> Result<Vec<String>, MusterError> {
    db.call(move |conn| {
        let mut stmt = conn.prepare("SELECT account FROM membership WHERE channel_id = ?1")?;
        let rows = stmt.query_map(params![channel.0], |row| row.get(0))?;
        rows.collect()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn upsert_overwrites_status() {
        let (db, _dir) = setup_db().await;
        let ch = ChannelId(100);

        upsert(&db, "alpha", ch, MembershipStatus::Requested, 1).await.unwrap();
        upsert(&db, "alpha", ch, MembershipStatus::Joined, 2).await.unwrap();

        assert_eq!(
            status(&db, "alpha", ch).await.unwrap(),
            Some(MembershipStatus::Joined)
        );
        assert_eq!(status(&db, "beta", ch).await.unwrap(), None);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn blocked_account_does_not_settle_channel() {
        let (db, _dir) = setup_db().await;
        let ch = ChannelId(7);

        upsert(&db, "alpha", ch, MembershipStatus::Blocked, 1).await.unwrap();
        assert_eq!(channel_final(&db, ch).await.unwrap(), None);
        assert_eq!(settled_accounts(&db, ch).await.unwrap(), vec!["alpha"]);

        upsert(&db, "beta", ch, MembershipStatus::Joined, 2).await.unwrap();
        assert_eq!(
            channel_final(&db, ch).await.unwrap(),
            Some(MembershipStatus::Joined)
        );
        db.close().await.unwrap();
    }
}
