// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invite hash resolutions and the TTL'd negative invite cache.

use muster_core::{ChannelId, MembershipStatus, MusterError};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{Resolution, parse_status};

/// Remember which channel an invite hash leads to.
pub async fn upsert_mapping(
    db: &Database,
    hash: &str,
    channel: ChannelId,
    title: Option<&str>,
    now: i64,
) -> Result<(), MusterError> {
    let hash = hash.to_string();
    let title = title.map(str::to_string);
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO invite_map (hash, channel_id, title, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (hash) DO UPDATE SET
                 channel_id = excluded.channel_id,
                 title = COALESCE(excluded.title, title),
                 updated_at = excluded.updated_at",
            params![hash, channel.0, title, now],
        )?;
        Ok(())
    })
    .await
}

pub async fn mapping(db: &Database, hash: &str) -> Result<Option<Resolution>, MusterError> {
    let hash = hash.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT channel_id, title FROM invite_map WHERE hash = ?1",
            params![hash],
            |row| {
                Ok(Resolution {
                    channel_id: ChannelId(row.get(0)?),
                    title: row.get(1)?,
                })
            },
        )
        .optional()
    })
    .await
}

/// Store a negative result for an invite until `until_ts`.
///
/// Only `invalid`, `private`, and `requested` are accepted; anything else
/// is ignored.
pub async fn put_negative(
    db: &Database,
    hash: &str,
    status: MembershipStatus,
    until_ts: i64,
) -> Result<(), MusterError> {
    if !status.is_negative_invite() {
        return Ok(());
    }
    let hash = hash.to_string();
    let status = status.to_string();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO invite_negative_cache (hash, status, until_ts) VALUES (?1, ?2, ?3)
             ON CONFLICT (hash) DO UPDATE SET status = excluded.status, until_ts = excluded.until_ts",
            params![hash, status, until_ts],
        )?;
        Ok(())
    })
    .await
}

/// The unexpired negative entry for `hash`, with its expiry.
pub async fn negative(
    db: &Database,
    hash: &str,
    now: i64,
) -> Result<Option<(MembershipStatus, i64)>, MusterError> {
    let hash = hash.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT status, until_ts FROM invite_negative_cache WHERE hash = ?1 AND until_ts > ?2",
            params![hash, now],
            |row| Ok((parse_status(row.get(0)?, 0)?, row.get(1)?)),
        )
        .optional()
    })
    .await
}

/// Delete expired negative entries. Returns the number removed.
pub async fn prune_expired_negative(db: &Database, now: i64) -> Result<usize, MusterError> {
    db.call(move |conn| {
        conn.execute(
            "DELETE FROM invite_negative_cache WHERE until_ts <= ?1",
            params![now],
        )
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
    async fn mapping_keeps_known_title() {
        let (db, _dir) = setup_db().await;
        upsert_mapping(&db, "AAAABBBBCCCCDDDD", ChannelId(9), Some("News"), 1)
            .await
            .unwrap();
        upsert_mapping(&db, "AAAABBBBCCCCDDDD", ChannelId(9), None, 2)
            .await
            .unwrap();

        let m = mapping(&db, "AAAABBBBCCCCDDDD").await.unwrap().unwrap();
        assert_eq!(m.channel_id, ChannelId(9));
        assert_eq!(m.title.as_deref(), Some("News"));
        assert!(mapping(&db, "unknown").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn negative_entries_expire() {
        let (db, _dir) = setup_db().await;
        put_negative(&db, "h1", MembershipStatus::Invalid, 100).await.unwrap();

        assert_eq!(
            negative(&db, "h1", 99).await.unwrap(),
            Some((MembershipStatus::Invalid, 100))
        );
        assert_eq!(negative(&db, "h1", 100).await.unwrap(), None);

        assert_eq!(prune_expired_negative(&db, 150).await.unwrap(), 1);
        assert_eq!(prune_expired_negative(&db, 150).await.unwrap(), 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn positive_statuses_never_enter_negative_cache() {
        let (db, _dir) = setup_db().await;
        put_negative(&db, "h2", MembershipStatus::Joined, 100).await.unwrap();
        assert_eq!(negative(&db, "h2", 0).await.unwrap(), None);
        db.close().await.unwrap();
    }
}
