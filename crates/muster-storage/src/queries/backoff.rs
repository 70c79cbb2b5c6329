// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-level flood holds shared by every account.

use muster_core::{ChannelId, MusterError};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;

/// Hold `channel` until `until_ts`. An existing later hold is kept.
pub async fn extend(db: &Database, channel: ChannelId, until_ts: i64) -> Result<(), MusterError> {
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO channel_backoff (channel_id, until_ts) VALUES (?1, ?2)
             ON CONFLICT (channel_id) DO UPDATE SET until_ts = MAX(until_ts, excluded.until_ts)",
            params![channel.0, until_ts],
        )?;
        Ok(())
    })
    .await
}

/// The hold end for `channel` if it is still in the future.
pub async fn active_until(
    db: &Database,
    channel: ChannelId,
    now: i64,
) -> Result<Option<i64>, MusterError> {
    db.call(move |conn| {
        conn.query_row(
            "SELECT until_ts FROM channel_backoff WHERE channel_id = ?1 AND until_ts > ?2",
            params![channel.0, now],
            |row| row.get(0),
        )
        .optional()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn backoff_only_extends() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let ch = ChannelId(3);

        extend(&db, ch, 500).await.unwrap();
        extend(&db, ch, 200).await.unwrap();
        assert_eq!(active_until(&db, ch, 100).await.unwrap(), Some(500));
        assert_eq!(active_until(&db, ch, 500).await.unwrap(), None);
        assert_eq!(active_until(&db, ChannelId(4), 0).await.unwrap(), None);
        db.close().await.unwrap();
    }
}
