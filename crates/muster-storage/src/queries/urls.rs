// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Link-keyed caches: public link -> channel resolutions, and link -> final
//! status for links whose channel could never be resolved.

use muster_core::{ChannelId, MembershipStatus, MusterError};
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{Resolution, parse_status};

pub async fn upsert_channel(
    db: &Database,
    url: &str,
    channel: ChannelId,
    title: Option<&str>,
    now: i64,
) -> Result<(), MusterError> {
    let url = url.to_string();
    let title = title.map(str::to_string);
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO url_channel_map (url, channel_id, title, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (url) DO UPDATE SET
                 channel_id = excluded.channel_id,
                 title = COALESCE(excluded.title, title),
                 updated_at = excluded.updated_at",
            params![url, channel.0, title, now],
        )?;
        Ok(())
    })
    .await
}

pub async fn channel(db: &Database, url: &str) -> Result<Option<Resolution>, MusterError> {
    let url = url.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT channel_id, title FROM url_channel_map WHERE url = ?1",
            params![url],
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

pub async fn put_status(
    db: &Database,
    url: &str,
    status: MembershipStatus,
    now: i64,
) -> Result<(), MusterError> {
    let url = url.to_string();
    let status = status.to_string();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO url_cache (url, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (url) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            params![url, status, now],
        )?;
        Ok(())
    })
    .await
}

pub async fn status(db: &Database, url: &str) -> Result<Option<MembershipStatus>, MusterError> {
    let url = url.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT status FROM url_cache WHERE url = ?1",
            params![url],
            |row| parse_status(row.get(0)?, 0),
        )
        .optional()
    })
    .await
}
