// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task queue operations.
//!
//! State machine: `queued -> processing -> {done | failed | queued}`. Active
//! rows (`queued`, `processing`) are unique per link via a partial index, so
//! enqueueing a link that is already pending is a silent no-op.

use muster_core::{ChannelId, MusterError, QueueState};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::{EnqueueOptions, QueueCounts, QueueItem, Rescheduled, parse_column};

/// Stored `last_error` values are cut to this many characters.
const MAX_ERROR_CHARS: usize = 500;

const ITEM_COLUMNS: &str = "id, url, state, tries, added_ts, next_try_ts, last_error, \
                            batch_id, origin, reason, channel_id";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        url: row.get(1)?,
        state: parse_column(row.get(2)?, 2)?,
        tries: row.get(3)?,
        added_at: row.get(4)?,
        next_try_at: row.get(5)?,
        last_error: row.get(6)?,
        batch_id: row.get(7)?,
        origin: row.get(8)?,
        reason: row.get(9)?,
        channel_id: row.get::<_, Option<i64>>(10)?.map(ChannelId),
    })
}

/// Insert one row per link unless the link already has an active row.
///
/// Returns the number of rows actually inserted.
pub async fn enqueue(
    db: &Database,
    links: &[String],
    opts: &EnqueueOptions,
    now: i64,
) -> Result<usize, MusterError> {
    let links = links.to_vec();
    let opts = opts.clone();
    let next_try = now + opts.delay_secs as i64;
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO task_queue
                     (url, state, tries, added_ts, next_try_ts, updated_ts, batch_id, origin, reason)
                 VALUES (?1, 'queued', 0, ?2, ?3, ?2, ?4, ?5, ?6)",
            )?;
            for link in &links {
                added += stmt.execute(params![
                    link,
                    now,
                    next_try,
                    opts.batch_id,
                    opts.origin,
                    opts.reason
                ])?;
            }
        }
        tx.commit()?;
        Ok(added)
    })
    .await
}

/// Queued rows whose next try time has passed, oldest first.
pub async fn fetch_due(db: &Database, limit: u32, now: i64) -> Result<Vec<QueueItem>, MusterError> {
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM task_queue
             WHERE state = 'queued' AND next_try_ts <= ?1
             ORDER BY added_ts ASC, id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![now, limit], row_to_item)?;
        rows.collect()
    })
    .await
}

/// Fetch one row by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<QueueItem>, MusterError> {
    db.call(move |conn| {
        conn.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM task_queue WHERE id = ?1"),
            params![id],
            row_to_item,
        )
        .optional()
    })
    .await
}

/// Claim a queued row for processing.
///
/// Returns `false` if the row exists but is no longer `queued` (another
/// driver claimed it, or it was cleared).
pub async fn mark_processing(db: &Database, id: i64, now: i64) -> Result<bool, MusterError> {
    let changed = db
        .call(move |conn| {
            conn.execute(
                "UPDATE task_queue SET state = 'processing', updated_ts = ?2
                 WHERE id = ?1 AND state = 'queued'",
                params![id, now],
            )
        })
        .await?;
    if changed == 0 {
        ensure_exists(db, id).await?;
    }
    Ok(changed == 1)
}

/// Transition an active row to terminal `done`, recording the resolved
/// channel if known.
///
/// Returns `false` if the row had already left the active states; terminal
/// rows are never touched.
pub async fn mark_done(
    db: &Database,
    id: i64,
    channel_id: Option<ChannelId>,
    reason: Option<&str>,
    now: i64,
) -> Result<bool, MusterError> {
    let reason = reason.map(str::to_string);
    let channel = channel_id.map(|c| c.0);
    let changed = db
        .call(move |conn| {
            conn.execute(
                "UPDATE task_queue SET state = 'done', updated_ts = ?2,
                     channel_id = COALESCE(?3, channel_id),
                     reason = COALESCE(?4, reason),
                     last_error = NULL
                 WHERE id = ?1 AND state IN ('queued', 'processing')",
                params![id, now, channel, reason],
            )
        })
        .await?;
    settle_changed(db, changed, id).await
}

/// Transition an active row to terminal `failed` with a diagnostic.
///
/// Returns `false` if the row had already left the active states.
pub async fn mark_failed_final(
    db: &Database,
    id: i64,
    error: &str,
    now: i64,
) -> Result<bool, MusterError> {
    let error: String = error.chars().take(MAX_ERROR_CHARS).collect();
    let changed = db
        .call(move |conn| {
            conn.execute(
                "UPDATE task_queue SET state = 'failed', updated_ts = ?2, last_error = ?3
                 WHERE id = ?1 AND state IN ('queued', 'processing')",
                params![id, now, error],
            )
        })
        .await?;
    settle_changed(db, changed, id).await
}

/// Count a retry and either requeue after `delay_secs` or fail the row.
///
/// `tries` is incremented first; once it reaches `max_retries` the row turns
/// `failed` with reason `max_retries(N)` and is never returned by
/// [`fetch_due`] again. A row that already left the active states is left
/// alone and reported as [`Rescheduled::NotActive`].
pub async fn reschedule(
    db: &Database,
    id: i64,
    delay_secs: u64,
    reason: Option<&str>,
    max_retries: u32,
    now: i64,
) -> Result<Rescheduled, MusterError> {
    let reason = reason.map(str::to_string);
    let outcome = db
        .call(move |conn| {
            let tx = conn.transaction()?;
            let row: Option<(u32, bool)> = tx
                .query_row(
                    "SELECT tries, state IN ('queued', 'processing') FROM task_queue WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((tries, active)) = row else {
                return Ok(None);
            };
            if !active {
                return Ok(Some(Rescheduled::NotActive));
            }

            let tries = tries + 1;
            let outcome = if tries >= max_retries {
                tx.execute(
                    "UPDATE task_queue SET state = 'failed', tries = ?2, updated_ts = ?3,
                         last_error = ?4, reason = COALESCE(?5, reason)
                     WHERE id = ?1",
                    params![id, tries, now, format!("max_retries({max_retries})"), reason],
                )?;
                Rescheduled::Exhausted
            } else {
                let next_try_at = now + delay_secs as i64;
                tx.execute(
                    "UPDATE task_queue SET state = 'queued', tries = ?2, updated_ts = ?3,
                         next_try_ts = ?4, reason = COALESCE(?5, reason), last_error = NULL
                     WHERE id = ?1",
                    params![id, tries, now, next_try_at, reason],
                )?;
                Rescheduled::Requeued { next_try_at }
            };
            tx.commit()?;
            Ok(Some(outcome))
        })
        .await?;
    outcome.ok_or(MusterError::QueueItemNotFound { id })
}

/// Put a claimed row back to `queued` after `delay_secs` without counting
/// a try. For work that never reached the platform.
///
/// Returns the new due time, or `None` if the row is no longer active.
pub async fn defer(
    db: &Database,
    id: i64,
    delay_secs: u64,
    reason: &str,
    now: i64,
) -> Result<Option<i64>, MusterError> {
    let reason = reason.to_string();
    let next_try_at = now + delay_secs as i64;
    let changed = db
        .call(move |conn| {
            conn.execute(
                "UPDATE task_queue SET state = 'queued', updated_ts = ?2, next_try_ts = ?3,
                     reason = ?4
                 WHERE id = ?1 AND state IN ('queued', 'processing')",
                params![id, now, next_try_at, reason],
            )
        })
        .await?;
    Ok(settle_changed(db, changed, id).await?.then_some(next_try_at))
}

/// Delete `done`/`failed` rows last touched more than `days` ago.
pub async fn purge_finished_older_than(
    db: &Database,
    days: u32,
    now: i64,
) -> Result<usize, MusterError> {
    let cutoff = now - i64::from(days) * 86_400;
    db.call(move |conn| {
        conn.execute(
            "DELETE FROM task_queue WHERE state IN ('done', 'failed') AND updated_ts < ?1",
            params![cutoff],
        )
    })
    .await
}

/// Active rows ordered by next-eligible time.
pub async fn list_active(db: &Database, limit: u32) -> Result<Vec<QueueItem>, MusterError> {
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM task_queue
             WHERE state IN ('queued', 'processing')
             ORDER BY next_try_ts ASC, id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], row_to_item)?;
        rows.collect()
    })
    .await
}

/// Row counts per state.
pub async fn counts(db: &Database) -> Result<QueueCounts, MusterError> {
    let rows: Vec<(String, u64)> = db
        .call(|conn| {
            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM task_queue GROUP BY state")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await?;

    let mut counts = QueueCounts::default();
    for (state, n) in rows {
        match state.parse::<QueueState>() {
            Ok(QueueState::Queued) => counts.queued = n,
            Ok(QueueState::Processing) => counts.processing = n,
            Ok(QueueState::Done) => counts.done = n,
            Ok(QueueState::Failed) => counts.failed = n,
            Err(_) => {}
        }
    }
    Ok(counts)
}

/// Logically clear all active rows: they become `failed` with `cleared_by_user`.
pub async fn clear_active(db: &Database, now: i64) -> Result<usize, MusterError> {
    db.call(move |conn| {
        conn.execute(
            "UPDATE task_queue SET state = 'failed', updated_ts = ?1, last_error = 'cleared_by_user'
             WHERE state IN ('queued', 'processing')",
            params![now],
        )
    })
    .await
}

/// Return rows stranded in `processing` by a previous process to `queued`.
pub async fn recover_stale_processing(db: &Database, now: i64) -> Result<usize, MusterError> {
    db.call(move |conn| {
        conn.execute(
            "UPDATE task_queue SET state = 'queued', next_try_ts = ?1, updated_ts = ?1
             WHERE state = 'processing'",
            params![now],
        )
    })
    .await
}

async fn ensure_exists(db: &Database, id: i64) -> Result<(), MusterError> {
    match get(db, id).await? {
        Some(_) => Ok(()),
        None => Err(MusterError::QueueItemNotFound { id }),
    }
}

/// `true` if the update hit the row; `false` if the row exists but was not
/// in a state the update accepts.
async fn settle_changed(db: &Database, changed: usize, id: i64) -> Result<bool, MusterError> {
    if changed == 0 {
        ensure_exists(db, id).await?;
    }
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const T0: i64 = 1_700_000_000;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn links(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_for_active_rows() {
        let (db, _dir) = setup_db().await;
        let opts = EnqueueOptions::default();

        let added = enqueue(&db, &links(&["https://t.me/a"]), &opts, T0).await.unwrap();
        assert_eq!(added, 1);
        let added = enqueue(&db, &links(&["https://t.me/a"]), &opts, T0).await.unwrap();
        assert_eq!(added, 0);

        // Still one active row after it moves to processing.
        let item = &fetch_due(&db, 10, T0).await.unwrap()[0];
        assert!(mark_processing(&db, item.id, T0).await.unwrap());
        let added = enqueue(&db, &links(&["https://t.me/a"]), &opts, T0).await.unwrap();
        assert_eq!(added, 0);

        assert_eq!(counts(&db).await.unwrap().active(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn finished_link_can_be_enqueued_again() {
        let (db, _dir) = setup_db().await;
        let opts = EnqueueOptions::default();

        enqueue(&db, &links(&["https://t.me/a"]), &opts, T0).await.unwrap();
        let id = fetch_due(&db, 1, T0).await.unwrap()[0].id;
        mark_done(&db, id, Some(ChannelId(5)), None, T0).await.unwrap();

        let added = enqueue(&db, &links(&["https://t.me/a"]), &opts, T0).await.unwrap();
        assert_eq!(added, 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn fetch_due_respects_time_and_fifo() {
        let (db, _dir) = setup_db().await;
        let now_opts = EnqueueOptions::default();
        let later_opts = EnqueueOptions {
            delay_secs: 60,
            ..EnqueueOptions::default()
        };

        enqueue(&db, &links(&["https://t.me/first"]), &now_opts, T0).await.unwrap();
        enqueue(&db, &links(&["https://t.me/delayed"]), &later_opts, T0 + 1).await.unwrap();
        enqueue(&db, &links(&["https://t.me/second"]), &now_opts, T0 + 2).await.unwrap();

        let due = fetch_due(&db, 10, T0 + 5).await.unwrap();
        let urls: Vec<_> = due.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://t.me/first", "https://t.me/second"]);

        let due = fetch_due(&db, 10, T0 + 61).await.unwrap();
        let urls: Vec<_> = due.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://t.me/first",
                "https://t.me/delayed",
                "https://t.me/second"
            ]
        );

        assert_eq!(fetch_due(&db, 1, T0 + 61).await.unwrap().len(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_records_batch_metadata() {
        let (db, _dir) = setup_db().await;
        let opts = EnqueueOptions {
            batch_id: Some("b-1".into()),
            origin: Some("chat:42".into()),
            delay_secs: 30,
            reason: Some("flood_wait".into()),
        };
        enqueue(&db, &links(&["https://t.me/+abc"]), &opts, T0).await.unwrap();

        let item = &list_active(&db, 10).await.unwrap()[0];
        assert_eq!(item.batch_id.as_deref(), Some("b-1"));
        assert_eq!(item.origin.as_deref(), Some("chat:42"));
        assert_eq!(item.reason.as_deref(), Some("flood_wait"));
        assert_eq!(item.next_try_at, T0 + 30);
        assert_eq!(item.state, QueueState::Queued);
        assert_eq!(item.tries, 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reschedule_requeues_until_cap() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, &links(&["https://t.me/a"]), &EnqueueOptions::default(), T0)
            .await
            .unwrap();
        let id = fetch_due(&db, 1, T0).await.unwrap()[0].id;

        for round in 1..3 {
            mark_processing(&db, id, T0).await.unwrap();
            let r = reschedule(&db, id, 60, Some("temp:error"), 3, T0).await.unwrap();
            assert_eq!(r, Rescheduled::Requeued { next_try_at: T0 + 60 });
            let item = get(&db, id).await.unwrap().unwrap();
            assert_eq!(item.tries, round);
            assert_eq!(item.state, QueueState::Queued);
            assert_eq!(item.reason.as_deref(), Some("temp:error"));
        }

        mark_processing(&db, id, T0).await.unwrap();
        let r = reschedule(&db, id, 60, None, 3, T0).await.unwrap();
        assert_eq!(r, Rescheduled::Exhausted);

        let item = get(&db, id).await.unwrap().unwrap();
        assert_eq!(item.state, QueueState::Failed);
        assert_eq!(item.last_error.as_deref(), Some("max_retries(3)"));
        assert!(fetch_due(&db, 10, T0 + 1_000_000).await.unwrap().is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let (db, _dir) = setup_db().await;
        assert!(matches!(
            reschedule(&db, 99, 10, None, 3, T0).await,
            Err(MusterError::QueueItemNotFound { id: 99 })
        ));
        assert!(matches!(
            mark_done(&db, 99, None, None, T0).await,
            Err(MusterError::QueueItemNotFound { id: 99 })
        ));
        assert!(matches!(
            mark_processing(&db, 99, T0).await,
            Err(MusterError::QueueItemNotFound { id: 99 })
        ));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_processing_claims_once() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, &links(&["https://t.me/a"]), &EnqueueOptions::default(), T0)
            .await
            .unwrap();
        let id = fetch_due(&db, 1, T0).await.unwrap()[0].id;
        assert!(mark_processing(&db, id, T0).await.unwrap());
        assert!(!mark_processing(&db, id, T0).await.unwrap());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_final_truncates_error() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, &links(&["https://t.me/a"]), &EnqueueOptions::default(), T0)
            .await
            .unwrap();
        let id = fetch_due(&db, 1, T0).await.unwrap()[0].id;
        mark_failed_final(&db, id, &"x".repeat(2000), T0).await.unwrap();

        let item = get(&db, id).await.unwrap().unwrap();
        assert_eq!(item.state, QueueState::Failed);
        assert_eq!(item.last_error.unwrap().len(), MAX_ERROR_CHARS);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn maintenance_sweeps() {
        let (db, _dir) = setup_db().await;
        let opts = EnqueueOptions::default();
        enqueue(&db, &links(&["https://t.me/a", "https://t.me/b", "https://t.me/c"]), &opts, T0)
            .await
            .unwrap();
        let due = fetch_due(&db, 10, T0).await.unwrap();
        mark_done(&db, due[0].id, None, None, T0).await.unwrap();
        mark_processing(&db, due[1].id, T0).await.unwrap();

        let c = counts(&db).await.unwrap();
        assert_eq!((c.queued, c.processing, c.done, c.failed), (1, 1, 1, 0));

        // A crashed run leaves `b` in processing; recovery requeues it.
        assert_eq!(recover_stale_processing(&db, T0 + 10).await.unwrap(), 1);
        assert_eq!(counts(&db).await.unwrap().queued, 2);

        // Terminal rows older than the retention window are deleted.
        assert_eq!(purge_finished_older_than(&db, 7, T0 + 86_400).await.unwrap(), 0);
        assert_eq!(purge_finished_older_than(&db, 7, T0 + 8 * 86_400).await.unwrap(), 1);

        assert_eq!(clear_active(&db, T0 + 20).await.unwrap(), 2);
        let c = counts(&db).await.unwrap();
        assert_eq!((c.active(), c.failed), (0, 2));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn defer_keeps_tries() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, &links(&["https://t.me/a"]), &EnqueueOptions::default(), 1_000)
            .await
            .unwrap();
        let item = fetch_due(&db, 10, 1_000).await.unwrap().remove(0);
        assert!(mark_processing(&db, item.id, 1_000).await.unwrap());

        let next = defer(&db, item.id, 15, "no_slot", 1_000).await.unwrap();
        assert_eq!(next, Some(1_015));
        let row = get(&db, item.id).await.unwrap().unwrap();
        assert_eq!(row.state, QueueState::Queued);
        assert_eq!(row.tries, 0);
        assert_eq!(row.reason.as_deref(), Some("no_slot"));
        assert!(fetch_due(&db, 10, 1_010).await.unwrap().is_empty());

        assert!(mark_done(&db, item.id, None, None, 1_020).await.unwrap());
        assert_eq!(defer(&db, item.id, 15, "no_slot", 1_030).await.unwrap(), None);
        assert_eq!(get(&db, item.id).await.unwrap().unwrap().state, QueueState::Done);
    }

    #[tokio::test]
    async fn terminal_rows_never_become_active_again() {
        let (db, _dir) = setup_db().await;
        enqueue(&db, &links(&["https://t.me/a", "https://t.me/b"]), &EnqueueOptions::default(), T0)
            .await
            .unwrap();
        let due = fetch_due(&db, 10, T0).await.unwrap();
        let (done, cleared) = (due[0].id, due[1].id);

        assert!(mark_done(&db, done, Some(ChannelId(3)), None, T0).await.unwrap());
        assert_eq!(
            reschedule(&db, done, 10, Some("late"), 5, T0).await.unwrap(),
            Rescheduled::NotActive
        );
        assert!(!mark_failed_final(&db, done, "late", T0).await.unwrap());
        let row = get(&db, done).await.unwrap().unwrap();
        assert_eq!(row.state, QueueState::Done);
        assert_eq!(row.tries, 0);
        assert_eq!(row.last_error, None);

        // A row cleared while in flight stays failed when its result lands.
        assert!(mark_processing(&db, cleared, T0).await.unwrap());
        assert_eq!(clear_active(&db, T0 + 1).await.unwrap(), 1);
        assert_eq!(
            reschedule(&db, cleared, 10, Some("error"), 5, T0 + 2).await.unwrap(),
            Rescheduled::NotActive
        );
        assert!(!mark_done(&db, cleared, None, Some("joined"), T0 + 2).await.unwrap());
        let row = get(&db, cleared).await.unwrap().unwrap();
        assert_eq!(row.state, QueueState::Failed);
        assert_eq!(row.last_error.as_deref(), Some("cleared_by_user"));

        // The link can be queued afresh without tripping the active index.
        let added = enqueue(&db, &links(&["https://t.me/b"]), &EnqueueOptions::default(), T0 + 3)
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(counts(&db).await.unwrap().queued, 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_active_orders_by_next_try() {
        let (db, _dir) = setup_db().await;
        let late = EnqueueOptions {
            delay_secs: 100,
            ..EnqueueOptions::default()
        };
        enqueue(&db, &links(&["https://t.me/late"]), &late, T0).await.unwrap();
        enqueue(&db, &links(&["https://t.me/soon"]), &EnqueueOptions::default(), T0)
            .await
            .unwrap();

        let items = list_active(&db, 10).await.unwrap();
        assert_eq!(items[0].url, "https://t.me/soon");
        assert_eq!(items[1].url, "https://t.me/late");
        assert_eq!(list_active(&db, 1).await.unwrap().len(), 1);
        db.close().await.unwrap();
    }
}
