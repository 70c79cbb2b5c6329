// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `muster queue` command implementations.

use chrono::{DateTime, Utc};
use muster_config::MusterConfig;
use muster_core::MusterError;
use muster_storage::{Database, QueueCounts, QueueItem, RetryPolicy, TaskQueue};
use serde::Serialize;

/// Structured counts for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub queued: u64,
    pub processing: u64,
    pub active: u64,
    pub done: u64,
    pub failed: u64,
}

impl From<QueueCounts> for StatusResponse {
    fn from(counts: QueueCounts) -> Self {
        Self {
            queued: counts.queued,
            processing: counts.processing,
            active: counts.active(),
            done: counts.done,
            failed: counts.failed,
        }
    }
}

pub fn open(db: Database, config: &MusterConfig) -> TaskQueue {
    TaskQueue::new(db, RetryPolicy::from(&config.queue))
}

pub async fn run_status(queue: &TaskQueue, json: bool, use_color: bool) -> Result<(), MusterError> {
    let status = StatusResponse::from(queue.counts().await?);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }

    println!();
    println!("  muster queue");
    println!("  {}", "-".repeat(35));
    if use_color {
        use colored::Colorize;
        println!("    Queued:     {}", status.queued.to_string().yellow());
        println!("    Processing: {}", status.processing.to_string().cyan());
        println!("    Active:     {}", status.active.to_string().bold());
        println!("    Done:       {}", status.done.to_string().green());
        println!("    Failed:     {}", status.failed.to_string().red());
    } else {
        println!("    Queued:     {}", status.queued);
        println!("    Processing: {}", status.processing);
        println!("    Active:     {}", status.active);
        println!("    Done:       {}", status.done);
        println!("    Failed:     {}", status.failed);
    }
    println!();
    Ok(())
}

pub async fn run_list(queue: &TaskQueue, limit: u32, json: bool) -> Result<(), MusterError> {
    let items = queue.list_active(limit).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
        );
        return Ok(());
    }
    if items.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for item in &items {
        println!("{}", format_item(item));
    }
    Ok(())
}

pub async fn run_purge(queue: &TaskQueue, days: u32, json: bool) -> Result<(), MusterError> {
    let purged = queue.purge_finished_older_than(days).await?;
    if json {
        println!("{}", serde_json::json!({ "purged": purged, "days": days }));
    } else {
        println!("purged {purged} finished items older than {days} days");
    }
    Ok(())
}

pub async fn run_clear(queue: &TaskQueue, json: bool) -> Result<(), MusterError> {
    let cleared = queue.clear_active().await?;
    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else {
        println!("cleared {cleared} active items");
    }
    Ok(())
}

fn format_item(item: &QueueItem) -> String {
    let due = DateTime::<Utc>::from_timestamp(item.next_try_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| item.next_try_at.to_string());
    let mut line = format!(
        "{:>6}  {:<10}  tries={:<3} due={due}  {}",
        item.id, item.state, item.tries, item.url
    );
    if let Some(reason) = &item.reason {
        line.push_str(&format!("  ({reason})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use muster_core::QueueState;

    use super::*;

    fn item() -> QueueItem {
        QueueItem {
            id: 7,
            url: "https://t.me/alpha_chan".to_string(),
            state: QueueState::Queued,
            tries: 2,
            added_at: 0,
            next_try_at: 1_700_000_000,
            last_error: None,
            batch_id: None,
            origin: None,
            reason: Some("flood_wait_30".to_string()),
            channel_id: None,
        }
    }

    #[test]
    fn item_line_shows_due_time_and_reason() {
        let line = format_item(&item());
        assert!(line.contains("2023-11-14 22:13:20"), "{line}");
        assert!(line.contains("tries=2"));
        assert!(line.ends_with("(flood_wait_30)"));
    }

    #[test]
    fn status_response_counts_active() {
        let status = StatusResponse::from(QueueCounts {
            queued: 3,
            processing: 1,
            done: 10,
            failed: 2,
        });
        assert_eq!(status.active, 4);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"active\":4"));
    }

    #[tokio::test]
    async fn clear_then_status_reports_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("cli.db").to_str().unwrap())
            .await
            .unwrap();
        let queue = open(db, &MusterConfig::default());
        queue
            .enqueue(&["https://t.me/alpha_chan".to_string()], &Default::default())
            .await
            .unwrap();

        run_clear(&queue, true).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.active(), 0);
        assert_eq!(counts.failed, 1);
    }
}
