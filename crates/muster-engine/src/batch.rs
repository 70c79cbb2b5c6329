// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous processing of one user-submitted batch of links.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use muster_config::model::QueueConfig;
use muster_core::{MusterError, Outcome};
use muster_storage::{EnqueueOptions, TaskQueue, unix_now};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::links;
use crate::orchestrator::{Disposition, JoinOrchestrator, LinkReport};
use crate::throttle::Throttle;

/// One per-link line of a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    /// 1-based position in the submitted list.
    pub index: usize,
    pub link: String,
    pub title: Option<String>,
    pub status: String,
    pub detail: Option<String>,
    /// Account that made the last attempt.
    pub actor: Option<String>,
    /// Handed to the task queue for a later retry.
    pub queued: bool,
}

impl BatchRecord {
    fn from_report(index: usize, report: &LinkReport) -> Self {
        Self {
            index,
            link: report.url().to_string(),
            title: report.title.clone(),
            status: report.status_code().to_string(),
            detail: report.status_detail(),
            actor: report.account().map(str::to_string),
            queued: false,
        }
    }

    fn local(index: usize, link: String, status: &str, detail: Option<String>) -> Self {
        Self {
            index,
            link,
            title: None,
            status: status.to_string(),
            detail,
            actor: None,
            queued: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    /// Links submitted.
    pub total: usize,
    /// Links that produced a record.
    pub processed: usize,
    /// Rows added to the task queue.
    pub enqueued: usize,
    /// The batch handed its remainder to the queue and stopped.
    pub stopped_early: bool,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub records: Vec<BatchRecord>,
    pub summary: BatchSummary,
}

/// What the driver does with a link after the orchestrator settles it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FollowUp {
    Nothing,
    /// Queue this link and carry on with the batch.
    Requeue { delay_secs: u64, reason: String },
    /// Queue this link and the unprocessed remainder, then stop.
    Halt { delay_secs: u64, reason: String },
}

/// Drives a batch through the orchestrator in submission order.
pub struct BatchDriver {
    orchestrator: Arc<JoinOrchestrator>,
    queue: TaskQueue,
    throttle: Throttle,
    settings: QueueConfig,
}

impl BatchDriver {
    pub fn new(
        orchestrator: Arc<JoinOrchestrator>,
        queue: TaskQueue,
        throttle: Throttle,
        settings: QueueConfig,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            throttle,
            settings,
        }
    }

    /// Extract links from free text and run them as one batch.
    pub async fn run_text(&self, text: &str, origin: Option<&str>) -> Result<BatchReport, MusterError> {
        let links = links::extract_links(text);
        self.run(&links, origin).await
    }

    pub async fn run(&self, links: &[String], origin: Option<&str>) -> Result<BatchReport, MusterError> {
        self.run_with(links, origin, |_| {}).await
    }

    /// Run a batch, handing each record to `on_record` as soon as it exists.
    pub async fn run_with<F>(
        &self,
        links: &[String],
        origin: Option<&str>,
        mut on_record: F,
    ) -> Result<BatchReport, MusterError>
    where
        F: FnMut(&BatchRecord),
    {
        let batch_id = format!("batch:{}", Uuid::new_v4());
        info!(batch_id = %batch_id, links = links.len(), "batch started");

        let mut summary = BatchSummary {
            batch_id: batch_id.clone(),
            total: links.len(),
            ..BatchSummary::default()
        };
        let mut records: Vec<BatchRecord> = Vec::with_capacity(links.len());
        let mut seen: HashSet<String> = HashSet::new();

        for (i, raw) in links.iter().enumerate() {
            let index = i + 1;
            let key = canonical(raw);

            if !seen.insert(key.clone()) {
                let record = BatchRecord::local(index, key, "duplicate", None);
                on_record(&record);
                records.push(record);
                continue;
            }

            let report = match self.orchestrator.process(raw).await {
                Ok(report) => report,
                Err(err) => {
                    error!(batch_id = %batch_id, link = %key, error = %err, "link failed");
                    let record = BatchRecord::local(index, key, "error", Some(err.to_string()));
                    on_record(&record);
                    records.push(record);
                    continue;
                }
            };

            let mut record = BatchRecord::from_report(index, &report);
            let opts = |delay_secs: u64, reason: String| EnqueueOptions {
                batch_id: Some(batch_id.clone()),
                origin: origin.map(str::to_string),
                delay_secs,
                reason: Some(reason),
            };

            match self.follow_up(&report) {
                FollowUp::Nothing => {}
                FollowUp::Requeue { delay_secs, reason } => {
                    let added = self
                        .queue
                        .enqueue(&[report.url().to_string()], &opts(delay_secs, reason))
                        .await?;
                    summary.enqueued += added;
                    record.queued = true;
                }
                FollowUp::Halt { delay_secs, reason } => {
                    let mut rest = vec![report.url().to_string()];
                    for later in &links[index..] {
                        if let Some(url) = links::normalize(later)
                            && !seen.contains(&url)
                            && !rest.contains(&url)
                        {
                            rest.push(url);
                        }
                    }
                    let added = self.queue.enqueue(&rest, &opts(delay_secs, reason.clone())).await?;
                    warn!(
                        batch_id = %batch_id,
                        link = %report.url(),
                        reason = %reason,
                        enqueued = added,
                        "batch stopped, remainder queued"
                    );
                    summary.enqueued += added;
                    summary.stopped_early = true;
                    record.queued = true;
                    on_record(&record);
                    records.push(record);
                    break;
                }
            }

            on_record(&record);
            records.push(record);

            match report.kind() {
                Some(kind) if report.remote_calls > 0 => self.throttle.between_links(kind).await,
                _ => self.throttle.local_pause().await,
            }
        }

        summary.processed = records.len();
        for record in &records {
            *summary.by_status.entry(record.status.clone()).or_default() += 1;
        }
        info!(
            batch_id = %batch_id,
            processed = summary.processed,
            enqueued = summary.enqueued,
            stopped_early = summary.stopped_early,
            "batch finished"
        );

        Ok(BatchReport { records, summary })
    }

    fn follow_up(&self, report: &LinkReport) -> FollowUp {
        match &report.disposition {
            Disposition::NoSlot => FollowUp::Halt {
                delay_secs: 0,
                reason: "no_slot".to_string(),
            },
            Disposition::Attempted { outcome, .. } => match outcome {
                Outcome::FloodWait { seconds } => FollowUp::Halt {
                    delay_secs: *seconds,
                    reason: outcome.code(),
                },
                Outcome::TempRateLimit => FollowUp::Requeue {
                    delay_secs: self.settings.temp_rate_limit_backoff_secs,
                    reason: outcome.code(),
                },
                Outcome::Error { .. } => FollowUp::Requeue {
                    delay_secs: self.settings.error_backoff_secs,
                    reason: outcome.code(),
                },
                _ => FollowUp::Nothing,
            },
            Disposition::Deferred { until_ts } => FollowUp::Requeue {
                delay_secs: u64::try_from(until_ts - unix_now()).unwrap_or(0),
                reason: "channel_backoff".to_string(),
            },
            Disposition::Suppressed { retry_in } => FollowUp::Requeue {
                delay_secs: retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0),
                reason: "anti_dup".to_string(),
            },
            Disposition::Cached { .. } | Disposition::Malformed | Disposition::Exhausted => {
                FollowUp::Nothing
            }
        }
    }
}

fn canonical(raw: &str) -> String {
    links::normalize(raw).unwrap_or_else(|| raw.trim().to_string())
}
