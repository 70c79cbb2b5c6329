// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background worker that drains the durable task queue.
//!
//! Each pass fetches due items and runs them through the same pipeline as a
//! live batch. Items that cannot run yet are pushed back with their own
//! backoff; nothing in one item's backoff holds up the rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use muster_config::MusterConfig;
use muster_config::model::{DispatchMode, HeadOfLinePolicy, QueueConfig, WorkerConfig};
use muster_core::{ActionKind, LinkKind, MusterError, Outcome};
use muster_scheduling::PriorityScheduler;
use muster_storage::{QueueItem, Rescheduled, TaskQueue, unix_now};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::orchestrator::{Disposition, JoinOrchestrator, LinkReport};
use crate::throttle::Throttle;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Tally of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub fetched: usize,
    pub done: usize,
    pub failed: usize,
    pub requeued: usize,
    /// Rows another driver claimed first, or that were cleared mid-flight.
    pub skipped: usize,
    /// The pass stopped because no slot was free.
    pub no_slot: bool,
    /// The pass stopped because the dispatch bucket was empty.
    pub rate_limited: bool,
}

/// How an item leaves `processing`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Done { reason: String },
    Failed { error: String },
    Retry { backoff_secs: u64, reason: String, max_retries: u32 },
    Defer { delay_secs: u64, reason: &'static str },
}

pub struct QueueWorker {
    orchestrator: Arc<JoinOrchestrator>,
    queue: TaskQueue,
    throttle: Throttle,
    worker: WorkerConfig,
    retries: QueueConfig,
    head_of_line: HeadOfLinePolicy,
}

impl QueueWorker {
    pub fn new(
        orchestrator: Arc<JoinOrchestrator>,
        queue: TaskQueue,
        throttle: Throttle,
        config: &MusterConfig,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            throttle,
            worker: config.worker.clone(),
            retries: config.queue.clone(),
            head_of_line: config.scheduler.head_of_line,
        }
    }

    /// Loop until `cancel` fires.
    ///
    /// Rows stranded in `processing` by an earlier crash are requeued first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), MusterError> {
        let recovered = self.queue.recover_stale_processing().await?;
        if recovered > 0 {
            warn!(recovered, "requeued items left in processing");
        }
        self.maintain().await;
        let mut last_maintenance = Instant::now();
        info!(dispatch = ?self.worker.dispatch, "queue worker started");

        while !cancel.is_cancelled() {
            let pause = match self.run_pass(&cancel).await {
                Ok(stats) if stats.no_slot => Duration::from_secs(self.worker.no_slot_poll_secs),
                Ok(stats) if stats.fetched == 0 || stats.rate_limited => {
                    Duration::from_secs(self.worker.idle_poll_secs)
                }
                Ok(_) => Duration::ZERO,
                Err(err) => {
                    error!(error = %err, "queue pass failed");
                    Duration::from_secs(self.worker.idle_poll_secs)
                }
            };

            if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
                self.maintain().await;
                last_maintenance = Instant::now();
            }

            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("queue worker stopped");
        Ok(())
    }

    /// Purge old terminal rows, expired negative cache rows and stale
    /// anti-duplicate claims. Failures are logged, not returned.
    pub async fn maintain(&self) {
        match self
            .queue
            .purge_finished_older_than(self.retries.retention_days)
            .await
        {
            Ok(purged) if purged > 0 => info!(purged, "purged finished queue items"),
            Ok(_) => {}
            Err(err) => error!(error = %err, "queue purge failed"),
        }
        match self.orchestrator.cache().prune_expired().await {
            Ok(pruned) if pruned > 0 => debug!(pruned, "pruned negative invite cache"),
            Ok(_) => {}
            Err(err) => error!(error = %err, "negative cache prune failed"),
        }
        self.orchestrator.anti_dup().sweep();
    }

    /// Fetch due items once and dispatch them.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassStats, MusterError> {
        let items = self.queue.fetch_due(self.worker.fetch_limit).await?;
        let mut stats = PassStats {
            fetched: items.len(),
            ..PassStats::default()
        };
        if items.is_empty() {
            return Ok(stats);
        }
        debug!(due = items.len(), "queue pass");

        match self.worker.dispatch {
            DispatchMode::Direct => {
                for item in items {
                    if cancel.is_cancelled() || stats.no_slot {
                        break;
                    }
                    self.handle(item, &mut stats).await?;
                }
            }
            DispatchMode::Scheduled => {
                let mut scheduler = PriorityScheduler::new(
                    Arc::clone(self.orchestrator.limiter()),
                    self.head_of_line,
                );
                let now = Instant::now();
                for item in items {
                    let priority = i32::try_from(item.tries).unwrap_or(i32::MAX);
                    scheduler.push(ActionKind::Dispatch, None, priority, now, item);
                }
                while !scheduler.is_empty() && !cancel.is_cancelled() && !stats.no_slot {
                    match scheduler.pop_ready() {
                        Some(task) => self.handle(task.payload, &mut stats).await?,
                        None => match scheduler.peek_delay() {
                            Some(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                            _ => {
                                debug!(left = scheduler.len(), "dispatch rate limited");
                                stats.rate_limited = true;
                                break;
                            }
                        },
                    }
                }
            }
        }

        info!(
            fetched = stats.fetched,
            done = stats.done,
            failed = stats.failed,
            requeued = stats.requeued,
            "queue pass finished"
        );
        Ok(stats)
    }

    async fn handle(&self, item: QueueItem, stats: &mut PassStats) -> Result<(), MusterError> {
        if !self.queue.mark_processing(item.id).await? {
            stats.skipped += 1;
            return Ok(());
        }

        let id = item.id;
        let result = self.settle(item, stats).await;
        if result.is_err() {
            // Hand the row back so it is not stranded in processing.
            match self
                .queue
                .defer(id, self.retries.error_backoff_secs, "error")
                .await
            {
                Ok(Some(_)) => stats.requeued += 1,
                Ok(None) => {}
                Err(err) => error!(item_id = id, error = %err, "could not release item"),
            }
        }
        result
    }

    async fn settle(&self, item: QueueItem, stats: &mut PassStats) -> Result<(), MusterError> {
        let (resolution, report) = match self.orchestrator.process(&item.url).await {
            Ok(report) => (self.resolve(&report), Some(report)),
            Err(err) => {
                error!(item_id = item.id, link = %item.url, error = %err, "item failed");
                let resolution = Resolution::Retry {
                    backoff_secs: self.retries.error_backoff_secs,
                    reason: format!("error: {err}"),
                    max_retries: self.retries.error_max_retries,
                };
                (resolution, None)
            }
        };
        let channel = report.as_ref().and_then(|r| r.channel_id);

        let settled = match resolution {
            Resolution::Done { reason } => {
                let changed = self.queue.mark_done(item.id, channel, Some(&reason)).await?;
                stats.done += usize::from(changed);
                changed
            }
            Resolution::Failed { error } => {
                let changed = self.queue.mark_failed_final(item.id, &error).await?;
                stats.failed += usize::from(changed);
                changed
            }
            Resolution::Retry {
                backoff_secs,
                reason,
                max_retries,
            } => match self
                .queue
                .reschedule(item.id, backoff_secs, Some(&reason), max_retries)
                .await?
            {
                Rescheduled::Requeued { .. } => {
                    stats.requeued += 1;
                    true
                }
                Rescheduled::Exhausted => {
                    stats.failed += 1;
                    true
                }
                Rescheduled::NotActive => false,
            },
            Resolution::Defer { delay_secs, reason } => {
                let deferred = self.queue.defer(item.id, delay_secs, reason).await?.is_some();
                if deferred {
                    stats.requeued += 1;
                }
                if reason == "no_slot" {
                    stats.no_slot = true;
                }
                deferred
            }
        };
        if !settled {
            debug!(item_id = item.id, link = %item.url, "item left the queue while in flight");
            stats.skipped += 1;
        }

        match report {
            Some(report) if report.remote_calls > 0 => {
                self.throttle
                    .between_links(report.kind().unwrap_or(LinkKind::Public))
                    .await;
            }
            _ => self.throttle.local_pause().await,
        }
        Ok(())
    }

    fn resolve(&self, report: &LinkReport) -> Resolution {
        let q = &self.retries;
        match &report.disposition {
            Disposition::Cached { status } => Resolution::Done {
                reason: format!("cached_{status}"),
            },
            Disposition::Malformed => Resolution::Failed {
                error: "invalid_link".to_string(),
            },
            Disposition::Exhausted => Resolution::Failed {
                error: "all_accounts_settled".to_string(),
            },
            Disposition::NoSlot => Resolution::Defer {
                delay_secs: q.no_slot_backoff_secs,
                reason: "no_slot",
            },
            Disposition::Suppressed { retry_in } => Resolution::Defer {
                delay_secs: retry_in.as_secs().max(1),
                reason: "anti_dup",
            },
            Disposition::Deferred { until_ts } => Resolution::Retry {
                backoff_secs: u64::try_from(until_ts - unix_now()).unwrap_or(0),
                reason: "channel_backoff".to_string(),
                max_retries: q.flood_max_retries,
            },
            Disposition::Attempted { outcome, .. } => match outcome {
                Outcome::Joined | Outcome::Already | Outcome::Requested => Resolution::Done {
                    reason: outcome.code(),
                },
                Outcome::Invalid | Outcome::Private | Outcome::Blocked | Outcome::TooMany => {
                    Resolution::Failed {
                        error: outcome.code(),
                    }
                }
                Outcome::FloodWait { seconds } => Resolution::Retry {
                    backoff_secs: *seconds,
                    reason: outcome.code(),
                    max_retries: q.flood_max_retries,
                },
                Outcome::TempRateLimit => Resolution::Retry {
                    backoff_secs: q.temp_rate_limit_backoff_secs,
                    reason: outcome.code(),
                    max_retries: q.temp_max_retries,
                },
                Outcome::Error { message } => Resolution::Retry {
                    backoff_secs: q.error_backoff_secs,
                    reason: format!("error: {message}"),
                    max_retries: q.error_max_retries,
                },
            },
        }
    }
}
