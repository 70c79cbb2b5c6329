// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable, restart-safe queue of pending link work.
//!
//! [`TaskQueue`] wraps the `queries::queue` functions with the wall clock and
//! the configured retry policy. Backoffs get symmetric random jitter so that
//! items deferred together do not all come due in the same second.

use muster_config::model::QueueConfig;
use muster_core::{ChannelId, MusterError};
use rand::Rng;
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::{EnqueueOptions, QueueCounts, QueueItem, Rescheduled};
use crate::queries::queue;
use crate::unix_now;

/// Backoff floor and jitter applied on reschedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub min_backoff_secs: u64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            min_backoff_secs: config.min_backoff_secs,
            jitter_fraction: config.jitter_fraction,
        }
    }
}

impl RetryPolicy {
    /// The delay actually applied for a requested backoff: floored at
    /// `min_backoff_secs`, then moved by up to `jitter_fraction` either way
    /// and rounded to whole seconds.
    pub fn delay_for(&self, backoff_secs: u64, rng: &mut impl Rng) -> u64 {
        let base = backoff_secs.max(self.min_backoff_secs) as f64;
        let spread = base * self.jitter_fraction;
        let jitter = if spread > 0.0 {
            rng.gen_range(-spread..=spread)
        } else {
            0.0
        };
        (base + jitter).round().max(0.0) as u64
    }
}

/// The durable task queue.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    policy: RetryPolicy,
}

impl TaskQueue {
    pub fn new(db: Database, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueue links; already-active links are skipped. Returns rows added.
    pub async fn enqueue(&self, links: &[String], opts: &EnqueueOptions) -> Result<usize, MusterError> {
        let added = queue::enqueue(&self.db, links, opts, unix_now()).await?;
        debug!(
            submitted = links.len(),
            added,
            delay_secs = opts.delay_secs,
            reason = opts.reason.as_deref().unwrap_or(""),
            "links enqueued"
        );
        Ok(added)
    }

    pub async fn fetch_due(&self, limit: u32) -> Result<Vec<QueueItem>, MusterError> {
        queue::fetch_due(&self.db, limit, unix_now()).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>, MusterError> {
        queue::get(&self.db, id).await
    }

    /// Claim an item. `false` means someone else moved it out of `queued`.
    pub async fn mark_processing(&self, id: i64) -> Result<bool, MusterError> {
        queue::mark_processing(&self.db, id, unix_now()).await
    }

    /// `false` means the item was no longer active and kept its state.
    pub async fn mark_done(
        &self,
        id: i64,
        channel_id: Option<ChannelId>,
        reason: Option<&str>,
    ) -> Result<bool, MusterError> {
        queue::mark_done(&self.db, id, channel_id, reason, unix_now()).await
    }

    pub async fn mark_failed_final(&self, id: i64, error: &str) -> Result<bool, MusterError> {
        queue::mark_failed_final(&self.db, id, error, unix_now()).await
    }

    /// Count a retry; requeue with a jittered backoff or fail at the cap.
    pub async fn reschedule(
        &self,
        id: i64,
        backoff_secs: u64,
        reason: Option<&str>,
        max_retries: u32,
    ) -> Result<Rescheduled, MusterError> {
        let delay = self.policy.delay_for(backoff_secs, &mut rand::thread_rng());
        let outcome = queue::reschedule(&self.db, id, delay, reason, max_retries, unix_now()).await?;
        match outcome {
            Rescheduled::Requeued { next_try_at } => {
                debug!(item_id = id, delay_secs = delay, next_try_at, "item rescheduled");
            }
            Rescheduled::Exhausted => {
                warn!(item_id = id, max_retries, reason = reason.unwrap_or(""), "retries exhausted");
            }
            Rescheduled::NotActive => {
                debug!(item_id = id, "item no longer active, not rescheduled");
            }
        }
        Ok(outcome)
    }

    /// Requeue without counting a try; returns the new due time, or `None`
    /// if the item was no longer active.
    pub async fn defer(
        &self,
        id: i64,
        delay_secs: u64,
        reason: &str,
    ) -> Result<Option<i64>, MusterError> {
        let next_try_at = queue::defer(&self.db, id, delay_secs, reason, unix_now()).await?;
        debug!(item_id = id, delay_secs, reason, deferred = next_try_at.is_some(), "item deferred");
        Ok(next_try_at)
    }

    pub async fn purge_finished_older_than(&self, days: u32) -> Result<usize, MusterError> {
        queue::purge_finished_older_than(&self.db, days, unix_now()).await
    }

    pub async fn list_active(&self, limit: u32) -> Result<Vec<QueueItem>, MusterError> {
        queue::list_active(&self.db, limit).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, MusterError> {
        queue::counts(&self.db).await
    }

    pub async fn clear_active(&self) -> Result<usize, MusterError> {
        queue::clear_active(&self.db, unix_now()).await
    }

    pub async fn recover_stale_processing(&self) -> Result<usize, MusterError> {
        queue::recover_stale_processing(&self.db, unix_now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::QueueState;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::tempdir;

    async fn setup_queue() -> (TaskQueue, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (TaskQueue::new(db, RetryPolicy::default()), dir)
    }

    #[tokio::test]
    async fn reschedule_sixty_lands_in_jitter_window() {
        let (q, _dir) = setup_queue().await;
        q.enqueue(&["https://t.me/a".to_string()], &EnqueueOptions::default())
            .await
            .unwrap();
        let id = q.fetch_due(1).await.unwrap()[0].id;
        q.mark_processing(id).await.unwrap();

        let before = unix_now();
        let r = q.reschedule(id, 60, Some("temp:error"), 5).await.unwrap();
        let after = unix_now();

        let Rescheduled::Requeued { next_try_at } = r else {
            panic!("expected requeue, got {r:?}");
        };
        assert!(next_try_at >= before + 51, "{next_try_at} < {}", before + 51);
        assert!(next_try_at <= after + 75, "{next_try_at} > {}", after + 75);
        assert!(q.fetch_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_cap_makes_item_terminal() {
        let (q, _dir) = setup_queue().await;
        q.enqueue(&["https://t.me/a".to_string()], &EnqueueOptions::default())
            .await
            .unwrap();
        let id = q.fetch_due(1).await.unwrap()[0].id;

        assert!(matches!(
            q.reschedule(id, 0, None, 2).await.unwrap(),
            Rescheduled::Requeued { .. }
        ));
        assert_eq!(q.reschedule(id, 0, None, 2).await.unwrap(), Rescheduled::Exhausted);

        let item = q.get(id).await.unwrap().unwrap();
        assert_eq!(item.state, QueueState::Failed);
        assert!(q.fetch_due(10).await.unwrap().is_empty());
    }

    #[test]
    fn min_backoff_floor_applies() {
        let policy = RetryPolicy {
            min_backoff_secs: 5,
            jitter_fraction: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.delay_for(0, &mut rng), 5);
        assert_eq!(policy.delay_for(2, &mut rng), 5);
        assert_eq!(policy.delay_for(30, &mut rng), 30);
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_fraction(backoff in 0u64..100_000, seed in any::<u64>()) {
            let policy = RetryPolicy::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = policy.delay_for(backoff, &mut rng) as f64;
            let base = backoff.max(policy.min_backoff_secs) as f64;
            prop_assert!(delay >= (base * (1.0 - policy.jitter_fraction)).floor());
            prop_assert!(delay <= (base * (1.0 + policy.jitter_fraction)).ceil());
        }
    }
}
