// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ready-time gated priority scheduler.
//!
//! Tasks are ordered by `(priority, not_before, sequence)`; lower priority
//! values run sooner and the insertion sequence keeps equal entries FIFO.
//! Nothing here is persisted: the heap is rebuilt from the task queue.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use muster_config::model::HeadOfLinePolicy;
use muster_core::ActionKind;
use tokio::time::Instant;
use tracing::trace;

use crate::rate_limiter::RateLimiter;

/// A task waiting in the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduledTask<T> {
    pub id: u64,
    pub kind: ActionKind,
    pub account: Option<String>,
    pub priority: i32,
    pub not_before: Instant,
    pub payload: T,
}

struct Entry<T>(ScheduledTask<T>);

impl<T> Entry<T> {
    fn key(&self) -> (i32, Instant, u64) {
        (self.0.priority, self.0.not_before, self.0.id)
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of tasks released through a [`RateLimiter`].
pub struct PriorityScheduler<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    limiter: Arc<RateLimiter>,
    policy: HeadOfLinePolicy,
    next_id: u64,
}

impl<T> PriorityScheduler<T> {
    pub fn new(limiter: Arc<RateLimiter>, policy: HeadOfLinePolicy) -> Self {
        Self {
            heap: BinaryHeap::new(),
            limiter,
            policy,
            next_id: 0,
        }
    }

    /// Add a task; returns its id (also its FIFO sequence number).
    pub fn push(
        &mut self,
        kind: ActionKind,
        account: Option<String>,
        priority: i32,
        not_before: Instant,
        payload: T,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(Entry(ScheduledTask {
            id,
            kind,
            account,
            priority,
            not_before,
            payload,
        })));
        id
    }

    /// Release the next task that is due and admitted by the rate limiter.
    ///
    /// With [`HeadOfLinePolicy::Block`] only the head is considered: if it is
    /// not yet due, or the limiter denies it, nothing is returned even when
    /// later entries could run. With [`HeadOfLinePolicy::Skip`] entries are
    /// examined in order until one is both due and admitted.
    pub fn pop_ready(&mut self) -> Option<ScheduledTask<T>> {
        let now = Instant::now();
        match self.policy {
            HeadOfLinePolicy::Block => {
                let Reverse(head) = self.heap.peek()?;
                if !self.admit(&head.0, now) {
                    return None;
                }
                self.heap.pop().map(|Reverse(entry)| entry.0)
            }
            HeadOfLinePolicy::Skip => {
                let mut passed = Vec::new();
                let mut found = None;
                while let Some(Reverse(entry)) = self.heap.pop() {
                    if self.admit(&entry.0, now) {
                        found = Some(entry.0);
                        break;
                    }
                    passed.push(Reverse(entry));
                }
                self.heap.extend(passed);
                found
            }
        }
    }

    fn admit(&self, task: &ScheduledTask<T>, now: Instant) -> bool {
        if task.not_before > now {
            return false;
        }
        let admitted = self.limiter.can_proceed(task.kind, task.account.as_deref());
        if !admitted {
            trace!(task_id = task.id, kind = %task.kind, "scheduled task held by rate limit");
        }
        admitted
    }

    /// How long until the next task becomes due: `None` when empty, zero
    /// when something is already due (even if rate-limited).
    pub fn peek_delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let next = match self.policy {
            HeadOfLinePolicy::Block => self.heap.peek().map(|Reverse(e)| e.0.not_before),
            HeadOfLinePolicy::Skip => self.heap.iter().map(|Reverse(e)| e.0.not_before).min(),
        }?;
        Some(next.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
