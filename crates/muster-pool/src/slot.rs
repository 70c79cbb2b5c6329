// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single pooled account.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use muster_core::RemoteChannelService;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest hold a slot accepts; larger requests are clamped to it.
const MAX_HOLD: Duration = Duration::from_secs(100 * 365 * 86_400);

fn deadline_after(duration: Duration) -> Instant {
    Instant::now() + duration.min(MAX_HOLD)
}

/// One account session plus its scheduling state.
///
/// `busy` is only flipped by the pool (on lease) and by the holder's
/// [`crate::Lease`] (on drop). The cooldown is stored as milliseconds past
/// the pool epoch and only grows.
pub struct AccountSlot {
    name: String,
    session: Arc<dyn RemoteChannelService>,
    epoch: Instant,
    busy: AtomicBool,
    not_ready_before_ms: AtomicU64,
}

impl fmt::Debug for AccountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSlot")
            .field("name", &self.name)
            .field("busy", &self.is_busy())
            .field("not_ready_before_ms", &self.not_ready_before_ms.load(Ordering::Acquire))
            .finish()
    }
}

impl AccountSlot {
    pub(crate) fn new(name: String, session: Arc<dyn RemoteChannelService>, epoch: Instant) -> Self {
        Self {
            name,
            session,
            epoch,
            busy: AtomicBool::new(false),
            not_ready_before_ms: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<dyn RemoteChannelService> {
        &self.session
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Set `busy` if it was clear. Returns whether this call acquired it.
    pub(crate) fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn not_ready_before(&self) -> Instant {
        self.epoch + Duration::from_millis(self.not_ready_before_ms.load(Ordering::Acquire))
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_ready_before() <= now
    }

    /// Time left until the slot is ready (zero if it already is).
    pub fn ready_in(&self, now: Instant) -> Duration {
        self.not_ready_before().saturating_duration_since(now)
    }

    /// Move `not_ready_before` to `max(current, deadline)`.
    pub fn extend_until(&self, deadline: Instant) {
        let offset = deadline.saturating_duration_since(self.epoch);
        // Round up so the stored value is never earlier than the deadline.
        let ms = u64::try_from(offset.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_add(u64::from(offset.subsec_nanos() % 1_000_000 != 0));
        self.not_ready_before_ms.fetch_max(ms, Ordering::AcqRel);
    }

    /// Short post-action cooldown.
    pub fn bump_cooldown(&self, duration: Duration) {
        self.extend_until(deadline_after(duration));
    }

    /// Hold the slot for a platform flood wait.
    pub fn mark_flood(&self, seconds: u64) {
        warn!(account = %self.name, seconds, "account flood wait");
        self.extend_until(deadline_after(Duration::from_secs(seconds)));
    }

    /// Hold the slot for days after hitting the joined-channel quota.
    pub fn mark_limit(&self, days: u64) {
        warn!(account = %self.name, days, "account reached channel limit");
        self.extend_until(deadline_after(Duration::from_secs(days.saturating_mul(86_400))));
    }

    /// Re-apply a hold recorded by a previous run.
    pub fn restore_hold(&self, remaining: Duration) {
        info!(account = %self.name, remaining_secs = remaining.as_secs(), "restored account hold");
        self.extend_until(deadline_after(remaining));
    }
}
