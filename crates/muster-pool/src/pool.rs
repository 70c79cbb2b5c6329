// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Round-robin leasing over account slots.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use muster_core::RemoteChannelService;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::slot::AccountSlot;

/// Point-in-time view of one slot, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub name: String,
    pub busy: bool,
    pub ready_in: Duration,
}

/// Exclusive use of one slot. The slot becomes idle again on drop.
#[derive(Debug)]
pub struct Lease {
    slot: Arc<AccountSlot>,
}

impl Deref for Lease {
    type Target = AccountSlot;

    fn deref(&self) -> &AccountSlot {
        &self.slot
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// The set of pooled accounts.
#[derive(Debug)]
pub struct AccountPool {
    slots: Vec<Arc<AccountSlot>>,
    cursor: Mutex<usize>,
}

impl AccountPool {
    /// Build a pool from named sessions, in round-robin order.
    pub fn new(sessions: Vec<(String, Arc<dyn RemoteChannelService>)>) -> Self {
        let epoch = Instant::now();
        let slots: Vec<_> = sessions
            .into_iter()
            .map(|(name, session)| Arc::new(AccountSlot::new(name, session, epoch)))
            .collect();
        info!(slots = slots.len(), "account pool ready");
        Self {
            slots,
            cursor: Mutex::new(0),
        }
    }

    /// Lease the next idle, ready slot, or `None` when every slot is busy or
    /// cooling down. `None` is a scheduling signal, not an error.
    pub fn lease(&self) -> Option<Lease> {
        self.lease_where(|_| true)
    }

    /// Like [`lease`](Self::lease) but never returns a slot named in `excluded`.
    pub fn lease_excluding(&self, excluded: &HashSet<String>) -> Option<Lease> {
        self.lease_where(|slot| !excluded.contains(slot.name()))
    }

    fn lease_where(&self, eligible: impl Fn(&AccountSlot) -> bool) -> Option<Lease> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        let now = Instant::now();
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        for step in 0..n {
            let idx = (*cursor + step) % n;
            let slot = &self.slots[idx];
            if !slot.is_busy() && slot.is_ready(now) && eligible(slot) && slot.try_acquire() {
                *cursor = (idx + 1) % n;
                debug!(account = %slot.name(), "slot leased");
                return Some(Lease {
                    slot: Arc::clone(slot),
                });
            }
        }
        None
    }

    /// Time until the earliest idle slot becomes ready; `None` if there are
    /// no idle slots at all.
    pub fn next_ready_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .iter()
            .filter(|s| !s.is_busy())
            .map(|s| s.ready_in(now))
            .min()
    }

    pub fn slot(&self, name: &str) -> Option<&Arc<AccountSlot>> {
        self.slots.iter().find(|s| s.name() == name)
    }

    pub fn snapshot(&self) -> Vec<SlotStatus> {
        let now = Instant::now();
        self.slots
            .iter()
            .map(|s| SlotStatus {
                name: s.name().to_string(),
                busy: s.is_busy(),
                ready_in: s.ready_in(now),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
