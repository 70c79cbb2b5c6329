// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anti-duplicate window for mutating remote calls.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use muster_core::ActionKind;
use tokio::time::Instant;

/// Result of trying to claim a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Granted,
    /// An identical call was claimed recently; it may be retried after this.
    Held { remaining: Duration },
}

/// Suppresses identical `(kind, key)` calls inside a time window.
///
/// Claims are released early with [`forget`](Self::forget) when the call
/// produced nothing the cache can answer with, so a retry is not blocked.
#[derive(Debug)]
pub struct AntiDupWindow {
    window: Duration,
    claims: DashMap<(ActionKind, String), Instant>,
}

impl AntiDupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            claims: DashMap::new(),
        }
    }

    pub fn claim(&self, kind: ActionKind, key: &str) -> Claim {
        if self.window.is_zero() {
            return Claim::Granted;
        }
        let now = Instant::now();
        match self.claims.entry((kind, key.to_string())) {
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_duration_since(*entry.get());
                if elapsed < self.window {
                    Claim::Held {
                        remaining: self.window - elapsed,
                    }
                } else {
                    entry.insert(now);
                    Claim::Granted
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Claim::Granted
            }
        }
    }

    pub fn forget(&self, kind: ActionKind, key: &str) {
        self.claims.remove(&(kind, key.to_string()));
    }

    /// Drop claims older than the window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.claims.len();
        self.claims
            .retain(|_, claimed| now.saturating_duration_since(*claimed) < self.window);
        before - self.claims.len()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_claim_is_held_until_window_passes() {
        let window = AntiDupWindow::new(Duration::from_secs(600));
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(
            window.claim(ActionKind::Join, "alpha"),
            Claim::Held {
                remaining: Duration::from_secs(500)
            }
        );

        tokio::time::advance(Duration::from_secs(500)).await;
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_and_keys_are_independent() {
        let window = AntiDupWindow::new(Duration::from_secs(60));
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);
        assert_eq!(window.claim(ActionKind::Resolve, "alpha"), Claim::Granted);
        assert_eq!(window.claim(ActionKind::Join, "beta"), Claim::Granted);
        assert_eq!(window.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_releases_claim() {
        let window = AntiDupWindow::new(Duration::from_secs(60));
        window.claim(ActionKind::Join, "alpha");
        window.forget(ActionKind::Join, "alpha");
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_never_holds() {
        let window = AntiDupWindow::new(Duration::ZERO);
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);
        assert_eq!(window.claim(ActionKind::Join, "alpha"), Claim::Granted);
        assert!(window.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_stale_claims() {
        let window = AntiDupWindow::new(Duration::from_secs(10));
        window.claim(ActionKind::Join, "alpha");
        tokio::time::advance(Duration::from_secs(5)).await;
        window.claim(ActionKind::Join, "beta");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(window.sweep(), 1);
        assert_eq!(window.len(), 1);
    }
}
