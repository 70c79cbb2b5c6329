// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-bucket rate limiting per action kind and per account.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use muster_config::model::{BucketSpec, RateLimitConfig};
use muster_core::ActionKind;
use tokio::time::Instant;
use tracing::debug;

/// A single token bucket refilled continuously at `rate` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(spec: BucketSpec, now: Instant) -> Self {
        let capacity = f64::from(spec.capacity);
        Self {
            rate: spec.rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Add `elapsed * rate` tokens, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    pub fn has_token(&self) -> bool {
        self.tokens >= 1.0
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

#[derive(Debug)]
struct Buckets {
    global: HashMap<ActionKind, TokenBucket>,
    accounts: HashMap<String, TokenBucket>,
}

/// Global per-action buckets plus lazily created per-account buckets.
///
/// Action kinds without a configured global bucket are only limited by the
/// account bucket (or not at all when no account is given).
#[derive(Debug)]
pub struct RateLimiter {
    account_template: BucketSpec,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(
        global: impl IntoIterator<Item = (ActionKind, BucketSpec)>,
        account_template: BucketSpec,
    ) -> Self {
        let now = Instant::now();
        let global = global
            .into_iter()
            .map(|(kind, spec)| (kind, TokenBucket::new(spec, now)))
            .collect();
        Self {
            account_template,
            buckets: Mutex::new(Buckets {
                global,
                accounts: HashMap::new(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let kinds = [
            ActionKind::Join,
            ActionKind::Resolve,
            ActionKind::FetchInfo,
            ActionKind::Dispatch,
        ];
        Self::new(
            kinds
                .into_iter()
                .filter_map(|kind| config.global.get(kind).map(|spec| (kind, spec))),
            config.account,
        )
    }

    /// Admit one action of `kind`, optionally charged to `account`.
    ///
    /// Both buckets are refilled first. A token is taken from each only when
    /// both have one; a denial consumes nothing.
    pub fn can_proceed(&self, kind: ActionKind, account: Option<&str>) -> bool {
        let now = Instant::now();
        let mut guard = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let Buckets { global, accounts } = &mut *guard;

        let mut global_bucket = global.get_mut(&kind);
        if let Some(bucket) = global_bucket.as_deref_mut() {
            bucket.refill(now);
        }

        let template = self.account_template;
        let mut account_bucket = account.map(|name| {
            accounts
                .entry(name.to_string())
                .or_insert_with(|| TokenBucket::new(template, now))
        });
        if let Some(bucket) = account_bucket.as_deref_mut() {
            bucket.refill(now);
        }

        let global_ok = global_bucket.as_deref().is_none_or(TokenBucket::has_token);
        let account_ok = account_bucket.as_deref().is_none_or(TokenBucket::has_token);
        if !(global_ok && account_ok) {
            debug!(
                kind = %kind,
                account = account.unwrap_or("-"),
                global_ok,
                account_ok,
                "rate limit denied"
            );
            return false;
        }

        if let Some(bucket) = global_bucket {
            bucket.take();
        }
        if let Some(bucket) = account_bucket {
            bucket.take();
        }
        true
    }

    /// Tokens currently left in the global bucket for `kind`, after refill.
    pub fn available(&self, kind: ActionKind) -> Option<f64> {
        let now = Instant::now();
        let mut guard = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        guard.global.get_mut(&kind).map(|bucket| {
            bucket.refill(now);
            bucket.tokens()
        })
    }
}
