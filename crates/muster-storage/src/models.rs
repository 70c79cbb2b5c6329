// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types returned by the query modules.

use std::str::FromStr;

use muster_core::{ChannelId, MembershipStatus, QueueState};
use serde::{Deserialize, Serialize};

/// A task queue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub url: String,
    pub state: QueueState,
    pub tries: u32,
    /// Unix seconds.
    pub added_at: i64,
    /// Unix seconds; the item is due once this has passed.
    pub next_try_at: i64,
    pub last_error: Option<String>,
    pub batch_id: Option<String>,
    pub origin: Option<String>,
    pub reason: Option<String>,
    pub channel_id: Option<ChannelId>,
}

/// Options shared by every link in one `enqueue` call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub batch_id: Option<String>,
    pub origin: Option<String>,
    /// Seconds before the new rows become due.
    pub delay_secs: u64,
    pub reason: Option<String>,
}

/// Result of rescheduling a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rescheduled {
    /// Back in `queued`, due at the given unix time.
    Requeued { next_try_at: i64 },
    /// The retry cap was reached; the item is now terminal `failed`.
    Exhausted,
    /// The item had already left `queued`/`processing`; nothing changed.
    NotActive,
}

/// Row counts by queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn active(&self) -> u64 {
        self.queued + self.processing
    }
}

/// A cached invite or link resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub channel_id: ChannelId,
    pub title: Option<String>,
}

/// An account hold restored at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHold {
    pub account: String,
    pub until_ts: i64,
    pub reason: String,
}

/// Parse a TEXT column into a strum-backed enum.
pub(crate) fn parse_column<T>(value: String, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    T::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_status(value: String, idx: usize) -> rusqlite::Result<MembershipStatus> {
    parse_column(value, idx)
}
