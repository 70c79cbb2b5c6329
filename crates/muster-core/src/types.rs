// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the muster workspace.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Numeric identifier of a channel or chat on the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of remote action, used to select rate-limit buckets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Joining a public channel or importing an invite.
    Join,
    /// Resolving a public username or link to an entity.
    Resolve,
    /// Fetching channel metadata.
    FetchInfo,
    /// Releasing a queued item through the priority scheduler.
    Dispatch,
    /// Anything else. Has no global bucket unless configured.
    Other,
}

/// The two link shapes the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// `https://t.me/username` style links, resolved by name.
    Public,
    /// `https://t.me/+HASH` style links carrying an invite hash.
    Invite,
}

/// A final membership classification, cached without expiry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Joined,
    Already,
    Requested,
    Invalid,
    Private,
    Blocked,
    TooMany,
}

impl MembershipStatus {
    /// Whether this status settles the channel for every account.
    ///
    /// `blocked` and `too_many` only settle the (account, channel) pair:
    /// another account may still succeed.
    pub fn is_channel_final(self) -> bool {
        matches!(
            self,
            Self::Joined | Self::Already | Self::Requested | Self::Invalid | Self::Private
        )
    }

    /// Statuses that may be stored in the negative invite cache.
    pub fn is_negative_invite(self) -> bool {
        matches!(self, Self::Invalid | Self::Private | Self::Requested)
    }
}

/// The bounded result of one attempt against a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Joined,
    Already,
    Requested,
    Invalid,
    Private,
    Blocked,
    TooMany,
    FloodWait { seconds: u64 },
    TempRateLimit,
    Error { message: String },
}

impl Outcome {
    /// The cacheable status for this outcome, or `None` for transient ones.
    pub fn membership_status(&self) -> Option<MembershipStatus> {
        match self {
            Self::Joined => Some(MembershipStatus::Joined),
            Self::Already => Some(MembershipStatus::Already),
            Self::Requested => Some(MembershipStatus::Requested),
            Self::Invalid => Some(MembershipStatus::Invalid),
            Self::Private => Some(MembershipStatus::Private),
            Self::Blocked => Some(MembershipStatus::Blocked),
            Self::TooMany => Some(MembershipStatus::TooMany),
            Self::FloodWait { .. } | Self::TempRateLimit | Self::Error { .. } => None,
        }
    }

    /// Transient outcomes are retried through the task queue.
    pub fn is_transient(&self) -> bool {
        self.membership_status().is_none()
    }

    /// Short status code used in reports and queue reasons.
    pub fn code(&self) -> String {
        match self {
            Self::FloodWait { seconds } => format!("flood_wait_{seconds}"),
            Self::TempRateLimit => "temp_rate_limit".to_string(),
            Self::Error { .. } => "error".to_string(),
            other => other
                .membership_status()
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<MembershipStatus> for Outcome {
    fn from(status: MembershipStatus) -> Self {
        match status {
            MembershipStatus::Joined => Self::Joined,
            MembershipStatus::Already => Self::Already,
            MembershipStatus::Requested => Self::Requested,
            MembershipStatus::Invalid => Self::Invalid,
            MembershipStatus::Private => Self::Private,
            MembershipStatus::Blocked => Self::Blocked,
            MembershipStatus::TooMany => Self::TooMany,
        }
    }
}

/// Lifecycle state of a task queue row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Queued,
    Processing,
    Done,
    Failed,
}

impl QueueState {
    /// `done` and `failed` are terminal; nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn action_kind_uses_snake_case() {
        assert_eq!(ActionKind::FetchInfo.to_string(), "fetch_info");
        assert_eq!(ActionKind::from_str("join").unwrap(), ActionKind::Join);
        let json = serde_json::to_string(&ActionKind::FetchInfo).unwrap();
        assert_eq!(json, "\"fetch_info\"");
    }

    #[test]
    fn membership_status_round_trips_through_strings() {
        for status in [
            MembershipStatus::Joined,
            MembershipStatus::Already,
            MembershipStatus::Requested,
            MembershipStatus::Invalid,
            MembershipStatus::Private,
            MembershipStatus::Blocked,
            MembershipStatus::TooMany,
        ] {
            let s = status.to_string();
            assert_eq!(MembershipStatus::from_str(&s).unwrap(), status);
        }
        assert_eq!(MembershipStatus::TooMany.to_string(), "too_many");
    }

    #[test]
    fn blocked_and_too_many_are_not_channel_final() {
        assert!(MembershipStatus::Joined.is_channel_final());
        assert!(MembershipStatus::Private.is_channel_final());
        assert!(!MembershipStatus::Blocked.is_channel_final());
        assert!(!MembershipStatus::TooMany.is_channel_final());
    }

    #[test]
    fn transient_outcomes_have_no_status() {
        assert!(Outcome::FloodWait { seconds: 30 }.is_transient());
        assert!(Outcome::TempRateLimit.is_transient());
        assert!(
            Outcome::Error {
                message: "boom".into()
            }
            .is_transient()
        );
        assert!(!Outcome::Blocked.is_transient());
        assert_eq!(
            Outcome::Joined.membership_status(),
            Some(MembershipStatus::Joined)
        );
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(Outcome::FloodWait { seconds: 30 }.code(), "flood_wait_30");
        assert_eq!(Outcome::TooMany.code(), "too_many");
        assert_eq!(Outcome::TempRateLimit.code(), "temp_rate_limit");
        assert_eq!(Outcome::Error { message: "x".into() }.code(), "error");
    }

    #[test]
    fn queue_state_terminality() {
        assert!(QueueState::Done.is_terminal());
        assert!(QueueState::Failed.is_terminal());
        assert!(!QueueState::Queued.is_terminal());
        assert_eq!(QueueState::Processing.to_string(), "processing");
        assert_eq!(QueueState::from_str("queued").unwrap(), QueueState::Queued);
    }
}
