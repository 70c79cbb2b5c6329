// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote channel service trait: the only path to the messaging platform.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::ChannelId;

/// An entity resolved from a public link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub id: ChannelId,
    pub title: Option<String>,
}

/// Reply to a public join call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinReply {
    Joined,
    AlreadyMember,
}

/// Reply to an invite import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteReply {
    Joined {
        channel_id: ChannelId,
        title: Option<String>,
    },
    AlreadyMember {
        channel_id: Option<ChannelId>,
    },
    /// The channel requires admin approval; a join request was filed.
    RequestPending,
}

/// Platform refusals and failures raised by any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("entity not found")]
    NotFound,

    #[error("flood wait of {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("channel is private or the account is banned from it")]
    PrivateOrBanned,

    #[error("invite is invalid or expired")]
    InvalidOrExpired,

    /// The account was banned or kicked from this specific channel.
    #[error("account is blocked in this channel")]
    Blocked,

    /// The account has reached the platform's joined-channel quota.
    #[error("account joined too many channels")]
    TooManyChannels,

    #[error("{0}")]
    Other(String),
}

/// Session-bound client for the remote messaging platform.
///
/// Each pooled account owns one implementation instance. Calls may suspend
/// for as long as the platform takes; a stuck call only blocks the slot that
/// issued it.
#[async_trait]
pub trait RemoteChannelService: Send + Sync + 'static {
    /// Resolves a public link or username to an entity (one lookup call).
    async fn resolve_entity(&self, link: &str) -> Result<ResolvedEntity, RemoteError>;

    /// Joins a previously resolved public entity.
    async fn join_public(&self, entity: &ResolvedEntity) -> Result<JoinReply, RemoteError>;

    /// Imports a private invite by hash.
    async fn import_invite(&self, hash: &str) -> Result<InviteReply, RemoteError>;
}
