// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted remote channel service for deterministic tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use muster_core::{
    ChannelId, InviteReply, JoinReply, RemoteChannelService, RemoteError, ResolvedEntity,
};
use tokio::sync::Mutex;

/// A remote service that answers from pre-configured data.
///
/// - `resolve_entity` looks the link's last path segment up in a table of
///   known entities and answers `NotFound` otherwise.
/// - `join_public` and `import_invite` pop scripted replies in FIFO order.
///   With an empty script, joins succeed and invites are invalid.
#[derive(Default)]
pub struct MockRemote {
    entities: Mutex<HashMap<String, Result<ResolvedEntity, RemoteError>>>,
    joins: Mutex<VecDeque<Result<JoinReply, RemoteError>>>,
    invites: Mutex<VecDeque<Result<InviteReply, RemoteError>>>,
    resolve_calls: AtomicUsize,
    join_calls: AtomicUsize,
    invite_calls: AtomicUsize,
}

fn entity_key(link: &str) -> String {
    link.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(link)
        .trim_start_matches('@')
        .to_ascii_lowercase()
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `username` resolve to `id`.
    pub fn with_entity(mut self, username: &str, id: i64, title: &str) -> Self {
        self.entities.get_mut().insert(
            entity_key(username),
            Ok(ResolvedEntity {
                id: ChannelId(id),
                title: Some(title.to_string()),
            }),
        );
        self
    }

    /// Make resolving `username` fail with `err`.
    pub fn with_resolve_error(mut self, username: &str, err: RemoteError) -> Self {
        self.entities.get_mut().insert(entity_key(username), Err(err));
        self
    }

    pub fn with_join(mut self, reply: Result<JoinReply, RemoteError>) -> Self {
        self.joins.get_mut().push_back(reply);
        self
    }

    pub fn with_invite(mut self, reply: Result<InviteReply, RemoteError>) -> Self {
        self.invites.get_mut().push_back(reply);
        self
    }

    pub async fn push_join(&self, reply: Result<JoinReply, RemoteError>) {
        self.joins.lock().await.push_back(reply);
    }

    pub async fn push_invite(&self, reply: Result<InviteReply, RemoteError>) {
        self.invites.lock().await.push_back(reply);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn invite_calls(&self) -> usize {
        self.invite_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.resolve_calls() + self.join_calls() + self.invite_calls()
    }
}

#[async_trait]
impl RemoteChannelService for MockRemote {
    async fn resolve_entity(&self, link: &str) -> Result<ResolvedEntity, RemoteError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.entities
            .lock()
            .await
            .get(&entity_key(link))
            .cloned()
            .unwrap_or(Err(RemoteError::NotFound))
    }

    async fn join_public(&self, _entity: &ResolvedEntity) -> Result<JoinReply, RemoteError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        self.joins
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(JoinReply::Joined))
    }

    async fn import_invite(&self, _hash: &str) -> Result<InviteReply, RemoteError> {
        self.invite_calls.fetch_add(1, Ordering::SeqCst);
        self.invites
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(RemoteError::InvalidOrExpired))
    }
}
