// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result cache consulted before any network call.
//!
//! Durable state lives in SQLite (membership, invite and URL resolutions,
//! URL statuses, channel backoff, negative invite cache). A small LRU mirror
//! with its own TTL sits in front of the negative invite cache; it is only an
//! optimisation and may be empty at any time without changing results.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use muster_config::model::CacheConfig;
use muster_core::{ChannelId, LinkKind, MembershipStatus, MusterError, Outcome};
use muster_storage::queries::{backoff, invites, membership, urls};
use muster_storage::{Database, Resolution, unix_now};
use tracing::debug;

use crate::links::ParsedLink;

#[derive(Debug, Clone, Copy)]
struct MirrorEntry {
    status: MembershipStatus,
    expires_at: i64,
}

/// Lookup and write paths over the persisted result tables.
pub struct ResultCache {
    db: Database,
    negative_ttl_secs: i64,
    mirror_ttl_secs: i64,
    mirror: Mutex<LruCache<String, MirrorEntry>>,
}

impl ResultCache {
    pub fn new(db: Database, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.mirror_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            negative_ttl_secs: i64::try_from(config.negative_ttl_secs).unwrap_or(i64::MAX),
            mirror_ttl_secs: i64::try_from(config.mirror_ttl_secs).unwrap_or(i64::MAX),
            mirror: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// A status that settles `channel` for every account.
    pub async fn channel_final(
        &self,
        channel: ChannelId,
    ) -> Result<Option<MembershipStatus>, MusterError> {
        membership::channel_final(&self.db, channel).await
    }

    /// Accounts that already hold any final status for `channel`.
    pub async fn settled_accounts(&self, channel: ChannelId) -> Result<HashSet<String>, MusterError> {
        Ok(membership::settled_accounts(&self.db, channel)
            .await?
            .into_iter()
            .collect())
    }

    /// End of an active flood backoff on `channel`, in unix seconds.
    pub async fn channel_backoff(&self, channel: ChannelId) -> Result<Option<i64>, MusterError> {
        backoff::active_until(&self.db, channel, unix_now()).await
    }

    pub async fn set_channel_backoff(
        &self,
        channel: ChannelId,
        seconds: u64,
    ) -> Result<i64, MusterError> {
        let until = unix_now().saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX));
        backoff::extend(&self.db, channel, until).await?;
        Ok(until)
    }

    /// Channel a link is known to point at, without a network call.
    pub async fn resolution(&self, link: &ParsedLink) -> Result<Option<Resolution>, MusterError> {
        match (link.kind, link.invite_hash.as_deref()) {
            (LinkKind::Invite, Some(hash)) => invites::mapping(&self.db, hash).await,
            _ => urls::channel(&self.db, &link.url).await,
        }
    }

    /// Remember a public link's resolved entity.
    pub async fn remember_resolution(
        &self,
        link: &ParsedLink,
        channel: ChannelId,
        title: Option<&str>,
    ) -> Result<(), MusterError> {
        urls::upsert_channel(&self.db, &link.url, channel, title, unix_now()).await
    }

    /// Final status known for a link whose channel is not known.
    ///
    /// Invites check the negative cache first (mirror, then store); both
    /// kinds then fall back to the per-URL status cache.
    pub async fn link_status(&self, link: &ParsedLink) -> Result<Option<MembershipStatus>, MusterError> {
        if let Some(hash) = link.invite_hash.as_deref()
            && let Some(status) = self.negative_invite(hash).await?
        {
            return Ok(Some(status));
        }
        urls::status(&self.db, &link.url).await
    }

    /// Unexpired negative classification for an invite hash.
    pub async fn negative_invite(&self, hash: &str) -> Result<Option<MembershipStatus>, MusterError> {
        let now = unix_now();
        {
            let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            match mirror.get(hash).copied() {
                Some(entry) if entry.expires_at > now => {
                    debug!(hash, status = %entry.status, "negative invite mirror hit");
                    return Ok(Some(entry.status));
                }
                Some(_) => {
                    mirror.pop(hash);
                }
                None => {}
            }
        }

        let row = invites::negative(&self.db, hash, now).await?;
        if let Some((status, until_ts)) = row {
            self.mirror_put(hash, status, until_ts, now);
        }
        Ok(row.map(|(status, _)| status))
    }

    fn mirror_put(&self, hash: &str, status: MembershipStatus, until_ts: i64, now: i64) {
        let expires_at = until_ts.min(now.saturating_add(self.mirror_ttl_secs));
        self.mirror
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(hash.to_string(), MirrorEntry { status, expires_at });
    }

    /// Persist a real classification. Transient outcomes write nothing.
    ///
    /// - With a channel id: the (account, channel) status, plus the invite
    ///   mapping when an invite produced a membership.
    /// - Without one: negative invite statuses go to the TTL'd negative
    ///   cache; other channel-final statuses go to the per-URL cache.
    pub async fn record(
        &self,
        account: &str,
        link: &ParsedLink,
        channel: Option<ChannelId>,
        title: Option<&str>,
        outcome: &Outcome,
    ) -> Result<(), MusterError> {
        let Some(status) = outcome.membership_status() else {
            return Ok(());
        };
        let now = unix_now();
        let hash = link.invite_hash.as_deref();

        match channel {
            Some(channel) => {
                membership::upsert(&self.db, account, channel, status, now).await?;
                if let Some(hash) = hash
                    && matches!(status, MembershipStatus::Joined | MembershipStatus::Already)
                {
                    invites::upsert_mapping(&self.db, hash, channel, title, now).await?;
                }
            }
            None => match hash {
                Some(hash) if status.is_negative_invite() => {
                    let until_ts = now.saturating_add(self.negative_ttl_secs);
                    invites::put_negative(&self.db, hash, status, until_ts).await?;
                    self.mirror_put(hash, status, until_ts, now);
                }
                _ if status.is_channel_final() => {
                    urls::put_status(&self.db, &link.url, status, now).await?;
                }
                _ => {}
            },
        }
        debug!(account, link = %link.url, status = %status, "classification cached");
        Ok(())
    }

    /// Delete expired negative rows and drop expired mirror entries.
    pub async fn prune_expired(&self) -> Result<usize, MusterError> {
        let now = unix_now();
        {
            let mut mirror = self.mirror.lock().unwrap_or_else(PoisonError::into_inner);
            let expired: Vec<String> = mirror
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(hash, _)| hash.clone())
                .collect();
            for hash in expired {
                mirror.pop(&hash);
            }
        }
        invites::prune_expired_negative(&self.db, now).await
    }
}
