// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-link join pipeline.
//!
//! Each link goes through four stages:
//!
//! 1. **Classify** the link shape. Malformed links and invite hashes fail
//!    locally with no network call.
//! 2. **Probe** the result cache: channel-final statuses, channel flood
//!    backoff, invite/link resolutions and the negative caches. Public links
//!    with no cached resolution are resolved with one lookup call on the
//!    leased session. Invites are never probed remotely.
//! 3. **Attempt** exactly one mutating call (public join or invite import),
//!    gated by the rate limiter and the anti-duplicate window.
//! 4. **Classify the outcome** into an [`Outcome`], write final ones to the
//!    cache and apply slot cooldowns and holds.
//!
//! `blocked` and `too_many` settle only the account, so the pipeline moves on
//! to the next eligible slot in the same call. When the remaining accounts
//! are all busy or cooling down, the link comes back as [`Disposition::NoSlot`]
//! and is retried later.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use muster_config::MusterConfig;
use muster_config::model::PoolConfig;
use muster_core::{
    ActionKind, ChannelId, InviteReply, JoinReply, LinkKind, MembershipStatus, MusterError, Outcome,
    RemoteError, ResolvedEntity,
};
use muster_pool::{AccountPool, AccountSlot, Lease};
use muster_scheduling::RateLimiter;
use muster_storage::queries::holds;
use muster_storage::{Database, unix_now};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::dedup::{AntiDupWindow, Claim};
use crate::links::{self, ParsedLink};

/// How a link was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Answered from the cache without a network call.
    Cached { status: MembershipStatus },
    /// Not a joinable link, or an invite with a malformed hash.
    Malformed,
    /// The channel is under a flood backoff until `until_ts` (unix seconds).
    Deferred { until_ts: i64 },
    /// Every slot not yet settled for this link is busy or cooling down.
    NoSlot,
    /// An identical attempt ran within the anti-duplicate window.
    Suppressed { retry_in: Duration },
    /// Every pooled account already holds a final status for this channel.
    Exhausted,
    /// At least one attempt ran; this is the last one's outcome.
    Attempted { outcome: Outcome, account: String },
}

/// Everything known about one processed link.
#[derive(Debug, Clone)]
pub struct LinkReport {
    /// The string as submitted.
    pub input: String,
    pub link: Option<ParsedLink>,
    pub channel_id: Option<ChannelId>,
    pub title: Option<String>,
    /// Remote calls issued while processing this link.
    pub remote_calls: u32,
    pub disposition: Disposition,
}

impl LinkReport {
    fn new(input: &str) -> Self {
        Self {
            input: input.trim().to_string(),
            link: None,
            channel_id: None,
            title: None,
            remote_calls: 0,
            disposition: Disposition::NoSlot,
        }
    }

    /// Canonical URL when the input parsed, otherwise the trimmed input.
    pub fn url(&self) -> &str {
        self.link.as_ref().map_or(&self.input, |l| &l.url)
    }

    pub fn kind(&self) -> Option<LinkKind> {
        self.link.as_ref().map(|l| l.kind)
    }

    pub fn account(&self) -> Option<&str> {
        match &self.disposition {
            Disposition::Attempted { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Short status code for reports.
    pub fn status_code(&self) -> &'static str {
        match &self.disposition {
            Disposition::Cached { .. } => "cached",
            Disposition::Malformed => "invalid",
            Disposition::Deferred { .. } => "deferred",
            Disposition::NoSlot => "no_slot",
            Disposition::Suppressed { .. } => "suppressed",
            Disposition::Exhausted => "exhausted",
            Disposition::Attempted { outcome, .. } => outcome_label(outcome),
        }
    }

    /// Extra detail that goes with [`status_code`](Self::status_code).
    pub fn status_detail(&self) -> Option<String> {
        match &self.disposition {
            Disposition::Cached { status } => Some(status.to_string()),
            Disposition::Malformed => Some("malformed link".to_string()),
            Disposition::Deferred { until_ts } => Some(format!("channel backoff until {until_ts}")),
            Disposition::Suppressed { retry_in } => Some(format!("retry in {}s", retry_in.as_secs())),
            Disposition::Attempted { outcome, .. } => match outcome {
                Outcome::FloodWait { seconds } => Some(format!("{seconds}s")),
                Outcome::Error { message } => Some(message.clone()),
                _ => None,
            },
            Disposition::NoSlot | Disposition::Exhausted => None,
        }
    }
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Joined => "joined",
        Outcome::Already => "already",
        Outcome::Requested => "requested",
        Outcome::Invalid => "invalid",
        Outcome::Private => "private",
        Outcome::Blocked => "blocked",
        Outcome::TooMany => "too_many",
        Outcome::FloodWait { .. } => "flood_wait",
        Outcome::TempRateLimit => "temp_rate_limit",
        Outcome::Error { .. } => "error",
    }
}

/// Map a platform refusal onto an outcome.
pub fn classify_error(err: RemoteError) -> Outcome {
    match err {
        RemoteError::NotFound | RemoteError::InvalidOrExpired => Outcome::Invalid,
        RemoteError::PrivateOrBanned => Outcome::Private,
        RemoteError::Blocked => Outcome::Blocked,
        RemoteError::TooManyChannels => Outcome::TooMany,
        RemoteError::FloodWait { seconds } => Outcome::FloodWait { seconds },
        RemoteError::Other(message) => Outcome::Error { message },
    }
}

enum Step {
    Done(Disposition),
    Classified(Outcome),
}

/// Runs the join pipeline for single links against the shared pool.
pub struct JoinOrchestrator {
    pool: Arc<AccountPool>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimiter>,
    dedup: AntiDupWindow,
    settings: PoolConfig,
}

impl JoinOrchestrator {
    pub fn new(
        pool: Arc<AccountPool>,
        cache: Arc<ResultCache>,
        limiter: Arc<RateLimiter>,
        settings: PoolConfig,
        anti_dup_window: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            limiter,
            dedup: AntiDupWindow::new(anti_dup_window),
            settings,
        }
    }

    /// Wire an orchestrator from configuration over an open database.
    pub fn from_config(pool: Arc<AccountPool>, db: Database, config: &MusterConfig) -> Self {
        Self::new(
            pool,
            Arc::new(ResultCache::new(db, &config.cache)),
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
            config.pool.clone(),
            Duration::from_secs(config.throttle.anti_dup_window_secs),
        )
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn anti_dup(&self) -> &AntiDupWindow {
        &self.dedup
    }

    /// Re-apply persisted account holds to the pool. Returns how many slots
    /// were held.
    pub async fn restore_holds(&self) -> Result<usize, MusterError> {
        let now = unix_now();
        let mut restored = 0;
        for hold in holds::active(self.cache.database(), now).await? {
            let Some(slot) = self.pool.slot(&hold.account) else {
                debug!(account = %hold.account, "hold for unknown account ignored");
                continue;
            };
            let remaining = u64::try_from(hold.until_ts - now).unwrap_or(0);
            slot.restore_hold(Duration::from_secs(remaining));
            restored += 1;
        }
        Ok(restored)
    }

    /// Process one raw link to a settled [`LinkReport`].
    ///
    /// Storage failures are returned as errors; every platform result,
    /// including transient ones, is a normal report.
    pub async fn process(&self, raw: &str) -> Result<LinkReport, MusterError> {
        let mut report = LinkReport::new(raw);

        let Some(link) = links::parse(raw) else {
            debug!(link = %report.input, "not a joinable link");
            report.disposition = Disposition::Malformed;
            return Ok(report);
        };
        report.link = Some(link.clone());

        if let Some(hash) = link.invite_hash.as_deref()
            && !links::is_valid_invite_hash(hash)
        {
            debug!(link = %link.url, "malformed invite hash");
            report.disposition = Disposition::Malformed;
            return Ok(report);
        }

        if let Some(resolution) = self.cache.resolution(&link).await? {
            report.channel_id = Some(resolution.channel_id);
            report.title = resolution.title;
        }

        let cached = match report.channel_id {
            Some(channel) => self.channel_settled(channel).await?,
            None => self
                .cache
                .link_status(&link)
                .await?
                .map(|status| Disposition::Cached { status }),
        };
        if let Some(disposition) = cached {
            debug!(link = %link.url, "settled from cache");
            report.disposition = disposition;
            return Ok(report);
        }

        let mut excluded = match report.channel_id {
            Some(channel) => self.cache.settled_accounts(channel).await?,
            None => HashSet::new(),
        };
        let mut last: Option<(Outcome, String)> = None;

        report.disposition = loop {
            if !self.pool.is_empty()
                && self
                    .pool
                    .snapshot()
                    .iter()
                    .all(|slot| excluded.contains(&slot.name))
            {
                break match last.take() {
                    Some((outcome, account)) => Disposition::Attempted { outcome, account },
                    None => Disposition::Exhausted,
                };
            }
            // Unsettled accounts remain but none is free right now.
            let Some(lease) = self.pool.lease_excluding(&excluded) else {
                if let Some((outcome, account)) = last.take() {
                    debug!(link = %link.url, account, outcome = %outcome.code(), "next slot not free");
                }
                break Disposition::NoSlot;
            };
            let account = lease.name().to_string();

            let step = if link.kind == LinkKind::Public && report.channel_id.is_none() {
                match self.resolve(&lease, &link, &mut report).await? {
                    Ok(channel) => {
                        if let Some(disposition) = self.channel_settled(channel).await? {
                            break disposition;
                        }
                        excluded.extend(self.cache.settled_accounts(channel).await?);
                        if excluded.contains(&account) {
                            continue;
                        }
                        self.attempt(&lease, &link, &mut report).await?
                    }
                    Err(outcome) => Step::Classified(outcome),
                }
            } else {
                self.attempt(&lease, &link, &mut report).await?
            };

            let outcome = match step {
                Step::Done(disposition) => break disposition,
                Step::Classified(outcome) => outcome,
            };
            self.apply(&lease, &link, &report, &outcome).await?;

            if matches!(outcome, Outcome::Blocked | Outcome::TooMany) {
                excluded.insert(account.clone());
                last = Some((outcome, account));
                continue;
            }
            break Disposition::Attempted { outcome, account };
        };

        Ok(report)
    }

    async fn channel_settled(&self, channel: ChannelId) -> Result<Option<Disposition>, MusterError> {
        if let Some(status) = self.cache.channel_final(channel).await? {
            return Ok(Some(Disposition::Cached { status }));
        }
        if let Some(until_ts) = self.cache.channel_backoff(channel).await? {
            debug!(channel_id = %channel, until_ts, "channel under flood backoff");
            return Ok(Some(Disposition::Deferred { until_ts }));
        }
        Ok(None)
    }

    /// One lookup call for a public link. The outer error is storage only.
    async fn resolve(
        &self,
        slot: &AccountSlot,
        link: &ParsedLink,
        report: &mut LinkReport,
    ) -> Result<Result<ChannelId, Outcome>, MusterError> {
        if !self.limiter.can_proceed(ActionKind::Resolve, None) {
            debug!(link = %link.url, "resolve rate limited");
            return Ok(Err(Outcome::TempRateLimit));
        }
        report.remote_calls += 1;
        match slot.session().resolve_entity(&link.url).await {
            Ok(entity) => {
                self.cache
                    .remember_resolution(link, entity.id, entity.title.as_deref())
                    .await?;
                report.channel_id = Some(entity.id);
                if report.title.is_none() {
                    report.title = entity.title;
                }
                Ok(Ok(entity.id))
            }
            Err(err) => {
                debug!(link = %link.url, account = %slot.name(), error = %err, "resolve failed");
                Ok(Err(classify_error(err)))
            }
        }
    }

    /// The single mutating call.
    async fn attempt(
        &self,
        slot: &AccountSlot,
        link: &ParsedLink,
        report: &mut LinkReport,
    ) -> Result<Step, MusterError> {
        if let Claim::Held { remaining } = self.dedup.claim(ActionKind::Join, link.target_key()) {
            debug!(link = %link.url, retry_in_secs = remaining.as_secs(), "identical attempt in window");
            return Ok(Step::Done(Disposition::Suppressed {
                retry_in: remaining,
            }));
        }
        if !self.limiter.can_proceed(ActionKind::Join, Some(slot.name())) {
            debug!(link = %link.url, account = %slot.name(), "join rate limited");
            return Ok(Step::Classified(Outcome::TempRateLimit));
        }

        report.remote_calls += 1;
        let outcome = match (link.kind, link.invite_hash.as_deref()) {
            (LinkKind::Invite, Some(hash)) => match slot.session().import_invite(hash).await {
                Ok(InviteReply::Joined { channel_id, title }) => {
                    report.channel_id.get_or_insert(channel_id);
                    if report.title.is_none() {
                        report.title = title;
                    }
                    Outcome::Joined
                }
                Ok(InviteReply::AlreadyMember { channel_id }) => {
                    if let Some(channel_id) = channel_id {
                        report.channel_id.get_or_insert(channel_id);
                    }
                    Outcome::Already
                }
                Ok(InviteReply::RequestPending) => Outcome::Requested,
                Err(err) => classify_error(err),
            },
            _ => {
                let Some(id) = report.channel_id else {
                    return Err(MusterError::Internal(format!(
                        "public join for {} without a resolved channel",
                        link.url
                    )));
                };
                let entity = ResolvedEntity {
                    id,
                    title: report.title.clone(),
                };
                match slot.session().join_public(&entity).await {
                    Ok(JoinReply::Joined) => Outcome::Joined,
                    Ok(JoinReply::AlreadyMember) => Outcome::Already,
                    Err(err) => classify_error(err),
                }
            }
        };
        Ok(Step::Classified(outcome))
    }

    /// Cache writes, slot cooldowns and holds that follow a classification.
    async fn apply(
        &self,
        lease: &Lease,
        link: &ParsedLink,
        report: &LinkReport,
        outcome: &Outcome,
    ) -> Result<(), MusterError> {
        let account = lease.name();
        self.cache
            .record(account, link, report.channel_id, report.title.as_deref(), outcome)
            .await?;

        match outcome {
            Outcome::Joined => {
                let secs = match link.kind {
                    LinkKind::Invite => self.settings.joined_cooldown_invite_secs,
                    LinkKind::Public => self.settings.joined_cooldown_public_secs,
                };
                lease.bump_cooldown(Duration::from_secs(secs));
                info!(link = %link.url, account, channel_id = ?report.channel_id, "joined");
            }
            Outcome::Requested => {
                lease.bump_cooldown(Duration::from_secs(self.settings.requested_cooldown_secs));
                info!(link = %link.url, account, "join request filed");
            }
            Outcome::FloodWait { seconds } => {
                lease.mark_flood(*seconds);
                if let Some(channel) = report.channel_id {
                    let until_ts = self.cache.set_channel_backoff(channel, *seconds).await?;
                    warn!(link = %link.url, channel_id = %channel, seconds, until_ts, "channel flood backoff");
                }
                self.persist_hold(account, *seconds, "flood_wait").await?;
            }
            Outcome::TooMany => {
                let days = self.settings.too_many_hold_days;
                lease.mark_limit(days);
                self.persist_hold(account, days.saturating_mul(86_400), "too_many")
                    .await?;
            }
            other => {
                debug!(link = %link.url, account, outcome = %other.code(), "attempt classified");
            }
        }

        if outcome.is_transient() || matches!(outcome, Outcome::Blocked | Outcome::TooMany) {
            self.dedup.forget(ActionKind::Join, link.target_key());
        }
        Ok(())
    }

    async fn persist_hold(&self, account: &str, secs: u64, reason: &str) -> Result<(), MusterError> {
        if !self.settings.persist_holds {
            return Ok(());
        }
        let until_ts = unix_now().saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
        holds::extend(self.cache.database(), account, until_ts, reason).await
    }
}

#[cfg(test)]
mod tests {
    use muster_config::model::BucketSpec;
    use muster_storage::queries::invites;
    use muster_test_utils::MockRemote;
    use tracing_test::traced_test;

    use super::*;

    async fn orchestrator(remote: MockRemote) -> (tempfile::TempDir, JoinOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("orch.db").to_str().unwrap())
            .await
            .unwrap();
        let session: Arc<dyn muster_core::RemoteChannelService> = Arc::new(remote);
        let pool = Arc::new(AccountPool::new(vec![("acc1".to_string(), session)]));
        let limiter = RateLimiter::new(std::iter::empty(), BucketSpec::new(1000.0, 1000));
        let orchestrator = JoinOrchestrator::new(
            pool,
            Arc::new(ResultCache::new(db, &Default::default())),
            Arc::new(limiter),
            PoolConfig::default(),
            Duration::from_secs(600),
        );
        (dir, orchestrator)
    }

    #[traced_test]
    #[tokio::test]
    async fn flood_on_mapped_invite_backs_off_channel() {
        let remote = MockRemote::new().with_invite(Err(RemoteError::FloodWait { seconds: 30 }));
        let (_dir, orch) = orchestrator(remote).await;
        invites::upsert_mapping(
            orch.cache().database(),
            "AbCdEfGhIjKlMnOp",
            ChannelId(77),
            None,
            unix_now(),
        )
        .await
        .unwrap();

        let report = orch.process("https://t.me/+AbCdEfGhIjKlMnOp").await.unwrap();
        assert_eq!(
            report.disposition,
            Disposition::Attempted {
                outcome: Outcome::FloodWait { seconds: 30 },
                account: "acc1".into()
            }
        );
        assert!(orch.cache().channel_backoff(ChannelId(77)).await.unwrap().is_some());
        assert!(logs_contain("channel flood backoff"));

        // The slot is held and the claim was released for a later retry.
        assert!(orch.pool().lease().is_none());
        assert!(orch.anti_dup().is_empty());
    }

    #[tokio::test]
    async fn rate_limited_join_makes_no_call() {
        let (_dir, orch) = orchestrator(MockRemote::new()).await;
        let orch = JoinOrchestrator {
            limiter: Arc::new(RateLimiter::new(
                [(ActionKind::Join, BucketSpec::new(0.0, 0))],
                BucketSpec::new(1000.0, 1000),
            )),
            ..orch
        };
        let report = orch.process("https://t.me/+AbCdEfGhIjKlMnOp").await.unwrap();
        assert_eq!(report.status_code(), "temp_rate_limit");
        assert_eq!(report.remote_calls, 0);
    }

    #[test]
    fn remote_errors_map_to_outcomes() {
        assert_eq!(classify_error(RemoteError::NotFound), Outcome::Invalid);
        assert_eq!(classify_error(RemoteError::InvalidOrExpired), Outcome::Invalid);
        assert_eq!(classify_error(RemoteError::PrivateOrBanned), Outcome::Private);
        assert_eq!(classify_error(RemoteError::Blocked), Outcome::Blocked);
        assert_eq!(classify_error(RemoteError::TooManyChannels), Outcome::TooMany);
        assert_eq!(
            classify_error(RemoteError::FloodWait { seconds: 12 }),
            Outcome::FloodWait { seconds: 12 }
        );
        assert_eq!(
            classify_error(RemoteError::Other("RPC timeout".into())),
            Outcome::Error {
                message: "RPC timeout".into()
            }
        );
    }

    #[test]
    fn report_codes() {
        let mut report = LinkReport::new("  https://t.me/alpha_chan ");
        assert_eq!(report.url(), "https://t.me/alpha_chan");
        report.disposition = Disposition::Attempted {
            outcome: Outcome::FloodWait { seconds: 30 },
            account: "acc1".into(),
        };
        assert_eq!(report.status_code(), "flood_wait");
        assert_eq!(report.status_detail().as_deref(), Some("30s"));
        assert_eq!(report.account(), Some("acc1"));

        report.disposition = Disposition::Cached {
            status: MembershipStatus::Joined,
        };
        assert_eq!(report.status_code(), "cached");
        assert_eq!(report.status_detail().as_deref(), Some("joined"));
        assert_eq!(report.account(), None);
    }
}
