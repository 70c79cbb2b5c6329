// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for muster.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use muster_core::ActionKind;
use serde::{Deserialize, Serialize};

/// Top-level muster configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MusterConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Account sessions placed in the pool.
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Slot cooldowns and holds.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Durable task queue retry policy.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Result cache expiry settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Token bucket settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Priority scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Inter-link delays and duplicate suppression.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Background queue worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("muster").join("muster.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("muster.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    3000
}

/// Account sessions placed in the pool, in round-robin order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AccountsConfig {
    #[serde(default)]
    pub names: Vec<String>,
}

/// Slot cooldown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Cooldown after a successful public join.
    #[serde(default = "default_joined_cooldown_public_secs")]
    pub joined_cooldown_public_secs: u64,

    /// Cooldown after a successful invite import.
    #[serde(default = "default_joined_cooldown_invite_secs")]
    pub joined_cooldown_invite_secs: u64,

    /// Cooldown after a join request was filed.
    #[serde(default = "default_requested_cooldown_secs")]
    pub requested_cooldown_secs: u64,

    /// Hold applied to an account that hit the joined-channel quota.
    #[serde(default = "default_too_many_hold_days")]
    pub too_many_hold_days: u64,

    /// Persist flood and quota holds so they survive a restart.
    #[serde(default = "default_persist_holds")]
    pub persist_holds: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            joined_cooldown_public_secs: default_joined_cooldown_public_secs(),
            joined_cooldown_invite_secs: default_joined_cooldown_invite_secs(),
            requested_cooldown_secs: default_requested_cooldown_secs(),
            too_many_hold_days: default_too_many_hold_days(),
            persist_holds: default_persist_holds(),
        }
    }
}

fn default_joined_cooldown_public_secs() -> u64 {
    3
}

fn default_joined_cooldown_invite_secs() -> u64 {
    8
}

fn default_requested_cooldown_secs() -> u64 {
    6
}

fn default_too_many_hold_days() -> u64 {
    2
}

fn default_persist_holds() -> bool {
    true
}

/// Task queue retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Retry cap for reasons without a dedicated cap.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry cap for flood waits.
    #[serde(default = "default_flood_max_retries")]
    pub flood_max_retries: u32,

    /// Retry cap for local rate-limit deferrals.
    #[serde(default = "default_temp_max_retries")]
    pub temp_max_retries: u32,

    /// Retry cap for unclassified remote errors.
    #[serde(default = "default_error_max_retries")]
    pub error_max_retries: u32,

    /// Floor applied to every backoff before jitter.
    #[serde(default = "default_min_backoff_secs")]
    pub min_backoff_secs: u64,

    /// Symmetric jitter fraction applied to backoffs (0.15 = +/-15%).
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    #[serde(default = "default_temp_rate_limit_backoff_secs")]
    pub temp_rate_limit_backoff_secs: u64,

    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_no_slot_backoff_secs")]
    pub no_slot_backoff_secs: u64,

    /// Terminal rows older than this are removed by the purge sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            flood_max_retries: default_flood_max_retries(),
            temp_max_retries: default_temp_max_retries(),
            error_max_retries: default_error_max_retries(),
            min_backoff_secs: default_min_backoff_secs(),
            jitter_fraction: default_jitter_fraction(),
            temp_rate_limit_backoff_secs: default_temp_rate_limit_backoff_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            no_slot_backoff_secs: default_no_slot_backoff_secs(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_flood_max_retries() -> u32 {
    50
}

fn default_temp_max_retries() -> u32 {
    40
}

fn default_error_max_retries() -> u32 {
    30
}

fn default_min_backoff_secs() -> u64 {
    5
}

fn default_jitter_fraction() -> f64 {
    0.15
}

fn default_temp_rate_limit_backoff_secs() -> u64 {
    45
}

fn default_error_backoff_secs() -> u64 {
    20
}

fn default_no_slot_backoff_secs() -> u64 {
    15
}

fn default_retention_days() -> u32 {
    7
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of a durable negative invite entry (48h).
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// Lifetime of an entry in the in-process negative mirror.
    #[serde(default = "default_mirror_ttl_secs")]
    pub mirror_ttl_secs: u64,

    /// Maximum entries held by the in-process negative mirror.
    #[serde(default = "default_mirror_capacity")]
    pub mirror_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            negative_ttl_secs: default_negative_ttl_secs(),
            mirror_ttl_secs: default_mirror_ttl_secs(),
            mirror_capacity: default_mirror_capacity(),
        }
    }
}

fn default_negative_ttl_secs() -> u64 {
    48 * 3600
}

fn default_mirror_ttl_secs() -> u64 {
    600
}

fn default_mirror_capacity() -> usize {
    4096
}

/// One token bucket: refill `rate` tokens per second up to `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BucketSpec {
    pub rate: f64,
    pub capacity: u32,
}

impl BucketSpec {
    pub const fn new(rate: f64, capacity: u32) -> Self {
        Self { rate, capacity }
    }
}

/// Global per-action buckets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalBuckets {
    #[serde(default = "default_join_bucket")]
    pub join: BucketSpec,

    #[serde(default = "default_resolve_bucket")]
    pub resolve: BucketSpec,

    #[serde(default = "default_fetch_info_bucket")]
    pub fetch_info: BucketSpec,

    #[serde(default = "default_dispatch_bucket")]
    pub dispatch: BucketSpec,
}

impl GlobalBuckets {
    /// The configured bucket for an action kind. `Other` has none.
    pub fn get(&self, kind: ActionKind) -> Option<BucketSpec> {
        match kind {
            ActionKind::Join => Some(self.join),
            ActionKind::Resolve => Some(self.resolve),
            ActionKind::FetchInfo => Some(self.fetch_info),
            ActionKind::Dispatch => Some(self.dispatch),
            ActionKind::Other => None,
        }
    }
}

impl Default for GlobalBuckets {
    fn default() -> Self {
        Self {
            join: default_join_bucket(),
            resolve: default_resolve_bucket(),
            fetch_info: default_fetch_info_bucket(),
            dispatch: default_dispatch_bucket(),
        }
    }
}

fn default_join_bucket() -> BucketSpec {
    BucketSpec::new(0.3, 2)
}

fn default_resolve_bucket() -> BucketSpec {
    BucketSpec::new(1.0, 3)
}

fn default_fetch_info_bucket() -> BucketSpec {
    BucketSpec::new(1.0, 5)
}

fn default_dispatch_bucket() -> BucketSpec {
    BucketSpec::new(0.5, 3)
}

/// Token bucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Buckets shared by every account, one per action kind.
    #[serde(default)]
    pub global: GlobalBuckets,

    /// Template for the bucket each account gets on first use.
    #[serde(default = "default_account_bucket")]
    pub account: BucketSpec,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: GlobalBuckets::default(),
            account: default_account_bucket(),
        }
    }
}

fn default_account_bucket() -> BucketSpec {
    BucketSpec::new(0.2, 2)
}

/// What `pop_ready` does when the head task is rate-limited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadOfLinePolicy {
    /// Return nothing; lower entries wait behind the head.
    #[default]
    Block,
    /// Look past a denied head for the next eligible entry.
    Skip,
}

/// Priority scheduler configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub head_of_line: HeadOfLinePolicy,
}

/// Inter-link pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    #[serde(default = "default_public_delay_min_secs")]
    pub public_delay_min_secs: f64,

    #[serde(default = "default_public_delay_max_secs")]
    pub public_delay_max_secs: f64,

    #[serde(default = "default_invite_delay_min_secs")]
    pub invite_delay_min_secs: f64,

    #[serde(default = "default_invite_delay_max_secs")]
    pub invite_delay_max_secs: f64,

    /// Pause after a link settled without a network call.
    #[serde(default = "default_local_pause_ms")]
    pub local_pause_ms: u64,

    /// Identical attempts within this window are suppressed.
    #[serde(default = "default_anti_dup_window_secs")]
    pub anti_dup_window_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            public_delay_min_secs: default_public_delay_min_secs(),
            public_delay_max_secs: default_public_delay_max_secs(),
            invite_delay_min_secs: default_invite_delay_min_secs(),
            invite_delay_max_secs: default_invite_delay_max_secs(),
            local_pause_ms: default_local_pause_ms(),
            anti_dup_window_secs: default_anti_dup_window_secs(),
        }
    }
}

fn default_public_delay_min_secs() -> f64 {
    2.0
}

fn default_public_delay_max_secs() -> f64 {
    4.0
}

fn default_invite_delay_min_secs() -> f64 {
    6.0
}

fn default_invite_delay_max_secs() -> f64 {
    10.0
}

fn default_local_pause_ms() -> u64 {
    80
}

fn default_anti_dup_window_secs() -> u64 {
    600
}

/// How the queue worker releases due items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Process due items in fetch order.
    #[default]
    Direct,
    /// Route due items through the priority scheduler.
    Scheduled,
}

/// Queue worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maximum due items fetched per pass.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,

    /// Sleep between passes when nothing is due.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: u64,

    /// Sleep between passes when no account slot is free.
    #[serde(default = "default_no_slot_poll_secs")]
    pub no_slot_poll_secs: u64,

    #[serde(default)]
    pub dispatch: DispatchMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            idle_poll_secs: default_idle_poll_secs(),
            no_slot_poll_secs: default_no_slot_poll_secs(),
            dispatch: DispatchMode::default(),
        }
    }
}

fn default_fetch_limit() -> u32 {
    12
}

fn default_idle_poll_secs() -> u64 {
    3
}

fn default_no_slot_poll_secs() -> u64 {
    5
}
