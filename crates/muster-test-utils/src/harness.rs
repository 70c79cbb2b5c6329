// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Isolated engine stack for integration tests.
//!
//! `TestHarness` opens a fresh SQLite database in a temp directory, builds a
//! pool from named [`MockRemote`] sessions and wires the orchestrator, queue,
//! batch driver and worker over it. Delays and cooldowns default to zero and
//! rate limits are generous so tests run instantly; override anything with
//! [`TestHarnessBuilder::configure`].

use std::sync::Arc;

use muster_config::MusterConfig;
use muster_config::model::BucketSpec;
use muster_core::{MusterError, RemoteChannelService};
use muster_engine::{BatchDriver, JoinOrchestrator, QueueWorker, Throttle};
use muster_pool::AccountPool;
use muster_storage::{Database, RetryPolicy, TaskQueue};

use crate::mock_remote::MockRemote;

/// Configuration used by every harness unless overridden.
pub fn test_config() -> MusterConfig {
    let mut config = MusterConfig::default();
    config.pool.joined_cooldown_public_secs = 0;
    config.pool.joined_cooldown_invite_secs = 0;
    config.pool.requested_cooldown_secs = 0;

    let generous = BucketSpec::new(1000.0, 1000);
    config.rate_limit.global.join = generous;
    config.rate_limit.global.resolve = generous;
    config.rate_limit.global.fetch_info = generous;
    config.rate_limit.global.dispatch = generous;
    config.rate_limit.account = generous;

    config.throttle.public_delay_min_secs = 0.0;
    config.throttle.public_delay_max_secs = 0.0;
    config.throttle.invite_delay_min_secs = 0.0;
    config.throttle.invite_delay_max_secs = 0.0;
    config.throttle.local_pause_ms = 0;

    config.queue.jitter_fraction = 0.0;
    config.worker.idle_poll_secs = 1;
    config.worker.no_slot_poll_secs = 1;
    config
}

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    accounts: Vec<(String, Arc<MockRemote>)>,
    config: MusterConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            accounts: Vec::new(),
            config: test_config(),
        }
    }

    /// Add a pooled account backed by `remote`.
    pub fn account(mut self, name: &str, remote: MockRemote) -> Self {
        self.accounts.push((name.to_string(), Arc::new(remote)));
        self
    }

    /// Adjust the configuration before the stack is built.
    pub fn configure(mut self, f: impl FnOnce(&mut MusterConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub async fn build(self) -> Result<TestHarness, MusterError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| MusterError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("muster.db");

        let mut config = self.config;
        config.storage.database_path = db_path.to_string_lossy().to_string();
        config.accounts.names = self.accounts.iter().map(|(n, _)| n.clone()).collect();

        let db = Database::open_with_config(&config.storage).await?;

        let sessions: Vec<(String, Arc<dyn RemoteChannelService>)> = self
            .accounts
            .iter()
            .map(|(name, remote)| {
                let session: Arc<dyn RemoteChannelService> = remote.clone();
                (name.clone(), session)
            })
            .collect();
        let pool = Arc::new(AccountPool::new(sessions));
        let orchestrator = Arc::new(JoinOrchestrator::from_config(
            Arc::clone(&pool),
            db.clone(),
            &config,
        ));
        let queue = TaskQueue::new(db.clone(), RetryPolicy::from(&config.queue));

        Ok(TestHarness {
            config,
            db,
            pool,
            orchestrator,
            queue,
            remotes: self.accounts,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete engine stack over a temporary database.
pub struct TestHarness {
    pub config: MusterConfig,
    pub db: Database,
    pub pool: Arc<AccountPool>,
    pub orchestrator: Arc<JoinOrchestrator>,
    pub queue: TaskQueue,
    pub remotes: Vec<(String, Arc<MockRemote>)>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn batch_driver(&self) -> BatchDriver {
        BatchDriver::new(
            Arc::clone(&self.orchestrator),
            self.queue.clone(),
            Throttle::from_config(&self.config.throttle),
            self.config.queue.clone(),
        )
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            Arc::clone(&self.orchestrator),
            self.queue.clone(),
            Throttle::from_config(&self.config.throttle),
            &self.config,
        )
    }

    /// The mock behind account `name`.
    ///
    /// # Panics
    ///
    /// Panics if no such account was added.
    pub fn remote(&self, name: &str) -> &Arc<MockRemote> {
        self.remotes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
            .unwrap_or_else(|| panic!("no mock account named {name}"))
    }

    /// Remote calls across every account.
    pub fn total_remote_calls(&self) -> usize {
        self.remotes.iter().map(|(_, r)| r.total_calls()).sum()
    }
}
