// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the muster configuration system.

use muster_config::diagnostic::ConfigError;
use muster_config::model::{DispatchMode, HeadOfLinePolicy, MusterConfig};
use muster_config::{load_and_validate_str, load_config_from_path, load_config_from_str};
use muster_core::ActionKind;

/// Valid TOML with fields from every section deserializes successfully.
#[test]
fn valid_toml_deserializes_into_muster_config() {
    let toml = r#"
[runtime]
log_level = "debug"

[storage]
database_path = "/tmp/muster-test.db"
wal_mode = false
busy_timeout_ms = 500

[accounts]
names = ["alpha", "beta"]

[pool]
joined_cooldown_invite_secs = 12
too_many_hold_days = 3

[queue]
max_retries = 7
jitter_fraction = 0.1

[cache]
negative_ttl_secs = 3600

[rate_limit.global]
join = { rate = 0.5, capacity = 4 }

[rate_limit.account]
rate = 1.0
capacity = 1

[scheduler]
head_of_line = "skip"

[throttle]
invite_delay_min_secs = 1.0
invite_delay_max_secs = 2.0

[worker]
fetch_limit = 20
dispatch = "scheduled"
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.runtime.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/muster-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.storage.busy_timeout_ms, 500);
    assert_eq!(config.accounts.names, vec!["alpha", "beta"]);
    assert_eq!(config.pool.joined_cooldown_invite_secs, 12);
    assert_eq!(config.pool.joined_cooldown_public_secs, 3);
    assert_eq!(config.pool.too_many_hold_days, 3);
    assert_eq!(config.queue.max_retries, 7);
    assert_eq!(config.cache.negative_ttl_secs, 3600);
    assert_eq!(config.rate_limit.global.join.capacity, 4);
    assert_eq!(config.rate_limit.global.resolve.capacity, 3);
    assert_eq!(config.rate_limit.account.rate, 1.0);
    assert_eq!(config.scheduler.head_of_line, HeadOfLinePolicy::Skip);
    assert_eq!(config.throttle.invite_delay_max_secs, 2.0);
    assert_eq!(config.worker.fetch_limit, 20);
    assert_eq!(config.worker.dispatch, DispatchMode::Scheduled);
}

#[test]
fn empty_toml_yields_defaults() {
    let config = load_config_from_str("").expect("empty TOML is valid");
    assert_eq!(config.queue.max_retries, 5);
    assert_eq!(config.queue.min_backoff_secs, 5);
    assert_eq!(config.cache.negative_ttl_secs, 48 * 3600);
    assert_eq!(config.throttle.anti_dup_window_secs, 600);
    assert_eq!(config.worker.idle_poll_secs, 3);
    assert_eq!(config.scheduler.head_of_line, HeadOfLinePolicy::Block);
    assert_eq!(config.worker.dispatch, DispatchMode::Direct);
    assert!(config.accounts.names.is_empty());
}

#[test]
fn global_buckets_lookup_by_action_kind() {
    let config = MusterConfig::default();
    let global = &config.rate_limit.global;
    assert_eq!(global.get(ActionKind::Join), Some(global.join));
    assert_eq!(global.get(ActionKind::Dispatch), Some(global.dispatch));
    assert_eq!(global.get(ActionKind::Other), None);
}

#[test]
fn unknown_field_in_queue_produces_suggestion() {
    let toml = r#"
[queue]
max_retires = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert!(key.ends_with("max_retires"), "got key {key}");
            assert_eq!(suggestion.as_deref(), Some("max_retries"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_top_level_section_rejected() {
    let err = load_config_from_str("[telemetry]\nenabled = true\n")
        .expect_err("unknown section must be rejected");
    assert!(format!("{err}").contains("telemetry"));
}

#[test]
fn wrong_type_produces_invalid_type() {
    let errors = load_and_validate_str("[worker]\nfetch_limit = \"many\"\n")
        .expect_err("string is not an integer");
    assert!(
        matches!(errors[0], ConfigError::InvalidType { .. }),
        "got {:?}",
        errors[0]
    );
}

#[test]
fn bad_enum_value_rejected() {
    assert!(load_config_from_str("[scheduler]\nhead_of_line = \"sometimes\"\n").is_err());
}

#[test]
fn semantic_errors_are_collected() {
    let toml = r#"
[accounts]
names = ["a", "a"]

[queue]
max_retries = 0

[rate_limit.account]
rate = -1.0
capacity = 1
"#;
    let errors = load_and_validate_str(toml).expect_err("invalid values");
    assert_eq!(errors.len(), 3, "got: {errors:?}");
    assert!(
        errors
            .iter()
            .all(|e| matches!(e, ConfigError::Validation { .. }))
    );
}

#[test]
fn env_overrides_file_values() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "muster.toml",
            "[queue]\nmax_retries = 4\n[worker]\nfetch_limit = 6\n",
        )?;
        jail.set_env("MUSTER_QUEUE_MAX_RETRIES", "9");

        let path = jail.directory().join("muster.toml");
        let config = load_config_from_path(&path).expect("config should load");
        assert_eq!(config.queue.max_retries, 9);
        assert_eq!(config.worker.fetch_limit, 6);
        Ok(())
    });
}
