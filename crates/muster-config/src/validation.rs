// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express: ordered delay ranges,
//! bucket shapes, unique account names. All failures are collected.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{BucketSpec, MusterConfig};

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns every failure found rather than stopping at the first.
pub fn validate_config(config: &MusterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    let mut seen = HashSet::new();
    for (i, name) in config.accounts.names.iter().enumerate() {
        if name.trim().is_empty() {
            errors.push(ConfigError::validation(format!(
                "accounts.names[{i}] must not be empty"
            )));
        } else if !seen.insert(name.as_str()) {
            errors.push(ConfigError::validation(format!(
                "duplicate account name `{name}` in accounts.names"
            )));
        }
    }

    let q = &config.queue;
    for (key, value) in [
        ("max_retries", q.max_retries),
        ("flood_max_retries", q.flood_max_retries),
        ("temp_max_retries", q.temp_max_retries),
        ("error_max_retries", q.error_max_retries),
    ] {
        if value < 1 {
            errors.push(ConfigError::validation(format!(
                "queue.{key} must be at least 1, got {value}"
            )));
        }
    }
    if !(0.0..1.0).contains(&q.jitter_fraction) {
        errors.push(ConfigError::validation(format!(
            "queue.jitter_fraction must be in [0, 1), got {}",
            q.jitter_fraction
        )));
    }

    if config.cache.mirror_capacity < 1 {
        errors.push(ConfigError::validation(
            "cache.mirror_capacity must be at least 1",
        ));
    }

    let global = &config.rate_limit.global;
    for (key, spec) in [
        ("rate_limit.global.join", global.join),
        ("rate_limit.global.resolve", global.resolve),
        ("rate_limit.global.fetch_info", global.fetch_info),
        ("rate_limit.global.dispatch", global.dispatch),
        ("rate_limit.account", config.rate_limit.account),
    ] {
        check_bucket(key, spec, &mut errors);
    }

    let t = &config.throttle;
    check_range(
        "throttle.public_delay",
        t.public_delay_min_secs,
        t.public_delay_max_secs,
        &mut errors,
    );
    check_range(
        "throttle.invite_delay",
        t.invite_delay_min_secs,
        t.invite_delay_max_secs,
        &mut errors,
    );

    if config.worker.fetch_limit < 1 {
        errors.push(ConfigError::validation(
            "worker.fetch_limit must be at least 1",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_bucket(key: &str, spec: BucketSpec, errors: &mut Vec<ConfigError>) {
    if spec.capacity < 1 {
        errors.push(ConfigError::validation(format!(
            "{key}.capacity must be at least 1"
        )));
    }
    if !spec.rate.is_finite() || spec.rate < 0.0 {
        errors.push(ConfigError::validation(format!(
            "{key}.rate must be a non-negative number, got {}",
            spec.rate
        )));
    }
}

fn check_range(key: &str, min: f64, max: f64, errors: &mut Vec<ConfigError>) {
    if min < 0.0 || max < min {
        errors.push(ConfigError::validation(format!(
            "{key}_min_secs ({min}) must be non-negative and not exceed {key}_max_secs ({max})"
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&MusterConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_failure() {
        let mut config = MusterConfig::default();
        config.storage.database_path = "  ".into();
        config.queue.jitter_fraction = 1.5;
        config.rate_limit.global.join.capacity = 0;
        config.throttle.invite_delay_min_secs = 12.0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "got: {errors:?}");
    }

    #[test]
    fn duplicate_account_names_rejected() {
        let mut config = MusterConfig::default();
        config.accounts.names = vec!["a".into(), "b".into(), "a".into()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("duplicate account name `a`"));
    }
}
