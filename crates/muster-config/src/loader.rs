// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./muster.toml` > `~/.config/muster/muster.toml` > `/etc/muster/muster.toml`
//! with environment variable overrides via `MUSTER_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::MusterConfig;

/// Top-level sections that environment variables may address.
///
/// Longest names first so `rate_limit_` wins over any shorter prefix.
const ENV_SECTIONS: &[&str] = &[
    "rate_limit",
    "scheduler",
    "throttle",
    "accounts",
    "runtime",
    "storage",
    "worker",
    "queue",
    "cache",
    "pool",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/muster/muster.toml` (system-wide)
/// 3. `~/.config/muster/muster.toml` (user XDG config)
/// 4. `./muster.toml` (local directory)
/// 5. `MUSTER_*` environment variables
pub fn load_config() -> Result<MusterConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<MusterConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MusterConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MusterConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MusterConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MusterConfig::default()))
        .merge(Toml::file("/etc/muster/muster.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("muster/muster.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("muster.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")`: keys such as
/// `MUSTER_QUEUE_MAX_RETRIES` must become `queue.max_retries`, not
/// `queue.max.retries`.
fn env_provider() -> Env {
    Env::prefixed("MUSTER_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env key to a dotted config path.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
