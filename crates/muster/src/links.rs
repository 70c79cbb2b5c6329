// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `muster links parse` command implementation.

use muster_engine::ParsedLink;
use muster_engine::links::{extract_links, is_valid_invite_hash, parse};

/// Parse every link in `text` and print it with its kind.
pub fn run_parse(text: &str, json: bool, use_color: bool) {
    let parsed = parse_all(text);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }
    if parsed.is_empty() {
        println!("no joinable links found");
        return;
    }
    for link in &parsed {
        let well_formed = link.invite_hash.as_deref().is_none_or(is_valid_invite_hash);
        let kind = link.kind.to_string();
        if use_color {
            use colored::Colorize;
            let marker = if well_formed { "✓".green() } else { "✗".red() };
            println!("  {marker} {:<7} {}", kind.cyan(), link.url);
        } else {
            let marker = if well_formed { "[OK]" } else { "[BAD]" };
            println!("  {marker} {kind:<7} {}", link.url);
        }
    }
}

fn parse_all(text: &str) -> Vec<ParsedLink> {
    extract_links(text).iter().filter_map(|url| parse(url)).collect()
}
