// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Link extraction and canonicalisation.
//!
//! Every link the engine handles is reduced to one of two canonical shapes
//! before it reaches the cache or the queue:
//!
//! - `https://t.me/<username>` for public channels (username lowercased,
//!   post ids dropped),
//! - `https://t.me/+<hash>` for private invites (hash kept verbatim).
//!
//! Canonical strings are what the in-batch duplicate check, the URL caches
//! and the queue's active-link uniqueness all key on.

use std::collections::HashSet;
use std::sync::LazyLock;

use muster_core::LinkKind;
use regex::Regex;
use serde::Serialize;

/// Characters that survive copy-paste from chat clients but mean nothing.
const INVISIBLE: &[char] = &[
    '\u{00a0}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{200e}', '\u{200f}', '\u{2060}', '\u{feff}',
];

const LEADING_JUNK: &[char] = &['(', '<', '[', '«', '"', '\''];

const TRAILING_JUNK: &[char] = &[
    '.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '»', '"', '\'',
];

/// Scheme prefixes, including the truncated forms produced by sloppy copying.
const SCHEMES: &[&str] = &["https://", "http://", "tps://", "ttp://", "tp://"];

const HOSTS: &[&str] = &["t.me", "telegram.me", "telegram.dog"];

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,32}$").unwrap());

static INVITE_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{16,24}$").unwrap());

/// Raw links, with or without a (possibly mangled) scheme.
static RAW_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:https?://|tps://|ttp://|tp://|www\.)?(?:t\.me|telegram\.me|telegram\.dog)/(?:\+[\w-]+|joinchat/[\w-]+|s/[A-Za-z0-9_]+|[A-Za-z0-9_]+(?:/\d+)?)",
    )
    .unwrap()
});

static MARKDOWN_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").unwrap());

static HTML_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// `@username` mentions not glued to a preceding word, path or address.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@/.])@([A-Za-z0-9_]{3,32})\b").unwrap()
});

/// A canonicalised link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLink {
    /// Canonical URL.
    pub url: String,
    pub kind: LinkKind,
    /// Set for public links.
    pub username: Option<String>,
    /// Set for invite links. May be malformed; see [`is_valid_invite_hash`].
    pub invite_hash: Option<String>,
}

impl ParsedLink {
    /// The key the anti-duplicate window and logs use for this link.
    pub fn target_key(&self) -> &str {
        self.invite_hash
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.url)
    }
}

/// Local format check for invite hashes; no network involved.
pub fn is_valid_invite_hash(hash: &str) -> bool {
    INVITE_HASH_RE.is_match(hash)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn clean(raw: &str) -> String {
    let visible: String = raw.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    visible
        .trim()
        .trim_start_matches(LEADING_JUNK)
        .trim_end_matches(TRAILING_JUNK)
        .trim()
        .to_string()
}

/// Parse one raw link or `@mention` into its canonical form.
///
/// Returns `None` for anything that is not a joinable link: other hosts,
/// private post links (`t.me/c/...`), bare hosts and malformed usernames.
/// Invite links with a malformed hash still parse, so the caller can report
/// them as invalid without a network call.
pub fn parse(raw: &str) -> Option<ParsedLink> {
    let s = clean(raw);
    if s.is_empty() {
        return None;
    }

    if let Some(name) = s.strip_prefix('@') {
        return public(name);
    }

    let rest = SCHEMES
        .iter()
        .find_map(|scheme| strip_prefix_ignore_case(&s, scheme))
        .unwrap_or(&s);
    let rest = strip_prefix_ignore_case(rest, "www.").unwrap_or(rest);

    let (host, path) = rest.split_once('/')?;
    if !HOSTS.iter().any(|h| host.eq_ignore_ascii_case(h)) {
        return None;
    }

    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|seg| !seg.is_empty());
    let first = segments.next()?;

    if let Some(hash) = first.strip_prefix('+') {
        return Some(invite(hash));
    }
    if first.eq_ignore_ascii_case("joinchat") {
        return Some(invite(segments.next().unwrap_or_default()));
    }
    if first.eq_ignore_ascii_case("c") {
        return None;
    }
    if first.eq_ignore_ascii_case("s") {
        return segments.next().and_then(public);
    }
    public(first)
}

fn public(name: &str) -> Option<ParsedLink> {
    if !USERNAME_RE.is_match(name) {
        return None;
    }
    let username = name.to_ascii_lowercase();
    Some(ParsedLink {
        url: format!("https://t.me/{username}"),
        kind: LinkKind::Public,
        username: Some(username),
        invite_hash: None,
    })
}

fn invite(hash: &str) -> ParsedLink {
    ParsedLink {
        url: format!("https://t.me/+{hash}"),
        kind: LinkKind::Invite,
        username: None,
        invite_hash: Some(hash.to_string()),
    }
}

/// Canonical URL for `raw`, if it parses.
pub fn normalize(raw: &str) -> Option<String> {
    parse(raw).map(|link| link.url)
}

/// Extract every joinable link from free text.
///
/// Picks up raw links, Markdown `[label](url)` targets, HTML `<a href>`
/// targets and `@username` mentions. Results are canonical, de-duplicated
/// and ordered by first appearance.
pub fn extract_links(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, &str)> = Vec::new();

    for caps in MARKDOWN_LINK_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            found.push((m.start(), m.as_str()));
        }
    }
    for caps in HTML_LINK_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            found.push((m.start(), m.as_str()));
        }
    }
    for m in RAW_LINK_RE.find_iter(text) {
        found.push((m.start(), m.as_str()));
    }
    for caps in MENTION_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            // Include the '@' so parse() treats it as a mention.
            found.push((m.start() - 1, &text[m.start() - 1..m.end()]));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter_map(|(_, candidate)| normalize(candidate))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
