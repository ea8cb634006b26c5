//! Parsing of scraped values.
//!
//! X renders engagement counts as abbreviated strings ("1.2K", "3,401", "5M")
//! and timestamps as ISO 8601 `datetime` attributes. Status links look like
//! `/<handle>/status/<id>` with optional suffixes (`/photo/1`, `/analytics`).

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Base URL used to absolutize status links.
pub const X_BASE_URL: &str = "https://x.com";

static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)([KkMm]?)$").expect("count regex"));

static STATUS_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?(?:x|twitter)\.com)?/([A-Za-z0-9_]{1,15})/status/(\d+)")
        .expect("status link regex")
});

static PROFILE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?(?:x|twitter)\.com)?/([A-Za-z0-9_]{1,15})/?$")
        .expect("profile link regex")
});

/// Leading count in strings like "12.3K Followers" or "1,024 posts".
static LEADING_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?\s*[KkMm]?)\b").expect("leading count regex"));

/// Paths under x.com that look like profiles but are app routes.
const RESERVED_PATHS: &[&str] = &[
    "home",
    "explore",
    "search",
    "notifications",
    "messages",
    "settings",
    "i",
    "compose",
    "login",
    "signup",
    "tos",
    "privacy",
    "hashtag",
];

/// Parse an abbreviated engagement count into an integer.
///
/// Accepts `<number>[KkMm]?` after stripping commas and whitespace.
/// Returns `None` for anything else (empty strings included).
#[must_use]
pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let caps = COUNT_RE.captures(&cleaned)?;
    let number: f64 = caps[1].parse().ok()?;
    let multiplier = match &caps[2] {
        "K" | "k" => 1_000.0,
        "M" | "m" => 1_000_000.0,
        _ => 1.0,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = (number * multiplier).round() as u64;
    Some(value)
}

/// Find the first count embedded in free text ("1,234 Likes. Like").
#[must_use]
pub fn parse_leading_count(text: &str) -> Option<u64> {
    LEADING_COUNT_RE
        .captures_iter(text)
        .find_map(|caps| parse_count(&caps[1]))
}

/// Parse a `datetime` attribute value.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole minutes between `posted_at` and `now`, never negative.
#[must_use]
pub fn minutes_since(posted_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(posted_at).num_minutes().max(0)
}

/// A parsed status link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLink {
    pub author: String,
    pub tweet_id: String,
}

impl StatusLink {
    /// Canonical absolute URL for the status.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{X_BASE_URL}/{}/status/{}", self.author, self.tweet_id)
    }
}

/// Parse `/<handle>/status/<id>` (relative or absolute).
#[must_use]
pub fn parse_status_link(href: &str) -> Option<StatusLink> {
    let caps = STATUS_LINK_RE.captures(href.trim())?;
    let author = caps[1].to_string();
    if is_reserved_path(&author) {
        return None;
    }
    Some(StatusLink {
        author,
        tweet_id: caps[2].to_string(),
    })
}

/// Parse a bare profile link (`/handle`) into the handle.
#[must_use]
pub fn parse_profile_link(href: &str) -> Option<String> {
    let caps = PROFILE_LINK_RE.captures(href.trim())?;
    let handle = &caps[1];
    if is_reserved_path(handle) {
        return None;
    }
    Some(handle.to_string())
}

/// Normalize a user-supplied handle: strip `@`, whitespace, and URL prefixes.
#[must_use]
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('@');
    parse_profile_link(trimmed).unwrap_or_else(|| trimmed.to_string())
}

fn is_reserved_path(segment: &str) -> bool {
    RESERVED_PATHS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(segment))
}
