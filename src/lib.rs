//! xscout - reply-opportunity discovery for X
//!
//! Scrapes X pages through a browser page pool, extracts root tweets from
//! the rendered DOM, filters and scores them, and keeps a `SQLite` queue of
//! reply opportunities and discovered accounts.
//!
//! # Modules
//!
//! - [`browser`] - Page pool traits, Browserless and snapshot pools
//! - [`extract`] - DOM extraction with ordered selector strategies
//! - [`filter`] - Eligibility rules for extracted tweets
//! - [`judge`] - Health relevance judge and keyword fallback
//! - [`scoring`] - Tiers, opportunity score, momentum, expiry
//! - [`storage`] - `SQLite` storage layer
//! - [`discovery`] - The orchestrator tying the above together

pub mod browser;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod filter;
pub mod judge;
pub mod logging;
pub mod model;
pub mod parser;
pub mod scoring;
pub mod storage;

pub use cli::*;
pub use discovery::{Discovery, Harvest};
pub use error::{Result, ScoutError};
pub use model::*;
pub use storage::Storage;

use chrono::{DateTime, Utc};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "xscout.db";

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// Get the default data directory for xscout
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("xscout")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an unsigned integer with thousands separators.
#[must_use]
pub fn format_number_u64(value: u64) -> String {
    let mut out = String::with_capacity(24);

    for (idx, ch) in value.to_string().chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    out.chars().rev().collect()
}

/// Format a time-until as "in 5h", "in 40m", or "expired".
#[must_use]
pub fn format_expiry_with_base(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at.signed_duration_since(now);
    if remaining.num_seconds() <= 0 {
        "expired".to_string()
    } else if remaining.num_minutes() < 60 {
        format!("in {}m", remaining.num_minutes().max(1))
    } else {
        format!("in {}h", remaining.num_hours())
    }
}

/// Format minutes since posting as "just now", "Nm ago", or "Nh ago".
#[must_use]
pub fn format_age_minutes(minutes: i64) -> String {
    match minutes {
        ..=0 => "just now".to_string(),
        1..=59 => format!("{minutes}m ago"),
        _ => format!("{}h ago", minutes / 60),
    }
}

/// Escape text for CSV by sanitizing newlines and quotes.
#[must_use]
pub fn csv_escape_text(text: &str) -> String {
    text.replace('"', "\"\"").replace(['\n', '\r'], " ")
}

/// Truncate to at most `max_chars` characters, ending with "..." when cut.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
