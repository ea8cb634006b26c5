//! Eligibility filter for extracted tweets.
//!
//! Rules run in a fixed order and a failing record is dropped silently;
//! filtering is not an error condition.

use crate::extract::MIN_CONTENT_CHARS;
use crate::model::RawTweet;
use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use tracing::debug;

/// Link shorteners and affiliate markers that signal promotional tweets.
const SPAM_MARKERS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "amzn.to",
    "linktr.ee",
    "shorturl.at",
    "rebrand.ly",
    "ow.ly",
    "cutt.ly",
    "?ref=",
    "&ref=",
    "affiliate",
    "discount code",
    "promo code",
    "use my code",
];

static SPAM_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(SPAM_MARKERS)
        .expect("spam marker automaton")
});

/// Caller-supplied thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Minimum like count (inclusive).
    pub min_likes: u64,
    /// Reply ceiling (exclusive); busier threads are saturated.
    pub max_replies: u64,
}

/// Which rule rejected a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    Spam,
    TooManyReplies,
    TooFewLikes,
    StartsWithMention,
}

/// Apply the rules in order, returning the first one that fails.
#[must_use]
pub fn check(tweet: &RawTweet, criteria: FilterCriteria) -> Option<Rejection> {
    let content = tweet.tweet_content.trim();
    if content.chars().count() <= MIN_CONTENT_CHARS {
        return Some(Rejection::TooShort);
    }
    if is_spam(content) {
        return Some(Rejection::Spam);
    }
    if tweet.reply_count >= criteria.max_replies {
        return Some(Rejection::TooManyReplies);
    }
    if tweet.like_count < criteria.min_likes {
        return Some(Rejection::TooFewLikes);
    }
    if content.starts_with('@') {
        return Some(Rejection::StartsWithMention);
    }
    None
}

/// Keep only eligible records, preserving input order.
#[must_use]
pub fn apply(tweets: Vec<RawTweet>, criteria: FilterCriteria) -> Vec<RawTweet> {
    let total = tweets.len();
    let kept: Vec<RawTweet> = tweets
        .into_iter()
        .filter(|t| match check(t, criteria) {
            Some(reason) => {
                debug!(tweet_id = %t.tweet_id, ?reason, "Filtered out");
                false
            }
            None => true,
        })
        .collect();
    debug!(total, kept = kept.len(), ?criteria, "Applied eligibility filter");
    kept
}

/// Whether the text carries a link shortener or affiliate marker.
#[must_use]
pub fn is_spam(text: &str) -> bool {
    SPAM_MATCHER.is_match(text)
}
