//! DOM extraction for rendered X pages.
//!
//! X ships no stable markup contract, so every field is pulled with an
//! ordered list of strategies that are tried until one yields a value. When a
//! selector breaks, add a strategy to the front of the relevant list rather
//! than editing the others.
//!
//! Extraction is best effort: an article that lacks a required field is
//! dropped with a debug log, never reported as an error.

use crate::model::RawTweet;
use crate::parser::{
    X_BASE_URL, minutes_since, parse_leading_count, parse_profile_link, parse_status_link,
    parse_timestamp,
};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Tweets shorter than this (in chars) are never useful reply targets.
pub const MIN_CONTENT_CHARS: usize = 20;

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css}: {e:?}"))
}

static TWEET_ARTICLE: Lazy<Selector> = Lazy::new(|| sel(r#"article[data-testid="tweet"]"#));
static ANY_ARTICLE: Lazy<Selector> = Lazy::new(|| sel("article"));
static TIME: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static TWEET_TEXT: Lazy<Selector> = Lazy::new(|| sel(r#"[data-testid="tweetText"]"#));
static STATUS_ANCHOR: Lazy<Selector> = Lazy::new(|| sel(r#"a[href*="/status/"]"#));
static ANY_ANCHOR: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static ROLE_LINK: Lazy<Selector> = Lazy::new(|| sel(r#"a[role="link"][href]"#));
static USER_NAME_BLOCK: Lazy<Selector> = Lazy::new(|| sel(r#"[data-testid="User-Name"]"#));
static SPAN: Lazy<Selector> = Lazy::new(|| sel("span"));
static SOCIAL_CONTEXT: Lazy<Selector> = Lazy::new(|| sel(r#"[data-testid="socialContext"]"#));
static BLOCK_TEXT: Lazy<Selector> = Lazy::new(|| sel("div, span"));
static REPLY_BUTTON: Lazy<Selector> = Lazy::new(|| sel(r#"[data-testid="reply"]"#));
static LIKE_BUTTON: Lazy<Selector> =
    Lazy::new(|| sel(r#"[data-testid="like"], [data-testid="unlike"]"#));
static ARIA_LABELLED: Lazy<Selector> = Lazy::new(|| sel("[aria-label]"));
static ACTION_GROUP: Lazy<Selector> = Lazy::new(|| sel(r#"[role="group"]"#));
static SVG: Lazy<Selector> = Lazy::new(|| sel("svg"));

static FOLLOWERS_LINK: Lazy<Selector> =
    Lazy::new(|| sel(r#"a[href$="/verified_followers"], a[href$="/followers"]"#));
static FOLLOWING_LINK: Lazy<Selector> = Lazy::new(|| sel(r#"a[href$="/following"]"#));
static USER_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| sel(r#"[data-testid="UserDescription"]"#));
static VERIFIED_BADGE: Lazy<Selector> = Lazy::new(|| {
    sel(r#"[data-testid="UserName"] [data-testid="icon-verified"], [data-testid="UserName"] svg[aria-label="Verified account"]"#)
});
static PROFILE_HEADER: Lazy<Selector> = Lazy::new(|| sel(r#"[data-testid="UserName"]"#));
static LOGGED_IN_MARKER: Lazy<Selector> = Lazy::new(|| {
    sel(r#"[data-testid="SideNav_AccountSwitcher_Button"], [data-testid="AppTabBar_Profile_Link"]"#)
});
static LOGGED_OUT_MARKER: Lazy<Selector> =
    Lazy::new(|| sel(r#"[data-testid="loginButton"], a[href="/login"], a[href="/i/flow/login"]"#));

static LIKES_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?\s*[km]?)\s+likes?\b").expect("likes label regex")
});
static REPLIES_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?\s*[km]?)\s+repl(?:y|ies)\b").expect("replies label regex")
});
static POSTS_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?\s*[km]?)\s+(?:posts|tweets)\b").expect("posts count regex")
});

/// Per-call extraction limits.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Maximum number of article nodes inspected, in document order.
    pub max_articles: usize,
    /// Tweets at or beyond this age are dropped.
    pub max_age: Duration,
    /// Reference time for age computation.
    pub now: DateTime<Utc>,
}

impl ExtractOptions {
    #[must_use]
    pub fn new(max_articles: usize, max_age_hours: u32) -> Self {
        Self {
            max_articles,
            max_age: Duration::hours(i64::from(max_age_hours)),
            now: Utc::now(),
        }
    }

    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Engagement metric pulled from the action bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Replies,
    Likes,
}

impl Metric {
    fn button(self) -> &'static Selector {
        match self {
            Self::Replies => &REPLY_BUTTON,
            Self::Likes => &LIKE_BUTTON,
        }
    }

    fn label_re(self) -> &'static Regex {
        match self {
            Self::Replies => &REPLIES_LABEL_RE,
            Self::Likes => &LIKES_LABEL_RE,
        }
    }

    /// Position of the metric's icon in the action bar (reply, repost, like, ...).
    const fn icon_index(self) -> usize {
        match self {
            Self::Replies => 0,
            Self::Likes => 2,
        }
    }
}

type UsernameStrategy = fn(&ElementRef<'_>) -> Option<String>;
type CountStrategy = fn(&ElementRef<'_>, Metric) -> Option<u64>;

/// Username strategies, most specific first.
const USERNAME_STRATEGIES: &[(&str, UsernameStrategy)] = &[
    ("user_name_block", username_from_user_name_block),
    ("profile_link", username_from_profile_link),
    ("status_link", username_from_status_link),
];

/// Engagement strategies, most specific first.
const COUNT_STRATEGIES: &[(&str, CountStrategy)] = &[
    ("test_id", count_from_test_id),
    ("aria_label", count_from_aria_label),
    ("icon_sibling", count_from_icon_sibling),
];

/// Extract root tweets from a rendered timeline or search page.
#[must_use]
pub fn extract_tweets(html: &str, opts: &ExtractOptions) -> Vec<RawTweet> {
    let document = Html::parse_document(html);
    let mut articles: Vec<ElementRef<'_>> = document.select(&TWEET_ARTICLE).collect();
    if articles.is_empty() {
        articles = document.select(&ANY_ARTICLE).collect();
    }

    let mut seen = HashSet::new();
    let mut tweets = Vec::new();
    let mut dropped = 0usize;

    for article in articles.into_iter().take(opts.max_articles) {
        match extract_article(&article, opts) {
            Some(tweet) => {
                if seen.insert(tweet.tweet_id.clone()) {
                    tweets.push(tweet);
                }
            }
            None => dropped += 1,
        }
    }

    debug!(
        extracted = tweets.len(),
        dropped,
        max_articles = opts.max_articles,
        "Extracted tweets from page"
    );
    tweets
}

fn extract_article(article: &ElementRef<'_>, opts: &ExtractOptions) -> Option<RawTweet> {
    // Timestamp first: cheapest way to discard most of a busy timeline.
    let posted_at = article
        .select(&TIME)
        .find_map(|t| t.value().attr("datetime").and_then(parse_timestamp))?;
    let age = opts.now.signed_duration_since(posted_at);
    if age >= opts.max_age {
        trace!(age_minutes = age.num_minutes(), "Skipping stale tweet");
        return None;
    }

    if is_reply(article) {
        trace!("Skipping reply tweet");
        return None;
    }

    let content = tweet_text(article);
    if content.chars().count() <= MIN_CONTENT_CHARS {
        trace!(chars = content.chars().count(), "Skipping short tweet");
        return None;
    }

    let Some(link) = status_link(article) else {
        debug!("Dropping article without status link");
        return None;
    };

    let Some(author) = USERNAME_STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            strategy(article).inspect(|_| trace!(strategy = name, "Resolved author"))
        })
    else {
        debug!(tweet_id = %link.tweet_id, "Dropping article without author");
        return None;
    };

    Some(RawTweet {
        tweet_url: link.url(),
        tweet_id: link.tweet_id,
        tweet_content: content,
        tweet_author: author,
        like_count: engagement_count(article, Metric::Likes),
        reply_count: engagement_count(article, Metric::Replies),
        posted_minutes_ago: minutes_since(posted_at, opts.now),
        tweet_posted_at: posted_at,
    })
}

/// Resolve a metric through the strategy chain; missing counts are zero.
#[must_use]
pub fn engagement_count(article: &ElementRef<'_>, metric: Metric) -> u64 {
    COUNT_STRATEGIES
        .iter()
        .find_map(|(_, strategy)| strategy(article, metric))
        .unwrap_or(0)
}

fn tweet_text(article: &ElementRef<'_>) -> String {
    article
        .select(&TWEET_TEXT)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Prefer the permalink wrapping the timestamp, then any status link.
fn status_link(article: &ElementRef<'_>) -> Option<crate::parser::StatusLink> {
    let from_time = article.select(&TIME).find_map(|time| {
        time.ancestors()
            .filter_map(ElementRef::wrap)
            .take_while(|el| el.id() != article.id())
            .find(|el| el.value().name() == "a")
            .and_then(|a| a.value().attr("href"))
            .and_then(parse_status_link)
    });
    from_time.or_else(|| {
        article
            .select(&STATUS_ANCHOR)
            .find_map(|a| a.value().attr("href").and_then(parse_status_link))
    })
}

/// True for the tweet text node, anything inside it, and any wrapper
/// holding it. The text of all of these starts with the tweet body.
fn overlaps_tweet_text(el: &ElementRef<'_>) -> bool {
    std::iter::once(**el)
        .chain(el.ancestors())
        .filter_map(ElementRef::wrap)
        .any(|node| node.value().attr("data-testid") == Some("tweetText"))
        || el.select(&TWEET_TEXT).next().is_some()
}

/// Replies carry a "Replying to @x" marker above the tweet text.
fn is_reply(article: &ElementRef<'_>) -> bool {
    let marker = |el: &ElementRef<'_>| {
        el.text()
            .collect::<String>()
            .trim_start()
            .to_lowercase()
            .starts_with("replying to")
    };

    if article.select(&SOCIAL_CONTEXT).any(|el| marker(&el)) {
        return true;
    }
    article
        .select(&BLOCK_TEXT)
        .filter(|el| !overlaps_tweet_text(el))
        .any(|el| marker(&el))
}

fn username_from_user_name_block(article: &ElementRef<'_>) -> Option<String> {
    let block = article.select(&USER_NAME_BLOCK).next()?;
    block
        .select(&SPAN)
        .find_map(|span| {
            let text = span.text().collect::<String>();
            let handle = text.trim().strip_prefix('@')?;
            (!handle.is_empty() && !handle.contains(char::is_whitespace))
                .then(|| handle.to_string())
        })
        .or_else(|| {
            block
                .select(&ANY_ANCHOR)
                .find_map(|a| a.value().attr("href").and_then(parse_profile_link))
        })
}

fn username_from_profile_link(article: &ElementRef<'_>) -> Option<String> {
    article
        .select(&ROLE_LINK)
        .find_map(|a| a.value().attr("href").and_then(parse_profile_link))
}

fn username_from_status_link(article: &ElementRef<'_>) -> Option<String> {
    article
        .select(&ANY_ANCHOR)
        .find_map(|a| a.value().attr("href").and_then(parse_status_link))
        .map(|link| link.author)
}

fn count_from_test_id(article: &ElementRef<'_>, metric: Metric) -> Option<u64> {
    article.select(metric.button()).find_map(|button| {
        let text = button.text().collect::<String>();
        parse_leading_count(text.trim())
    })
}

fn count_from_aria_label(article: &ElementRef<'_>, metric: Metric) -> Option<u64> {
    let from_buttons = article.select(metric.button()).find_map(|button| {
        button
            .value()
            .attr("aria-label")
            .and_then(parse_leading_count)
    });
    from_buttons.or_else(|| {
        article.select(&ARIA_LABELLED).find_map(|el| {
            let label = el.value().attr("aria-label")?;
            let caps = metric.label_re().captures(label)?;
            parse_leading_count(&caps[1])
        })
    })
}

fn count_from_icon_sibling(article: &ElementRef<'_>, metric: Metric) -> Option<u64> {
    let group = article.select(&ACTION_GROUP).next()?;
    let icon = group.select(&SVG).nth(metric.icon_index())?;
    // The count lives in a span next to the icon's wrapper; walk up until
    // some ancestor below the action bar carries digits.
    icon.ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|el| el.id() != group.id())
        .take(3)
        .find_map(|el| parse_leading_count(el.text().collect::<String>().trim()))
}

/// Profile header data scraped from an account page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub username: String,
    pub follower_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub bio: String,
    pub verified: bool,
}

/// Extract profile header data. Returns `None` when the follower count is
/// missing, which means the profile did not render.
#[must_use]
pub fn extract_profile(html: &str, username: &str) -> Option<ProfileSnapshot> {
    let document = Html::parse_document(html);

    let count_in = |selector: &Selector| {
        document
            .select(selector)
            .find_map(|a| parse_leading_count(a.text().collect::<String>().trim()))
    };

    let follower_count = count_in(&FOLLOWERS_LINK)?;
    let following_count = count_in(&FOLLOWING_LINK).unwrap_or(0);

    let header_text = document
        .select(&PROFILE_HEADER)
        .next()
        .and_then(|el| el.parent().and_then(ElementRef::wrap))
        .map_or_else(
            || document.root_element().text().collect::<Vec<_>>().join(" "),
            |el| el.text().collect::<Vec<_>>().join(" "),
        );
    let posts_in = |text: &str| {
        POSTS_COUNT_RE
            .captures(text)
            .and_then(|caps| parse_leading_count(&caps[1]))
    };
    let tweet_count = posts_in(&header_text)
        .or_else(|| posts_in(&document.root_element().text().collect::<Vec<_>>().join(" ")))
        .unwrap_or(0);

    let bio = document
        .select(&USER_DESCRIPTION)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    Some(ProfileSnapshot {
        username: username.to_string(),
        follower_count,
        following_count,
        tweet_count,
        bio,
        verified: document.select(&VERIFIED_BADGE).next().is_some(),
    })
}

/// Best-effort session check on a rendered page.
///
/// `Some(true)` when a logged-in marker is present, `Some(false)` when a login
/// prompt is present, `None` when neither shows up.
#[must_use]
pub fn session_state(html: &str) -> Option<bool> {
    let document = Html::parse_document(html);
    if document.select(&LOGGED_IN_MARKER).next().is_some() {
        Some(true)
    } else if document.select(&LOGGED_OUT_MARKER).next().is_some() {
        Some(false)
    } else {
        None
    }
}

/// Absolute profile URL for a handle.
#[must_use]
pub fn profile_url(username: &str) -> String {
    format!("{X_BASE_URL}/{username}")
}
