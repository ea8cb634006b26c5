//! Data models for discovered accounts and reply opportunities.
//!
//! Row shapes mirror the storage tables; tiers are derived labels that are
//! recomputed on every discovery run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an account entered the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Hashtag,
    Network,
    Content,
    FollowerOverlap,
}

impl DiscoveryMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hashtag => "hashtag",
            Self::Network => "network",
            Self::Content => "content",
            Self::FollowerOverlap => "follower_overlap",
        }
    }
}

impl FromStr for DiscoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashtag" => Ok(Self::Hashtag),
            "network" => Ok(Self::Network),
            "content" => Ok(Self::Content),
            "follower_overlap" => Ok(Self::FollowerOverlap),
            other => Err(format!("Unknown discovery method: {other}")),
        }
    }
}

/// An account scraped from X, kept indefinitely for future discovery cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredAccount {
    pub username: String,
    pub follower_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub bio: String,
    pub verified: bool,
    pub discovery_method: DiscoveryMethod,
    pub discovery_date: DateTime<Utc>,
}

/// A tweet as pulled out of the rendered DOM, before any scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTweet {
    pub tweet_id: String,
    pub tweet_url: String,
    pub tweet_content: String,
    pub tweet_author: String,
    pub like_count: u64,
    pub reply_count: u64,
    pub posted_minutes_ago: i64,
    pub tweet_posted_at: DateTime<Utc>,
}

/// Tier relative to the posting account's audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    Golden,
    Good,
    Acceptable,
}

/// Absolute tier for open-ended search discovery, purely from likes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViralTier {
    #[serde(rename = "MEGA+")]
    MegaPlus,
    #[serde(rename = "MEGA")]
    Mega,
    #[serde(rename = "VIRAL+")]
    ViralPlus,
    #[serde(rename = "VIRAL")]
    Viral,
    #[serde(rename = "TRENDING+")]
    TrendingPlus,
    #[serde(rename = "TRENDING")]
    Trending,
    #[serde(rename = "FRESH+")]
    FreshPlus,
    #[serde(rename = "FRESH")]
    Fresh,
}

impl ViralTier {
    /// Coarse bucket used for the tier breakdown log line.
    #[must_use]
    pub const fn family(self) -> &'static str {
        match self {
            Self::MegaPlus | Self::Mega => "MEGA",
            Self::ViralPlus | Self::Viral => "VIRAL",
            Self::TrendingPlus | Self::Trending => "TRENDING",
            Self::FreshPlus | Self::Fresh => "FRESH",
        }
    }
}

/// The two tier vocabularies are kept apart on purpose; they come from
/// different call paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tier {
    Account(AccountTier),
    Viral(ViralTier),
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account(AccountTier::Golden) => "golden",
            Self::Account(AccountTier::Good) => "good",
            Self::Account(AccountTier::Acceptable) => "acceptable",
            Self::Viral(ViralTier::MegaPlus) => "MEGA+",
            Self::Viral(ViralTier::Mega) => "MEGA",
            Self::Viral(ViralTier::ViralPlus) => "VIRAL+",
            Self::Viral(ViralTier::Viral) => "VIRAL",
            Self::Viral(ViralTier::TrendingPlus) => "TRENDING+",
            Self::Viral(ViralTier::Trending) => "TRENDING",
            Self::Viral(ViralTier::FreshPlus) => "FRESH+",
            Self::Viral(ViralTier::Fresh) => "FRESH",
        }
    }

    /// Label used when aggregating tier counts for logging.
    #[must_use]
    pub const fn breakdown_key(self) -> &'static str {
        match self {
            Self::Account(_) => self.as_str(),
            Self::Viral(v) => v.family(),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "golden" => Self::Account(AccountTier::Golden),
            "good" => Self::Account(AccountTier::Good),
            "acceptable" => Self::Account(AccountTier::Acceptable),
            "MEGA+" => Self::Viral(ViralTier::MegaPlus),
            "MEGA" => Self::Viral(ViralTier::Mega),
            "VIRAL+" => Self::Viral(ViralTier::ViralPlus),
            "VIRAL" => Self::Viral(ViralTier::Viral),
            "TRENDING+" => Self::Viral(ViralTier::TrendingPlus),
            "TRENDING" => Self::Viral(ViralTier::Trending),
            "FRESH+" => Self::Viral(ViralTier::FreshPlus),
            "FRESH" => Self::Viral(ViralTier::Fresh),
            other => return Err(format!("Unknown tier: {other}")),
        })
    }
}

/// Lifecycle of an opportunity. Only `Pending` is written by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Pending,
    Claimed,
    Replied,
    Expired,
}

impl OpportunityStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Replied => "replied",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for OpportunityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "replied" => Ok(Self::Replied),
            "expired" => Ok(Self::Expired),
            other => Err(format!("Unknown opportunity status: {other}")),
        }
    }
}

/// A scored candidate tweet for the reply pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyOpportunity {
    pub account_username: String,
    pub tweet_id: String,
    pub tweet_url: String,
    pub tweet_content: String,
    pub tweet_author: String,
    pub reply_count: u64,
    pub like_count: u64,
    pub posted_minutes_ago: i64,
    pub tweet_posted_at: DateTime<Utc>,
    pub opportunity_score: f64,
    pub engagement_rate: f64,
    pub tier: Tier,
    pub momentum_score: f64,
    pub health_relevance_score: Option<f64>,
    pub health_category: Option<String>,
    pub source_label: String,
    pub expires_at: DateTime<Utc>,
    pub status: OpportunityStatus,
    pub replied_to: bool,
}

/// Status of a reply decision in the external posting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Queued,
    Ready,
    Posting,
    Retrying,
    Posted,
    Failed,
}

impl DecisionStatus {
    /// Statuses that count as a reply already on its way.
    pub const IN_FLIGHT: [Self; 4] = [Self::Queued, Self::Ready, Self::Posting, Self::Retrying];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Posting => "posting",
            Self::Retrying => "retrying",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "ready" => Ok(Self::Ready),
            "posting" => Ok(Self::Posting),
            "retrying" => Ok(Self::Retrying),
            "posted" => Ok(Self::Posted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown decision status: {other}")),
        }
    }
}

/// Why a tweet must not receive another opportunity write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reservation {
    /// A reply to this tweet has already been posted.
    ReplyPosted,
    /// The opportunity row is marked replied.
    Replied,
    /// The opportunity row is claimed by a reply worker.
    Claimed,
    /// A reply decision is queued or being posted.
    InFlight(DecisionStatus),
}

/// Outcome counts from a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tier_breakdown: std::collections::BTreeMap<String, usize>,
}

impl StoreSummary {
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.stored + self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_labels_round_trip_through_strings() {
        for label in ["golden", "good", "acceptable", "MEGA+", "VIRAL", "FRESH+"] {
            let tier: Tier = label.parse().unwrap();
            assert_eq!(tier.as_str(), label);
        }
        assert!("legendary".parse::<Tier>().is_err());
    }

    #[test]
    fn viral_tiers_collapse_into_families() {
        assert_eq!(Tier::Viral(ViralTier::MegaPlus).breakdown_key(), "MEGA");
        assert_eq!(Tier::Viral(ViralTier::TrendingPlus).breakdown_key(), "TRENDING");
        assert_eq!(
            Tier::Account(AccountTier::Golden).breakdown_key(),
            "golden"
        );
    }

    #[test]
    fn tier_serializes_as_plain_label() {
        let json = serde_json::to_string(&Tier::Viral(ViralTier::ViralPlus)).unwrap();
        assert_eq!(json, "\"VIRAL+\"");
        let json = serde_json::to_string(&Tier::Account(AccountTier::Good)).unwrap();
        assert_eq!(json, "\"good\"");
    }

    #[test]
    fn in_flight_statuses_exclude_terminal_ones() {
        assert!(DecisionStatus::IN_FLIGHT.contains(&DecisionStatus::Retrying));
        assert!(!DecisionStatus::IN_FLIGHT.contains(&DecisionStatus::Posted));
        assert!(!DecisionStatus::IN_FLIGHT.contains(&DecisionStatus::Failed));
    }
}
