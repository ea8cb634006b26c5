//! Tiering and scoring of reply opportunities.
//!
//! Two tier schemes coexist:
//!
//! - **Account-relative** tiers (`golden`/`good`/`acceptable`) for a known
//!   account's timeline, decided by a [`ReplyScorer`] with an adaptive
//!   percentile fallback when nothing clears the absolute thresholds.
//! - **Absolute viral** tiers (`MEGA+` .. `FRESH`) for open search, a step
//!   function of like count alone.

use crate::model::{AccountTier, RawTweet, Tier, ViralTier};
use chrono::Duration;
use std::cmp::Ordering;

/// Each half of the opportunity score is capped at this many points.
const SCORE_HALF_CAP: f64 = 50.0;
const SCORE_CAP: f64 = 100.0;
/// Multiplier applied to a priority score of 1.0.
const MAX_PRIORITY_BOOST: f64 = 0.5;

/// Visibility minus reply competition, in `[0, 100]`.
///
/// `min(100, min(likes/100, 50) + max(50 - replies/2, 0))`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn opportunity_score(likes: u64, replies: u64) -> f64 {
    let visibility = (likes as f64 / 100.0).min(SCORE_HALF_CAP);
    let openness = (SCORE_HALF_CAP - replies as f64 / 2.0).max(0.0);
    (visibility + openness).min(SCORE_CAP)
}

/// Likes per minute since posting.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn momentum_score(likes: u64, minutes_since_post: i64) -> f64 {
    likes as f64 / minutes_since_post.max(1) as f64
}

/// Apply the per-account reputation boost. Priority is clamped to `[0, 1]`.
#[must_use]
pub fn apply_priority_boost(base_score: f64, priority_score: f64) -> f64 {
    base_score * priority_score.clamp(0.0, 1.0).mul_add(MAX_PRIORITY_BOOST, 1.0)
}

/// Step function of like count for search-based discovery.
#[must_use]
pub const fn viral_tier(like_count: u64) -> ViralTier {
    match like_count {
        100_000.. => ViralTier::MegaPlus,
        50_000.. => ViralTier::Mega,
        25_000.. => ViralTier::ViralPlus,
        10_000.. => ViralTier::Viral,
        5_000.. => ViralTier::TrendingPlus,
        2_000.. => ViralTier::Trending,
        1_000.. => ViralTier::FreshPlus,
        _ => ViralTier::Fresh,
    }
}

/// How long an opportunity stays worth replying to.
#[must_use]
pub const fn expiry_for(tier: Tier) -> Duration {
    let hours = match tier {
        Tier::Viral(ViralTier::MegaPlus | ViralTier::Mega)
        | Tier::Account(AccountTier::Golden) => 24,
        Tier::Viral(ViralTier::ViralPlus | ViralTier::Viral)
        | Tier::Account(AccountTier::Good) => 12,
        Tier::Viral(ViralTier::TrendingPlus | ViralTier::Trending) => 8,
        Tier::Viral(ViralTier::FreshPlus | ViralTier::Fresh)
        | Tier::Account(AccountTier::Acceptable) => 6,
    };
    Duration::hours(hours)
}

/// Account-relative scorer.
pub trait ReplyScorer: Send + Sync {
    /// Likes as a fraction of the audience.
    fn engagement_rate(&self, likes: u64, followers: u64) -> f64;

    /// Absolute tier, or `None` when the tweet does not qualify.
    fn tier(&self, likes: u64, replies: u64, minutes_ago: i64, followers: u64)
    -> Option<AccountTier>;

    /// Engagement velocity.
    fn momentum(&self, likes: u64, minutes_ago: i64) -> f64 {
        momentum_score(likes, minutes_ago)
    }
}

/// Threshold set for one account tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThreshold {
    pub min_engagement_rate: f64,
    pub min_likes: u64,
    pub max_replies: u64,
    pub max_minutes: i64,
}

impl TierThreshold {
    fn admits(&self, rate: f64, likes: u64, replies: u64, minutes: i64) -> bool {
        rate >= self.min_engagement_rate
            && likes >= self.min_likes
            && replies < self.max_replies
            && minutes <= self.max_minutes
    }
}

/// Fixed-threshold scorer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultReplyScorer {
    pub golden: TierThreshold,
    pub good: TierThreshold,
    pub acceptable: TierThreshold,
}

impl Default for DefaultReplyScorer {
    fn default() -> Self {
        Self {
            golden: TierThreshold {
                min_engagement_rate: 0.01,
                min_likes: 20,
                max_replies: 50,
                max_minutes: 180,
            },
            good: TierThreshold {
                min_engagement_rate: 0.005,
                min_likes: 10,
                max_replies: 100,
                max_minutes: 360,
            },
            acceptable: TierThreshold {
                min_engagement_rate: 0.001,
                min_likes: 5,
                max_replies: 200,
                max_minutes: 1440,
            },
        }
    }
}

impl ReplyScorer for DefaultReplyScorer {
    #[allow(clippy::cast_precision_loss)]
    fn engagement_rate(&self, likes: u64, followers: u64) -> f64 {
        if followers == 0 {
            return 0.0;
        }
        likes as f64 / followers as f64
    }

    fn tier(
        &self,
        likes: u64,
        replies: u64,
        minutes_ago: i64,
        followers: u64,
    ) -> Option<AccountTier> {
        let rate = self.engagement_rate(likes, followers);
        [
            (AccountTier::Golden, &self.golden),
            (AccountTier::Good, &self.good),
            (AccountTier::Acceptable, &self.acceptable),
        ]
        .into_iter()
        .find(|(_, t)| t.admits(rate, likes, replies, minutes_ago))
        .map(|(tier, _)| tier)
    }
}

/// A tweet with its account-relative classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TieredTweet {
    pub tweet: RawTweet,
    pub engagement_rate: f64,
    pub tier: AccountTier,
}

/// Tier a timeline batch. Falls back to [`adaptive_tiers`] when the scorer
/// qualifies nothing. The boolean reports whether the fallback ran.
#[must_use]
pub fn tier_account_batch(
    scorer: &dyn ReplyScorer,
    tweets: Vec<RawTweet>,
    followers: u64,
) -> (Vec<TieredTweet>, bool) {
    let rated: Vec<(RawTweet, f64)> = tweets
        .into_iter()
        .map(|t| {
            let rate = scorer.engagement_rate(t.like_count, followers);
            (t, rate)
        })
        .collect();

    let qualified: Vec<TieredTweet> = rated
        .iter()
        .filter_map(|(t, rate)| {
            scorer
                .tier(t.like_count, t.reply_count, t.posted_minutes_ago, followers)
                .map(|tier| TieredTweet {
                    tweet: t.clone(),
                    engagement_rate: *rate,
                    tier,
                })
        })
        .collect();

    if qualified.is_empty() && !rated.is_empty() {
        (adaptive_tiers(rated), true)
    } else {
        (qualified, false)
    }
}

/// Relative tiers: keep the top 30% by engagement rate, then label the top
/// 20% of that set `golden`, the next 30% `good`, the rest `acceptable`.
///
/// Equal rates rank by like count. With an unknown audience every rate is
/// zero, so the ranking comes down to likes alone.
#[must_use]
pub fn adaptive_tiers(mut rated: Vec<(RawTweet, f64)>) -> Vec<TieredTweet> {
    if rated.is_empty() {
        return Vec::new();
    }
    rated.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.0.like_count.cmp(&a.0.like_count))
    });

    let keep = ceil_percent(rated.len(), 30).max(1);
    rated.truncate(keep);

    let golden_end = ceil_percent(keep, 20).max(1);
    let good_end = golden_end + ceil_percent(keep, 30);

    rated
        .into_iter()
        .enumerate()
        .map(|(rank, (tweet, engagement_rate))| TieredTweet {
            tweet,
            engagement_rate,
            tier: if rank < golden_end {
                AccountTier::Golden
            } else if rank < good_end {
                AccountTier::Good
            } else {
                AccountTier::Acceptable
            },
        })
        .collect()
}

const fn ceil_percent(n: usize, percent: usize) -> usize {
    (n * percent).div_ceil(100)
}
