//! Integration tests for xscout.
//!
//! These tests drive the discovery pipeline end to end against saved page
//! snapshots and an in-memory database:
//! - Viral search scoring, tiering and persistence
//! - Account timelines with absolute and relative tiers
//! - Hashtag account discovery
//! - Reservation rules and page release on every path
//! - Judge verdicts and the keyword fallback through the orchestrator

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use xscout::browser::SnapshotPool;
use xscout::config::DiscoveryConfig;
use xscout::judge::{HealthJudge, JudgeInput, JudgeVerdict};
use xscout::scoring::ReplyScorer;
use xscout::{
    AccountTier, DecisionStatus, Discovery, Harvest, OpportunityStatus, ScoutError, Storage, Tier,
    ViralTier,
};

const COLD_EXPOSURE: &str = "New study: 8 minutes of cold exposure boosts metabolism 15%";

/// Render one timeline article the way X marks it up.
fn article(id: &str, author: &str, text: &str, minutes_ago: i64, likes: &str, replies: &str) -> String {
    let posted = (Utc::now() - Duration::minutes(minutes_ago))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        r#"<article data-testid="tweet">
            <div data-testid="User-Name">
              <a href="/{author}" role="link"><span>{author}</span></a>
              <a href="/{author}" role="link"><span>@{author}</span></a>
            </div>
            <a href="/{author}/status/{id}"><time datetime="{posted}">now</time></a>
            <div dir="auto"><div data-testid="tweetText"><span>{text}</span></div></div>
            <div role="group">
              <button data-testid="reply" aria-label="{replies} Replies. Reply"><span>{replies}</span></button>
              <button data-testid="like" aria-label="{likes} Likes. Like"><span>{likes}</span></button>
            </div>
          </article>"#
    )
}

fn page(articles: &[String]) -> String {
    format!(
        r#"<html><body><nav><a data-testid="AppTabBar_Profile_Link" href="/me">Profile</a></nav><main>{}</main></body></html>"#,
        articles.join("\n")
    )
}

fn profile(username: &str, followers: &str, bio: &str) -> String {
    format!(
        r#"<html><body>
            <div><div data-testid="UserName"><span>{username}</span><span>@{username}</span></div><div>1,204 posts</div></div>
            <div data-testid="UserDescription">{bio}</div>
            <a href="/{username}/following"><span>300</span> Following</a>
            <a href="/{username}/followers"><span>{followers}</span> Followers</a>
        </body></html>"#
    )
}

fn settings() -> DiscoveryConfig {
    DiscoveryConfig {
        request_delay_min_ms: 0,
        request_delay_max_ms: 0,
        navigation_timeout_secs: 5,
        selector_timeout_secs: 5,
        ..DiscoveryConfig::default()
    }
}

fn discovery(pool: &Arc<SnapshotPool>) -> Discovery {
    Discovery::new(settings(), pool.clone(), Storage::open_memory().unwrap())
}

fn viral_pool() -> Arc<SnapshotPool> {
    Arc::new(SnapshotPool::new().route(
        "x.com/search",
        page(&[article("111", "coldscience", COLD_EXPOSURE, 90, "12K", "40")]),
    ))
}

async fn viral(d: &Discovery) -> Harvest<xscout::ReplyOpportunity> {
    d.find_viral_tweets_via_search(1000, 500, "VIRAL_SEARCH", 24, None)
        .await
}

// =============================================================================
// Viral search
// =============================================================================

#[tokio::test]
async fn viral_search_scores_and_stores_cold_exposure_tweet() {
    let pool = viral_pool();
    let d = discovery(&pool);

    let found = viral(&d).await.into_vec();
    assert_eq!(found.len(), 1);
    let opp = &found[0];
    assert_eq!(opp.tweet_id, "111");
    assert_eq!(opp.tweet_url, "https://x.com/coldscience/status/111");
    assert_eq!(opp.tier, Tier::Viral(ViralTier::Viral));
    assert!((opp.opportunity_score - 80.0).abs() < 1e-9);
    assert!(opp.engagement_rate.abs() < f64::EPSILON);
    assert_eq!(opp.source_label, "VIRAL_SEARCH");
    assert_eq!(opp.account_username, "coldscience");
    assert_eq!(opp.status, OpportunityStatus::Pending);
    assert!(opp.health_relevance_score.is_some_and(|s| s > 0.0));
    assert!(opp.health_category.is_some());

    let ttl = opp.expires_at - Utc::now();
    assert!(ttl > Duration::hours(11) && ttl <= Duration::hours(12));

    let visited = pool.visited();
    assert_eq!(visited.len(), 1);
    assert!(visited[0].contains("min_faves%3A1000"));
    assert!(visited[0].contains("f=top"));

    let summary = d.store_opportunities(&found);
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.tier_breakdown.get("VIRAL"), Some(&1));

    let stored = d.storage().get_opportunity("111").unwrap().unwrap();
    assert_eq!(stored.tier, Tier::Viral(ViralTier::Viral));
    assert_eq!(stored.status, OpportunityStatus::Pending);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn viral_search_applies_like_and_reply_thresholds() {
    let pool = Arc::new(SnapshotPool::new().route(
        "x.com/search",
        page(&[
            article("1", "busy", "Sleep research thread on deep sleep and recovery", 30, "5K", "600"),
            article("2", "small", "Sleep research thread on deep sleep and recovery", 30, "900", "3"),
            article("3", "spam", "Best sleep supplement, use my code SLEEP for 20% off", 30, "4K", "3"),
            article("4", "good", "Sleep research thread on deep sleep and recovery", 30, "2K", "3"),
        ]),
    ));
    let d = discovery(&pool);

    let ids: Vec<String> = viral(&d).await.into_vec().into_iter().map(|o| o.tweet_id).collect();
    assert_eq!(ids, vec!["4"]);
}

#[tokio::test]
async fn replied_tweet_is_never_rewritten() {
    let pool = viral_pool();
    let d = discovery(&pool);

    let first = viral(&d).await.into_vec();
    assert_eq!(d.store_opportunities(&first).stored, 1);
    assert!(d
        .storage()
        .set_opportunity_status("111", OpportunityStatus::Replied)
        .unwrap());

    let again = viral(&d).await.into_vec();
    let summary = d.store_opportunities(&again);
    assert_eq!(summary.stored, 0);
    assert_eq!(summary.skipped, 1);

    let stored = d.storage().get_opportunity("111").unwrap().unwrap();
    assert_eq!(stored.status, OpportunityStatus::Replied);
    assert!(stored.replied_to);
}

#[tokio::test]
async fn in_flight_reply_decision_blocks_the_write() {
    let pool = viral_pool();
    let d = discovery(&pool);
    d.storage()
        .record_reply_decision("reply-111", "111", DecisionStatus::Queued)
        .unwrap();

    let found = viral(&d).await.into_vec();
    let summary = d.store_opportunities(&found);
    assert_eq!(summary.skipped, 1);
    assert!(d.storage().get_opportunity("111").unwrap().is_none());
}

#[tokio::test]
async fn account_priority_boosts_stored_score() {
    let pool = viral_pool();
    let d = discovery(&pool);
    d.storage().set_account_priority("coldscience", 1.0).unwrap();

    let found = viral(&d).await.into_vec();
    d.store_opportunities(&found);

    let stored = d.storage().get_opportunity("111").unwrap().unwrap();
    assert!((stored.opportunity_score - 120.0).abs() < 1e-9);
}

// =============================================================================
// Relevance judge
// =============================================================================

/// How the stand-in judge answers.
enum Verdicts {
    /// Relevant (score 9) when the content contains the phrase.
    AcceptContaining(&'static str, &'static str),
    RejectAll,
    Fail,
}

struct FixedJudge {
    verdicts: Verdicts,
    seen: Mutex<Vec<String>>,
}

impl FixedJudge {
    fn new(verdicts: Verdicts) -> Arc<Self> {
        Arc::new(Self {
            verdicts,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl HealthJudge for FixedJudge {
    async fn batch_judge(&self, items: &[JudgeInput]) -> xscout::Result<Vec<JudgeVerdict>> {
        self.seen
            .lock()
            .extend(items.iter().map(|i| i.content.clone()));
        let verdict = |item: &JudgeInput| match &self.verdicts {
            Verdicts::AcceptContaining(phrase, category) if item.content.contains(phrase) => {
                JudgeVerdict {
                    score: 9.0,
                    is_health_relevant: true,
                    category: (*category).to_string(),
                    reason: "metabolic research".to_string(),
                }
            }
            _ => JudgeVerdict {
                score: 1.0,
                is_health_relevant: false,
                category: String::new(),
                reason: "off topic".to_string(),
            },
        };
        match self.verdicts {
            Verdicts::Fail => Err(ScoutError::judge("upstream returned 503")),
            _ => Ok(items.iter().map(verdict).collect()),
        }
    }
}

fn judged_discovery(pool: &Arc<SnapshotPool>, judge: Arc<FixedJudge>) -> Discovery {
    discovery(pool).with_judge(judge)
}

#[tokio::test]
async fn judge_scores_cold_exposure_at_ten_thousand_likes() {
    let pool = Arc::new(SnapshotPool::new().route(
        "x.com/search",
        page(&[
            article("111", "coldscience", COLD_EXPOSURE, 90, "12K", "40"),
            article("112", "pizzafan", "Ranking every pizza topping of all time, a thread", 45, "15K", "90"),
        ]),
    ));
    let judge = FixedJudge::new(Verdicts::AcceptContaining("cold exposure", "metabolism"));
    let d = judged_discovery(&pool, judge.clone());

    let found = d
        .find_viral_tweets_via_search(10_000, 500, "VIRAL_SEARCH", 24, None)
        .await
        .into_vec();
    assert_eq!(judge.seen.lock().len(), 2);
    assert_eq!(found.len(), 1);
    let opp = &found[0];
    assert_eq!(opp.tweet_id, "111");
    assert_eq!(opp.tier, Tier::Viral(ViralTier::Viral));
    assert!((opp.opportunity_score - 80.0).abs() < 1e-9);
    assert_eq!(opp.health_relevance_score, Some(9.0));
    assert_eq!(opp.health_category.as_deref(), Some("metabolism"));
    assert!(pool.visited()[0].contains("min_faves%3A10000"));

    let summary = d.store_opportunities(&found);
    assert_eq!(summary.stored, 1);
    let stored = d.storage().get_opportunity("111").unwrap().unwrap();
    assert_eq!(stored.health_category.as_deref(), Some("metabolism"));
}

fn keyword_mix_pool() -> Arc<SnapshotPool> {
    let texts = [
        ("501", "Sleep and metabolism both improve with morning light"),
        ("502", "New research on protein intake for older adults"),
        ("503", "Zone 2 cardio builds a stronger heart over time"),
        ("504", "Fasting windows and insulin response explained"),
        ("505", "A short walk after dinner lowers glucose spikes"),
        ("506", "Cold plunges every morning are my favourite habit"),
        ("507", "The football match last night was incredible to watch"),
        ("508", "Meditation and breath work lower my stress levels a lot"),
    ];
    let articles: Vec<String> = texts
        .iter()
        .enumerate()
        .map(|(i, (id, text))| article(id, &format!("u{i}"), text, 30, "2K", "10"))
        .collect();
    Arc::new(SnapshotPool::new().route("x.com/search", page(&articles)))
}

#[tokio::test]
async fn judge_accepting_nothing_falls_back_to_keywords() {
    let pool = keyword_mix_pool();
    let judge = FixedJudge::new(Verdicts::RejectAll);
    let d = judged_discovery(&pool, judge.clone());

    let found = viral(&d).await.into_vec();
    assert_eq!(judge.seen.lock().len(), 8);

    // Six tweets score at least 2; the fallback keeps the best five.
    let ids: Vec<&str> = found.iter().map(|o| o.tweet_id.as_str()).collect();
    assert_eq!(ids, vec!["501", "502", "504", "508", "503"]);
    for opp in &found {
        assert_eq!(opp.health_category.as_deref(), Some("wellness"));
        assert!(opp.health_relevance_score.is_some_and(|s| (4.0..=10.0).contains(&s)));
    }
    assert_eq!(found[0].health_relevance_score, Some(10.0));
    assert_eq!(found[4].health_relevance_score, Some(6.0));
}

#[tokio::test]
async fn judge_failure_falls_back_to_keywords() {
    let pool = viral_pool();
    let judge = FixedJudge::new(Verdicts::Fail);
    let d = judged_discovery(&pool, judge.clone());

    let found = viral(&d).await.into_vec();
    assert_eq!(judge.seen.lock().len(), 1);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].health_category.as_deref(), Some("wellness"));
    // study + cold exposure + metabolism = 7, doubled and capped.
    assert_eq!(found[0].health_relevance_score, Some(10.0));
    assert_eq!(pool.outstanding(), 0);
}

// =============================================================================
// Degraded outcomes
// =============================================================================

#[tokio::test]
async fn missing_page_is_a_failed_harvest_and_releases_the_page() {
    let pool = Arc::new(SnapshotPool::new());
    let d = discovery(&pool);

    let harvest = viral(&d).await;
    assert!(harvest.is_failed());
    assert!(harvest.failure().is_some_and(|r| r.contains("no snapshot")));
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn closed_pool_is_a_failed_harvest() {
    let pool = Arc::new(SnapshotPool::unavailable());
    let d = discovery(&pool);

    assert!(viral(&d).await.is_failed());
    assert!(d
        .find_reply_opportunities_from_account("drhealth", 1000, None)
        .await
        .is_failed());
    assert!(d.discover_accounts_via_search("sleep", 5).await.is_failed());
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn page_without_tweets_is_empty() {
    let pool = Arc::new(SnapshotPool::new().route("x.com/search", page(&[])));
    let d = discovery(&pool);

    assert_eq!(viral(&d).await, Harvest::Empty);
    assert_eq!(pool.outstanding(), 0);
}

// =============================================================================
// Account timelines
// =============================================================================

#[tokio::test]
async fn account_timeline_uses_absolute_tiers() {
    let pool = Arc::new(SnapshotPool::new().route(
        "x.com/drhealth",
        page(&[
            article("201", "drhealth", "Morning sunlight anchors your circadian rhythm and sleep", 30, "200", "10"),
            article("202", "someoneelse", "Reposted: protein timing matters less than total intake", 30, "900", "10"),
            article("203", "drhealth", "Too old to matter for a reply at this point honestly", 60 * 13, "900", "10"),
        ]),
    ));
    let d = discovery(&pool);

    let found = d
        .find_reply_opportunities_from_account("@drhealth", 10_000, None)
        .await
        .into_vec();
    assert_eq!(found.len(), 1);
    let opp = &found[0];
    assert_eq!(opp.tweet_id, "201");
    assert_eq!(opp.tier, Tier::Account(AccountTier::Golden));
    assert!((opp.engagement_rate - 0.02).abs() < 1e-9);
    assert_eq!(opp.source_label, "account:drhealth");
    assert!(opp.health_relevance_score.is_none());
    let ttl = opp.expires_at - Utc::now();
    assert!(ttl > Duration::hours(23) && ttl <= Duration::hours(24));

    assert_eq!(d.store_opportunities(&found).tier_breakdown.get("golden"), Some(&1));
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn account_timeline_falls_back_to_relative_tiers() {
    let articles: Vec<String> = (1..=10)
        .map(|i| {
            article(
                &format!("30{i}"),
                "bigaccount",
                "Daily walking reduces all-cause mortality in every cohort",
                60,
                &(i * 10).to_string(),
                "1",
            )
        })
        .collect();
    let pool = Arc::new(SnapshotPool::new().route("x.com/bigaccount", page(&articles)));
    let d = discovery(&pool);

    let found = d
        .find_reply_opportunities_from_account("bigaccount", 1_000_000, None)
        .await
        .into_vec();
    let tiers: Vec<Tier> = found.iter().map(|o| o.tier).collect();
    assert_eq!(
        tiers,
        vec![
            Tier::Account(AccountTier::Golden),
            Tier::Account(AccountTier::Good),
            Tier::Account(AccountTier::Acceptable),
        ]
    );
    assert_eq!(found[0].like_count, 100);
}

#[tokio::test]
async fn unknown_followers_use_baseline_engagement_rate() {
    let pool = Arc::new(SnapshotPool::new().route(
        "x.com/drhealth",
        page(&[article("201", "drhealth", "Morning sunlight anchors your circadian rhythm and sleep", 30, "200", "10")]),
    ));
    let d = discovery(&pool);

    let found = d
        .find_reply_opportunities_from_account("drhealth", 0, Some(0.031))
        .await
        .into_vec();
    assert_eq!(found.len(), 1);
    assert!((found[0].engagement_rate - 0.031).abs() < 1e-9);
}

#[tokio::test]
async fn unknown_followers_rank_relative_tiers_by_likes() {
    let articles: Vec<String> = (1..=10)
        .map(|i| {
            article(
                &format!("40{i}"),
                "acct",
                "Strength training twice a week protects bone density",
                60,
                &(i * 10).to_string(),
                "1",
            )
        })
        .collect();
    let pool = Arc::new(SnapshotPool::new().route("x.com/acct", page(&articles)));
    let d = discovery(&pool);

    let found = d
        .find_reply_opportunities_from_account("acct", 0, Some(0.03))
        .await
        .into_vec();
    let picked: Vec<(u64, Tier)> = found.iter().map(|o| (o.like_count, o.tier)).collect();
    assert_eq!(
        picked,
        vec![
            (100, Tier::Account(AccountTier::Golden)),
            (90, Tier::Account(AccountTier::Good)),
            (80, Tier::Account(AccountTier::Acceptable)),
        ]
    );
    assert!(found.iter().all(|o| (o.engagement_rate - 0.03).abs() < 1e-9));
}

/// Qualifies every tweet as `good`.
struct LenientScorer;

impl ReplyScorer for LenientScorer {
    fn engagement_rate(&self, _likes: u64, _followers: u64) -> f64 {
        0.5
    }

    fn tier(
        &self,
        _likes: u64,
        _replies: u64,
        _minutes_ago: i64,
        _followers: u64,
    ) -> Option<AccountTier> {
        Some(AccountTier::Good)
    }
}

#[tokio::test]
async fn custom_scorer_decides_account_tiers() {
    let articles: Vec<String> = (1..=4)
        .map(|i| {
            article(
                &format!("60{i}"),
                "acct",
                "Strength training twice a week protects bone density",
                60,
                "30",
                "1",
            )
        })
        .collect();
    let pool = Arc::new(SnapshotPool::new().route("x.com/acct", page(&articles)));
    let d = discovery(&pool).with_scorer(Arc::new(LenientScorer));

    let found = d
        .find_reply_opportunities_from_account("acct", 50_000_000, None)
        .await
        .into_vec();
    assert_eq!(found.len(), 4);
    assert!(found.iter().all(|o| o.tier == Tier::Account(AccountTier::Good)));
    assert!(found.iter().all(|o| (o.engagement_rate - 0.5).abs() < 1e-9));
    let ttl = found[0].expires_at - Utc::now();
    assert!(ttl > Duration::hours(11) && ttl <= Duration::hours(12));
}

// =============================================================================
// Hashtag account discovery
// =============================================================================

#[tokio::test]
async fn hashtag_search_discovers_distinct_authors() {
    let pool = Arc::new(
        SnapshotPool::new()
            .route(
                "x.com/search",
                page(&[
                    article("1", "alice", "Why I stopped drinking coffee after 2pm for sleep", 10, "40", "2"),
                    article("2", "bob", "Magnesium glycinate before bed changed my sleep", 20, "15", "1"),
                    article("3", "alice", "Sleep consistency beats sleep duration, fight me", 30, "25", "4"),
                    article("4", "myself", "Our own tweet about sleep hygiene and routines", 40, "8", "0"),
                ]),
            )
            .route("x.com/alice", profile("alice", "12.5K", "Sleep coach"))
            .route("x.com/bob", profile("bob", "890", "Nurse, night shifts")),
    );
    let mut config = settings();
    config.own_username = Some("@Myself".to_string());
    let d = Discovery::new(config, pool.clone(), Storage::open_memory().unwrap());

    let accounts = d.discover_accounts_via_search("#sleep", 10).await.into_vec();
    let names: Vec<&str> = accounts.iter().map(|a| a.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_eq!(accounts[0].follower_count, 12_500);
    assert_eq!(accounts[0].following_count, 300);
    assert_eq!(accounts[1].follower_count, 890);

    assert!(pool.visited()[0].contains("f=live"));
    assert_eq!(d.store_accounts(&accounts).stored, 2);
    let alice = d.storage().get_account("alice").unwrap().unwrap();
    assert_eq!(alice.bio, "Sleep coach");
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn hashtag_search_respects_limit_and_skips_broken_profiles() {
    let pool = Arc::new(
        SnapshotPool::new()
            .route(
                "x.com/search",
                page(&[
                    article("1", "ghost", "Cold plunges every morning for a month straight", 10, "40", "2"),
                    article("2", "carol", "Zone 2 cardio is the most underrated habit", 20, "15", "1"),
                    article("3", "dave", "Protein at breakfast keeps me full until lunch", 30, "25", "4"),
                ]),
            )
            .route("x.com/carol", profile("carol", "2,000", "Runner")),
    );
    let d = discovery(&pool);

    let accounts = d.discover_accounts_via_search("fitness", 2).await.into_vec();
    let names: Vec<&str> = accounts.iter().map(|a| a.username.as_str()).collect();
    assert_eq!(names, vec!["carol"]);
    assert!(!pool.visited().iter().any(|u| u.ends_with("/dave")));
}
