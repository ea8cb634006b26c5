//! Discovery orchestrator.
//!
//! Each finder leases one page, walks it through navigate, wait, extract,
//! then scores what it found. Finders never return errors: the outcome is a
//! [`Harvest`], which keeps "nothing there" apart from "could not look".
//!
//! ```text
//! page -> extract -> filter -> judge (viral only) -> tier/score
//!                                                      |
//!                       store_opportunities <----------+
//!                       (reservation check, priority boost, upsert)
//! ```

use crate::browser::{PageLease, PagePool};
use crate::config::DiscoveryConfig;
use crate::error::{Result, ScoutError};
use crate::extract::{self, ExtractOptions};
use crate::filter::{self, FilterCriteria};
use crate::judge::{self, HealthJudge, JudgedTweet};
use crate::logging::OperationGuard;
use crate::model::{
    DiscoveredAccount, DiscoveryMethod, OpportunityStatus, RawTweet, ReplyOpportunity,
    StoreSummary, Tier,
};
use crate::parser::{X_BASE_URL, normalize_handle};
use crate::scoring::{
    self, DefaultReplyScorer, ReplyScorer, TieredTweet, apply_priority_boost, expiry_for,
    opportunity_score, viral_tier,
};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Selector that signals a timeline or search page has rendered tweets.
pub const TWEET_SELECTOR: &str = r#"article[data-testid="tweet"]"#;
/// Selector that signals a profile header has rendered.
pub const PROFILE_SELECTOR: &str = r#"[data-testid="UserName"]"#;
/// Source label used by the viral finder when the caller passes none.
pub const DEFAULT_VIRAL_LABEL: &str = "VIRAL_SEARCH";

/// Outcome of a discovery call.
#[derive(Debug, Clone, PartialEq)]
pub enum Harvest<T> {
    /// At least one item.
    Found(Vec<T>),
    /// The page loaded but yielded nothing usable.
    Empty,
    /// The page could not be scraped.
    Failed(String),
}

impl<T> Harvest<T> {
    fn from_items(items: Vec<T>) -> Self {
        if items.is_empty() {
            Self::Empty
        } else {
            Self::Found(items)
        }
    }

    /// Collapse to a plain vector; `Empty` and `Failed` both become `[]`.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Found(items) => items,
            Self::Empty | Self::Failed(_) => Vec::new(),
        }
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        match self {
            Self::Found(items) => items,
            Self::Empty | Self::Failed(_) => &[],
        }
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Failure reason, if the call failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// The process-owned discovery context.
pub struct Discovery {
    settings: DiscoveryConfig,
    pool: Arc<dyn PagePool>,
    judge: Option<Arc<dyn HealthJudge>>,
    scorer: Arc<dyn ReplyScorer>,
    storage: Mutex<Storage>,
}

impl Discovery {
    /// Context with the default scorer and no LLM judge.
    #[must_use]
    pub fn new(settings: DiscoveryConfig, pool: Arc<dyn PagePool>, storage: Storage) -> Self {
        Self {
            settings,
            pool,
            judge: None,
            scorer: Arc::new(DefaultReplyScorer::default()),
            storage: Mutex::new(storage),
        }
    }

    #[must_use]
    pub fn with_judge(mut self, judge: Arc<dyn HealthJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn ReplyScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Direct storage access. Do not hold the guard across an `.await`.
    pub fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock()
    }

    #[must_use]
    pub const fn settings(&self) -> &DiscoveryConfig {
        &self.settings
    }

    // =========================================================================
    // Finders
    // =========================================================================

    /// Scrape a hashtag's live search, then fetch the profile of each
    /// distinct author, up to `limit` accounts.
    pub async fn discover_accounts_via_search(
        &self,
        hashtag: &str,
        limit: usize,
    ) -> Harvest<DiscoveredAccount> {
        let tag = hashtag.trim().trim_start_matches('#').to_string();
        let op = OperationGuard::new(format!("discover_accounts #{tag}"));
        finish(op, self.accounts_from_hashtag(&tag, limit).await)
    }

    /// Scrape an account's timeline for fresh root tweets worth replying to.
    ///
    /// `engagement_rate` is the account's baseline rate, used for tweets
    /// whose own rate cannot be computed because `followers` is unknown.
    pub async fn find_reply_opportunities_from_account(
        &self,
        username: &str,
        followers: u64,
        engagement_rate: Option<f64>,
    ) -> Harvest<ReplyOpportunity> {
        let username = normalize_handle(username);
        let op = OperationGuard::new(format!("account_opportunities @{username}"));
        finish(
            op,
            self.opportunities_from_account(&username, followers, engagement_rate)
                .await,
        )
    }

    /// Search X for popular health tweets and score them on the absolute
    /// viral scale.
    pub async fn find_viral_tweets_via_search(
        &self,
        min_likes: u64,
        max_replies: u64,
        label: &str,
        max_age_hours: u32,
        custom_query: Option<&str>,
    ) -> Harvest<ReplyOpportunity> {
        let label = if label.trim().is_empty() {
            DEFAULT_VIRAL_LABEL
        } else {
            label.trim()
        };
        let op = OperationGuard::new(format!("viral_search {label}"));
        let criteria = FilterCriteria {
            min_likes,
            max_replies,
        };
        finish(
            op,
            self.viral_opportunities(criteria, label, max_age_hours, custom_query)
                .await,
        )
    }

    async fn accounts_from_hashtag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<DiscoveredAccount>> {
        if tag.is_empty() {
            return Err(ScoutError::invalid_argument("hashtag is empty"));
        }
        let url = search_url(&format!("#{tag}"), "live")?;
        let mut lease = PageLease::acquire(self.pool.as_ref(), &format!("hashtag:{tag}")).await?;

        let opts = ExtractOptions::new(
            self.settings.hashtag_max_articles,
            self.settings.hashtag_max_age_hours,
        );
        let Some(tweets) = self.load_tweets(&mut lease, &url, &opts).await? else {
            return Ok(Vec::new());
        };

        let own = self.settings.own_username.as_deref().map(normalize_handle);
        let mut seen = HashSet::new();
        let authors: Vec<String> = tweets
            .into_iter()
            .map(|t| t.tweet_author)
            .filter(|a| {
                own.as_deref()
                    .is_none_or(|own| !own.eq_ignore_ascii_case(a))
            })
            .filter(|a| seen.insert(a.to_ascii_lowercase()))
            .take(limit)
            .collect();
        debug!(hashtag = tag, authors = authors.len(), "Collected candidate authors");

        let mut accounts = Vec::with_capacity(authors.len());
        for (idx, author) in authors.iter().enumerate() {
            if idx > 0 {
                self.pause().await;
            }
            match self.fetch_profile(&mut lease, author).await {
                Ok(Some(account)) => accounts.push(account),
                Ok(None) => debug!(username = %author, "Profile header did not render"),
                Err(e) => warn!(username = %author, error = %e, "Profile fetch failed"),
            }
        }
        Ok(accounts)
    }

    async fn fetch_profile(
        &self,
        lease: &mut PageLease<'_>,
        username: &str,
    ) -> Result<Option<DiscoveredAccount>> {
        let url = extract::profile_url(username);
        let nav = self.settings.navigation_timeout();
        let wait = self.settings.selector_timeout();
        let page = lease.page();

        bounded(&url, nav, page.goto(&url, nav)).await?;
        if !bounded(PROFILE_SELECTOR, wait, page.wait_for_selector(PROFILE_SELECTOR, wait)).await? {
            return Ok(None);
        }
        let html = page.content().await?;
        Ok(extract::extract_profile(&html, username).map(|p| DiscoveredAccount {
            username: p.username,
            follower_count: p.follower_count,
            following_count: p.following_count,
            tweet_count: p.tweet_count,
            bio: p.bio,
            verified: p.verified,
            discovery_method: DiscoveryMethod::Hashtag,
            discovery_date: Utc::now(),
        }))
    }

    async fn opportunities_from_account(
        &self,
        username: &str,
        followers: u64,
        baseline_rate: Option<f64>,
    ) -> Result<Vec<ReplyOpportunity>> {
        if username.is_empty() {
            return Err(ScoutError::invalid_argument("username is empty"));
        }
        let url = extract::profile_url(username);
        let mut lease =
            PageLease::acquire(self.pool.as_ref(), &format!("account:{username}")).await?;

        let opts = ExtractOptions::new(
            self.settings.account_max_articles,
            self.settings.account_max_age_hours,
        );
        let Some(tweets) = self.load_tweets(&mut lease, &url, &opts).await? else {
            return Ok(Vec::new());
        };
        drop(lease);

        // Timelines mix in reposts and pinned threads from other authors.
        let own_tweets: Vec<RawTweet> = tweets
            .into_iter()
            .filter(|t| t.tweet_author.eq_ignore_ascii_case(username))
            .collect();
        let eligible = filter::apply(
            own_tweets,
            FilterCriteria {
                min_likes: self.settings.account_min_likes,
                max_replies: self.settings.account_max_replies,
            },
        );

        let (tiered, adaptive) =
            scoring::tier_account_batch(self.scorer.as_ref(), eligible, followers);
        if adaptive {
            info!(
                username,
                selected = tiered.len(),
                "No tweet met absolute thresholds, using relative tiers"
            );
        }

        let source_label = format!("account:{username}");
        let now = Utc::now();
        Ok(tiered
            .into_iter()
            .map(|t| {
                let rate = if followers == 0 {
                    baseline_rate.unwrap_or(t.engagement_rate)
                } else {
                    t.engagement_rate
                };
                self.account_opportunity(username, t, rate, &source_label, now)
            })
            .collect())
    }

    fn account_opportunity(
        &self,
        username: &str,
        tiered: TieredTweet,
        engagement_rate: f64,
        source_label: &str,
        now: DateTime<Utc>,
    ) -> ReplyOpportunity {
        let tier = Tier::Account(tiered.tier);
        let t = tiered.tweet;
        ReplyOpportunity {
            account_username: username.to_string(),
            opportunity_score: opportunity_score(t.like_count, t.reply_count),
            engagement_rate,
            tier,
            momentum_score: self.scorer.momentum(t.like_count, t.posted_minutes_ago),
            health_relevance_score: None,
            health_category: None,
            source_label: source_label.to_string(),
            expires_at: now + expiry_for(tier),
            status: OpportunityStatus::Pending,
            replied_to: false,
            tweet_id: t.tweet_id,
            tweet_url: t.tweet_url,
            tweet_content: t.tweet_content,
            tweet_author: t.tweet_author,
            reply_count: t.reply_count,
            like_count: t.like_count,
            posted_minutes_ago: t.posted_minutes_ago,
            tweet_posted_at: t.tweet_posted_at,
        }
    }

    async fn viral_opportunities(
        &self,
        criteria: FilterCriteria,
        label: &str,
        max_age_hours: u32,
        custom_query: Option<&str>,
    ) -> Result<Vec<ReplyOpportunity>> {
        let base = custom_query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.settings.default_viral_query);
        let query = format!("{base} min_faves:{} -filter:replies", criteria.min_likes);
        let url = search_url(&query, "top")?;

        let tweets = {
            let mut lease =
                PageLease::acquire(self.pool.as_ref(), &format!("viral:{label}")).await?;
            let opts = ExtractOptions::new(self.settings.viral_max_articles, max_age_hours);
            match self.load_tweets(&mut lease, &url, &opts).await? {
                Some(tweets) => tweets,
                None => return Ok(Vec::new()),
            }
        };

        let eligible = filter::apply(tweets, criteria);
        if eligible.is_empty() {
            return Ok(Vec::new());
        }
        let judged = judge::judge_candidates(self.judge.as_deref(), eligible).await;

        let now = Utc::now();
        Ok(judged
            .into_iter()
            .map(|j| self.viral_opportunity(j, label, now))
            .collect())
    }

    fn viral_opportunity(
        &self,
        judged: JudgedTweet,
        label: &str,
        now: DateTime<Utc>,
    ) -> ReplyOpportunity {
        let t = judged.tweet;
        let tier = Tier::Viral(viral_tier(t.like_count));
        ReplyOpportunity {
            account_username: t.tweet_author.clone(),
            opportunity_score: opportunity_score(t.like_count, t.reply_count),
            // Audience size is unknown on search pages.
            engagement_rate: self.scorer.engagement_rate(t.like_count, 0),
            tier,
            momentum_score: self.scorer.momentum(t.like_count, t.posted_minutes_ago),
            health_relevance_score: Some(judged.score),
            health_category: Some(judged.category),
            source_label: label.to_string(),
            expires_at: now + expiry_for(tier),
            status: OpportunityStatus::Pending,
            replied_to: false,
            tweet_id: t.tweet_id,
            tweet_url: t.tweet_url,
            tweet_content: t.tweet_content,
            tweet_author: t.tweet_author,
            reply_count: t.reply_count,
            like_count: t.like_count,
            posted_minutes_ago: t.posted_minutes_ago,
            tweet_posted_at: t.tweet_posted_at,
        }
    }

    /// Navigate, check the session, wait for tweets and extract them.
    /// `None` means the page rendered no tweets before the selector timeout.
    async fn load_tweets(
        &self,
        lease: &mut PageLease<'_>,
        url: &str,
        opts: &ExtractOptions,
    ) -> Result<Option<Vec<RawTweet>>> {
        let nav = self.settings.navigation_timeout();
        let wait = self.settings.selector_timeout();
        let page = lease.page();

        bounded(url, nav, page.goto(url, nav)).await?;

        match page.content().await.map(|html| extract::session_state(&html)) {
            Ok(Some(false)) => warn!(url, "Page looks logged out; continuing anyway"),
            Ok(_) => {}
            Err(e) => warn!(url, error = %e, "Session check failed; continuing anyway"),
        }

        if !bounded(TWEET_SELECTOR, wait, page.wait_for_selector(TWEET_SELECTOR, wait)).await? {
            info!(url, "No tweets rendered");
            return Ok(None);
        }

        let html = page.content().await?;
        let tweets = extract::extract_tweets(&html, opts);
        debug!(url, extracted = tweets.len(), "Extracted tweets");
        Ok(Some(tweets))
    }

    async fn pause(&self) {
        let delay = jitter(self.settings.delay_bounds_ms());
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis(), "Pausing between profile fetches");
            tokio::time::sleep(delay).await;
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Upsert accounts, counting per-row failures instead of aborting.
    pub fn store_accounts(&self, accounts: &[DiscoveredAccount]) -> StoreSummary {
        let storage = self.storage.lock();
        let mut summary = StoreSummary::default();
        for account in accounts {
            match storage.upsert_account(account) {
                Ok(()) => summary.stored += 1,
                Err(e) => {
                    warn!(username = %account.username, error = %e, "Failed to store account");
                    summary.failed += 1;
                }
            }
        }
        info!(
            stored = summary.stored,
            failed = summary.failed,
            "Stored discovered accounts"
        );
        summary
    }

    /// Write each opportunity at most once, skipping reserved tweets and
    /// applying the account priority boost.
    pub fn store_opportunities(&self, opportunities: &[ReplyOpportunity]) -> StoreSummary {
        let storage = self.storage.lock();
        let mut summary = StoreSummary::default();

        for opp in opportunities {
            match store_one(&storage, opp) {
                Ok(true) => {
                    summary.stored += 1;
                    *summary
                        .tier_breakdown
                        .entry(opp.tier.breakdown_key().to_string())
                        .or_default() += 1;
                }
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(tweet_id = %opp.tweet_id, error = %e, "Failed to store opportunity");
                    summary.failed += 1;
                }
            }
        }

        info!(
            stored = summary.stored,
            skipped = summary.skipped,
            failed = summary.failed,
            tiers = ?summary.tier_breakdown,
            "Stored reply opportunities"
        );
        summary
    }
}

/// Returns `Ok(false)` when the tweet is reserved.
fn store_one(storage: &Storage, opp: &ReplyOpportunity) -> anyhow::Result<bool> {
    if let Some(reason) = storage.reservation(&opp.tweet_id)? {
        debug!(tweet_id = %opp.tweet_id, ?reason, "Skipping reserved tweet");
        return Ok(false);
    }
    let mut boosted = opp.clone();
    if let Some(priority) = storage.priority_score(&opp.account_username)? {
        boosted.opportunity_score = apply_priority_boost(opp.opportunity_score, priority);
    }
    storage.upsert_opportunity(&boosted)
}

fn finish<T>(op: OperationGuard, result: Result<Vec<T>>) -> Harvest<T> {
    match result {
        Ok(items) => {
            op.complete(items.len());
            Harvest::from_items(items)
        }
        Err(e) => {
            op.fail(&e);
            Harvest::Failed(e.to_string())
        }
    }
}

/// Run `fut` with a hard deadline on top of whatever the page enforces.
async fn bounded<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ScoutError::timeout(what, limit))?
}

fn jitter((min_ms, max_ms): (u64, u64)) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Search page URL for `query` on the given results tab (`live` or `top`).
///
/// # Errors
///
/// Returns an error if the URL cannot be built.
pub fn search_url(query: &str, tab: &str) -> Result<String> {
    Url::parse_with_params(
        &format!("{X_BASE_URL}/search"),
        &[("q", query), ("src", "typed_query"), ("f", tab)],
    )
    .map(String::from)
    .map_err(|e| ScoutError::invalid_argument(format!("bad search URL: {e}")))
}
