//! `SQLite` storage for discovered accounts and reply opportunities.
//!
//! The reply pipeline that consumes opportunities lives elsewhere and shares
//! these tables: it claims rows, records reply decisions in
//! `content_metadata`, and maintains `account_priority`. Discovery only ever
//! writes `pending` rows and must never disturb one that pipeline has touched.

use crate::model::{
    DecisionStatus, DiscoveredAccount, DiscoveryMethod, OpportunityStatus, ReplyOpportunity,
    Reservation,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

const OPPORTUNITY_COLUMNS: &str = "account_username, tweet_id, tweet_url, tweet_content, \
     tweet_author, reply_count, like_count, posted_minutes_ago, tweet_posted_at, \
     opportunity_score, engagement_rate, tier, momentum_score, health_relevance_score, \
     health_category, source_label, expires_at, status, replied_to";

const ACCOUNT_COLUMNS: &str = "username, follower_count, following_count, tweet_count, bio, \
     verified, discovery_method, discovery_date";

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn opportunity_from_row(row: &Row<'_>) -> rusqlite::Result<ReplyOpportunity> {
    Ok(ReplyOpportunity {
        account_username: row.get(0)?,
        tweet_id: row.get(1)?,
        tweet_url: row.get(2)?,
        tweet_content: row.get(3)?,
        tweet_author: row.get(4)?,
        reply_count: from_sql_count(row.get(5)?),
        like_count: from_sql_count(row.get(6)?),
        posted_minutes_ago: row.get(7)?,
        tweet_posted_at: parse_time(row, 8)?,
        opportunity_score: row.get(9)?,
        engagement_rate: row.get(10)?,
        tier: parse_column(row, 11)?,
        momentum_score: row.get(12)?,
        health_relevance_score: row.get(13)?,
        health_category: row.get(14)?,
        source_label: row.get(15)?,
        expires_at: parse_time(row, 16)?,
        status: parse_column(row, 17)?,
        replied_to: row.get::<_, i32>(18)? != 0,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<DiscoveredAccount> {
    Ok(DiscoveredAccount {
        username: row.get(0)?,
        follower_count: from_sql_count(row.get(1)?),
        following_count: from_sql_count(row.get(2)?),
        tweet_count: from_sql_count(row.get(3)?),
        bio: row.get(4)?,
        verified: row.get::<_, i32>(5)? != 0,
        discovery_method: parse_column::<DiscoveryMethod>(row, 6)?,
        discovery_date: parse_time(row, 7)?,
    })
}

/// `SQLite` storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }
        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: rusqlite::Result<i32> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );
        // Treat missing schema table as version 0.
        result.unwrap_or_default()
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reply_opportunities (
                tweet_id TEXT PRIMARY KEY,
                account_username TEXT NOT NULL,
                tweet_url TEXT NOT NULL,
                tweet_content TEXT NOT NULL,
                tweet_author TEXT NOT NULL,
                reply_count INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0,
                posted_minutes_ago INTEGER NOT NULL DEFAULT 0,
                tweet_posted_at TEXT NOT NULL,
                opportunity_score REAL NOT NULL,
                engagement_rate REAL NOT NULL DEFAULT 0,
                tier TEXT NOT NULL,
                momentum_score REAL NOT NULL DEFAULT 0,
                health_relevance_score REAL,
                health_category TEXT,
                source_label TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                replied_to INTEGER NOT NULL DEFAULT 0,
                discovered_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_opportunities_status_score
                ON reply_opportunities(status, opportunity_score DESC);

            -- Handles are case-insensitive on X.
            CREATE TABLE IF NOT EXISTS discovered_accounts (
                username TEXT PRIMARY KEY COLLATE NOCASE,
                follower_count INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                tweet_count INTEGER NOT NULL DEFAULT 0,
                bio TEXT NOT NULL DEFAULT '',
                verified INTEGER NOT NULL DEFAULT 0,
                discovery_method TEXT NOT NULL,
                discovery_date TEXT NOT NULL
            );

            -- Reply decisions written by the posting pipeline.
            CREATE TABLE IF NOT EXISTS content_metadata (
                decision_id TEXT PRIMARY KEY,
                decision_type TEXT NOT NULL,
                target_tweet_id TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_content_metadata_target
                ON content_metadata(target_tweet_id, decision_type);

            CREATE TABLE IF NOT EXISTS account_priority (
                username TEXT PRIMARY KEY COLLATE NOCASE,
                priority_score REAL NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
            )
            .context("Failed to create schema")?;
        Ok(())
    }

    // =========================================================================
    // Reply opportunities
    // =========================================================================

    /// Why `tweet_id` must not receive another opportunity write, if at all.
    ///
    /// Checked in order: a posted reply decision, the opportunity row's own
    /// state, then any in-flight reply decision.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup query fails.
    pub fn reservation(&self, tweet_id: &str) -> Result<Option<Reservation>> {
        let decisions = self.reply_decision_statuses(tweet_id)?;
        if decisions.contains(&DecisionStatus::Posted) {
            return Ok(Some(Reservation::ReplyPosted));
        }

        let row: Option<(String, i32)> = self
            .conn
            .query_row(
                "SELECT status, replied_to FROM reply_opportunities WHERE tweet_id = ?",
                params![tweet_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((status, replied_to)) = row {
            if replied_to != 0 || status == OpportunityStatus::Replied.as_str() {
                return Ok(Some(Reservation::Replied));
            }
            if status == OpportunityStatus::Claimed.as_str() {
                return Ok(Some(Reservation::Claimed));
            }
        }

        Ok(decisions
            .into_iter()
            .find(|s| DecisionStatus::IN_FLIGHT.contains(s))
            .map(Reservation::InFlight))
    }

    fn reply_decision_statuses(&self, tweet_id: &str) -> Result<Vec<DecisionStatus>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT status FROM content_metadata
             WHERE decision_type = 'reply' AND target_tweet_id = ?",
        )?;
        let statuses = stmt
            .query_map(params![tweet_id], |row| row.get::<_, String>(0))?
            .filter_map(std::result::Result::ok)
            .filter_map(|s| s.parse().ok())
            .collect();
        Ok(statuses)
    }

    /// Insert or refresh an opportunity.
    ///
    /// Existing rows are only updated while still `pending` and not replied
    /// to. Returns whether a row was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn upsert_opportunity(&self, opp: &ReplyOpportunity) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .prepare_cached(&format!(
                "INSERT INTO reply_opportunities ({OPPORTUNITY_COLUMNS}, discovered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?20)
                 ON CONFLICT(tweet_id) DO UPDATE SET
                    account_username = excluded.account_username,
                    tweet_url = excluded.tweet_url,
                    tweet_content = excluded.tweet_content,
                    tweet_author = excluded.tweet_author,
                    reply_count = excluded.reply_count,
                    like_count = excluded.like_count,
                    posted_minutes_ago = excluded.posted_minutes_ago,
                    tweet_posted_at = excluded.tweet_posted_at,
                    opportunity_score = excluded.opportunity_score,
                    engagement_rate = excluded.engagement_rate,
                    tier = excluded.tier,
                    momentum_score = excluded.momentum_score,
                    health_relevance_score = excluded.health_relevance_score,
                    health_category = excluded.health_category,
                    source_label = excluded.source_label,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                 WHERE reply_opportunities.status = 'pending'
                   AND reply_opportunities.replied_to = 0"
            ))?
            .execute(params![
                opp.account_username,
                opp.tweet_id,
                opp.tweet_url,
                opp.tweet_content,
                opp.tweet_author,
                to_sql_count(opp.reply_count),
                to_sql_count(opp.like_count),
                opp.posted_minutes_ago,
                opp.tweet_posted_at.to_rfc3339(),
                opp.opportunity_score,
                opp.engagement_rate,
                opp.tier.as_str(),
                opp.momentum_score,
                opp.health_relevance_score,
                opp.health_category,
                opp.source_label,
                opp.expires_at.to_rfc3339(),
                opp.status.as_str(),
                i32::from(opp.replied_to),
                now,
            ])
            .with_context(|| format!("Failed to upsert opportunity {}", opp.tweet_id))?;
        debug!(tweet_id = %opp.tweet_id, changed, "Upserted opportunity");
        Ok(changed > 0)
    }

    /// Fetch one opportunity.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is malformed.
    pub fn get_opportunity(&self, tweet_id: &str) -> Result<Option<ReplyOpportunity>> {
        let opp = self
            .conn
            .query_row(
                &format!("SELECT {OPPORTUNITY_COLUMNS} FROM reply_opportunities WHERE tweet_id = ?"),
                params![tweet_id],
                opportunity_from_row,
            )
            .optional()?;
        Ok(opp)
    }

    /// Opportunities by descending score, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_opportunities(
        &self,
        status: Option<OpportunityStatus>,
        limit: usize,
    ) -> Result<Vec<ReplyOpportunity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM reply_opportunities
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY opportunity_score DESC, tweet_id
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![status.map(OpportunityStatus::as_str), limit], opportunity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Move an opportunity to `status`. `Replied` also sets `replied_to`.
    /// Returns whether the row exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_opportunity_status(&self, tweet_id: &str, status: OpportunityStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE reply_opportunities
             SET status = ?2,
                 replied_to = CASE WHEN ?2 = 'replied' THEN 1 ELSE replied_to END,
                 updated_at = ?3
             WHERE tweet_id = ?1",
            params![tweet_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Reply decisions and priority
    // =========================================================================

    /// Record (or update) a reply decision targeting `tweet_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record_reply_decision(
        &self,
        decision_id: &str,
        tweet_id: &str,
        status: DecisionStatus,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO content_metadata (decision_id, decision_type, target_tweet_id, status, created_at)
             VALUES (?1, 'reply', ?2, ?3, ?4)
             ON CONFLICT(decision_id) DO UPDATE SET
                target_tweet_id = excluded.target_tweet_id,
                status = excluded.status",
            params![decision_id, tweet_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Reputation score for `username`, if one has been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn priority_score(&self, username: &str) -> Result<Option<f64>> {
        let score = self
            .conn
            .query_row(
                "SELECT priority_score FROM account_priority WHERE username = ? COLLATE NOCASE",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }

    /// Set the reputation score for `username`, clamped to `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_account_priority(&self, username: &str, score: f64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO account_priority (username, priority_score, updated_at)
             VALUES (?, ?, ?)",
            params![username, score.clamp(0.0, 1.0), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or overwrite an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_account(&self, account: &DiscoveredAccount) -> Result<()> {
        self.conn
            .prepare_cached(&format!(
                "INSERT OR REPLACE INTO discovered_accounts ({ACCOUNT_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))?
            .execute(params![
                account.username,
                to_sql_count(account.follower_count),
                to_sql_count(account.following_count),
                to_sql_count(account.tweet_count),
                account.bio,
                i32::from(account.verified),
                account.discovery_method.as_str(),
                account.discovery_date.to_rfc3339(),
            ])
            .with_context(|| format!("Failed to upsert account @{}", account.username))?;
        Ok(())
    }

    /// Fetch one account.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_account(&self, username: &str) -> Result<Option<DiscoveredAccount>> {
        let account = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM discovered_accounts
                     WHERE username = ? COLLATE NOCASE"
                ),
                params![username],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Accounts by descending follower count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_accounts(&self, limit: usize) -> Result<Vec<DiscoveredAccount>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM discovered_accounts
             ORDER BY follower_count DESC, username LIMIT ?"
        ))?;
        let rows = stmt
            .query_map(params![limit], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
