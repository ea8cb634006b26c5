//! CLI definitions for xscout.
//!
//! Uses clap for argument parsing with derive macros.

use crate::model::{DecisionStatus, OpportunityStatus};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// xscout - find tweets worth replying to
#[derive(Parser, Debug)]
#[command(name = "xscout")]
#[command(version)]
#[command(about = "Discover and score reply opportunities on X")]
#[command(long_about = r#"
xscout scrapes X through a browser rendering service, picks out fresh root
tweets, scores them for reply potential and health relevance, and keeps a
SQLite queue of opportunities for a reply pipeline to work through.

Quick start:
  1. Point [browser] endpoint at a Browserless instance (or use --snapshots)
  2. Run: xscout accounts longevity
  3. Run: xscout viral --min-likes 1000
  4. Review: xscout list
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "XSCOUT_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Path to a config file (replaces ~/.config/xscout/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serve pages from saved HTML in this directory instead of a browser
    #[arg(long, env = "XSCOUT_SNAPSHOTS", global = true)]
    pub snapshots: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Be verbose (repeat for trace output)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover accounts posting under a hashtag
    Accounts(AccountsArgs),

    /// Find reply opportunities on one account's timeline
    Account(AccountArgs),

    /// Search for viral health tweets
    Viral(ViralArgs),

    /// List stored opportunities or accounts
    List(ListArgs),

    /// Change an opportunity's status
    Mark(MarkArgs),

    /// Record a reply decision for a tweet
    Decide(DecideArgs),

    /// Set an account's priority score
    Priority(PriorityArgs),

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct AccountsArgs {
    /// Hashtag to search (with or without '#')
    pub hashtag: String,

    /// Maximum number of accounts to fetch
    #[arg(long, short = 'n', default_value = "10")]
    pub limit: usize,

    /// Print results without writing them to the database
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct AccountArgs {
    /// Account handle (with or without '@')
    pub username: String,

    /// Follower count; looked up in stored accounts when omitted
    #[arg(long)]
    pub followers: Option<u64>,

    /// The account's baseline engagement rate (likes / followers)
    #[arg(long)]
    pub engagement_rate: Option<f64>,

    /// Print results without writing them to the database
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ViralArgs {
    /// Minimum like count
    #[arg(long, default_value = "1000")]
    pub min_likes: u64,

    /// Reply ceiling (exclusive)
    #[arg(long, default_value = "500")]
    pub max_replies: u64,

    /// Source label stored with each opportunity
    #[arg(long, default_value = "VIRAL_SEARCH")]
    pub label: String,

    /// Maximum tweet age in hours
    #[arg(long, default_value = "24")]
    pub max_age_hours: u32,

    /// Search query (replaces the configured default)
    #[arg(long)]
    pub query: Option<String>,

    /// Print results without writing them to the database
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// What to list
    #[arg(default_value = "opportunities")]
    pub what: ListTarget,

    /// Only opportunities with this status
    #[arg(long, short = 's', value_parser = parse_opportunity_status)]
    pub status: Option<OpportunityStatus>,

    /// Limit number of items
    #[arg(long, short = 'n', default_value = "50")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct MarkArgs {
    /// Tweet ID
    pub tweet_id: String,

    /// New status
    #[arg(value_parser = parse_opportunity_status)]
    pub status: OpportunityStatus,
}

#[derive(Args, Debug)]
pub struct DecideArgs {
    /// Tweet ID the reply targets
    pub tweet_id: String,

    /// Decision status
    #[arg(value_parser = parse_decision_status)]
    pub status: DecisionStatus,

    /// Decision ID (defaults to reply-<tweet_id>)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args, Debug)]
pub struct PriorityArgs {
    /// Account handle
    pub username: String,

    /// Priority score in [0, 1]
    pub score: f64,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Print the default configuration file
    #[arg(long, conflicts_with = "show")]
    pub defaults: bool,

    /// Write the current configuration to the user config file
    #[arg(long, conflicts_with_all = ["show", "defaults"])]
    pub save: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
    Compact,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListTarget {
    #[default]
    Opportunities,
    Accounts,
}

fn parse_opportunity_status(s: &str) -> Result<OpportunityStatus, String> {
    s.to_ascii_lowercase().parse()
}

fn parse_decision_status(s: &str) -> Result<DecisionStatus, String> {
    s.to_ascii_lowercase().parse()
}
