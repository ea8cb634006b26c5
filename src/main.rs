//! xscout - reply-opportunity discovery CLI
//!
//! Main entry point for the xscout command-line tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use serde::Serialize;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use xscout::browser::{BrowserlessPool, PagePool, SnapshotPool};
use xscout::config::Config;
use xscout::judge::{HealthJudge, OpenAiJudge};
use xscout::parser::normalize_handle;
use xscout::*;

/// Resolved settings shared by every command.
struct Ctx {
    config: Config,
    format: OutputFormat,
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_cli_logging(cli.quiet, cli.verbose);

    let ctx = resolve_context(&cli);
    match run(&cli, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "Error:".red().bold());
            if let Some(hint) = err.downcast_ref::<ScoutError>().and_then(ScoutError::suggestion) {
                eprintln!("  {} {hint}", "Hint:".yellow());
            }
            ExitCode::FAILURE
        }
    }
}

fn resolve_context(cli: &Cli) -> Ctx {
    let mut config = Config::load(cli.config.as_deref());
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }
    if let Some(dir) = &cli.snapshots {
        config.paths.snapshots = Some(dir.clone());
    }
    if cli.quiet {
        config.output.quiet = true;
    }
    if !config.output.colors {
        colored::control::set_override(false);
    }

    let format = cli.format.unwrap_or_else(|| {
        config.output.format.parse().unwrap_or_else(|e| {
            warn!("{e}; falling back to text output");
            OutputFormat::Text
        })
    });

    Ctx {
        quiet: config.output.quiet,
        config,
        format,
    }
}

fn run(cli: &Cli, ctx: &Ctx) -> Result<()> {
    match &cli.command {
        Commands::Accounts(args) => cmd_accounts(ctx, args),
        Commands::Account(args) => cmd_account(ctx, args),
        Commands::Viral(args) => cmd_viral(ctx, args),
        Commands::List(args) => cmd_list(ctx, args),
        Commands::Mark(args) => cmd_mark(ctx, args),
        Commands::Decide(args) => cmd_decide(ctx, args),
        Commands::Priority(args) => cmd_priority(ctx, args),
        Commands::Config(args) => cmd_config(ctx, args),
        Commands::Completions(args) => cmd_completions(args),
    }
}

// =============================================================================
// Setup
// =============================================================================

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn build_pool(config: &Config) -> Result<Arc<dyn PagePool>> {
    if let Some(dir) = &config.paths.snapshots {
        let pool = SnapshotPool::from_dir(dir)
            .with_context(|| format!("Failed to load snapshots from {}", dir.display()))?;
        return Ok(Arc::new(pool));
    }
    Ok(Arc::new(BrowserlessPool::from_config(&config.browser)?))
}

fn build_judge(config: &Config) -> Option<Arc<dyn HealthJudge>> {
    if !config.judge.enabled {
        debug!("Relevance judge disabled; keyword scoring only");
        return None;
    }
    match OpenAiJudge::from_config(&config.judge) {
        Ok(judge) => Some(Arc::new(judge)),
        Err(e) => {
            warn!(error = %e, "Relevance judge unavailable; keyword scoring only");
            None
        }
    }
}

fn build_discovery(ctx: &Ctx) -> Result<Discovery> {
    let storage = Storage::open(ctx.config.db_path())?;
    let mut discovery = Discovery::new(
        ctx.config.discovery.clone(),
        build_pool(&ctx.config)?,
        storage,
    );
    if let Some(judge) = build_judge(&ctx.config) {
        discovery = discovery.with_judge(judge);
    }
    Ok(discovery)
}

fn open_existing_storage(ctx: &Ctx) -> Result<Storage> {
    let db_path = ctx.config.db_path();
    if !db_path.exists() {
        return Err(ScoutError::DatabaseNotFound { path: db_path }.into());
    }
    Storage::open(&db_path)
}

fn spinner(ctx: &Ctx, message: String) -> ProgressBar {
    if ctx.quiet || ctx.format != OutputFormat::Text {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

// =============================================================================
// Discovery commands
// =============================================================================

/// Machine-readable result of a discovery command.
#[derive(Serialize)]
struct RunReport<'a, T> {
    status: &'static str,
    reason: Option<&'a str>,
    items: &'a [T],
    summary: Option<&'a StoreSummary>,
}

fn harvest_status<T>(harvest: &Harvest<T>) -> &'static str {
    match harvest {
        Harvest::Found(_) => "found",
        Harvest::Empty => "empty",
        Harvest::Failed(_) => "failed",
    }
}

fn cmd_accounts(ctx: &Ctx, args: &cli::AccountsArgs) -> Result<()> {
    let discovery = build_discovery(ctx)?;
    let pb = spinner(ctx, format!("Searching #{} for accounts", args.hashtag));
    let harvest = runtime()?.block_on(
        discovery.discover_accounts_via_search(&args.hashtag, args.limit),
    );
    pb.finish_and_clear();

    let summary = (!args.dry_run).then(|| discovery.store_accounts(harvest.items()));
    report(ctx, &harvest, summary.as_ref(), print_accounts)
}

fn cmd_account(ctx: &Ctx, args: &cli::AccountArgs) -> Result<()> {
    let discovery = build_discovery(ctx)?;
    let username = normalize_handle(&args.username);
    let followers = match args.followers {
        Some(n) => n,
        None => discovery
            .storage()
            .get_account(&username)?
            .map_or(0, |a| a.follower_count),
    };
    if followers == 0 {
        warn!(username = %username, "Follower count unknown; tiers will be relative");
    }

    let pb = spinner(ctx, format!("Scanning @{username}"));
    let harvest = runtime()?.block_on(discovery.find_reply_opportunities_from_account(
        &username,
        followers,
        args.engagement_rate,
    ));
    pb.finish_and_clear();

    let summary = (!args.dry_run).then(|| discovery.store_opportunities(harvest.items()));
    report(ctx, &harvest, summary.as_ref(), print_opportunities)
}

fn cmd_viral(ctx: &Ctx, args: &cli::ViralArgs) -> Result<()> {
    let discovery = build_discovery(ctx)?;
    let pb = spinner(ctx, format!("Searching for tweets with {}+ likes", args.min_likes));
    let harvest = runtime()?.block_on(discovery.find_viral_tweets_via_search(
        args.min_likes,
        args.max_replies,
        &args.label,
        args.max_age_hours,
        args.query.as_deref(),
    ));
    pb.finish_and_clear();

    let summary = (!args.dry_run).then(|| discovery.store_opportunities(harvest.items()));
    report(ctx, &harvest, summary.as_ref(), print_opportunities)
}

fn report<T: Serialize>(
    ctx: &Ctx,
    harvest: &Harvest<T>,
    summary: Option<&StoreSummary>,
    print_items: fn(&Ctx, &[T]) -> Result<()>,
) -> Result<()> {
    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let report = RunReport {
                status: harvest_status(harvest),
                reason: harvest.failure(),
                items: harvest.items(),
                summary,
            };
            print_json(ctx, &report)?;
        }
        _ => {
            if harvest.failure().is_none() {
                print_items(ctx, harvest.items())?;
                if let Some(summary) = summary {
                    print_summary(ctx, summary);
                }
            }
        }
    }

    match harvest.failure() {
        Some(reason) => anyhow::bail!("Discovery failed: {reason}"),
        None => Ok(()),
    }
}

fn print_summary(ctx: &Ctx, summary: &StoreSummary) {
    if ctx.quiet || ctx.format != OutputFormat::Text {
        return;
    }
    let mut line = format!(
        "Stored {}, skipped {}, failed {}",
        summary.stored.to_string().green(),
        summary.skipped.to_string().yellow(),
        summary.failed.to_string().red()
    );
    if !summary.tier_breakdown.is_empty() {
        let tiers = summary
            .tier_breakdown
            .iter()
            .map(|(tier, n)| format!("{tier}={n}"))
            .join(", ");
        line.push_str(&format!(" ({tiers})"));
    }
    println!("{line}");
}

// =============================================================================
// Output
// =============================================================================

fn print_json<T: Serialize + ?Sized>(ctx: &Ctx, value: &T) -> Result<()> {
    let json = if ctx.format == OutputFormat::JsonPretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn print_opportunities(ctx: &Ctx, items: &[ReplyOpportunity]) -> Result<()> {
    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(ctx, items)?,
        OutputFormat::Csv => {
            println!("tweet_id,tier,score,likes,replies,author,status,url,content");
            for o in items {
                println!(
                    "{},{},{:.1},{},{},{},{},{},\"{}\"",
                    o.tweet_id,
                    o.tier,
                    o.opportunity_score,
                    o.like_count,
                    o.reply_count,
                    o.tweet_author,
                    o.status.as_str(),
                    o.tweet_url,
                    csv_escape_text(&o.tweet_content)
                );
            }
        }
        OutputFormat::Compact => {
            for o in items {
                println!(
                    "[{}] {:.1} @{} {} | {}",
                    o.tier,
                    o.opportunity_score,
                    o.tweet_author,
                    o.tweet_id,
                    truncate_chars(&o.tweet_content, 80)
                );
            }
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("{}", "No opportunities found.".yellow());
                return Ok(());
            }
            println!("{} opportunities:\n", items.len().to_string().cyan());
            let now = Utc::now();
            for (i, o) in items.iter().enumerate() {
                print_opportunity(i + 1, o, now);
            }
        }
    }
    Ok(())
}

fn print_opportunity(num: usize, o: &ReplyOpportunity, now: chrono::DateTime<Utc>) {
    let badge = match o.tier {
        Tier::Viral(_) => format!(" {} ", o.tier).on_red(),
        Tier::Account(AccountTier::Golden) => format!(" {} ", o.tier).on_yellow(),
        Tier::Account(_) => format!(" {} ", o.tier).on_blue(),
    };
    println!(
        "{}. {} @{} {}",
        num.to_string().dimmed(),
        badge,
        o.tweet_author.bold(),
        format!("score {:.1}", o.opportunity_score).cyan()
    );
    for line in textwrap::wrap(&o.tweet_content, 78) {
        println!("   {line}");
    }
    let mut meta = format!(
        "{} likes · {} replies · {} · expires {}",
        format_number_u64(o.like_count),
        format_number_u64(o.reply_count),
        format_age_minutes(o.posted_minutes_ago),
        format_expiry_with_base(o.expires_at, now)
    );
    if let Some(category) = &o.health_category {
        meta.push_str(&format!(" · {category}"));
    }
    if o.status != OpportunityStatus::Pending {
        meta.push_str(&format!(" · {}", o.status.as_str()));
    }
    println!("   {}", meta.dimmed());
    println!("   {}", o.tweet_url.dimmed());
    println!();
}

fn print_accounts(ctx: &Ctx, items: &[DiscoveredAccount]) -> Result<()> {
    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(ctx, items)?,
        OutputFormat::Csv => {
            println!("username,followers,following,tweets,verified,method,bio");
            for a in items {
                println!(
                    "{},{},{},{},{},{},\"{}\"",
                    a.username,
                    a.follower_count,
                    a.following_count,
                    a.tweet_count,
                    a.verified,
                    a.discovery_method.as_str(),
                    csv_escape_text(&a.bio)
                );
            }
        }
        OutputFormat::Compact => {
            for a in items {
                println!("@{} {} followers", a.username, a.follower_count);
            }
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("{}", "No accounts found.".yellow());
                return Ok(());
            }
            println!("{} accounts:\n", items.len().to_string().cyan());
            for a in items {
                let check = if a.verified { " ✓".blue().to_string() } else { String::new() };
                println!(
                    "  @{}{}  {} followers · {} following · {} posts",
                    a.username.bold(),
                    check,
                    format_number_u64(a.follower_count).cyan(),
                    format_number_u64(a.following_count),
                    format_number_u64(a.tweet_count)
                );
                if !a.bio.is_empty() {
                    for line in textwrap::wrap(&a.bio, 74) {
                        println!("    {}", line.dimmed());
                    }
                }
            }
            println!();
        }
    }
    Ok(())
}

// =============================================================================
// Queue maintenance
// =============================================================================

fn cmd_list(ctx: &Ctx, args: &cli::ListArgs) -> Result<()> {
    let storage = open_existing_storage(ctx)?;
    match args.what {
        ListTarget::Opportunities => {
            let items = storage.list_opportunities(args.status, args.limit)?;
            print_opportunities(ctx, &items)
        }
        ListTarget::Accounts => {
            let items = storage.list_accounts(args.limit)?;
            print_accounts(ctx, &items)
        }
    }
}

fn cmd_mark(ctx: &Ctx, args: &cli::MarkArgs) -> Result<()> {
    let storage = open_existing_storage(ctx)?;
    if !storage.set_opportunity_status(&args.tweet_id, args.status)? {
        return Err(ScoutError::invalid_argument(format!(
            "no opportunity for tweet {}",
            args.tweet_id
        ))
        .into());
    }
    if !ctx.quiet {
        println!(
            "{} {} -> {}",
            "✓".green(),
            args.tweet_id,
            args.status.as_str().bold()
        );
    }
    Ok(())
}

fn cmd_decide(ctx: &Ctx, args: &cli::DecideArgs) -> Result<()> {
    let storage = Storage::open(ctx.config.db_path())?;
    let decision_id = args
        .id
        .clone()
        .unwrap_or_else(|| format!("reply-{}", args.tweet_id));
    storage.record_reply_decision(&decision_id, &args.tweet_id, args.status)?;
    if !ctx.quiet {
        println!(
            "{} decision {} for {} is {}",
            "✓".green(),
            decision_id,
            args.tweet_id,
            args.status.as_str().bold()
        );
    }
    Ok(())
}

fn cmd_priority(ctx: &Ctx, args: &cli::PriorityArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.score) {
        return Err(ScoutError::invalid_argument(format!(
            "priority must be within [0, 1], got {}",
            args.score
        ))
        .into());
    }
    let storage = Storage::open(ctx.config.db_path())?;
    let username = normalize_handle(&args.username);
    storage.set_account_priority(&username, args.score)?;
    if !ctx.quiet {
        println!("{} @{} priority {:.2}", "✓".green(), username, args.score);
    }
    Ok(())
}

// =============================================================================
// Config and completions
// =============================================================================

fn cmd_config(ctx: &Ctx, args: &cli::ConfigArgs) -> Result<()> {
    if args.defaults {
        print!("{}", Config::default_config_content());
        return Ok(());
    }
    if args.save {
        let path = ctx.config.save()?;
        println!("{} Saved configuration to {}", "✓".green(), path.display());
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(ctx, &ctx.config)?,
        _ => {
            println!("{}", "Current Configuration".bold().cyan());
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH).dimmed());
            println!("  Database: {}", ctx.config.db_path().display());
            match &ctx.config.paths.snapshots {
                Some(dir) => println!("  Pages:    snapshots in {}", dir.display()),
                None => println!("  Pages:    {}", ctx.config.browser.endpoint),
            }
            println!(
                "  Judge:    {}",
                if ctx.config.judge.enabled {
                    ctx.config.judge.model.clone()
                } else {
                    "disabled (keyword scoring)".to_string()
                }
            );
            if let Some(path) = Config::user_config_path() {
                println!("  Config:   {}", path.display());
            }
            if args.show {
                println!();
                print!("{}", toml::to_string_pretty(&ctx.config)?);
            }
        }
    }
    Ok(())
}

fn cmd_completions(args: &cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "xscout", &mut io::stdout());
    Ok(())
}
