//! End-to-end CLI tests for xscout.
//!
//! These tests run the actual xscout binary against page snapshots on disk
//! and a temporary database, and verify:
//! - Command-line interface behavior
//! - Output format and content
//! - Error handling and messages
//!
//! # Test Organization
//!
//! - `test_cli_*` - General CLI tests (flags, help, version)
//! - `test_viral_*` / `test_account_*` - Discovery commands
//! - `test_queue_*` - list, mark, decide and priority

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use chrono::{Duration, SecondsFormat, Utc};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Log a test event with timestamp
macro_rules! test_log {
    ($($arg:tt)*) => {
        let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        eprintln!("[TEST {}] {}", timestamp, format!($($arg)*));
    };
}

const CONFIG: &str = r#"
[judge]
enabled = false

[discovery]
request_delay_min_ms = 0
request_delay_max_ms = 0
navigation_timeout_secs = 5
selector_timeout_secs = 5
"#;

fn article(id: &str, author: &str, text: &str, minutes_ago: i64, likes: &str, replies: &str) -> String {
    let posted = (Utc::now() - Duration::minutes(minutes_ago))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        r#"<article data-testid="tweet">
            <div data-testid="User-Name"><a href="/{author}" role="link"><span>@{author}</span></a></div>
            <a href="/{author}/status/{id}"><time datetime="{posted}">now</time></a>
            <div data-testid="tweetText"><span>{text}</span></div>
            <button data-testid="reply" aria-label="{replies} Replies. Reply"><span>{replies}</span></button>
            <button data-testid="like" aria-label="{likes} Likes. Like"><span>{likes}</span></button>
          </article>"#
    )
}

/// A workspace holding a config file, a snapshot directory and a database path.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(dir.path().join("pages")).expect("Failed to create pages dir");
        fs::write(dir.path().join("config.toml"), CONFIG).expect("Failed to write config");
        Self { dir }
    }

    fn with_page(self, stem: &str, articles: &[String]) -> Self {
        let html = format!("<html><body><main>{}</main></body></html>", articles.join("\n"));
        fs::write(self.pages().join(format!("{stem}.html")), html).expect("Failed to write page");
        self
    }

    fn pages(&self) -> PathBuf {
        self.dir.path().join("pages")
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("data").join("xscout.db")
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn cmd(&self) -> Command {
        let mut cmd = xscout_cmd();
        cmd.arg("--config")
            .arg(self.config())
            .arg("--db")
            .arg(self.db())
            .arg("--snapshots")
            .arg(self.pages());
        cmd
    }
}

fn xscout_cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("xscout");
    cmd.env("NO_COLOR", "1")
        .env_remove("XSCOUT_DB")
        .env_remove("XSCOUT_SNAPSHOTS")
        .env_remove("XSCOUT_FORMAT")
        .env_remove("OPENAI_API_KEY");
    cmd
}

fn cold_exposure_workspace() -> Workspace {
    Workspace::new().with_page(
        "search",
        &[article(
            "111",
            "coldscience",
            "New study: 8 minutes of cold exposure boosts metabolism 15%",
            90,
            "12K",
            "40",
        )],
    )
}

fn db_exists(path: &Path) -> bool {
    path.exists()
}

// =============================================================================
// General CLI
// =============================================================================

#[test]
fn test_cli_help() {
    test_log!("Starting test_cli_help");
    xscout_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("opportunities"))
        .stdout(predicate::str::contains("viral"))
        .stdout(predicate::str::contains("accounts"));
}

#[test]
fn test_cli_version() {
    xscout_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_no_args() {
    xscout_cmd().assert().failure();
}

#[test]
fn test_cli_config_defaults() {
    xscout_cmd()
        .args(["config", "--defaults"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[discovery]"))
        .stdout(predicate::str::contains("default_viral_query"))
        .stdout(predicate::str::contains("[browser]"));
}

#[test]
fn test_cli_completions() {
    xscout_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("xscout"));
}

// =============================================================================
// Discovery commands
// =============================================================================

#[test]
fn test_viral_stores_and_lists() {
    test_log!("Starting test_viral_stores_and_lists");
    let ws = cold_exposure_workspace();

    ws.cmd()
        .arg("viral")
        .assert()
        .success()
        .stdout(predicate::str::contains("@coldscience"))
        .stdout(predicate::str::contains("VIRAL"))
        .stdout(predicate::str::contains("Stored 1, skipped 0, failed 0"));
    assert!(db_exists(&ws.db()));

    let output = ws
        .cmd()
        .args(["list", "--format", "json"])
        .output()
        .expect("Failed to run list");
    assert!(output.status.success());
    let items: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("list output is JSON");
    let items = items.as_array().expect("JSON array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["tweet_id"], "111");
    assert_eq!(items[0]["tier"], "VIRAL");
    assert_eq!(items[0]["status"], "pending");
    assert!((items[0]["opportunity_score"].as_f64().unwrap() - 80.0).abs() < 1e-9);
}

#[test]
fn test_viral_dry_run_writes_nothing() {
    let ws = cold_exposure_workspace();

    ws.cmd()
        .args(["viral", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@coldscience"))
        .stdout(predicate::str::contains("Stored").not());

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No opportunities found"));
}

#[test]
fn test_viral_json_report() {
    let ws = cold_exposure_workspace();

    let output = ws
        .cmd()
        .args(["viral", "--format", "json", "--min-likes", "20000"])
        .output()
        .expect("Failed to run viral");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "empty");
    assert_eq!(report["summary"]["stored"], 0);
}

#[test]
fn test_viral_missing_snapshot_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("viral")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Discovery failed"));
}

#[test]
fn test_viral_skips_replied_tweets() {
    let ws = cold_exposure_workspace();
    ws.cmd().arg("viral").assert().success();

    ws.cmd()
        .args(["mark", "111", "replied"])
        .assert()
        .success()
        .stdout(predicate::str::contains("replied"));

    ws.cmd()
        .arg("viral")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 0, skipped 1"));
}

#[test]
fn test_account_uses_followers_flag() {
    let ws = Workspace::new().with_page(
        "x_com_drhealth",
        &[article(
            "201",
            "drhealth",
            "Morning sunlight anchors your circadian rhythm and sleep",
            30,
            "200",
            "10",
        )],
    );

    ws.cmd()
        .args(["account", "@drhealth", "--followers", "10000", "--format", "compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[golden]"))
        .stdout(predicate::str::contains("@drhealth 201"));
}

// =============================================================================
// Queue maintenance
// =============================================================================

#[test]
fn test_queue_list_without_database_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No database found"));
}

#[test]
fn test_queue_mark_unknown_tweet_fails() {
    let ws = cold_exposure_workspace();
    ws.cmd().arg("viral").assert().success();

    ws.cmd()
        .args(["mark", "999", "claimed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no opportunity for tweet 999"));
}

#[test]
fn test_queue_decision_blocks_discovery() {
    let ws = cold_exposure_workspace();

    ws.cmd()
        .args(["decide", "111", "posting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reply-111"));

    ws.cmd()
        .arg("viral")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored 0, skipped 1"));
}

#[test]
fn test_queue_priority_validates_range() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["priority", "@coldscience", "0.8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("@coldscience priority 0.80"));

    ws.cmd()
        .args(["priority", "coldscience", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("priority must be within"));
}
