//! Configuration system for xscout.
//!
//! Settings are layered, later layers winning:
//!
//! 1. Compiled defaults
//! 2. `~/.config/xscout/config.toml`, or the file passed with `--config`
//! 3. `XSCOUT_*` environment variables
//! 4. Command-line flags (applied by the binary)
//!
//! Secrets never live in the file; it names the environment variables that
//! hold them (`token_env`, `auth_token_env`, `api_key_env`).
//!
//! # Example
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/xscout/xscout.db"
//!
//! [browser]
//! endpoint = "http://localhost:3000"
//! max_pages = 2
//!
//! [judge]
//! enabled = true
//! model = "gpt-4o-mini"
//!
//! [discovery]
//! account_max_age_hours = 12
//! request_delay_min_ms = 2000
//! request_delay_max_ms = 3000
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure for xscout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// Rendering service configuration.
    pub browser: BrowserConfig,
    /// Health relevance judge configuration.
    pub judge: JudgeConfig,
    /// Discovery limits, timeouts and pacing.
    pub discovery: DiscoveryConfig,
    /// Output formatting configuration.
    pub output: OutputConfig,
}

/// Path configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `XSCOUT_DB`
    pub db: Option<PathBuf>,

    /// Directory of saved page snapshots for offline runs.
    /// Environment variable: `XSCOUT_SNAPSHOTS`
    pub snapshots: Option<PathBuf>,
}

/// Browserless-compatible rendering service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Base URL of the service.
    /// Environment variable: `XSCOUT_BROWSER_ENDPOINT`
    pub endpoint: String,

    /// Environment variable holding the service token.
    pub token_env: String,

    /// Environment variable holding the X `auth_token` cookie.
    pub auth_token_env: String,

    /// Maximum concurrently leased pages.
    pub max_pages: usize,
}

/// Relevance judge (OpenAI-compatible chat completions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Use the LLM judge; when false only the keyword fallback runs.
    /// Environment variable: `XSCOUT_JUDGE_ENABLED`
    pub enabled: bool,

    /// Model name.
    /// Environment variable: `XSCOUT_JUDGE_MODEL`
    pub model: String,

    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Discovery limits and pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub account_max_articles: usize,
    pub hashtag_max_articles: usize,
    pub viral_max_articles: usize,

    /// Maximum tweet age on account timelines.
    pub account_max_age_hours: u32,
    /// Maximum tweet age in hashtag search results.
    pub hashtag_max_age_hours: u32,

    pub account_min_likes: u64,
    pub account_max_replies: u64,

    pub navigation_timeout_secs: u64,
    pub selector_timeout_secs: u64,

    /// Randomized pause between profile fetches on the same page.
    /// Environment variables: `XSCOUT_DELAY_MIN_MS`, `XSCOUT_DELAY_MAX_MS`
    pub request_delay_min_ms: u64,
    pub request_delay_max_ms: u64,

    /// Our own handle; never proposed as a discovered account.
    /// Environment variable: `XSCOUT_USERNAME`
    pub own_username: Option<String>,

    /// Query used by viral search when none is given.
    pub default_viral_query: String,
}

/// Output formatting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty, compact, csv.
    pub format: String,

    /// Enable colored output.
    pub colors: bool,

    /// Suppress non-essential output (progress spinners, etc.).
    pub quiet: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            token_env: "BROWSERLESS_TOKEN".to_string(),
            auth_token_env: "X_AUTH_TOKEN".to_string(),
            max_pages: 2,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            account_max_articles: 20,
            hashtag_max_articles: 30,
            viral_max_articles: 50,
            account_max_age_hours: 12,
            hashtag_max_age_hours: 24,
            account_min_likes: 5,
            account_max_replies: 100,
            navigation_timeout_secs: 30,
            selector_timeout_secs: 15,
            request_delay_min_ms: 2000,
            request_delay_max_ms: 3000,
            own_username: None,
            default_viral_query: "(health OR wellness OR longevity OR sleep OR nutrition) lang:en"
                .to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    #[must_use]
    pub const fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    /// Inclusive delay bounds, ordered even if configured backwards.
    #[must_use]
    pub fn delay_bounds_ms(&self) -> (u64, u64) {
        let (a, b) = (self.request_delay_min_ms, self.request_delay_max_ms);
        (a.min(b), a.max(b))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `explicit` file if given, else the user config file
    /// 3. Compiled defaults
    #[must_use]
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = Self::default();
        let from_file = explicit.map_or_else(Self::load_user_config, Self::load_from_file);
        if let Some(file) = from_file {
            config.merge(file);
        }
        config.apply_env_overrides();
        debug!(?config, "Effective configuration");
        config
    }

    /// Read one config file. Missing or invalid files yield `None` so a
    /// bad file never stops a discovery run.
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config file unreadable, using defaults");
                return None;
            }
        };
        match toml::from_str(&content) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                Some(config)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config file invalid, using defaults");
                None
            }
        }
    }

    fn load_user_config() -> Option<Self> {
        Self::load_from_file(&Self::user_config_path()?)
    }

    /// `<config dir>/xscout/config.toml`, if the platform has a config dir.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("xscout").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `XSCOUT_*` overrides from an arbitrary lookup.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Paths
        if let Some(db) = lookup("XSCOUT_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }
        if let Some(dir) = lookup("XSCOUT_SNAPSHOTS") {
            self.paths.snapshots = Some(PathBuf::from(dir));
        }

        // Browser
        if let Some(endpoint) = lookup("XSCOUT_BROWSER_ENDPOINT") {
            self.browser.endpoint = endpoint;
        }

        // Judge
        if let Some(enabled) = lookup("XSCOUT_JUDGE_ENABLED") {
            match parse_bool(&enabled) {
                Some(v) => self.judge.enabled = v,
                None => warn!(value = %enabled, "Ignoring XSCOUT_JUDGE_ENABLED"),
            }
        }
        if let Some(model) = lookup("XSCOUT_JUDGE_MODEL") {
            self.judge.model = model;
        }

        // Discovery
        if let Some(name) = lookup("XSCOUT_USERNAME") {
            self.discovery.own_username = Some(name);
        }
        if let Some(ms) = lookup("XSCOUT_DELAY_MIN_MS").and_then(|v| v.parse().ok()) {
            self.discovery.request_delay_min_ms = ms;
        }
        if let Some(ms) = lookup("XSCOUT_DELAY_MAX_MS").and_then(|v| v.parse().ok()) {
            self.discovery.request_delay_max_ms = ms;
        }

        // Output
        if let Some(format) = lookup("XSCOUT_FORMAT") {
            self.output.format = format;
        }
        if lookup("XSCOUT_NO_COLOR").is_some() || lookup("NO_COLOR").is_some() {
            self.output.colors = false;
        }
        if lookup("XSCOUT_QUIET").is_some() {
            self.output.quiet = true;
        }
    }

    /// Layer a file's settings over these. `other` wins everywhere except
    /// optional values it leaves unset.
    fn merge(&mut self, other: Self) {
        // Paths
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }
        if other.paths.snapshots.is_some() {
            self.paths.snapshots = other.paths.snapshots;
        }

        // Sections without optional fields are replaced wholesale; serde
        // already filled anything missing from the file with defaults.
        self.browser = other.browser;
        self.judge = other.judge;

        let own_username = other
            .discovery
            .own_username
            .clone()
            .or_else(|| self.discovery.own_username.take());
        self.discovery = DiscoveryConfig {
            own_username,
            ..other.discovery
        };

        self.output = other.output;
    }

    /// Configured database path, else the platform data directory.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Write these settings to the user config file, returning its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no config directory or the file
    /// cannot be written.
    pub fn save(&self) -> std::io::Result<PathBuf> {
        let path = Self::user_config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory on this platform")
        })?;
        let body = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, body)?;
        info!(path = %path.display(), "Saved config");
        Ok(path)
    }

    /// A commented config file holding every default.
    #[must_use]
    pub fn default_config_content() -> String {
        let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
        format!("# xscout configuration\n# XSCOUT_* environment variables override these values.\n\n{body}")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
