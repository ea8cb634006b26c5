//! Custom error types for xscout.
//!
//! Discovery entry points never surface these to their callers (they degrade
//! to an empty [`crate::discovery::Harvest`]), but the layers underneath use
//! them so that the log line says exactly what went wrong.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for xscout operations.
#[derive(Error, Debug)]
pub enum ScoutError {
    // =========================================================================
    // Browser Errors
    // =========================================================================
    /// No page could be acquired from the pool.
    #[error("Failed to acquire browser page '{label}': {reason}")]
    PageUnavailable { label: String, reason: String },

    /// Navigation to a URL failed.
    #[error("Navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    /// A navigation or selector wait exceeded its budget.
    #[error("Timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    /// The rendering service answered with a non-success status.
    #[error("Browser service error (status {status}): {message}")]
    BrowserApi { status: u16, message: String },

    // =========================================================================
    // Judge Errors
    // =========================================================================
    /// The relevance judge call failed or returned garbage.
    #[error("Relevance judge failed: {reason}")]
    Judge { reason: String },

    /// Transport-level HTTP failure.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A required environment variable is missing or unusable.
    #[error("Environment variable {var}: {reason}")]
    EnvVarError { var: String, reason: String },

    // =========================================================================
    // Local state
    // =========================================================================
    /// The queue database has not been created yet.
    #[error("No database found at {path}. Run a discovery command first.")]
    DatabaseNotFound { path: PathBuf },

    /// Invalid command-line argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for xscout operations.
pub type Result<T> = std::result::Result<T, ScoutError>;

impl ScoutError {
    /// Create a navigation error.
    pub fn navigation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Create a judge error.
    pub fn judge(reason: impl Into<String>) -> Self {
        Self::Judge {
            reason: reason.into(),
        }
    }

    /// Create a page-unavailable error.
    pub fn page_unavailable(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PageUnavailable {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Transient failures mean "no data this round"; the next target may work.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Navigation { .. }
                | Self::Network(_)
                | Self::BrowserApi { .. }
                | Self::PageUnavailable { .. }
        )
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseNotFound { .. } => {
                Some("Run 'xscout viral' or 'xscout account <name>' to create the database.")
            }
            Self::EnvVarError { .. } => Some("Export the variable, or rename it in config.toml."),
            Self::BrowserApi { status: 401 | 403, .. } => {
                Some("Check BROWSERLESS_TOKEN and the X_AUTH_TOKEN session cookie (see [browser]).")
            }
            Self::Judge { .. } => Some("Set OPENAI_API_KEY or disable the judge with [judge] enabled = false."),
            Self::Timeout { .. } => Some("Raise [discovery] navigation_timeout_secs if the network is slow."),
            _ => None,
        }
    }
}
