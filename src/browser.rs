//! Browser page pool.
//!
//! Scrapers never own a browser. They lease a [`Page`] from a [`PagePool`]
//! through a [`PageLease`], which hands the page back when it goes out of
//! scope, including on early return and error paths.
//!
//! Two pools ship with the crate:
//!
//! - [`BrowserlessPool`] renders pages through a Browserless-compatible
//!   `/content` endpoint, with the X session cookie attached.
//! - [`SnapshotPool`] serves saved HTML, for offline runs and tests.

use crate::error::{Result, ScoutError};
use async_trait::async_trait;
use parking_lot::Mutex;
use scraper::{Html, Selector};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

/// A single browser tab.
#[async_trait]
pub trait Page: Send {
    /// Label the page was leased under.
    fn label(&self) -> &str;

    /// Navigate to `url`, failing if the page does not load within `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until `selector` matches. `Ok(false)` means it never appeared.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Rendered HTML of the current document.
    async fn content(&mut self) -> Result<String>;
}

/// Source of pages.
#[async_trait]
pub trait PagePool: Send + Sync {
    async fn acquire_page(&self, label: &str) -> Result<Box<dyn Page>>;

    fn release_page(&self, page: Box<dyn Page>);
}

/// A leased page, returned to its pool on drop.
pub struct PageLease<'a> {
    pool: &'a dyn PagePool,
    page: Option<Box<dyn Page>>,
}

impl<'a> PageLease<'a> {
    /// Acquire a page from `pool`.
    ///
    /// # Errors
    ///
    /// Propagates the pool's acquisition error.
    pub async fn acquire(pool: &'a dyn PagePool, label: &str) -> Result<Self> {
        let page = pool.acquire_page(label).await?;
        debug!(label, "Leased page");
        Ok(Self {
            pool,
            page: Some(page),
        })
    }

    /// The leased page.
    ///
    /// # Panics
    ///
    /// Never: the page is only taken in `drop`.
    pub fn page(&mut self) -> &mut dyn Page {
        self.page
            .as_deref_mut()
            .expect("page is present until the lease drops")
    }
}

impl Drop for PageLease<'_> {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            debug!(label = page.label(), "Released page");
            self.pool.release_page(page);
        }
    }
}

// =============================================================================
// Browserless
// =============================================================================

/// Pages rendered by a Browserless-compatible service.
pub struct BrowserlessPool {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    auth_token: Option<String>,
    permits: Arc<Semaphore>,
}

impl BrowserlessPool {
    /// Build a pool against `base_url`, allowing `max_pages` concurrent leases.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        auth_token: Option<String>,
        max_pages: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        if auth_token.is_none() {
            warn!("No X auth token configured; pages render logged out");
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            auth_token,
            permits: Arc::new(Semaphore::new(max_pages.max(1))),
        })
    }

    /// Build from configuration, reading secrets from the named variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &crate::config::BrowserConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok();
        let auth_token = std::env::var(&config.auth_token_env).ok();
        Self::new(&config.endpoint, token, auth_token, config.max_pages)
    }
}

#[async_trait]
impl PagePool for BrowserlessPool {
    async fn acquire_page(&self, label: &str) -> Result<Box<dyn Page>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ScoutError::page_unavailable(label, e.to_string()))?;
        Ok(Box::new(BrowserlessPage {
            label: label.to_string(),
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            auth_token: self.auth_token.clone(),
            url: None,
            html: None,
            _permit: permit,
        }))
    }

    fn release_page(&self, page: Box<dyn Page>) {
        // Dropping the page returns its permit.
        drop(page);
    }
}

struct BrowserlessPage {
    label: String,
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    auth_token: Option<String>,
    url: Option<String>,
    html: Option<String>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserlessPage {
    async fn render(
        &self,
        url: &str,
        wait_for: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        let endpoint = content_endpoint(&self.base_url, self.token.as_deref())?;

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let mut body = json!({
            "url": url,
            "gotoOptions": { "waitUntil": "domcontentloaded", "timeout": timeout_ms },
        });
        if let Some(selector) = wait_for {
            body["waitForSelector"] = json!({ "selector": selector, "timeout": timeout_ms });
        }
        if let Some(auth) = &self.auth_token {
            body["cookies"] = json!([{
                "name": "auth_token",
                "value": auth,
                "domain": ".x.com",
                "path": "/",
                "secure": true,
                "httpOnly": true,
            }]);
        }

        // Allow the service its own timeout plus transport slack.
        let request = self
            .client
            .post(endpoint)
            .json(&body)
            .timeout(timeout + Duration::from_secs(10))
            .send();
        let resp = match tokio::time::timeout(timeout + Duration::from_secs(15), request).await {
            Ok(resp) => resp?,
            Err(_) => return Err(ScoutError::timeout(url, timeout)),
        };

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ScoutError::BrowserApi {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.text().await?)
    }
}

/// `<base>/content`, with the token as an encoded query parameter.
fn content_endpoint(base_url: &str, token: Option<&str>) -> Result<Url> {
    let base = format!("{base_url}/content");
    let parsed = match token {
        Some(token) => Url::parse_with_params(&base, &[("token", token)]),
        None => Url::parse(&base),
    };
    parsed.map_err(|e| ScoutError::invalid_argument(format!("bad browser endpoint {base}: {e}")))
}

#[async_trait]
impl Page for BrowserlessPage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        debug!(label = %self.label, url, "Navigating");
        let html = self
            .render(url, None, timeout)
            .await
            .map_err(|e| match e {
                ScoutError::Timeout { .. } => e,
                other => ScoutError::navigation(url, other.to_string()),
            })?;
        self.url = Some(url.to_string());
        self.html = Some(html);
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        if self.html.as_deref().is_some_and(|h| html_matches(h, selector)) {
            return Ok(true);
        }
        let Some(url) = self.url.clone() else {
            return Err(ScoutError::invalid_argument("wait_for_selector before goto"));
        };
        // Re-render and let the service wait for client-side hydration.
        match self.render(&url, Some(selector), timeout).await {
            Ok(html) => {
                let found = html_matches(&html, selector);
                self.html = Some(html);
                Ok(found)
            }
            Err(ScoutError::BrowserApi { status: 408, .. } | ScoutError::Timeout { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn content(&mut self) -> Result<String> {
        self.html
            .clone()
            .ok_or_else(|| ScoutError::invalid_argument("content requested before goto"))
    }
}

fn html_matches(html: &str, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|sel| Html::parse_document(html).select(&sel).next().is_some())
        .unwrap_or(false)
}

// =============================================================================
// Snapshots
// =============================================================================

/// Serves saved HTML keyed by URL fragments.
///
/// A URL is reduced to a slug (lowercase, runs of non-alphanumerics become
/// `_`); the longest route whose own slug is a substring of it wins. So
/// `drhealth.html` in a snapshot directory answers `https://x.com/drhealth`.
#[derive(Clone, Default)]
pub struct SnapshotPool {
    routes: Arc<BTreeMap<String, String>>,
    outstanding: Arc<AtomicUsize>,
    visited: Arc<Mutex<Vec<String>>>,
    unavailable: bool,
}

impl SnapshotPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for URLs containing `fragment`.
    #[must_use]
    pub fn route(mut self, fragment: &str, html: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.routes).insert(slug(fragment), html.into());
        self
    }

    /// A pool whose `acquire_page` always fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Load every `*.html` file in `dir`, routed by file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a file cannot be read.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut pool = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let html = std::fs::read_to_string(&path)?;
            pool = pool.route(stem, html);
        }
        info!(dir = %dir.display(), routes = pool.routes.len(), "Loaded page snapshots");
        Ok(pool)
    }

    /// Pages leased and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Every URL navigated to, in order.
    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }

    fn lookup(&self, url: &str) -> Option<&String> {
        let url_slug = slug(url);
        self.routes
            .iter()
            .filter(|(key, _)| url_slug.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, html)| html)
    }
}

#[async_trait]
impl PagePool for SnapshotPool {
    async fn acquire_page(&self, label: &str) -> Result<Box<dyn Page>> {
        if self.unavailable {
            return Err(ScoutError::page_unavailable(label, "snapshot pool closed"));
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SnapshotPage {
            label: label.to_string(),
            pool: self.clone(),
            html: None,
        }))
    }

    fn release_page(&self, page: Box<dyn Page>) {
        drop(page);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SnapshotPage {
    label: String,
    pool: SnapshotPool,
    html: Option<String>,
}

#[async_trait]
impl Page for SnapshotPage {
    fn label(&self) -> &str {
        &self.label
    }

    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.pool.visited.lock().push(url.to_string());
        let html = self
            .pool
            .lookup(url)
            .cloned()
            .ok_or_else(|| ScoutError::navigation(url, "no snapshot for URL"))?;
        self.html = Some(html);
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        Ok(self
            .html
            .as_deref()
            .is_some_and(|h| html_matches(h, selector)))
    }

    async fn content(&mut self) -> Result<String> {
        self.html
            .clone()
            .ok_or_else(|| ScoutError::invalid_argument("content requested before goto"))
    }
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut gap = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.push(c.to_ascii_lowercase());
        } else {
            gap = true;
        }
    }
    out
}
