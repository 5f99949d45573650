//! Page extraction pipeline: navigate, survive anti-bot interstitials,
//! verify the content is genuine, and produce a structured record.
//!
//! Every scrape runs inside a fresh disposable browser context so cookies
//! and storage never leak between unrelated requests sharing a pooled
//! browser process.

use crate::browser_pool::BrowserPool;
use crate::parsers::{extract_record, FigureRecord};
use crate::utils::{item_url, sanitize_log, similarity, TARGET_DOMAIN};
use crate::{Config, ScrapeError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::{Browser, Page};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Poll interval while waiting out a challenge interstitial.
const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Phrases shown by the common anti-bot interstitials, lowercased.
pub const CHALLENGE_PATTERNS: &[&str] = &[
    "just a moment",
    "checking your browser",
    "verify you are human",
    "verifying you are human",
    "attention required",
    "ddos protection",
    "un momento",
    "einen moment",
    "подождите",
    "しばらくお待ちください",
];

const TITLE_SIMILARITY_THRESHOLD: f64 = 0.80;
const BODY_SIMILARITY_THRESHOLD: f64 = 0.70;

/// Opaque bag of credential cookies supplied by a caller. Only allowlisted
/// names ever reach a browser; values never reach a log line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieBag(pub BTreeMap<String, String>);

impl CookieBag {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted cookie names, used for change detection and redacted logging.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Allowlisted names with values replaced, safe for structured logs.
    pub fn redacted(&self, config: &Config) -> String {
        let entries: Vec<String> = self
            .0
            .keys()
            .filter(|name| config.cookie_allowed(name))
            .map(|name| format!("{name}=<redacted>"))
            .collect();
        format!("[{}]", entries.join(", "))
    }
}

impl<const N: usize> From<[(&str, &str); N]> for CookieBag {
    fn from(pairs: [(&str, &str); N]) -> Self {
        CookieBag(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// One unit of work handed to the scraper by the queue.
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    pub item_id: String,
    pub url: String,
    pub cookies: Option<CookieBag>,
    pub session_id: Option<String>,
}

impl ScrapeJob {
    pub fn new(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            url: item_url(item_id),
            cookies: None,
            session_id: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.cookies.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// The single call surface between the queue and the browser machinery.
/// Test doubles implement this to script outcomes without Chrome.
#[async_trait]
pub trait ItemScraper: Send + Sync {
    async fn scrape(&self, job: &ScrapeJob) -> Result<FigureRecord, ScrapeError>;
}

/// Production scraper: picks the stealth browser for credentialed jobs and
/// a pooled browser otherwise, then runs the extraction pipeline in an
/// isolated context.
pub struct BrowserScraper {
    pool: Arc<BrowserPool>,
    config: Arc<Config>,
}

impl BrowserScraper {
    pub fn new(pool: Arc<BrowserPool>, config: Arc<Config>) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl ItemScraper for BrowserScraper {
    async fn scrape(&self, job: &ScrapeJob) -> Result<FigureRecord, ScrapeError> {
        if job.has_credentials() {
            let stealth = self.pool.acquire_stealth().await?;
            extract_in_context(stealth.browser(), job, &self.config).await
        } else {
            let lease = self.pool.acquire().await?;
            // The lease returns the browser to the pool on drop, whatever
            // happens inside the context.
            extract_in_context(lease.browser(), job, &self.config).await
        }
    }
}

/// Run one extraction inside a fresh browser context, closing the page and
/// disposing the context on every exit path.
pub async fn extract_in_context(
    browser: &Browser,
    job: &ScrapeJob,
    config: &Config,
) -> Result<FigureRecord, ScrapeError> {
    let context_id = browser
        .create_browser_context(CreateBrowserContextParams::default())
        .await
        .map_err(|e| ScrapeError::Navigation(format!("create context: {e}")))?;

    let params = CreateTargetParams::builder()
        .url("about:blank")
        .browser_context_id(context_id.clone())
        .build()
        .map_err(ScrapeError::Navigation)?;
    let page = match browser.new_page(params).await {
        Ok(page) => page,
        Err(e) => {
            let _ = browser.dispose_browser_context(context_id).await;
            return Err(ScrapeError::Navigation(format!("new page: {e}")));
        }
    };

    let result = extract(&page, job, config).await;

    if let Err(e) = page.close().await {
        debug!("error closing page for item {}: {e}", job.item_id);
    }
    if let Err(e) = browser.dispose_browser_context(context_id).await {
        debug!("error disposing context for item {}: {e}", job.item_id);
    }

    result
}

/// The extraction pipeline against an already-created page.
pub async fn extract(
    page: &Page,
    job: &ScrapeJob,
    config: &Config,
) -> Result<FigureRecord, ScrapeError> {
    if let Some(cookies) = &job.cookies {
        apply_credentials(page, cookies, config).await?;
    }

    navigate(page, &job.url, config).await?;
    tokio::time::sleep(config.effective_post_load_wait()).await;

    wait_out_challenge(page, config).await;

    let title = page
        .get_title()
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    let html = page
        .content()
        .await
        .map_err(|e| ScrapeError::Extraction(format!("page content: {e}")))?;

    if looks_like_error_page(&title, &html) {
        return if job.has_credentials() {
            Err(ScrapeError::NotAccessible(job.url.clone()))
        } else {
            Err(ScrapeError::NotFound(job.url.clone()))
        };
    }

    Ok(extract_record(&html, &job.item_id))
}

/// Install caller credentials: navigate to the site origin first so the
/// cookies have a domain context, then set only allowlisted, non-empty
/// cookies. The session-token cookie gets hardened attributes.
async fn apply_credentials(
    page: &Page,
    cookies: &CookieBag,
    config: &Config,
) -> Result<(), ScrapeError> {
    let origin = format!("https://{TARGET_DOMAIN}/");
    navigate(page, &origin, config).await?;
    debug!("installing cookies {}", cookies.redacted(config));

    for (name, value) in &cookies.0 {
        if value.is_empty() {
            debug!("dropping empty cookie {}", sanitize_log(name));
            continue;
        }
        if !config.cookie_allowed(name) {
            debug!("unknown cookie {}", sanitize_log(name));
            continue;
        }

        let mut builder = CookieParam::builder()
            .name(name.clone())
            .value(value.clone())
            .domain(format!(".{TARGET_DOMAIN}"))
            .path("/");

        if *name == config.session_cookie_name {
            builder = builder
                .http_only(true)
                .secure(true)
                .same_site(CookieSameSite::Lax);
        }

        let param = builder
            .build()
            .map_err(|e| ScrapeError::Session(format!("cookie build: {e}")))?;
        if let Err(e) = page.set_cookie(param).await {
            warn!("failed to install cookie {}: {e}", sanitize_log(name));
        }
    }

    Ok(())
}

async fn navigate(page: &Page, url: &str, config: &Config) -> Result<(), ScrapeError> {
    let navigation = async {
        page.goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        Ok::<(), ScrapeError>(())
    };

    match timeout(config.navigation_timeout, navigation).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::Timeout(format!(
            "navigation to {} exceeded {:?}",
            sanitize_log(url),
            config.navigation_timeout
        ))),
    }
}

/// Whether the page is an anti-bot challenge interstitial.
pub fn looks_like_challenge(title: &str, body: &str) -> bool {
    let title = normalize(title);
    let body = normalize(body);

    for pattern in CHALLENGE_PATTERNS {
        if title.contains(pattern) || body.contains(pattern) {
            return true;
        }
    }

    // Slightly mangled interstitials (entity soup, injected markup) still
    // match by edit distance.
    CHALLENGE_PATTERNS.iter().any(|pattern| {
        similarity(&title, pattern) >= TITLE_SIMILARITY_THRESHOLD
            || similarity(&body, pattern) >= BODY_SIMILARITY_THRESHOLD
    })
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Poll until the challenge phrase disappears, bounded by the configured
/// outer timeout. Proceeds either way; the error-page check downstream
/// decides what the scrape actually produced.
async fn wait_out_challenge(page: &Page, config: &Config) {
    let deadline = tokio::time::Instant::now() + config.challenge_wait_timeout;

    loop {
        let title = page.get_title().await.ok().flatten().unwrap_or_default();
        let body = visible_body_text(page).await;
        if !looks_like_challenge(&title, &body) {
            return;
        }

        if tokio::time::Instant::now() >= deadline {
            warn!("challenge page did not clear within {:?}, proceeding", config.challenge_wait_timeout);
            return;
        }
        debug!("challenge page detected, waiting");
        tokio::time::sleep(CHALLENGE_POLL_INTERVAL).await;
    }
}

async fn visible_body_text(page: &Page) -> String {
    match page
        .evaluate("document.body ? document.body.innerText : ''")
        .await
    {
        Ok(result) => result.into_value::<String>().unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Whether the loaded document is the site's error/404 shell rather than an
/// item profile.
pub fn looks_like_error_page(title: &str, html: &str) -> bool {
    let title = title.to_lowercase();
    // Match the error shell's titles, not item names that merely contain
    // the word "error".
    if title.contains("404")
        || title.contains("not found")
        || title.trim() == "error"
        || title.starts_with("error ")
    {
        return true;
    }
    let html = html.to_lowercase();
    html.contains("class=\"error-page\"")
        || html.contains("the item you requested does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_detection_by_substring() {
        assert!(looks_like_challenge("Just a moment...", ""));
        assert!(looks_like_challenge("", "Checking your browser before accessing"));
        assert!(looks_like_challenge("JUST A MOMENT", ""));
        assert!(!looks_like_challenge("Hatsune Miku - My Figure Collection", "item profile"));
    }

    #[test]
    fn challenge_detection_by_similarity() {
        // One character off, substring check misses, edit distance catches.
        assert!(looks_like_challenge("just a m0ment", ""));
        assert!(!looks_like_challenge("completely unrelated title", "regular page body"));
    }

    #[test]
    fn error_page_detection() {
        assert!(looks_like_error_page("404 Not Found", ""));
        assert!(looks_like_error_page("Error", "<html></html>"));
        assert!(looks_like_error_page(
            "Item",
            "<div class=\"error-page\">gone</div>"
        ));
        assert!(!looks_like_error_page("Hatsune Miku", "<div class=\"item\"></div>"));
    }

    #[test]
    fn cookie_bag_redaction_hides_values() {
        let config = Config::default();
        let bag = CookieBag::from([("PHPSESSID", "secret-value"), ("tracking", "x")]);
        let redacted = bag.redacted(&config);
        assert!(redacted.contains("PHPSESSID"));
        assert!(!redacted.contains("secret-value"));
        assert!(!redacted.contains("tracking"));
    }

    #[test]
    fn scrape_job_credentials() {
        let mut job = ScrapeJob::new("12345");
        assert!(!job.has_credentials());
        assert_eq!(job.url, "https://myfigurecollection.net/item/12345");

        job.cookies = Some(CookieBag::default());
        assert!(!job.has_credentials());

        job.cookies = Some(CookieBag::from([("PHPSESSID", "abc")]));
        assert!(job.has_credentials());
    }
}
