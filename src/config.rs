//! Configuration management with serde serialization/deserialization
//!
//! Layering order: built-in defaults, optional JSON config file, environment
//! variables (`MFC_SCRAPER_*`), CLI flags. Later layers win.

use crate::cache::CacheTtlTable;
use crate::rate_limiter::RateLimiterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on the post-load settle wait, whatever the configuration
/// says. Prevents resource exhaustion through hostile settle values.
pub const MAX_SETTLE_WAIT: Duration = Duration::from_secs(15);

/// Main configuration for the scraping service.
///
/// # Examples
///
/// ```rust
/// use mfc_scraper::Config;
///
/// let config = Config {
///     browser_pool_size: 5,
///     ..Default::default()
/// };
/// assert_eq!(config.browser_pool_size, 5);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Port the HTTP surface listens on.
    pub port: u16,

    /// Number of Chrome instances kept in the pool (default: 3).
    pub browser_pool_size: usize,

    /// Path to the Chrome/Chromium executable; auto-detected when unset.
    pub chrome_path: Option<String>,

    /// Cookie names accepted from callers. Everything else in a credential
    /// bag is dropped before it reaches a browser.
    pub cookie_allowlist: Vec<String>,

    /// Name of the session-token cookie; installed with hardened attributes.
    pub session_cookie_name: String,

    /// Shared secret for the admin routes. When unset the admin routes
    /// reject every request.
    pub admin_token: Option<String>,

    /// Production mode: admin routes are not registered at all.
    pub production: bool,

    /// Pacing parameters for the processing stream.
    pub rate_limit: RateLimiterConfig,

    /// Per-navigation timeout.
    pub navigation_timeout: Duration,

    /// Settle time after DOM content loaded, capped at [`MAX_SETTLE_WAIT`].
    pub post_load_wait: Duration,

    /// Outer bound on waiting out an anti-bot challenge page.
    pub challenge_wait_timeout: Duration,

    /// How long `acquire` waits for a pooled browser before failing.
    pub pool_acquire_timeout: Duration,

    /// Default retry cap for queue items.
    pub max_retries: u32,

    /// Automatic wait after a credentialed failure before that session's
    /// items become dispatchable again.
    pub failure_cooldown: Duration,

    /// Outbound notification endpoint; notifications are skipped when unset.
    pub webhook_url: Option<String>,

    /// TTL table for the record cache, keyed by release-date category.
    pub cache_ttl: CacheTtlTable,

    /// Known-public item used by the connectivity probe.
    pub probe_item_id: String,

    /// Test mode: no browser launches on empty-pool acquire (fail fast),
    /// and `clear` drops subscribers silently.
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3020,
            browser_pool_size: 3,
            chrome_path: None,
            cookie_allowlist: default_cookie_allowlist(),
            session_cookie_name: "PHPSESSID".to_string(),
            admin_token: None,
            production: false,
            rate_limit: RateLimiterConfig::default(),
            navigation_timeout: Duration::from_secs(30),
            post_load_wait: Duration::from_secs(2),
            challenge_wait_timeout: Duration::from_secs(10),
            pool_acquire_timeout: Duration::from_secs(30),
            max_retries: 3,
            failure_cooldown: crate::session::FAILURE_COOLDOWN,
            webhook_url: None,
            cache_ttl: CacheTtlTable::default(),
            probe_item_id: "1".to_string(),
            test_mode: false,
        }
    }
}

fn default_cookie_allowlist() -> Vec<String> {
    ["PHPSESSID", "remember", "jwt", "cf_clearance"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Defaults overridden by `MFC_SCRAPER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Apply environment overrides to an already-loaded configuration.
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parse("MFC_SCRAPER_PORT") {
            self.port = port;
        }
        if let Some(size) = env_parse("MFC_SCRAPER_POOL_SIZE") {
            self.browser_pool_size = size;
        }
        if let Ok(path) = std::env::var("MFC_SCRAPER_CHROME_PATH") {
            if !path.is_empty() {
                self.chrome_path = Some(path);
            }
        }
        if let Ok(list) = std::env::var("MFC_SCRAPER_COOKIE_ALLOWLIST") {
            let names: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                self.cookie_allowlist = names;
            }
        }
        if let Ok(token) = std::env::var("MFC_SCRAPER_ADMIN_TOKEN") {
            if !token.is_empty() {
                self.admin_token = Some(token);
            }
        }
        if let Ok(env) = std::env::var("MFC_SCRAPER_ENV") {
            self.production = env.eq_ignore_ascii_case("production");
        }
        if let Some(ms) = env_parse("MFC_SCRAPER_RATE_BASE_MS") {
            self.rate_limit.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("MFC_SCRAPER_RATE_FLOOR_MS") {
            self.rate_limit.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("MFC_SCRAPER_RATE_CEILING_MS") {
            self.rate_limit.max_delay = Duration::from_millis(ms);
        }
        if let Some(mult) = env_parse::<f64>("MFC_SCRAPER_RATE_MULTIPLIER") {
            if mult > 1.0 {
                self.rate_limit.multiplier = mult;
            }
        }
        if let Ok(url) = std::env::var("MFC_SCRAPER_WEBHOOK_URL") {
            if !url.is_empty() {
                self.webhook_url = Some(url);
            }
        }
    }

    /// Effective settle wait after navigation, clamped to the hard cap.
    pub fn effective_post_load_wait(&self) -> Duration {
        self.post_load_wait.min(MAX_SETTLE_WAIT)
    }

    pub fn cookie_allowed(&self, name: &str) -> bool {
        self.cookie_allowlist.iter().any(|allowed| allowed == name)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Chrome command-line arguments for a pooled browser instance.
///
/// Each instance gets a unique user-data directory and debugging port so the
/// pool members never trip over each other's singleton locks.
pub fn get_chrome_args(config: &Config, instance_id: Option<usize>) -> Vec<String> {
    let unique_id = match instance_id {
        Some(id) => format!("{}-{}", std::process::id(), id),
        None => format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
    };

    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--mute-audio".to_string(),
        format!("--user-data-dir=/tmp/mfc-scraper-{unique_id}"),
        format!(
            "--remote-debugging-port={}",
            9222 + instance_id.unwrap_or(0)
        ),
    ];

    if config.test_mode {
        args.push("--disable-web-security".to_string());
    }

    args
}

/// Extra arguments for the stealth browser: suppress the most common
/// automation fingerprints on top of the regular set.
pub fn get_stealth_chrome_args(config: &Config) -> Vec<String> {
    let mut args = get_chrome_args(config, None);
    args.push("--disable-blink-features=AutomationControlled".to_string());
    args.push("--disable-infobars".to_string());
    args.push("--window-size=1366,768".to_string());
    args.push(
        "--user-agent=Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            .to_string(),
    );
    args
}

pub fn create_browser_config(
    config: &Config,
    instance_id: Option<usize>,
) -> Result<chromiumoxide::browser::BrowserConfig, String> {
    build_browser_config(config, get_chrome_args(config, instance_id))
}

pub fn create_stealth_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, String> {
    build_browser_config(config, get_stealth_chrome_args(config))
}

fn build_browser_config(
    config: &Config,
    args: Vec<String>,
) -> Result<chromiumoxide::browser::BrowserConfig, String> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder().args(args);
    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let config = Config::default();
        assert_eq!(config.browser_pool_size, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.session_cookie_name, "PHPSESSID");
        assert!(!config.production);
        assert!(config.cookie_allowed("PHPSESSID"));
        assert!(!config.cookie_allowed("tracking_id"));
    }

    #[test]
    fn settle_wait_is_capped() {
        let config = Config {
            post_load_wait: Duration::from_secs(600),
            ..Default::default()
        };
        assert_eq!(config.effective_post_load_wait(), MAX_SETTLE_WAIT);
    }

    #[test]
    fn chrome_args_are_unique_per_instance() {
        let config = Config::default();
        let a = get_chrome_args(&config, Some(0));
        let b = get_chrome_args(&config, Some(1));
        assert!(a.contains(&"--headless".to_string()));
        assert_ne!(
            a.iter().find(|s| s.starts_with("--user-data-dir")),
            b.iter().find(|s| s.starts_with("--user-data-dir"))
        );
    }

    #[test]
    fn stealth_args_extend_regular_args() {
        let config = Config::default();
        let args = get_stealth_chrome_args(&config);
        assert!(args.contains(&"--headless".to_string()));
        assert!(args
            .iter()
            .any(|a| a.contains("AutomationControlled")));
    }
}
