//! Browser pool management for reusable Chrome instances
//!
//! A fixed pool of headless browsers amortizes process startup across
//! scrapes. Per-scrape state isolation happens one level down, in the
//! extractor, via disposable browser contexts; the pool only tracks whole
//! processes and their health.

use crate::config::{create_browser_config, create_stealth_browser_config};
use crate::{Config, ScrapeError};
use chromiumoxide::browser::Browser;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Poll interval while waiting for a pooled browser to come back.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A launched browser together with its CDP handler task.
#[derive(Debug)]
pub struct PooledBrowser {
    pub id: usize,
    pub browser: Browser,
    handler: tokio::task::JoinHandle<()>,
}

impl PooledBrowser {
    /// The handler task ends when the CDP websocket does, so a finished
    /// handler means the browser process is gone or unreachable.
    pub fn is_connected(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("error closing browser {}: {e}", self.id);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Stealth singleton: a browser launched with automation-detection
/// countermeasures, used only for credentialed scrapes. Never pooled.
#[derive(Debug)]
pub struct StealthBrowser {
    browser: Browser,
    handler: tokio::task::JoinHandle<()>,
}

impl StealthBrowser {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn is_connected(&self) -> bool {
        !self.handler.is_finished()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub initialized: bool,
    pub available: usize,
    pub connected: usize,
    pub has_stealth: bool,
    pub warnings: Vec<String>,
}

struct PoolState {
    available: Vec<PooledBrowser>,
    initialized: bool,
}

pub struct BrowserPool {
    config: Arc<Config>,
    state: Mutex<PoolState>,
    stealth: Mutex<Option<Arc<StealthBrowser>>>,
    next_id: AtomicUsize,
}

impl BrowserPool {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState {
                available: Vec::new(),
                initialized: false,
            }),
            stealth: Mutex::new(None),
            next_id: AtomicUsize::new(0),
        })
    }

    /// Launch the configured number of browsers. Idempotent. Individual
    /// launch failures are logged and skipped; the pool is usable with at
    /// least one browser.
    pub async fn initialize(&self) -> Result<(), ScrapeError> {
        {
            let state = self.state.lock().await;
            if state.initialized {
                return Ok(());
            }
        }

        let mut launched = Vec::new();
        for slot in 0..self.config.browser_pool_size {
            match self.launch_browser(slot).await {
                Ok(browser) => {
                    info!("browser pool slot {slot} launched");
                    launched.push(browser);
                }
                Err(e) => {
                    error!("failed to launch browser for slot {slot}: {e}");
                }
            }
        }

        if launched.is_empty() {
            return Err(ScrapeError::BrowserLaunchFailed(
                "no browser could be launched for the pool".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        info!("browser pool initialized with {} instances", launched.len());
        state.available = launched;
        state.initialized = true;
        Ok(())
    }

    async fn launch_browser(&self, slot: usize) -> Result<PooledBrowser, ScrapeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let browser_config = create_browser_config(&self.config, Some(slot))
            .map_err(ScrapeError::BrowserLaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler event error: {e}");
                }
            }
            debug!("browser handler stream ended");
        });

        Ok(PooledBrowser {
            id,
            browser,
            handler: handler_task,
        })
    }

    /// Take a browser from the pool, waiting until one frees up or the
    /// acquire timeout passes. In test mode an empty initialized pool fails
    /// immediately instead of waiting.
    pub async fn acquire(self: &Arc<Self>) -> Result<BrowserLease, ScrapeError> {
        let deadline = Instant::now() + self.config.pool_acquire_timeout;

        loop {
            {
                let mut state = self.state.lock().await;
                if !state.initialized {
                    return Err(ScrapeError::BrowserUnavailable);
                }
                while let Some(browser) = state.available.pop() {
                    if browser.is_connected() {
                        debug!("acquired browser {} from pool", browser.id);
                        return Ok(BrowserLease {
                            inner: Some(browser),
                            pool: Arc::clone(self),
                        });
                    }
                    warn!("discarding disconnected browser {}", browser.id);
                    tokio::spawn(browser.close());
                }
            }

            if self.config.test_mode {
                return Err(ScrapeError::BrowserUnavailable);
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::BrowserUnavailable);
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
        }
    }

    /// Return a browser to the pool. Disconnected browsers are discarded;
    /// a pool already at capacity closes the surplus browser instead of
    /// growing.
    pub async fn release(&self, browser: PooledBrowser) {
        let mut state = self.state.lock().await;

        if !browser.is_connected() {
            warn!("discarding disconnected browser {} on release", browser.id);
            drop(state);
            browser.close().await;
            return;
        }

        if state.available.len() >= self.config.browser_pool_size {
            info!("pool full, closing surplus browser {}", browser.id);
            drop(state);
            browser.close().await;
            return;
        }

        debug!("browser {} returned to pool", browser.id);
        state.available.push(browser);
    }

    /// The lazily-launched stealth singleton for credentialed scrapes.
    pub async fn acquire_stealth(&self) -> Result<Arc<StealthBrowser>, ScrapeError> {
        let mut stealth = self.stealth.lock().await;

        if let Some(existing) = stealth.as_ref() {
            if existing.is_connected() {
                return Ok(Arc::clone(existing));
            }
            warn!("stealth browser disconnected, relaunching");
            *stealth = None;
        }

        let browser_config =
            create_stealth_browser_config(&self.config).map_err(ScrapeError::BrowserLaunchFailed)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("stealth handler event error: {e}");
                }
            }
        });

        info!("stealth browser launched");
        let launched = Arc::new(StealthBrowser {
            browser,
            handler: handler_task,
        });
        *stealth = Some(Arc::clone(&launched));
        Ok(launched)
    }

    /// Point-in-time health snapshot for the observability surface.
    pub async fn get_health(&self) -> PoolHealth {
        let state = self.state.lock().await;
        let stealth = self.stealth.lock().await;

        let connected = state.available.iter().filter(|b| b.is_connected()).count();
        let mut warnings = Vec::new();

        if state.initialized && state.available.is_empty() {
            warnings.push("all pool browsers are in use".to_string());
        }
        for browser in state.available.iter().filter(|b| !b.is_connected()) {
            warnings.push(format!("browser {} reports disconnected", browser.id));
        }
        if let Some(s) = stealth.as_ref() {
            if !s.is_connected() {
                warnings.push("stealth browser reports disconnected".to_string());
            }
        }

        PoolHealth {
            initialized: state.initialized,
            available: state.available.len(),
            connected,
            has_stealth: stealth.is_some(),
            warnings,
        }
    }

    /// Close every browser and mark the pool uninitialized. Close errors on
    /// individual browsers are logged and swallowed.
    pub async fn close_all(&self) {
        let browsers = {
            let mut state = self.state.lock().await;
            state.initialized = false;
            std::mem::take(&mut state.available)
        };
        for browser in browsers {
            browser.close().await;
        }

        if let Some(stealth) = self.stealth.lock().await.take() {
            stealth.handler.abort();
            match Arc::try_unwrap(stealth) {
                Ok(mut owned) => {
                    if let Err(e) = owned.browser.close().await {
                        debug!("error closing stealth browser: {e}");
                    }
                }
                Err(_) => {
                    warn!("stealth browser still leased during shutdown, dropping handle");
                }
            }
        }

        info!("browser pool closed");
    }
}

/// Lease over a pooled browser. Dropping the lease returns the browser on
/// every exit path, including panics in the scrape itself.
pub struct BrowserLease {
    inner: Option<PooledBrowser>,
    pool: Arc<BrowserPool>,
}

impl BrowserLease {
    pub fn browser(&self) -> &Browser {
        &self
            .inner
            .as_ref()
            .expect("lease holds a browser until drop")
            .browser
    }

    pub fn id(&self) -> usize {
        self.inner
            .as_ref()
            .expect("lease holds a browser until drop")
            .id
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if let Some(browser) = self.inner.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.release(browser).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> Arc<BrowserPool> {
        BrowserPool::new(Arc::new(Config {
            test_mode: true,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn acquire_fails_before_initialization() {
        let pool = test_pool();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(ScrapeError::BrowserUnavailable)));
    }

    #[tokio::test]
    async fn health_reports_uninitialized_pool() {
        let pool = test_pool();
        let health = pool.get_health().await;
        assert!(!health.initialized);
        assert_eq!(health.available, 0);
        assert!(!health.has_stealth);
    }

    #[tokio::test]
    async fn close_all_is_safe_on_empty_pool() {
        let pool = test_pool();
        pool.close_all().await;
        let health = pool.get_health().await;
        assert!(!health.initialized);
    }
}
