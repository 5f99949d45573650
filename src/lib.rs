//! # mfc-scraper
//!
//! A headless-browser scraping service for MyFigureCollection item pages.
//! Incoming scrape requests are coalesced into a three-lane priority queue
//! whose single processing stream is paced by an adaptive rate limiter,
//! executed against a fixed pool of reusable Chrome instances, and guarded
//! by a session manager that pauses misbehaving credential sets.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mfc_scraper::{
//!     BrowserPool, BrowserScraper, Config, EnqueueOptions, Notifier, ScrapeQueue,
//!     SessionManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let pool = BrowserPool::new(Arc::clone(&config));
//!     pool.initialize().await?;
//!
//!     let sessions = SessionManager::new(Arc::clone(&config));
//!     let scraper = Arc::new(BrowserScraper::new(Arc::clone(&pool), Arc::clone(&config)));
//!     let notifier = Arc::new(Notifier::new(None));
//!     let queue = ScrapeQueue::new(config, sessions, scraper, notifier);
//!     queue.start();
//!
//!     let pending = queue.enqueue("12345", EnqueueOptions::default());
//!     let record = pending.receiver.await??;
//!     println!("scraped: {:?}", record.name);
//!
//!     pool.close_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## HTTP service
//!
//! ```bash
//! mfc-scraper serve --port 3020
//! mfc-scraper scrape 12345
//! ```

/// Configuration and Chrome argument synthesis
pub mod config;

/// Error types and failure classification
pub mod error;

/// Browser pool management for reusable Chrome instances
pub mod browser_pool;

/// Page extraction pipeline and the scraper seam
pub mod extractor;

/// Pure HTML sub-extractors
pub mod parsers;

/// Session validation, failure streaks, and pause/resume
pub mod session;

/// Adaptive pacing for the processing stream
pub mod rate_limiter;

/// The priority queue and its processing loop
pub mod queue;

/// Cache-lifetime policy for scraped records
pub mod cache;

/// Outbound webhook notifications
pub mod webhook;

/// HTTP surface
pub mod server;

/// Metric recording
pub mod metrics;

/// Command-line interface
pub mod cli;

/// Shared helpers: log sanitizing, URL validation, similarity
pub mod utils;


pub use browser_pool::{BrowserLease, BrowserPool, PoolHealth};
pub use cache::{calculate_cache_ttl, is_cache_valid, parse_release_date, CacheTtlTable, ReleaseCategory};
pub use cli::{setup_logging, validate_config, Cli, CliRunner, Commands};
pub use config::Config;
pub use error::{ErrorKind, ScrapeError};
pub use extractor::{BrowserScraper, CookieBag, ItemScraper, ScrapeJob};
pub use parsers::{Artist, Company, FigureRecord, Release};
pub use queue::{EnqueueOptions, EnqueueResult, Priority, ScrapeQueue, StatusTag};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
pub use session::{
    RecoveryAction, SessionManager, SessionPausedEvent, ValidationOptions, ValidationResult,
};
pub use webhook::Notifier;
