use crate::browser_pool::BrowserPool;
use crate::extractor::{BrowserScraper, CookieBag};
use crate::queue::{EnqueueOptions, Priority, ScrapeQueue};
use crate::server::{self, AppState};
use crate::session::SessionManager;
use crate::webhook::Notifier;
use crate::{metrics, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mfc-scraper")]
#[command(about = "Headless-browser scraping service for MyFigureCollection")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "HTTP port")]
    pub port: Option<u16>,

    #[arg(long, help = "Browser pool size")]
    pub pool_size: Option<usize>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scraping service
    Serve,

    /// Scrape a single item and print the record as JSON
    Scrape {
        #[arg(help = "Item id or item URL")]
        target: String,

        #[arg(long, help = "Priority lane (hot, warm, cold)")]
        priority: Option<String>,

        #[arg(long, help = "Session cookies as name=value pairs, comma-separated")]
        cookies: Option<String>,

        #[arg(long, help = "Session id the cookies belong to")]
        session_id: Option<String>,
    },

    /// Show pool and queue health
    Health,

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: Arc<Config>,
    pub pool: Arc<BrowserPool>,
    pub sessions: Arc<SessionManager>,
    pub queue: Arc<ScrapeQueue>,
}

impl CliRunner {
    pub fn new(mut config: Config, args: &Cli) -> Self {
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(pool_size) = args.pool_size {
            config.browser_pool_size = pool_size;
        }
        if let Some(chrome_path) = &args.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }

        let config = Arc::new(config);
        let pool = BrowserPool::new(Arc::clone(&config));
        let sessions = SessionManager::new(Arc::clone(&config));
        let notifier = Arc::new(Notifier::new(config.webhook_url.clone()));
        let scraper = Arc::new(BrowserScraper::new(Arc::clone(&pool), Arc::clone(&config)));
        let queue = ScrapeQueue::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
            scraper,
            Arc::clone(&notifier),
        );

        // Pause notifications flow outward through the webhook; the queue
        // itself only ever reads session state.
        let paused_notifier = Arc::clone(&notifier);
        sessions.on_paused(move |event| {
            metrics::record_session_paused();
            paused_notifier.session_paused(event);
        });

        Self {
            config,
            pool,
            sessions,
            queue,
        }
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Serve => self.run_serve().await,
            Commands::Scrape {
                target,
                priority,
                cookies,
                session_id,
            } => self.run_scrape(target, priority, cookies, session_id).await,
            Commands::Health => self.show_health().await,
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    async fn run_serve(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.pool.initialize().await?;
        self.queue.start();

        let metrics_handle = match metrics::install_prometheus() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("prometheus recorder not installed: {e}");
                None
            }
        };

        let state = AppState {
            queue: Arc::clone(&self.queue),
            sessions: Arc::clone(&self.sessions),
            pool: Arc::clone(&self.pool),
            config: Arc::clone(&self.config),
            metrics_handle,
        };
        server::serve(state).await
    }

    async fn run_scrape(
        &self,
        target: String,
        priority: Option<String>,
        cookies: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let item_id = crate::utils::parse_item_target(&target)
            .ok_or("target must be an item id or an item URL on the target domain")?;

        self.pool.initialize().await?;
        self.queue.start();

        let priority = match priority.as_deref() {
            Some("hot") => Priority::Hot,
            Some("cold") => Priority::Cold,
            _ => Priority::Warm,
        };

        let cookie_bag = cookies.map(|raw| {
            CookieBag(
                raw.split(',')
                    .filter_map(|pair| {
                        let (name, value) = pair.split_once('=')?;
                        Some((name.trim().to_string(), value.trim().to_string()))
                    })
                    .collect(),
            )
        });

        let result = self.queue.enqueue(
            &item_id,
            EnqueueOptions {
                priority,
                cookies: cookie_bag,
                session_id,
                ..Default::default()
            },
        );

        info!("scraping item {item_id} (queue position {})", result.position);
        let started = std::time::Instant::now();
        let outcome = result.receiver.await??;
        info!(
            "item {item_id} scraped in {}",
            crate::utils::format_duration(started.elapsed())
        );

        println!("{}", serde_json::to_string_pretty(&outcome)?);
        self.pool.close_all().await;
        Ok(())
    }

    async fn show_health(&self) -> Result<(), Box<dyn std::error::Error>> {
        let pool = self.pool.get_health().await;
        let queue = self.queue.status();

        println!("Browser Pool:");
        println!("  Initialized: {}", pool.initialized);
        println!("  Available: {}", pool.available);
        println!("  Connected: {}", pool.connected);
        println!("  Stealth: {}", pool.has_stealth);
        for warning in &pool.warnings {
            println!("  Warning: {warning}");
        }

        println!("\nQueue:");
        println!("  Active: {}", queue.active);
        println!("  Lanes: hot={} warm={} cold={}", queue.hot, queue.warm, queue.cold);
        println!("  Completed: {}", queue.completed);
        println!("  Failed: {}", queue.failed);
        println!("  Current delay: {}ms", queue.current_delay_ms);
        println!("  Rate limited: {}", queue.is_rate_limited);

        Ok(())
    }

    async fn validate_config(&self, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let content = tokio::fs::read_to_string(&path).await?;
        let config: Config = serde_json::from_str(&content)?;
        validate_config(&config)?;

        println!("Configuration is valid:");
        println!("  Port: {}", config.port);
        println!("  Browser pool size: {}", config.browser_pool_size);
        println!("  Cookie allowlist: {}", config.cookie_allowlist.join(", "));
        println!("  Max retries: {}", config.max_retries);
        println!("  Production: {}", config.production);

        Ok(())
    }
}

pub fn validate_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.browser_pool_size == 0 {
        return Err("browser pool size must be greater than 0".into());
    }
    if config.navigation_timeout.as_secs() == 0 {
        return Err("navigation timeout must be greater than 0".into());
    }
    if config.rate_limit.min_delay > config.rate_limit.max_delay {
        return Err("rate-limit floor must not exceed the ceiling".into());
    }
    if config.rate_limit.multiplier <= 1.0 {
        return Err("rate-limit multiplier must be greater than 1".into());
    }
    Ok(())
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}
