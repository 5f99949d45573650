use clap::Parser;
use mfc_scraper::{setup_logging, validate_config, Cli, CliRunner, Config};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("starting mfc-scraper v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config, &args);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = runner.run(args.command) => result,
        _ = shutdown_rx.recv() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    info!("shutting down");
    runner.queue.stop();
    runner.pool.close_all().await;

    if let Err(e) = result {
        error!("application error: {e}");
        std::process::exit(1);
    }

    info!("mfc-scraper stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };

    config.apply_env();
    validate_config(&config)?;

    info!("configuration loaded");
    info!("port: {}", config.port);
    info!("browser pool size: {}", config.browser_pool_size);
    info!("production mode: {}", config.production);

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGINT handler: {e}");
                return;
            }
        };
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }

        let _ = shutdown_tx.send(());
    })
}
