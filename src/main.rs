//! Main entry point for the pickup engine service
//!
//! Loads configuration, reconciles persisted pending matches, runs the
//! timer driver and health server, and shuts down gracefully on SIGINT or
//! SIGTERM.

use anyhow::Result;
use clap::Parser;
use pickup_engine::config::AppConfig;
use pickup_engine::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Pickup Engine - readiness checks, captain drafts and map votes for full queues
#[derive(Parser)]
#[command(
    name = "pickup-engine",
    version,
    about = "Drives filled pickup queues through readiness, captain selection, team formation and map vote",
    long_about = "Pickup Engine takes a matchmaking queue that reached capacity and walks it through \
                 an optional readiness check, captain selection, team formation (random, skill-balanced \
                 or captain draft) and a map vote before announcing the started match. Pending matches \
                 are persisted at every transition and resumed after a restart."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Tick cadence override
    #[arg(long, value_name = "MS", help = "Override stage tick cadence in milliseconds")]
    iteration_time_ms: Option<u64>,

    /// Fixed random seed
    #[arg(long, value_name = "SEED", help = "Seed random choices for reproducible runs")]
    seed: Option<u64>,

    /// Perform health check and exit
    #[arg(long, help = "Build the service, run a health check and exit with its status")]
    health_check: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }
    if let Some(iteration_time_ms) = args.iteration_time_ms {
        config.stages.iteration_time_ms = iteration_time_ms;
    }

    pickup_engine::config::validate_config(&config)?;
    Ok(config)
}

fn display_startup_banner(config: &AppConfig) {
    info!("Pickup Engine v{}", pickup_engine::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Tick cadence: {}ms", config.stages.iteration_time_ms);
    info!(
        "   Queues: {}, map pools: {}",
        config.queues.len(),
        config.map_pools.len()
    );
}

async fn perform_health_check(config: AppConfig, seed: Option<u64>) -> Result<()> {
    let app_state = Arc::new(AppState::new(config, seed).await?);
    let health = HealthCheck::check(app_state).await?;

    println!("Health Check: {}", health.status);
    for check in &health.checks {
        println!(
            "  {}: {}{}",
            check.name,
            check.status,
            check
                .message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    }

    // The driver is not started in this mode, so degraded is acceptable
    if health.status == HealthStatus::Unhealthy
        && health
            .checks
            .iter()
            .any(|c| c.name != "engine_driver" && c.status == HealthStatus::Unhealthy)
    {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config, args.seed).await;
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful, exiting (dry run)");
        return Ok(());
    }

    let app_state = match AppState::new(config, args.seed).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("Pickup engine is running, press Ctrl+C to shut down");
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown");
    match app_state.shutdown().await {
        Ok(()) => info!("Graceful shutdown completed"),
        Err(e) => warn!("Shutdown did not complete cleanly: {}", e),
    }

    Ok(())
}
