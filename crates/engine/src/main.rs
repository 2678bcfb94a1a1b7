//! Certward - certificate lifecycle engine for reverse-proxy fleets

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use certward_config::{Config, LogFormat};
use certward_engine::api::ApiServer;
use certward_engine::notify::{ChannelNotifier, FanoutNotifier, Notifier, TracingNotifier};
use certward_engine::reload::CommandReloader;
use certward_engine::renewal::{RenewalPolicy, RenewalScheduler};
use certward_engine::sandbox::ConfRoot;
use certward_engine::serving::ServingCertificate;
use certward_engine::sync::SyncReceiver;
use certward_engine::{Engine, JsonStore};

/// Certward - ACME certificate automation for reverse-proxy fleets
#[derive(Parser, Debug)]
#[command(name = "certward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine: renewal scheduler and management API (default)
    Run,
    /// Validate configuration and exit
    Test,
    /// Run one renewal sweep and exit
    RenewNow,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Test => test_config(cli.config.as_deref()),
        Commands::Run => run(cli.config.as_deref(), cli.verbose, false),
        Commands::RenewNow => run(cli.config.as_deref(), cli.verbose, true),
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Test configuration file and exit
fn test_config(path: Option<&std::path::Path>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = Config::load(path).context("Failed to load configuration")?;
    let result = config.validate_strict()?;
    for warning in &result.warnings {
        warn!("{}", warning);
    }

    info!("Configuration test successful:");
    info!("  - config root {:?}", config.engine.config_root);
    info!("  - CA directory {}", config.acme.ca_directory);
    info!("  - renewal interval {} day(s)", config.renewal.interval_days);

    println!(
        "certward: configuration {} test is successful",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(embedded)".to_string())
    );
    Ok(())
}

fn run(path: Option<&std::path::Path>, verbose: bool, once: bool) -> Result<()> {
    let config = Config::load(path).context("Failed to load configuration")?;
    init_logging(&config, verbose);

    match path {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration specified, using embedded default configuration"),
    }

    let result = config.validate_strict()?;
    for warning in &result.warnings {
        warn!("{}", warning);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { serve(config, once).await })
}

async fn serve(config: Config, once: bool) -> Result<()> {
    let store = Arc::new(
        JsonStore::open(&config.engine.data_dir)
            .with_context(|| format!("Failed to open store in {:?}", config.engine.data_dir))?,
    );

    let notifications = Arc::new(ChannelNotifier::new(256));
    let notifier: Arc<dyn Notifier> = Arc::new(
        FanoutNotifier::new()
            .with(Arc::new(TracingNotifier))
            .with(notifications),
    );

    let serving = match (&config.api.tls_cert, &config.api.tls_key) {
        (Some(cert), Some(key)) => Some(Arc::new(
            ServingCertificate::load(cert, key).context("Failed to load management TLS certificate")?,
        )),
        _ => None,
    };

    let reloader = Arc::new(CommandReloader::new(config.reload.command.clone()));
    let mut builder = Engine::builder(config.clone(), store.clone())
        .notifier(Arc::clone(&notifier))
        .reloader(reloader.clone());
    if let Some(serving) = &serving {
        builder = builder.serving(Arc::clone(serving));
    }
    let engine = builder.build();

    let scheduler = RenewalScheduler::new(Arc::clone(&engine), RenewalPolicy::new(config.renewal.interval_days))
        .with_interval(config.check_interval())
        .with_initial_delay(std::time::Duration::from_secs(config.renewal.initial_delay_secs));

    if once {
        let report = scheduler.sweep().await;
        info!(
            checked = report.checked,
            renewed = report.renewed,
            skipped = report.skipped,
            failed = report.failed,
            "Renewal sweep complete"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let receiver = Arc::new(SyncReceiver::new(
        ConfRoot::new(&config.engine.config_root),
        config.api.node_secret.clone(),
        store,
        reloader,
    ));
    let addr: SocketAddr = config
        .api
        .address
        .parse()
        .with_context(|| format!("Invalid API address {}", config.api.address))?;
    let mut api = ApiServer::new(engine, receiver, config.api.token.clone());
    if let Some(serving) = serving {
        api = api.with_tls(serving);
    }
    let api_task = tokio::spawn(api.run(addr, shutdown_rx));

    wait_for_signal().await;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    match api_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Management API failed"),
        Err(e) => error!(error = %e, "Management API task failed"),
    }
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Renewal scheduler task failed");
    }

    info!("Certward stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
