//! deckbridge - bridge DJ controllers to audio/app/ui services

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deckbridge::action::Target;
use deckbridge::config::AppConfig;
use deckbridge::device::{self, DeviceManager, SCAN_INTERVAL};
use deckbridge::downstream::DownstreamClient;
use deckbridge::feedback::{FeedbackCache, StateMessage};
use deckbridge::mapping::MappingLibrary;
use deckbridge::pipeline::Pipeline;
use deckbridge::router::{ActionRouter, ActionSink, ConsoleSink, TargetSinks};

/// Capacity of the channel shared by all device adapters
const INBOUND_CAPACITY: usize = 1024;

/// Bridge DJ controllers (MIDI and HID) to downstream services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DECKBRIDGE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Mapping directory (overrides the config file)
    #[arg(short, long)]
    mappings: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// List attached MIDI/HID devices and the mapping each resolves to
    #[arg(long)]
    list_devices: bool,

    /// Load and validate every mapping file, then exit
    #[arg(long)]
    check_mappings: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_json)?;

    info!("Starting deckbridge v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config.display());

    let config = AppConfig::load_or_default(&args.config).await?;
    let mappings_dir = args
        .mappings
        .clone()
        .unwrap_or_else(|| config.mappings_dir(&args.config));
    let library = MappingLibrary::load_dir(&mappings_dir)?;

    if args.check_mappings {
        return check_mappings(&library, &mappings_dir);
    }

    if args.list_devices {
        let rows = device::list_devices(&library)?;
        println!("\n{}", "=== Attached devices ===".bold().cyan());
        device::print_listing(&rows);
        return Ok(());
    }

    run_app(config, Arc::new(library), shutdown_signal()).await?;

    info!("deckbridge shutdown complete");
    Ok(())
}

/// Build the sink layout, spawning one client per configured peer
fn build_sinks(
    config: &AppConfig,
    states: &mpsc::Sender<StateMessage>,
    shutdown: &watch::Receiver<bool>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> TargetSinks {
    let mut connect = |url: &str| -> Arc<dyn ActionSink> {
        let (client, handle) = DownstreamClient::spawn(url, states.clone(), shutdown.clone());
        tasks.push(handle);
        client
    };

    let default: Arc<dyn ActionSink> = match &config.downstream.url {
        Some(url) => connect(url),
        None => {
            warn!("No downstream URL configured, actions will only be logged");
            Arc::new(ConsoleSink::new("console"))
        }
    };

    let targets = &config.downstream.targets;
    let mut sinks = TargetSinks::new(default);
    for (target, url) in [
        (Target::Audio, &targets.audio),
        (Target::App, &targets.app),
        (Target::Ui, &targets.ui),
    ] {
        if let Some(url) = url {
            sinks = sinks.with_target(target, connect(url));
        }
    }
    sinks
}

async fn run_app(
    config: AppConfig,
    library: Arc<MappingLibrary>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("Starting main application loop...");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = mpsc::channel::<StateMessage>(256);
    let mut tasks = Vec::new();

    let sinks = build_sinks(&config, &state_tx, &shutdown_rx, &mut tasks);
    sinks.log_layout();

    let router = Arc::new(ActionRouter::new(sinks, config.router.queue_capacity));
    tasks.push(router.spawn_dispatch());

    let cache = Arc::new(FeedbackCache::new(config.feedback_intervals()));
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let pipeline = Pipeline::new(router.clone(), cache);
    tasks.push(tokio::spawn(pipeline.run(inbound_rx, state_rx, shutdown_rx.clone())));

    let mut devices = DeviceManager::new(library, config.device_settings(), inbound_tx);

    let mut scan = tokio::time::interval(SCAN_INTERVAL);
    let mut stats = tokio::time::interval(Duration::from_secs(config.stats_interval_secs));
    // First tick of an interval fires immediately
    stats.tick().await;

    tokio::pin!(shutdown);
    info!("✅ deckbridge running");

    loop {
        tokio::select! {
            _ = scan.tick() => {
                devices.scan().await;
            }
            _ = stats.tick() => {
                info!(
                    "📊 {} device(s) open | router {}",
                    devices.open_count(),
                    router.stats()
                );
            }
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        }
    }

    devices.close_all();
    router.shutdown();
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("A background task did not stop in time");
        }
    }
    info!("📊 Final router stats: {}", router.stats());
    Ok(())
}

/// Report every mapping file's status; fails if any was rejected
fn check_mappings(library: &MappingLibrary, dir: &Path) -> Result<()> {
    println!("\n{}", "=== Mapping check ===".bold().cyan());
    println!("Directory: {}\n", dir.display());

    for mapping in library.iter() {
        let ids = match (mapping.device.vendor_id, mapping.device.product_id) {
            (Some(vid), Some(pid)) => format!(" {:04X}:{:04X}", vid, pid),
            _ => String::new(),
        };
        let generic = if mapping.device.generic { " [generic]" } else { "" };
        println!(
            "  {} {} ({}{}){} - {} mapping(s), {} control(s)",
            "✓".green(),
            mapping.name().bold(),
            mapping.protocol(),
            ids,
            generic,
            mapping.mappings.len(),
            mapping.controls.len()
        );
    }
    for (path, reason) in library.failures() {
        println!("  {} {}: {}", "✗".red(), path.display(), reason);
    }

    println!();
    if library.failures().is_empty() {
        println!("{}", format!("All {} mapping(s) valid", library.len()).green());
        Ok(())
    } else {
        anyhow::bail!("{} mapping file(s) rejected", library.failures().len())
    }
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
