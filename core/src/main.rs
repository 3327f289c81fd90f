use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use wipe_station::config::DEFAULT_CONFIG_PATH;
use wipe_station::drives::{
    DeviceFilter, DeviceProbe, InventorySource, LsblkInventory, SystemProbe, UdevadmEventSource,
};
use wipe_station::{server, StationConfig, WipeStation};

/// Depth of the udev notification channel
const DEVICE_EVENT_BUFFER: usize = 64;

#[derive(Parser)]
#[command(name = "wipe-stationd")]
#[command(about = "Disk sanitization station: hotplug inventory, wipe jobs and live event feeds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Disable safety checks (DANGEROUS!)
    #[arg(long, global = true)]
    unsafe_mode: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: inventory, hotplug monitor, HTTP API and event feeds
    Serve {
        /// Configuration file (missing file means defaults)
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the configured listen address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Print one inventory scan as JSON and exit
    Scan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { ref config, bind } => {
            let mut config = StationConfig::load(Some(config.as_path()))
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }

            let _guard = init_logging(cli.debug, cli.log_json, config.log_dir.as_deref())?;

            if !cli.unsafe_mode && !is_root() {
                eprintln!("Error: the wipe station requires root privileges.");
                eprintln!("Please run with sudo or as root user, or pass --unsafe-mode.");
                std::process::exit(1);
            }

            serve(config).await
        }
        Commands::Scan { ref config } => {
            let config = StationConfig::load(Some(config.as_path()))
                .with_context(|| format!("loading {}", config.display()))?;
            let _guard = init_logging(cli.debug, cli.log_json, None)?;

            scan(&config).await
        }
    }
}

async fn serve(config: StationConfig) -> Result<()> {
    let addr = config.bind_addr;
    let station = Arc::new(WipeStation::new(config).context("building station")?);

    station.bootstrap().await;

    // The daemon keeps serving a static inventory without udev
    let _monitor = match UdevadmEventSource::spawn(DEVICE_EVENT_BUFFER) {
        Ok((events, source)) => Some((station.spawn_hotplug(events), source)),
        Err(e) => {
            tracing::error!(error = %e, "hotplug monitoring unavailable");
            None
        }
    };

    server::serve(station, addr, shutdown_signal()).await
}

async fn scan(config: &StationConfig) -> Result<()> {
    let probe: Arc<dyn DeviceProbe> = Arc::new(SystemProbe::from_config(config));
    let inventory = LsblkInventory::new(DeviceFilter::from_config(config), probe);

    let disks = tokio::task::spawn_blocking(move || inventory.scan())
        .await
        .context("inventory scan task failed")?;

    let json = serde_json::to_string_pretty(&disks.values().collect::<Vec<_>>())?;
    println!("{}", json);
    Ok(())
}

fn init_logging(debug: bool, json: bool, log_dir: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = if json {
        fmt::layer().json().with_target(false).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "wipe-stationd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown requested");
}

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}
