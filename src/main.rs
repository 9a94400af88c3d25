use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use hydromon_service::config::Config;
use hydromon_service::scheduler::Scheduler;
use hydromon_service::{api, ingest, store};

const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8000);

#[derive(Debug, Parser)]
#[command(name = "hydromon_service", version, about = "Hydrological station scraper and query service")]
struct Cli {
    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn',
    /// and 'error' (case insensitive)
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// TOML configuration file; the environment (and .env) is used otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database tables and indexes
    InitDb,
    /// Fetch the station directory once and upsert station metadata
    SyncStations,
    /// Run the ingestion scheduler in the foreground
    Run {
        /// Update interval in minutes. SCHEDULER_INTERVAL_MINUTES takes
        /// precedence when set
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Serve the read-only query API
    Serve {
        /// Address to bind
        #[arg(long, default_value_t = DEFAULT_BIND_ADDR.into())]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(cli.log_level)
            .finish(),
    )?;

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::InitDb => {
            let client = store::connect(&config.database).await?;
            store::init_schema(&client).await?;
            info!("database schema initialized");
        }

        Command::SyncStations => {
            let http = ingest::build_client()?;
            let descriptors = ingest::directory::fetch_directory(&http, &config.scrape).await;
            if descriptors.is_empty() {
                info!("no stations found in the directory");
                return Ok(());
            }
            let mut client = store::connect(&config.database).await?;
            let outcome = store::sync_stations(&mut client, &descriptors).await?;
            info!(
                inserted = outcome.inserted,
                updated = outcome.updated,
                "station directory synced"
            );
        }

        Command::Run { interval } => {
            // The environment variable wins over the flag.
            if let Some(minutes) = interval {
                if std::env::var("SCHEDULER_INTERVAL_MINUTES").is_err() {
                    config.scheduler.interval_minutes = minutes;
                }
            }
            let shutdown = shutdown_token();
            Scheduler::new(&config.scheduler).run(&config, shutdown).await?;
        }

        Command::Serve { bind } => {
            let shutdown = shutdown_token();
            api::serve(&config, bind, shutdown).await?;
        }
    }

    Ok(())
}

/// Token cancelled by the first SIGTERM or SIGINT.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }
        info!("received termination signal, shutting down");
        signal_token.cancel();
    });
    token
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
