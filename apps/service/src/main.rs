mod catalog;
mod config;
mod crypto;
mod database;
mod driver;
mod monitoring;
mod registry;
mod storage;
mod telemetry;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pipeline::pool::open_pool;
use pipeline::{ChannelSettings, Consumer, LibsqlChannel, MessageChannel, Publisher};
use tracing::info;
use url::Url;

use crate::catalog::{Catalog, CatalogClient, ResponseUpdater};
use crate::config::{CatalogConfig, Config, ObjectStoreConfig};
use crate::crypto::{TokenSigner, load_or_generate_keypair};
use crate::database::DatabaseImpl;
use crate::monitoring::{Caller, ProbeExecutor, Scheduler};
use crate::registry::{RegistryReader, RegistryUpdater};
use crate::storage::{FsObjectStore, HttpObjectStore, ObjectStore};
use crate::telemetry::TelemetryWriter;

#[derive(Parser)]
#[command(name = "probing", author, version, about = "eService probing pipeline stages")]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a probe request for every service that is due
    Scheduler(RunArgs),
    /// Probe services and fan the outcome out
    Caller(RunArgs),
    /// Append probe outcomes to the telemetry store
    TelemetryWriter(RunArgs),
    /// Record the latest probe outcome in the catalog
    ResponseUpdater(RunArgs),
    /// Enqueue every entry of the registry snapshot
    RegistryReader(RunArgs),
    /// Upsert registry entries into the catalog
    RegistryUpdater(RunArgs),
    /// Print the effective configuration
    ShowConfig,
    /// Show the catalog row and recent telemetry of one service (local backends only)
    Status {
        eservice_record_id: i64,
        #[arg(long, default_value_t = 10)]
        points: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run a single tick or consumer invocation, failing on error
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_tracing();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Scheduler(args) => run_scheduler(&config, args.once).await,
        Command::Caller(args) => run_caller(&config, args.once).await,
        Command::TelemetryWriter(args) => run_telemetry_writer(&config, args.once).await,
        Command::ResponseUpdater(args) => run_response_updater(&config, args.once).await,
        Command::RegistryReader(args) => run_registry_reader(&config, args.once).await,
        Command::RegistryUpdater(args) => run_registry_updater(&config, args.once).await,
        Command::ShowConfig => {
            print!("{config}");
            Ok(())
        }
        Command::Status { eservice_record_id, points } => {
            show_status(&config, eservice_record_id, points).await
        }
    }
}

async fn open_channel(config: &Config) -> Result<Arc<dyn MessageChannel>> {
    let pool = open_pool(&config.channel.database_path).await?;
    let channel = LibsqlChannel::new(
        pool,
        ChannelSettings {
            max_receive_count: config.channel.max_receive_count,
            poll_interval: Duration::from_millis(config.channel.poll_interval_ms),
        },
    );
    channel.initialize().await?;
    info!(database = %config.channel.database_path, "Message channel ready");
    Ok(Arc::new(channel))
}

async fn open_catalog(config: &Config) -> Result<Arc<dyn Catalog>> {
    let catalog: Arc<dyn Catalog> = match &config.catalog {
        CatalogConfig::Http { base_url, timeout_seconds } => {
            Arc::new(CatalogClient::new(base_url, Duration::from_secs(*timeout_seconds))?)
        }
        CatalogConfig::Local { database_path } => Arc::new(DatabaseImpl::open(database_path).await?),
    };
    Ok(catalog)
}

fn open_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        ObjectStoreConfig::Filesystem { root } => Arc::new(FsObjectStore::new(root)),
        ObjectStoreConfig::Http { endpoint, timeout_seconds } => {
            Arc::new(HttpObjectStore::new(endpoint, Duration::from_secs(*timeout_seconds))?)
        }
    };
    Ok(store)
}

fn consumer(config: &Config, channel: Arc<dyn MessageChannel>, queue: &str, service: &str) -> Consumer {
    Consumer::new(channel, config.consumer.consumer_config(queue), service)
}

fn backoff(config: &Config) -> Duration {
    Duration::from_secs(config.consumer.failure_backoff_seconds)
}

async fn run_scheduler(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;
    let catalog = open_catalog(config).await?;
    let scheduler = Scheduler::new(
        catalog,
        Publisher::new(channel, &config.queues.poll),
        config.scheduler.page_size,
    );

    let scheduler = &scheduler;
    let period = Duration::from_secs(config.scheduler.interval_seconds);
    driver::run_periodic("scheduler", period, once, move || scheduler.produce_batch()).await
}

async fn run_caller(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;

    let keypair = load_or_generate_keypair(Path::new(&config.caller.key_path))?;
    let signer = Arc::new(TokenSigner::new(
        keypair,
        &config.caller.issuer,
        Duration::from_secs(config.caller.token_ttl_seconds),
    ));
    info!(key_id = %signer.key_id(), "Probe tokens will be signed");

    let base_url = config
        .caller
        .base_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("Invalid caller base_url")?;
    let executor = ProbeExecutor::new(
        Duration::from_secs(config.caller.timeout_seconds),
        signer,
        &config.caller.soap_action,
        base_url,
    )?;

    let caller = Caller::new(
        executor,
        Publisher::new(channel.clone(), &config.queues.telemetry),
        Publisher::new(channel.clone(), &config.queues.response),
    );
    let consumer = consumer(config, channel, &config.queues.poll, "caller");
    driver::run_consumer(&consumer, &caller, once, backoff(config)).await
}

async fn run_telemetry_writer(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;
    let store = Arc::new(DatabaseImpl::open(&config.telemetry.database_path).await?);

    let writer = TelemetryWriter::new(store);
    let consumer = consumer(config, channel, &config.queues.telemetry, "telemetry-writer");
    driver::run_consumer(&consumer, &writer, once, backoff(config)).await
}

async fn run_response_updater(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;
    let updater = ResponseUpdater::new(open_catalog(config).await?);

    let consumer = consumer(config, channel, &config.queues.response, "response-updater");
    driver::run_consumer(&consumer, &updater, once, backoff(config)).await
}

async fn run_registry_reader(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;
    let reader = RegistryReader::new(
        open_object_store(&config.registry.store)?,
        &config.registry.bucket,
        &config.registry.key,
        Publisher::new(channel, &config.queues.registry),
    );

    let reader = &reader;
    let period = Duration::from_secs(config.registry.interval_seconds);
    driver::run_periodic("registry-reader", period, once, move || reader.run()).await
}

async fn run_registry_updater(config: &Config, once: bool) -> Result<()> {
    let channel = open_channel(config).await?;
    let updater = RegistryUpdater::new(open_catalog(config).await?);

    let consumer = consumer(config, channel, &config.queues.registry, "registry-updater");
    driver::run_consumer(&consumer, &updater, once, backoff(config)).await
}

async fn show_status(config: &Config, eservice_record_id: i64, points: usize) -> Result<()> {
    let CatalogConfig::Local { database_path } = &config.catalog else {
        bail!("status reads the local catalog database; the configured catalog is remote");
    };

    let catalog = DatabaseImpl::open(database_path).await?;
    let Some(record) = catalog.get_eservice(eservice_record_id).await? else {
        bail!("eservice record {eservice_record_id} not found");
    };

    println!(
        "#{} {} ({}) v{}",
        record.eservice_record_id, record.name, record.technology, record.version_number
    );
    println!("  EService:      {} / version {}", record.eservice_id, record.version_id);
    println!("  Producer:      {} ({})", record.producer_name, record.producer_id);
    println!("  State:         {}", record.state.as_str());
    println!("  Base path:     {}", record.base_path.join(", "));
    println!("  Audience:      {}", record.audience.join(", "));
    println!(
        "  Probing:       {} every {} min",
        if record.probing_enabled { "enabled" } else { "disabled" },
        record.polling_frequency
    );
    let never = "never".to_string();
    println!(
        "  Last request:  {}",
        record.last_request.map(|at| at.to_rfc3339()).unwrap_or_else(|| never.clone())
    );
    match (record.response_status, record.response_received) {
        (Some(status), Some(at)) => println!("  Last response: {status} at {}", at.to_rfc3339()),
        _ => println!("  Last response: {never}"),
    }

    let telemetry = DatabaseImpl::open(&config.telemetry.database_path).await?;
    let recent = telemetry.recent_points(eservice_record_id, points).await?;
    if !recent.is_empty() {
        println!("  Recent probes:");
    }
    for point in recent {
        let response_time =
            point.response_time.map(|ms| format!("{ms} ms")).unwrap_or_else(|| "-".to_string());
        println!(
            "    {}  {}  {:>8}  {}",
            point.time.to_rfc3339(),
            point.status,
            response_time,
            point.ko_reason
        );
    }

    Ok(())
}
