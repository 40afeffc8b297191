//! EVQ-OCPP Node - CLI charging station
//!
//! Connects one station to a CSMS and delivers its messages through the
//! evq outbound queue.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (OCPP 2.0.1, in-memory queue)
//! evq-ocpp-node --station CS001
//!
//! # OCPP 1.6 against a specific CSMS, queue survives restarts
//! evq-ocpp-node --station CS001 --protocol ocpp1.6 \
//!     --csms-url ws://localhost:8180/steve/websocket/CentralSystemService \
//!     --data-dir /var/lib/evq
//!
//! # Keep every message while offline, retry five times
//! evq-ocpp-node --station CS001 --queue-all-messages --attempts 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use evq_adapter_ocpp::{Adapter, AdapterConfig, ConnectorStatus, OcppProtocol, V16, V201};
use evq_core::{FileStore, FileStoreConfig, MemoryStore, MessageQueueConfig, PersistenceGateway};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Protocol {
    #[value(name = "ocpp1.6")]
    Ocpp16,
    #[value(name = "ocpp2.0.1")]
    Ocpp201,
}

/// EVQ-OCPP charging station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OCPP station ID
    #[arg(short, long, default_value = "EVQ-001")]
    station: String,

    /// OCPP CSMS WebSocket URL
    #[arg(long, default_value = "ws://localhost:8180/steve/websocket/CentralSystemService")]
    csms_url: String,

    /// OCPP version
    #[arg(short, long, value_enum, default_value = "ocpp2.0.1")]
    protocol: Protocol,

    /// Directory for the write-ahead log (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Queue and retry non-transactional messages too
    #[arg(long)]
    queue_all_messages: bool,

    /// Delivery attempts per transaction message
    #[arg(long, default_value = "3")]
    attempts: u32,

    /// Seconds between delivery attempts (at most one week)
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(..=604_800))]
    retry_interval: u64,

    /// Seconds to wait for a CSMS reply (at most one week)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..=604_800))]
    message_timeout: u64,

    /// Queue size at which messages are evicted
    #[arg(long, default_value = "2000")]
    threshold: usize,

    /// Number of EVSEs
    #[arg(long, default_value = "1")]
    evse_count: u32,

    /// Vendor name
    #[arg(long, default_value = "EVerest")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "EVQ-OCPP")]
    model: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let protocol = match args.protocol {
        Protocol::Ocpp16 => V16::SUBPROTOCOL,
        Protocol::Ocpp201 => V201::SUBPROTOCOL,
    };
    let storage = args
        .data_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "memory".to_string());

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            EVQ-OCPP Node - Charging Station Queue            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Station:  {:<50} ║", args.station);
    println!("║  CSMS URL: {:<50} ║", truncate(&args.csms_url, 50));
    println!("║  Protocol: {:<50} ║", protocol);
    println!("║  Storage:  {:<50} ║", truncate(&storage, 50));
    println!("║  EVSEs:    {:<50} ║", args.evse_count);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build configuration
    let queue = MessageQueueConfig::default()
        .with_attempts(args.attempts)
        .with_retry_interval(Duration::from_secs(args.retry_interval))
        .with_message_timeout(Duration::from_secs(args.message_timeout))
        .with_threshold(args.threshold)
        .with_queue_all_messages(args.queue_all_messages);

    let config = AdapterConfig::new(&args.station, &args.csms_url)
        .with_vendor(&args.vendor, &args.model)
        .with_evse_count(args.evse_count)
        .with_queue(queue);

    let store: Arc<dyn PersistenceGateway> = match &args.data_dir {
        Some(dir) => Arc::new(FileStore::new(FileStoreConfig::new(dir))?),
        None => Arc::new(MemoryStore::new()),
    };

    info!("Starting EVQ-OCPP node...");

    match args.protocol {
        Protocol::Ocpp16 => run(Adapter::<V16>::new(config, store)?).await,
        Protocol::Ocpp201 => run(Adapter::<V201>::new(config, store)?).await,
    }
}

/// Drive the adapter until Ctrl-C or the client gives up
async fn run<P: OcppProtocol>(mut adapter: Adapter<P>) -> Result<(), Box<dyn std::error::Error>> {
    let session = adapter.session();
    let mut client = adapter.spawn()?;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut reported = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }

            result = &mut client => {
                match result {
                    Ok(Ok(())) => info!("Client stopped"),
                    Ok(Err(e)) => error!("Client error: {}", e),
                    Err(e) => error!("Client task failed: {}", e),
                }
                break;
            }

            // Report connectors once registered
            _ = tick.tick(), if !reported => {
                if session.read().await.is_registered() {
                    adapter.status_notification_all(ConnectorStatus::Available)?;
                    reported = true;
                }
            }
        }
    }

    let stats = adapter.queue().stats();
    info!(
        "Queue: {} enqueued, {} acknowledged, {} dropped, {} pending",
        stats.enqueued,
        stats.acknowledged,
        stats.dropped,
        adapter.queue().len()
    );
    adapter.shutdown();
    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
