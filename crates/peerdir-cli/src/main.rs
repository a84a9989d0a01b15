//! Peer Directory CLI
//!
//! Thin wrapper around peerdir-core for inspecting a node's record store and
//! running a gossip node over UDP.
//!
//! ## Usage
//!
//! ```bash
//! # Show node information
//! peerdir info
//!
//! # Hash a phone number into its identity key
//! peerdir hash "+1 (555) 123-4567"
//!
//! # Inspect stored records
//! peerdir records list --limit 20
//! peerdir records show <hash>
//!
//! # Feed a gossip payload through the inbound path
//! peerdir ingest payload.json --from <hash>
//!
//! # Run a node
//! peerdir serve --bind 0.0.0.0:8888 --peer <hash>=203.0.113.7
//! ```

mod node;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peerdir_core::config::CONFIG_FILE_NAME;
use peerdir_core::identity::normalize_phone;
use peerdir_core::{
    duration_millis, now_millis, ChannelTransport, GossipOnlyDirectory, InboundOutcome,
    NodeRecord, OutboundDatagram, PeerDirectory, PeerDirectoryConfig, DEFAULT_PORT,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::node::UdpNode;

/// Peer Directory - serverless contact discovery with gossip sync
#[derive(Parser)]
#[command(name = "peerdir")]
#[command(version = "0.1.0")]
#[command(about = "Peer Directory - serverless contact discovery with gossip sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.peerdir/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show node information
    Info,

    /// Print the identity hash of a phone number
    Hash {
        /// Phone number in any common format
        phone: String,
    },

    /// Record store inspection and maintenance
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Merge a gossip payload file as if received from a peer
    Ingest {
        /// Payload file (`-` for stdin)
        file: PathBuf,

        /// Identity hash of the sending peer
        #[arg(long)]
        from: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run a UDP gossip node until Ctrl-C
    Serve {
        /// Address to bind the UDP socket to
        #[arg(short, long, default_value = "0.0.0.0:8888")]
        bind: String,

        /// Address to advertise (defaults to the bind address)
        #[arg(long)]
        advertise: Option<String>,

        /// Known peer as `<hash>=<ip[:port]>` (repeatable)
        #[arg(long = "peer", value_parser = parse_peer)]
        peers: Vec<(String, String)>,

        /// Port assumed for peer addresses given without one
        #[arg(long, default_value_t = DEFAULT_PORT)]
        peer_port: u16,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List the most recently seen records
    List {
        /// Maximum number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one record
    Show {
        /// Identity hash
        hash: String,
    },

    /// Evict least recently seen records beyond capacity
    Trim,

    /// Remove records not seen recently
    Sweep {
        /// Age in seconds (default: configured stale_after_secs)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the effective configuration to the data directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory (~/.peerdir/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".peerdir")
        .join("data")
}

/// Parse `<hash>=<address>`
fn parse_peer(s: &str) -> Result<(String, String), String> {
    let (hash, address) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected <hash>=<address>, got '{}'", s))?;
    if hash.is_empty() || address.is_empty() {
        return Err(format!("Expected <hash>=<address>, got '{}'", s));
    }
    Ok((hash.to_string(), address.to_string()))
}

fn format_timestamp(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_record(record: &NodeRecord) {
    println!("Record:");
    println!("  Hash: {}", record.identity_hash);
    println!("  Address: {}:{}", record.address, record.port);
    println!("  Public key: {}", record.public_key);
    println!("  Last seen: {}", format_timestamp(record.last_seen));
    println!("  Synced: {}", if record.synced { "yes" } else { "no" });
    if let Some(hint) = &record.contact_hint {
        println!("  Contact: {}", hint);
    }
}

fn read_payload(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut payload = String::new();
        std::io::stdin().read_to_string(&mut payload)?;
        return Ok(payload);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn load_config(data_dir: &Path) -> Result<PeerDirectoryConfig> {
    let mut config = PeerDirectoryConfig::load_or_default(data_dir.join(CONFIG_FILE_NAME))?;
    config.data_dir = data_dir.to_path_buf();
    Ok(config)
}

type LocalDirectory = (
    PeerDirectory<GossipOnlyDirectory>,
    UnboundedReceiver<OutboundDatagram>,
);

/// Open the directory with an in-process outbound queue
fn open_local(config: PeerDirectoryConfig) -> Result<LocalDirectory> {
    let (transport, outbound) = ChannelTransport::new();
    let directory = PeerDirectory::open(config, GossipOnlyDirectory, Arc::new(transport))?;
    Ok((directory, outbound))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let config = load_config(&data_dir)?;

    match cli.command {
        Commands::Info => {
            let (directory, _outbound) = open_local(config)?;
            let info = directory.node_info()?;

            println!("Peer Directory v0.1.0");
            println!();
            println!("Identity:");
            println!("  Hash: {}", info.identity_hash);
            println!("  Public key: {}", info.public_key);
            println!();
            println!("Data directory: {}", info.data_dir.display());
            println!("Records: {} / {}", info.record_count, info.capacity);
        }

        Commands::Hash { phone } => {
            if normalize_phone(&phone).is_none() {
                anyhow::bail!("'{}' contains no digits", phone);
            }
            println!("{}", config.hasher().hash(&phone));
        }

        Commands::Records { action } => {
            let (directory, _outbound) = open_local(config)?;
            let store = directory.store();

            match action {
                RecordsAction::List { limit } => {
                    let records = store.recent(limit)?;
                    if records.is_empty() {
                        println!("No records stored.");
                    } else {
                        println!("Records ({} of {}):", records.len(), store.len()?);
                        for record in &records {
                            println!(
                                "  {}  {}:{}  {}{}",
                                record.identity_hash,
                                record.address,
                                record.port,
                                format_timestamp(record.last_seen),
                                if record.synced { "  [synced]" } else { "" }
                            );
                        }
                    }
                }

                RecordsAction::Show { hash } => match store.get(&hash)? {
                    Some(record) => print_record(&record),
                    None => anyhow::bail!("No record for {}", hash),
                },

                RecordsAction::Trim => {
                    let evicted = store.trim()?;
                    println!("Evicted {} record(s)", evicted);
                }

                RecordsAction::Sweep { max_age_secs } => {
                    let removed = match max_age_secs {
                        Some(secs) => {
                            let max_age = Duration::from_secs(secs);
                            store.sweep_stale(now_millis().saturating_sub(duration_millis(max_age)))?
                        }
                        None => directory.sweep_stale()?,
                    };
                    println!("Removed {} stale record(s)", removed);
                }
            }
        }

        Commands::Ingest { file, from } => {
            let payload = read_payload(&file)?;
            let (directory, mut outbound) = open_local(config)?;

            match directory.handle_incoming(&payload, &from) {
                InboundOutcome::Processed(summary) => {
                    println!("Merged payload from {}", from);
                    println!("  Received: {}", summary.received);
                    println!("  Dropped: {}", summary.dropped);
                    println!("  Applied: {}", summary.applied);
                    println!("  Discovered: {}", summary.discovered);
                    println!("  Stale: {}", summary.stale);
                    println!("  Key mismatches: {}", summary.key_mismatches);
                    println!("  Skipped (self): {}", summary.skipped_self);
                    println!("  Evicted: {}", summary.evicted);

                    let mut probes = 0;
                    while outbound.try_recv().is_ok() {
                        probes += 1;
                    }
                    println!("  Probes queued: {}", probes);
                }
                InboundOutcome::Throttled => println!("Payload throttled"),
                InboundOutcome::Malformed => anyhow::bail!("Malformed gossip payload"),
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Init { force } => {
                let path = config.config_path();
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                config.save(&path)?;
                println!("Wrote {}", path.display());
            }
        },

        Commands::Serve {
            bind,
            advertise,
            peers,
            peer_port,
        } => {
            let socket = UdpSocket::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            let local = socket.local_addr()?;
            let (directory, outbound) = open_local(config)?;

            let gossip = directory.gossip();
            for (hash, address) in &peers {
                gossip.mark_active(hash.clone(), address.clone());
            }

            let advertised = advertise.unwrap_or_else(|| local.ip().to_string());
            directory.publish_self(None, &advertised, local.port()).await?;

            println!("Starting peer directory node...");
            println!();
            println!("Identity: {}", directory.local_identity());
            println!("Listening: {}", local);
            println!("Advertised: {}:{}", advertised, local.port());
            println!("Known peers: {}", peers.len());
            println!();
            println!("Node is running. Press Ctrl+C to stop.");

            UdpNode::new(directory, socket, outbound, peer_port).run().await?;

            println!("Goodbye.");
        }
    }

    Ok(())
}
