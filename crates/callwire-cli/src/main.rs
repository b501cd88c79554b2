//! callwire CLI
//!
//! Link quality classification and chunked data-channel transfer.

mod config;
mod progress;

use anyhow::Context;
use bytes::Bytes;
use callwire_peer::{LoopbackPeer, parse_reports};
use callwire_stats::{QualityMonitor, QualityTier, QualityVerdict};
use callwire_transfer::{CompletedPayload, TransferEngine, TransferEvent, open_channel};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::Config;
use progress::{SendBar, format_bitrate, format_bytes, format_duration};

/// callwire - peer link quality and chunked data-channel transfer
#[derive(Parser)]
#[command(name = "callwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a statistics dump (JSON array of stats reports)
    Classify {
        /// Stats dump to read
        #[arg(required = true)]
        file: PathBuf,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a file across an in-memory channel pair and verify it
    Loopback {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Stats dump whose quality tier sizes the chunks
        #[arg(long)]
        stats: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Classify { file, json } => {
            classify_dump(&file, json, &config).await?;
        }
        Commands::Loopback { file, stats } => {
            run_loopback(&file, stats.as_deref(), &config).await?;
        }
    }

    Ok(())
}

/// Read a stats dump and classify it through a scripted connection
async fn check_dump(path: &Path, config: &Config) -> anyhow::Result<QualityVerdict> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let reports = parse_reports(&contents)
        .with_context(|| format!("{} is not a stats report array", path.display()))?;
    tracing::debug!(reports = reports.len(), "stats dump parsed");

    let peer = Arc::new(LoopbackPeer::new());
    peer.set_reports(reports);

    let monitor = QualityMonitor::with_connection(config.monitor_config(), peer);
    Ok(monitor.check().await?)
}

/// Classify a stats dump and print the verdict
async fn classify_dump(path: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let verdict = check_dump(path, config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }

    println!("Link quality: {}", styled_tier(verdict.tier));
    println!("Packet loss:  {:.2}%", verdict.packet_loss_rate);
    println!(
        "Packets:      {} received, {} lost",
        verdict.total_packets, verdict.total_packets_lost
    );
    println!("Bytes:        {}", format_bytes(verdict.total_bytes));
    match verdict.round_trip_time {
        Some(rtt) => println!("RTT:          {}", format_duration(rtt)),
        None => println!("RTT:          n/a"),
    }
    if let Some(bitrate) = verdict.available_outgoing_bitrate {
        println!("Outgoing:     {}", format_bitrate(bitrate));
    }

    Ok(())
}

fn styled_tier(tier: QualityTier) -> console::StyledObject<&'static str> {
    let name = tier.as_str();
    match tier {
        QualityTier::Excellent | QualityTier::Good => style(name).green().bold(),
        QualityTier::Fair => style(name).yellow().bold(),
        QualityTier::Poor | QualityTier::Bad => style(name).red().bold(),
    }
}

/// Send a file over an in-memory channel pair and verify the received bytes
async fn run_loopback(file: &Path, stats: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");

    let peer = Arc::new(LoopbackPeer::new());
    let transfer_config = config.transfer_config();

    let sender = open_channel(
        Some(&*peer),
        &config.transfer.label,
        transfer_config.clone(),
    )
    .await?;
    let remote = peer
        .accept_channel()
        .await
        .context("loopback peer did not hand out the remote channel end")?;
    let receiver = TransferEngine::new(remote, transfer_config)?;

    if let Some(path) = stats {
        let verdict = check_dump(path, config).await?;
        sender.set_link_quality(Some(verdict.tier));
        println!(
            "Link quality: {} ({:.2}% loss)",
            styled_tier(verdict.tier),
            verdict.packet_loss_rate
        );
    }

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(data.len() as u64));
    println!(
        "Chunk size: {}",
        format_bytes(sender.current_chunk_size() as u64)
    );

    let receiving = tokio::spawn(async move { receive_one(&receiver).await });

    let bar = SendBar::new(filename, data.len() as u64);
    let mut updates = sender.subscribe_progress();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let Some(p) = *updates.borrow_and_update() else {
                continue;
            };
            bar.observe(&p);
            if p.chunks_sent == p.total_chunks {
                break;
            }
        }
        bar
    });

    let payload = Bytes::from(data);
    let result = tokio::select! {
        result = sender.send(payload.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            watcher.abort();
            receiving.abort();
            anyhow::bail!("interrupted");
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            watcher.abort();
            receiving.abort();
            return Err(e.into());
        }
    };
    let bar = watcher.await?;

    let completed = match receiving.await? {
        Ok(completed) => completed,
        Err(e) => {
            bar.fail();
            return Err(e);
        }
    };

    if completed.payload != payload {
        bar.fail();
        anyhow::bail!(
            "received payload differs from the file ({} of {} bytes)",
            completed.payload.len(),
            payload.len()
        );
    }

    bar.complete(&report);
    println!(
        "Session {:08x}: {} chunks, {} in {}",
        report.session_id,
        report.total_chunks,
        format_bytes(report.bytes_sent),
        format_duration(report.elapsed)
    );
    println!("{}", style("Received payload matches").green());

    sender.close().await?;
    Ok(())
}

/// Wait for the first completed payload, failing on the first error
async fn receive_one(receiver: &TransferEngine) -> anyhow::Result<CompletedPayload> {
    match receiver.next_event().await {
        Some(TransferEvent::Completed(completed)) => Ok(completed),
        Some(TransferEvent::Failed(e)) => Err(e.into()),
        None => anyhow::bail!("channel closed before the payload arrived"),
    }
}
