//! Drift CLI
//!
//! Share files and text with nearby devices on the local network.

mod actions;
mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use drift_core::{Endpoint, Engine, EngineEvent, EngineHandle, Item, Metadata};
use drift_files::GENERIC_DATA_TYPE;
use drift_files::metadata::ORIGINAL_FILENAME_KEY;
use drift_transport::LanTransport;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// Drift - share items with nearby devices
#[derive(Parser)]
#[command(name = "drift")]
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
    /// List nearby devices
    Peers {
        /// Seconds to listen for beacons
        #[arg(short, long, default_value_t = 5)]
        wait: u64,
    },

    /// Send a file to a nearby device
    Send {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Display name or identifier of the receiving device
        #[arg(short, long, required = true)]
        to: String,

        /// Item type (guessed from the extension if omitted)
        #[arg(long = "type")]
        item_type: Option<String>,

        /// Item title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Seconds to wait for the device to appear
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },

    /// Receive items until interrupted
    Receive {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Accept only these types (repeatable; default accepts everything)
        #[arg(short, long)]
        allow: Vec<String>,

        /// Save text items instead of printing them
        #[arg(long)]
        no_print: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Peers { wait } => {
            list_peers(Duration::from_secs(wait), &config).await?;
        }
        Commands::Send {
            file,
            to,
            item_type,
            title,
            wait,
        } => {
            send_file(&file, &to, item_type, title, Duration::from_secs(wait), &config).await?;
        }
        Commands::Receive {
            output,
            allow,
            no_print,
        } => {
            receive_items(&output, &allow, !no_print, &config).await?;
        }
    }

    Ok(())
}

/// Spawn and start an engine on the LAN adapter
async fn start_engine(config: &Config, allow: &[String]) -> anyhow::Result<EngineHandle> {
    let transport = Arc::new(LanTransport::new(config.lan_config()?));
    let engine = Engine::spawn(config.engine_config(allow), transport)?;
    engine.start().await?;

    tracing::info!(
        id = engine.identifier(),
        name = engine.display_name(),
        "Drift engine started"
    );
    Ok(engine)
}

/// Listen for beacons, then print the devices seen
async fn list_peers(wait: Duration, config: &Config) -> anyhow::Result<()> {
    let engine = start_engine(config, &[]).await?;
    let mut events = engine.subscribe().await?;

    println!("{} for {}...", style("Browsing").bold(), format_duration(wait));

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = events.recv() => match event {
                Some(EngineEvent::EndpointFound(endpoint)) => {
                    println!("  {} {endpoint}", style("+").green());
                }
                Some(EngineEvent::EndpointLost(endpoint)) => {
                    println!("  {} {endpoint}", style("-").red());
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    let endpoints = engine.endpoints().await?;
    println!();
    if endpoints.is_empty() {
        println!("No devices found");
    } else {
        println!("{}", style("Nearby devices:").bold());
        for endpoint in &endpoints {
            println!(
                "  {:<24} {}",
                endpoint.display_name(),
                style(endpoint.id()).dim()
            );
        }
    }

    engine.shutdown().await?;
    Ok(())
}

/// Send one file and wait for the transfer to finish
async fn send_file(
    file: &Path,
    to: &str,
    item_type: Option<String>,
    title: Option<String>,
    wait: Duration,
    config: &Config,
) -> anyhow::Result<()> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Not a file path: {}", file.display()))?;

    let mut metadata = Metadata::new();
    metadata.insert(ORIGINAL_FILENAME_KEY.to_string(), file_name.clone());
    let item = Item::from_file(
        file,
        title.unwrap_or_else(|| file_name.clone()),
        item_type.unwrap_or_else(|| type_for_path(file).to_string()),
        metadata,
    )
    .with_context(|| format!("Cannot share {}", file.display()))?;
    let total = item.len()?;

    let engine = start_engine(config, &[]).await?;
    let mut events = engine.subscribe().await?;

    let endpoint = wait_for_endpoint(&engine, &mut events, to, wait)
        .await?
        .with_context(|| format!("No device named {to} found within {}", format_duration(wait)))?;

    println!(
        "Sending {} ({}) to {}",
        style(&file_name).bold(),
        format_bytes(total),
        style(&endpoint).cyan()
    );

    let started = Instant::now();
    let transfer = engine.send(item, &endpoint).await?;
    let progress = TransferProgress::new(total, &file_name);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => progress.update(transfer.bytes_sent()),
            event = events.recv() => match event {
                Some(EngineEvent::SendFinished { transfer: done, result }) if done.id() == transfer.id() => {
                    break result;
                }
                Some(EngineEvent::Stopping) | None => {
                    break Err(drift_core::EngineError::Cancelled);
                }
                Some(_) => {}
            },
        }
    };

    match &result {
        Ok(()) => {
            progress.update(transfer.bytes_sent());
            progress.finish_with_message(format!(
                "Sent {file_name} in {}",
                format_duration(started.elapsed())
            ));
        }
        Err(e) => progress.abandon(format!("Transfer failed: {e}")),
    }

    engine.shutdown().await?;
    result.map_err(Into::into)
}

/// Wait until a device matching `target` (name or identifier) is visible
async fn wait_for_endpoint(
    engine: &EngineHandle,
    events: &mut drift_core::Subscription,
    target: &str,
    wait: Duration,
) -> anyhow::Result<Option<Endpoint>> {
    let matches = |endpoint: &Endpoint| {
        endpoint.display_name() == target || endpoint.id().as_str() == target
    };

    if let Some(endpoint) = engine.endpoints().await?.into_iter().find(|e| matches(e)) {
        return Ok(Some(endpoint));
    }

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => return Ok(None),
            event = events.recv() => match event {
                Some(EngineEvent::EndpointFound(endpoint)) if matches(&endpoint) => {
                    return Ok(Some(endpoint));
                }
                Some(_) => {}
                None => return Ok(None),
            },
        }
    }
}

/// Receive items until Ctrl+C
async fn receive_items(
    output: &Path,
    allow: &[String],
    print_text: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let handlers = actions::receive_handlers(output, print_text);
    let engine = start_engine(config, allow).await?;
    let mut events = engine.subscribe().await?;

    // Received items stay in the known set until this command exits
    engine.retain_known_items().await?;

    let allowed = engine.allowed_types().await?;
    println!(
        "{} as {} ({})",
        style("Receiving").bold(),
        style(engine.display_name()).cyan(),
        if allowed.is_empty() {
            "all types".to_string()
        } else {
            allowed.iter().collect::<Vec<_>>().join(", ")
        }
    );
    println!("Press Ctrl+C to stop\n");

    let mut received: BTreeMap<String, usize> = BTreeMap::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(EngineEvent::EndpointFound(endpoint)) => {
                    tracing::info!(endpoint = %endpoint, "Device nearby");
                }
                Some(EngineEvent::ReceiveStarted(transfer)) => {
                    println!(
                        "{} {} from {}",
                        style("<-").green(),
                        transfer.title().unwrap_or_default(),
                        transfer.source()
                    );
                }
                Some(EngineEvent::ReceiveFinished { transfer, result }) => match result {
                    Ok(item) => {
                        let handler = handlers.handler_for(&item);
                        match handler.apply(&item) {
                            Ok(summary) => println!("   {summary}"),
                            Err(e) => eprintln!("   {} {e:#}", style("error:").red()),
                        }
                        *received
                            .entry(transfer.source().display_name().to_string())
                            .or_default() += 1;
                    }
                    Err(e) => eprintln!(
                        "   {} transfer from {} failed: {e}",
                        style("error:").red(),
                        transfer.source()
                    ),
                },
                Some(EngineEvent::Stopping) | None => break,
                Some(_) => {}
            },
        }
    }

    engine.release_known_items().await?;
    engine.shutdown().await?;

    for (source, count) in &received {
        println!("{count} item(s) from {source}");
    }
    Ok(())
}

/// Best-effort item type from a file extension
fn type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("txt" | "md" | "log") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => GENERIC_DATA_TYPE,
    }
}
