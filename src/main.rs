//! atemctl - Remote control for live production switchers
//!
//! Drives a switcher's UDP control protocol: handshake, preview selection,
//! cut and auto transitions.

mod config;
mod network;
mod protocol;
mod session;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Config, DemoConfig};
use network::{ClientEvent, SwitcherClient, UdpTransport};
use protocol::SwitcherCommand;

/// atemctl - Remote control for live production switchers
#[derive(Parser)]
#[command(name = "atemctl")]
#[command(author = "atemctl Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Control a video switcher over its UDP protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which switcher to talk to; falls back to the configuration
#[derive(Args, Debug, Clone, Default)]
struct Target {
    /// Switcher hostname or IP address
    #[arg(short, long)]
    address: Option<String>,

    /// Switcher control port
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo sequence: preview, cut, auto
    Demo {
        #[command(flatten)]
        target: Target,
    },

    /// Put an input on preview
    Preview {
        #[command(flatten)]
        target: Target,

        /// Input index (not range checked)
        #[arg(short, long)]
        input: u8,
    },

    /// Cut preview to program
    Cut {
        #[command(flatten)]
        target: Target,
    },

    /// Run the auto transition
    Auto {
        #[command(flatten)]
        target: Target,
    },

    /// Complete the handshake and print the session state
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for the configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    init_logging(
        cli.verbose || config.general.verbose,
        config.general.log_file.as_deref(),
    )?;

    match cli.command {
        Commands::Demo { target } => {
            run_demo(config, target).await?;
        }
        Commands::Preview { target, input } => {
            run_command(config, target, SwitcherCommand::SetPreview { input }).await?;
        }
        Commands::Cut { target } => {
            run_command(config, target, SwitcherCommand::Cut).await?;
        }
        Commands::Auto { target } => {
            run_command(config, target, SwitcherCommand::Auto).await?;
        }
        Commands::Status { target } => {
            run_status(config, target).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Initialize logging to stderr, plus a plain-text file when configured
fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

/// Open the transport, bind a client to it and send hello
async fn connect(
    config: &Config,
    target: &Target,
) -> anyhow::Result<(SwitcherClient, mpsc::Receiver<ClientEvent>)> {
    let address = target
        .address
        .clone()
        .unwrap_or_else(|| config.switcher.address.clone());
    let net_config = config.network_config(target.port.unwrap_or(config.switcher.port));

    let remote = network::resolve_host(&address, net_config.port).await?;
    let transport = match UdpTransport::open(remote, &net_config).await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!("Failed to open transport to {}: {}", remote, e);
            return Err(e.into());
        }
    };

    println!("Connecting to {}...", transport.remote_addr());
    tracing::debug!("Local address {}", transport.local_addr()?);

    let mut client = SwitcherClient::new(net_config);
    let events = client
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("Event receiver already taken"))?;

    client.connect(transport).await?;
    client.hello().await?;

    Ok((client, events))
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Ready { session_id } => {
            tracing::info!("Switcher ready, session {:#06x}", session_id);
        }
        ClientEvent::CommandAcknowledged { command, counter } => {
            tracing::info!("Switcher confirmed {} (counter {})", command, counter);
        }
        ClientEvent::DatagramDiscarded { reason } => {
            tracing::warn!("Discarded datagram: {}", reason);
        }
        ClientEvent::Disconnected { reason } => {
            tracing::info!("Disconnected: {}", reason);
        }
        other => {
            tracing::debug!("Event: {:?}", other);
        }
    }
}

/// Wait until an event satisfies `matches`, logging everything seen
async fn wait_for<F>(
    events: &mut mpsc::Receiver<ClientEvent>,
    timeout: Duration,
    what: &str,
    mut matches: F,
) -> anyhow::Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                log_event(&event);
                if matches(&event) {
                    return Ok(event);
                }
                if let ClientEvent::Disconnected { reason } = event {
                    anyhow::bail!("Disconnected while waiting for {}: {}", what, reason);
                }
            }
            Ok(None) => anyhow::bail!("Event stream closed while waiting for {}", what),
            Err(_) => anyhow::bail!("Timed out after {:?} waiting for {}", timeout, what),
        }
    }
}

/// Disconnect and wait briefly for the session task to stop
async fn shutdown(client: &SwitcherClient, events: &mut mpsc::Receiver<ClientEvent>) {
    if !client.is_connected().await {
        return;
    }

    if let Err(e) = client.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
        return;
    }

    let stopped = wait_for(events, Duration::from_secs(1), "disconnect", |e| {
        matches!(e, ClientEvent::Disconnected { .. })
    })
    .await;
    if let Err(e) = stopped {
        tracing::warn!("{}", e);
    }
}

async fn wait_ready(config: &Config, events: &mut mpsc::Receiver<ClientEvent>) -> anyhow::Result<u16> {
    let ready = wait_for(
        events,
        Duration::from_millis(config.session.ready_timeout_ms),
        "switcher ready",
        |e| matches!(e, ClientEvent::Ready { .. }),
    )
    .await?;

    match ready {
        ClientEvent::Ready { session_id } => Ok(session_id),
        other => anyhow::bail!("Unexpected event {:?}", other),
    }
}

/// Connect, send one command, wait for its confirmation, disconnect
async fn run_command(config: Config, target: Target, command: SwitcherCommand) -> anyhow::Result<()> {
    let (client, mut events) = connect(&config, &target).await?;

    let result = issue_and_confirm(&config, &client, &mut events, command).await;
    shutdown(&client, &mut events).await;

    result
}

async fn issue_and_confirm(
    config: &Config,
    client: &SwitcherClient,
    events: &mut mpsc::Receiver<ClientEvent>,
    command: SwitcherCommand,
) -> anyhow::Result<()> {
    let session_id = wait_ready(config, events).await?;
    tracing::info!("Sending {} in session {:#06x}", command, session_id);

    client.command(command).await?;

    let kind = command.kind();
    let confirmed = wait_for(
        events,
        Duration::from_millis(config.session.command_timeout_ms),
        "command confirmation",
        |e| matches!(e, ClientEvent::CommandAcknowledged { command, .. } if *command == kind),
    )
    .await?;

    if let ClientEvent::CommandAcknowledged { counter, .. } = confirmed {
        println!("{} ({}) confirmed, counter {}", command, kind.wire_name(), counter);
    }

    Ok(())
}

/// Connect, complete the handshake and print the session
async fn run_status(config: Config, target: Target) -> anyhow::Result<()> {
    let (client, mut events) = connect(&config, &target).await?;

    let result = wait_ready(&config, &mut events).await;
    if result.is_ok() {
        println!("{}", client.snapshot().await);
    }
    shutdown(&client, &mut events).await;

    result.map(|_| ())
}

/// Log events until the session stops
async fn log_events(mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        log_event(&event);
        if matches!(event, ClientEvent::Disconnected { .. }) {
            break;
        }
    }
}

/// Run the demo sequence with fixed delays
async fn run_demo(config: Config, target: Target) -> anyhow::Result<()> {
    let (client, events) = connect(&config, &target).await?;
    let logger = tokio::spawn(log_events(events));

    let result = tokio::select! {
        result = demo_sequence(&client, &config.demo) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted");
            Ok(())
        }
    };

    client.disconnect().await?;
    if tokio::time::timeout(Duration::from_secs(1), logger).await.is_err() {
        tracing::warn!("Session did not report disconnect");
    }

    result
}

async fn demo_sequence(client: &SwitcherClient, demo: &DemoConfig) -> anyhow::Result<()> {
    let pause = |ms: u64| tokio::time::sleep(Duration::from_millis(ms));

    pause(demo.hello_settle_ms).await;
    if !client.is_ready().await {
        anyhow::bail!("Switcher not ready after {} ms", demo.hello_settle_ms);
    }
    println!("OK");

    client.set_preview(demo.preview_input).await?;
    pause(demo.step_delay_ms).await;

    println!("Cut");
    client.cut().await?;
    pause(demo.step_delay_ms).await;

    println!("Auto");
    client.auto().await?;
    pause(demo.finish_delay_ms).await;

    println!("Done");
    pause(demo.finish_delay_ms).await;

    Ok(())
}
