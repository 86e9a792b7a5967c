#![deny(unsafe_code)]

//! vpnwarden CLI: drive a VPN daemon through its management interface.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vpnwarden_config::AppConfig;
use vpnwarden_core::{
    ChannelOptions, LogObserver, ManagementEvent, ShutdownSignal, SocketConnector, Supervisor,
    SystemProcessTable, Takeover, TakeoverError, build_info, event_channel,
};

/// vpnwarden: supervise a VPN daemon over its management interface.
#[derive(Parser, Debug)]
#[command(name = "vpnwarden", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "vpnwarden.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Management host, or socket path when the port is `unix`.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Management port, or `unix`.
    #[arg(long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the daemon's current status step.
    State,

    /// Print traffic counters.
    Status {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Stay connected and print events until Ctrl-C.
    Watch,

    /// Ask the daemon to exit and remove its temp files.
    Stop,

    /// Stop a daemon left running by an earlier session.
    Takeover,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, from_file) = load_config(&cli.config).await?;
    apply_overrides(&mut config, cli.host.as_deref(), cli.port.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter_for(cli.verbose, &config.logging.level))),
        )
        .init();

    info!(version = %build_info::version_string(), "vpnwarden starting");
    if !from_file {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::State => cmd_state(&config).await?,
        Commands::Status { json } => cmd_status(&config, json).await?,
        Commands::Watch => cmd_watch(&config).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Takeover => cmd_takeover(&config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

fn filter_for(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn apply_overrides(config: &mut AppConfig, host: Option<&str>, port: Option<&str>) {
    if let Some(host) = host {
        config.management.host = host.to_string();
    }
    if let Some(port) = port {
        config.management.port = port.to_string();
    }
}

async fn connected(config: &AppConfig) -> Result<Supervisor> {
    let supervisor = Supervisor::from_config(config, vpnwarden_core::EventSink::discard())?;
    supervisor
        .connect()
        .await
        .with_context(|| format!("cannot reach management interface at {}", endpoint_of(config)))?;
    Ok(supervisor)
}

fn endpoint_of(config: &AppConfig) -> String {
    format!("{}:{}", config.management.host, config.management.port)
}

async fn cmd_state(config: &AppConfig) -> Result<()> {
    let supervisor = connected(config).await?;
    let state = supervisor.query_state().await;
    supervisor.disconnect().await;
    println!("{}", state?);
    Ok(())
}

async fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let supervisor = connected(config).await?;
    let traffic = supervisor.query_traffic().await;
    supervisor.disconnect().await;
    let traffic = traffic?;

    if json {
        println!("{}", serde_json::to_string_pretty(&traffic)?);
    } else {
        println!("download: {}", traffic.download);
        println!("upload:   {}", traffic.upload);
    }
    Ok(())
}

async fn cmd_watch(config: &AppConfig) -> Result<()> {
    let (events, mut rx) = event_channel();
    let supervisor = Supervisor::from_config(config, events.clone())?;
    supervisor.connect_retry(0, config.supervisor.max_retries())?;

    let mut observer = LogObserver::new(supervisor.clone(), &config.observer, events);
    observer.set_watcher(|line: &str| println!("log      {line}"));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let poller = observer.spawn_poller(config.observer.poll_interval(), shutdown_rx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break;
            }
            event = rx.recv() => match event {
                Some(ManagementEvent::LogLine(_)) => {}
                Some(ManagementEvent::Connected) => println!("connected"),
                Some(ManagementEvent::Disconnected) => println!("disconnected"),
                Some(ManagementEvent::StateChanged(state)) => println!("state    {state}"),
                Some(ManagementEvent::TrafficUpdate(t)) => {
                    println!("traffic  down {} up {}", t.download, t.upload);
                }
                Some(ManagementEvent::Aborted) => {
                    println!("aborted");
                    warn!("Gave up connecting to the management interface");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = shutdown_tx.send(ShutdownSignal);
    if let Err(e) = poller.await {
        warn!(error = %e, "Observer task failed");
    }
    supervisor.disconnect().await;
    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let supervisor = connected(config).await?;
    supervisor.terminate(true).await;
    supervisor.disconnect().await;
    println!("SIGTERM sent to daemon at {}", endpoint_of(config));
    Ok(())
}

async fn cmd_takeover(config: &AppConfig) -> Result<()> {
    let takeover = Takeover::new(
        SystemProcessTable,
        SocketConnector::new(ChannelOptions::from(&config.management)),
        &config.takeover,
    );
    match takeover.stop_if_already_running().await {
        Ok(true) => println!("Stopped a daemon left over from an earlier session."),
        Ok(false) => println!("No daemon running."),
        Err(e @ TakeoverError::OwnProcessStillRunning { .. }) => {
            bail!("{e}; stop it manually before starting a new session")
        }
        Err(e @ TakeoverError::ForeignProcessDetected { .. }) => {
            bail!("{e}; it was not started by vpnwarden and was left alone")
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("TOML error")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Load the config file, or defaults when it does not exist. The flag
/// reports whether the file was found.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}
