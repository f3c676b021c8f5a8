//! Command-line interface for the telemetry relay.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telemetry_relay::fetcher::parse_records;
use telemetry_relay::{
    ConfigStore, FileConfigSource, MqttPublisher, Settings, Supervisor, TelemetryClient,
    SETTINGS_FILE,
};
use tracing::info;

/// Telemetry Relay - Forward cloud device readings to MQTT.
#[derive(Parser, Debug)]
#[command(name = "telemetry-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform (defaults to `run`).
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory the devices file is resolved against
    /// (default: the executable's directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Settings file (default: <root>/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Poll devices and publish to MQTT until stopped.
    Run,
    /// Validate the devices file and list the devices it defines.
    Check,
    /// Fetch once for a token and print every parameter the API returns.
    Probe {
        /// Device access token.
        #[arg(short, long)]
        token: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let root = resolve_root(args.root.as_deref());
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| root.join(SETTINGS_FILE));
    let settings = Settings::load(&settings_path)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(settings, &root).await,
        Command::Check => check(&settings, &root),
        Command::Probe { token } => probe(settings, &token).await,
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "telemetry_relay=debug"
    } else {
        "telemetry_relay=info"
    };

    // JSON logging for container environments
    let json_logging = std::env::var("RELAY_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Explicit root, else the executable's directory, else the working directory.
fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(root) = explicit {
        return root.to_path_buf();
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn run(settings: Settings, root: &Path) -> Result<()> {
    let devices_path = settings.devices_path(root);
    info!(
        devices_file = %devices_path.display(),
        api = %settings.api.url(),
        broker = %settings.mqtt.broker_addr(),
        "Starting telemetry relay"
    );

    let mut supervisor = Supervisor::new(
        ConfigStore::new(FileConfigSource::new(devices_path)),
        Box::new(TelemetryClient::new(settings.api.clone())),
        Box::new(MqttPublisher::new(settings.mqtt.clone())),
        settings.schedule,
    );

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }
    Ok(())
}

fn check(settings: &Settings, root: &Path) -> Result<()> {
    let store = ConfigStore::new(FileConfigSource::new(settings.devices_path(root)));
    let devices_path = store.source().path();
    let snapshot = store
        .load()
        .with_context(|| format!("Invalid devices file {}", devices_path.display()))?;

    println!("{}: {} device(s)", devices_path.display(), snapshot.len());
    for device in snapshot.devices() {
        println!("  {}... -> {}", device.token_prefix(), device.mqtt_topic);
        for (raw_key, display_name) in device.parameter_map.iter() {
            println!("      {} => {}", raw_key, display_name);
        }
    }
    Ok(())
}

async fn probe(settings: Settings, token: &str) -> Result<()> {
    let client = TelemetryClient::new(settings.api);
    println!("Fetching {} (token {}...)", client.url(), telemetry_relay::token_prefix(token));

    let body = client
        .fetch_body(token)
        .await
        .context("Failed to fetch device data")?;

    println!("\n--- Raw response ---");
    println!("{}", serde_json::to_string_pretty(&body)?);

    println!("\n--- Parameters ---");
    let records = parse_records(&body).context("Response has no parameter data")?;
    for record in records {
        match (record.key, record.value) {
            (Some(key), Some(value)) => println!("  {} = {}", key, value),
            (Some(key), None) => println!("  {} = (missing value)", key),
            (None, _) => println!("  (skipping record without parameter_key)"),
        }
    }
    Ok(())
}
