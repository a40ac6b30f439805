//! OBD-II Sensor Poller CLI
//!
//! Loads configuration, picks a serial port, runs the adapter handshake and
//! logs polled sensor readings until interrupted.

use anyhow::{bail, Context};
use obd_poller::{PollSnapshot, PollerConfig, Sample, SensorPoller};
use obd_protocol::{AdapterConfig, AdapterConnection, ObdError, PortProvider, SensorRegistry};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-poll.toml";

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "OBD_CONFIG";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial port; the first discovered port when unset
    pub port: Option<String>,
    pub adapter: AdapterConfig,
    pub poller: PollerConfig,
    pub logging: LoggingConfig,
}

/// Load configuration from a TOML file (optional) and `OBD_*` variables.
///
/// Nested keys use a double underscore, e.g. `OBD_ADAPTER__BYTE_TIMEOUT_MS`;
/// `OBD_POLLER__SENSORS` takes a comma separated list.
pub fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let path = path
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    load_config_with(&path, environment())
}

/// `OBD_*` overrides read from the process environment
fn environment() -> config::Environment {
    config::Environment::with_prefix("OBD")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("poller.sensors")
        .try_parsing(true)
}

fn load_config_with(path: &str, env: config::Environment) -> anyhow::Result<AppConfig> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(env)
        .build()
        .with_context(|| format!("failed to read configuration from {}", path))?;

    let app: AppConfig = config
        .try_deserialize()
        .context("invalid configuration")?;
    app.adapter.validate()?;
    Ok(app)
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = Level::from_str(&config.level)
        .with_context(|| format!("unknown log level {:?}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("failed to set tracing subscriber")?;

    Ok(())
}

/// Serial ports reported by the operating system.
///
/// Bluetooth links come first, then USB adapters, then everything else.
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> Result<Vec<String>, ObdError> {
        let mut ports: Vec<String> = tokio_serial::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect();
        ports.sort_by_key(|name| port_rank(name));
        Ok(ports)
    }
}

fn port_rank(name: &str) -> u8 {
    if name.contains("rfcomm") {
        0
    } else if name.contains("ttyUSB") {
        1
    } else {
        2
    }
}

/// Use the configured port, or the first one `provider` offers
pub fn select_port(
    configured: Option<&str>,
    provider: &dyn PortProvider,
) -> anyhow::Result<String> {
    if let Some(port) = configured {
        return Ok(port.to_string());
    }

    let ports = provider.available_ports()?;
    info!("Found ports: {:?}", ports);
    match ports.into_iter().next() {
        Some(port) => Ok(port),
        None => bail!("no OBD-II adapter found"),
    }
}

/// Log every sample of a snapshot
pub fn log_snapshot(snapshot: &PollSnapshot) {
    for sample in &snapshot.samples {
        match sample {
            Sample::Reading(reading) => info!(
                sensor = reading.key,
                value = ?reading.value,
                unit = reading.unit,
                "reading"
            ),
            Sample::Unavailable { key, reason } => {
                info!(sensor = *key, reason = %reason, "unavailable")
            }
        }
    }
}

/// Connect, handshake and poll until Ctrl-C or link failure
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let port = select_port(config.port.as_deref(), &SystemPorts)?;

    let mut conn = AdapterConnection::open(&port, config.adapter.clone())
        .await
        .with_context(|| format!("failed to open {}", port))?;

    if let Err(e) = conn.initialize().await {
        conn.close().await;
        return Err(e).context("adapter handshake failed");
    }
    info!(
        port = %conn.port(),
        version = conn.version().unwrap_or("unknown"),
        "Adapter connected"
    );

    let mut poller = SensorPoller::new(config.poller.clone(), SensorRegistry::standard())?;
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(16);
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, stopping"),
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
        stop_tx.send_replace(true);
    });

    let logger = tokio::spawn(async move {
        while let Some(snapshot) = snapshot_rx.recv().await {
            log_snapshot(&snapshot);
        }
    });

    let result = poller.run(&mut conn, snapshot_tx, stop_rx).await;
    conn.close().await;
    logger.await.context("snapshot logger panicked")?;

    result.context("polling stopped")
}
