//! Sensor Poller Implementation

use obd_protocol::{
    AdapterConnection, DecodedReading, ObdError, Sensor, SensorRegistry, Transport,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors raised by the poller
#[derive(Debug, Error)]
pub enum PollerError {
    /// Configured sensor key is not in the registry
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Rejected configuration value
    #[error("Invalid poller configuration: {0}")]
    InvalidConfig(String),

    /// The adapter connection is no longer usable
    #[error("Adapter connection lost: {0}")]
    Connection(#[from] ObdError),
}

/// Configuration for the sensor poller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between polling rounds in milliseconds (default: 1000)
    pub interval_ms: u64,
    /// Sensor keys queried each round, in order
    pub sensors: Vec<String>,
    /// Rounds without a single reading before warning
    pub max_empty_rounds: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            sensors: vec!["speed".to_string(), "rpm".to_string()],
            max_empty_rounds: 3,
        }
    }
}

impl PollerConfig {
    /// Interval between rounds
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Outcome of querying one sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Sample {
    /// Decoded value
    Reading(DecodedReading),
    /// No value this round (no data, timeout, bad payload)
    Unavailable { key: &'static str, reason: String },
}

impl Sample {
    /// Sensor key
    pub fn key(&self) -> &'static str {
        match self {
            Sample::Reading(reading) => reading.key,
            Sample::Unavailable { key, .. } => *key,
        }
    }
}

/// All samples from one polling round
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollSnapshot {
    /// Timestamp (Unix ms)
    pub timestamp_ms: u64,
    /// Samples in configured order
    pub samples: Vec<Sample>,
}

impl PollSnapshot {
    /// Sample for a sensor key
    pub fn get(&self, key: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.key() == key)
    }

    /// Numeric value for a sensor key, if it was read this round
    pub fn value(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Sample::Reading(reading) => reading.value.as_f64(),
            Sample::Unavailable { .. } => None,
        }
    }

    /// Number of sensors that produced a reading
    pub fn reading_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| matches!(s, Sample::Reading(_)))
            .count()
    }
}

/// Polls a fixed sensor list over one adapter connection
pub struct SensorPoller {
    sensors: Vec<Sensor>,
    config: PollerConfig,
    /// Consecutive rounds without any reading
    empty_rounds: u32,
    rounds: u64,
}

impl SensorPoller {
    /// Resolve the configured keys against `registry`
    pub fn new(config: PollerConfig, registry: &SensorRegistry) -> Result<Self, PollerError> {
        if config.interval_ms == 0 {
            return Err(PollerError::InvalidConfig("interval_ms must be non-zero".into()));
        }
        if config.sensors.is_empty() {
            return Err(PollerError::InvalidConfig("no sensors configured".into()));
        }

        let sensors = config
            .sensors
            .iter()
            .map(|key| {
                registry
                    .get(key)
                    .cloned()
                    .ok_or_else(|| PollerError::UnknownSensor(key.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Sensor poller created with {} sensors", sensors.len());

        Ok(Self {
            sensors,
            config,
            empty_rounds: 0,
            rounds: 0,
        })
    }

    /// Number of sensors polled each round
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Completed rounds
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Query every configured sensor once, in order.
    ///
    /// Per-sensor problems become [`Sample::Unavailable`]; a connection that
    /// is not (or no longer) connected aborts the round.
    pub async fn poll_once<T: Transport>(
        &mut self,
        conn: &mut AdapterConnection<T>,
    ) -> Result<PollSnapshot, PollerError> {
        let mut samples = Vec::with_capacity(self.sensors.len());

        for sensor in &self.sensors {
            match conn.query(sensor).await {
                Ok(reading) => samples.push(Sample::Reading(reading)),
                Err(e) if e.is_io_failure() || matches!(e, ObdError::NotConnected(_)) => {
                    return Err(e.into());
                }
                Err(e) => {
                    debug!("{} unavailable: {}", sensor.key, e);
                    samples.push(Sample::Unavailable {
                        key: sensor.key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let snapshot = PollSnapshot {
            timestamp_ms: now_ms(),
            samples,
        };

        self.rounds += 1;
        if snapshot.reading_count() == 0 {
            self.empty_rounds += 1;
            if self.empty_rounds >= self.config.max_empty_rounds {
                warn!("No sensor readings for {} rounds", self.empty_rounds);
            }
        } else {
            self.empty_rounds = 0;
        }

        Ok(snapshot)
    }

    /// Poll on the configured interval until shutdown.
    ///
    /// Stops cleanly when `shutdown` becomes true (or its sender is dropped)
    /// or when the snapshot receiver goes away; returns an error when the
    /// connection fails.
    pub async fn run<T: Transport>(
        &mut self,
        conn: &mut AdapterConnection<T>,
        snapshot_tx: mpsc::Sender<PollSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PollerError> {
        info!("Starting sensor poller ({} ms interval)", self.config.interval_ms);

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.poll_once(conn).await?;
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                sent = snapshot_tx.send(snapshot) => {
                    if sent.is_err() {
                        debug!("Snapshot receiver dropped, stopping poller");
                        break;
                    }
                }
            }
        }

        info!("Sensor poller stopped after {} rounds", self.rounds);
        Ok(())
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
