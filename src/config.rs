use std::time::Duration;

use anyhow::Context;
use tracing::trace;

/// Environment variable overriding the relay buffer capacity
const BUFFER_CAPACITY_ENV: &str = "ALERTER_BUFFER_CAPACITY";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Display name used in logs (defaults to "<source> alerter")
    pub name: Option<String>,

    /// Monitored source whose classification rule is used
    #[serde(default = "default_source")]
    pub source: String,

    /// Topic exchange carrying both inbound results and outbound alerts
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Inbound queue name (defaults to "<source>_alerter_queue")
    pub queue: Option<String>,

    /// Maximum number of alerts waiting for delivery
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Delay before reconnecting after a connection error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            source: default_source(),
            exchange: default_exchange(),
            queue: None,
            buffer_capacity: default_buffer_capacity(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_source() -> String {
    "github".to_string()
}

fn default_exchange() -> String {
    "alert".to_string()
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Config {
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} alerter", self.source))
    }

    pub fn queue(&self) -> String {
        self.queue
            .clone()
            .unwrap_or_else(|| format!("{}_alerter_queue", self.source))
    }

    pub fn inbound_routing_key(&self) -> String {
        format!("alerter.{}", self.source)
    }

    pub fn outbound_routing_key(&self) -> String {
        format!("alert_router.{}", self.source)
    }

    /// Prefetch is a fifth of the buffer capacity, so a burst of inbound
    /// messages cannot outgrow the buffer by much.
    pub fn prefetch_count(&self) -> u16 {
        let prefetch = (self.buffer_capacity as f64 / 5.0).round();
        prefetch.clamp(1.0, u16::MAX as f64) as u16
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Apply overrides from the environment
    pub fn with_env_overrides(mut self) -> anyhow::Result<Self> {
        if let Ok(capacity) = std::env::var(BUFFER_CAPACITY_ENV) {
            self.buffer_capacity = capacity
                .parse()
                .with_context(|| format!("{BUFFER_CAPACITY_ENV} is not a number: {capacity}"))?;
        }
        Ok(self)
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        if self.buffer_capacity == 0 {
            anyhow::bail!("buffer_capacity must be at least 1");
        }
        if self.source.is_empty() {
            anyhow::bail!("source must not be empty");
        }
        Ok(self)
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str::<Config>(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?
        .with_env_overrides()?
        .validate()
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path}"))?;
    parse_config(&file_content)
}
