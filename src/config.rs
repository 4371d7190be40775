//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub host: String,
    pub ports: Vec<u16>,
    /// Bytes requested per socket read
    #[serde(default = "default_read_size")]
    pub read_size: usize,
    /// Seconds to wait before acknowledging each read
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub shutdown: ShutdownMode,
}

fn default_read_size() -> usize {
    1024
}

/// What closing a listener does with connections that are still open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Stop accepting and leave open connections running until the peer leaves
    #[default]
    Detach,
    /// Stop accepting and wait for every open connection to end
    Drain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(rename = "type")]
    pub kind: SinkKind,
    #[serde(default)]
    pub table: Option<TableConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[serde(alias = "stdout")]
    Line,
    #[serde(alias = "csv")]
    Table,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub filename: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ListenerConfig {
    pub fn delay(&self) -> Option<Duration> {
        self.delay.map(Duration::from_secs_f64)
    }

    /// Configured ports with duplicates removed, first occurrence kept
    pub fn unique_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::with_capacity(self.ports.len());
        for &port in &self.ports {
            if ports.contains(&port) {
                warn!("Port {} is listed more than once, ignoring duplicate", port);
            } else {
                ports.push(port);
            }
        }
        ports
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("BLACKHOLE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&config_path))
            .add_source(
                config::Environment::with_prefix("BLACKHOLE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("listener.ports")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let listener = &self.listener;
        if listener.host.is_empty() {
            anyhow::bail!("Listener host cannot be empty");
        }
        if listener.ports.is_empty() {
            anyhow::bail!("At least one port must be configured");
        }
        if listener.ports.contains(&0) {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if listener.read_size == 0 {
            anyhow::bail!("Invalid read_size: must be greater than 0");
        }
        if let Some(delay) = listener.delay {
            if !delay.is_finite() || delay < 0.0 {
                anyhow::bail!("Invalid delay {}: must be a non-negative number of seconds", delay);
            }
        }

        if self.collector.kind == SinkKind::Table {
            match &self.collector.table {
                Some(table) if !table.filename.is_empty() => {}
                _ => anyhow::bail!("Table collector requires [collector.table] filename"),
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }
}
