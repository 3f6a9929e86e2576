//! Application settings: transport, retry policy, probing, and streaming.
//!
//! Loaded from an optional TOML file with `BENCHLINK_*` environment-variable
//! overrides on top; every table has compiled-in defaults matching the
//! instruments as shipped (LAN port 10733, 115200-baud serial, the stock
//! voltage-read variant family). Nothing in the core reads global state —
//! the settings value is passed in explicitly.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::channel::RetryPolicy;
use crate::protocol::{Command, VariantSet};
use crate::transport::TransportConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub stream: StreamConfig,
    /// Ordered setup sequence sent before probing. Fire-and-forget.
    #[serde(default = "default_init_commands")]
    pub init_commands: Vec<String>,
    /// Best-effort command returning the instrument to front-panel control
    /// at teardown. Empty string disables it.
    #[serde(default = "default_farewell")]
    pub farewell: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    /// Expected comma-separated field count of a well-formed reply.
    #[serde(default = "default_expected_fields")]
    pub expected_fields: usize,
    /// Candidate query spellings, tried in order. Empty means the stock
    /// voltage-read family for the configured channel count.
    #[serde(default)]
    pub variants: Vec<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            expected_fields: default_expected_fields(),
            variants: Vec::new(),
        }
    }
}

impl ProbeSettings {
    pub fn variant_set(&self, channels: usize) -> VariantSet {
        if self.variants.is_empty() {
            VariantSet::voltage_read(channels)
        } else {
            VariantSet::from_queries(self.variants.iter().cloned())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_channels")]
    pub channels: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            unit: default_unit(),
            channels: default_channels(),
        }
    }
}

fn default_expected_fields() -> usize {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_unit() -> String {
    "V".to_string()
}

fn default_channels() -> usize {
    3
}

fn default_init_commands() -> Vec<String> {
    ["*CLS", "MODE,1", "SAVECONFIG", "LOCKOUT"]
        .map(String::from)
        .to_vec()
}

fn default_farewell() -> String {
    "LOCAL".to_string()
}

impl Settings {
    /// Load settings from an optional TOML file plus `BENCHLINK_*`
    /// environment overrides (`BENCHLINK_STREAM__CHANNELS=4`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("BENCHLINK").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// The setup sequence as fire-and-forget commands.
    pub fn init_sequence(&self) -> Vec<Command> {
        self.init_commands
            .iter()
            .map(|text| Command::bare(text.as_str()))
            .collect()
    }

    /// The teardown command, if configured.
    pub fn farewell_command(&self) -> Option<Command> {
        let text = self.farewell.trim();
        (!text.is_empty()).then(|| Command::bare(text))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            probe: ProbeSettings::default(),
            stream: StreamConfig::default(),
            init_commands: default_init_commands(),
            farewell: default_farewell(),
        }
    }
}
