use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Command-line flags. Only flags actually given are serialized, so an
/// absent flag never overrides the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "relay-server", version, about = "Real-time message relay server")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./relay.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for the message database [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Capacity of the queue between connection sessions and the dispatcher [default: 256]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_queue_capacity: Option<usize>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub inbound_queue_capacity: usize,

    /// Connection health settings (loaded from [keepalive] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<KeepaliveConfig>,
}

/// Timers driving the handshake, the read deadline and the ping probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Sliding read deadline in seconds, renewed by any inbound frame (default: 60)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Seconds a new connection has to send its authentication frame (default: 10)
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Upper bound in seconds for any single write, ping included (default: 10)
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            read_timeout_secs: 60,
            auth_timeout_secs: 10,
            write_timeout_secs: 10,
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    10
}

/// Validated keepalive timers, ready for the session and health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub auth_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(default_ping_interval()),
            read_timeout: Duration::from_secs(default_read_timeout()),
            auth_timeout: Duration::from_secs(default_auth_timeout()),
            write_timeout: Duration::from_secs(default_write_timeout()),
        }
    }
}

impl TryFrom<&KeepaliveConfig> for KeepaliveSettings {
    type Error = ConfigError;

    fn try_from(cfg: &KeepaliveConfig) -> Result<Self, Self::Error> {
        let fields = [
            ("ping_interval_secs", cfg.ping_interval_secs),
            ("read_timeout_secs", cfg.read_timeout_secs),
            ("auth_timeout_secs", cfg.auth_timeout_secs),
            ("write_timeout_secs", cfg.write_timeout_secs),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Zero(*name));
        }

        // The deadline is the failure detector; a ping must land before it fires.
        if cfg.read_timeout_secs <= cfg.ping_interval_secs {
            return Err(ConfigError::DeadlineNotAbovePing {
                read_timeout: cfg.read_timeout_secs,
                ping_interval: cfg.ping_interval_secs,
            });
        }

        Ok(Self {
            ping_interval: Duration::from_secs(cfg.ping_interval_secs),
            read_timeout: Duration::from_secs(cfg.read_timeout_secs),
            auth_timeout: Duration::from_secs(cfg.auth_timeout_secs),
            write_timeout: Duration::from_secs(cfg.write_timeout_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            inbound_queue_capacity: 256,
            keepalive: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);
        Self::from_layers(Toml::file(config_path), &cli)
    }

    /// Merge the layers over the built-in defaults and validate the result.
    pub fn from_layers(file: impl Provider, cli: &Cli) -> Result<Self, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
            .extract()?;

        // Fail at startup rather than on the first connection.
        config.keepalive_settings()?;
        config.queue_capacity()?;
        Ok(config)
    }

    /// Keepalive timers, falling back to defaults when [keepalive] is absent.
    pub fn keepalive_settings(&self) -> Result<KeepaliveSettings, ConfigError> {
        match &self.keepalive {
            Some(cfg) => KeepaliveSettings::try_from(cfg),
            None => KeepaliveSettings::try_from(&KeepaliveConfig::default()),
        }
    }

    pub fn queue_capacity(&self) -> Result<usize, ConfigError> {
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Zero("inbound_queue_capacity"));
        }
        Ok(self.inbound_queue_capacity)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Message Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite message database
# data_dir = "./data"

# Messages buffered between connection readers and the dispatcher.
# A full queue slows readers down instead of growing memory.
# inbound_queue_capacity = 256

# ---- Connection Health ----
# [keepalive]

# Server sends a WebSocket ping this often (seconds)
# ping_interval_secs = 30

# A connection with no inbound frame (pongs included) for this long is closed.
# Must be greater than ping_interval_secs.
# read_timeout_secs = 60

# Time allowed for the {"user_id": ...} authentication frame
# auth_timeout_secs = 10

# Upper bound for a single write or ping
# write_timeout_secs = 10
"#
    .to_string()
}
