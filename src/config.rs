// Configuration management for the gateway-discovery binary
// Supports CLI arguments, config file (TOML), and environment variables

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use gateway_discovery::{DEFAULT_INTERFACE_CAPACITY, DiscoveryOptions, RetryPolicy};

/// Discover the default gateway, its adapter and its MAC address
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gateway-discovery")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Overall ARP deadline in milliseconds
    #[arg(long, env = "GWD_ARP_TIMEOUT_MS")]
    pub arp_timeout_ms: Option<u64>,

    /// Per-call socket send/receive timeout in milliseconds
    #[arg(long, env = "GWD_SOCKET_TIMEOUT_MS")]
    pub socket_timeout_ms: Option<u64>,

    /// Maximum number of ARP requests to send
    #[arg(long, env = "GWD_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Number of interfaces requested from the kernel
    #[arg(long, env = "GWD_INTERFACE_CAPACITY")]
    pub interface_capacity: Option<usize>,

    /// Print the result as JSON
    #[arg(long, env = "GWD_JSON")]
    pub json: bool,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(short, long, env = "GWD_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, env = "GWD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Configuration file structure (TOML format)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// ARP exchange settings
    #[serde(default)]
    pub arp: ArpConfig,

    /// Interface enumeration settings
    #[serde(default)]
    pub interfaces: InterfacesConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpConfig {
    /// Overall deadline in milliseconds
    #[serde(default = "default_arp_timeout")]
    pub timeout_ms: u64,

    /// Per-call socket timeout in milliseconds
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_ms: u64,

    /// Cap on requests sent (unlimited when absent)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfacesConfig {
    #[serde(default = "default_interface_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_arp_timeout() -> u64 {
    1000
}
fn default_socket_timeout() -> u64 {
    100
}
fn default_interface_capacity() -> usize {
    DEFAULT_INTERFACE_CAPACITY
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ArpConfig {
    fn default() -> Self {
        ArpConfig {
            timeout_ms: default_arp_timeout(),
            socket_timeout_ms: default_socket_timeout(),
            max_attempts: None,
        }
    }
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        InterfacesConfig {
            capacity: default_interface_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

/// Merged configuration from all sources
#[derive(Debug, Clone)]
pub struct Config {
    pub options: DiscoveryOptions,
    pub json: bool,
    pub log_level: Level,
}

impl Config {
    /// Load configuration from all sources (CLI args, config file, defaults)
    /// Priority: CLI args > Config file > Defaults
    pub fn load() -> anyhow::Result<Self> {
        let cli_args = CliArgs::parse();

        let config_file = match &cli_args.config {
            Some(path) => Some(read_config_file(path)?),
            None => {
                let default_path = PathBuf::from("gateway-discovery.toml");
                if default_path.exists() {
                    Some(read_config_file(&default_path)?)
                } else {
                    None
                }
            }
        };

        Self::merge(cli_args, config_file.unwrap_or_default())
    }

    /// Merge CLI arguments over a parsed config file
    pub fn merge(cli_args: CliArgs, config_file: ConfigFile) -> anyhow::Result<Self> {
        let arp = config_file.arp;

        let retry = RetryPolicy {
            deadline: Duration::from_millis(cli_args.arp_timeout_ms.unwrap_or(arp.timeout_ms)),
            socket_timeout: Duration::from_millis(
                cli_args.socket_timeout_ms.unwrap_or(arp.socket_timeout_ms),
            ),
            max_attempts: cli_args.max_attempts.or(arp.max_attempts),
        };

        if retry.socket_timeout.is_zero() {
            // A zero SO_RCVTIMEO means block forever
            return Err(anyhow::anyhow!("Socket timeout must be greater than zero"));
        }

        let interface_capacity = cli_args
            .interface_capacity
            .unwrap_or(config_file.interfaces.capacity);
        if interface_capacity == 0 {
            return Err(anyhow::anyhow!("Interface capacity must be greater than zero"));
        }

        let level = cli_args.log_level.unwrap_or(config_file.logging.level);
        let log_level = parse_log_level(&level)?;

        Ok(Config {
            options: DiscoveryOptions {
                retry,
                interface_capacity,
                ..Default::default()
            },
            json: cli_args.json || config_file.output.json,
            log_level,
        })
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    tracing::info!("Loading configuration from: {}", path.display());
    let config_content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<ConfigFile>(&config_content)?)
}

fn parse_log_level(level_str: &str) -> anyhow::Result<Level> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(anyhow::anyhow!("Invalid log level: {}", level_str)),
    }
}
