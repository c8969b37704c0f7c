//! Configuration module
//!
//! Handles loading and saving atemctl configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Switcher connection settings
    #[serde(default)]
    pub switcher: SwitcherConfig,

    /// How long the CLI waits on the session
    #[serde(default)]
    pub session: SessionConfig,

    /// Demo sequence settings
    #[serde(default)]
    pub demo: DemoConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

/// Switcher connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitcherConfig {
    /// Switcher hostname or IP address
    #[serde(default = "default_address")]
    pub address: String,
    /// Control port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Local address to bind (default: ephemeral)
    pub bind_address: Option<String>,
    /// Depth of the session input queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_address() -> String {
    "192.168.10.240".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_queue_depth() -> usize {
    64
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            bind_address: None,
            queue_depth: default_queue_depth(),
        }
    }
}

/// CLI wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait for the switcher to become ready (ms)
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
    /// How long to wait for a command to be confirmed (ms)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_ready_timeout() -> u64 {
    5000
}

fn default_command_timeout() -> u64 {
    2000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

/// Demo sequence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Pause after hello before the first command (ms)
    #[serde(default = "default_hello_settle")]
    pub hello_settle_ms: u64,
    /// Pause after preview and cut (ms)
    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,
    /// Pause after auto and before disconnecting (ms)
    #[serde(default = "default_finish_delay")]
    pub finish_delay_ms: u64,
    /// Input put on preview
    #[serde(default = "default_preview_input")]
    pub preview_input: u8,
}

fn default_hello_settle() -> u64 {
    2000
}

fn default_step_delay() -> u64 {
    1000
}

fn default_finish_delay() -> u64 {
    2000
}

fn default_preview_input() -> u8 {
    3
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            hello_settle_ms: default_hello_settle(),
            step_delay_ms: default_step_delay(),
            finish_delay_ms: default_finish_delay(),
            preview_input: default_preview_input(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("atemctl/config.toml")),
            Some(PathBuf::from("./atemctl.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Network settings for a connection on `port`
    pub fn network_config(&self, port: u16) -> NetworkConfig {
        let config = NetworkConfig::new(port).with_queue_depth(self.switcher.queue_depth);
        match &self.switcher.bind_address {
            Some(addr) => config.with_bind_address(addr.clone()),
            None => config,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        switcher: SwitcherConfig {
            address: "172.20.10.205".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
