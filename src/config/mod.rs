//! # Configuration Management Module
//!
//! TOML-backed configuration for the hub, organized in sections:
//!
//! - [`CulConfig`] - serial device settings for the CUL stick
//! - [`HubConfig`] - our radio address, pairing window, known devices
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [cul]
//! port = "/dev/ttyUSB0"
//! baud_rate = 38400
//!
//! [hub]
//! address = "0x123456"
//! pairing_timeout_secs = 30
//! paired_devices = ["0x0E016C"]
//!
//! [logging]
//! level = "info"
//! file = "culmax.log"
//! ```
//!
//! Device addresses are 24-bit; they may be written as `0x`-prefixed hex or
//! plain decimal.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Our address on the radio, unless configured otherwise. The value is the
/// one the FHEM CUL_MAX module recommends for a software cube.
pub const DEFAULT_HUB_ADDRESS: u32 = 0x123456;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cul: CulConfig,
    #[serde(default)]
    pub hub: HubConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CulConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Our 24-bit radio address, `0x`-prefixed hex or decimal.
    pub address: String,
    /// Default duration of the pairing window in seconds.
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_secs: u64,
    /// Devices paired in earlier runs; their broadcasts pass the filter
    /// without a fresh pairing handshake.
    #[serde(default)]
    pub paired_devices: Vec<String>,
}

fn default_pairing_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cul: CulConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 38400,
            },
            hub: HubConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("culmax.log".to_string()),
            },
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            address: format!("0x{:06X}", DEFAULT_HUB_ADDRESS),
            pairing_timeout_secs: default_pairing_timeout(),
            paired_devices: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Our radio address as a 24-bit id.
    pub fn address(&self) -> Result<u32> {
        parse_device_id(&self.address)
    }

    /// The seeded paired-device list as parsed ids.
    pub fn parsed_paired_devices(&self) -> Result<Vec<u32>> {
        self.paired_devices
            .iter()
            .map(|s| parse_device_id(s))
            .collect()
    }
}

/// Parse a device id written as `0x`-prefixed hex or plain decimal.
pub fn parse_device_id(value: &str) -> Result<u32> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    let id = parsed.map_err(|_| anyhow!("'{}' is not a valid device id", value))?;
    if id > 0xFF_FFFF {
        return Err(anyhow!(
            "device id 0x{:X} exceeds the 24-bit address space",
            id
        ));
    }
    Ok(id)
}
