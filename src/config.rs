//! Listener configuration file
//!
//! All sections and keys are optional; anything missing falls back to the
//! built-in defaults (`/dev/ttyACM0`, 9600 baud, 2000 ms open timeout).

use crate::serial::port::{
    PortConfig, DEFAULT_BAUD_RATE, DEFAULT_OPEN_TIMEOUT, DEFAULT_PORT_PATH,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub port: PortSection,
    pub decoder: DecoderSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortSection {
    pub path: String,
    pub baud_rate: u32,
    pub open_timeout_ms: u64,
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            path: DEFAULT_PORT_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderSection {
    /// Longest line accepted, in bytes; unbounded when absent
    pub max_line_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub timestamps: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self { timestamps: true }
    }
}

impl ListenerConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate TOML configuration content
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.path.trim().is_empty() {
            bail!("port.path must not be empty");
        }
        if self.port.baud_rate == 0 {
            bail!("port.baud_rate must be greater than zero");
        }
        if self.decoder.max_line_length == Some(0) {
            bail!("decoder.max_line_length must be greater than zero");
        }
        Ok(())
    }

    /// Port settings for `SerialConnection::open`
    pub fn port_config(&self) -> PortConfig {
        PortConfig::new(&self.port.path)
            .with_baud_rate(self.port.baud_rate)
            .with_open_timeout(Duration::from_millis(self.port.open_timeout_ms))
    }

    /// Render as TOML, as printed by the `config` subcommand
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ListenerConfig::parse("").unwrap();
        assert_eq!(config, ListenerConfig::default());

        let port = config.port_config();
        assert_eq!(port.port_path, "/dev/ttyACM0");
        assert_eq!(port.baud_rate, 9600);
        assert_eq!(port.open_timeout, Duration::from_millis(2000));
        assert!(config.output.timestamps);
        assert_eq!(config.decoder.max_line_length, None);
    }

    #[test]
    fn test_partial_config() {
        let content = r#"
[port]
path = "/dev/ttyUSB0"

[decoder]
max_line_length = 4096
"#;
        let config = ListenerConfig::parse(content).unwrap();

        assert_eq!(config.port.path, "/dev/ttyUSB0");
        assert_eq!(config.port.baud_rate, 9600);
        assert_eq!(config.decoder.max_line_length, Some(4096));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ListenerConfig::parse("[port]\nbaud_rate = 0\n").is_err());
        assert!(ListenerConfig::parse("[port]\npath = \"\"\n").is_err());
        assert!(ListenerConfig::parse("[decoder]\nmax_line_length = 0\n").is_err());
        assert!(ListenerConfig::parse("[port]\nparity = \"odd\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listener.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[port]\npath = \"COM3\"\nbaud_rate = 115200\nopen_timeout_ms = 500").unwrap();
        writeln!(file, "[output]\ntimestamps = false").unwrap();

        let config = ListenerConfig::load(&path).unwrap();
        let port = config.port_config();

        assert_eq!(port.port_path, "COM3");
        assert_eq!(port.baud_rate, 115200);
        assert_eq!(port.open_timeout, Duration::from_millis(500));
        assert!(!config.output.timestamps);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = ListenerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = ListenerConfig::default();
        config.decoder.max_line_length = Some(512);

        let rendered = config.to_toml().unwrap();
        assert_eq!(ListenerConfig::parse(&rendered).unwrap(), config);
    }
}
