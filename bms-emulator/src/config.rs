//! Emulator configuration, loaded from a TOML file with built-in defaults.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// SocketCAN interface the node listens on.
    pub can_interface: String,
    /// CANopen node id this emulator answers for.
    pub node_id: u8,
    /// Device description document defining the object dictionary.
    pub eds_path: String,
    /// Flat JSON document of simulated parameter values.
    pub values_path: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            can_interface: "vcan0".to_string(),
            node_id: 5,
            eds_path: "bms.eds".to_string(),
            values_path: "bms_values.json".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let config: EmulatorConfig = toml::from_str(
            r#"
            can_interface = "can1"
            node_id = 7
            eds_path = "descriptions/bms.eds"
            values_path = "descriptions/bms_values.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.can_interface, "can1");
        assert_eq!(config.node_id, 7);
        assert_eq!(config.eds_path, "descriptions/bms.eds");
        assert_eq!(config.values_path, "descriptions/bms_values.json");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: EmulatorConfig = toml::from_str("node_id = 9\n").unwrap();
        assert_eq!(config.node_id, 9);
        assert_eq!(config.can_interface, "vcan0");
        assert_eq!(config.eds_path, "bms.eds");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = EmulatorConfig::load(Path::new("/nonexistent/bms-emulator.toml")).unwrap();
        assert_eq!(config.node_id, 5);
    }
}
