//! Ring client configuration, stored as JSON in COLMI_HOME

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use colmi_proto::RealtimeKind;
use colmi_proto::ble::DEVICE_NAME_PREFIXES;

use crate::Result;

const CONFIG_FILE: &str = "config.json";

/// Get COLMI_HOME directory (default `~/.colmi`), creating it if needed
pub fn colmi_home() -> Result<PathBuf> {
    let home = match std::env::var("COLMI_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"))?
            .join(".colmi"),
    };

    if !home.exists() {
        fs::create_dir_all(&home)?;
    }

    Ok(home)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// How long to scan for a ring before giving up
    pub scan_secs: u64,
    pub command_timeout_ms: u64,
    pub big_data_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    /// Advertised name prefixes treated as compatible rings
    pub name_prefixes: Vec<String>,
    /// Preferred ring, matched against name or address
    pub device: Option<String>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            scan_secs: 10,
            command_timeout_ms: 2000,
            big_data_timeout_ms: 10_000,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 1000,
            name_prefixes: DEVICE_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            device: None,
        }
    }
}

impl RingConfig {
    /// Load `config.json` from `dir`, writing the defaults there when it does not exist
    ///
    /// A file that fails to parse is reported and replaced by defaults in memory only.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);

        if path.exists() {
            let data = fs::read_to_string(&path)?;
            match serde_json::from_str(&data) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!("ignoring {}: {e}", path.display());
                    Ok(Self::default())
                }
            }
        } else {
            let config = Self::default();
            config.save(dir)?;
            info!("created {}", path.display());
            Ok(config)
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(CONFIG_FILE), data)?;
        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn big_data_timeout(&self) -> Duration {
        Duration::from_millis(self.big_data_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Longest gap without a reading before a real-time keepalive is sent
    pub fn keepalive(&self, kind: RealtimeKind) -> Duration {
        match kind {
            RealtimeKind::HeartRate => Duration::from_secs(2),
            RealtimeKind::SpO2 => Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("colmi-config-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn creates_defaults_on_first_load() {
        let dir = temp_dir("create");
        let config = RingConfig::load_or_create(&dir).unwrap();
        assert_eq!(config, RingConfig::default());
        assert!(dir.join(CONFIG_FILE).exists());
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert!(config.name_prefixes.iter().any(|p| p == "R02"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = temp_dir("partial");
        fs::write(dir.join(CONFIG_FILE), r#"{"scan_secs": 3, "device": "R02_AC04"}"#).unwrap();
        let config = RingConfig::load_or_create(&dir).unwrap();
        assert_eq!(config.scan_secs, 3);
        assert_eq!(config.device.as_deref(), Some("R02_AC04"));
        assert_eq!(config.reconnect_attempts, 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = temp_dir("broken");
        fs::write(dir.join(CONFIG_FILE), "{ not json").unwrap();
        assert_eq!(RingConfig::load_or_create(&dir).unwrap(), RingConfig::default());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_then_load() {
        let dir = temp_dir("save");
        let config = RingConfig { reconnect_attempts: 7, ..Default::default() };
        config.save(&dir).unwrap();
        assert_eq!(RingConfig::load_or_create(&dir).unwrap(), config);
        fs::remove_dir_all(&dir).unwrap();
    }
}
