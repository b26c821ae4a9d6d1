//! Configuration file support for nfcloader.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (NFCLOADER_*)
//! 3. Local config file (./nfcloader.toml)
//! 4. Global config file (~/.config/nfcloader/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use nfcloader::SessionConfig;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "nfcloader.toml";

/// Tag reader configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderConfig {
    /// Preferred driver (`nfc` or `smartcard`).
    pub driver: Option<String>,
    /// Reader name fragment (PC/SC reader name or serial port).
    pub name: Option<String>,
}

/// Session timing overrides, in milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferConfig {
    /// Delay between two reads of the tag.
    pub poll_interval_ms: Option<u64>,
    /// Time allowed for the version handshake.
    pub handshake_timeout_ms: Option<u64>,
    /// Time allowed for the answer to each chunk.
    pub response_timeout_ms: Option<u64>,
}

impl ReaderConfig {
    fn overlay(&mut self, other: Self) {
        self.driver = other
            .driver
            .or(self.driver.take());
        self.name = other
            .name
            .or(self.name.take());
    }
}

impl TransferConfig {
    /// Session timing with the configured overrides applied.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        let pick = |ms: Option<u64>, default: Duration| ms.map_or(default, Duration::from_millis);

        SessionConfig {
            poll_interval: pick(self.poll_interval_ms, defaults.poll_interval),
            handshake_timeout: pick(self.handshake_timeout_ms, defaults.handshake_timeout),
            response_timeout: pick(self.response_timeout_ms, defaults.response_timeout),
        }
    }

    fn overlay(&mut self, other: Self) {
        self.poll_interval_ms = other
            .poll_interval_ms
            .or(self.poll_interval_ms);
        self.handshake_timeout_ms = other
            .handshake_timeout_ms
            .or(self.handshake_timeout_ms);
        self.response_timeout_ms = other
            .response_timeout_ms
            .or(self.response_timeout_ms);
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Reader configuration.
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load the global file, then the local one on top of it.
    pub fn load() -> Self {
        let sources = Self::global_config_path()
            .into_iter()
            .chain(std::iter::once(PathBuf::from(LOCAL_CONFIG_FILE)));

        sources
            .filter_map(|path| {
                let config = Self::load_from_file(&path)?;
                debug!("Loaded config from {}", path.display());
                Some(config)
            })
            .fold(Self::default(), |mut config, layer| {
                config.merge(layer);
                config
            })
    }

    /// Load only the file given with `--config`.
    pub fn load_from_path(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_else(|| {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        })
    }

    /// Read and parse one file. Missing files are skipped silently.
    fn load_from_file(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                return None;
            },
        };

        toml::from_str(&content)
            .map_err(|e| warn!("Failed to parse config file {}: {e}", path.display()))
            .ok()
    }

    /// Path of the per-user configuration file.
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "nfcloader").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply every value set in `other` on top of this configuration.
    fn merge(&mut self, other: Self) {
        self.reader
            .overlay(other.reader);
        self.transfer
            .overlay(other.transfer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.reader.driver.is_none());
        assert!(config.reader.name.is_none());
        assert_eq!(config.transfer.session_config(), SessionConfig::default());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_reader() {
        let mut base = Config::default();
        base.reader.driver = Some("nfc".to_string());

        let mut other = Config::default();
        other.reader.driver = Some("smartcard".to_string());
        other.reader.name = Some("ACR122".to_string());

        base.merge(other);

        assert_eq!(base.reader.driver.as_deref(), Some("smartcard"));
        assert_eq!(base.reader.name.as_deref(), Some("ACR122"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.reader.name = Some("/dev/ttyUSB0".to_string());
        base.transfer.response_timeout_ms = Some(2000);

        base.merge(Config::default());

        assert_eq!(base.reader.name.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.transfer.response_timeout_ms, Some(2000));
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[reader]
driver = "smartcard"
name = "uTrust"

[transfer]
poll_interval_ms = 50
response_timeout_ms = 3000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reader.driver.as_deref(), Some("smartcard"));
        assert_eq!(config.reader.name.as_deref(), Some("uTrust"));

        let session = config.transfer.session_config();
        assert_eq!(session.poll_interval, Duration::from_millis(50));
        assert_eq!(session.handshake_timeout, Duration::from_secs(1));
        assert_eq!(session.response_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.reader.driver.is_none());
        assert!(config.transfer.poll_interval_ms.is_none());
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[reader]
name = "/dev/ttyUSB1"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.reader.name.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[reader\nname = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.reader.name.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.reader.driver.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("nfcloader"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
