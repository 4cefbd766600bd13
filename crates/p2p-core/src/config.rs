//! Process-wide configuration.
//!
//! Resolution order: defaults → config file → environment variables.
//!
//! Config file location:
//!   1. $P2P_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/p2p-node/config.toml
//!   3. ~/.config/p2p-node/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub download: DownloadConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name this peer registers and sends in Hello/HelloReply.
    pub peer_name: String,
    /// Path to the PEM-wrapped ECDSA P-256 signing key. Generated on first run.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local UDP bind address.
    pub bind_addr: String,
    /// Local UDP bind port. 0 = OS-assigned.
    pub bind_port: u16,
    /// Base URL of the directory server, e.g. "https://directory.example/".
    pub directory_url: String,
    /// UDP `host:port` of the directory server, pinged once per maintenance
    /// tick to keep its view of this peer's NAT mapping alive. Empty if the
    /// directory server doesn't participate in the UDP protocol.
    pub directory_udp_addr: String,
    /// Whether this peer advertises and accepts the Encryption extension bit.
    pub encryption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Bounded-concurrency gate capacity for in-flight DatumRequests, 24-32.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between maintenance sweeps, 30-60.
    pub tick_secs: u64,
    /// Seconds of silence before a keep-alive Ping is sent, default 180.
    pub keepalive_after_secs: u64,
    /// Seconds of silence before a session is removed, default 300.
    pub expire_after_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            download: DownloadConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            peer_name: String::new(),
            key_path: config_dir().join("identity.pem"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 9000,
            directory_url: String::new(),
            directory_udp_addr: String::new(),
            encryption: false,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig { concurrency: 32 }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        MaintenanceConfig {
            tick_secs: 45,
            keepalive_after_secs: 180,
            expire_after_secs: 300,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("p2p-node")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load config: defaults → file (if present) → env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NodeConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("P2P_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write the default config to disk if no file exists yet. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NodeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("P2P_IDENTITY__PEER_NAME") {
            self.identity.peer_name = v;
        }
        if let Ok(v) = std::env::var("P2P_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("P2P_NETWORK__BIND_PORT") {
            if let Ok(p) = v.parse() {
                self.network.bind_port = p;
            }
        }
        if let Ok(v) = std::env::var("P2P_NETWORK__DIRECTORY_URL") {
            self.network.directory_url = v;
        }
        if let Ok(v) = std::env::var("P2P_NETWORK__DIRECTORY_UDP_ADDR") {
            self.network.directory_udp_addr = v;
        }
        if let Ok(v) = std::env::var("P2P_NETWORK__ENCRYPTION") {
            self.network.encryption = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("P2P_DOWNLOAD__CONCURRENCY") {
            if let Ok(c) = v.parse() {
                self.download.concurrency = c;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_network_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.network.bind_port, 9000);
        assert!(!config.network.encryption);
    }

    #[test]
    fn default_download_concurrency_is_within_spec_range() {
        let config = NodeConfig::default();
        assert!((24..=32).contains(&config.download.concurrency));
    }

    #[test]
    fn default_maintenance_thresholds_match_keepalive_and_expiry_windows() {
        let config = NodeConfig::default();
        assert_eq!(config.maintenance.keepalive_after_secs, 180);
        assert_eq!(config.maintenance.expire_after_secs, 300);
        assert!((30..=60).contains(&config.maintenance.tick_secs));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp =
            std::env::temp_dir().join(format!("p2p-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("P2P_CONFIG", config_path.to_str().unwrap());
        }

        let path = NodeConfig::write_default_if_missing().expect("write should succeed");
        assert!(path.exists());

        let config = NodeConfig::load().expect("load should succeed");
        assert_eq!(config.network.bind_port, 9000);

        unsafe {
            std::env::remove_var("P2P_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
