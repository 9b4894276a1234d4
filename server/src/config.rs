//! Server configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! whatever was passed on the command line.

use std::net::SocketAddrV4;
use std::path::Path;

use serde::{Deserialize, Serialize};
use shared::room::RoomConfig;
use shared::transport::TransportConfig;
use shared::version::{VersionInfo, DEFAULT_VERSION};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connected clients before new ones are turned away or redirected.
    pub max_clients: usize,
    /// Open rooms before HostGame is refused.
    pub max_rooms: usize,
    /// Oldest client build still accepted.
    pub min_client_version: VersionInfo,
    /// Node that clients are sent to once this one is full.
    pub redirect: Option<SocketAddrV4>,
    /// Address advertised in game listings.
    pub public_ip: std::net::Ipv4Addr,
    /// Listings returned per GetGameList request.
    pub max_listings: usize,
    pub room: RoomConfig,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22023,
            max_clients: 256,
            max_rooms: 64,
            min_client_version: DEFAULT_VERSION,
            redirect: None,
            public_ip: std::net::Ipv4Addr::LOCALHOST,
            max_listings: 10,
            room: RoomConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::room::Authority;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:22023");
        assert_eq!(config.room.task_sanity_cap, 1000);
        assert_eq!(config.transport.max_attempts, 8);
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml(
            r#"
            port = 22000
            min_client_version = "2020.9.1"
            redirect = "10.0.0.2:22023"

            [room]
            authority = "server"
            tick_rate = 20

            [transport]
            resend_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 22000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.min_client_version, VersionInfo::new(2020, 9, 1, 0));
        assert_eq!(config.redirect, Some("10.0.0.2:22023".parse().unwrap()));
        assert_eq!(config.room.authority, Authority::Server);
        assert_eq!(config.room.tick_rate, Some(20));
        assert_approx_eq!(config.room.tick_interval().unwrap().as_secs_f64(), 0.05, 1e-9);
        assert_eq!(config.room.task_sanity_cap, 1000);
        assert_eq!(config.transport.resend_interval_ms, 500);
        assert_eq!(config.transport.max_attempts, 8);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            ServerConfig::from_toml("port = \"nope\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
