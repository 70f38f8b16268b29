use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;

use crate::net::protocol::{DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{section}: port range {start}..={end} is empty")]
    InvalidPortRange {
        section: &'static str,
        start: u16,
        end: u16,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub replication: ReplicationConfig,
}

impl NetConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("server", self.server.port_range_start, self.server.port_range_end)?;
        check_range("client", self.client.port_range_start, self.client.port_range_end)
    }
}

fn check_range(section: &'static str, start: u16, end: u16) -> Result<(), ConfigError> {
    if start > end {
        return Err(ConfigError::InvalidPortRange {
            section,
            start,
            end,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server_port: u16,
    /// Port beacons are sent to when `use_port_range` is off.
    pub client_port: u16,
    pub use_port_range: bool,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub beacon_host: IpAddr,
    pub beacon_interval_ms: u32,
    pub heartbeat_timeout_ms: u32,
    pub compress_payloads: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            use_port_range: false,
            port_range_start: 27020,
            port_range_end: 27030,
            beacon_host: IpAddr::V4(Ipv4Addr::BROADCAST),
            beacon_interval_ms: 100,
            heartbeat_timeout_ms: 5000,
            compress_payloads: true,
        }
    }
}

impl ServerConfig {
    pub fn beacon_ports(&self) -> Vec<u16> {
        if self.use_port_range {
            (self.port_range_start..=self.port_range_end).collect()
        } else {
            vec![self.client_port]
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 0 cycles through the port range until a bind succeeds.
    pub client_port: u16,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub search_timeout_ms: u32,
    pub failed_retry_ms: u32,
    pub heartbeat_interval_frames: u64,
    pub ping_interval_frames: u64,
    pub connection_timeout_ms: u32,
    pub client_time_offset_ms: u32,
    pub viewport_interval_ms: u32,
    pub compress_payloads: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_port: DEFAULT_CLIENT_PORT,
            port_range_start: 27020,
            port_range_end: 27030,
            search_timeout_ms: 15_000,
            failed_retry_ms: 500,
            heartbeat_interval_frames: 15,
            ping_interval_frames: 15,
            connection_timeout_ms: 5000,
            client_time_offset_ms: 100,
            viewport_interval_ms: 16,
            compress_payloads: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub replication_interval_ms: u32,
    pub max_entities: u32,
    pub keyframe_divisor: u32,
    pub viewport_margin: f32,
    pub max_datagrams_per_tick: usize,
    /// Ticks' worth of deferred datagrams kept before the oldest are dropped.
    pub max_deferred_ticks: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_interval_ms: 100,
            max_entities: 500,
            keyframe_divisor: 50,
            viewport_margin: 5.0,
            max_datagrams_per_tick: 16,
            max_deferred_ticks: 4,
        }
    }
}
