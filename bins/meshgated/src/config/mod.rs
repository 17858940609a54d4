//! The daemon's on-disk configuration: every
//! [`CoreConfig`] tunable plus the operational fields needed to construct
//! the transport, TUN/TAP device, and virtual address pool, none of which
//! the core itself knows how to build.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use mesh_core::{CoreConfig, InnerAddr};

use crate::constants::DEFAULT_CONFIG_FILE_PATH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("error parsing TOML config: {0}")]
    Deserialize(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Tun,
    Tap,
}

fn default_max_clients() -> usize {
    CoreConfig::default().max_clients
}

fn default_tcp_queue_limit() -> usize {
    CoreConfig::default().tcp_queue_limit
}

fn default_mroute_ageable_ttl_secs() -> u64 {
    CoreConfig::default().mroute_ageable_ttl_secs
}

fn default_reap_max_wakeup_secs() -> u64 {
    CoreConfig::default().reap_max_wakeup_secs
}

fn default_reap_divisor() -> usize {
    CoreConfig::default().reap_divisor
}

fn default_reap_min() -> usize {
    CoreConfig::default().reap_min
}

fn default_reap_max() -> usize {
    CoreConfig::default().reap_max
}

fn default_status_file_version() -> u8 {
    CoreConfig::default().status_file_version
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: SocketAddr,
    pub transport: TransportKind,

    pub device: String,
    pub device_kind: DeviceKind,

    pub pool_network: Ipv4Addr,
    pub pool_netmask: Ipv4Addr,

    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_tcp_queue_limit")]
    pub tcp_queue_limit: usize,
    #[serde(default)]
    pub enable_c2c: bool,
    #[serde(default = "default_mroute_ageable_ttl_secs")]
    pub mroute_ageable_ttl_secs: u64,
    #[serde(default = "default_reap_max_wakeup_secs")]
    pub reap_max_wakeup_secs: u64,
    #[serde(default = "default_reap_divisor")]
    pub reap_divisor: usize,
    #[serde(default = "default_reap_min")]
    pub reap_min: usize,
    #[serde(default = "default_reap_max")]
    pub reap_max: usize,

    /// Excluded from learning: the server's own tunnel address, if
    /// it has one, never overwrites a client's learned route for the same
    /// key.
    #[serde(default)]
    pub local_inner_addr: Option<Ipv4Addr>,

    pub status_file: Option<PathBuf>,
    #[serde(default = "default_status_file_version")]
    pub status_file_version: u8,
}

impl Config {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path.into())?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE_PATH)
    }

    /// Projects the operational config down to the exhaustive core surface
    /// the event loop actually consumes.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            max_clients: self.max_clients,
            tcp_queue_limit: self.tcp_queue_limit,
            enable_c2c: self.enable_c2c,
            mroute_ageable_ttl_secs: self.mroute_ageable_ttl_secs,
            reap_max_wakeup_secs: self.reap_max_wakeup_secs,
            reap_divisor: self.reap_divisor,
            reap_min: self.reap_min,
            reap_max: self.reap_max,
            status_file_version: self.status_file_version,
            local_inner_addr: self.local_inner_addr.map(InnerAddr::ipv4),
        }
    }
}
