//! The core-facing configuration surface: the exhaustive set of
//! tunables [`crate::eventloop::MultiContext`] consumes. The binary's TOML
//! file carries additional operational fields (transport kind, listen
//! address, pool CIDR, TUN parameters) needed to *construct* a transport,
//! TUN device, and pool — none of that construction is the core's concern,
//! only the resulting values are.

use std::time::Duration;

use crate::addr::InnerAddr;
use crate::constants::{
    DEFAULT_MROUTE_AGEABLE_TTL_SECS, DEFAULT_TCP_QUEUE_LIMIT, REAP_DIVISOR, REAP_MAX,
    REAP_MAX_WAKEUP_SECS, REAP_MIN,
};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub max_clients: usize,
    pub tcp_queue_limit: usize,
    pub enable_c2c: bool,
    pub mroute_ageable_ttl_secs: u64,
    pub reap_max_wakeup_secs: u64,
    pub reap_divisor: usize,
    pub reap_min: usize,
    pub reap_max: usize,
    pub status_file_version: u8,
    /// Excluded from learning: never installed as a learned route
    /// even if it shows up as a packet's inner source.
    pub local_inner_addr: Option<InnerAddr>,
}

impl CoreConfig {
    pub fn ageable_ttl(&self) -> Duration {
        Duration::from_secs(self.mroute_ageable_ttl_secs)
    }

    pub fn reap_max_wakeup(&self) -> Duration {
        Duration::from_secs(self.reap_max_wakeup_secs)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_clients: 1024,
            tcp_queue_limit: DEFAULT_TCP_QUEUE_LIMIT,
            enable_c2c: false,
            mroute_ageable_ttl_secs: DEFAULT_MROUTE_AGEABLE_TTL_SECS,
            reap_max_wakeup_secs: REAP_MAX_WAKEUP_SECS,
            reap_divisor: REAP_DIVISOR,
            reap_min: REAP_MIN,
            reap_max: REAP_MAX,
            status_file_version: 2,
            local_inner_addr: None,
        }
    }
}
