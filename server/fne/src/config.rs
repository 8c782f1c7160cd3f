//! Fabric configuration, deserialized from the host configuration file.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FneConfig {
    /// Authentication password shared with every peer.
    pub password: String,
    /// Keepalive interval in seconds.
    #[serde(default = "default_ping_time")]
    pub ping_time: u64,
    /// Missed keepalives before a peer is evicted.
    #[serde(default = "default_max_missed_pings")]
    pub max_missed_pings: u64,
    #[serde(default = "default_true")]
    pub dmr_enabled: bool,
    #[serde(default = "default_true")]
    pub p25_enabled: bool,
    #[serde(default = "default_true")]
    pub nxdn_enabled: bool,
    /// Accept activity log transfers from peers.
    #[serde(default)]
    pub allow_activity_transfer: bool,
    /// Accept diagnostic log transfers from peers.
    #[serde(default)]
    pub allow_diagnostic_transfer: bool,
}

fn default_ping_time() -> u64 {
    5
}

fn default_max_missed_pings() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for FneConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            ping_time: default_ping_time(),
            max_missed_pings: default_max_missed_pings(),
            dmr_enabled: true,
            p25_enabled: true,
            nxdn_enabled: true,
            allow_activity_transfer: false,
            allow_diagnostic_transfer: false,
        }
    }
}

impl FneConfig {
    /// Seconds of ping silence before eviction.
    pub fn peer_timeout_secs(&self) -> u64 {
        self.ping_time * self.max_missed_pings
    }
}
