//! Per-peer connection state. One connection per peer id; created on
//! login, destroyed on closing or keepalive starvation.

use std::collections::HashSet;
use std::net::SocketAddr;

use serde_json::Value as Json;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    WaitingAuth,
    WaitingConfig,
    Running,
}

#[derive(Clone, Debug)]
pub struct PeerConnection {
    pub peer_id: u32,
    pub address: SocketAddr,
    pub salt: u32,
    pub state: ConnectionState,
    pub config: Option<Json>,
    /// Monotonic seconds of the last keepalive (or auth activity).
    pub last_ping: u64,
    pub pings_received: u64,
    pub connected: bool,
    /// Talkgroups this peer reported affiliations for.
    pub affiliations: HashSet<u32>,
}

impl PeerConnection {
    pub fn new(peer_id: u32, address: SocketAddr, salt: u32, now: u64) -> Self {
        Self {
            peer_id,
            address,
            salt,
            state: ConnectionState::WaitingAuth,
            config: None,
            last_ping: now,
            pings_received: 0,
            connected: false,
            affiliations: HashSet::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.connected && self.state == ConnectionState::Running
    }

    /// Whether this datagram source matches the address the peer logged in
    /// from.
    pub fn address_matches(&self, addr: &SocketAddr) -> bool {
        self.address.ip() == addr.ip()
    }

    pub fn stale(&self, now: u64, timeout_secs: u64) -> bool {
        self.last_ping + timeout_secs < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.0.2.1:62031".parse().unwrap()
    }

    #[test]
    fn lifecycle_flags() {
        let mut conn = PeerConnection::new(0x00C0FFEE, addr(), 0x1234, 100);
        assert!(!conn.is_running());

        conn.state = ConnectionState::Running;
        assert!(!conn.is_running(), "running requires the connected flag");

        conn.connected = true;
        assert!(conn.is_running());
    }

    #[test]
    fn staleness() {
        let conn = PeerConnection::new(1, addr(), 1, 100);
        assert!(!conn.stale(125, 25));
        assert!(conn.stale(126, 25));
    }

    #[test]
    fn address_check_ignores_port() {
        let conn = PeerConnection::new(1, addr(), 1, 0);
        let same_ip: SocketAddr = "192.0.2.1:55555".parse().unwrap();
        let other: SocketAddr = "192.0.2.2:62031".parse().unwrap();
        assert!(conn.address_matches(&same_ip));
        assert!(!conn.address_matches(&other));
    }
}
