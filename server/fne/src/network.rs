//! The fabric UDP server: login/auth/config handshake, keepalive
//! maintenance and tagged-opcode dispatch into the per-protocol routers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dv_core::wire;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::udp::Socket;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::FneConfig;
use crate::peer::{ConnectionState, PeerConnection};
use crate::tags::{dmr, nxdn, p25, RouteContext};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct FneNetwork {
    config: FneConfig,
    socket: Arc<Socket>,
    peers: Arc<DashMap<u32, PeerConnection>>,
    rid: Arc<RadioIdLookup>,
    tg: Arc<TalkgroupRulesLookup>,

    tag_dmr: dmr::TagDmrData,
    tag_p25: p25::TagP25Data,
    tag_nxdn: nxdn::TagNxdnData,
}

impl FneNetwork {
    pub fn new(
        config: FneConfig,
        socket: Arc<Socket>,
        rid: Arc<RadioIdLookup>,
        tg: Arc<TalkgroupRulesLookup>,
    ) -> Self {
        Self {
            config,
            socket,
            peers: Arc::new(DashMap::new()),
            rid,
            tg,
            tag_dmr: dmr::new(),
            tag_p25: p25::new(),
            tag_nxdn: nxdn::new(),
        }
    }

    pub fn peers(&self) -> &DashMap<u32, PeerConnection> {
        &self.peers
    }

    /// Serves the fabric until `stop` flips. One read loop plus the
    /// keepalive maintenance interval.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!("fabric listening");

        let maint = {
            let this = Arc::clone(&self);
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(this.config.ping_time.max(1)));
                loop {
                    tokio::select! {
                        _ = interval.tick() => this.evict_stale_peers(now_secs()),
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        let mut buffer = vec![0u8; wire::DATA_PACKET_LENGTH];
        loop {
            tokio::select! {
                result = self.socket.read(&mut buffer) => {
                    let (len, addr) = result?;
                    if len < 4 {
                        warn!(%addr, "malformed packet");
                        continue;
                    }
                    self.handle_datagram(&buffer[..len], addr, now_secs()).await;
                }
                _ = stop.changed() => break,
            }
        }

        maint.abort();
        Ok(())
    }

    /// Removes peers whose keepalives starved past the allowance.
    pub fn evict_stale_peers(&self, now: u64) {
        let timeout = self.config.peer_timeout_secs();
        let stale: Vec<u32> = self
            .peers
            .iter()
            .filter(|p| p.stale(now, timeout))
            .map(|p| p.peer_id)
            .collect();

        for peer_id in stale {
            info!(peer_id, "peer timed out");
            self.peers.remove(&peer_id);
        }
    }

    /// Dispatches one inbound datagram by its leading tag.
    pub async fn handle_datagram(&self, data: &[u8], addr: SocketAddr, now: u64) {
        if data.starts_with(wire::TAG_DMR_DATA) {
            if self.config.dmr_enabled {
                let ctx = self.route_context();
                let batch = self.tag_dmr.process_frame(&ctx, data, addr);
                let _ = self.socket.write_multi(&batch).await;
            }
        } else if data.starts_with(wire::TAG_P25_DATA) {
            if self.config.p25_enabled {
                let ctx = self.route_context();
                let batch = self.tag_p25.process_frame(&ctx, data, addr);
                let _ = self.socket.write_multi(&batch).await;
            }
        } else if data.starts_with(wire::TAG_NXDN_DATA) {
            if self.config.nxdn_enabled {
                let ctx = self.route_context();
                let batch = self.tag_nxdn.process_frame(&ctx, data, addr);
                let _ = self.socket.write_multi(&batch).await;
            }
        } else if data.starts_with(wire::TAG_REPEATER_PING) {
            self.handle_ping(data, addr, now).await;
        } else if data.starts_with(wire::TAG_REPEATER_GRANT) {
            self.handle_grant(data, addr).await;
        } else if data.starts_with(wire::TAG_REPEATER_CLOSING) {
            self.handle_closing(data, addr).await;
        } else if data.starts_with(wire::TAG_REPEATER_LOGIN) {
            self.handle_login(data, addr, now).await;
        } else if data.starts_with(wire::TAG_REPEATER_AUTH) {
            self.handle_auth(data, addr, now).await;
        } else if data.starts_with(wire::TAG_REPEATER_CONFIG) {
            self.handle_config(data, addr, now).await;
        } else if data.starts_with(wire::TAG_TRANSFER_ACT_LOG) {
            self.handle_transfer(data, addr, wire::TAG_TRANSFER_ACT_LOG, self.config.allow_activity_transfer);
        } else if data.starts_with(wire::TAG_TRANSFER_DIAG_LOG) {
            self.handle_transfer(data, addr, wire::TAG_TRANSFER_DIAG_LOG, self.config.allow_diagnostic_transfer);
        } else {
            debug!(%addr, "unknown opcode tag");
        }
    }

    fn route_context(&self) -> RouteContext<'_> {
        RouteContext {
            peers: &self.peers,
            rid: &self.rid,
            tg: &self.tg,
        }
    }

    fn peer_id_at(data: &[u8], offset: usize) -> Option<u32> {
        if data.len() < offset + 4 {
            return None;
        }
        Some(u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]))
    }

    async fn handle_login(&self, data: &[u8], addr: SocketAddr, now: u64) {
        let Some(peer_id) = Self::peer_id_at(data, 4) else { return };

        if peer_id == 0 || self.peers.contains_key(&peer_id) {
            self.send_nak(peer_id, wire::TAG_REPEATER_LOGIN, addr).await;
            return;
        }

        let salt: u32 = rand::thread_rng().gen_range(wire::RAND_MIN..=wire::RAND_MAX);
        let connection = PeerConnection::new(peer_id, addr, salt, now);

        info!(peer_id, %addr, "repeater logging in");

        let mut reply = Vec::with_capacity(10);
        reply.extend_from_slice(wire::TAG_REPEATER_ACK);
        reply.extend_from_slice(&salt.to_be_bytes());
        let _ = self.socket.write(&reply, addr).await;

        self.peers.insert(peer_id, connection);
        info!(peer_id, "challenge response sent for login");
    }

    async fn handle_auth(&self, data: &[u8], addr: SocketAddr, now: u64) {
        let Some(peer_id) = Self::peer_id_at(data, 4) else { return };

        let Some(mut connection) = self.peers.get_mut(&peer_id) else {
            self.send_nak(peer_id, wire::TAG_REPEATER_AUTH, addr).await;
            return;
        };

        connection.last_ping = now;

        if connection.state != ConnectionState::WaitingAuth {
            warn!(peer_id, "login exchange while in an incorrect state");
            drop(connection);
            self.peers.remove(&peer_id);
            self.send_nak(peer_id, wire::TAG_REPEATER_AUTH, addr).await;
            return;
        }

        let hash = &data[8..];
        let expected = auth_digest(connection.salt, &self.config.password);

        if hash.len() == expected.len() && hash == expected.as_slice() {
            connection.state = ConnectionState::WaitingConfig;
            info!(peer_id, "peer has completed the login exchange");
            drop(connection);
            self.send_ack(addr).await;
        } else {
            warn!(peer_id, "peer has failed the login exchange");
            drop(connection);
            self.peers.remove(&peer_id);
            self.send_nak(peer_id, wire::TAG_REPEATER_AUTH, addr).await;
        }
    }

    async fn handle_config(&self, data: &[u8], addr: SocketAddr, now: u64) {
        let Some(peer_id) = Self::peer_id_at(data, 4) else { return };

        let Some(mut connection) = self.peers.get_mut(&peer_id) else {
            self.send_nak(peer_id, wire::TAG_REPEATER_CONFIG, addr).await;
            return;
        };

        connection.last_ping = now;

        if connection.state != ConnectionState::WaitingConfig {
            warn!(peer_id, "configuration exchange while in an incorrect state");
            drop(connection);
            self.peers.remove(&peer_id);
            self.send_nak(peer_id, wire::TAG_REPEATER_CONFIG, addr).await;
            return;
        }

        match serde_json::from_slice::<serde_json::Value>(&data[8..]) {
            Ok(body) if body.is_object() => {
                connection.config = Some(body);
                connection.state = ConnectionState::Running;
                connection.connected = true;
                connection.pings_received = 0;
                connection.last_ping = now;
                info!(peer_id, "peer has completed the configuration exchange");
                drop(connection);
                self.send_ack(addr).await;
            }
            _ => {
                warn!(peer_id, "peer supplied invalid configuration data");
                drop(connection);
                self.peers.remove(&peer_id);
                self.send_nak(peer_id, wire::TAG_REPEATER_CONFIG, addr).await;
            }
        }
    }

    async fn handle_ping(&self, data: &[u8], addr: SocketAddr, now: u64) {
        let Some(peer_id) = Self::peer_id_at(data, wire::TAG_REPEATER_PING.len()) else {
            return;
        };

        let Some(mut connection) = self.peers.get_mut(&peer_id) else { return };

        if connection.connected && connection.address_matches(&addr) {
            connection.pings_received += 1;
            connection.last_ping = now;
            drop(connection);
            self.send_ack(addr).await;
            debug!(peer_id, "peer ping received and answered");
        } else {
            drop(connection);
            self.send_nak(peer_id, wire::TAG_REPEATER_PING, addr).await;
        }
    }

    async fn handle_closing(&self, data: &[u8], addr: SocketAddr) {
        let Some(peer_id) = Self::peer_id_at(data, wire::TAG_REPEATER_CLOSING.len()) else {
            return;
        };

        let should_remove = self
            .peers
            .get(&peer_id)
            .map(|c| c.connected && c.address_matches(&addr))
            .unwrap_or(false);

        if should_remove {
            info!(peer_id, "peer is closing down");
            self.peers.remove(&peer_id);
        }
    }

    /// Grant requests: `{dst, src, slot}` after the tag + peer id. A
    /// rejection returns NAK.
    async fn handle_grant(&self, data: &[u8], addr: SocketAddr) {
        let offset = wire::TAG_REPEATER_GRANT.len();
        let Some(peer_id) = Self::peer_id_at(data, offset) else { return };

        let running = self
            .peers
            .get(&peer_id)
            .map(|c| c.is_running() && c.address_matches(&addr))
            .unwrap_or(false);
        if !running {
            self.send_nak(peer_id, wire::TAG_REPEATER_GRANT, addr).await;
            return;
        }

        let (Some(dst_id), Some(src_id)) = (
            Self::peer_id_at(data, offset + 4),
            Self::peer_id_at(data, offset + 8),
        ) else {
            self.send_nak(peer_id, wire::TAG_REPEATER_GRANT, addr).await;
            return;
        };
        let slot = data.get(offset + 12).copied().unwrap_or(0);

        let rule = self.tg.find(dst_id, slot);
        if rule.is_invalid() || !rule.config.active || !self.rid.check(src_id) {
            debug!(peer_id, dst_id, src_id, "grant request refused");
            self.send_nak(peer_id, wire::TAG_REPEATER_GRANT, addr).await;
            return;
        }

        info!(peer_id, dst_id, src_id, slot, "grant request acknowledged");
        self.send_ack(addr).await;
    }

    fn handle_transfer(&self, data: &[u8], addr: SocketAddr, tag: &[u8], allowed: bool) {
        if !allowed {
            return;
        }

        let offset = tag.len();
        let Some(peer_id) = Self::peer_id_at(data, offset) else { return };

        let valid = self
            .peers
            .get(&peer_id)
            .map(|c| c.connected && c.address_matches(&addr))
            .unwrap_or(false);
        if !valid {
            return;
        }

        let body = String::from_utf8_lossy(&data[offset + 4..]);
        info!(peer_id, transfer = %String::from_utf8_lossy(tag), "{}", body.trim_end());
    }

    async fn send_ack(&self, addr: SocketAddr) {
        let _ = self.socket.write(wire::TAG_REPEATER_ACK, addr).await;
    }

    async fn send_nak(&self, peer_id: u32, tag: &[u8], addr: SocketAddr) {
        debug!(peer_id, tag = %String::from_utf8_lossy(tag), "sending NAK");
        let mut reply = Vec::with_capacity(10);
        reply.extend_from_slice(wire::TAG_MASTER_NAK);
        reply.extend_from_slice(&peer_id.to_be_bytes());
        let _ = self.socket.write(&reply, addr).await;
    }
}

/// The login digest: SHA-256 over the big-endian salt followed by the
/// password bytes.
pub fn auth_digest(salt: u32, password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt.to_be_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_salt_then_password() {
        let digest = auth_digest(0x01020304, "secret");

        let mut hasher = Sha256::new();
        hasher.update([1, 2, 3, 4]);
        hasher.update(b"secret");
        assert_eq!(digest, hasher.finalize().to_vec());
    }
}
