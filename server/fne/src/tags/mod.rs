//! Per-protocol payload routing ("taggers"). Shared here: stream
//! validation against the radio ACL and talkgroup rules, receiver-side
//! inclusion/exclusion policy, parrot loopback and the fan-out batch
//! assembly.

pub mod dmr;
pub mod nxdn;
pub mod p25;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::{TalkgroupRuleGroupVoice, TalkgroupRulesLookup};
use dv_net::frame_queue::DatagramHeader;
use tracing::{debug, warn};

use crate::peer::PeerConnection;

pub struct RouteContext<'a> {
    pub peers: &'a DashMap<u32, PeerConnection>,
    pub rid: &'a RadioIdLookup,
    pub tg: &'a TalkgroupRulesLookup,
}

/// Protocol-specific hooks for the shared routing path.
pub trait Protocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// DMR consults the slot in rule lookups; the FDMA protocols pass 0.
    fn slot(&self, header: &DatagramHeader) -> u8;

    /// Whether this datagram ends the call (parrot playback trigger).
    fn is_end_of_call(&self, header: &DatagramHeader) -> bool;

    /// Whether this datagram is a terminator that stays valid for a
    /// denied-source stream (so the far end can close out cleanly).
    fn is_terminator(&self, header: &DatagramHeader) -> bool {
        self.is_end_of_call(header)
    }
}

pub struct Tagger<P: Protocol> {
    protocol: P,
    /// Per-stream parrot buffers awaiting end of call.
    parrot: Mutex<HashMap<u32, (SocketAddr, Vec<Bytes>)>>,
    /// Streams already logged as rejected.
    rejected_streams: Mutex<HashMap<u32, u32>>,
}

impl<P: Protocol> Tagger<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            parrot: Mutex::new(HashMap::new()),
            rejected_streams: Mutex::new(HashMap::new()),
        }
    }

    /// Validates the call stream: source ACL, private destination ACL,
    /// group rule active + slot.
    fn validate(&self, ctx: &RouteContext<'_>, header: &DatagramHeader) -> bool {
        let rid = ctx.rid.find(header.src_id);
        if !rid.default && !rid.enabled {
            return false;
        }

        // a terminator from a known source always passes so calls close out
        if self.protocol.is_terminator(header) {
            return true;
        }

        if header.is_private() {
            let dst = ctx.rid.find(header.dst_id);
            if !dst.default && !dst.enabled {
                return false;
            }
        } else {
            let rule = ctx.tg.find(header.dst_id, self.protocol.slot(header));
            if rule.is_invalid() || !rule.config.active {
                return false;
            }
            if rule.source.tg_slot != 0
                && self.protocol.slot(header) != 0
                && rule.source.tg_slot != self.protocol.slot(header)
            {
                return false;
            }
        }

        true
    }

    /// Receiver-side policy for one candidate peer.
    fn is_peer_permitted(
        &self,
        peer: &PeerConnection,
        header: &DatagramHeader,
        rule: &TalkgroupRuleGroupVoice,
    ) -> bool {
        // private calls are always permitted
        if header.is_private() {
            return true;
        }

        // inclusion lists take priority over exclusion lists
        if !rule.config.inclusion.is_empty() {
            if !rule.config.inclusion.contains(&peer.peer_id) {
                return false;
            }
        } else if !rule.config.exclusion.is_empty() && rule.config.exclusion.contains(&peer.peer_id)
        {
            return false;
        }

        if rule.config.affiliated && !peer.affiliations.contains(&header.dst_id) {
            return false;
        }

        true
    }

    /// Routes one payload datagram; returns the batch of copies to send.
    pub fn process_frame(
        &self,
        ctx: &RouteContext<'_>,
        data: &[u8],
        addr: SocketAddr,
    ) -> Vec<(Bytes, SocketAddr)> {
        let Some(header) = DatagramHeader::parse(data) else {
            debug!(protocol = self.protocol.name(), "malformed payload datagram");
            return Vec::new();
        };

        // the sender must be a running peer transmitting from its login
        // address
        let sender_ok = ctx
            .peers
            .get(&header.peer_id)
            .map(|p| p.is_running() && p.address_matches(&addr))
            .unwrap_or(false);
        if !sender_ok {
            debug!(
                protocol = self.protocol.name(),
                peer_id = header.peer_id,
                "payload from unknown or non-running peer"
            );
            return Vec::new();
        }

        if !self.validate(ctx, &header) {
            let mut rejected = self.rejected_streams.lock().expect("tagger mutex");
            if rejected.insert(header.stream_id, header.src_id).is_none() {
                warn!(
                    protocol = self.protocol.name(),
                    peer_id = header.peer_id,
                    src_id = header.src_id,
                    dst_id = header.dst_id,
                    "stream rejected by ACL/rules"
                );
            }
            return Vec::new();
        }

        let rule = ctx.tg.find(header.dst_id, self.protocol.slot(&header));

        // parrot talkgroups buffer the stream and loop it back at call end
        if rule.config.parrot {
            let mut parrot = self.parrot.lock().expect("tagger mutex");
            let entry = parrot
                .entry(header.stream_id)
                .or_insert_with(|| (addr, Vec::new()));
            entry.1.push(Bytes::copy_from_slice(data));

            if self.protocol.is_end_of_call(&header) {
                let (sender, frames) = parrot.remove(&header.stream_id).expect("just inserted");
                debug!(
                    protocol = self.protocol.name(),
                    frames = frames.len(),
                    "parrot playback"
                );
                return frames.into_iter().map(|f| (f, sender)).collect();
            }
            return Vec::new();
        }

        let payload = Bytes::copy_from_slice(data);
        let mut batch = Vec::new();
        for peer in ctx.peers.iter() {
            if peer.peer_id == header.peer_id || !peer.is_running() {
                continue;
            }
            if !self.is_peer_permitted(&peer, &header, &rule) {
                continue;
            }

            debug!(
                protocol = self.protocol.name(),
                src_peer = header.peer_id,
                dst_peer = peer.peer_id,
                src_id = header.src_id,
                dst_id = header.dst_id,
                stream_id = header.stream_id,
                "routing frame"
            );
            batch.push((payload.clone(), peer.address));
        }

        if self.protocol.is_end_of_call(&header) {
            self.rejected_streams
                .lock()
                .expect("tagger mutex")
                .remove(&header.stream_id);
        }

        batch
    }
}
