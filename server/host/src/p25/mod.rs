//! P25 engine: FDMA voice, data and trunking under one owner. The NID
//! (NAC + DUID) selects the handler; the trunking sub-processor doubles as
//! the control channel block source.

mod data;
mod trunk;
mod voice;

use std::sync::Arc;

use dv_core::site::SiteData;
use dv_core::wire;
use dv_core::RingBuffer;
use dv_lookups::affiliation::AffiliationLookup;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::frame_queue::DatagramHeader;
use dv_proto::p25::nid::Nid;
use dv_proto::p25::{Duid, SYNC};
use tracing::{debug, warn};

use crate::state::{CallState, NetGuard, RptState};
use crate::{EngineConfig, NetSink};

pub use data::DataPacket;
pub use trunk::TrunkPacket;
pub use voice::VoicePacket;

/// Longest frame the engine round-trips (LDU plus the modem tag).
pub const LDU_FRAME_LENGTH_BYTES: usize = 216;
pub const TSDU_FRAME_LENGTH_BYTES: usize = 45;
pub const RF_FRAME_MAX_BYTES: usize = LDU_FRAME_LENGTH_BYTES + 1;

/// Bit offset of the NID within a frame (after the 48-bit sync).
pub const NID_BIT_OFFSET: usize = 48;
/// Byte offset of the first payload byte after sync + NID.
pub const PAYLOAD_OFFSET: usize = 14;

pub fn has_sync(frame: &[u8]) -> bool {
    frame.len() >= SYNC.len() && frame[..SYNC.len()] == SYNC
}

pub fn insert_sync(frame: &mut [u8]) {
    frame[..SYNC.len()].copy_from_slice(&SYNC);
}

/// Inbound network frame for the P25 engine.
#[derive(Clone, Debug)]
pub struct P25NetFrame {
    pub header: DatagramHeader,
    pub payload: Vec<u8>,
}

pub(crate) struct Facilities<'a> {
    pub state: &'a mut CallState,
    pub tx_queue: &'a mut RingBuffer<u8>,
    pub sink: &'a dyn NetSink,
    pub affiliations: &'a mut AffiliationLookup,
    pub site: &'a SiteData,
    pub rid: &'a RadioIdLookup,
    pub tg: &'a TalkgroupRulesLookup,
    pub config: &'a EngineConfig,
    pub nid: &'a Nid,
}

impl Facilities<'_> {
    pub fn validate_rf(&self, src_id: u32, dst_id: u32, group: bool) -> Result<(), &'static str> {
        if !self.rid.check(src_id) {
            return Err("source radio denied");
        }
        if group {
            if !self.tg.check(dst_id, 0) {
                return Err("talkgroup denied");
            }
        } else if !self.rid.check(dst_id) {
            return Err("destination radio denied");
        }
        Ok(())
    }

    /// Queues a tagged frame with a two-byte length prefix, since P25
    /// frames vary by DUID.
    pub fn write_rf(&mut self, tag: u8, frame: &[u8]) {
        let total = (frame.len() + 1) as u16;
        let mut burst = Vec::with_capacity(frame.len() + 3);
        burst.extend_from_slice(&total.to_be_bytes());
        burst.push(tag);
        burst.extend_from_slice(frame);
        self.tx_queue.add_data(&burst);
    }
}

pub struct P25Engine {
    config: EngineConfig,
    site: Arc<SiteData>,
    rid: Arc<RadioIdLookup>,
    tg: Arc<TalkgroupRulesLookup>,
    sink: Arc<dyn NetSink>,
    nid: Nid,

    state: CallState,
    voice: VoicePacket,
    data: DataPacket,
    trunk: TrunkPacket,
    affiliations: AffiliationLookup,
    tx_queue: RingBuffer<u8>,

    cc_running: bool,
    supervisor: bool,
}

impl P25Engine {
    pub fn new(
        config: EngineConfig,
        site: Arc<SiteData>,
        rid: Arc<RadioIdLookup>,
        tg: Arc<TalkgroupRulesLookup>,
        sink: Arc<dyn NetSink>,
        nac: u16,
    ) -> Self {
        Self {
            state: CallState::new("P25", &config),
            voice: VoicePacket::new(),
            data: DataPacket::new(),
            trunk: TrunkPacket::new(config.warn_crc),
            affiliations: AffiliationLookup::new("P25 Affiliation", false),
            tx_queue: RingBuffer::new(RF_FRAME_MAX_BYTES * 24, "P25"),
            nid: Nid::new(nac),
            config,
            site,
            rid,
            tg,
            sink,
            cc_running: false,
            supervisor: false,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn affiliations(&self) -> &AffiliationLookup {
        &self.affiliations
    }

    pub fn affiliations_mut(&mut self) -> &mut AffiliationLookup {
        &mut self.affiliations
    }

    pub fn set_cc_running(&mut self, running: bool) {
        self.cc_running = running;
    }

    pub fn set_supervisor(&mut self, supervisor: bool) {
        self.supervisor = supervisor;
    }

    pub fn is_supervisor(&self) -> bool {
        self.supervisor
    }

    pub fn permitted_tg(&self, dst_id: u32) -> bool {
        self.tg.check(dst_id, 0)
    }

    fn facilities<'a>(&'a mut self) -> (Facilities<'a>, &'a mut VoicePacket, &'a mut DataPacket, &'a mut TrunkPacket) {
        (
            Facilities {
                state: &mut self.state,
                tx_queue: &mut self.tx_queue,
                sink: self.sink.as_ref(),
                affiliations: &mut self.affiliations,
                site: &self.site,
                rid: &self.rid,
                tg: &self.tg,
                config: &self.config,
                nid: &self.nid,
            },
            &mut self.voice,
            &mut self.data,
            &mut self.trunk,
        )
    }

    /// Processes one modem frame (tag byte + sync + NID + payload).
    pub fn process_frame(&mut self, frame: &[u8]) -> bool {
        if frame.len() < 1 + PAYLOAD_OFFSET {
            return false;
        }

        let tag = frame[0];
        let body = &frame[1..];

        if tag == wire::TAG_LOST {
            if self.state.rf_state != RptState::Listening {
                warn!("P25 RF transmission lost");
                self.state.rf_lost += 1;
                self.state.end_rf_call();
                self.voice.reset();
                self.data.reset();
            }
            return false;
        }

        if !has_sync(body) {
            debug!("P25 frame without sync, dropping");
            return false;
        }

        let Some(duid) = self.nid.decode(body, NID_BIT_OFFSET) else {
            debug!("unrecoverable P25 NID, dropping frame");
            self.state.rf_errs += 1;
            return false;
        };

        let body = body.to_vec();
        let (mut fac, voice, data, trunk) = self.facilities();

        match duid {
            Duid::Hdu => voice.process_hdu(&mut fac, &body),
            Duid::Ldu1 => voice.process_ldu1(&mut fac, &body),
            Duid::Ldu2 => voice.process_ldu2(&mut fac, &body),
            Duid::Tdu => voice.process_tdu(&mut fac, &body),
            Duid::Tdulc => voice.process_tdulc(&mut fac, &body),
            Duid::Tsdu => trunk.process_tsdu(&mut fac, &body),
            Duid::Pdu => data.process_pdu(&mut fac, &body),
        }
    }

    pub fn get_frame(&mut self, out: &mut [u8]) -> usize {
        // frames queue with a two-byte length prefix ahead of the tag
        let mut len_byte = [0u8; 2];
        if !self.tx_queue.peek(&mut len_byte) {
            return 0;
        }
        let total = usize::from(u16::from_be_bytes(len_byte));
        if self.tx_queue.data_size() < 2 + total || out.len() < total {
            return 0;
        }

        let mut skip = [0u8; 2];
        self.tx_queue.get_data(&mut skip);
        if self.tx_queue.get_data(&mut out[..total]) {
            total
        } else {
            0
        }
    }

    pub fn process_network(&mut self, frame: P25NetFrame) {
        let header = frame.header;
        let src_id = header.src_id;
        let dst_id = header.dst_id;

        match self.state.net_guard(src_id, dst_id) {
            NetGuard::Accept => {}
            NetGuard::RfPreempts => {
                debug!(dst_id, "local RF preempts P25 network frame");
                return;
            }
            NetGuard::TgHang => {
                debug!(dst_id, "talkgroup hang drops P25 network frame");
                return;
            }
        }

        let duid = Duid::from_bits(header.flags & 0x0F);

        if self.state.net_state == RptState::Listening {
            let state = if duid == Some(Duid::Pdu) { RptState::Data } else { RptState::Audio };
            self.state.start_net_call(state, src_id, dst_id, header.stream_id);
        } else if self.state.net_stream_id != header.stream_id {
            self.state.net_missed += 1;
            return;
        }

        self.state.net_frames += 1;
        self.state.net_watchdog.start();

        let total = (frame.payload.len() + 1) as u16;
        let mut queued = Vec::with_capacity(frame.payload.len() + 3);
        queued.extend_from_slice(&total.to_be_bytes());
        queued.push(wire::TAG_DATA);
        queued.extend_from_slice(&frame.payload);
        self.tx_queue.add_data(&queued);

        if matches!(duid, Some(Duid::Tdu) | Some(Duid::Tdulc)) {
            self.state.end_net_call();
        }
    }

    pub fn clock(&mut self, ms: u32) {
        for dst in self.affiliations.clock(ms) {
            debug!(dst_id = dst, "P25 grant timed out");
        }

        let watchdog_fired = self.state.clock(ms);
        if watchdog_fired {
            self.voice.reset();
            self.data.reset();
        }

        if self.state.rf_state != RptState::Listening && self.state.rf_timeout.has_expired() {
            warn!("P25 RF call timeout");
            self.state.end_rf_call();
            self.voice.reset();
            self.data.reset();
        }

        if self.cc_running {
            if self.state.cc_packet_interval.is_running()
                && self.state.cc_packet_interval.has_expired()
            {
                let (mut fac, _voice, _data, trunk) = self.facilities();
                trunk.tick_cc(&mut fac);
                self.state.cc_packet_interval.start();
            } else if !self.state.cc_packet_interval.is_running() {
                self.state.cc_packet_interval.start();
            }
        }
    }
}
