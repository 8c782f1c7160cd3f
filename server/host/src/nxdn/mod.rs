//! NXDN engine: FDMA voice, data and control channel handling keyed by the
//! LICH at the head of every burst.

mod control;
mod voice;

use std::sync::Arc;

use dv_core::site::SiteData;
use dv_core::wire;
use dv_core::RingBuffer;
use dv_lookups::affiliation::AffiliationLookup;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::frame_queue::DatagramHeader;
use dv_proto::nxdn::lich::{Lich, RfChannelType};
use dv_proto::nxdn::{FSW, FSW_MASK};
use tracing::{debug, warn};

use crate::state::{CallState, NetGuard, RptState};
use crate::{EngineConfig, NetSink};

pub use control::ControlPacket;
pub use voice::VoicePacket;

/// Burst geometry: FSW + LICH + SACCH + two FACCH/VCH fields.
pub const FRAME_LENGTH_BYTES: usize = 48;
pub const RF_FRAME_LENGTH_BYTES: usize = FRAME_LENGTH_BYTES + 1;

/// Bit offsets within a burst.
pub const LICH_BIT_OFFSET: usize = 20;
pub const SACCH_BIT_OFFSET: usize = 36;
pub const FACCH1_FIRST_OFFSET: usize = 96;
pub const FACCH1_SECOND_OFFSET: usize = 240;

pub fn has_fsw(frame: &[u8]) -> bool {
    frame.len() >= 3
        && frame
            .iter()
            .zip(FSW.iter().zip(FSW_MASK.iter()))
            .take(3)
            .all(|(&b, (&sync, &mask))| b & mask == sync)
}

pub fn insert_fsw(frame: &mut [u8]) {
    for i in 0..3 {
        frame[i] = (frame[i] & !FSW_MASK[i]) | FSW[i];
    }
}

/// Reads the doubled LICH bits at their burst offset.
pub fn read_lich(frame: &[u8]) -> Option<Lich> {
    let mut field = [0u8; 2];
    for i in 0..16 {
        let bit_pos = LICH_BIT_OFFSET + i;
        if frame[bit_pos / 8] & (0x80 >> (bit_pos % 8)) != 0 {
            field[i / 8] |= 0x80 >> (i % 8);
        }
    }
    Lich::decode(&field).ok()
}

pub fn write_lich(frame: &mut [u8], lich: Lich) {
    let field = lich.encode();
    for i in 0..16 {
        let bit_pos = LICH_BIT_OFFSET + i;
        let bit = field[i / 8] & (0x80 >> (i % 8)) != 0;
        if bit {
            frame[bit_pos / 8] |= 0x80 >> (bit_pos % 8);
        } else {
            frame[bit_pos / 8] &= !(0x80 >> (bit_pos % 8));
        }
    }
}

#[derive(Clone, Debug)]
pub struct NxdnNetFrame {
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
    pub ran: u8,
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

    pub fn write_rf(&mut self, tag: u8, frame: &[u8; FRAME_LENGTH_BYTES]) {
        let mut burst = [0u8; RF_FRAME_LENGTH_BYTES];
        burst[0] = tag;
        burst[1..].copy_from_slice(frame);
        self.tx_queue.add_data(&burst);
    }
}

pub struct NxdnEngine {
    config: EngineConfig,
    site: Arc<SiteData>,
    rid: Arc<RadioIdLookup>,
    tg: Arc<TalkgroupRulesLookup>,
    sink: Arc<dyn NetSink>,
    ran: u8,

    state: CallState,
    voice: VoicePacket,
    control: ControlPacket,
    affiliations: AffiliationLookup,
    tx_queue: RingBuffer<u8>,

    cc_running: bool,
    supervisor: bool,
}

impl NxdnEngine {
    pub fn new(
        config: EngineConfig,
        site: Arc<SiteData>,
        rid: Arc<RadioIdLookup>,
        tg: Arc<TalkgroupRulesLookup>,
        sink: Arc<dyn NetSink>,
        ran: u8,
    ) -> Self {
        Self {
            state: CallState::new("NXDN", &config),
            voice: VoicePacket::new(),
            control: ControlPacket::new(),
            affiliations: AffiliationLookup::new("NXDN Affiliation", false),
            tx_queue: RingBuffer::new(RF_FRAME_LENGTH_BYTES * 30, "NXDN"),
            config,
            site,
            rid,
            tg,
            sink,
            ran,
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

    fn facilities(&mut self) -> (Facilities<'_>, &mut VoicePacket, &mut ControlPacket) {
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
                ran: self.ran,
            },
            &mut self.voice,
            &mut self.control,
        )
    }

    pub fn process_frame(&mut self, frame: &[u8]) -> bool {
        if frame.len() < RF_FRAME_LENGTH_BYTES {
            return false;
        }

        let tag = frame[0];
        let mut body = [0u8; FRAME_LENGTH_BYTES];
        body.copy_from_slice(&frame[1..1 + FRAME_LENGTH_BYTES]);

        if tag == wire::TAG_LOST {
            if self.state.rf_state != RptState::Listening {
                warn!("NXDN RF transmission lost");
                self.state.rf_lost += 1;
                self.state.end_rf_call();
                self.voice.reset();
            }
            return false;
        }

        if !has_fsw(&body) {
            debug!("NXDN frame without FSW, dropping");
            return false;
        }

        let Some(lich) = read_lich(&body) else {
            debug!("NXDN LICH parity failure, dropping frame");
            self.state.rf_errs += 1;
            return false;
        };

        let (mut fac, voice, control) = self.facilities();
        match lich.rf_type {
            RfChannelType::Rcch => control.process_cac(&mut fac, &body),
            RfChannelType::Rtch | RfChannelType::RtchC => voice.process_traffic(&mut fac, &body, lich),
            RfChannelType::Rdch => voice.process_data(&mut fac, &body, lich),
        }
    }

    pub fn get_frame(&mut self, out: &mut [u8]) -> usize {
        if self.tx_queue.data_size() < RF_FRAME_LENGTH_BYTES {
            return 0;
        }
        if self.tx_queue.get_data(&mut out[..RF_FRAME_LENGTH_BYTES]) {
            RF_FRAME_LENGTH_BYTES
        } else {
            0
        }
    }

    pub fn process_network(&mut self, frame: NxdnNetFrame) {
        let header = frame.header;

        match self.state.net_guard(header.src_id, header.dst_id) {
            NetGuard::Accept => {}
            NetGuard::RfPreempts => {
                debug!(dst_id = header.dst_id, "local RF preempts NXDN network frame");
                return;
            }
            NetGuard::TgHang => {
                debug!(dst_id = header.dst_id, "talkgroup hang drops NXDN network frame");
                return;
            }
        }

        if self.state.net_state == RptState::Listening {
            let state = if header.data_sync() { RptState::Data } else { RptState::Audio };
            self.state
                .start_net_call(state, header.src_id, header.dst_id, header.stream_id);
        } else if self.state.net_stream_id != header.stream_id {
            self.state.net_missed += 1;
            return;
        }

        self.state.net_frames += 1;
        self.state.net_watchdog.start();

        if frame.payload.len() >= FRAME_LENGTH_BYTES {
            let mut body = [0u8; FRAME_LENGTH_BYTES];
            body.copy_from_slice(&frame.payload[..FRAME_LENGTH_BYTES]);
            let mut burst = [0u8; RF_FRAME_LENGTH_BYTES];
            burst[0] = wire::TAG_DATA;
            burst[1..].copy_from_slice(&body);
            self.tx_queue.add_data(&burst);
        }

        // the end-of-transmission marker rides the flags nibble
        if header.flags & 0x0F == 0x08 {
            self.state.end_net_call();
        }
    }

    pub fn clock(&mut self, ms: u32) {
        for dst in self.affiliations.clock(ms) {
            debug!(dst_id = dst, "NXDN grant timed out");
        }

        let watchdog_fired = self.state.clock(ms);
        if watchdog_fired {
            self.voice.reset();
        }

        if self.state.rf_state != RptState::Listening && self.state.rf_timeout.has_expired() {
            warn!("NXDN RF call timeout");
            self.state.end_rf_call();
            self.voice.reset();
        }

        if self.cc_running {
            if self.state.cc_packet_interval.is_running()
                && self.state.cc_packet_interval.has_expired()
            {
                let (mut fac, _voice, control) = self.facilities();
                control.tick_cc(&mut fac);
                self.state.cc_packet_interval.start();
            } else if !self.state.cc_packet_interval.is_running() {
                self.state.cc_packet_interval.start();
            }
        }
    }
}
