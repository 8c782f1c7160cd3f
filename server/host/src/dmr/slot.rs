//! One DMR TDMA slot: RF/network call state, traffic arbitration and the
//! transmit queue, dispatching bursts to the voice, data and control
//! sub-processors.

use std::sync::Arc;

use dv_core::site::SiteData;
use dv_core::wire;
use dv_core::RingBuffer;
use dv_lookups::affiliation::AffiliationLookup;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_proto::dmr::{DataType, Flco, FRAME_LENGTH_BYTES};
use tracing::{debug, warn};

use super::control::ControlSignaling;
use super::data::DataPacket;
use super::voice::VoicePacket;
use super::{detect_sync, DmrNetFrame, SlotType, SyncKind, RF_FRAME_LENGTH_BYTES};
use crate::state::{CallState, NetGuard, RptState};
use crate::{EngineConfig, NetSink};

/// Capabilities handed to the sub-processors per call; replaces the web of
/// back-pointers between the packet handlers.
pub(crate) struct Facilities<'a> {
    pub state: &'a mut CallState,
    pub tx_queue: &'a mut RingBuffer<u8>,
    pub sink: &'a dyn NetSink,
    pub affiliations: &'a mut AffiliationLookup,
    pub site: &'a SiteData,
    pub rid: &'a RadioIdLookup,
    pub tg: &'a TalkgroupRulesLookup,
    pub config: &'a EngineConfig,
    pub slot_no: u8,
    pub color_code: u8,
}

impl Facilities<'_> {
    /// ACL + talkgroup-rule validation for an RF call. Returns the reason
    /// on rejection.
    pub fn validate_rf(&self, src_id: u32, dst_id: u32, flco: Flco) -> Result<(), &'static str> {
        if !self.rid.check(src_id) {
            return Err("source radio denied");
        }

        match flco {
            Flco::Private => {
                if !self.rid.check(dst_id) {
                    return Err("destination radio denied");
                }
            }
            Flco::Group => {
                if !self.tg.check(dst_id, self.slot_no) {
                    return Err("talkgroup denied");
                }
            }
        }

        Ok(())
    }

    /// Queues a burst for transmission with its modem tag byte.
    pub fn write_rf(&mut self, tag: u8, frame: &[u8; FRAME_LENGTH_BYTES]) {
        let mut burst = [0u8; RF_FRAME_LENGTH_BYTES];
        burst[0] = tag;
        burst[1..].copy_from_slice(frame);
        self.tx_queue.add_data(&burst);
    }
}

pub struct Slot {
    slot_no: u8,
    config: EngineConfig,
    site: Arc<SiteData>,
    rid: Arc<RadioIdLookup>,
    tg: Arc<TalkgroupRulesLookup>,
    sink: Arc<dyn NetSink>,
    color_code: u8,

    state: CallState,
    voice: VoicePacket,
    data: DataPacket,
    control: ControlSignaling,
    tx_queue: RingBuffer<u8>,

    cc_running: bool,
}

impl Slot {
    pub(crate) fn new(
        slot_no: u8,
        config: &EngineConfig,
        site: Arc<SiteData>,
        rid: Arc<RadioIdLookup>,
        tg: Arc<TalkgroupRulesLookup>,
        sink: Arc<dyn NetSink>,
        color_code: u8,
    ) -> Self {
        let label: &'static str = if slot_no == 1 { "DMR/1" } else { "DMR/2" };
        Self {
            slot_no,
            config: config.clone(),
            site,
            rid,
            tg,
            sink,
            color_code,
            state: CallState::new(label, config),
            voice: VoicePacket::new(),
            data: DataPacket::new(),
            control: ControlSignaling::new(),
            tx_queue: RingBuffer::new(RF_FRAME_LENGTH_BYTES * 40, label),
            cc_running: false,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn set_cc_running(&mut self, running: bool) {
        self.cc_running = running;
    }

    pub fn permitted_tg(&self, dst_id: u32) -> bool {
        self.tg.check(dst_id, self.slot_no)
    }

    /// Forces the RF side back to listening (supervisor action or host
    /// shutdown).
    pub fn end_rf_call(&mut self) {
        self.state.end_rf_call();
        self.voice.reset();
        self.data.reset();
    }

    fn facilities<'a>(&'a mut self, affiliations: &'a mut AffiliationLookup) -> Facilities<'a> {
        Facilities {
            state: &mut self.state,
            tx_queue: &mut self.tx_queue,
            sink: self.sink.as_ref(),
            affiliations,
            site: &self.site,
            rid: &self.rid,
            tg: &self.tg,
            config: &self.config,
            slot_no: self.slot_no,
            color_code: self.color_code,
        }
    }

    /// Processes one modem burst (tag byte + 33 frame bytes).
    pub fn process_frame(&mut self, frame: &[u8], affiliations: &mut AffiliationLookup) -> bool {
        let tag = frame[0];
        let mut body = [0u8; FRAME_LENGTH_BYTES];
        body.copy_from_slice(&frame[1..1 + FRAME_LENGTH_BYTES]);

        if tag == wire::TAG_LOST {
            return self.process_lost(affiliations);
        }

        // the sub-processors step aside while the capability handle borrows
        // the slot's shared facilities
        let mut voice = std::mem::take(&mut self.voice);
        let mut data = std::mem::take(&mut self.data);
        let mut control = std::mem::take(&mut self.control);

        let result = {
            let mut fac = self.facilities(affiliations);
            match detect_sync(&body) {
                SyncKind::Data => match SlotType::decode(&body) {
                    None => {
                        debug!(slot = fac.slot_no, "unrecoverable slot type, dropping burst");
                        false
                    }
                    Some(slot_type) if slot_type.color_code != fac.color_code => {
                        debug!(
                            slot = fac.slot_no,
                            color_code = slot_type.color_code,
                            "color code mismatch, ignoring burst"
                        );
                        false
                    }
                    Some(slot_type) => match slot_type.data_type {
                        Some(DataType::VoiceLcHeader) => voice.process_header(&mut fac, &body),
                        Some(DataType::TerminatorWithLc) => {
                            voice.process_terminator(&mut fac, &body)
                        }
                        Some(DataType::Csbk) => control.process_csbk(&mut fac, &body),
                        Some(DataType::DataHeader) => data.process_header(&mut fac, &body),
                        Some(DataType::Rate34Data) => {
                            data.process_block(&mut fac, &body, DataType::Rate34Data)
                        }
                        Some(DataType::Rate12Data) => {
                            data.process_block(&mut fac, &body, DataType::Rate12Data)
                        }
                        Some(DataType::Rate1Data) => {
                            data.process_block(&mut fac, &body, DataType::Rate1Data)
                        }
                        Some(DataType::Idle) | None => false,
                        Some(_) => false,
                    },
                },
                SyncKind::Voice => voice.process_voice_sync(&mut fac, &body),
                SyncKind::None => voice.process_voice(&mut fac, &body),
            }
        };

        self.voice = voice;
        self.data = data;
        self.control = control;
        result
    }

    fn process_lost(&mut self, _affiliations: &mut AffiliationLookup) -> bool {
        if self.state.rf_state != RptState::Listening {
            warn!(
                slot = self.slot_no,
                dst_id = self.state.rf_last_dst_id,
                "RF transmission lost"
            );
            self.state.rf_lost += 1;
            self.state.end_rf_call();
            self.voice.reset();
            self.data.reset();
        }
        false
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

    pub fn process_network(&mut self, frame: DmrNetFrame, _affiliations: &mut AffiliationLookup) {
        let header = frame.header;
        let src_id = header.src_id;
        let dst_id = header.dst_id;

        match self.state.net_guard(src_id, dst_id) {
            NetGuard::Accept => {}
            NetGuard::RfPreempts => {
                debug!(slot = self.slot_no, dst_id, "local RF preempts network frame");
                return;
            }
            NetGuard::TgHang => {
                debug!(slot = self.slot_no, dst_id, "talkgroup hang drops network frame");
                return;
            }
        }

        if self.state.net_state == RptState::Listening {
            let state = if header.data_sync() && header.flags & 0x0F == DataType::DataHeader as u8 {
                RptState::Data
            } else {
                RptState::Audio
            };
            self.state.start_net_call(state, src_id, dst_id, header.stream_id);
        } else if self.state.net_stream_id != header.stream_id {
            // a different stream while a call runs is late-entry contention
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

        // terminator ends the call
        if header.data_sync() && header.flags & 0x0F == DataType::TerminatorWithLc as u8 {
            self.state.end_net_call();
        }
    }

    pub fn clock(&mut self, ms: u32, cc_running: bool, affiliations: &mut AffiliationLookup) {
        let watchdog_fired = self.state.clock(ms);
        if watchdog_fired {
            self.voice.reset();
            self.data.reset();
        }

        if self.state.rf_state != RptState::Listening && self.state.rf_timeout.has_expired() {
            warn!(slot = self.slot_no, "RF call timeout");
            self.state.end_rf_call();
            self.voice.reset();
            self.data.reset();
        }

        if cc_running
            && self.state.cc_packet_interval.is_running()
            && self.state.cc_packet_interval.has_expired()
        {
            let mut control = std::mem::take(&mut self.control);
            {
                let mut fac = self.facilities(affiliations);
                control.tick_cc(&mut fac);
            }
            self.control = control;
            self.state.cc_packet_interval.start();
        } else if cc_running && !self.state.cc_packet_interval.is_running() {
            self.state.cc_packet_interval.start();
        }
    }
}
