//! DMR engine: two TDMA slots under one owner, sharing the affiliation
//! state and the site identity. Each slot runs independent RF/network call
//! state and its own voice, data and control sub-processors.

mod control;
mod data;
mod slot;
mod voice;

pub use slot::Slot;

use std::sync::Arc;

use dv_core::site::SiteData;
use dv_core::wire;
use dv_edac::bits::{read_bit, write_bit};
use dv_edac::golay;
use dv_lookups::affiliation::AffiliationLookup;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::frame_queue::DatagramHeader;
use dv_proto::dmr::{DataType, BS_DATA_SYNC, BS_VOICE_SYNC, FRAME_LENGTH_BYTES, SYNC_MASK};

use crate::{EngineConfig, NetSink};

/// Modem burst plus its frame-type tag byte.
pub const RF_FRAME_LENGTH_BYTES: usize = FRAME_LENGTH_BYTES + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    Data,
    Voice,
    None,
}

/// Matches the 48-bit base-station sync in the center of a burst.
pub fn detect_sync(frame: &[u8]) -> SyncKind {
    let mut field = [0u8; 7];
    for (i, f) in field.iter_mut().enumerate() {
        *f = frame[13 + i] & SYNC_MASK[i];
    }

    if field == BS_DATA_SYNC {
        SyncKind::Data
    } else if field == BS_VOICE_SYNC {
        SyncKind::Voice
    } else {
        SyncKind::None
    }
}

/// Writes the base-station sync pattern into a burst.
pub fn insert_sync(frame: &mut [u8], kind: SyncKind) {
    let pattern = match kind {
        SyncKind::Data => &BS_DATA_SYNC,
        SyncKind::Voice => &BS_VOICE_SYNC,
        SyncKind::None => return,
    };

    for i in 0..7 {
        frame[13 + i] = (frame[13 + i] & !SYNC_MASK[i]) | (pattern[i] & SYNC_MASK[i]);
    }
}

/// Slot type: color code + data type, carried as a shortened Golay(20,8)
/// split around the sync field (bits 98..108 and 156..166).
pub struct SlotType {
    pub color_code: u8,
    pub data_type: Option<DataType>,
}

impl SlotType {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let mut bits20 = 0u32;
        for i in 0..10 {
            bits20 = (bits20 << 1) | u32::from(read_bit(frame, 98 + i));
        }
        for i in 0..10 {
            bits20 = (bits20 << 1) | u32::from(read_bit(frame, 156 + i));
        }

        // reinsert the four shortened (known zero) data bits
        let codeword24 = bits20;
        let decoded = golay::decode(codeword24).ok()?;
        if decoded & 0xF00 != 0 {
            return None;
        }

        let byte = (decoded & 0xFF) as u8;
        Some(Self {
            color_code: byte >> 4,
            data_type: DataType::from_bits(byte & 0x0F),
        })
    }

    pub fn encode(&self, frame: &mut [u8]) {
        let byte =
            (self.color_code << 4) | self.data_type.map(|d| d as u8 & 0x0F).unwrap_or(0);
        let codeword24 = golay::encode(u16::from(byte));
        let bits20 = codeword24 & 0xF_FFFF;

        for i in 0..10 {
            write_bit(frame, 98 + i, (bits20 >> (19 - i)) & 1 == 1);
        }
        for i in 0..10 {
            write_bit(frame, 156 + i, (bits20 >> (9 - i)) & 1 == 1);
        }
    }
}

/// Inbound network frame for one DMR slot.
#[derive(Clone, Debug)]
pub struct DmrNetFrame {
    pub header: DatagramHeader,
    pub payload: Vec<u8>,
}

pub struct DmrEngine {
    slots: [Slot; 2],
    affiliations: AffiliationLookup,
    cc_running: bool,
    supervisor: bool,
}

impl DmrEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        site: Arc<SiteData>,
        rid: Arc<RadioIdLookup>,
        tg: Arc<TalkgroupRulesLookup>,
        sink: Arc<dyn NetSink>,
        color_code: u8,
    ) -> Self {
        Self {
            slots: [
                Slot::new(1, &config, site.clone(), rid.clone(), tg.clone(), sink.clone(), color_code),
                Slot::new(2, &config, site, rid, tg, sink, color_code),
            ],
            affiliations: AffiliationLookup::new("DMR Affiliation", true),
            cc_running: false,
            supervisor: false,
        }
    }

    pub fn affiliations(&self) -> &AffiliationLookup {
        &self.affiliations
    }

    pub fn affiliations_mut(&mut self) -> &mut AffiliationLookup {
        &mut self.affiliations
    }

    pub fn set_cc_running(&mut self, running: bool) {
        self.cc_running = running;
        for slot in &mut self.slots {
            slot.set_cc_running(running);
        }
    }

    pub fn set_supervisor(&mut self, supervisor: bool) {
        self.supervisor = supervisor;
    }

    pub fn is_supervisor(&self) -> bool {
        self.supervisor
    }

    /// Whether traffic for `dst_id` on `slot` would pass the talkgroup
    /// rules.
    pub fn permitted_tg(&self, dst_id: u32, slot_no: u8) -> bool {
        match slot_no {
            1 => self.slots[0].permitted_tg(dst_id),
            2 => self.slots[1].permitted_tg(dst_id),
            _ => false,
        }
    }

    /// Processes one modem burst (`tag + 33 bytes`). The slot is selected
    /// by the host's TDMA framing, passed alongside.
    pub fn process_frame(&mut self, slot_no: u8, frame: &[u8]) -> bool {
        if frame.len() < RF_FRAME_LENGTH_BYTES {
            return false;
        }

        match slot_no {
            1 => self.slots[0].process_frame(frame, &mut self.affiliations),
            2 => self.slots[1].process_frame(frame, &mut self.affiliations),
            _ => false,
        }
    }

    /// Drains one queued transmit burst for the slot.
    pub fn get_frame(&mut self, slot_no: u8, out: &mut [u8]) -> usize {
        match slot_no {
            1 => self.slots[0].get_frame(out),
            2 => self.slots[1].get_frame(out),
            _ => 0,
        }
    }

    pub fn process_network(&mut self, frame: DmrNetFrame) {
        let slot_no = frame.header.slot();
        match slot_no {
            1 => self.slots[0].process_network(frame, &mut self.affiliations),
            2 => self.slots[1].process_network(frame, &mut self.affiliations),
            _ => {}
        }
    }

    pub fn clock(&mut self, ms: u32) {
        for dst in self.affiliations.clock(ms) {
            tracing::debug!(dst_id = dst, "DMR grant timed out");
        }

        let cc = self.cc_running;
        for slot in &mut self.slots {
            slot.clock(ms, cc, &mut self.affiliations);
        }
    }

    pub fn slot(&self, slot_no: u8) -> &Slot {
        &self.slots[usize::from(slot_no.clamp(1, 2)) - 1]
    }

    pub fn slot_mut(&mut self, slot_no: u8) -> &mut Slot {
        &mut self.slots[usize::from(slot_no.clamp(1, 2)) - 1]
    }
}

/// Builds the voice LC header carriage for a burst (used for
/// network-sourced call headers and by the test harness).
pub fn build_voice_header(lc: &dv_proto::dmr::lc::LinkControl, body: &mut [u8; FRAME_LENGTH_BYTES]) {
    voice::VoicePacket::build_header(lc, body);
}

/// Builds the network flags byte for an outbound DMR datagram.
pub fn net_flags(slot_no: u8, private: bool, data_sync: bool, voice_sync: bool, dt_or_seq: u8) -> u8 {
    let mut flags = dt_or_seq & 0x0F;
    if slot_no == 2 {
        flags |= wire::FLAG_SLOT2;
    }
    if private {
        flags |= wire::FLAG_PRIVATE;
    }
    if data_sync {
        flags |= wire::FLAG_DATA_SYNC;
    }
    if voice_sync {
        flags |= wire::FLAG_VOICE_SYNC;
    }
    flags
}
