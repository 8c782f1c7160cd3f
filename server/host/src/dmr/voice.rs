//! DMR slot voice packet handler: LC headers, voice superframes with
//! embedded signalling, and terminators.

use dv_edac::{bptc, crc};
use dv_proto::dmr::embedded::EmbeddedData;
use dv_proto::dmr::lc::{LinkControl, LC_LENGTH_BYTES};
use dv_proto::dmr::{DataType, Flco, Lcss, FRAME_LENGTH_BYTES};
use tracing::debug;

use super::net_flags;
use super::slot::Facilities;
use crate::state::{RfGuard, RptState};
use crate::{new_stream_id, TaggedFrame};
use dv_core::wire;
use dv_net::frame_queue::FrameMeta;

/// Voice LC carriage: 9 LC bytes + CCITT-161 inside the BPTC payload.
fn decode_voice_lc(body: &[u8]) -> Option<LinkControl> {
    let mut payload = [0u8; 12];
    bptc::decode(body, &mut payload);

    if !crc::check_ccitt161(&payload[..11]) {
        debug!("voice LC failed CRC CCITT-161 check");
        return None;
    }

    LinkControl::decode(&payload[..LC_LENGTH_BYTES])
}

fn encode_voice_lc(lc: &LinkControl, body: &mut [u8]) {
    let mut payload = [0u8; 12];
    lc.encode(&mut payload);
    crc::add_ccitt161(&mut payload[..11]);
    bptc::encode(&payload, body);
}

#[derive(Default)]
pub struct VoicePacket {
    embedded: EmbeddedData,
    /// Current LC for the RF voice call.
    rf_lc: Option<LinkControl>,
    /// Voice burst index within the superframe (A..F).
    rf_n: u8,
}

impl VoicePacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.embedded.reset();
        self.rf_lc = None;
        self.rf_n = 0;
    }

    /// Voice LC header burst: opens an RF voice call.
    pub fn process_header(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let Some(lc) = decode_voice_lc(body) else {
            fac.state.rf_errs += 1;
            return false;
        };

        match fac.state.rf_guard(lc.src_id, lc.dst_id) {
            RfGuard::Accept => {}
            RfGuard::NetPreempts => {
                debug!(dst_id = lc.dst_id, "network traffic owns destination, resetting RF");
                fac.state.reset_rf();
                return false;
            }
            RfGuard::VoteCollision => {
                debug!(src_id = lc.src_id, dst_id = lc.dst_id, "vote collision, dropping RF");
                return false;
            }
        }

        if let Err(reason) = fac.validate_rf(lc.src_id, lc.dst_id, lc.flco) {
            fac.state.reject_rf(lc.src_id, lc.dst_id, reason);
            return false;
        }

        let stream_id = new_stream_id();
        fac.state.start_rf_call(RptState::Audio, lc.src_id, lc.dst_id, stream_id);
        self.rf_lc = Some(lc);
        self.rf_n = 0;
        self.embedded.set_lc(&lc);

        self.forward(fac, body, true, false, DataType::VoiceLcHeader as u8, &lc);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_HEADER, &frame);
        true
    }

    /// Voice sync burst (frame A of a superframe).
    pub fn process_voice_sync(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if fac.state.rf_state != RptState::Audio {
            // late entry without a header: recover the call from embedded
            // signalling once it assembles
            if fac.state.rf_state != RptState::Listening {
                return false;
            }
        }

        let Some(lc) = self.rf_lc else {
            self.rf_n = 0;
            return false;
        };

        fac.state.rf_frames += 1;
        fac.state.rf_bits += 216;
        self.rf_n = 0;

        self.forward(fac, body, false, true, 0, &lc);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_DATA, &frame);
        true
    }

    /// Voice burst without sync (frames B..F, embedded signalling in the
    /// center field).
    pub fn process_voice(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if fac.state.rf_state != RptState::Audio {
            return false;
        }

        self.rf_n = (self.rf_n + 1) % 6;
        fac.state.rf_frames += 1;
        fac.state.rf_bits += 216;

        // accumulate the LCSS fragments riding bytes 14..18
        let lcss = Lcss::from_bits(body[13] >> 4 & 0x03);
        let fragment = [body[14], body[15], body[16], body[17]];
        if self.embedded.add_fragment(&fragment, lcss) {
            if let Some(lc) = self.embedded.link_control() {
                if self.rf_lc.is_none() {
                    debug!(src_id = lc.src_id, dst_id = lc.dst_id, "late entry via embedded LC");
                    self.rf_lc = Some(lc);
                }
            }
        }

        let Some(lc) = self.rf_lc else { return false };
        self.forward(fac, body, false, false, self.rf_n, &lc);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_DATA, &frame);
        true
    }

    /// Terminator with LC: closes the RF call.
    pub fn process_terminator(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let lc = decode_voice_lc(body).or(self.rf_lc);

        if fac.state.rf_state == RptState::Listening {
            return false;
        }

        if let Some(lc) = lc {
            self.forward(fac, body, true, false, DataType::TerminatorWithLc as u8, &lc);
        }

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_EOT, &frame);

        fac.state.end_rf_call();
        self.reset();
        true
    }

    /// Builds an LC header burst for network-sourced calls.
    pub fn build_header(lc: &LinkControl, body: &mut [u8; FRAME_LENGTH_BYTES]) {
        encode_voice_lc(lc, body);
    }

    fn forward(
        &self,
        fac: &mut Facilities<'_>,
        body: &[u8],
        data_sync: bool,
        voice_sync: bool,
        dt_or_seq: u8,
        lc: &LinkControl,
    ) {
        let flags = net_flags(
            fac.slot_no,
            lc.flco == Flco::Private,
            data_sync,
            voice_sync,
            dt_or_seq,
        );

        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_DMR_DATA,
            meta: FrameMeta {
                seq: fac.state.rf_frames as u8,
                src_id: lc.src_id,
                dst_id: lc.dst_id,
                peer_id: fac.site.net_id,
                flags,
                stream_id: fac.state.rf_stream_id,
            },
            payload: body.to_vec(),
        });
    }
}
