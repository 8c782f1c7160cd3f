//! NXDN traffic channel handler. Call setup and teardown ride the FACCH1;
//! the vocoder payload is opaque.

use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::nxdn::facch1::Facch1;
use dv_proto::nxdn::lich::{FctChannelType, Lich};
use dv_proto::nxdn::{MESSAGE_TYPE_DCALL_HDR, MESSAGE_TYPE_VCALL};
use tracing::{debug, info};

use super::{Facilities, FACCH1_FIRST_OFFSET, FRAME_LENGTH_BYTES};
use crate::state::{RfGuard, RptState};
use crate::{new_stream_id, TaggedFrame};

/// End-of-transmission marker in the message type field.
const MESSAGE_TYPE_TX_REL: u8 = 0x08;

/// Short call-control summary carried in a traffic FACCH.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct CallHeader {
    message_type: u8,
    call_type: u8,
    src_id: u32,
    dst_id: u32,
}

impl CallHeader {
    fn parse(payload: &[u8]) -> Self {
        Self {
            message_type: payload[0] & 0x3F,
            call_type: (payload[1] >> 5) & 0x07,
            src_id: u32::from(u16::from_be_bytes([payload[2], payload[3]])),
            dst_id: u32::from(u16::from_be_bytes([payload[4], payload[5]])),
        }
    }

    fn group(&self) -> bool {
        // conference and group call types
        self.call_type == 0x01 || self.call_type == 0x00
    }
}

#[derive(Default)]
pub struct VoicePacket {
    active_header: Option<CallHeader>,
}

impl VoicePacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.active_header = None;
    }

    /// Voice traffic burst.
    pub fn process_traffic(&mut self, fac: &mut Facilities<'_>, body: &[u8], lich: Lich) -> bool {
        match lich.fct_type {
            FctChannelType::FacchSacchSf | FctChannelType::Facch2Udch2 => {
                let Ok(facch) = Facch1::decode(body, FACCH1_FIRST_OFFSET) else {
                    fac.state.rf_errs += 1;
                    return false;
                };
                self.process_facch(fac, body, facch, false)
            }
            _ => self.process_voice_frame(fac, body),
        }
    }

    /// Data traffic burst (RDCH).
    pub fn process_data(&mut self, fac: &mut Facilities<'_>, body: &[u8], _lich: Lich) -> bool {
        let Ok(facch) = Facch1::decode(body, FACCH1_FIRST_OFFSET) else {
            fac.state.rf_errs += 1;
            return false;
        };
        self.process_facch(fac, body, facch, true)
    }

    fn process_facch(
        &mut self,
        fac: &mut Facilities<'_>,
        body: &[u8],
        facch: Facch1,
        data_call: bool,
    ) -> bool {
        let header = CallHeader::parse(facch.payload());

        match header.message_type {
            MESSAGE_TYPE_VCALL | MESSAGE_TYPE_DCALL_HDR => {
                if fac.state.rf_state == RptState::Listening {
                    match fac.state.rf_guard(header.src_id, header.dst_id) {
                        RfGuard::Accept => {}
                        RfGuard::NetPreempts => {
                            fac.state.reset_rf();
                            return false;
                        }
                        RfGuard::VoteCollision => return false,
                    }

                    if let Err(reason) =
                        fac.validate_rf(header.src_id, header.dst_id, header.group())
                    {
                        fac.state.reject_rf(header.src_id, header.dst_id, reason);
                        return false;
                    }

                    let is_data = data_call || header.message_type == MESSAGE_TYPE_DCALL_HDR;
                    let state = if is_data { RptState::Data } else { RptState::Audio };
                    fac.state
                        .start_rf_call(state, header.src_id, header.dst_id, new_stream_id());
                    self.active_header = Some(header);
                }

                fac.state.rf_frames += 1;
                self.forward(fac, body, &header, false);

                let mut frame = [0u8; FRAME_LENGTH_BYTES];
                frame.copy_from_slice(body);
                fac.write_rf(wire::TAG_HEADER, &frame);
                true
            }
            MESSAGE_TYPE_TX_REL => {
                if fac.state.rf_state == RptState::Listening {
                    return false;
                }

                info!(
                    src_id = fac.state.rf_last_src_id,
                    dst_id = fac.state.rf_last_dst_id,
                    "NXDN transmission release"
                );

                let header = self.active_header.unwrap_or(CallHeader {
                    message_type: MESSAGE_TYPE_TX_REL,
                    call_type: 0,
                    src_id: fac.state.rf_last_src_id,
                    dst_id: fac.state.rf_last_dst_id,
                });
                self.forward(fac, body, &header, true);

                let mut frame = [0u8; FRAME_LENGTH_BYTES];
                frame.copy_from_slice(body);
                fac.write_rf(wire::TAG_EOT, &frame);

                fac.state.end_rf_call();
                self.reset();
                true
            }
            other => {
                debug!(message_type = other, "unhandled FACCH message on traffic channel");
                false
            }
        }
    }

    fn process_voice_frame(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if fac.state.rf_state != RptState::Audio {
            return false;
        }

        fac.state.rf_frames += 1;
        fac.state.rf_bits += 384;

        let Some(header) = self.active_header else { return false };
        self.forward(fac, body, &header, false);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_DATA, &frame);
        true
    }

    fn forward(&self, fac: &mut Facilities<'_>, body: &[u8], header: &CallHeader, release: bool) {
        let mut flags = if release { 0x08 } else { 0x00 };
        if !header.group() {
            flags |= wire::FLAG_PRIVATE;
        }
        if header.message_type == MESSAGE_TYPE_DCALL_HDR {
            flags |= wire::FLAG_DATA_SYNC;
        }

        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_NXDN_DATA,
            meta: FrameMeta {
                seq: fac.state.rf_frames as u8,
                src_id: header.src_id,
                dst_id: header.dst_id,
                peer_id: fac.site.net_id,
                flags,
                stream_id: fac.state.rf_stream_id,
            },
            payload: body.to_vec(),
        });
    }
}
