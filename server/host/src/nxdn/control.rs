//! NXDN control channel handler: inbound registration and call requests on
//! the CAC, plus the outbound RCCH broadcast rotation.

use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::nxdn::facch1::Facch1;
use dv_proto::nxdn::lich::{FctChannelType, Lich, RfChannelType};
use dv_proto::nxdn::rcch::{Rcch, RcchKind};
use dv_proto::nxdn::*;
use tracing::{debug, info};

use super::{
    insert_fsw, write_lich, Facilities, FACCH1_FIRST_OFFSET, FACCH1_SECOND_OFFSET,
    FRAME_LENGTH_BYTES,
};
use crate::TaggedFrame;

/// Control channel rotation; one message per packet interval tick.
#[derive(Clone, Copy, Debug)]
enum CcBlock {
    SiteInfo,
    Idle,
    DstIdInfo,
}

const CC_ROTATION: [CcBlock; 4] = [CcBlock::SiteInfo, CcBlock::Idle, CcBlock::Idle, CcBlock::DstIdInfo];

#[derive(Default)]
pub struct ControlPacket {
    cc_seq: usize,
}

impl ControlPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one burst on the common access channel: both FACCH fields
    /// concatenate into the 22-byte layer-3 buffer.
    pub fn process_cac(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let first = Facch1::decode(body, FACCH1_FIRST_OFFSET);
        let second = Facch1::decode(body, FACCH1_SECOND_OFFSET);

        let (Ok(first), Ok(second)) = (first, second) else {
            fac.state.rf_errs += 1;
            return false;
        };

        let mut rcch_buf = [0u8; RCCH_LC_LENGTH_BYTES];
        rcch_buf[..10].copy_from_slice(first.payload());
        rcch_buf[10..20].copy_from_slice(second.payload());

        let rcch = match Rcch::decode(&rcch_buf) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "RCCH rejected");
                return false;
            }
        };

        info!(
            message_type = rcch.message_type,
            src_id = rcch.src_id,
            dst_id = rcch.dst_id,
            "RCCH received"
        );

        match rcch.kind {
            RcchKind::Reg { .. } => {
                let accepted = fac.rid.check(rcch.src_id);
                if accepted {
                    fac.affiliations.unit_reg(rcch.src_id, 0);
                }
                self.send_rcch(
                    fac,
                    &Rcch {
                        message_type: MESSAGE_TYPE_REG,
                        src_id: rcch.src_id,
                        dst_id: rcch.dst_id,
                        kind: RcchKind::Reg {
                            cause: if accepted { CAUSE_MM_REG_ACCEPTED } else { CAUSE_MM_REG_REFUSED },
                        },
                    },
                );
            }
            RcchKind::GrpReg { .. } => {
                let accepted = fac.rid.check(rcch.src_id) && fac.tg.check(rcch.dst_id, 0);
                if accepted {
                    fac.affiliations.group_aff(rcch.src_id, rcch.dst_id);
                }
                self.send_rcch(
                    fac,
                    &Rcch {
                        message_type: MESSAGE_TYPE_GRP_REG,
                        src_id: rcch.src_id,
                        dst_id: rcch.dst_id,
                        kind: RcchKind::GrpReg {
                            cause: if accepted { CAUSE_MM_REG_ACCEPTED } else { CAUSE_MM_REG_REFUSED },
                        },
                    },
                );
            }
            RcchKind::VCall { call_type, .. } => {
                self.handle_call_request(fac, &rcch, call_type);
            }
            _ => {}
        }

        // forward the control traffic to the network
        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_NXDN_DATA,
            meta: FrameMeta {
                seq: 0,
                src_id: rcch.src_id,
                dst_id: rcch.dst_id,
                peer_id: fac.site.net_id,
                flags: wire::FLAG_DATA_SYNC,
                stream_id: crate::new_stream_id(),
            },
            payload: body.to_vec(),
        });

        true
    }

    fn handle_call_request(&mut self, fac: &mut Facilities<'_>, rcch: &Rcch, call_type: u8) {
        if let Err(reason) = fac.validate_rf(rcch.src_id, rcch.dst_id, true) {
            debug!(src_id = rcch.src_id, reason, "call request denied");
            self.send_rcch(
                fac,
                &Rcch {
                    message_type: MESSAGE_TYPE_VCALL_CONN,
                    src_id: rcch.src_id,
                    dst_id: rcch.dst_id,
                    kind: RcchKind::VCallConn { call_type, cause: CAUSE_MM_REG_REFUSED },
                },
            );
            return;
        }

        match fac
            .affiliations
            .grant_ch(rcch.dst_id, rcch.src_id, fac.config.grant_timeout)
        {
            Some((channel_no, _)) => {
                self.send_rcch(
                    fac,
                    &Rcch {
                        message_type: MESSAGE_TYPE_VCALL,
                        src_id: rcch.src_id,
                        dst_id: rcch.dst_id,
                        kind: RcchKind::VCall {
                            call_type,
                            channel_no: (channel_no & 0x3FF) as u16,
                        },
                    },
                );
            }
            None => {
                self.send_rcch(
                    fac,
                    &Rcch {
                        message_type: MESSAGE_TYPE_VCALL_CONN,
                        src_id: rcch.src_id,
                        dst_id: rcch.dst_id,
                        kind: RcchKind::VCallConn { call_type, cause: CAUSE_MM_REG_REFUSED },
                    },
                );
            }
        }
    }

    /// Emits the next control channel message.
    pub fn tick_cc(&mut self, fac: &mut Facilities<'_>) {
        let block = CC_ROTATION[self.cc_seq % CC_ROTATION.len()];
        self.cc_seq = self.cc_seq.wrapping_add(1);

        let rcch = match block {
            CcBlock::SiteInfo => Rcch {
                message_type: MESSAGE_TYPE_SITE_INFO,
                src_id: 0,
                dst_id: 0,
                kind: RcchKind::site_info_defaults(),
            },
            CcBlock::Idle => Rcch {
                message_type: MESSAGE_TYPE_IDLE,
                src_id: 0,
                dst_id: 0,
                kind: RcchKind::Idle,
            },
            CcBlock::DstIdInfo => Rcch {
                message_type: MESSAGE_TYPE_DST_ID_INFO,
                src_id: 0,
                dst_id: fac.site.channel_no,
                kind: RcchKind::DstIdInfo,
            },
        };

        self.send_rcch(fac, &rcch);
    }

    /// Builds one CAC burst carrying the RCCH message across both FACCH
    /// fields.
    fn send_rcch(&mut self, fac: &mut Facilities<'_>, rcch: &Rcch) {
        let mut rcch_buf = [0u8; RCCH_LC_LENGTH_BYTES];
        rcch.encode(&mut rcch_buf, fac.site);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        insert_fsw(&mut frame);
        write_lich(
            &mut frame,
            Lich {
                rf_type: RfChannelType::Rcch,
                fct_type: FctChannelType::Facch2Udch2,
                option: 0,
                outbound: true,
            },
        );

        let mut first = Facch1::default();
        first.set_payload(&rcch_buf[..10]);
        first.encode(&mut frame, FACCH1_FIRST_OFFSET);

        let mut second = Facch1::default();
        second.set_payload(&rcch_buf[10..20]);
        second.encode(&mut frame, FACCH1_SECOND_OFFSET);

        fac.write_rf(wire::TAG_DATA, &frame);
    }
}
