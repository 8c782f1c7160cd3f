//! DMR slot control signalling: inbound CSBK handling (service requests,
//! registration, grants) and the TSCC broadcast rotation.

use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::dmr::csbk::{
    Csbk, CsbkCarriage, CsbkKind, CSBKO_ACK_RSP, CSBKO_BROADCAST, CSBKO_MAINT, CSBKO_NACK_RSP,
    CSBKO_P_GRANT, FID_ETSI,
};
use dv_proto::dmr::{DataType, FRAME_LENGTH_BYTES};
use tracing::{debug, info};

use super::slot::Facilities;
use super::{insert_sync, net_flags, SlotType, SyncKind};
use crate::TaggedFrame;

/// Aloha mask for the maintenance block.
const ALOHA_MASK: u8 = 0x2A;

/// Broadcast announcement types.
const ANN_TYPE_SITE_PARMS: u8 = 0x00;
const ANN_TYPE_ANN_WD_TSCC: u8 = 0x03;

/// TSCC rotation order; one block per packet interval tick.
const CC_ROTATION: [CcBlock; 4] = [
    CcBlock::Aloha,
    CcBlock::SiteParms,
    CcBlock::AnnWdTscc,
    CcBlock::Aloha,
];

#[derive(Clone, Copy, Debug)]
enum CcBlock {
    Aloha,
    SiteParms,
    AnnWdTscc,
}

#[derive(Default)]
pub struct ControlSignaling {
    cc_seq: usize,
}

impl ControlSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one inbound CSBK burst.
    pub fn process_csbk(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let csbk = match Csbk::decode(body, CsbkCarriage::Csbk) {
            Ok(c) => c,
            Err(e) => {
                debug!(slot = fac.slot_no, error = %e, "CSBK rejected");
                fac.state.rf_errs += 1;
                return false;
            }
        };

        if !fac.rid.check(csbk.src_id) {
            fac.state.reject_rf(csbk.src_id, csbk.dst_id, "source radio denied");
            return false;
        }

        info!(
            slot = fac.slot_no,
            csbko = csbk.csbko,
            src_id = csbk.src_id,
            dst_id = csbk.dst_id,
            "CSBK received"
        );

        match &csbk.kind {
            CsbkKind::Rand { service_options } => {
                self.handle_service_request(fac, &csbk, *service_options);
            }
            CsbkKind::UuVReq => {
                // answer-response handshake is radio-to-radio; repeat it
            }
            CsbkKind::CallAlert | CsbkKind::UuAnsRsp { .. } | CsbkKind::ExtFnct { .. } => {}
            CsbkKind::Preamble { .. } => {
                // data call announcement; the data handler owns what follows
            }
            _ => {}
        }

        // repeat the burst to RF and forward it to the network
        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_DATA, &frame);

        let flags = net_flags(fac.slot_no, false, true, false, DataType::Csbk as u8);
        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_DMR_DATA,
            meta: FrameMeta {
                seq: 0,
                src_id: csbk.src_id,
                dst_id: csbk.dst_id,
                peer_id: fac.site.net_id,
                flags,
                stream_id: crate::new_stream_id(),
            },
            payload: body.to_vec(),
        });

        true
    }

    /// Channel-grant path for an ETSI random access service request.
    fn handle_service_request(&mut self, fac: &mut Facilities<'_>, csbk: &Csbk, service_options: u8) {
        let group = service_options & 0x80 == 0;

        if group && !fac.tg.check(csbk.dst_id, fac.slot_no) {
            fac.state.reject_rf(csbk.src_id, csbk.dst_id, "talkgroup denied");
            self.send_csbk(
                fac,
                &Csbk {
                    last_block: true,
                    csbko: CSBKO_NACK_RSP,
                    fid: FID_ETSI,
                    src_id: fac.site.net_id,
                    dst_id: csbk.src_id,
                    kind: CsbkKind::NackRsp { service_type: service_options, reason: 0x27 },
                },
            );
            return;
        }

        match fac
            .affiliations
            .grant_ch(csbk.dst_id, csbk.src_id, fac.config.grant_timeout)
        {
            Some((channel_no, slot)) => {
                self.send_csbk(
                    fac,
                    &Csbk {
                        last_block: true,
                        csbko: CSBKO_P_GRANT,
                        fid: FID_ETSI,
                        src_id: csbk.src_id,
                        dst_id: csbk.dst_id,
                        kind: CsbkKind::PGrant { channel_no, slot },
                    },
                );
            }
            None => {
                debug!(dst_id = csbk.dst_id, "no grant available, sending NACK");
                self.send_csbk(
                    fac,
                    &Csbk {
                        last_block: true,
                        csbko: CSBKO_NACK_RSP,
                        fid: FID_ETSI,
                        src_id: fac.site.net_id,
                        dst_id: csbk.src_id,
                        kind: CsbkKind::NackRsp { service_type: service_options, reason: 0x28 },
                    },
                );
            }
        }
    }

    /// Emits the next TSCC broadcast block; called per packet interval.
    pub fn tick_cc(&mut self, fac: &mut Facilities<'_>) {
        let block = CC_ROTATION[self.cc_seq % CC_ROTATION.len()];
        self.cc_seq = self.cc_seq.wrapping_add(1);

        let csbk = match block {
            CcBlock::Aloha => Csbk {
                last_block: true,
                csbko: CSBKO_MAINT,
                fid: FID_ETSI,
                src_id: fac.site.net_id,
                dst_id: 0,
                kind: CsbkKind::Maint { kind: ALOHA_MASK },
            },
            CcBlock::SiteParms => Csbk {
                last_block: true,
                csbko: CSBKO_BROADCAST,
                fid: FID_ETSI,
                src_id: fac.site.net_id,
                dst_id: 0,
                kind: CsbkKind::Broadcast {
                    announce_type: ANN_TYPE_SITE_PARMS,
                    system_id: (fac.site.sys_id & 0x7FF) as u16,
                },
            },
            CcBlock::AnnWdTscc => Csbk {
                last_block: true,
                csbko: CSBKO_BROADCAST,
                fid: FID_ETSI,
                src_id: fac.site.net_id,
                dst_id: 0,
                kind: CsbkKind::Broadcast {
                    announce_type: ANN_TYPE_ANN_WD_TSCC,
                    system_id: (fac.site.sys_id & 0x7FF) as u16,
                },
            },
        };

        self.send_csbk(fac, &csbk);
    }

    /// Acknowledges a unit registration on the control channel.
    pub fn send_reg_ack(&mut self, fac: &mut Facilities<'_>, src_id: u32) {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_ACK_RSP,
            fid: FID_ETSI,
            src_id: fac.site.net_id,
            dst_id: src_id,
            kind: CsbkKind::AckRsp { service_type: 0x20, response: 0x00 },
        };
        self.send_csbk(fac, &csbk);
    }

    /// Builds and queues one CSBK burst for transmission.
    fn send_csbk(&mut self, fac: &mut Facilities<'_>, csbk: &Csbk) {
        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        csbk.encode(&mut frame, CsbkCarriage::Csbk);

        SlotType {
            color_code: fac.color_code,
            data_type: Some(DataType::Csbk),
        }
        .encode(&mut frame);
        insert_sync(&mut frame, SyncKind::Data);

        fac.write_rf(wire::TAG_DATA, &frame);
    }
}
