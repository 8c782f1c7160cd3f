//! P25 trunking packet handler: inbound TSDU service requests and the
//! control channel broadcast rotation.

use chrono::Utc;
use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::p25::tsbk::{Tsbk, TsbkKind, TSBK_FEC_LENGTH_BYTES};
use dv_proto::p25::*;
use tracing::{debug, info};

use super::{insert_sync, Facilities, PAYLOAD_OFFSET, TSDU_FRAME_LENGTH_BYTES};
use crate::TaggedFrame;

/// Control channel rotation; one block per packet interval tick.
#[derive(Clone, Copy, Debug)]
enum CcBlock {
    NetStsBcast,
    RfssStsBcast,
    AdjStsBcast,
    SyncBcast,
    TimeDateAnn,
    IdenUp,
}

const CC_ROTATION: [CcBlock; 8] = [
    CcBlock::NetStsBcast,
    CcBlock::RfssStsBcast,
    CcBlock::AdjStsBcast,
    CcBlock::SyncBcast,
    CcBlock::NetStsBcast,
    CcBlock::RfssStsBcast,
    CcBlock::TimeDateAnn,
    CcBlock::IdenUp,
];

pub struct TrunkPacket {
    warn_crc: bool,
    cc_seq: usize,
    microslot_count: u16,
}

impl Default for TrunkPacket {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TrunkPacket {
    pub fn new(warn_crc: bool) -> Self {
        Self {
            warn_crc,
            cc_seq: 0,
            microslot_count: 0,
        }
    }

    /// Handles one inbound trunking signalling data unit.
    pub fn process_tsdu(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if body.len() < PAYLOAD_OFFSET + TSBK_FEC_LENGTH_BYTES {
            return false;
        }

        let tsbk = match Tsbk::decode(&body[PAYLOAD_OFFSET..], false, self.warn_crc) {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "TSBK rejected");
                fac.state.rf_errs += 1;
                return false;
            }
        };

        info!(lco = tsbk.lco, mfid = tsbk.mfid, "TSBK received");

        match tsbk.kind {
            TsbkKind::GrpVchGrant { dst_id, src_id, .. } => {
                self.handle_grant_request(fac, src_id, dst_id, true);
            }
            TsbkKind::UuVchGrant { dst_id, src_id, .. } => {
                self.handle_grant_request(fac, src_id, dst_id, false);
            }
            TsbkKind::SndcpChGrant { dst_id, .. } => {
                self.handle_grant_request(fac, dst_id, dst_id, false);
            }
            _ => {
                // opcodes with no site-side action repeat to the network
            }
        }

        // forward the raw TSBK form on the back-haul
        let mut raw = [0u8; 12];
        if tsbk.encode(&mut raw, fac.site, true).is_ok() {
            fac.sink.send_frame(TaggedFrame {
                tag: wire::TAG_P25_DATA,
                meta: FrameMeta {
                    seq: 0,
                    src_id: 0,
                    dst_id: 0,
                    peer_id: fac.site.net_id,
                    flags: Duid::Tsdu as u8,
                    stream_id: crate::new_stream_id(),
                },
                payload: raw.to_vec(),
            });
        }

        true
    }

    fn handle_grant_request(&mut self, fac: &mut Facilities<'_>, src_id: u32, dst_id: u32, group: bool) {
        if let Err(reason) = fac.validate_rf(src_id, dst_id, group) {
            debug!(src_id, dst_id, reason, "grant request denied");
            self.send_tsbk(
                fac,
                &Tsbk {
                    lco: TSBK_OSP_DENY_RSP,
                    mfid: MFID_STANDARD,
                    last_block: true,
                    kind: TsbkKind::DenyRsp { service: 0x44, reason: 0x10, dst_id, src_id },
                },
            );
            return;
        }

        match fac.affiliations.grant_ch(dst_id, src_id, fac.config.grant_timeout) {
            Some((channel_no, _slot)) => {
                self.send_tsbk(
                    fac,
                    &Tsbk {
                        lco: TSBK_IOSP_GRP_VCH,
                        mfid: MFID_STANDARD,
                        last_block: true,
                        kind: TsbkKind::GrpVchGrant {
                            service_options: 0,
                            channel_id: fac.site.channel_id,
                            channel_no: channel_no as u16,
                            dst_id,
                            src_id,
                        },
                    },
                );
            }
            None => {
                debug!(dst_id, "no voice channel available, denying");
                self.send_tsbk(
                    fac,
                    &Tsbk {
                        lco: TSBK_OSP_DENY_RSP,
                        mfid: MFID_STANDARD,
                        last_block: true,
                        kind: TsbkKind::DenyRsp { service: 0x44, reason: 0x40, dst_id, src_id },
                    },
                );
            }
        }
    }

    /// Emits the next control channel block; grant decisions interleave
    /// ahead of the rotation via `send_tsbk`.
    pub fn tick_cc(&mut self, fac: &mut Facilities<'_>) {
        let block = CC_ROTATION[self.cc_seq % CC_ROTATION.len()];
        self.cc_seq = self.cc_seq.wrapping_add(1);
        self.microslot_count = (self.microslot_count + 25) % 8000;

        let tsbk = match block {
            CcBlock::NetStsBcast => Tsbk {
                lco: TSBK_OSP_NET_STS_BCAST,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::NetStsBcast { lra: 0 },
            },
            CcBlock::RfssStsBcast => Tsbk {
                lco: TSBK_OSP_RFSS_STS_BCAST,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::RfssStsBcast { lra: 0 },
            },
            CcBlock::AdjStsBcast => Tsbk {
                lco: TSBK_OSP_ADJ_STS_BCAST,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::AdjStsBcast {
                    lra: 0,
                    cfva: 0xF,
                    system_id: (fac.site.sys_id & 0xFFF) as u16,
                    rfss_id: fac.site.rfss_id,
                    site_id: fac.site.site_id,
                    channel_id: fac.site.channel_id,
                    channel_no: (fac.site.channel_no & 0xFFF) as u16,
                    service_class: fac.site.service_class,
                },
            },
            CcBlock::SyncBcast => Tsbk {
                lco: TSBK_OSP_SYNC_BCAST,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::SyncBcast {
                    ts: Utc::now(),
                    microslot_count: self.microslot_count,
                },
            },
            CcBlock::TimeDateAnn => Tsbk {
                lco: TSBK_OSP_TIME_DATE_ANN,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::TimeDateAnn { ts: Utc::now() },
            },
            CcBlock::IdenUp => Tsbk {
                lco: TSBK_OSP_IDEN_UP,
                mfid: MFID_STANDARD,
                last_block: true,
                kind: TsbkKind::IdenUp,
            },
        };

        self.send_tsbk(fac, &tsbk);
    }

    /// Builds and queues a TSDU frame with one on-air TSBK.
    pub fn send_tsbk(&mut self, fac: &mut Facilities<'_>, tsbk: &Tsbk) {
        let mut frame = vec![0u8; TSDU_FRAME_LENGTH_BYTES];
        insert_sync(&mut frame);
        fac.nid.encode(&mut frame, Duid::Tsdu, super::NID_BIT_OFFSET);

        if tsbk
            .encode(&mut frame[PAYLOAD_OFFSET..], fac.site, false)
            .is_err()
        {
            // identity blocks with zero fields skip emission entirely
            return;
        }

        fac.write_rf(wire::TAG_DATA, &frame);
    }
}
