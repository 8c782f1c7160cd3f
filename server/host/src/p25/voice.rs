//! P25 voice packet handler: HDU opens the call, LDU1 carries the RS
//! protected link control, LDU2 the crypto sync, TDU/TDULC terminate.

use dv_core::wire;
use dv_edac::bits::{get_u24, set_u24};
use dv_edac::rs;
use dv_net::frame_queue::FrameMeta;
use dv_proto::p25::tdulc::Tdulc;
use dv_proto::p25::{Duid, LC_GROUP, LC_PRIVATE};
use tracing::{debug, info};

use super::{Facilities, PAYLOAD_OFFSET};
use crate::state::{RfGuard, RptState};
use crate::{new_stream_id, TaggedFrame};

/// Byte offset of the RS(24,12) LC codeword within an LDU1.
const LDU1_LC_OFFSET: usize = PAYLOAD_OFFSET;
const LDU1_LC_LENGTH: usize = 18;

/// HDU payload offsets (after sync + NID): MI, algorithm, key id, TGID.
const HDU_MI_OFFSET: usize = PAYLOAD_OFFSET;
const HDU_ALGID_OFFSET: usize = PAYLOAD_OFFSET + 9;
const HDU_KID_OFFSET: usize = PAYLOAD_OFFSET + 10;
const HDU_TGID_OFFSET: usize = PAYLOAD_OFFSET + 12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceLc {
    pub lco: u8,
    pub mfid: u8,
    pub group: bool,
    pub emergency: bool,
    pub src_id: u32,
    pub dst_id: u32,
}

impl VoiceLc {
    /// Unwinds the RS(24,12) codeword carrying the 9-byte LC.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut rs_buf = [0u8; LDU1_LC_LENGTH];
        rs_buf.copy_from_slice(&data[..LDU1_LC_LENGTH]);
        rs::decode_241213(&mut rs_buf).ok()?;

        let lco = rs_buf[0] & 0x3F;
        let group = match lco {
            LC_GROUP => true,
            LC_PRIVATE => false,
            _ => return None,
        };

        Some(Self {
            lco,
            mfid: rs_buf[1],
            group,
            emergency: rs_buf[2] & 0x80 != 0,
            dst_id: get_u24(&rs_buf, 3),
            src_id: get_u24(&rs_buf, 6),
        })
    }

    pub fn encode(&self, data: &mut [u8]) {
        let mut rs_buf = [0u8; LDU1_LC_LENGTH];
        rs_buf[0] = self.lco & 0x3F;
        rs_buf[1] = self.mfid;
        rs_buf[2] = (self.emergency as u8) << 7;
        set_u24(self.dst_id, &mut rs_buf, 3);
        set_u24(self.src_id, &mut rs_buf, 6);
        rs::encode_241213(&mut rs_buf);
        data[..LDU1_LC_LENGTH].copy_from_slice(&rs_buf);
    }
}

#[derive(Default)]
pub struct VoicePacket {
    rf_lc: Option<VoiceLc>,
    /// Crypto parameters from the header, echoed in the network stream.
    alg_id: u8,
    key_id: u16,
    mi: [u8; 9],
}

impl VoicePacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.rf_lc = None;
        self.alg_id = 0;
        self.key_id = 0;
        self.mi = [0; 9];
    }

    /// Header data unit: opens the RF call addressed by its TGID.
    pub fn process_hdu(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if body.len() < HDU_TGID_OFFSET + 2 {
            return false;
        }

        let dst_id = u32::from(u16::from_be_bytes([
            body[HDU_TGID_OFFSET],
            body[HDU_TGID_OFFSET + 1],
        ]));

        match fac.state.rf_guard(0, dst_id) {
            RfGuard::Accept => {}
            RfGuard::NetPreempts => {
                fac.state.reset_rf();
                return false;
            }
            RfGuard::VoteCollision => return false,
        }

        if !fac.tg.check(dst_id, 0) {
            fac.state.reject_rf(0, dst_id, "talkgroup denied");
            return false;
        }

        self.mi.copy_from_slice(&body[HDU_MI_OFFSET..HDU_MI_OFFSET + 9]);
        self.alg_id = body[HDU_ALGID_OFFSET];
        self.key_id = u16::from_be_bytes([body[HDU_KID_OFFSET], body[HDU_KID_OFFSET + 1]]);

        let stream_id = new_stream_id();
        fac.state.start_rf_call(RptState::Audio, 0, dst_id, stream_id);

        self.forward(fac, body, Duid::Hdu, 0, dst_id, false);
        fac.write_rf(wire::TAG_HEADER, body);
        true
    }

    /// Logical link data unit 1: the LC settles src/dst and the ACL runs.
    pub fn process_ldu1(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if body.len() < LDU1_LC_OFFSET + LDU1_LC_LENGTH {
            return false;
        }

        let Some(lc) = VoiceLc::decode(&body[LDU1_LC_OFFSET..]) else {
            debug!("LDU1 link control unrecoverable");
            fac.state.rf_errs += 1;
            return false;
        };

        if fac.state.rf_state == RptState::Listening {
            // late entry
            match fac.state.rf_guard(lc.src_id, lc.dst_id) {
                RfGuard::Accept => {}
                RfGuard::NetPreempts => {
                    fac.state.reset_rf();
                    return false;
                }
                RfGuard::VoteCollision => return false,
            }
            let stream_id = new_stream_id();
            fac.state.start_rf_call(RptState::Audio, lc.src_id, lc.dst_id, stream_id);
            info!(src_id = lc.src_id, dst_id = lc.dst_id, "late entry via LDU1");
        }

        if let Err(reason) = fac.validate_rf(lc.src_id, lc.dst_id, lc.group) {
            fac.state.reject_rf(lc.src_id, lc.dst_id, reason);
            return false;
        }

        fac.state.rf_last_src_id = lc.src_id;
        fac.state.rf_last_dst_id = lc.dst_id;
        fac.state.rf_frames += 1;
        fac.state.rf_bits += 1728;
        self.rf_lc = Some(lc);

        self.forward(fac, body, Duid::Ldu1, lc.src_id, lc.dst_id, !lc.group);
        fac.write_rf(wire::TAG_DATA, body);
        true
    }

    /// Logical link data unit 2 (crypto sync + voice).
    pub fn process_ldu2(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if fac.state.rf_state != RptState::Audio {
            return false;
        }

        fac.state.rf_frames += 1;
        fac.state.rf_bits += 1728;

        let (src_id, dst_id, private) = match self.rf_lc {
            Some(lc) => (lc.src_id, lc.dst_id, !lc.group),
            None => (fac.state.rf_last_src_id, fac.state.rf_last_dst_id, false),
        };

        self.forward(fac, body, Duid::Ldu2, src_id, dst_id, private);
        fac.write_rf(wire::TAG_DATA, body);
        true
    }

    /// Simple terminator.
    pub fn process_tdu(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if fac.state.rf_state == RptState::Listening {
            return false;
        }

        let (src_id, dst_id) = (fac.state.rf_last_src_id, fac.state.rf_last_dst_id);
        self.forward(fac, body, Duid::Tdu, src_id, dst_id, false);
        fac.write_rf(wire::TAG_EOT, body);

        fac.state.end_rf_call();
        self.reset();
        true
    }

    /// Terminator with link control.
    pub fn process_tdulc(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        if body.len() >= PAYLOAD_OFFSET + 36 {
            match Tdulc::decode(&body[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 36]) {
                Ok(tdulc) => {
                    let (src, dst) = tdulc.src_dst();
                    debug!(lco = tdulc.lco, src_id = src, dst_id = dst, "TDULC");
                }
                Err(e) => debug!(error = %e, "TDULC link control unrecoverable"),
            }
        }

        self.process_tdu(fac, body)
    }

    fn forward(
        &self,
        fac: &mut Facilities<'_>,
        body: &[u8],
        duid: Duid,
        src_id: u32,
        dst_id: u32,
        private: bool,
    ) {
        let mut flags = duid as u8 & 0x0F;
        if private {
            flags |= wire::FLAG_PRIVATE;
        }

        let mut payload = body.to_vec();

        // LDU1 datagrams carry the legacy trailing crypto sub-header
        if duid == Duid::Ldu1 {
            if payload.len() < wire::P25_LDU1_CRYPTO_OFFSET {
                payload.resize(wire::P25_LDU1_CRYPTO_OFFSET, 0);
            }
            let mut trailer = [0u8; wire::P25_LDU1_CRYPTO_LEN];
            trailer[0] = Duid::Ldu1 as u8;
            trailer[1] = self.alg_id;
            trailer[2..4].copy_from_slice(&self.key_id.to_be_bytes());
            trailer[4..13].copy_from_slice(&self.mi);
            payload.truncate(wire::P25_LDU1_CRYPTO_OFFSET);
            payload.extend_from_slice(&trailer);
        }

        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_P25_DATA,
            meta: FrameMeta {
                seq: fac.state.rf_frames as u8,
                src_id,
                dst_id,
                peer_id: fac.site.net_id,
                flags,
                stream_id: fac.state.rf_stream_id,
            },
            payload,
        });
    }
}
