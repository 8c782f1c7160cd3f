//! DMR control signalling block factory. CSBKs ride BPTC(196,96) with a
//! data-type-specific XOR mask over the CCITT-162 trailer; the factory
//! keys on CSBKO + FID and returns a tagged variant.

use dv_edac::bits::{get_u24, set_u24};
use dv_edac::{bptc, crc};
use tracing::{debug, error};

use super::{CSBK_CRC_MASK, CSBK_MBC_CRC_MASK};
use crate::{ProtoError, ProtoResult};

pub const CSBK_LENGTH_BYTES: usize = 12;

/// Feature set IDs.
pub const FID_ETSI: u8 = 0x00;
pub const FID_DMRA: u8 = 0x10;

/// CSBK opcodes.
pub const CSBKO_UU_V_REQ: u8 = 0x04;
pub const CSBKO_UU_ANS_RSP: u8 = 0x05;
pub const CSBKO_RAND: u8 = 0x1F; // ETSI; DMRA reuses it for Call Alert
pub const CSBKO_ACK_RSP: u8 = 0x20;
pub const CSBKO_EXT_FNCT: u8 = 0x24;
pub const CSBKO_NACK_RSP: u8 = 0x26;
pub const CSBKO_BROADCAST: u8 = 0x28;
pub const CSBKO_MAINT: u8 = 0x2A;
pub const CSBKO_P_GRANT: u8 = 0x30;
pub const CSBKO_BSDWNACT: u8 = 0x38;
pub const CSBKO_PRECCSBK: u8 = 0x3D;

/// Which CRC mask a burst uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsbkCarriage {
    Csbk,
    MbcHeader,
}

impl CsbkCarriage {
    fn mask(self) -> [u8; 2] {
        match self {
            CsbkCarriage::Csbk => CSBK_CRC_MASK,
            CsbkCarriage::MbcHeader => CSBK_MBC_CRC_MASK,
        }
    }
}

/// Decoded per-opcode payloads. Addressing common to most arms lives in
/// [`Csbk`] itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CsbkKind {
    /// BS outbound activation.
    BsDwnAct,
    /// Unit-to-unit voice service request.
    UuVReq,
    /// Unit-to-unit answer response.
    UuAnsRsp { response: u8 },
    /// Preamble CSBK announcing `blocks_to_follow` further blocks.
    Preamble { data_content: bool, blocks_to_follow: u8 },
    /// ETSI random access service request.
    Rand { service_options: u8 },
    /// DMRA call alert.
    CallAlert,
    /// Extended function (DMRA).
    ExtFnct { function: u16 },
    /// Negative acknowledgement.
    NackRsp { service_type: u8, reason: u8 },
    /// Acknowledgement.
    AckRsp { service_type: u8, response: u8 },
    /// TSCC broadcast announcement.
    Broadcast { announce_type: u8, system_id: u16 },
    /// Aloha / maintenance.
    Maint { kind: u8 },
    /// Private voice channel grant.
    PGrant { channel_no: u32, slot: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Csbk {
    pub last_block: bool,
    pub csbko: u8,
    pub fid: u8,
    pub src_id: u32,
    pub dst_id: u32,
    pub kind: CsbkKind,
}

impl Csbk {
    /// Unwinds the BPTC carriage and the CRC mask, then dispatches on
    /// CSBKO + FID.
    pub fn decode(data: &[u8], carriage: CsbkCarriage) -> ProtoResult<Self> {
        let mut csbk = [0u8; CSBK_LENGTH_BYTES];
        bptc::decode(data, &mut csbk);

        let mask = carriage.mask();
        csbk[10] ^= mask[0];
        csbk[11] ^= mask[1];

        if !crc::check_ccitt162(&csbk) {
            debug!("CSBK failed CRC CCITT-162 check");
            return Err(ProtoError::CrcMismatch);
        }

        csbk[10] ^= mask[0];
        csbk[11] ^= mask[1];

        Self::from_bytes(&csbk)
    }

    /// Parses the 12 unmasked CSBK bytes.
    pub fn from_bytes(csbk: &[u8]) -> ProtoResult<Self> {
        let csbko = csbk[0] & 0x3F;
        let last_block = csbk[0] & 0x80 != 0;
        let fid = csbk[1];

        let dst_id = get_u24(csbk, 4);
        let src_id = get_u24(csbk, 7);

        let kind = match (csbko, fid) {
            (CSBKO_BSDWNACT, _) => CsbkKind::BsDwnAct,
            (CSBKO_UU_V_REQ, _) => CsbkKind::UuVReq,
            (CSBKO_UU_ANS_RSP, _) => CsbkKind::UuAnsRsp { response: csbk[3] },
            (CSBKO_PRECCSBK, _) => CsbkKind::Preamble {
                data_content: csbk[2] & 0x80 != 0,
                blocks_to_follow: csbk[3],
            },
            (CSBKO_RAND, FID_ETSI) => CsbkKind::Rand { service_options: csbk[2] },
            (CSBKO_RAND, FID_DMRA) => CsbkKind::CallAlert,
            (CSBKO_EXT_FNCT, _) => CsbkKind::ExtFnct {
                function: u16::from_be_bytes([csbk[2], csbk[3]]),
            },
            (CSBKO_NACK_RSP, _) => CsbkKind::NackRsp {
                service_type: csbk[2],
                reason: csbk[3],
            },
            (CSBKO_ACK_RSP, _) => CsbkKind::AckRsp {
                service_type: csbk[2],
                response: csbk[3],
            },
            (CSBKO_BROADCAST, _) => CsbkKind::Broadcast {
                announce_type: csbk[2] >> 3,
                system_id: u16::from_be_bytes([csbk[2], csbk[3]]) & 0x07FF,
            },
            (CSBKO_MAINT, _) => CsbkKind::Maint { kind: csbk[2] },
            (CSBKO_P_GRANT, _) => CsbkKind::PGrant {
                channel_no: u32::from(csbk[2]) << 4 | u32::from(csbk[3] >> 4),
                slot: (csbk[3] >> 3) & 0x01,
            },
            _ => {
                debug!(csbko, fid, "unknown CSBKO/FID combination");
                return Err(ProtoError::UnknownOpcode { opcode: csbko, mfid: fid });
            }
        };

        Ok(Self {
            last_block,
            csbko,
            fid,
            src_id,
            dst_id,
            kind,
        })
    }

    /// Produces the 12 unmasked CSBK bytes (no CRC trailer yet).
    pub fn to_bytes(&self) -> [u8; CSBK_LENGTH_BYTES] {
        let mut csbk = [0u8; CSBK_LENGTH_BYTES];

        csbk[0] = self.csbko & 0x3F;
        if self.last_block {
            csbk[0] |= 0x80;
        }
        csbk[1] = self.fid;

        match &self.kind {
            CsbkKind::BsDwnAct | CsbkKind::UuVReq | CsbkKind::CallAlert => {}
            CsbkKind::UuAnsRsp { response } => csbk[3] = *response,
            CsbkKind::Preamble { data_content, blocks_to_follow } => {
                csbk[2] = (*data_content as u8) << 7;
                csbk[3] = *blocks_to_follow;
            }
            CsbkKind::Rand { service_options } => csbk[2] = *service_options,
            CsbkKind::ExtFnct { function } => {
                csbk[2..4].copy_from_slice(&function.to_be_bytes());
            }
            CsbkKind::NackRsp { service_type, reason } => {
                csbk[2] = *service_type;
                csbk[3] = *reason;
            }
            CsbkKind::AckRsp { service_type, response } => {
                csbk[2] = *service_type;
                csbk[3] = *response;
            }
            CsbkKind::Broadcast { announce_type, system_id } => {
                let word = (u16::from(*announce_type) << 11) | (system_id & 0x07FF);
                csbk[2..4].copy_from_slice(&word.to_be_bytes());
            }
            CsbkKind::Maint { kind } => csbk[2] = *kind,
            CsbkKind::PGrant { channel_no, slot } => {
                csbk[2] = (channel_no >> 4) as u8;
                csbk[3] = ((channel_no & 0x0F) << 4) as u8 | (slot & 0x01) << 3;
            }
        }

        set_u24(self.dst_id, &mut csbk, 4);
        set_u24(self.src_id, &mut csbk, 7);
        csbk
    }

    /// Encodes into a BPTC burst, applying the carriage CRC mask.
    pub fn encode(&self, data: &mut [u8], carriage: CsbkCarriage) {
        let mut csbk = self.to_bytes();

        let mask = carriage.mask();
        csbk[10] ^= mask[0];
        csbk[11] ^= mask[1];
        crc::add_ccitt162(&mut csbk);
        csbk[10] ^= mask[0];
        csbk[11] ^= mask[1];

        bptc::encode(&csbk, data);
    }
}

/// Verifies and re-encodes a CSBK burst without interpreting it, used when
/// repeating traffic between RF and network.
pub fn regenerate(data: &mut [u8], carriage: CsbkCarriage) -> bool {
    let mut csbk = [0u8; CSBK_LENGTH_BYTES];
    bptc::decode(data, &mut csbk);

    let mask = carriage.mask();
    csbk[10] ^= mask[0];
    csbk[11] ^= mask[1];

    if !crc::check_ccitt162(&csbk) {
        error!("CSBK regenerate failed CRC CCITT-162 check");
        return false;
    }

    crc::add_ccitt162(&mut csbk);
    csbk[10] ^= mask[0];
    csbk[11] ^= mask[1];

    bptc::encode(&csbk, data);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_rsp_wire_shape() {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_ACK_RSP,
            fid: FID_ETSI,
            src_id: 0x123456,
            dst_id: 0x789ABC,
            kind: CsbkKind::AckRsp { service_type: 0x20, response: 0x00 },
        };

        let bytes = csbk.to_bytes();
        assert_eq!(bytes[0], 0xA0);
        assert_eq!(bytes[1], 0x00);

        // after masking, the trailer must satisfy the CCITT-162 check
        let mut masked = bytes;
        masked[10] ^= CSBK_CRC_MASK[0];
        masked[11] ^= CSBK_CRC_MASK[1];
        crc::add_ccitt162(&mut masked);
        assert!(crc::check_ccitt162(&masked));
    }

    #[test]
    fn burst_round_trip() {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_PRECCSBK,
            fid: FID_ETSI,
            src_id: 0x000001,
            dst_id: 0x0000C8,
            kind: CsbkKind::Preamble { data_content: true, blocks_to_follow: 4 },
        };

        let mut burst = [0u8; 33];
        csbk.encode(&mut burst, CsbkCarriage::Csbk);

        let decoded = Csbk::decode(&burst, CsbkCarriage::Csbk).unwrap();
        assert_eq!(decoded, csbk);
    }

    #[test]
    fn wrong_carriage_mask_fails_crc() {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_ACK_RSP,
            fid: FID_ETSI,
            src_id: 1,
            dst_id: 2,
            kind: CsbkKind::AckRsp { service_type: 0, response: 0 },
        };

        let mut burst = [0u8; 33];
        csbk.encode(&mut burst, CsbkCarriage::Csbk);
        assert!(Csbk::decode(&burst, CsbkCarriage::MbcHeader).is_err());
    }

    #[test]
    fn call_alert_keys_on_fid() {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_RAND,
            fid: FID_DMRA,
            src_id: 10,
            dst_id: 20,
            kind: CsbkKind::CallAlert,
        };

        let mut burst = [0u8; 33];
        csbk.encode(&mut burst, CsbkCarriage::Csbk);

        let decoded = Csbk::decode(&burst, CsbkCarriage::Csbk).unwrap();
        assert_eq!(decoded.kind, CsbkKind::CallAlert);
    }

    #[test]
    fn regenerate_preserves_valid_bursts() {
        let csbk = Csbk {
            last_block: true,
            csbko: CSBKO_BSDWNACT,
            fid: FID_ETSI,
            src_id: 5,
            dst_id: 0,
            kind: CsbkKind::BsDwnAct,
        };

        let mut burst = [0u8; 33];
        csbk.encode(&mut burst, CsbkCarriage::Csbk);
        let original = burst;

        assert!(regenerate(&mut burst, CsbkCarriage::Csbk));
        assert_eq!(burst, original);

        burst[0] ^= 0xFF;
        burst[5] ^= 0xFF;
        burst[9] ^= 0xFF;
        assert!(!regenerate(&mut burst, CsbkCarriage::Csbk));
    }
}
