//! P25 Phase 1 (FDMA) frame primitives and trunking signalling.

pub mod ambt;
pub mod nid;
pub mod tdulc;
pub mod tsbk;

/// Frame sync (48 bits).
pub const SYNC: [u8; 6] = [0x55, 0x75, 0xF5, 0xFF, 0x77, 0xFF];

/// Data unit IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Duid {
    Hdu = 0x0,
    Tdu = 0x3,
    Ldu1 = 0x5,
    Tsdu = 0x7,
    Ldu2 = 0xA,
    Pdu = 0xC,
    Tdulc = 0xF,
}

impl Duid {
    pub const ALL: [Duid; 7] = [
        Duid::Hdu,
        Duid::Tdu,
        Duid::Ldu1,
        Duid::Tsdu,
        Duid::Ldu2,
        Duid::Pdu,
        Duid::Tdulc,
    ];

    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & 0x0F {
            0x0 => Duid::Hdu,
            0x3 => Duid::Tdu,
            0x5 => Duid::Ldu1,
            0x7 => Duid::Tsdu,
            0xA => Duid::Ldu2,
            0xC => Duid::Pdu,
            0xF => Duid::Tdulc,
            _ => return None,
        })
    }
}

/// Default network access code.
pub const DEFAULT_NAC: u16 = 0x293;

/// Trunking opcodes (6-bit LCO).
pub const TSBK_IOSP_GRP_VCH: u8 = 0x00;
pub const TSBK_IOSP_UU_VCH: u8 = 0x04;
pub const TSBK_OSP_SNDCP_CH_GNT: u8 = 0x14;
pub const TSBK_IOSP_ACK_RSP: u8 = 0x20;
pub const TSBK_OSP_DENY_RSP: u8 = 0x27;
pub const TSBK_OSP_AUTH_DMD: u8 = 0x31;
pub const TSBK_OSP_IDEN_UP_VU: u8 = 0x34;
pub const TSBK_OSP_TIME_DATE_ANN: u8 = 0x35;
pub const TSBK_OSP_SYNC_BCAST: u8 = 0x36;
pub const TSBK_OSP_RFSS_STS_BCAST: u8 = 0x3A;
pub const TSBK_OSP_NET_STS_BCAST: u8 = 0x3B;
pub const TSBK_OSP_ADJ_STS_BCAST: u8 = 0x3C;
pub const TSBK_OSP_IDEN_UP: u8 = 0x3D;

/// Terminator link-control opcodes.
pub const LC_GROUP: u8 = 0x00;
pub const LC_PRIVATE: u8 = 0x03;
pub const LC_TEL_INT_VCH_USER: u8 = 0x0F;
pub const LC_IDEN_UP: u8 = 0x18;

/// Manufacturer IDs.
pub const MFID_STANDARD: u8 = 0x00;
pub const MFID_MOT: u8 = 0x90;
